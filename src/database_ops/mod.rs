pub mod catalog;
pub mod consistency;
pub mod db;
pub mod discovery;
pub mod filter_index;
pub mod memory;
pub mod metadata;
pub mod overrides;
pub mod predicate;
pub mod resolver;
