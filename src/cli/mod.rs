pub mod refresh_loop;
pub mod report;
