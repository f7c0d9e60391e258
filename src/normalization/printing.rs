use std::collections::HashMap;

use serde_json::Value;

use super::variation::{Dimension, RawPrintingAttributes};

/// Strategy describing how to interpret a feed field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldStrategy {
    /// Value is a plain string.
    Text,
    /// Value is an array of strings; members are sorted and joined with ','.
    JoinedList,
    /// JustTCG `printing` label such as "1st Edition Holofoil": the edition
    /// prefix becomes the promo type and the remainder the finish.
    JustTcgPrinting,
}

#[derive(Debug, Clone)]
pub struct PrintingAlias {
    pub field: &'static str,
    pub dimension: Dimension,
    pub strategy: FieldStrategy,
}

impl PrintingAlias {
    pub const fn new(field: &'static str, dimension: Dimension, strategy: FieldStrategy) -> Self {
        Self {
            field,
            dimension,
            strategy,
        }
    }
}

/// Configuration-driven mapper translating feed payloads into raw printing attributes.
///
/// Output is still raw: casing and whitespace are left to the canonicalizer.
#[derive(Debug, Default, Clone)]
pub struct PrintingMapper {
    aliases: HashMap<String, Vec<PrintingAlias>>,
}

impl PrintingMapper {
    pub fn with_defaults() -> Self {
        Self::default()
            .register(
                "justtcg",
                PrintingAlias::new("printing", Dimension::Finish, FieldStrategy::JustTcgPrinting),
            )
            .register(
                "scryfall",
                PrintingAlias::new("border_color", Dimension::BorderColor, FieldStrategy::Text),
            )
            .register(
                "scryfall",
                PrintingAlias::new("frame_effects", Dimension::FrameEffect, FieldStrategy::JoinedList),
            )
            .register(
                "scryfall",
                PrintingAlias::new("promo_types", Dimension::PromoType, FieldStrategy::JoinedList),
            )
            .register(
                "scryfall",
                PrintingAlias::new("finish", Dimension::Finish, FieldStrategy::Text),
            )
            .register(
                "scryfall",
                PrintingAlias::new("treatment", Dimension::Treatment, FieldStrategy::Text),
            )
    }

    /// Add an alias for a provider key. Several aliases per provider are allowed.
    pub fn register(mut self, provider_key: impl Into<String>, alias: PrintingAlias) -> Self {
        self.aliases
            .entry(provider_key.into().to_ascii_lowercase())
            .or_default()
            .push(alias);
        self
    }

    /// `None` when the provider is unknown.
    pub fn map(&self, provider_key: &str, payload: &Value) -> Option<RawPrintingAttributes> {
        let aliases = self.aliases.get(&provider_key.to_ascii_lowercase())?;
        let mut out = RawPrintingAttributes::default();
        for alias in aliases {
            let Some(value) = payload.get(alias.field) else {
                continue;
            };
            out = match alias.strategy {
                FieldStrategy::Text => match value.as_str() {
                    Some(s) => out.with(alias.dimension, s),
                    None => out,
                },
                FieldStrategy::JoinedList => match joined_list(value) {
                    Some(s) => out.with(alias.dimension, s),
                    None => out,
                },
                FieldStrategy::JustTcgPrinting => match value.as_str() {
                    Some(s) => apply_justtcg_printing(out, alias.dimension, s),
                    None => out,
                },
            };
        }
        Some(out)
    }
}

fn joined_list(value: &Value) -> Option<String> {
    let mut items: Vec<&str> = value
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if items.is_empty() {
        return None;
    }
    items.sort_unstable();
    items.dedup();
    Some(items.join(","))
}

const EDITION_PREFIXES: [(&str, &str); 3] = [
    ("1st edition", "FIRST_EDITION"),
    ("unlimited", "UNLIMITED"),
    ("limited", "LIMITED"),
];

impl RawPrintingAttributes {
    /// Map a JustTCG variant `printing` label onto finish and promo type.
    pub fn from_justtcg_printing(printing: &str) -> Self {
        apply_justtcg_printing(Self::default(), Dimension::Finish, printing)
    }
}

fn apply_justtcg_printing(
    attrs: RawPrintingAttributes,
    finish_dim: Dimension,
    printing: &str,
) -> RawPrintingAttributes {
    let trimmed = printing.trim();
    let lower = trimmed.to_ascii_lowercase();
    let mut attrs = attrs;
    let mut rest = trimmed;
    for (prefix, promo) in EDITION_PREFIXES {
        let at_word_end = lower
            .get(prefix.len()..)
            .and_then(|tail| tail.chars().next())
            .map_or(true, char::is_whitespace);
        if lower.starts_with(prefix) && at_word_end {
            attrs = attrs.with(Dimension::PromoType, promo);
            rest = trimmed[prefix.len()..].trim();
            break;
        }
    }
    // JustTCG reports a plain printing as "Normal".
    if rest.is_empty() || rest.eq_ignore_ascii_case("normal") {
        return attrs.with(finish_dim, "nonfoil");
    }
    attrs.with(finish_dim, rest)
}
