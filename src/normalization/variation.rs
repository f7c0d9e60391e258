use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{VariationError, VariationResult};

/// One of the five independent attribute dimensions of a card printing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Treatment,
    Finish,
    BorderColor,
    FrameEffect,
    PromoType,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::Treatment,
        Dimension::Finish,
        Dimension::BorderColor,
        Dimension::FrameEffect,
        Dimension::PromoType,
    ];

    /// Column name used by every table that stores a dimension value.
    pub fn column(&self) -> &'static str {
        match self {
            Dimension::Treatment => "treatment",
            Dimension::Finish => "finish",
            Dimension::BorderColor => "border_color",
            Dimension::FrameEffect => "frame_effect",
            Dimension::PromoType => "promo_type",
        }
    }

    /// Treatment and promo type are short enum-like codes and are upper-cased;
    /// the remaining dimensions are free-text labels and are lower-cased.
    fn upper_cased(&self) -> bool {
        matches!(self, Dimension::Treatment | Dimension::PromoType)
    }

    /// Canonical form of one raw value. Blank input collapses to `None`.
    pub fn canonicalize(&self, raw: Option<&str>) -> Option<String> {
        let trimmed = raw?.trim();
        if trimmed.is_empty() {
            return None;
        }
        let cased = if self.upper_cased() {
            trimmed.to_uppercase()
        } else {
            trimmed.to_lowercase()
        };
        Some(cased)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Printing attributes exactly as supplied by the catalog/import feeds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawPrintingAttributes {
    pub treatment: Option<String>,
    pub finish: Option<String>,
    pub border_color: Option<String>,
    pub frame_effect: Option<String>,
    pub promo_type: Option<String>,
}

impl RawPrintingAttributes {
    pub fn get(&self, dim: Dimension) -> Option<&str> {
        match dim {
            Dimension::Treatment => self.treatment.as_deref(),
            Dimension::Finish => self.finish.as_deref(),
            Dimension::BorderColor => self.border_color.as_deref(),
            Dimension::FrameEffect => self.frame_effect.as_deref(),
            Dimension::PromoType => self.promo_type.as_deref(),
        }
    }

    pub fn with(mut self, dim: Dimension, value: impl Into<String>) -> Self {
        let value = Some(value.into());
        match dim {
            Dimension::Treatment => self.treatment = value,
            Dimension::Finish => self.finish = value,
            Dimension::BorderColor => self.border_color = value,
            Dimension::FrameEffect => self.frame_effect = value,
            Dimension::PromoType => self.promo_type = value,
        }
        self
    }

    pub fn treatment(value: impl Into<String>) -> Self {
        Self::default().with(Dimension::Treatment, value)
    }
}

/// Normalized five-dimension tuple identifying one printing variation.
///
/// Only constructible through [`normalize`], so every instance is canonical.
/// Ordering is lexicographic over the dimensions in [`Dimension::ALL`] order,
/// with an absent value sorting before any present one.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(from = "RawPrintingAttributes")]
pub struct CanonicalVariationKey {
    treatment: Option<String>,
    finish: Option<String>,
    border_color: Option<String>,
    frame_effect: Option<String>,
    promo_type: Option<String>,
}

impl CanonicalVariationKey {
    pub fn get(&self, dim: Dimension) -> Option<&str> {
        match dim {
            Dimension::Treatment => self.treatment.as_deref(),
            Dimension::Finish => self.finish.as_deref(),
            Dimension::BorderColor => self.border_color.as_deref(),
            Dimension::FrameEffect => self.frame_effect.as_deref(),
            Dimension::PromoType => self.promo_type.as_deref(),
        }
    }

    pub fn into_raw(self) -> RawPrintingAttributes {
        RawPrintingAttributes {
            treatment: self.treatment,
            finish: self.finish,
            border_color: self.border_color,
            frame_effect: self.frame_effect,
            promo_type: self.promo_type,
        }
    }
}

impl From<RawPrintingAttributes> for CanonicalVariationKey {
    fn from(raw: RawPrintingAttributes) -> Self {
        normalize(&raw)
    }
}

impl fmt::Display for CanonicalVariationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = Dimension::ALL
            .iter()
            .map(|dim| self.get(*dim).unwrap_or("-"))
            .collect();
        f.write_str(&parts.join("/"))
    }
}

/// Canonicalize one raw attribute tuple. Total, pure and idempotent.
pub fn normalize(raw: &RawPrintingAttributes) -> CanonicalVariationKey {
    CanonicalVariationKey {
        treatment: Dimension::Treatment.canonicalize(raw.treatment.as_deref()),
        finish: Dimension::Finish.canonicalize(raw.finish.as_deref()),
        border_color: Dimension::BorderColor.canonicalize(raw.border_color.as_deref()),
        frame_effect: Dimension::FrameEffect.canonicalize(raw.frame_effect.as_deref()),
        promo_type: Dimension::PromoType.canonicalize(raw.promo_type.as_deref()),
    }
}

/// One position of an override matcher.
///
/// A stored NULL always decodes to `Wildcard` ("don't care"). There is no way
/// to express "dimension must be absent": a `Specific` value never matches a
/// key whose dimension is absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MatchField {
    #[default]
    Wildcard,
    Specific(String),
}

impl MatchField {
    pub fn from_column(value: Option<String>) -> Self {
        match value {
            Some(v) => MatchField::Specific(v),
            None => MatchField::Wildcard,
        }
    }

    pub fn as_column(&self) -> Option<&str> {
        match self {
            MatchField::Specific(v) => Some(v.as_str()),
            MatchField::Wildcard => None,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, MatchField::Wildcard)
    }

    pub fn matches(&self, value: Option<&str>) -> bool {
        match self {
            MatchField::Wildcard => true,
            MatchField::Specific(expected) => value == Some(expected.as_str()),
        }
    }
}

/// Five-position matcher of a display override.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VariationMatcher {
    #[serde(default)]
    pub treatment: MatchField,
    #[serde(default)]
    pub finish: MatchField,
    #[serde(default)]
    pub border_color: MatchField,
    #[serde(default)]
    pub frame_effect: MatchField,
    #[serde(default)]
    pub promo_type: MatchField,
}

impl VariationMatcher {
    /// Matcher with every position wildcarded.
    pub fn any() -> Self {
        Self::default()
    }

    /// Matcher pinning every dimension of `key`; absent dimensions stay wildcards.
    pub fn for_key(key: &CanonicalVariationKey) -> Self {
        Dimension::ALL.iter().fold(Self::any(), |m, dim| match key.get(*dim) {
            Some(v) => m.with(*dim, v),
            None => m,
        })
    }

    pub fn with(mut self, dim: Dimension, value: impl Into<String>) -> Self {
        *self.field_mut(dim) = MatchField::Specific(value.into());
        self
    }

    pub fn field(&self, dim: Dimension) -> &MatchField {
        match dim {
            Dimension::Treatment => &self.treatment,
            Dimension::Finish => &self.finish,
            Dimension::BorderColor => &self.border_color,
            Dimension::FrameEffect => &self.frame_effect,
            Dimension::PromoType => &self.promo_type,
        }
    }

    fn field_mut(&mut self, dim: Dimension) -> &mut MatchField {
        match dim {
            Dimension::Treatment => &mut self.treatment,
            Dimension::Finish => &mut self.finish,
            Dimension::BorderColor => &mut self.border_color,
            Dimension::FrameEffect => &mut self.frame_effect,
            Dimension::PromoType => &mut self.promo_type,
        }
    }

    /// Number of non-wildcard positions.
    pub fn specificity(&self) -> usize {
        Dimension::ALL
            .iter()
            .filter(|dim| !self.field(**dim).is_wildcard())
            .count()
    }

    pub fn matches(&self, key: &CanonicalVariationKey) -> bool {
        Dimension::ALL
            .iter()
            .all(|dim| self.field(*dim).matches(key.get(*dim)))
    }

    /// Apply the key canonicalization rules to every specific value so that
    /// stored matchers compare equal to canonical keys.
    pub fn canonicalized(mut self) -> VariationResult<Self> {
        for dim in Dimension::ALL {
            let MatchField::Specific(raw) = self.field(dim) else {
                continue;
            };
            let canonical = dim.canonicalize(Some(raw.as_str())).ok_or_else(|| {
                VariationError::Invalid(format!(
                    "{dim} is blank; use a wildcard to match any value"
                ))
            })?;
            *self.field_mut(dim) = MatchField::Specific(canonical);
        }
        Ok(self)
    }
}

impl fmt::Display for VariationMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = Dimension::ALL
            .iter()
            .map(|dim| format!("{}={}", dim, self.field(*dim).as_column().unwrap_or("*")))
            .collect();
        f.write_str(&parts.join(" "))
    }
}
