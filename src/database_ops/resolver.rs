//! Display-text resolution over the layered override hierarchy.
//!
//! The candidate with the most non-wildcard positions always wins. A game
//! scope pools its own layer with the global layer; at equal specificity a
//! game override beats a global one, and after that the most recently
//! created override (highest id) wins.

use std::collections::HashMap;

use crate::database_ops::overrides::{DisplayOverride, OverrideScope};
use crate::normalization::variation::CanonicalVariationKey;

/// Best candidate among `overrides` for `key`.
///
/// Ranked by specificity, then game scope over global, then id.
pub fn best_match<'a>(
    key: &CanonicalVariationKey,
    overrides: impl IntoIterator<Item = &'a DisplayOverride>,
) -> Option<&'a DisplayOverride> {
    overrides
        .into_iter()
        .filter(|o| o.matcher.matches(key))
        .max_by_key(|o| (o.matcher.specificity(), o.scope.game_id().is_some(), o.id))
}

/// Overrides indexed by scope, loaded once and reused for many keys.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    layers: HashMap<OverrideScope, Vec<DisplayOverride>>,
}

impl Resolver {
    pub fn new(overrides: impl IntoIterator<Item = DisplayOverride>) -> Self {
        let mut layers: HashMap<OverrideScope, Vec<DisplayOverride>> = HashMap::new();
        for o in overrides {
            layers.entry(o.scope).or_default().push(o);
        }
        Self { layers }
    }

    fn layer(&self, scope: OverrideScope) -> &[DisplayOverride] {
        self.layers.get(&scope).map(Vec::as_slice).unwrap_or_default()
    }

    /// `None` means the caller applies its own default display logic.
    pub fn resolve(
        &self,
        key: &CanonicalVariationKey,
        scope: OverrideScope,
    ) -> Option<&DisplayOverride> {
        let global = self.layer(OverrideScope::Global);
        match scope {
            OverrideScope::Global => best_match(key, global),
            OverrideScope::Game(_) => best_match(key, self.layer(scope).iter().chain(global)),
        }
    }

    pub fn display_text(&self, key: &CanonicalVariationKey, scope: OverrideScope) -> Option<&str> {
        self.resolve(key, scope).map(|o| o.display_text.as_str())
    }

    pub fn len(&self) -> usize {
        self.layers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalization::variation::{
        normalize, Dimension, RawPrintingAttributes, VariationMatcher,
    };
    use chrono::Utc;

    fn ov(id: i64, scope: OverrideScope, matcher: VariationMatcher, text: &str) -> DisplayOverride {
        DisplayOverride {
            id,
            scope,
            matcher,
            display_text: text.to_string(),
            notes: None,
            created_at: Utc::now(),
        }
    }

    fn full_key() -> CanonicalVariationKey {
        normalize(&RawPrintingAttributes {
            treatment: Some("BORDERLESS".into()),
            finish: Some("foil".into()),
            border_color: Some("black".into()),
            frame_effect: Some("inverted".into()),
            promo_type: Some("PRERELEASE".into()),
        })
    }

    #[test]
    fn variation_level_outranks_treatment_level() {
        let key = full_key();
        // Variation-level rule is older than the treatment-level rule on purpose.
        let resolver = Resolver::new([
            ov(1, OverrideScope::Global, VariationMatcher::for_key(&key), "Borderless Prerelease Foil"),
            ov(
                2,
                OverrideScope::Global,
                VariationMatcher::any().with(Dimension::Treatment, "BORDERLESS"),
                "Borderless",
            ),
        ]);
        assert_eq!(
            resolver.display_text(&key, OverrideScope::Global),
            Some("Borderless Prerelease Foil")
        );
    }

    #[test]
    fn equal_specificity_prefers_most_recent() {
        let key = full_key();
        let resolver = Resolver::new([
            ov(
                5,
                OverrideScope::Global,
                VariationMatcher::any().with(Dimension::Treatment, "BORDERLESS"),
                "older",
            ),
            ov(
                9,
                OverrideScope::Global,
                VariationMatcher::any().with(Dimension::Finish, "foil"),
                "newer",
            ),
        ]);
        assert_eq!(resolver.display_text(&key, OverrideScope::Global), Some("newer"));
    }

    #[test]
    fn non_matching_overrides_are_ignored() {
        let key = normalize(&RawPrintingAttributes::treatment("SHOWCASE"));
        let resolver = Resolver::new([ov(
            1,
            OverrideScope::Global,
            VariationMatcher::any()
                .with(Dimension::Treatment, "SHOWCASE")
                .with(Dimension::Finish, "foil"),
            "Showcase Foil",
        )]);
        assert_eq!(resolver.display_text(&key, OverrideScope::Global), None);
    }

    #[test]
    fn all_wildcard_override_matches_everything() {
        let key = normalize(&RawPrintingAttributes::default());
        let resolver = Resolver::new([ov(1, OverrideScope::Global, VariationMatcher::any(), "Regular")]);
        assert_eq!(resolver.display_text(&key, OverrideScope::Global), Some("Regular"));
    }

    #[test]
    fn global_variation_level_outranks_game_treatment_level() {
        let key = full_key();
        let resolver = Resolver::new([
            ov(1, OverrideScope::Global, VariationMatcher::for_key(&key), "variation-level"),
            ov(
                2,
                OverrideScope::Game(7),
                VariationMatcher::any().with(Dimension::Treatment, "BORDERLESS"),
                "treatment-level",
            ),
        ]);
        assert_eq!(resolver.display_text(&key, OverrideScope::Game(7)), Some("variation-level"));
        assert_eq!(resolver.display_text(&key, OverrideScope::Game(8)), Some("variation-level"));
        assert_eq!(resolver.display_text(&key, OverrideScope::Global), Some("variation-level"));
    }

    #[test]
    fn game_override_wins_at_equal_specificity() {
        let key = full_key();
        // The global rule is newer, so only the scope rank can pick the game rule.
        let resolver = Resolver::new([
            ov(
                3,
                OverrideScope::Game(7),
                VariationMatcher::any().with(Dimension::Treatment, "BORDERLESS"),
                "game",
            ),
            ov(
                4,
                OverrideScope::Global,
                VariationMatcher::any().with(Dimension::Finish, "foil"),
                "global",
            ),
        ]);
        assert_eq!(resolver.display_text(&key, OverrideScope::Game(7)), Some("game"));
        assert_eq!(resolver.display_text(&key, OverrideScope::Game(8)), Some("global"));
    }

    #[test]
    fn global_scope_never_sees_game_overrides() {
        let key = full_key();
        let resolver = Resolver::new([ov(3, OverrideScope::Game(7), VariationMatcher::any(), "game")]);
        assert_eq!(resolver.display_text(&key, OverrideScope::Global), None);
        assert_eq!(resolver.len(), 1);
        assert!(!resolver.is_empty());
    }
}
