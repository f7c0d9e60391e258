//! Plain-text renderers for admin output.

use std::fmt::Write;

use crate::database_ops::discovery::VariationCombination;
use crate::database_ops::filter_index::{FilterIndexEntry, PublishOutcome};
use crate::database_ops::metadata::{DimensionValues, GameVariationMetadata, SetVariationMetadata};
use crate::database_ops::overrides::DisplayOverride;
use crate::engine::RefreshReport;
use crate::normalization::variation::Dimension;

pub fn render_combinations(title: &str, combos: &[VariationCombination]) -> String {
    let mut out = String::new();
    writeln!(out, "{title}: {} combination(s)", combos.len()).ok();
    for c in combos {
        writeln!(out, "  {:>6}  {}", c.count, c.key).ok();
    }
    out
}

pub fn render_overrides(title: &str, overrides: &[DisplayOverride]) -> String {
    let mut out = String::new();
    writeln!(out, "{title}: {} override(s)", overrides.len()).ok();
    for o in overrides {
        writeln!(
            out,
            "  #{} [{}] {} => {:?}",
            o.id, o.scope, o.matcher, o.display_text
        )
        .ok();
        if let Some(notes) = &o.notes {
            writeln!(out, "      notes: {notes}").ok();
        }
    }
    out
}

fn render_values(out: &mut String, values: &DimensionValues) {
    for dim in Dimension::ALL {
        let listed = values.get(dim);
        if listed.is_empty() {
            writeln!(out, "  {dim}: (none)").ok();
        } else {
            writeln!(out, "  {dim}: {}", listed.join(", ")).ok();
        }
    }
}

pub fn render_set_metadata(meta: &SetVariationMetadata) -> String {
    let mut out = String::new();
    writeln!(
        out,
        "SET {} (game {}): {} card(s), {} combination(s)",
        meta.set_id, meta.game_id, meta.total_cards, meta.total_combinations
    )
    .ok();
    render_values(&mut out, &meta.values);
    out
}

pub fn render_game_metadata(meta: &GameVariationMetadata) -> String {
    let mut out = String::new();
    writeln!(
        out,
        "GAME {}: {} card(s) in {} set(s), {} combination(s)",
        meta.game_id, meta.total_cards, meta.total_sets, meta.total_combinations
    )
    .ok();
    render_values(&mut out, &meta.values);
    out
}

pub fn render_refresh(report: &RefreshReport) -> String {
    let mut out = String::new();
    writeln!(
        out,
        "filter index {}: version {} ({} entries, {} games, {} sets)",
        match report.outcome {
            PublishOutcome::Published { .. } => "published",
            PublishOutcome::Unchanged { .. } => "unchanged",
        },
        report.outcome.version(),
        report.entries,
        report.games,
        report.sets
    )
    .ok();
    writeln!(out, "digest: {}", report.digest).ok();
    out
}

pub fn render_entries(entries: &[FilterIndexEntry]) -> String {
    let mut out = String::new();
    for e in entries {
        let set = e
            .scope
            .set_id()
            .map_or_else(|| "*".to_string(), |id| id.to_string());
        writeln!(
            out,
            "  game {} set {:<6} {:>6}  {}  {}",
            e.scope.game_id(),
            set,
            e.card_count,
            e.key,
            e.display_text.as_deref().unwrap_or("(default)")
        )
        .ok();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::discovery::CombinationScope;
    use crate::database_ops::metadata::aggregate_set;
    use crate::database_ops::overrides::OverrideScope;
    use crate::normalization::variation::{normalize, RawPrintingAttributes, VariationMatcher};
    use chrono::Utc;

    fn combo(treatment: &str, count: u64) -> VariationCombination {
        VariationCombination {
            scope: CombinationScope::Set {
                game_id: 1,
                set_id: 10,
            },
            key: normalize(&RawPrintingAttributes::treatment(treatment)),
            count,
        }
    }

    #[test]
    fn combinations_list_counts_and_keys() {
        let out = render_combinations("set 10", &[combo("showcase", 4), combo("galaxy", 1)]);
        assert!(out.starts_with("set 10: 2 combination(s)"));
        assert!(out.contains("     4  SHOWCASE/-/-/-/-"));
        assert!(out.contains("     1  GALAXY/-/-/-/-"));
    }

    #[test]
    fn overrides_show_scope_matcher_and_notes() {
        let o = DisplayOverride {
            id: 7,
            scope: OverrideScope::Game(3),
            matcher: VariationMatcher::any().with(Dimension::Treatment, "SHOWCASE"),
            display_text: "Showcase".into(),
            notes: Some("set symbol variant".into()),
            created_at: Utc::now(),
        };
        let out = render_overrides("overrides", &[o]);
        assert!(out.contains("#7 [game:3] treatment=SHOWCASE finish=*"));
        assert!(out.contains("notes: set symbol variant"));
    }

    #[test]
    fn metadata_marks_empty_dimensions() {
        let meta = aggregate_set(1, 10, &[combo("showcase", 2)]);
        let out = render_set_metadata(&meta);
        assert!(out.contains("SET 10 (game 1): 2 card(s), 1 combination(s)"));
        assert!(out.contains("treatment: SHOWCASE"));
        assert!(out.contains("finish: (none)"));
    }
}
