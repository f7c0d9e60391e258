//! Per-set and per-game variation summaries.
//!
//! Summaries are derived only from discovery output and are stored with a
//! full replace; nothing is merged into a previously stored value.

use async_trait::async_trait;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::Row;
use tracing::instrument;

use crate::database_ops::catalog::{GameId, SetId};
use crate::database_ops::db::Db;
use crate::database_ops::discovery::VariationCombination;
use crate::error::VariationResult;
use crate::normalization::variation::Dimension;

/// Sorted distinct values observed per dimension. Absent values are not listed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionValues {
    pub treatments: Vec<String>,
    pub finishes: Vec<String>,
    pub border_colors: Vec<String>,
    pub frame_effects: Vec<String>,
    pub promo_types: Vec<String>,
}

impl DimensionValues {
    pub fn from_combinations(combos: &[VariationCombination]) -> Self {
        let distinct = |dim: Dimension| -> Vec<String> {
            combos
                .iter()
                .filter_map(|c| c.key.get(dim))
                .sorted_unstable()
                .dedup()
                .map(str::to_owned)
                .collect()
        };
        Self {
            treatments: distinct(Dimension::Treatment),
            finishes: distinct(Dimension::Finish),
            border_colors: distinct(Dimension::BorderColor),
            frame_effects: distinct(Dimension::FrameEffect),
            promo_types: distinct(Dimension::PromoType),
        }
    }

    pub fn get(&self, dim: Dimension) -> &[String] {
        match dim {
            Dimension::Treatment => &self.treatments,
            Dimension::Finish => &self.finishes,
            Dimension::BorderColor => &self.border_colors,
            Dimension::FrameEffect => &self.frame_effects,
            Dimension::PromoType => &self.promo_types,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetVariationMetadata {
    pub game_id: GameId,
    pub set_id: SetId,
    pub values: DimensionValues,
    pub total_cards: u64,
    pub total_combinations: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameVariationMetadata {
    pub game_id: GameId,
    pub values: DimensionValues,
    pub total_cards: u64,
    pub total_sets: u64,
    /// Distinct combinations across the whole game (not the sum over sets).
    pub total_combinations: u64,
}

pub fn aggregate_set(
    game_id: GameId,
    set_id: SetId,
    combos: &[VariationCombination],
) -> SetVariationMetadata {
    SetVariationMetadata {
        game_id,
        set_id,
        values: DimensionValues::from_combinations(combos),
        total_cards: combos.iter().map(|c| c.count).sum(),
        total_combinations: combos.len() as u64,
    }
}

/// Game summary; card and set totals are the sums over `sets`.
pub fn aggregate_game(
    game_id: GameId,
    sets: &[SetVariationMetadata],
    game_combos: &[VariationCombination],
) -> GameVariationMetadata {
    GameVariationMetadata {
        game_id,
        values: DimensionValues::from_combinations(game_combos),
        total_cards: sets.iter().map(|s| s.total_cards).sum(),
        total_sets: sets.len() as u64,
        total_combinations: game_combos.len() as u64,
    }
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn replace_set(&self, meta: &SetVariationMetadata) -> VariationResult<()>;
    async fn replace_game(&self, meta: &GameVariationMetadata) -> VariationResult<()>;
    async fn load_set(&self, set_id: SetId) -> VariationResult<Option<SetVariationMetadata>>;
    async fn load_game(&self, game_id: GameId) -> VariationResult<Option<GameVariationMetadata>>;
}

pub struct PgMetadataStore {
    db: Db,
}

impl PgMetadataStore {
    pub fn new(db: &Db) -> Self {
        Self { db: db.clone() }
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    #[instrument(skip(self, meta), fields(set_id = meta.set_id))]
    async fn replace_set(&self, meta: &SetVariationMetadata) -> VariationResult<()> {
        sqlx::query(
            "INSERT INTO set_variation_metadata (set_id, game_id, payload, total_cards, built_at)
             VALUES ($1, $2, $3, $4, now())
             ON CONFLICT (set_id) DO UPDATE
             SET game_id = EXCLUDED.game_id,
                 payload = EXCLUDED.payload,
                 total_cards = EXCLUDED.total_cards,
                 built_at = EXCLUDED.built_at",
        )
        .persistent(false)
        .bind(meta.set_id)
        .bind(meta.game_id)
        .bind(Json(meta))
        .bind(meta.total_cards as i64)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, meta), fields(game_id = meta.game_id))]
    async fn replace_game(&self, meta: &GameVariationMetadata) -> VariationResult<()> {
        sqlx::query(
            "INSERT INTO game_variation_metadata (game_id, payload, total_cards, total_sets, built_at)
             VALUES ($1, $2, $3, $4, now())
             ON CONFLICT (game_id) DO UPDATE
             SET payload = EXCLUDED.payload,
                 total_cards = EXCLUDED.total_cards,
                 total_sets = EXCLUDED.total_sets,
                 built_at = EXCLUDED.built_at",
        )
        .persistent(false)
        .bind(meta.game_id)
        .bind(Json(meta))
        .bind(meta.total_cards as i64)
        .bind(meta.total_sets as i64)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    async fn load_set(&self, set_id: SetId) -> VariationResult<Option<SetVariationMetadata>> {
        let row = sqlx::query("SELECT payload FROM set_variation_metadata WHERE set_id = $1")
            .persistent(false)
            .bind(set_id)
            .fetch_optional(&self.db.pool)
            .await?;
        match row {
            Some(r) => Ok(Some(r.try_get::<Json<SetVariationMetadata>, _>("payload")?.0)),
            None => Ok(None),
        }
    }

    async fn load_game(&self, game_id: GameId) -> VariationResult<Option<GameVariationMetadata>> {
        let row = sqlx::query("SELECT payload FROM game_variation_metadata WHERE game_id = $1")
            .persistent(false)
            .bind(game_id)
            .fetch_optional(&self.db.pool)
            .await?;
        match row {
            Some(r) => Ok(Some(r.try_get::<Json<GameVariationMetadata>, _>("payload")?.0)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::discovery::{group_combinations, CombinationScope};
    use crate::database_ops::catalog::CatalogCard;
    use crate::normalization::variation::RawPrintingAttributes;

    fn card(id: i64, attrs: RawPrintingAttributes) -> CatalogCard {
        CatalogCard {
            id,
            set_id: 10,
            game_id: 1,
            attributes: attrs,
        }
    }

    #[test]
    fn lists_sorted_distinct_values_without_absent() {
        let cards = vec![
            card(1, RawPrintingAttributes::treatment("showcase").with(Dimension::Finish, "Foil")),
            card(2, RawPrintingAttributes::treatment("BORDERLESS").with(Dimension::Finish, "nonfoil")),
            card(3, RawPrintingAttributes::treatment("Showcase").with(Dimension::Finish, "foil")),
            card(4, RawPrintingAttributes::default()),
        ];
        let combos = group_combinations(
            CombinationScope::Set {
                game_id: 1,
                set_id: 10,
            },
            &cards,
        );
        let meta = aggregate_set(1, 10, &combos);
        assert_eq!(meta.values.treatments, vec!["BORDERLESS", "SHOWCASE"]);
        assert_eq!(meta.values.finishes, vec!["foil", "nonfoil"]);
        assert!(meta.values.promo_types.is_empty());
        assert_eq!(meta.total_cards, 4);
        assert_eq!(meta.total_combinations, 3);
    }

    #[test]
    fn game_totals_sum_set_totals() {
        let sets = vec![
            SetVariationMetadata {
                game_id: 1,
                set_id: 10,
                values: DimensionValues::default(),
                total_cards: 4,
                total_combinations: 2,
            },
            SetVariationMetadata {
                game_id: 1,
                set_id: 11,
                values: DimensionValues::default(),
                total_cards: 6,
                total_combinations: 1,
            },
        ];
        let game = aggregate_game(1, &sets, &[]);
        assert_eq!(game.total_cards, 10);
        assert_eq!(game.total_sets, 2);
    }
}
