//! Read access to the externally owned card catalog.
//!
//! Expected catalog tables (owned by the import pipeline):
//! `tcg_sets(id, game_id, name)` and
//! `tcg_cards(id, set_id, treatment, finish, border_color, frame_effect, promo_type)`.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::{debug, instrument};

use crate::database_ops::db::Db;
use crate::database_ops::predicate::{Field, FieldSource, Predicate, Value};
use crate::error::{VariationError, VariationResult};
use crate::normalization::variation::{Dimension, RawPrintingAttributes};

pub type GameId = i64;
pub type SetId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardSet {
    pub id: SetId,
    pub game_id: GameId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogCard {
    pub id: i64,
    pub set_id: SetId,
    pub game_id: GameId,
    pub attributes: RawPrintingAttributes,
}

impl FieldSource for CatalogCard {
    fn field_value(&self, field: Field) -> Option<Value> {
        match field {
            Field::GameId => Some(Value::Int(self.game_id)),
            Field::SetId => Some(Value::Int(self.set_id)),
            Field::Dimension(dim) => self.attributes.get(dim).map(Value::from),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogScope {
    Set(SetId),
    Game(GameId),
    All,
}

impl CatalogScope {
    pub fn predicate(&self) -> Predicate {
        match self {
            CatalogScope::Set(id) => Predicate::set(*id),
            CatalogScope::Game(id) => Predicate::game(*id),
            CatalogScope::All => Predicate::new(),
        }
    }
}

/// Sets and cards read from one consistent view of the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSnapshot {
    pub sets: Vec<CardSet>,
    pub cards: Vec<CatalogCard>,
}

impl CatalogSnapshot {
    pub fn set(&self, set_id: SetId) -> Option<&CardSet> {
        self.sets.iter().find(|s| s.id == set_id)
    }

    /// Distinct game ids, ascending.
    pub fn game_ids(&self) -> Vec<GameId> {
        let mut ids: Vec<GameId> = self.sets.iter().map(|s| s.game_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Sets of one game, ordered by id.
    pub fn sets_in_game(&self, game_id: GameId) -> Vec<&CardSet> {
        let mut sets: Vec<&CardSet> = self.sets.iter().filter(|s| s.game_id == game_id).collect();
        sets.sort_by_key(|s| s.id);
        sets
    }

    pub fn cards_in_set(&self, set_id: SetId) -> impl Iterator<Item = &CatalogCard> {
        self.cards.iter().filter(move |c| c.set_id == set_id)
    }

    pub fn cards_in_game(&self, game_id: GameId) -> impl Iterator<Item = &CatalogCard> {
        self.cards.iter().filter(move |c| c.game_id == game_id)
    }
}

/// Catalog read capability consumed by discovery and aggregation.
///
/// Every call must return data from a single consistent view so that
/// concurrent imports never skew counts within one scan.
#[async_trait]
pub trait CatalogReader: Send + Sync {
    async fn snapshot(&self, scope: CatalogScope) -> VariationResult<CatalogSnapshot>;
}

pub struct PgCatalog {
    db: Db,
}

impl PgCatalog {
    pub fn new(db: &Db) -> Self {
        Self { db: db.clone() }
    }
}

#[async_trait]
impl CatalogReader for PgCatalog {
    #[instrument(skip(self))]
    async fn snapshot(&self, scope: CatalogScope) -> VariationResult<CatalogSnapshot> {
        let predicate = scope.predicate();
        let mut tx = self
            .db
            .pool
            .begin()
            .await
            .map_err(VariationError::unavailable)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .persistent(false)
            .execute(&mut *tx)
            .await
            .map_err(VariationError::unavailable)?;

        let mut sets_q: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "SELECT set_id, game_id, name FROM (
                SELECT s.id AS set_id, s.game_id, s.name FROM tcg_sets s
             ) sets",
        );
        predicate.push_where(&mut sets_q);
        sets_q.push(" ORDER BY set_id");
        let set_rows = sets_q
            .build()
            .persistent(false)
            .fetch_all(&mut *tx)
            .await
            .map_err(VariationError::unavailable)?;

        let mut cards_q: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "SELECT card_id, set_id, game_id, treatment, finish, border_color, frame_effect, promo_type FROM (
                SELECT c.id AS card_id, c.set_id, s.game_id,
                       c.treatment, c.finish, c.border_color, c.frame_effect, c.promo_type
                FROM tcg_cards c
                JOIN tcg_sets s ON s.id = c.set_id
             ) cards",
        );
        predicate.push_where(&mut cards_q);
        cards_q.push(" ORDER BY card_id");
        let card_rows = cards_q
            .build()
            .persistent(false)
            .fetch_all(&mut *tx)
            .await
            .map_err(VariationError::unavailable)?;

        tx.commit().await.map_err(VariationError::unavailable)?;

        let mut snapshot = CatalogSnapshot::default();
        for r in set_rows {
            snapshot.sets.push(CardSet {
                id: r.try_get("set_id").map_err(VariationError::unavailable)?,
                game_id: r.try_get("game_id").map_err(VariationError::unavailable)?,
                name: r.try_get("name").map_err(VariationError::unavailable)?,
            });
        }
        for r in card_rows {
            let mut attributes = RawPrintingAttributes::default();
            for dim in Dimension::ALL {
                let value: Option<String> = r
                    .try_get(dim.column())
                    .map_err(VariationError::unavailable)?;
                if let Some(v) = value {
                    attributes = attributes.with(dim, v);
                }
            }
            snapshot.cards.push(CatalogCard {
                id: r.try_get("card_id").map_err(VariationError::unavailable)?,
                set_id: r.try_get("set_id").map_err(VariationError::unavailable)?,
                game_id: r.try_get("game_id").map_err(VariationError::unavailable)?,
                attributes,
            });
        }
        debug!(
            sets = snapshot.sets.len(),
            cards = snapshot.cards.len(),
            "catalog snapshot read"
        );
        Ok(snapshot)
    }
}
