//! Published filter index consumed by storefront dropdowns.
//!
//! A projection is generated completely in memory and only then handed to
//! [`FilterIndexStore::publish`], which swaps it in as one unit. A failed
//! generation therefore never touches the live projection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::postgres::PgRow;
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::{info, instrument};

use crate::database_ops::catalog::CatalogSnapshot;
use crate::database_ops::db::Db;
use crate::database_ops::discovery::{group_combinations, CombinationScope, VariationCombination};
use crate::database_ops::overrides::OverrideScope;
use crate::database_ops::predicate::{Field, FieldSource, Predicate, Value};
use crate::database_ops::resolver::Resolver;
use crate::error::{VariationError, VariationResult};
use crate::normalization::variation::{normalize, CanonicalVariationKey, Dimension, RawPrintingAttributes};

/// Arbitrary but fixed key for `pg_advisory_xact_lock`; serializes publishers across processes.
const PUBLISH_LOCK_KEY: i64 = 0x7663_6669_6c74; // "vcfilt"

/// Postgres accepts at most 65535 bind parameters per statement.
const INSERT_CHUNK: usize = 4000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterIndexEntry {
    pub scope: CombinationScope,
    pub key: CanonicalVariationKey,
    pub card_count: u64,
    /// `None` when no override matched; the storefront applies its own default.
    pub display_text: Option<String>,
    pub override_id: Option<i64>,
}

impl FieldSource for FilterIndexEntry {
    fn field_value(&self, field: Field) -> Option<Value> {
        match field {
            Field::GameId => Some(Value::Int(self.scope.game_id())),
            Field::SetId => self.scope.set_id().map(Value::Int),
            Field::Dimension(dim) => self.key.get(dim).map(Value::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedIndex {
    pub version: i64,
    pub digest: String,
    pub entries: Vec<FilterIndexEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PublishOutcome {
    Published { version: i64 },
    /// The live projection already had this digest; nothing was rewritten.
    Unchanged { version: i64 },
}

impl PublishOutcome {
    pub fn version(&self) -> i64 {
        match self {
            PublishOutcome::Published { version } | PublishOutcome::Unchanged { version } => *version,
        }
    }
}

fn entries_for(
    combos: Vec<VariationCombination>,
    resolver: &Resolver,
    scope: OverrideScope,
) -> impl Iterator<Item = FilterIndexEntry> + '_ {
    combos.into_iter().map(move |c| {
        let resolved = resolver.resolve(&c.key, scope);
        FilterIndexEntry {
            scope: c.scope,
            display_text: resolved.map(|o| o.display_text.clone()),
            override_id: resolved.map(|o| o.id),
            key: c.key,
            card_count: c.count,
        }
    })
}

/// Build the full projection: per game (ascending id) its game-level
/// entries followed by the entries of each of its sets (ascending id).
pub fn build_projection(snapshot: &CatalogSnapshot, resolver: &Resolver) -> Vec<FilterIndexEntry> {
    let mut out = Vec::new();
    for game_id in snapshot.game_ids() {
        let scope = OverrideScope::Game(game_id);
        let game_combos = group_combinations(
            CombinationScope::Game { game_id },
            snapshot.cards_in_game(game_id),
        );
        out.extend(entries_for(game_combos, resolver, scope));
        for set in snapshot.sets_in_game(game_id) {
            let set_combos = group_combinations(
                CombinationScope::Set {
                    game_id,
                    set_id: set.id,
                },
                snapshot.cards_in_set(set.id),
            );
            out.extend(entries_for(set_combos, resolver, scope));
        }
    }
    out
}

/// Hex SHA-256 over the canonical JSON encoding of `entries`.
pub fn projection_digest(entries: &[FilterIndexEntry]) -> VariationResult<String> {
    let bytes = serde_json::to_vec(entries)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

#[async_trait]
pub trait FilterIndexStore: Send + Sync {
    /// Atomically replace the live projection. Implementations must leave the
    /// previous projection untouched when any part of the write fails.
    async fn publish(
        &self,
        digest: &str,
        entries: &[FilterIndexEntry],
    ) -> VariationResult<PublishOutcome>;
    async fn current(&self) -> VariationResult<Option<PublishedIndex>>;
    /// Live entries matching `predicate`, in projection order.
    async fn query(&self, predicate: &Predicate) -> VariationResult<Vec<FilterIndexEntry>>;
}

pub struct PgFilterIndexStore {
    db: Db,
}

impl PgFilterIndexStore {
    pub fn new(db: &Db) -> Self {
        Self { db: db.clone() }
    }
}

const ENTRY_COLUMNS: &str = "scope_kind, game_id, set_id, treatment, finish, border_color, frame_effect, promo_type, card_count, display_text, override_id";

fn entry_from_row(r: &PgRow) -> VariationResult<FilterIndexEntry> {
    let game_id: i64 = r.try_get("game_id")?;
    let set_id: Option<i64> = r.try_get("set_id")?;
    let scope_kind: String = r.try_get("scope_kind")?;
    let scope = match (scope_kind.as_str(), set_id) {
        ("set", Some(set_id)) => CombinationScope::Set { game_id, set_id },
        ("game", None) => CombinationScope::Game { game_id },
        (kind, _) => {
            return Err(VariationError::storage(format!(
                "malformed filter index row: scope_kind={kind} set_id={set_id:?}"
            )))
        }
    };
    let mut raw = RawPrintingAttributes::default();
    for dim in Dimension::ALL {
        let value: Option<String> = r.try_get(dim.column())?;
        if let Some(v) = value {
            raw = raw.with(dim, v);
        }
    }
    let card_count: i64 = r.try_get("card_count")?;
    Ok(FilterIndexEntry {
        scope,
        key: normalize(&raw),
        card_count: card_count.max(0) as u64,
        display_text: r.try_get("display_text")?,
        override_id: r.try_get("override_id")?,
    })
}

#[async_trait]
impl FilterIndexStore for PgFilterIndexStore {
    #[instrument(skip(self, entries), fields(entries = entries.len()))]
    async fn publish(
        &self,
        digest: &str,
        entries: &[FilterIndexEntry],
    ) -> VariationResult<PublishOutcome> {
        let mut tx = self.db.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .persistent(false)
            .bind(PUBLISH_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let live = sqlx::query("SELECT version, digest FROM variation_filter_index_state WHERE id = 1")
            .persistent(false)
            .fetch_optional(&mut *tx)
            .await?;
        if let Some(r) = &live {
            let live_digest: String = r.try_get("digest")?;
            if live_digest == digest {
                let version: i64 = r.try_get("version")?;
                tx.commit().await?;
                return Ok(PublishOutcome::Unchanged { version });
            }
        }

        sqlx::query("DELETE FROM variation_filter_index")
            .persistent(false)
            .execute(&mut *tx)
            .await?;

        for (chunk_no, chunk) in entries.chunks(INSERT_CHUNK).enumerate() {
            let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(format!(
                "INSERT INTO variation_filter_index (position, {ENTRY_COLUMNS}) "
            ));
            let base = chunk_no * INSERT_CHUNK;
            qb.push_values(chunk.iter().enumerate(), |mut b, (i, e)| {
                let kind = match e.scope {
                    CombinationScope::Game { .. } => "game",
                    CombinationScope::Set { .. } => "set",
                };
                b.push_bind((base + i) as i64)
                    .push_bind(kind)
                    .push_bind(e.scope.game_id())
                    .push_bind(e.scope.set_id());
                for dim in Dimension::ALL {
                    b.push_bind(e.key.get(dim).map(str::to_owned));
                }
                b.push_bind(e.card_count as i64)
                    .push_bind(e.display_text.clone())
                    .push_bind(e.override_id);
            });
            qb.build().persistent(false).execute(&mut *tx).await?;
        }

        let version: i64 = sqlx::query_scalar(
            "INSERT INTO variation_filter_index_state (id, version, digest, entry_count, published_at)
             VALUES (1, 1, $1, $2, now())
             ON CONFLICT (id) DO UPDATE
             SET version = variation_filter_index_state.version + 1,
                 digest = EXCLUDED.digest,
                 entry_count = EXCLUDED.entry_count,
                 published_at = EXCLUDED.published_at
             RETURNING version",
        )
        .persistent(false)
        .bind(digest)
        .bind(entries.len() as i64)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        info!(version, entries = entries.len(), "filter index published");
        Ok(PublishOutcome::Published { version })
    }

    async fn current(&self) -> VariationResult<Option<PublishedIndex>> {
        let mut tx = self.db.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .persistent(false)
            .execute(&mut *tx)
            .await?;
        let Some(state) =
            sqlx::query("SELECT version, digest FROM variation_filter_index_state WHERE id = 1")
                .persistent(false)
                .fetch_optional(&mut *tx)
                .await?
        else {
            tx.commit().await?;
            return Ok(None);
        };
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM variation_filter_index ORDER BY position"
        ))
        .persistent(false)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Some(PublishedIndex {
            version: state.try_get("version")?,
            digest: state.try_get("digest")?,
            entries: rows.iter().map(entry_from_row).collect::<VariationResult<_>>()?,
        }))
    }

    async fn query(&self, predicate: &Predicate) -> VariationResult<Vec<FilterIndexEntry>> {
        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT {ENTRY_COLUMNS} FROM variation_filter_index"));
        predicate.push_where(&mut qb);
        qb.push(" ORDER BY position");
        let rows = qb.build().persistent(false).fetch_all(&self.db.pool).await?;
        rows.iter().map(entry_from_row).collect()
    }
}
