//! Admin-authored display overrides.
//!
//! Table `variation_display_overrides` carries a
//! `UNIQUE NULLS NOT DISTINCT (game_id, treatment, finish, border_color, frame_effect, promo_type)`
//! constraint; inserts go through `ON CONFLICT DO NOTHING` so the uniqueness
//! check and the write are a single statement.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::{info, instrument};

use crate::database_ops::catalog::GameId;
use crate::database_ops::db::Db;
use crate::database_ops::predicate::{Field, Predicate};
use crate::error::{VariationError, VariationResult};
use crate::normalization::variation::{Dimension, MatchField, VariationMatcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "game_id", rename_all = "snake_case")]
pub enum OverrideScope {
    Global,
    Game(GameId),
}

impl OverrideScope {
    pub fn game_id(&self) -> Option<GameId> {
        match self {
            OverrideScope::Global => None,
            OverrideScope::Game(id) => Some(*id),
        }
    }

    pub fn from_column(game_id: Option<GameId>) -> Self {
        game_id.map_or(OverrideScope::Global, OverrideScope::Game)
    }

    fn predicate(&self) -> Predicate {
        match self {
            OverrideScope::Global => Predicate::new().is_null(Field::GameId),
            OverrideScope::Game(id) => Predicate::game(*id),
        }
    }
}

impl fmt::Display for OverrideScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverrideScope::Global => f.write_str("global"),
            OverrideScope::Game(id) => write!(f, "game:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayOverride {
    pub id: i64,
    pub scope: OverrideScope,
    pub matcher: VariationMatcher,
    pub display_text: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Override as submitted by an administrator, before it has an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOverride {
    pub scope: OverrideScope,
    pub matcher: VariationMatcher,
    pub display_text: String,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewOverride {
    pub fn new(scope: OverrideScope, matcher: VariationMatcher, display_text: impl Into<String>) -> Self {
        Self {
            scope,
            matcher,
            display_text: display_text.into(),
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Canonicalize the matcher and trim text fields. Every store calls this before writing.
    pub fn validated(self) -> VariationResult<Self> {
        let matcher = self.matcher.canonicalized()?;
        let display_text = validated_text(&self.display_text)?;
        Ok(Self {
            scope: self.scope,
            matcher,
            display_text,
            notes: clean_notes(self.notes),
        })
    }
}

pub(crate) fn validated_text(display_text: &str) -> VariationResult<String> {
    let trimmed = display_text.trim();
    if trimmed.is_empty() {
        return Err(VariationError::Invalid("display text is empty".into()));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn clean_notes(notes: Option<String>) -> Option<String> {
    notes
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
}

#[async_trait]
pub trait OverrideStore: Send + Sync {
    /// Create an override; `Conflict` when the scope already holds the same matcher.
    async fn upsert(&self, new: NewOverride) -> VariationResult<DisplayOverride>;
    /// Overrides of exactly one scope, ordered by id.
    async fn find_all(&self, scope: OverrideScope) -> VariationResult<Vec<DisplayOverride>>;
    /// Overrides of every scope, ordered by id.
    async fn find_every(&self) -> VariationResult<Vec<DisplayOverride>>;
    /// Replace display text and notes; the matcher and scope are immutable.
    async fn update(
        &self,
        id: i64,
        display_text: &str,
        notes: Option<String>,
    ) -> VariationResult<DisplayOverride>;
    async fn delete(&self, id: i64) -> VariationResult<()>;
}

pub struct PgOverrideStore {
    db: Db,
}

impl PgOverrideStore {
    pub fn new(db: &Db) -> Self {
        Self { db: db.clone() }
    }

    async fn select(&self, predicate: &Predicate) -> VariationResult<Vec<DisplayOverride>> {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(SELECT_COLUMNS);
        qb.push(" FROM variation_display_overrides");
        predicate.push_where(&mut qb);
        qb.push(" ORDER BY id");
        let rows = qb.build().persistent(false).fetch_all(&self.db.pool).await?;
        rows.iter().map(override_from_row).collect()
    }
}

const SELECT_COLUMNS: &str = "SELECT id, game_id, treatment, finish, border_color, frame_effect, promo_type, display_text, notes, created_at";

fn override_from_row(r: &PgRow) -> VariationResult<DisplayOverride> {
    let mut matcher = VariationMatcher::any();
    for dim in Dimension::ALL {
        // NULL decodes to a wildcard, never to "must be absent".
        if let MatchField::Specific(v) = MatchField::from_column(r.try_get(dim.column())?) {
            matcher = matcher.with(dim, v);
        }
    }
    Ok(DisplayOverride {
        id: r.try_get("id")?,
        scope: OverrideScope::from_column(r.try_get("game_id")?),
        matcher,
        display_text: r.try_get("display_text")?,
        notes: r.try_get("notes")?,
        created_at: r.try_get("created_at")?,
    })
}

#[async_trait]
impl OverrideStore for PgOverrideStore {
    #[instrument(skip(self, new), fields(scope = %new.scope))]
    async fn upsert(&self, new: NewOverride) -> VariationResult<DisplayOverride> {
        let new = new.validated()?;
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "INSERT INTO variation_display_overrides (game_id, treatment, finish, border_color, frame_effect, promo_type, display_text, notes) ",
        );
        qb.push_values([&new], |mut b, n| {
            b.push_bind(n.scope.game_id());
            for dim in Dimension::ALL {
                b.push_bind(n.matcher.field(dim).as_column().map(str::to_owned));
            }
            b.push_bind(n.display_text.clone())
                .push_bind(n.notes.clone());
        });
        qb.push(" ON CONFLICT DO NOTHING RETURNING id, created_at");
        let inserted = qb
            .build()
            .persistent(false)
            .fetch_optional(&self.db.pool)
            .await?;
        let Some(row) = inserted else {
            return Err(VariationError::Conflict {
                scope: new.scope,
                matcher: new.matcher,
            });
        };
        let created = DisplayOverride {
            id: row.try_get("id")?,
            scope: new.scope,
            matcher: new.matcher,
            display_text: new.display_text,
            notes: new.notes,
            created_at: row.try_get("created_at")?,
        };
        info!(id = created.id, matcher = %created.matcher, "display override created");
        Ok(created)
    }

    async fn find_all(&self, scope: OverrideScope) -> VariationResult<Vec<DisplayOverride>> {
        self.select(&scope.predicate()).await
    }

    async fn find_every(&self) -> VariationResult<Vec<DisplayOverride>> {
        self.select(&Predicate::new()).await
    }

    #[instrument(skip(self, display_text, notes))]
    async fn update(
        &self,
        id: i64,
        display_text: &str,
        notes: Option<String>,
    ) -> VariationResult<DisplayOverride> {
        let display_text = validated_text(display_text)?;
        let row = sqlx::query(
            "UPDATE variation_display_overrides
             SET display_text = $1, notes = $2, updated_at = now()
             WHERE id = $3
             RETURNING id, game_id, treatment, finish, border_color, frame_effect, promo_type, display_text, notes, created_at",
        )
        .persistent(false)
        .bind(display_text)
        .bind(clean_notes(notes))
        .bind(id)
        .fetch_optional(&self.db.pool)
        .await?;
        match row {
            Some(r) => override_from_row(&r),
            None => Err(VariationError::NotFound(format!("override {id}"))),
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: i64) -> VariationResult<()> {
        let res = sqlx::query("DELETE FROM variation_display_overrides WHERE id = $1")
            .persistent(false)
            .bind(id)
            .execute(&self.db.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(VariationError::NotFound(format!("override {id}")));
        }
        info!(id, "display override deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::memory::InMemoryOverrideStore;

    fn treatment_matcher(value: &str) -> VariationMatcher {
        VariationMatcher::any().with(Dimension::Treatment, value)
    }

    #[tokio::test]
    async fn duplicate_matcher_in_same_scope_conflicts() {
        let store = InMemoryOverrideStore::new();
        let first = store
            .upsert(NewOverride::new(
                OverrideScope::Global,
                treatment_matcher("BORDERLESS"),
                "Borderless",
            ))
            .await;
        assert!(first.is_ok());

        let second = store
            .upsert(NewOverride::new(
                OverrideScope::Global,
                treatment_matcher(" borderless "),
                "Borderless (again)",
            ))
            .await
            .unwrap_err();
        assert!(second.is_conflict());
        assert_eq!(store.find_all(OverrideScope::Global).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn same_matcher_in_other_scope_is_allowed() {
        let store = InMemoryOverrideStore::new();
        store
            .upsert(NewOverride::new(OverrideScope::Global, treatment_matcher("A"), "a"))
            .await
            .unwrap();
        store
            .upsert(NewOverride::new(OverrideScope::Game(1), treatment_matcher("A"), "a"))
            .await
            .unwrap();
        assert_eq!(store.find_all(OverrideScope::Game(1)).await.unwrap().len(), 1);
        assert_eq!(store.find_every().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn wildcard_positions_are_part_of_identity() {
        let store = InMemoryOverrideStore::new();
        store
            .upsert(NewOverride::new(OverrideScope::Global, treatment_matcher("A"), "a"))
            .await
            .unwrap();
        let narrower = treatment_matcher("A").with(Dimension::Finish, "foil");
        assert!(store
            .upsert(NewOverride::new(OverrideScope::Global, narrower, "a foil"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn concurrent_identical_submissions_only_one_wins() {
        let store = std::sync::Arc::new(InMemoryOverrideStore::new());
        let mut tasks = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .upsert(NewOverride::new(
                        OverrideScope::Game(3),
                        treatment_matcher("SHOWCASE"),
                        format!("Showcase #{i}"),
                    ))
                    .await
            }));
        }
        let mut ok = 0;
        let mut conflicts = 0;
        for t in tasks {
            match t.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) if e.is_conflict() => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(conflicts, 7);
    }

    #[tokio::test]
    async fn rejects_blank_display_text() {
        let store = InMemoryOverrideStore::new();
        let err = store
            .upsert(NewOverride::new(OverrideScope::Global, treatment_matcher("A"), "  "))
            .await
            .unwrap_err();
        assert!(matches!(err, VariationError::Invalid(_)));
    }

    #[tokio::test]
    async fn update_and_delete() {
        let store = InMemoryOverrideStore::new();
        let created = store
            .upsert(
                NewOverride::new(OverrideScope::Global, treatment_matcher("A"), "a")
                    .with_notes("first draft"),
            )
            .await
            .unwrap();
        let updated = store.update(created.id, " Alpha ", None).await.unwrap();
        assert_eq!(updated.display_text, "Alpha");
        assert_eq!(updated.notes, None);
        assert_eq!(updated.matcher, created.matcher);

        store.delete(created.id).await.unwrap();
        assert!(matches!(
            store.delete(created.id).await,
            Err(VariationError::NotFound(_))
        ));
        assert!(matches!(
            store.update(created.id, "x", None).await,
            Err(VariationError::NotFound(_))
        ));
    }

    #[test]
    fn scope_display() {
        assert_eq!(OverrideScope::Global.to_string(), "global");
        assert_eq!(OverrideScope::Game(4).to_string(), "game:4");
    }
}
