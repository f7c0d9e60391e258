//! Engine handle bundling the storage seams.
//!
//! Every operation reaches storage through the handles passed to
//! [`VariationEngine::new`]; there is no ambient connection state.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::database_ops::catalog::{CatalogReader, CatalogScope, GameId, PgCatalog, SetId};
use crate::database_ops::consistency;
use crate::database_ops::db::Db;
use crate::database_ops::discovery::{self, group_combinations, CombinationScope, VariationCombination};
use crate::database_ops::filter_index::{
    build_projection, projection_digest, FilterIndexEntry, FilterIndexStore, PgFilterIndexStore,
    PublishOutcome, PublishedIndex,
};
use crate::database_ops::metadata::{
    aggregate_game, aggregate_set, GameVariationMetadata, MetadataStore, PgMetadataStore,
    SetVariationMetadata,
};
use crate::database_ops::overrides::{
    DisplayOverride, NewOverride, OverrideScope, OverrideStore, PgOverrideStore,
};
use crate::database_ops::predicate::Predicate;
use crate::database_ops::resolver::Resolver;
use crate::error::{VariationError, VariationResult};
use crate::normalization::variation::CanonicalVariationKey;

#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub outcome: PublishOutcome,
    pub digest: String,
    pub entries: usize,
    pub games: usize,
    pub sets: usize,
}

pub struct VariationEngine {
    catalog: Arc<dyn CatalogReader>,
    overrides: Arc<dyn OverrideStore>,
    metadata: Arc<dyn MetadataStore>,
    index: Arc<dyn FilterIndexStore>,
    // Single-writer gate for the publish step.
    refresh_gate: Mutex<()>,
}

impl VariationEngine {
    pub fn new(
        catalog: Arc<dyn CatalogReader>,
        overrides: Arc<dyn OverrideStore>,
        metadata: Arc<dyn MetadataStore>,
        index: Arc<dyn FilterIndexStore>,
    ) -> Self {
        Self {
            catalog,
            overrides,
            metadata,
            index,
            refresh_gate: Mutex::new(()),
        }
    }

    pub fn postgres(db: &Db) -> Self {
        Self::new(
            Arc::new(PgCatalog::new(db)),
            Arc::new(PgOverrideStore::new(db)),
            Arc::new(PgMetadataStore::new(db)),
            Arc::new(PgFilterIndexStore::new(db)),
        )
    }

    // ---- discovery ----

    pub async fn discover_for_set(&self, set_id: SetId) -> VariationResult<Vec<VariationCombination>> {
        discovery::discover_for_set(self.catalog.as_ref(), set_id).await
    }

    pub async fn discover_for_game(
        &self,
        game_id: GameId,
    ) -> VariationResult<Vec<VariationCombination>> {
        discovery::discover_for_game(self.catalog.as_ref(), game_id).await
    }

    // ---- overrides ----

    pub async fn upsert_override(&self, new: NewOverride) -> VariationResult<DisplayOverride> {
        self.overrides.upsert(new).await
    }

    pub async fn find_overrides(&self, scope: OverrideScope) -> VariationResult<Vec<DisplayOverride>> {
        self.overrides.find_all(scope).await
    }

    pub async fn update_override(
        &self,
        id: i64,
        display_text: &str,
        notes: Option<String>,
    ) -> VariationResult<DisplayOverride> {
        self.overrides.update(id, display_text, notes).await
    }

    pub async fn delete_override(&self, id: i64) -> VariationResult<()> {
        self.overrides.delete(id).await
    }

    /// Display text for `key` in `scope`; `None` tells the caller to apply its own default.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn resolve(
        &self,
        key: &CanonicalVariationKey,
        scope: OverrideScope,
    ) -> VariationResult<Option<String>> {
        let mut candidates = self.overrides.find_all(OverrideScope::Global).await?;
        if let OverrideScope::Game(_) = scope {
            candidates.extend(self.overrides.find_all(scope).await?);
        }
        let resolver = Resolver::new(candidates);
        Ok(resolver.display_text(key, scope).map(str::to_owned))
    }

    // ---- metadata ----

    /// Aggregate one set and store it, replacing any previous summary.
    #[instrument(skip(self))]
    pub async fn build_set_metadata(&self, set_id: SetId) -> VariationResult<SetVariationMetadata> {
        let snapshot = self.catalog.snapshot(CatalogScope::Set(set_id)).await?;
        let set = snapshot
            .set(set_id)
            .ok_or_else(|| VariationError::NotFound(format!("set {set_id}")))?;
        let combos = group_combinations(
            CombinationScope::Set {
                game_id: set.game_id,
                set_id,
            },
            snapshot.cards_in_set(set_id),
        );
        let meta = aggregate_set(set.game_id, set_id, &combos);
        self.metadata.replace_set(&meta).await?;
        Ok(meta)
    }

    /// Aggregate a game from one snapshot so the totals agree with the per-set
    /// summaries, then store it with a full replace. A game without sets
    /// yields zero totals.
    #[instrument(skip(self))]
    pub async fn build_game_metadata(&self, game_id: GameId) -> VariationResult<GameVariationMetadata> {
        let snapshot = self.catalog.snapshot(CatalogScope::Game(game_id)).await?;
        let set_metas: Vec<SetVariationMetadata> = snapshot
            .sets_in_game(game_id)
            .into_iter()
            .map(|set| {
                let combos = group_combinations(
                    CombinationScope::Set {
                        game_id,
                        set_id: set.id,
                    },
                    snapshot.cards_in_set(set.id),
                );
                aggregate_set(game_id, set.id, &combos)
            })
            .collect();
        let game_combos = group_combinations(
            CombinationScope::Game { game_id },
            snapshot.cards_in_game(game_id),
        );
        let meta = aggregate_game(game_id, &set_metas, &game_combos);
        self.metadata.replace_game(&meta).await?;
        Ok(meta)
    }

    pub async fn stored_set_metadata(&self, set_id: SetId) -> VariationResult<Option<SetVariationMetadata>> {
        self.metadata.load_set(set_id).await
    }

    pub async fn stored_game_metadata(
        &self,
        game_id: GameId,
    ) -> VariationResult<Option<GameVariationMetadata>> {
        self.metadata.load_game(game_id).await
    }

    // ---- filter index ----

    /// Rebuild and publish the filter index. Concurrent callers queue behind
    /// the running refresh; each publishes a projection of the data current
    /// at its own start.
    pub async fn refresh(&self) -> VariationResult<RefreshReport> {
        let _gate = self.refresh_gate.lock().await;
        self.refresh_locked().await
    }

    /// Non-overlap variant for periodic callers: `None` when a refresh is already running.
    pub async fn try_refresh(&self) -> VariationResult<Option<RefreshReport>> {
        let Ok(_gate) = self.refresh_gate.try_lock() else {
            info!("filter index refresh already running; skipping");
            return Ok(None);
        };
        self.refresh_locked().await.map(Some)
    }

    #[instrument(skip(self))]
    async fn refresh_locked(&self) -> VariationResult<RefreshReport> {
        let (snapshot, overrides) = futures::try_join!(
            self.catalog.snapshot(CatalogScope::All),
            self.overrides.find_every()
        )
        .inspect_err(|e| warn!(error = %e, "filter index generation failed; live index kept"))?;

        let resolver = Resolver::new(overrides);
        if resolver.is_empty() {
            debug!("no display overrides; every entry keeps default rendering");
        }
        let entries = build_projection(&snapshot, &resolver);
        let digest = projection_digest(&entries)?;
        let outcome = self.index.publish(&digest, &entries).await?;
        let report = RefreshReport {
            outcome,
            digest,
            entries: entries.len(),
            games: snapshot.game_ids().len(),
            sets: snapshot.sets.len(),
        };
        info!(
            version = report.outcome.version(),
            entries = report.entries,
            overrides = resolver.len(),
            games = report.games,
            sets = report.sets,
            "filter index refresh finished"
        );
        Ok(report)
    }

    pub async fn published_index(&self) -> VariationResult<Option<PublishedIndex>> {
        self.index.current().await
    }

    pub async fn filter_entries(&self, predicate: &Predicate) -> VariationResult<Vec<FilterIndexEntry>> {
        self.index.query(predicate).await
    }

    // ---- consistency ----

    pub async fn find_orphaned_overrides(&self) -> VariationResult<Vec<DisplayOverride>> {
        consistency::find_orphaned_overrides(self.catalog.as_ref(), self.overrides.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::memory::{
        InMemoryCatalog, InMemoryFilterIndex, InMemoryMetadataStore, InMemoryOverrideStore,
    };
    use crate::database_ops::predicate::Field;
    use crate::normalization::variation::{
        normalize, Dimension, RawPrintingAttributes, VariationMatcher,
    };

    struct Fixture {
        catalog: Arc<InMemoryCatalog>,
        index: Arc<InMemoryFilterIndex>,
        engine: Arc<VariationEngine>,
    }

    fn fixture() -> Fixture {
        let catalog = Arc::new(InMemoryCatalog::new());
        let index = Arc::new(InMemoryFilterIndex::new());
        let engine = Arc::new(VariationEngine::new(
            catalog.clone(),
            Arc::new(InMemoryOverrideStore::new()),
            Arc::new(InMemoryMetadataStore::new()),
            index.clone(),
        ));
        catalog.add_set(10, 1, "Foundations");
        catalog.add_set(11, 1, "Duskmourn");
        catalog.add_set(12, 1, "Empty promo set");
        catalog.add_set(20, 2, "Black Bolt");
        catalog.add_cards(10, RawPrintingAttributes::treatment("borderless_inverted "), 3);
        catalog.add_cards(10, RawPrintingAttributes::treatment("BORDERLESS_INVERTED"), 2);
        catalog.add_cards(
            11,
            RawPrintingAttributes::treatment("showcase").with(Dimension::Finish, "Foil"),
            4,
        );
        catalog.add_cards(11, RawPrintingAttributes::default(), 6);
        catalog.add_cards(20, RawPrintingAttributes::from_justtcg_printing("Reverse Holofoil"), 7);
        Fixture {
            catalog,
            index,
            engine,
        }
    }

    #[tokio::test]
    async fn refresh_twice_publishes_identical_projection() {
        let fx = fixture();
        fx.engine
            .upsert_override(NewOverride::new(
                OverrideScope::Global,
                VariationMatcher::any().with(Dimension::Treatment, "BORDERLESS_INVERTED"),
                "Borderless (Inverted)",
            ))
            .await
            .unwrap();

        let first = fx.engine.refresh().await.unwrap();
        let published_first = fx.engine.published_index().await.unwrap().unwrap();
        let second = fx.engine.refresh().await.unwrap();
        let published_second = fx.engine.published_index().await.unwrap().unwrap();

        assert_eq!(first.outcome, PublishOutcome::Published { version: 1 });
        assert_eq!(second.outcome, PublishOutcome::Unchanged { version: 1 });
        assert_eq!(published_first, published_second);
        assert_eq!(
            serde_json::to_vec(&published_first.entries).unwrap(),
            serde_json::to_vec(&published_second.entries).unwrap()
        );
        assert_eq!(fx.index.rewrites(), 1);
    }

    #[tokio::test]
    async fn refresh_labels_entries_from_overrides() {
        let fx = fixture();
        fx.engine
            .upsert_override(NewOverride::new(
                OverrideScope::Game(1),
                VariationMatcher::any().with(Dimension::Treatment, "borderless_inverted"),
                "Borderless Inverted",
            ))
            .await
            .unwrap();
        fx.engine.refresh().await.unwrap();

        let set_entries = fx.engine.filter_entries(&Predicate::set(10)).await.unwrap();
        assert_eq!(set_entries.len(), 1);
        assert_eq!(set_entries[0].card_count, 5);
        assert_eq!(set_entries[0].display_text.as_deref(), Some("Borderless Inverted"));

        let game2 = fx
            .engine
            .filter_entries(&Predicate::game(2).is_null(Field::SetId))
            .await
            .unwrap();
        assert_eq!(game2.len(), 1);
        assert_eq!(game2[0].display_text, None);
        assert_eq!(game2[0].key.get(Dimension::Finish), Some("reverse holofoil"));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_projection() {
        let fx = fixture();
        fx.engine.refresh().await.unwrap();
        let before = fx.engine.published_index().await.unwrap();

        fx.catalog.add_cards(10, RawPrintingAttributes::treatment("GALAXY"), 1);
        fx.catalog.set_unavailable(true);
        let err = fx.engine.refresh().await.unwrap_err();
        assert!(matches!(err, VariationError::DataUnavailable(_)));

        assert_eq!(fx.engine.published_index().await.unwrap(), before);
        assert_eq!(fx.index.rewrites(), 1);

        fx.catalog.set_unavailable(false);
        let report = fx.engine.refresh().await.unwrap();
        assert_eq!(report.outcome, PublishOutcome::Published { version: 2 });
    }

    #[tokio::test]
    async fn refresh_picks_up_catalog_changes() {
        let fx = fixture();
        fx.engine.refresh().await.unwrap();
        fx.catalog.clear_cards(11);
        let report = fx.engine.refresh().await.unwrap();
        assert_eq!(report.outcome, PublishOutcome::Published { version: 2 });
        assert!(fx
            .engine
            .filter_entries(&Predicate::set(11))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn concurrent_refreshes_serialize() {
        let fx = fixture();
        let mut tasks = Vec::new();
        for _ in 0..6 {
            let engine = fx.engine.clone();
            tasks.push(tokio::spawn(async move { engine.refresh().await }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        // Unchanged data: only the first completed refresh rewrites the index.
        assert_eq!(fx.index.rewrites(), 1);
    }

    #[tokio::test]
    async fn try_refresh_skips_while_running() {
        let fx = fixture();
        let gate = fx.engine.refresh_gate.lock().await;
        assert!(fx.engine.try_refresh().await.unwrap().is_none());
        drop(gate);
        assert!(fx.engine.try_refresh().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn resolve_ranks_specificity_before_scope() {
        let fx = fixture();
        let key = normalize(
            &RawPrintingAttributes::treatment("SHOWCASE").with(Dimension::Finish, "foil"),
        );
        assert_eq!(fx.engine.resolve(&key, OverrideScope::Game(1)).await.unwrap(), None);

        fx.engine
            .upsert_override(NewOverride::new(
                OverrideScope::Global,
                VariationMatcher::for_key(&key),
                "Showcase Foil",
            ))
            .await
            .unwrap();
        fx.engine
            .upsert_override(NewOverride::new(
                OverrideScope::Game(2),
                VariationMatcher::any().with(Dimension::Treatment, "SHOWCASE"),
                "Showcase (game 2)",
            ))
            .await
            .unwrap();

        // The coarser game rule never hides the more specific global rule.
        for game_id in [1, 2] {
            assert_eq!(
                fx.engine
                    .resolve(&key, OverrideScope::Game(game_id))
                    .await
                    .unwrap()
                    .as_deref(),
                Some("Showcase Foil")
            );
        }

        fx.engine
            .upsert_override(NewOverride::new(
                OverrideScope::Game(2),
                VariationMatcher::for_key(&key),
                "Showcase Foil (game 2)",
            ))
            .await
            .unwrap();
        assert_eq!(
            fx.engine.resolve(&key, OverrideScope::Game(2)).await.unwrap().as_deref(),
            Some("Showcase Foil (game 2)")
        );
        assert_eq!(
            fx.engine.resolve(&key, OverrideScope::Global).await.unwrap().as_deref(),
            Some("Showcase Foil")
        );
    }

    #[tokio::test]
    async fn game_totals_equal_sum_of_set_metadata() {
        let fx = fixture();
        let game = fx.engine.build_game_metadata(1).await.unwrap();
        let mut total_cards = 0;
        let mut total_sets = 0;
        for set_id in [10, 11, 12] {
            let meta = fx.engine.build_set_metadata(set_id).await.unwrap();
            total_cards += meta.total_cards;
            total_sets += 1;
        }
        assert_eq!(game.total_cards, total_cards);
        assert_eq!(game.total_sets, total_sets);
        assert_eq!(game.total_cards, 15);
        assert_eq!(game.values.treatments, vec!["BORDERLESS_INVERTED", "SHOWCASE"]);
    }

    #[tokio::test]
    async fn metadata_is_idempotent_and_fully_replaced() {
        let fx = fixture();
        let first = fx.engine.build_set_metadata(11).await.unwrap();
        let second = fx.engine.build_set_metadata(11).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.values.finishes, vec!["foil"]);

        fx.catalog.clear_cards(11);
        fx.catalog.add_cards(11, RawPrintingAttributes::treatment("etched"), 1);
        let rebuilt = fx.engine.build_set_metadata(11).await.unwrap();
        let stored = fx.engine.stored_set_metadata(11).await.unwrap().unwrap();
        assert_eq!(stored, rebuilt);
        // No stale finish survives the catalog change.
        assert!(stored.values.finishes.is_empty());
        assert_eq!(stored.values.treatments, vec!["ETCHED"]);
    }

    #[tokio::test]
    async fn empty_game_has_zero_totals() {
        let fx = fixture();
        let meta = fx.engine.build_game_metadata(99).await.unwrap();
        assert_eq!(meta.total_cards, 0);
        assert_eq!(meta.total_sets, 0);
        assert!(matches!(
            fx.engine.build_set_metadata(999).await,
            Err(VariationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn metadata_surfaces_catalog_failure() {
        let fx = fixture();
        fx.catalog.set_unavailable(true);
        assert!(matches!(
            fx.engine.build_game_metadata(1).await,
            Err(VariationError::DataUnavailable(_))
        ));
    }
}
