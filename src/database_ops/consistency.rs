use std::collections::BTreeSet;

use tracing::{info, instrument};

use crate::database_ops::catalog::{CatalogReader, CatalogScope, CatalogSnapshot};
use crate::database_ops::overrides::{DisplayOverride, OverrideStore};
use crate::error::VariationResult;
use crate::normalization::variation::{normalize, CanonicalVariationKey};

/// Overrides that match none of the combinations currently present in any
/// game or set. Scope does not narrow the check.
pub fn orphaned_overrides(
    snapshot: &CatalogSnapshot,
    overrides: Vec<DisplayOverride>,
) -> Vec<DisplayOverride> {
    let keys: BTreeSet<CanonicalVariationKey> = snapshot
        .cards
        .iter()
        .map(|card| normalize(&card.attributes))
        .collect();
    overrides
        .into_iter()
        .filter(|o| !keys.iter().any(|key| o.matcher.matches(key)))
        .collect()
}

/// Reporting only: never mutates overrides or the published index.
#[instrument(skip(catalog, store))]
pub async fn find_orphaned_overrides(
    catalog: &dyn CatalogReader,
    store: &dyn OverrideStore,
) -> VariationResult<Vec<DisplayOverride>> {
    let (snapshot, overrides) =
        futures::try_join!(catalog.snapshot(CatalogScope::All), store.find_every())?;
    let total = overrides.len();
    let orphans = orphaned_overrides(&snapshot, overrides);
    info!(total, orphaned = orphans.len(), "override consistency check finished");
    Ok(orphans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::memory::{InMemoryCatalog, InMemoryOverrideStore};
    use crate::database_ops::overrides::{NewOverride, OverrideScope};
    use crate::normalization::variation::{Dimension, RawPrintingAttributes, VariationMatcher};

    fn treatment(value: &str) -> VariationMatcher {
        VariationMatcher::any().with(Dimension::Treatment, value)
    }

    #[tokio::test]
    async fn empty_catalog_orphans_every_override() {
        let catalog = InMemoryCatalog::new();
        let store = InMemoryOverrideStore::new();
        let created = store
            .upsert(NewOverride::new(OverrideScope::Global, treatment("SHOWCASE"), "Showcase"))
            .await
            .unwrap();

        let orphans = find_orphaned_overrides(&catalog, &store).await.unwrap();
        assert_eq!(orphans, vec![created]);
    }

    #[tokio::test]
    async fn matching_overrides_are_not_orphaned() {
        let catalog = InMemoryCatalog::new();
        catalog.add_set(10, 1, "A");
        catalog.add_set(20, 2, "B");
        catalog.add_cards(10, RawPrintingAttributes::treatment("showcase"), 1);
        catalog.add_cards(20, RawPrintingAttributes::treatment("borderless"), 1);

        let store = InMemoryOverrideStore::new();
        store
            .upsert(NewOverride::new(OverrideScope::Global, treatment("BORDERLESS"), "b"))
            .await
            .unwrap();
        store
            .upsert(NewOverride::new(OverrideScope::Game(1), treatment("SHOWCASE"), "s"))
            .await
            .unwrap();
        // Borderless exists only in game 2; a game 1 rule for it still matches a live combination.
        store
            .upsert(NewOverride::new(OverrideScope::Game(1), treatment("BORDERLESS"), "b1"))
            .await
            .unwrap();
        let stale = store
            .upsert(NewOverride::new(OverrideScope::Game(2), treatment("GALAXY"), "g"))
            .await
            .unwrap();
        let wildcard_foil = store
            .upsert(NewOverride::new(
                OverrideScope::Global,
                VariationMatcher::any().with(Dimension::Finish, "foil"),
                "Foil",
            ))
            .await
            .unwrap();

        let orphans = find_orphaned_overrides(&catalog, &store).await.unwrap();
        assert_eq!(orphans, vec![stale, wildcard_foil]);
    }

    #[tokio::test]
    async fn game_override_matching_another_game_is_kept() {
        let catalog = InMemoryCatalog::new();
        catalog.add_set(20, 2, "B");
        catalog.add_cards(20, RawPrintingAttributes::treatment("borderless"), 1);
        let store = InMemoryOverrideStore::new();
        store
            .upsert(NewOverride::new(OverrideScope::Game(1), treatment("BORDERLESS"), "b"))
            .await
            .unwrap();

        assert!(find_orphaned_overrides(&catalog, &store).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn check_does_not_mutate_overrides() {
        let catalog = InMemoryCatalog::new();
        let store = InMemoryOverrideStore::new();
        store
            .upsert(NewOverride::new(OverrideScope::Global, treatment("X"), "x"))
            .await
            .unwrap();
        find_orphaned_overrides(&catalog, &store).await.unwrap();
        assert_eq!(store.find_every().await.unwrap().len(), 1);
    }
}
