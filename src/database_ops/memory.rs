//! In-memory backends for every storage seam.
//!
//! Used as injected fixtures in tests and for dry runs without a database.
//! Each backend guards its whole state with one lock, so reads see a single
//! consistent view and check-then-write sequences are atomic.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use crate::database_ops::catalog::{
    CardSet, CatalogCard, CatalogReader, CatalogScope, CatalogSnapshot, GameId, SetId,
};
use crate::database_ops::filter_index::{
    FilterIndexEntry, FilterIndexStore, PublishOutcome, PublishedIndex,
};
use crate::database_ops::metadata::{GameVariationMetadata, MetadataStore, SetVariationMetadata};
use crate::database_ops::overrides::{
    clean_notes, validated_text, DisplayOverride, NewOverride, OverrideScope, OverrideStore,
};
use crate::database_ops::predicate::Predicate;
use crate::error::{VariationError, VariationResult};
use crate::normalization::variation::RawPrintingAttributes;

fn poisoned<T>(_: PoisonError<T>) -> VariationError {
    VariationError::storage("in-memory store lock poisoned")
}

#[derive(Default)]
pub struct InMemoryCatalog {
    data: RwLock<CatalogSnapshot>,
    next_card_id: AtomicI64,
    unavailable: AtomicBool,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_set(&self, id: SetId, game_id: GameId, name: &str) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.sets.retain(|s| s.id != id);
        data.sets.push(CardSet {
            id,
            game_id,
            name: name.to_string(),
        });
    }

    /// Add `count` cards with identical raw attributes to an existing set.
    pub fn add_cards(&self, set_id: SetId, attributes: RawPrintingAttributes, count: usize) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let Some(game_id) = data.set(set_id).map(|s| s.game_id) else {
            return;
        };
        for _ in 0..count {
            let id = self.next_card_id.fetch_add(1, Ordering::SeqCst) + 1;
            data.cards.push(CatalogCard {
                id,
                set_id,
                game_id,
                attributes: attributes.clone(),
            });
        }
    }

    pub fn clear_cards(&self, set_id: SetId) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.cards.retain(|c| c.set_id != set_id);
    }

    /// Make every subsequent read fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl CatalogReader for InMemoryCatalog {
    async fn snapshot(&self, scope: CatalogScope) -> VariationResult<CatalogSnapshot> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(VariationError::unavailable("catalog marked unavailable"));
        }
        let data = self.data.read().map_err(|_| {
            VariationError::unavailable("catalog lock poisoned")
        })?;
        let predicate = scope.predicate();
        let mut sets: Vec<CardSet> = data
            .sets
            .iter()
            .filter(|s| match scope {
                CatalogScope::Set(id) => s.id == id,
                CatalogScope::Game(id) => s.game_id == id,
                CatalogScope::All => true,
            })
            .cloned()
            .collect();
        sets.sort_by_key(|s| s.id);
        let cards = data
            .cards
            .iter()
            .filter(|c| predicate.matches(*c))
            .cloned()
            .collect();
        Ok(CatalogSnapshot { sets, cards })
    }
}

#[derive(Default)]
struct OverrideRows {
    rows: Vec<DisplayOverride>,
    next_id: i64,
}

#[derive(Default)]
pub struct InMemoryOverrideStore {
    inner: Mutex<OverrideRows>,
}

impl InMemoryOverrideStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OverrideStore for InMemoryOverrideStore {
    async fn upsert(&self, new: NewOverride) -> VariationResult<DisplayOverride> {
        let new = new.validated()?;
        let mut inner = self.inner.lock().map_err(poisoned)?;
        if inner
            .rows
            .iter()
            .any(|o| o.scope == new.scope && o.matcher == new.matcher)
        {
            return Err(VariationError::Conflict {
                scope: new.scope,
                matcher: new.matcher,
            });
        }
        inner.next_id += 1;
        let created = DisplayOverride {
            id: inner.next_id,
            scope: new.scope,
            matcher: new.matcher,
            display_text: new.display_text,
            notes: new.notes,
            created_at: Utc::now(),
        };
        inner.rows.push(created.clone());
        Ok(created)
    }

    async fn find_all(&self, scope: OverrideScope) -> VariationResult<Vec<DisplayOverride>> {
        let inner = self.inner.lock().map_err(poisoned)?;
        Ok(inner.rows.iter().filter(|o| o.scope == scope).cloned().collect())
    }

    async fn find_every(&self) -> VariationResult<Vec<DisplayOverride>> {
        let inner = self.inner.lock().map_err(poisoned)?;
        Ok(inner.rows.clone())
    }

    async fn update(
        &self,
        id: i64,
        display_text: &str,
        notes: Option<String>,
    ) -> VariationResult<DisplayOverride> {
        let display_text = validated_text(display_text)?;
        let mut inner = self.inner.lock().map_err(poisoned)?;
        let row = inner
            .rows
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or_else(|| VariationError::NotFound(format!("override {id}")))?;
        row.display_text = display_text;
        row.notes = clean_notes(notes);
        Ok(row.clone())
    }

    async fn delete(&self, id: i64) -> VariationResult<()> {
        let mut inner = self.inner.lock().map_err(poisoned)?;
        let before = inner.rows.len();
        inner.rows.retain(|o| o.id != id);
        if inner.rows.len() == before {
            return Err(VariationError::NotFound(format!("override {id}")));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryMetadataStore {
    sets: Mutex<BTreeMap<SetId, SetVariationMetadata>>,
    games: Mutex<BTreeMap<GameId, GameVariationMetadata>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn replace_set(&self, meta: &SetVariationMetadata) -> VariationResult<()> {
        self.sets
            .lock()
            .map_err(poisoned)?
            .insert(meta.set_id, meta.clone());
        Ok(())
    }

    async fn replace_game(&self, meta: &GameVariationMetadata) -> VariationResult<()> {
        self.games
            .lock()
            .map_err(poisoned)?
            .insert(meta.game_id, meta.clone());
        Ok(())
    }

    async fn load_set(&self, set_id: SetId) -> VariationResult<Option<SetVariationMetadata>> {
        Ok(self.sets.lock().map_err(poisoned)?.get(&set_id).cloned())
    }

    async fn load_game(&self, game_id: GameId) -> VariationResult<Option<GameVariationMetadata>> {
        Ok(self.games.lock().map_err(poisoned)?.get(&game_id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryFilterIndex {
    live: RwLock<Option<PublishedIndex>>,
    rewrites: AtomicI64,
}

impl InMemoryFilterIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of physical rewrites performed (unchanged publishes excluded).
    pub fn rewrites(&self) -> i64 {
        self.rewrites.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FilterIndexStore for InMemoryFilterIndex {
    async fn publish(
        &self,
        digest: &str,
        entries: &[FilterIndexEntry],
    ) -> VariationResult<PublishOutcome> {
        let mut live = self.live.write().map_err(poisoned)?;
        let version = match live.as_ref() {
            Some(current) if current.digest == digest => {
                return Ok(PublishOutcome::Unchanged {
                    version: current.version,
                })
            }
            Some(current) => current.version + 1,
            None => 1,
        };
        *live = Some(PublishedIndex {
            version,
            digest: digest.to_string(),
            entries: entries.to_vec(),
        });
        self.rewrites.fetch_add(1, Ordering::SeqCst);
        Ok(PublishOutcome::Published { version })
    }

    async fn current(&self) -> VariationResult<Option<PublishedIndex>> {
        Ok(self.live.read().map_err(poisoned)?.clone())
    }

    async fn query(&self, predicate: &Predicate) -> VariationResult<Vec<FilterIndexEntry>> {
        let live = self.live.read().map_err(poisoned)?;
        Ok(live
            .as_ref()
            .map(|idx| {
                idx.entries
                    .iter()
                    .filter(|e| predicate.matches(*e))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
