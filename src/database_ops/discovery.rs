use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::database_ops::catalog::{CatalogCard, CatalogReader, CatalogScope, GameId, SetId};
use crate::error::VariationResult;
use crate::normalization::variation::{normalize, CanonicalVariationKey};

/// Where a combination was counted: one set, or every set of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CombinationScope {
    Game { game_id: GameId },
    Set { game_id: GameId, set_id: SetId },
}

impl CombinationScope {
    pub fn game_id(&self) -> GameId {
        match self {
            CombinationScope::Game { game_id } | CombinationScope::Set { game_id, .. } => *game_id,
        }
    }

    pub fn set_id(&self) -> Option<SetId> {
        match self {
            CombinationScope::Game { .. } => None,
            CombinationScope::Set { set_id, .. } => Some(*set_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariationCombination {
    pub scope: CombinationScope,
    pub key: CanonicalVariationKey,
    pub count: u64,
}

/// Canonicalize and group cards. Ordered by count descending, then key ascending.
pub fn group_combinations<'a>(
    scope: CombinationScope,
    cards: impl IntoIterator<Item = &'a CatalogCard>,
) -> Vec<VariationCombination> {
    let mut counts: BTreeMap<CanonicalVariationKey, u64> = BTreeMap::new();
    for card in cards {
        *counts.entry(normalize(&card.attributes)).or_insert(0) += 1;
    }
    let mut out: Vec<VariationCombination> = counts
        .into_iter()
        .map(|(key, count)| VariationCombination { scope, key, count })
        .collect();
    // Stable sort keeps the BTreeMap key order for equal counts.
    out.sort_by(|a, b| b.count.cmp(&a.count));
    out
}

/// Combinations of one set. Unknown sets yield an empty list.
#[instrument(skip(catalog))]
pub async fn discover_for_set(
    catalog: &dyn CatalogReader,
    set_id: SetId,
) -> VariationResult<Vec<VariationCombination>> {
    let snapshot = catalog.snapshot(CatalogScope::Set(set_id)).await?;
    let Some(set) = snapshot.set(set_id) else {
        debug!(set_id, "set not present in catalog");
        return Ok(Vec::new());
    };
    let scope = CombinationScope::Set {
        game_id: set.game_id,
        set_id,
    };
    let combos = group_combinations(scope, snapshot.cards_in_set(set_id));
    debug!(set_id, combinations = combos.len(), "discovered set combinations");
    Ok(combos)
}

/// Combinations across every set of one game.
#[instrument(skip(catalog))]
pub async fn discover_for_game(
    catalog: &dyn CatalogReader,
    game_id: GameId,
) -> VariationResult<Vec<VariationCombination>> {
    let snapshot = catalog.snapshot(CatalogScope::Game(game_id)).await?;
    let combos = group_combinations(
        CombinationScope::Game { game_id },
        snapshot.cards_in_game(game_id),
    );
    debug!(game_id, combinations = combos.len(), "discovered game combinations");
    Ok(combos)
}
