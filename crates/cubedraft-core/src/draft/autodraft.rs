// Auto-draft selection for a team whose pick window lapsed.

use std::collections::HashMap;

use serde::Serialize;

use super::queue::first_affordable;
use crate::model::{CardId, PoolCard, QueueEntry, RankedCard};

/// What the timer should do with an expired pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AutoSelection {
    /// Claim this card.
    Card {
        card_id: CardId,
        cost: i64,
        from_queue: bool,
    },
    /// Nothing affordable is left; forfeit the slot.
    Skip,
}

/// Pick a card for `balance` from the team's effective queue, falling back
/// to the full ranking. Deterministic for a given snapshot.
pub fn select(
    queue: &[QueueEntry],
    ranking: &[RankedCard],
    pool: &HashMap<CardId, PoolCard>,
    balance: i64,
) -> AutoSelection {
    if let Some(entry) = first_affordable(queue, balance) {
        return AutoSelection::Card {
            card_id: entry.card_id,
            cost: entry.cost,
            from_queue: true,
        };
    }

    let fallback = ranking
        .iter()
        .filter_map(|r| pool.get(&r.card_id))
        .find(|card| !card.drafted && card.cost <= balance);
    match fallback {
        Some(card) => AutoSelection::Card {
            card_id: card.id,
            cost: card.cost,
            from_queue: false,
        },
        None => AutoSelection::Skip,
    }
}
