// Effective team queue: stored manual entries followed by the global
// ranking, merged at read time and never persisted.

use std::collections::{HashMap, HashSet};

use crate::db::queue::StoredEntry;
use crate::model::{CardId, PoolCard, QueueEntry, QueueSource, RankedCard, TeamId};

/// Merge a team's stored entries with the ranking.
///
/// Stored entries keep their stored order (pinned first, then position).
/// Ranked cards follow, minus anything already queued or drafted. Costs and
/// drafted state come from `pool`, which is read in the same transaction as
/// the decision that uses the result; the ranking may be stale.
/// `position` on the result is the index in the merged queue.
pub fn effective_queue(
    team_id: TeamId,
    stored: &[StoredEntry],
    ranking: &[RankedCard],
    pool: &HashMap<CardId, PoolCard>,
) -> Vec<QueueEntry> {
    let mut queued: HashSet<CardId> = HashSet::with_capacity(stored.len());
    let mut merged = Vec::with_capacity(stored.len() + ranking.len());

    let available = |card_id: CardId| pool.get(&card_id).filter(|c| !c.drafted);

    for entry in stored {
        let Some(card) = available(entry.card_id) else {
            continue;
        };
        if !queued.insert(entry.card_id) {
            continue;
        }
        merged.push(QueueEntry {
            team_id,
            card_id: entry.card_id,
            position: merged.len() as u32,
            pinned: entry.pinned,
            source: QueueSource::Manual,
            cost: card.cost,
        });
    }

    for ranked in ranking {
        if queued.contains(&ranked.card_id) {
            continue;
        }
        let Some(card) = available(ranked.card_id) else {
            continue;
        };
        queued.insert(ranked.card_id);
        merged.push(QueueEntry {
            team_id,
            card_id: ranked.card_id,
            position: merged.len() as u32,
            pinned: false,
            source: QueueSource::Algorithmic,
            cost: card.cost,
        });
    }

    merged
}

/// The first entry the team can afford right now.
pub fn first_affordable(queue: &[QueueEntry], balance: i64) -> Option<&QueueEntry> {
    queue.iter().find(|e| e.cost <= balance)
}
