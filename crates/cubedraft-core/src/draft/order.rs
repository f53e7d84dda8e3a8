// Snake draft order: odd rounds run in seat order, even rounds in reverse.

use std::collections::HashSet;

use crate::error::DraftError;
use crate::model::{PickSlot, TeamId};

/// Most pick slots a single session may hold.
pub const MAX_TOTAL_PICKS: u32 = 100_000;

/// Check a seat order and round count, returning the number of pick slots.
pub fn total_picks(teams: &[TeamId], rounds: u32) -> Result<u32, DraftError> {
    if teams.is_empty() {
        return Err(DraftError::InvalidConfiguration(
            "draft order needs at least one team".into(),
        ));
    }
    if rounds < 1 {
        return Err(DraftError::InvalidConfiguration(
            "draft needs at least one round".into(),
        ));
    }
    let mut seen = HashSet::with_capacity(teams.len());
    if let Some(dup) = teams.iter().find(|t| !seen.insert(**t)) {
        return Err(DraftError::InvalidConfiguration(format!(
            "team {dup} appears more than once in the draft order"
        )));
    }
    u32::try_from(teams.len())
        .ok()
        .and_then(|n| n.checked_mul(rounds))
        .filter(|total| *total <= MAX_TOTAL_PICKS)
        .ok_or_else(|| {
            DraftError::InvalidConfiguration(format!(
                "{} teams x {rounds} rounds exceeds {MAX_TOTAL_PICKS} picks",
                teams.len()
            ))
        })
}

/// The slot at zero-based `index` of the snake order. The caller bounds
/// `index` by `total_picks`.
pub fn slot_at(teams: &[TeamId], index: u32) -> Option<PickSlot> {
    let n = u32::try_from(teams.len()).ok().filter(|n| *n > 0)?;
    let round = index / n + 1;
    let offset = index % n;
    let seat = if round % 2 == 1 { offset } else { n - 1 - offset };
    Some(PickSlot {
        pick_number: index.checked_add(1)?,
        round,
        team_id: teams[seat as usize],
    })
}

/// Expand a seat order into `rounds * teams.len()` pick slots.
pub fn snake_order(teams: &[TeamId], rounds: u32) -> Result<Vec<PickSlot>, DraftError> {
    let total = total_picks(teams, rounds)?;
    Ok((0..total).filter_map(|i| slot_at(teams, i)).collect())
}
