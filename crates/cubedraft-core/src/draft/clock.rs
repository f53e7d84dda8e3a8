// Draft session clock: the pick pointer, deadlines and status transitions.
//
// Every function here runs inside the caller's transaction. The pointer is
// only ever moved through `advance`, which persists with a compare-and-swap
// so a slot can be consumed exactly once.

use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

use super::order::{slot_at, total_picks};
use crate::db::sessions;
use crate::error::DraftError;
use crate::model::{clamp_to_end, DraftOrderEntry, DraftPick, DraftSession, PickSlot, SessionId, SessionStatus, TeamId};

/// A session together with its seat order. Slots are computed on demand.
#[derive(Debug, Clone)]
pub struct Board {
    pub session: DraftSession,
    pub order: Vec<DraftOrderEntry>,
    pub seats: Vec<TeamId>,
    pub total_picks: u32,
}

impl Board {
    fn slot(&self, index: u32) -> Option<PickSlot> {
        if index < self.total_picks {
            slot_at(&self.seats, index)
        } else {
            None
        }
    }

    /// The slot on the clock, if the draft still has one.
    pub fn current_slot(&self) -> Option<PickSlot> {
        self.slot(self.session.current_pick)
    }

    pub fn on_deck_slot(&self) -> Option<PickSlot> {
        self.slot(self.session.current_pick.checked_add(1)?)
    }

    /// The team on the clock while the session is active.
    pub fn on_the_clock(&self) -> Option<TeamId> {
        match self.session.status {
            SessionStatus::Active => self.current_slot().map(|s| s.team_id),
            _ => None,
        }
    }
}

pub fn load_board(conn: &Connection, session_id: SessionId) -> Result<Board, DraftError> {
    let session = sessions::get(conn, session_id)?
        .ok_or_else(|| DraftError::not_found("draft session", session_id))?;
    let order = sessions::order(conn, session_id)?;
    let seats: Vec<TeamId> = order.iter().map(|e| e.team_id).collect();
    let total_picks = total_picks(&seats, session.total_rounds)?;
    Ok(Board {
        session,
        order,
        seats,
        total_picks,
    })
}

fn persist(conn: &Connection, next: &DraftSession, expected_pick: u32) -> Result<(), DraftError> {
    if sessions::save(conn, next, expected_pick)? {
        Ok(())
    } else {
        Err(DraftError::InvalidRequest(format!(
            "draft session {} changed concurrently",
            next.id
        )))
    }
}

/// scheduled -> active, opening the first pick window at `now`.
pub fn activate(conn: &Connection, board: &Board, now: DateTime<Utc>) -> Result<DraftSession, DraftError> {
    let mut next = board.session.clone();
    next.status = SessionStatus::Active;
    next.pick_deadline = Some(next.deadline_from(now)?);
    next.ranking_failures = 0;
    persist(conn, &next, board.session.current_pick)?;
    info!(
        "Draft session {} is active; first deadline {:?}",
        next.id, next.pick_deadline
    );
    Ok(next)
}

/// Any state -> completed.
pub fn complete(conn: &Connection, board: &Board, reason: &str) -> Result<DraftSession, DraftError> {
    let mut next = board.session.clone();
    next.status = SessionStatus::Completed;
    next.pick_deadline = None;
    next.paused_remaining_ms = None;
    persist(conn, &next, board.session.current_pick)?;
    info!("Draft session {} completed: {}", next.id, reason);
    Ok(next)
}

/// Consume the current slot after its pick was recorded and open the next
/// pick window at `now`.
pub fn advance(
    conn: &Connection,
    board: &Board,
    slot: &PickSlot,
    now: DateTime<Utc>,
) -> Result<DraftSession, DraftError> {
    let mut next = board.session.clone();
    next.current_pick += 1;
    next.ranking_failures = 0;
    sessions::increment_picks_made(conn, next.id, slot.team_id)?;

    if next.current_pick >= board.total_picks {
        next.status = SessionStatus::Completed;
        next.pick_deadline = None;
        info!("Draft session {}: final pick made, draft complete", next.id);
    } else if next.end_time_passed(now) {
        next.status = SessionStatus::Completed;
        next.pick_deadline = None;
        info!("Draft session {}: hard end time reached", next.id);
    } else {
        next.pick_deadline = Some(next.deadline_from(now)?);
    }

    persist(conn, &next, board.session.current_pick)?;
    Ok(next)
}

/// Record one more consecutive ranking failure without moving the pointer.
pub fn note_ranking_failure(conn: &Connection, board: &Board) -> Result<DraftSession, DraftError> {
    let mut next = board.session.clone();
    next.ranking_failures += 1;
    persist(conn, &next, board.session.current_pick)?;
    Ok(next)
}

/// active -> paused, remembering the time left on the current pick.
pub fn pause(conn: &Connection, board: &Board, now: DateTime<Utc>) -> Result<DraftSession, DraftError> {
    let mut next = board.session.clone();
    let remaining = next
        .pick_deadline
        .map(|d| (d - now).num_milliseconds().max(0))
        .unwrap_or(0);
    next.status = SessionStatus::Paused;
    next.paused_remaining_ms = Some(remaining);
    next.pick_deadline = None;
    persist(conn, &next, board.session.current_pick)?;
    info!(
        "Draft session {} paused with {} ms left on the clock",
        next.id, remaining
    );
    Ok(next)
}

/// paused -> active, restoring the remaining pick time.
pub fn resume(conn: &Connection, board: &Board, now: DateTime<Utc>) -> Result<DraftSession, DraftError> {
    let mut next = board.session.clone();
    let remaining_ms = next.paused_remaining_ms.unwrap_or(0);
    let deadline = TimeDelta::try_milliseconds(remaining_ms)
        .and_then(|remaining| now.checked_add_signed(remaining))
        .ok_or_else(|| {
            DraftError::InvalidConfiguration(format!(
                "draft session {} cannot resume with {remaining_ms} ms remaining",
                next.id
            ))
        })?;
    next.status = SessionStatus::Active;
    next.pick_deadline = Some(clamp_to_end(deadline, next.end_time));
    next.paused_remaining_ms = None;
    persist(conn, &next, board.session.current_pick)?;
    info!(
        "Draft session {} resumed; deadline {:?}",
        next.id, next.pick_deadline
    );
    Ok(next)
}

// ---------------------------------------------------------------------------
// Status and timer reporting
// ---------------------------------------------------------------------------

/// Read model of a session for clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DraftStatus {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub on_the_clock: Option<TeamId>,
    pub on_deck: Option<TeamId>,
    pub current_round: Option<u32>,
    pub current_pick_number: Option<u32>,
    pub total_picks: u32,
    pub picks_made: u32,
    pub pick_deadline: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub draft_order: Vec<DraftOrderEntry>,
}

impl From<&Board> for DraftStatus {
    fn from(board: &Board) -> Self {
        let live = matches!(
            board.session.status,
            SessionStatus::Active | SessionStatus::Paused | SessionStatus::Scheduled
        );
        let current = board.current_slot().filter(|_| live);
        DraftStatus {
            session_id: board.session.id,
            status: board.session.status,
            on_the_clock: board.on_the_clock(),
            on_deck: board.on_deck_slot().filter(|_| live).map(|s| s.team_id),
            current_round: current.map(|s| s.round),
            current_pick_number: current.map(|s| s.pick_number),
            total_picks: board.total_picks,
            picks_made: board.session.current_pick,
            pick_deadline: board.session.pick_deadline,
            end_time: board.session.end_time,
            draft_order: board.order.clone(),
        }
    }
}

/// What a timer check did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TimerOutcome {
    /// Nothing to do: not active, deadline not reached, or another caller
    /// already acted.
    Idle,
    /// The session opened for picks.
    Activated,
    /// The expired pick was claimed automatically.
    AutoDrafted { pick: DraftPick },
    /// The expired pick was forfeited; nothing was affordable.
    Skipped { pick: DraftPick },
    /// The ranking source failed; the pick will be retried on the next poll.
    RetryLater { failures: u32 },
    /// The hard end time passed and the session was closed.
    Completed,
}
