// Draft session rows and the per-session draft order.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::parse_text;
use crate::model::{DraftOrderEntry, DraftSession, SeasonId, SessionId, SessionStatus, TeamId};

fn from_row(row: &Row<'_>) -> rusqlite::Result<DraftSession> {
    Ok(DraftSession {
        id: row.get(0)?,
        season_id: row.get(1)?,
        status: parse_text(row, 2, SessionStatus::parse)?,
        total_rounds: row.get(3)?,
        hours_per_pick: row.get(4)?,
        start_time: row.get(5)?,
        end_time: row.get(6)?,
        current_pick: row.get(7)?,
        pick_deadline: row.get(8)?,
        paused_remaining_ms: row.get(9)?,
        ranking_failures: row.get(10)?,
    })
}

const COLUMNS: &str = "id, season_id, status, total_rounds, hours_per_pick, start_time, end_time, \
                       current_pick, pick_deadline, paused_remaining_ms, ranking_failures";

/// Insert a new session in the `scheduled` state.
pub fn insert(
    conn: &Connection,
    season_id: SeasonId,
    total_rounds: u32,
    hours_per_pick: f64,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
) -> Result<SessionId> {
    conn.execute(
        "INSERT INTO draft_sessions (season_id, status, total_rounds, hours_per_pick, start_time, end_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            season_id,
            SessionStatus::Scheduled.as_str(),
            total_rounds,
            hours_per_pick,
            start_time,
            end_time,
        ],
    )
    .context("failed to insert draft session")?;
    Ok(conn.last_insert_rowid())
}

pub fn get(conn: &Connection, id: SessionId) -> Result<Option<DraftSession>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM draft_sessions WHERE id = ?1"),
        params![id],
        from_row,
    )
    .optional()
    .with_context(|| format!("failed to load draft session {id}"))
}

/// Sessions the timer still has to look at: scheduled or active.
pub fn list_pollable(conn: &Connection) -> Result<Vec<DraftSession>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM draft_sessions
             WHERE status IN ('scheduled', 'active') ORDER BY id"
        ))
        .context("failed to prepare pollable session query")?;
    let sessions = stmt
        .query_map([], from_row)
        .context("failed to query pollable sessions")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to map session rows")?;
    Ok(sessions)
}

/// The season's session that has not yet completed, if any.
pub fn open_for_season(conn: &Connection, season_id: SeasonId) -> Result<Option<DraftSession>> {
    conn.query_row(
        &format!(
            "SELECT {COLUMNS} FROM draft_sessions
             WHERE season_id = ?1 AND status != 'completed' ORDER BY id LIMIT 1"
        ),
        params![season_id],
        from_row,
    )
    .optional()
    .with_context(|| format!("failed to load open session for season {season_id}"))
}

/// Persist the clock fields of `session`, guarded by a compare-and-swap on
/// the pick pointer. Returns false when the stored pointer no longer equals
/// `expected_pick`, meaning another caller advanced the session first.
pub fn save(conn: &Connection, session: &DraftSession, expected_pick: u32) -> Result<bool> {
    let updated = conn
        .execute(
            "UPDATE draft_sessions
             SET status = ?3, current_pick = ?4, pick_deadline = ?5,
                 paused_remaining_ms = ?6, ranking_failures = ?7
             WHERE id = ?1 AND current_pick = ?2",
            params![
                session.id,
                expected_pick,
                session.status.as_str(),
                session.current_pick,
                session.pick_deadline,
                session.paused_remaining_ms,
                session.ranking_failures,
            ],
        )
        .with_context(|| format!("failed to save draft session {}", session.id))?;
    Ok(updated == 1)
}

/// Write the order entries for a new session; `team_ids[i]` takes seat `i`.
pub fn insert_order(conn: &Connection, session_id: SessionId, team_ids: &[TeamId]) -> Result<()> {
    let mut stmt = conn
        .prepare(
            "INSERT INTO draft_order (session_id, team_id, position, picks_made)
             VALUES (?1, ?2, ?3, 0)",
        )
        .context("failed to prepare draft order insert")?;
    for (position, team_id) in team_ids.iter().enumerate() {
        stmt.execute(params![session_id, team_id, position as u32])
            .with_context(|| format!("failed to insert draft order seat {position}"))?;
    }
    Ok(())
}

pub fn order(conn: &Connection, session_id: SessionId) -> Result<Vec<DraftOrderEntry>> {
    let mut stmt = conn
        .prepare(
            "SELECT session_id, team_id, position, picks_made FROM draft_order
             WHERE session_id = ?1 ORDER BY position",
        )
        .context("failed to prepare draft order query")?;
    let entries = stmt
        .query_map(params![session_id], |row| {
            Ok(DraftOrderEntry {
                session_id: row.get(0)?,
                team_id: row.get(1)?,
                position: row.get(2)?,
                picks_made: row.get(3)?,
            })
        })
        .context("failed to query draft order")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to map draft order rows")?;
    Ok(entries)
}

pub fn increment_picks_made(conn: &Connection, session_id: SessionId, team_id: TeamId) -> Result<()> {
    conn.execute(
        "UPDATE draft_order SET picks_made = picks_made + 1
         WHERE session_id = ?1 AND team_id = ?2",
        params![session_id, team_id],
    )
    .context("failed to increment picks_made")?;
    Ok(())
}
