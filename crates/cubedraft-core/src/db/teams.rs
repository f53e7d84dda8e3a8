// Team rows and their cached cubucks totals.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::model::{Team, TeamId};

fn from_row(row: &Row<'_>) -> rusqlite::Result<Team> {
    Ok(Team {
        id: row.get(0)?,
        name: row.get(1)?,
        balance: row.get(2)?,
        total_earned: row.get(3)?,
        total_spent: row.get(4)?,
    })
}

const COLUMNS: &str = "id, name, balance, total_earned, total_spent";

pub fn insert(conn: &Connection, name: &str) -> Result<TeamId> {
    conn.execute("INSERT INTO teams (name) VALUES (?1)", params![name])
        .with_context(|| format!("failed to insert team {name}"))?;
    Ok(conn.last_insert_rowid())
}

pub fn get(conn: &Connection, id: TeamId) -> Result<Option<Team>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM teams WHERE id = ?1"),
        params![id],
        from_row,
    )
    .optional()
    .with_context(|| format!("failed to load team {id}"))
}

pub fn list(conn: &Connection) -> Result<Vec<Team>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {COLUMNS} FROM teams ORDER BY id"))
        .context("failed to prepare team list query")?;
    let teams = stmt
        .query_map([], from_row)
        .context("failed to query teams")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to map team rows")?;
    Ok(teams)
}

/// Overwrite the cached totals. Callers are responsible for writing the
/// matching ledger entry in the same transaction.
pub fn set_totals(
    conn: &Connection,
    id: TeamId,
    balance: i64,
    total_earned: i64,
    total_spent: i64,
) -> Result<()> {
    let updated = conn
        .execute(
            "UPDATE teams SET balance = ?2, total_earned = ?3, total_spent = ?4 WHERE id = ?1",
            params![id, balance, total_earned, total_spent],
        )
        .with_context(|| format!("failed to update totals for team {id}"))?;
    anyhow::ensure!(updated == 1, "team {id} does not exist");
    Ok(())
}
