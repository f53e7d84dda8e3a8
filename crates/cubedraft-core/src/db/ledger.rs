// Append-only cubucks transaction log.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::parse_text;
use crate::model::{
    CardId, CubucksTransaction, PickId, SeasonId, TeamId, TransactionId, TransactionKind,
};

fn from_row(row: &Row<'_>) -> rusqlite::Result<CubucksTransaction> {
    Ok(CubucksTransaction {
        id: row.get(0)?,
        team_id: row.get(1)?,
        season_id: row.get(2)?,
        kind: parse_text(row, 3, TransactionKind::parse)?,
        amount: row.get(4)?,
        balance_after: row.get(5)?,
        card_id: row.get(6)?,
        pick_id: row.get(7)?,
        note: row.get(8)?,
        created_at: row.get(9)?,
    })
}

const COLUMNS: &str =
    "id, team_id, season_id, kind, amount, balance_after, card_id, pick_id, note, created_at";

/// Fields of a ledger row that has not been written yet.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub team_id: TeamId,
    pub season_id: Option<SeasonId>,
    pub kind: TransactionKind,
    pub amount: i64,
    pub balance_after: i64,
    pub card_id: Option<CardId>,
    pub pick_id: Option<PickId>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub fn append(conn: &Connection, txn: &NewTransaction) -> Result<TransactionId> {
    conn.execute(
        "INSERT INTO cubucks_transactions
            (team_id, season_id, kind, amount, balance_after, card_id, pick_id, note, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            txn.team_id,
            txn.season_id,
            txn.kind.as_str(),
            txn.amount,
            txn.balance_after,
            txn.card_id,
            txn.pick_id,
            txn.note,
            txn.created_at,
        ],
    )
    .with_context(|| format!("failed to append {} transaction", txn.kind.as_str()))?;
    Ok(conn.last_insert_rowid())
}

/// A team's ledger in the order it was written.
pub fn list_for_team(conn: &Connection, team_id: TeamId) -> Result<Vec<CubucksTransaction>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM cubucks_transactions WHERE team_id = ?1 ORDER BY id"
        ))
        .context("failed to prepare ledger query")?;
    let rows = stmt
        .query_map(params![team_id], from_row)
        .with_context(|| format!("failed to query ledger for team {team_id}"))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to map ledger rows")?;
    Ok(rows)
}

/// The `draft_pick` debit behind a pick. The row linked to `pick_id` wins;
/// failing that, the newest debit for the (team, card) pair that no refund
/// has already consumed.
pub fn pick_debit(
    conn: &Connection,
    pick_id: PickId,
    team_id: TeamId,
    card_id: CardId,
) -> Result<Option<CubucksTransaction>> {
    let linked = conn
        .query_row(
            &format!(
                "SELECT {COLUMNS} FROM cubucks_transactions
                 WHERE pick_id = ?1 AND kind = 'draft_pick'
                 ORDER BY id DESC LIMIT 1"
            ),
            params![pick_id],
            from_row,
        )
        .optional()
        .with_context(|| format!("failed to look up debit for pick {pick_id}"))?;
    if linked.is_some() {
        return Ok(linked);
    }

    conn.query_row(
        &format!(
            "SELECT {COLUMNS} FROM cubucks_transactions AS debit
             WHERE team_id = ?1 AND card_id = ?2 AND kind = 'draft_pick'
               AND NOT EXISTS (
                   SELECT 1 FROM cubucks_transactions AS refund
                   WHERE refund.kind = 'refund' AND refund.pick_id = debit.pick_id
               )
             ORDER BY id DESC LIMIT 1"
        ),
        params![team_id, card_id],
        from_row,
    )
    .optional()
    .context("failed to look up draft pick transaction")
}
