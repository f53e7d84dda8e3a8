// Economy ledger: every balance change is a cached-total update plus an
// appended transaction, written in the caller's transaction.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

use crate::db::ledger::{self as rows, NewTransaction};
use crate::db::teams;
use crate::error::DraftError;
use crate::model::{CardId, PickId, Season, SeasonId, Team, TeamId, TransactionKind};

/// Result of a single-team allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Allocation {
    pub team_id: TeamId,
    pub requested: i64,
    pub granted: i64,
    pub balance: i64,
}

/// Result of allocating to every team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationSummary {
    pub allocations: Vec<Allocation>,
    /// Teams left untouched because they were already at or above the cap.
    pub teams_skipped: usize,
}

/// Cached balance compared with the balance replayed from the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerAudit {
    pub team_id: TeamId,
    pub cached_balance: i64,
    pub replayed_balance: i64,
    pub transactions: usize,
}

impl LedgerAudit {
    pub fn is_consistent(&self) -> bool {
        self.cached_balance == self.replayed_balance
    }
}

/// Where a ledger entry points back to.
#[derive(Debug, Clone, Copy, Default)]
pub struct Link {
    pub season_id: Option<SeasonId>,
    pub card_id: Option<CardId>,
    pub pick_id: Option<PickId>,
}

fn load_team(conn: &Connection, team_id: TeamId) -> Result<Team, DraftError> {
    teams::get(conn, team_id)?.ok_or_else(|| DraftError::not_found("team", team_id))
}

fn record(
    conn: &Connection,
    team: &Team,
    kind: TransactionKind,
    amount: i64,
    link: Link,
    note: Option<String>,
    now: DateTime<Utc>,
) -> Result<(), DraftError> {
    teams::set_totals(conn, team.id, team.balance, team.total_earned, team.total_spent)?;
    rows::append(
        conn,
        &NewTransaction {
            team_id: team.id,
            season_id: link.season_id,
            kind,
            amount,
            balance_after: team.balance,
            card_id: link.card_id,
            pick_id: link.pick_id,
            note,
            created_at: now,
        },
    )?;
    Ok(())
}

/// Allocate cubucks to one team, clamped so the balance never exceeds the
/// season cap.
pub fn allocate(
    conn: &Connection,
    season: &Season,
    team_id: TeamId,
    amount: i64,
    now: DateTime<Utc>,
) -> Result<Allocation, DraftError> {
    if amount <= 0 {
        return Err(DraftError::InvalidRequest(format!(
            "allocation must be positive, got {amount}"
        )));
    }
    let mut team = load_team(conn, team_id)?;
    let headroom = season.cubucks_cap - team.balance;
    if headroom <= 0 {
        return Err(DraftError::SeasonCapExceeded {
            team_id,
            cap: season.cubucks_cap,
        });
    }
    let granted = amount.min(headroom);
    team.balance += granted;
    team.total_earned += granted;
    let link = Link {
        season_id: Some(season.id),
        ..Link::default()
    };
    let note = (granted < amount).then(|| format!("clamped from {amount} by season cap"));
    record(conn, &team, TransactionKind::Allocation, granted, link, note, now)?;

    info!(
        "Allocated {} cubucks to team {} (requested {}, balance {})",
        granted, team_id, amount, team.balance
    );
    Ok(Allocation {
        team_id,
        requested: amount,
        granted,
        balance: team.balance,
    })
}

/// Allocate to every team, applying the cap per team.
pub fn allocate_all(
    conn: &Connection,
    season: &Season,
    amount: i64,
    now: DateTime<Utc>,
) -> Result<AllocationSummary, DraftError> {
    let mut summary = AllocationSummary {
        allocations: Vec::new(),
        teams_skipped: 0,
    };
    for team in teams::list(conn)? {
        match allocate(conn, season, team.id, amount, now) {
            Ok(allocation) => summary.allocations.push(allocation),
            Err(DraftError::SeasonCapExceeded { .. }) => summary.teams_skipped += 1,
            Err(e) => return Err(e),
        }
    }
    Ok(summary)
}

/// Debit a pick's cost. Fails without writing if the team cannot afford it.
pub fn debit_for_pick(
    conn: &Connection,
    team_id: TeamId,
    cost: i64,
    link: Link,
    now: DateTime<Utc>,
) -> Result<Team, DraftError> {
    let mut team = load_team(conn, team_id)?;
    if cost > team.balance {
        return Err(DraftError::InsufficientBalance {
            team_id,
            balance: team.balance,
            cost,
        });
    }
    team.balance -= cost;
    team.total_spent += cost;
    record(conn, &team, TransactionKind::DraftPick, -cost, link, None, now)?;
    Ok(team)
}

/// Credit back a refunded pick. `total_spent` never drops below zero.
pub fn refund_pick(
    conn: &Connection,
    team_id: TeamId,
    amount: i64,
    link: Link,
    now: DateTime<Utc>,
) -> Result<Team, DraftError> {
    let mut team = load_team(conn, team_id)?;
    team.balance += amount;
    team.total_spent = (team.total_spent - amount).max(0);
    record(conn, &team, TransactionKind::Refund, amount, link, None, now)?;
    Ok(team)
}

/// Manual correction by an administrator. May not take the balance below
/// zero.
pub fn adjust(
    conn: &Connection,
    team_id: TeamId,
    delta: i64,
    season_id: Option<SeasonId>,
    note: Option<String>,
    now: DateTime<Utc>,
) -> Result<Team, DraftError> {
    if delta == 0 {
        return Err(DraftError::InvalidRequest("adjustment of zero".into()));
    }
    let mut team = load_team(conn, team_id)?;
    if team.balance + delta < 0 {
        return Err(DraftError::InsufficientBalance {
            team_id,
            balance: team.balance,
            cost: -delta,
        });
    }
    team.balance += delta;
    let link = Link {
        season_id,
        ..Link::default()
    };
    record(conn, &team, TransactionKind::Adjustment, delta, link, note, now)?;
    Ok(team)
}

/// Re-derive a team's balance from its transactions.
pub fn audit(conn: &Connection, team_id: TeamId) -> Result<LedgerAudit, DraftError> {
    let team = load_team(conn, team_id)?;
    let log = rows::list_for_team(conn, team_id)?;
    let replayed_balance = log.iter().map(|t| t.amount).sum();
    Ok(LedgerAudit {
        team_id,
        cached_balance: team.balance,
        replayed_balance,
        transactions: log.len(),
    })
}
