// Pick resolution shared by manual, auto and vote picks, plus its inverse.
//
// Callers run these inside one write transaction together with the clock
// advance, so a pick, its debit and its queue cleanup commit together or
// not at all.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::db::picks::{self, NewPick};
use crate::db::{cards, ledger as ledger_rows, queue};
use crate::error::DraftError;
use crate::ledger::{self, Link};
use crate::model::{CardId, DraftPick, DraftSession, PickSlot, PickSource, PoolCard, Team};

/// Claim `card_id` for the team in `slot`.
pub fn claim(
    conn: &Connection,
    session: &DraftSession,
    slot: &PickSlot,
    card_id: CardId,
    source: PickSource,
    now: DateTime<Utc>,
) -> Result<DraftPick, DraftError> {
    let card = available_card(conn, card_id)?;

    if !cards::set_drafted(conn, card.id, true)? {
        return Err(DraftError::CardAlreadyDrafted { card_id });
    }

    let pick = picks::insert(
        conn,
        &NewPick {
            session_id: session.id,
            team_id: slot.team_id,
            card_id: Some(card.id),
            round: slot.round,
            pick_number: slot.pick_number,
            source,
            cost: card.cost,
            created_at: now,
        },
    )?;

    let link = Link {
        season_id: Some(session.season_id),
        card_id: Some(card.id),
        pick_id: Some(pick.id),
    };
    let team = ledger::debit_for_pick(conn, slot.team_id, card.cost, link, now)?;
    let dequeued = queue::remove_card_everywhere(conn, card.id)?;

    info!(
        "Pick {} (round {}): team {} took '{}' for {} cubucks via {} (balance {}, removed from {} queues)",
        slot.pick_number,
        slot.round,
        slot.team_id,
        card.name,
        card.cost,
        source.as_str(),
        team.balance,
        dequeued
    );
    Ok(pick)
}

/// Record a forfeited slot: no card, no spend.
pub fn skip(
    conn: &Connection,
    session: &DraftSession,
    slot: &PickSlot,
    now: DateTime<Utc>,
) -> Result<DraftPick, DraftError> {
    let pick = picks::insert(
        conn,
        &NewPick {
            session_id: session.id,
            team_id: slot.team_id,
            card_id: None,
            round: slot.round,
            pick_number: slot.pick_number,
            source: PickSource::Auto,
            cost: 0,
            created_at: now,
        },
    )?;
    info!(
        "Pick {} (round {}): team {} had nothing affordable, pick skipped",
        slot.pick_number, slot.round, slot.team_id
    );
    Ok(pick)
}

/// Load a card and fail if it is gone.
pub fn available_card(conn: &Connection, card_id: CardId) -> Result<PoolCard, DraftError> {
    let card = cards::get(conn, card_id)?.ok_or_else(|| DraftError::not_found("card", card_id))?;
    if card.drafted {
        return Err(DraftError::CardAlreadyDrafted { card_id });
    }
    Ok(card)
}

/// Outcome of undoing a pick.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Refund {
    pub pick_id: i64,
    pub card_id: CardId,
    pub refund_amount: i64,
    pub balance: i64,
    pub total_spent: i64,
}

/// Undo a pick: credit what was spent, delete the pick and return the card
/// to the pool. The amount comes from the original ledger debit, or the
/// card's listed cost if that entry is gone.
pub fn undraft(
    conn: &Connection,
    pick: &DraftPick,
    season_id: Option<i64>,
    now: DateTime<Utc>,
) -> Result<(Refund, Team), DraftError> {
    let Some(card_id) = pick.card_id else {
        return Err(DraftError::InvalidRequest(format!(
            "pick {} was skipped and has nothing to refund",
            pick.id
        )));
    };
    let card = cards::get(conn, card_id)?.ok_or_else(|| DraftError::not_found("card", card_id))?;

    let refund_amount = match ledger_rows::pick_debit(conn, pick.id, pick.team_id, card_id)? {
        Some(debit) => -debit.amount,
        None => {
            warn!(
                "No draft_pick transaction for team {} card {}; refunding listed cost {}",
                pick.team_id, card_id, card.cost
            );
            card.cost
        }
    };

    picks::delete(conn, pick.id)?;
    cards::set_drafted(conn, card_id, false)?;
    let link = Link {
        season_id,
        card_id: Some(card_id),
        pick_id: Some(pick.id),
    };
    let team = ledger::refund_pick(conn, pick.team_id, refund_amount, link, now)?;

    info!(
        "Refunded pick {} ('{}') to team {}: {} cubucks (balance {})",
        pick.id, card.name, pick.team_id, refund_amount, team.balance
    );
    Ok((
        Refund {
            pick_id: pick.id,
            card_id,
            refund_amount,
            balance: team.balance,
            total_spent: team.total_spent,
        },
        team,
    ))
}
