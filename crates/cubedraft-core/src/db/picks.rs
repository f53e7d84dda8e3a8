// Draft pick rows. A row with a NULL card is a skipped (forfeited) slot.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::parse_text;
use crate::model::{CardId, DraftPick, PickId, PickSource, SessionId, TeamId};

fn from_row(row: &Row<'_>) -> rusqlite::Result<DraftPick> {
    Ok(DraftPick {
        id: row.get(0)?,
        session_id: row.get(1)?,
        team_id: row.get(2)?,
        card_id: row.get(3)?,
        round: row.get(4)?,
        pick_number: row.get(5)?,
        source: parse_text(row, 6, PickSource::parse)?,
        cost: row.get(7)?,
        created_at: row.get(8)?,
    })
}

const COLUMNS: &str =
    "id, session_id, team_id, card_id, round, pick_number, source, cost, created_at";

/// Fields of a pick that has not been written yet.
#[derive(Debug, Clone)]
pub struct NewPick {
    pub session_id: SessionId,
    pub team_id: TeamId,
    pub card_id: Option<CardId>,
    pub round: u32,
    pub pick_number: u32,
    pub source: PickSource,
    pub cost: i64,
    pub created_at: DateTime<Utc>,
}

pub fn insert(conn: &Connection, pick: &NewPick) -> Result<DraftPick> {
    conn.execute(
        "INSERT INTO draft_picks (session_id, team_id, card_id, round, pick_number, source, cost, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            pick.session_id,
            pick.team_id,
            pick.card_id,
            pick.round,
            pick.pick_number,
            pick.source.as_str(),
            pick.cost,
            pick.created_at,
        ],
    )
    .with_context(|| {
        format!(
            "failed to record pick {} of session {}",
            pick.pick_number, pick.session_id
        )
    })?;
    Ok(DraftPick {
        id: conn.last_insert_rowid(),
        session_id: pick.session_id,
        team_id: pick.team_id,
        card_id: pick.card_id,
        round: pick.round,
        pick_number: pick.pick_number,
        source: pick.source,
        cost: pick.cost,
        created_at: pick.created_at,
    })
}

pub fn get(conn: &Connection, id: PickId) -> Result<Option<DraftPick>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM draft_picks WHERE id = ?1"),
        params![id],
        from_row,
    )
    .optional()
    .with_context(|| format!("failed to load draft pick {id}"))
}

/// Picks of a session in pick order.
pub fn list_for_session(conn: &Connection, session_id: SessionId) -> Result<Vec<DraftPick>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM draft_picks WHERE session_id = ?1 ORDER BY pick_number"
        ))
        .context("failed to prepare pick list query")?;
    let picks = stmt
        .query_map(params![session_id], from_row)
        .context("failed to query draft picks")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to map draft pick rows")?;
    Ok(picks)
}

pub fn delete(conn: &Connection, id: PickId) -> Result<()> {
    conn.execute("DELETE FROM draft_picks WHERE id = ?1", params![id])
        .with_context(|| format!("failed to delete draft pick {id}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sessions;
    use crate::db::test_support::{add_card, add_season, add_team, test_db};
    use crate::model::SeasonPhase;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).unwrap()
    }

    fn setup() -> (crate::db::Database, SessionId, TeamId, CardId) {
        let db = test_db();
        let season = add_season(&db, SeasonPhase::Draft, 100);
        let team = add_team(&db, "Gruul Smash", 10);
        let card = add_card(&db, "Lightning Bolt", 2, 95.0);
        let session = db
            .write(|tx| sessions::insert(tx, season, 2, 1.0, now(), None))
            .unwrap();
        (db, session, team, card)
    }

    fn new_pick(session_id: SessionId, team_id: TeamId, card_id: Option<CardId>, n: u32) -> NewPick {
        NewPick {
            session_id,
            team_id,
            card_id,
            round: 1,
            pick_number: n,
            source: PickSource::Manual,
            cost: 2,
            created_at: now(),
        }
    }

    #[test]
    fn insert_and_list_round_trip() {
        let (db, session, team, card) = setup();
        let pick = db.write(|tx| insert(tx, &new_pick(session, team, Some(card), 1))).unwrap();
        let loaded = db.read(|conn| get(conn, pick.id)).unwrap().unwrap();
        assert_eq!(loaded, pick);
        assert_eq!(loaded.created_at, now());

        let all = db.read(|conn| list_for_session(conn, session)).unwrap();
        assert_eq!(all, vec![pick]);
    }

    #[test]
    fn same_card_cannot_be_picked_twice() {
        let (db, session, team, card) = setup();
        db.write(|tx| insert(tx, &new_pick(session, team, Some(card), 1))).unwrap();
        assert!(db
            .write(|tx| insert(tx, &new_pick(session, team, Some(card), 2)))
            .is_err());
    }

    #[test]
    fn same_pick_number_cannot_be_recorded_twice() {
        let (db, session, team, _card) = setup();
        db.write(|tx| insert(tx, &new_pick(session, team, None, 1))).unwrap();
        assert!(db.write(|tx| insert(tx, &new_pick(session, team, None, 1))).is_err());
    }

    #[test]
    fn multiple_skipped_picks_are_allowed() {
        let (db, session, team, _card) = setup();
        db.write(|tx| insert(tx, &new_pick(session, team, None, 1))).unwrap();
        let second = db.write(|tx| insert(tx, &new_pick(session, team, None, 2))).unwrap();
        assert!(second.is_skipped());
        db.write(|tx| delete(tx, second.id)).unwrap();
        assert_eq!(db.read(|conn| list_for_session(conn, session)).unwrap().len(), 1);
    }
}
