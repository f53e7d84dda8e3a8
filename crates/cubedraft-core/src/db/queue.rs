// Stored (manual) queue entries. Algorithmic entries are never written.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

use crate::model::{CardId, TeamId};

/// A manual queue row as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub card_id: CardId,
    pub position: u32,
    pub pinned: bool,
}

/// A team's stored entries, pinned first, then by position.
pub fn list(conn: &Connection, team_id: TeamId) -> Result<Vec<StoredEntry>> {
    let mut stmt = conn
        .prepare(
            "SELECT card_id, position, pinned FROM queue_entries
             WHERE team_id = ?1 ORDER BY pinned DESC, position ASC, card_id ASC",
        )
        .context("failed to prepare queue query")?;
    let entries = stmt
        .query_map(params![team_id], |row| {
            Ok(StoredEntry {
                card_id: row.get(0)?,
                position: row.get(1)?,
                pinned: row.get(2)?,
            })
        })
        .with_context(|| format!("failed to query queue for team {team_id}"))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to map queue rows")?;
    Ok(entries)
}

/// Replace a team's stored entries wholesale. Positions are renumbered from
/// zero in the given order.
pub fn replace(conn: &Connection, team_id: TeamId, entries: &[(CardId, bool)]) -> Result<()> {
    conn.execute("DELETE FROM queue_entries WHERE team_id = ?1", params![team_id])
        .with_context(|| format!("failed to clear queue for team {team_id}"))?;
    let mut stmt = conn
        .prepare(
            "INSERT INTO queue_entries (team_id, card_id, position, pinned)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .context("failed to prepare queue insert")?;
    for (position, (card_id, pinned)) in entries.iter().enumerate() {
        stmt.execute(params![team_id, card_id, position as u32, pinned])
            .with_context(|| format!("failed to queue card {card_id} for team {team_id}"))?;
    }
    Ok(())
}

/// Remove a card from every team's queue. Returns the number of rows removed.
pub fn remove_card_everywhere(conn: &Connection, card_id: CardId) -> Result<usize> {
    conn.execute("DELETE FROM queue_entries WHERE card_id = ?1", params![card_id])
        .with_context(|| format!("failed to remove card {card_id} from queues"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{add_card, add_team, test_db};

    #[test]
    fn replace_renumbers_and_pinned_sort_first() {
        let db = test_db();
        let team = add_team(&db, "Simic Sprouts", 0);
        let a = add_card(&db, "A", 1, 1.0);
        let b = add_card(&db, "B", 1, 1.0);
        let c = add_card(&db, "C", 1, 1.0);
        db.write(|tx| replace(tx, team, &[(a, false), (b, false), (c, true)]))
            .unwrap();

        let entries = db.read(|conn| list(conn, team)).unwrap();
        let ids: Vec<CardId> = entries.iter().map(|e| e.card_id).collect();
        assert_eq!(ids, vec![c, a, b]);
        assert_eq!(entries[0].position, 2);
        assert!(entries[0].pinned);
    }

    #[test]
    fn remove_card_everywhere_touches_all_teams() {
        let db = test_db();
        let t1 = add_team(&db, "One", 0);
        let t2 = add_team(&db, "Two", 0);
        let card = add_card(&db, "Shared", 1, 1.0);
        let other = add_card(&db, "Other", 1, 1.0);
        db.write(|tx| replace(tx, t1, &[(card, false), (other, false)])).unwrap();
        db.write(|tx| replace(tx, t2, &[(card, true)])).unwrap();

        let removed = db.write(|tx| remove_card_everywhere(tx, card)).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(db.read(|conn| list(conn, t1)).unwrap().len(), 1);
        assert!(db.read(|conn| list(conn, t2)).unwrap().is_empty());
    }

    #[test]
    fn duplicate_cards_in_one_queue_are_rejected() {
        let db = test_db();
        let team = add_team(&db, "Dupes", 0);
        let a = add_card(&db, "A", 1, 1.0);
        assert!(db.write(|tx| replace(tx, team, &[(a, false), (a, true)])).is_err());
    }
}
