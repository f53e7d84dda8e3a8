// Pool card rows. The `drafted` flag mirrors the existence of a pick row
// referencing the card.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::parse_json;
use crate::model::{CardId, PoolCard};

fn from_row(row: &Row<'_>) -> rusqlite::Result<PoolCard> {
    Ok(PoolCard {
        id: row.get(0)?,
        name: row.get(1)?,
        cost: row.get(2)?,
        rank: row.get(3)?,
        colors: parse_json(row, 4)?,
        drafted: row.get(5)?,
    })
}

const COLUMNS: &str = "id, name, cost, rank, colors, drafted";

pub fn insert(
    conn: &Connection,
    name: &str,
    cost: i64,
    rank: f64,
    colors: &[String],
) -> Result<CardId> {
    let colors_json = serde_json::to_string(colors).context("failed to serialize colors")?;
    conn.execute(
        "INSERT INTO pool_cards (name, cost, rank, colors) VALUES (?1, ?2, ?3, ?4)",
        params![name, cost, rank, colors_json],
    )
    .with_context(|| format!("failed to insert card {name}"))?;
    Ok(conn.last_insert_rowid())
}

pub fn get(conn: &Connection, id: CardId) -> Result<Option<PoolCard>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM pool_cards WHERE id = ?1"),
        params![id],
        from_row,
    )
    .optional()
    .with_context(|| format!("failed to load card {id}"))
}

pub fn list_all(conn: &Connection) -> Result<Vec<PoolCard>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {COLUMNS} FROM pool_cards ORDER BY id"))
        .context("failed to prepare card list query")?;
    let cards = stmt
        .query_map([], from_row)
        .context("failed to query cards")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to map card rows")?;
    Ok(cards)
}

/// Undrafted cards, most desirable first. Ties break on id for a stable
/// order.
pub fn list_undrafted_ranked(conn: &Connection) -> Result<Vec<PoolCard>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM pool_cards WHERE drafted = 0 ORDER BY rank DESC, id ASC"
        ))
        .context("failed to prepare ranked card query")?;
    let cards = stmt
        .query_map([], from_row)
        .context("failed to query ranked cards")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to map ranked card rows")?;
    Ok(cards)
}

pub fn count(conn: &Connection) -> Result<u64> {
    let n: i64 = conn
        .query_row("SELECT COUNT(*) FROM pool_cards", [], |row| row.get(0))
        .context("failed to count cards")?;
    Ok(n as u64)
}

/// Flip the drafted flag. Returns false when the flag already had the
/// requested value, which lets the resolver detect a lost race.
pub fn set_drafted(conn: &Connection, id: CardId, drafted: bool) -> Result<bool> {
    let updated = conn
        .execute(
            "UPDATE pool_cards SET drafted = ?2 WHERE id = ?1 AND drafted = ?3",
            params![id, drafted, !drafted],
        )
        .with_context(|| format!("failed to update drafted flag for card {id}"))?;
    Ok(updated == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_db;

    #[test]
    fn insert_preserves_colors() {
        let db = test_db();
        let colors = vec!["W".to_string(), "U".to_string()];
        let id = db
            .write(|tx| insert(tx, "Teferi, Time Raveler", 6, 88.5, &colors))
            .unwrap();
        let card = db.read(|conn| get(conn, id)).unwrap().unwrap();
        assert_eq!(card.colors, colors);
        assert_eq!(card.cost, 6);
        assert!(!card.drafted);
    }

    #[test]
    fn ranked_list_orders_by_rank_then_id_and_skips_drafted() {
        let db = test_db();
        let low = db.write(|tx| insert(tx, "Low", 1, 10.0, &[])).unwrap();
        let high = db.write(|tx| insert(tx, "High", 1, 90.0, &[])).unwrap();
        let tie_a = db.write(|tx| insert(tx, "Tie A", 1, 50.0, &[])).unwrap();
        let tie_b = db.write(|tx| insert(tx, "Tie B", 1, 50.0, &[])).unwrap();
        let gone = db.write(|tx| insert(tx, "Gone", 1, 99.0, &[])).unwrap();
        db.write(|tx| set_drafted(tx, gone, true)).unwrap();

        let ranked: Vec<CardId> = db
            .read(|conn| list_undrafted_ranked(conn))
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ranked, vec![high, tie_a, tie_b, low]);
    }

    #[test]
    fn set_drafted_reports_lost_race() {
        let db = test_db();
        let id = db.write(|tx| insert(tx, "Contested", 3, 1.0, &[])).unwrap();
        assert!(db.write(|tx| set_drafted(tx, id, true)).unwrap());
        assert!(!db.write(|tx| set_drafted(tx, id, true)).unwrap());
        assert!(db.write(|tx| set_drafted(tx, id, false)).unwrap());
    }
}
