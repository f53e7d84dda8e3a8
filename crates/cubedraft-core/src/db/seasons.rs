// Season rows. Exactly one season may be active; the schema enforces it.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::parse_text;
use crate::model::{Season, SeasonId, SeasonPhase};

fn from_row(row: &Row<'_>) -> rusqlite::Result<Season> {
    Ok(Season {
        id: row.get(0)?,
        name: row.get(1)?,
        active: row.get(2)?,
        phase: parse_text(row, 3, SeasonPhase::parse)?,
        cubucks_cap: row.get(4)?,
    })
}

const COLUMNS: &str = "id, name, active, phase, cubucks_cap";

pub fn insert(
    conn: &Connection,
    name: &str,
    active: bool,
    phase: SeasonPhase,
    cubucks_cap: i64,
) -> Result<SeasonId> {
    conn.execute(
        "INSERT INTO seasons (name, active, phase, cubucks_cap) VALUES (?1, ?2, ?3, ?4)",
        params![name, active, phase.as_str(), cubucks_cap],
    )
    .with_context(|| format!("failed to insert season {name}"))?;
    Ok(conn.last_insert_rowid())
}

pub fn get(conn: &Connection, id: SeasonId) -> Result<Option<Season>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM seasons WHERE id = ?1"),
        params![id],
        from_row,
    )
    .optional()
    .with_context(|| format!("failed to load season {id}"))
}

pub fn active(conn: &Connection) -> Result<Option<Season>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM seasons WHERE active = 1"),
        [],
        from_row,
    )
    .optional()
    .context("failed to load active season")
}

pub fn set_phase(conn: &Connection, id: SeasonId, phase: SeasonPhase) -> Result<()> {
    conn.execute(
        "UPDATE seasons SET phase = ?2 WHERE id = ?1",
        params![id, phase.as_str()],
    )
    .with_context(|| format!("failed to set phase for season {id}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_db;

    #[test]
    fn second_active_season_is_rejected() {
        let db = test_db();
        db.write(|tx| insert(tx, "2025", true, SeasonPhase::Draft, 100))
            .unwrap();
        let result = db.write(|tx| insert(tx, "2026", true, SeasonPhase::Preseason, 100));
        assert!(result.is_err());

        // Inactive seasons are unrestricted.
        db.write(|tx| insert(tx, "2024", false, SeasonPhase::Postseason, 80))
            .unwrap();
        let active = db.read(|conn| active(conn)).unwrap().unwrap();
        assert_eq!(active.name, "2025");
        assert_eq!(active.phase, SeasonPhase::Draft);
    }

    #[test]
    fn set_phase_updates_row() {
        let db = test_db();
        let id = db
            .write(|tx| insert(tx, "2026", true, SeasonPhase::Preseason, 100))
            .unwrap();
        db.write(|tx| set_phase(tx, id, SeasonPhase::Draft)).unwrap();
        let season = db.read(|conn| get(conn, id)).unwrap().unwrap();
        assert_eq!(season.phase, SeasonPhase::Draft);
        assert_eq!(season.cubucks_cap, 100);
    }
}
