// SQLite persistence for teams, seasons, the card pool, draft sessions,
// picks, queues and the cubucks ledger.

pub mod cards;
pub mod ledger;
pub mod picks;
pub mod queue;
pub mod seasons;
pub mod sessions;
pub mod teams;

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, Transaction, TransactionBehavior};

/// SQLite-backed store. All access goes through one connection; writes run
/// inside `BEGIN IMMEDIATE` transactions so each engine operation commits
/// or rolls back as a unit.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(SCHEMA)
            .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    /// Run a read-only closure against the connection.
    pub fn read<T, E>(&self, f: impl FnOnce(&Connection) -> Result<T, E>) -> Result<T, E> {
        let conn = self.conn();
        f(&conn)
    }

    /// Run `f` inside an immediate transaction. The transaction commits when
    /// `f` returns `Ok` and rolls back otherwise.
    pub fn write<T, E>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<anyhow::Error>,
    {
        let mut conn = self.conn();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to begin transaction")?;
        let value = f(&tx)?;
        tx.commit().context("failed to commit transaction")?;
        Ok(value)
    }
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS teams (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        name         TEXT NOT NULL UNIQUE,
        balance      INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
        total_earned INTEGER NOT NULL DEFAULT 0,
        total_spent  INTEGER NOT NULL DEFAULT 0 CHECK (total_spent >= 0)
    );

    CREATE TABLE IF NOT EXISTS seasons (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        name        TEXT NOT NULL,
        active      INTEGER NOT NULL DEFAULT 0,
        phase       TEXT NOT NULL,
        cubucks_cap INTEGER NOT NULL
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_seasons_single_active
        ON seasons(active) WHERE active = 1;

    CREATE TABLE IF NOT EXISTS pool_cards (
        id      INTEGER PRIMARY KEY AUTOINCREMENT,
        name    TEXT NOT NULL,
        cost    INTEGER NOT NULL CHECK (cost >= 0),
        rank    REAL NOT NULL,
        colors  TEXT NOT NULL DEFAULT '[]',
        drafted INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS draft_sessions (
        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
        season_id           INTEGER NOT NULL REFERENCES seasons(id),
        status              TEXT NOT NULL,
        total_rounds        INTEGER NOT NULL,
        hours_per_pick      REAL NOT NULL,
        start_time          TEXT NOT NULL,
        end_time            TEXT,
        current_pick        INTEGER NOT NULL DEFAULT 0,
        pick_deadline       TEXT,
        paused_remaining_ms INTEGER,
        ranking_failures    INTEGER NOT NULL DEFAULT 0
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_single_active
        ON draft_sessions(season_id) WHERE status = 'active';

    CREATE TABLE IF NOT EXISTS draft_order (
        session_id INTEGER NOT NULL REFERENCES draft_sessions(id),
        team_id    INTEGER NOT NULL REFERENCES teams(id),
        position   INTEGER NOT NULL,
        picks_made INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (session_id, position),
        UNIQUE (session_id, team_id)
    );

    CREATE TABLE IF NOT EXISTS draft_picks (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id  INTEGER NOT NULL REFERENCES draft_sessions(id),
        team_id     INTEGER NOT NULL REFERENCES teams(id),
        card_id     INTEGER REFERENCES pool_cards(id),
        round       INTEGER NOT NULL,
        pick_number INTEGER NOT NULL,
        source      TEXT NOT NULL,
        cost        INTEGER NOT NULL,
        created_at  TEXT NOT NULL,
        UNIQUE (session_id, pick_number)
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_draft_picks_card
        ON draft_picks(card_id);

    CREATE TABLE IF NOT EXISTS queue_entries (
        team_id  INTEGER NOT NULL REFERENCES teams(id),
        card_id  INTEGER NOT NULL REFERENCES pool_cards(id),
        position INTEGER NOT NULL,
        pinned   INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (team_id, card_id)
    );

    CREATE TABLE IF NOT EXISTS cubucks_transactions (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        team_id       INTEGER NOT NULL REFERENCES teams(id),
        season_id     INTEGER REFERENCES seasons(id),
        kind          TEXT NOT NULL,
        amount        INTEGER NOT NULL,
        balance_after INTEGER NOT NULL,
        card_id       INTEGER,
        pick_id       INTEGER,
        note          TEXT,
        created_at    TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_transactions_team
        ON cubucks_transactions(team_id);
";

/// Read a TEXT column and map it through `parse`, reporting unknown values
/// as a conversion failure rather than panicking.
pub(crate) fn parse_text<T>(
    row: &Row<'_>,
    idx: usize,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unrecognized value '{raw}'").into(),
        )
    })
}

/// Read a JSON-encoded TEXT column.
pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
