// First-start data: the card pool from a CSV fixture and the league's
// season and teams from configuration.
//
// Pool CSV columns: name, cost, rank, colors. `colors` is optional and holds
// color letters separated by spaces or semicolons ("W;U", "G B").

use std::io::Read;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tracing::{info, warn};

use cubedraft_core::db::{cards, seasons, teams, Database};
use cubedraft_core::ledger;
use cubedraft_core::DraftError;

use crate::config::LeagueConfig;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("failed to read file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),

    #[error(transparent)]
    Draft(#[from] DraftError),
}

// ---------------------------------------------------------------------------
// Pool CSV
// ---------------------------------------------------------------------------

/// A card ready to insert into the pool.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolRow {
    pub name: String,
    pub cost: i64,
    pub rank: f64,
    pub colors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawPoolRow {
    name: String,
    cost: i64,
    rank: f64,
    #[serde(default)]
    colors: String,
}

fn parse_colors(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ';' || c.is_whitespace())
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|c| c.to_uppercase())
        .collect()
}

fn load_pool_from_reader<R: Read>(rdr: R) -> Result<Vec<PoolRow>, csv::Error> {
    let mut reader = csv::Reader::from_reader(rdr);
    let mut rows = Vec::new();
    for result in reader.deserialize::<RawPoolRow>() {
        match result {
            Ok(raw) => {
                let name = raw.name.trim();
                if name.is_empty() {
                    warn!("skipping pool row with an empty name");
                    continue;
                }
                if raw.cost < 0 {
                    warn!("skipping card '{}': negative cost {}", name, raw.cost);
                    continue;
                }
                if !raw.rank.is_finite() {
                    warn!("skipping card '{}': non-finite rank", name);
                    continue;
                }
                rows.push(PoolRow {
                    name: name.to_string(),
                    cost: raw.cost,
                    rank: raw.rank,
                    colors: parse_colors(&raw.colors),
                });
            }
            Err(e) => {
                warn!("skipping malformed pool row: {}", e);
            }
        }
    }
    Ok(rows)
}

pub fn load_pool_csv(path: &Path) -> Result<Vec<PoolRow>, SeedError> {
    let file = std::fs::File::open(path).map_err(|e| SeedError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    load_pool_from_reader(file).map_err(|e| SeedError::Csv {
        path: path.display().to_string(),
        source: e,
    })
}

/// Fill the pool from `path` if the pool table is empty. Returns the number
/// of cards inserted; an already-populated pool is left alone.
pub fn seed_pool(db: &Database, path: &Path) -> Result<usize, SeedError> {
    let existing = db.read(|conn| cards::count(conn))?;
    if existing > 0 {
        info!("Card pool already holds {existing} cards; skipping {}", path.display());
        return Ok(0);
    }

    let rows = load_pool_csv(path)?;
    let inserted = db.write(|tx| -> anyhow::Result<usize> {
        for row in &rows {
            cards::insert(tx, &row.name, row.cost, row.rank, &row.colors)?;
        }
        Ok(rows.len())
    })?;
    info!("Seeded {inserted} cards from {}", path.display());
    Ok(inserted)
}

// ---------------------------------------------------------------------------
// League bootstrap
// ---------------------------------------------------------------------------

/// Create the configured season and teams when the database has no teams
/// yet. Teams start with `starting_cubucks` allocated against the season.
/// Returns whether anything was created.
pub fn bootstrap_league(db: &Database, league: &LeagueConfig) -> Result<bool, SeedError> {
    let has_teams = !db.read(|conn| teams::list(conn))?.is_empty();
    if has_teams {
        return Ok(false);
    }

    let now = chrono::Utc::now();
    db.write(|tx| -> Result<(), SeedError> {
        let season = match seasons::active(tx)? {
            Some(season) => season,
            None => {
                let id = seasons::insert(tx, &league.season, true, league.phase, league.cubucks_cap)?;
                seasons::get(tx, id)?
                    .context("season vanished right after insert")?
            }
        };
        for name in &league.teams {
            let team_id = teams::insert(tx, name)?;
            if league.starting_cubucks > 0 {
                ledger::allocate(tx, &season, team_id, league.starting_cubucks, now)?;
            }
        }
        Ok(())
    })?;

    info!(
        "Bootstrapped season '{}' ({}) with {} teams",
        league.season,
        league.phase.as_str(),
        league.teams.len()
    );
    Ok(true)
}
