// Configuration loading and parsing (config/cubedraft.toml).

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use cubedraft_core::draft::votes::VoteRules;
use cubedraft_core::external::StaticMembership;
use cubedraft_core::model::{SeasonPhase, TeamId};
use cubedraft_core::EngineSettings;

const CONFIG_FILE: &str = "cubedraft.toml";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub ws_port: u16,
    pub db_path: String,
    /// Optional CSV fixture used to fill an empty card pool.
    pub pool_csv: Option<String>,
    pub league: LeagueConfig,
    pub timer: TimerConfig,
    pub votes: VotesConfig,
    pub admins: Vec<String>,
    pub members: Vec<MemberConfig>,
}

// ---------------------------------------------------------------------------
// cubedraft.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    server: ServerSection,
    database: DatabaseSection,
    #[serde(default)]
    pool: PoolSection,
    league: LeagueConfig,
    #[serde(default)]
    timer: TimerConfig,
    #[serde(default)]
    votes: VotesConfig,
    #[serde(default)]
    admins: Vec<String>,
    #[serde(default)]
    members: Vec<MemberConfig>,
}

#[derive(Debug, Clone, Deserialize)]
struct ServerSection {
    port: u16,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PoolSection {
    csv: Option<String>,
}

/// Bootstrap data for an empty database: the active season and its teams.
#[derive(Debug, Clone, Deserialize)]
pub struct LeagueConfig {
    pub season: String,
    pub phase: SeasonPhase,
    pub cubucks_cap: i64,
    #[serde(default)]
    pub starting_cubucks: i64,
    pub teams: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimerConfig {
    pub poll_interval_secs: u64,
    pub max_ranking_failures: u32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            max_ranking_failures: EngineSettings::default().max_ranking_failures,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VotesConfig {
    pub default_threshold: u32,
    pub role_weights: HashMap<String, u32>,
    /// Keyed by team id. TOML table keys are strings.
    #[serde(default)]
    pub team_thresholds: HashMap<String, u32>,
}

impl Default for VotesConfig {
    fn default() -> Self {
        let rules = VoteRules::default();
        Self {
            default_threshold: rules.default_threshold,
            role_weights: rules.role_weights,
            team_thresholds: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemberConfig {
    pub user_id: String,
    pub team_id: TeamId,
    pub role: String,
}

impl Config {
    pub fn vote_rules(&self) -> Result<VoteRules, ConfigError> {
        let mut team_thresholds = HashMap::with_capacity(self.votes.team_thresholds.len());
        for (key, threshold) in &self.votes.team_thresholds {
            let team_id: TeamId = key.parse().map_err(|_| ConfigError::ValidationError {
                field: format!("votes.team_thresholds.{key}"),
                message: "key must be a numeric team id".into(),
            })?;
            team_thresholds.insert(team_id, *threshold);
        }
        Ok(VoteRules {
            role_weights: self.votes.role_weights.clone(),
            default_threshold: self.votes.default_threshold,
            team_thresholds,
        })
    }

    pub fn membership(&self) -> StaticMembership {
        let with_members = self
            .members
            .iter()
            .fold(StaticMembership::new(), |dir, m| {
                dir.with_member(&m.user_id, m.team_id, &m.role)
            });
        self.admins
            .iter()
            .fold(with_members, |dir, admin| dir.with_admin(admin))
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            max_ranking_failures: self.timer.max_ranking_failures,
        }
    }
}

/// Load and validate `config/cubedraft.toml` relative to `base_dir`.
///
/// This is the lower-level loading primitive that does not auto-copy defaults.
/// Prefer `load_config()` which handles default initialization automatically.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CONFIG_FILE);
    let text = read_file(&path)?;
    let file: ConfigFile = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;

    let config = Config {
        ws_port: file.server.port,
        db_path: file.database.path,
        pool_csv: file.pool.csv,
        league: file.league,
        timer: file.timer,
        votes: file.votes,
        admins: file.admins,
        members: file.members,
    };

    validate(&config)?;

    Ok(config)
}

/// Ensure all config files exist by copying missing ones from `defaults/`.
/// Returns the list of files that were copied. Skips `.example` files.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.exists() {
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/ nor config/ directory found in {}; \
                     run from the project root or ensure defaults/ is present",
                    base_dir.display()
                ),
            });
        }
        return Ok(vec![]);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    let entries = std::fs::read_dir(&defaults_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to read defaults directory: {e}"),
    })?;

    let mut copied = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read defaults entry: {e}"),
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };
        if file_name.to_str().is_some_and(|n| n.ends_with(".example")) {
            continue;
        }
        let target = config_dir.join(file_name);

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(mut dest) => {
                let content = std::fs::read(&path).map_err(|e| ConfigError::DefaultsCopyError {
                    message: format!("failed to read {}: {e}", path.display()),
                })?;
                std::io::Write::write_all(&mut dest, &content).map_err(|e| {
                    ConfigError::DefaultsCopyError {
                        message: format!("failed to write {}: {e}", target.display()),
                    }
                })?;
                copied.push(target);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(ConfigError::DefaultsCopyError {
                    message: format!("failed to create {}: {e}", target.display()),
                });
            }
        }
    }

    Ok(copied)
}

/// Convenience wrapper: loads config relative to the current working directory.
/// Ensures default config files are copied before loading.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.ws_port == 0 {
        return Err(invalid("server.port", "must be greater than 0"));
    }
    if config.db_path.trim().is_empty() {
        return Err(invalid("database.path", "must not be empty"));
    }

    if config.timer.poll_interval_secs == 0 {
        return Err(invalid("timer.poll_interval_secs", "must be at least 1"));
    }
    if config.timer.max_ranking_failures == 0 {
        return Err(invalid("timer.max_ranking_failures", "must be at least 1"));
    }

    if config.votes.default_threshold == 0 {
        return Err(invalid("votes.default_threshold", "must be at least 1"));
    }
    if config.votes.role_weights.is_empty() {
        return Err(invalid("votes.role_weights", "at least one role must be listed"));
    }
    for (role, weight) in &config.votes.role_weights {
        if *weight == 0 {
            return Err(invalid(
                format!("votes.role_weights.{role}"),
                "must be at least 1",
            ));
        }
    }
    for (team, threshold) in &config.votes.team_thresholds {
        if *threshold == 0 {
            return Err(invalid(
                format!("votes.team_thresholds.{team}"),
                "must be at least 1",
            ));
        }
    }
    // Also rejects non-numeric team keys.
    config.vote_rules()?;

    let league = &config.league;
    if league.cubucks_cap <= 0 {
        return Err(invalid(
            "league.cubucks_cap",
            format!("must be > 0, got {}", league.cubucks_cap),
        ));
    }
    if !(0..=league.cubucks_cap).contains(&league.starting_cubucks) {
        return Err(invalid(
            "league.starting_cubucks",
            format!("must be between 0 and the cap, got {}", league.starting_cubucks),
        ));
    }
    if league.teams.is_empty() {
        return Err(invalid("league.teams", "at least one team is required"));
    }

    for (i, member) in config.members.iter().enumerate() {
        if member.user_id.trim().is_empty() {
            return Err(invalid(format!("members[{i}].user_id"), "must not be empty"));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
