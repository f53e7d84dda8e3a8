// Cubedraft server entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file)
// 2. Load config
// 3. Open database, bootstrap the league and card pool on first start
// 4. Build the draft engine
// 5. Spawn the WebSocket server task
// 6. Run the app loop (requests + timer) until Ctrl+C

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info};

use cubedraft_core::db::Database;
use cubedraft_core::draft::engine::Collaborators;
use cubedraft_core::DraftEngine;
use cubedraft_server::{app, config, seed, ws_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("Cubedraft starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: season '{}', {} teams, {} members, timer every {}s",
        config.league.season,
        config.league.teams.len(),
        config.members.len(),
        config.timer.poll_interval_secs
    );

    // 3. Open database and seed first-start data
    let db = Arc::new(Database::open(&config.db_path).context("failed to open database")?);
    info!("Database opened at {}", config.db_path);

    if seed::bootstrap_league(&db, &config.league).context("failed to bootstrap league")? {
        info!("Created league from configuration");
    }
    if let Some(pool_csv) = &config.pool_csv {
        seed::seed_pool(&db, Path::new(pool_csv))
            .with_context(|| format!("failed to seed card pool from {pool_csv}"))?;
    }

    // 4. Build the engine
    let rules = config.vote_rules().context("invalid vote rules")?;
    let collaborators = Collaborators::standard(Arc::clone(&db), Arc::new(config.membership()));
    let engine = Arc::new(
        DraftEngine::new(db, collaborators, rules, config.engine_settings())
            .context("failed to build draft engine")?,
    );

    // 5. Spawn WebSocket server task
    let (ws_tx, ws_rx) = mpsc::channel(256);
    let ws_port = config.ws_port;
    let ws_handle = tokio::spawn(async move {
        if let Err(e) = ws_server::run(ws_port, ws_tx).await {
            error!("WebSocket server error: {}", e);
        }
    });

    // 6. Run the app loop until Ctrl+C
    let poll_interval = Duration::from_secs(config.timer.poll_interval_secs);
    let app_handle = tokio::spawn(async move {
        if let Err(e) = app::run(ws_rx, engine, poll_interval).await {
            error!("Application loop error: {}", e);
        }
    });
    info!("Cubedraft ready on 127.0.0.1:{}", ws_port);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("Shutdown requested");

    // Stop accepting; the app loop ends once open connections drop their senders.
    ws_handle.abort();
    let _ = tokio::time::timeout(Duration::from_secs(5), app_handle).await;

    info!("Cubedraft shut down cleanly");
    Ok(())
}

const DEFAULT_LOG_FILTER: &str = "cubedraft=info,cubedraft_core=info,cubedraft_server=info,warn";

/// Initialize tracing to log to `logs/cubedraft.log`.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("cubedraft.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
