//! Restro Gamification Daemon
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults
//! restro-gamification
//!
//! # Start with custom config
//! restro-gamification --config /path/to/config.toml
//!
//! # Start with custom HTTP port and storage directory
//! restro-gamification --http-port 5002 --storage-dir /data/restro
//! ```
//!
//! Several daemons may share one storage directory; SQLite locking keeps
//! their accruals consistent.

use clap::Parser;
use restro_gamification::services::events::spawn_logging_listener;
use restro_gamification::{Config, GamificationDb, HttpServer, Services};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "restro-gamification")]
#[command(about = "Points and badge accrual service for rehab session reports")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// HTTP API port
    #[arg(long, env = "RESTRO_HTTP_PORT")]
    http_port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("restro_gamification=info".parse()?),
        )
        .init();

    let args = Args::parse();

    // An explicit --config wins; otherwise reuse the storage directory's config.toml
    let mut config = match &args.config {
        Some(config_path) => {
            let mut config = Config::load(config_path)?;
            if let Some(dir) = args.storage_dir {
                config.storage_dir = dir;
            }
            config
        }
        None => Config::load_from_storage_dir(
            args.storage_dir.unwrap_or_else(restro_gamification::config::default_storage_dir),
        )?,
    };

    // CLI overrides
    if let Some(port) = args.http_port {
        config.http_port = port;
    }

    info!(
        storage_dir = %config.storage_dir.display(),
        http_port = config.http_port,
        perfect = config.points.perfect,
        imperfect = config.points.imperfect,
        undetected = config.points.undetected,
        "Starting restro-gamification"
    );

    tokio::fs::create_dir_all(&config.storage_dir).await?;

    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let db = Arc::new(GamificationDb::open(
        &config.database_path(),
        Duration::from_millis(config.busy_timeout_ms),
    )?);

    let services = Arc::new(Services::new(db.clone(), config.points));
    let listener = spawn_logging_listener(services.events.clone());

    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let http_server = Arc::new(
        HttpServer::new(services, http_addr)
            .with_page_sizes(config.default_page_size, config.max_page_size),
    );

    info!("HTTP API available at http://{}", http_addr);
    info!("Endpoints:");
    info!("  GET    /health                        - Health check");
    info!("  POST   /api/reports/submit            - Submit report, accrue points");
    info!("  GET    /api/reports/{{id}}              - Get report");
    info!("  GET    /api/reports/patient/{{id}}      - Patient report history");
    info!("  GET    /api/badges                    - Badge catalog");
    info!("  POST   /api/badges                    - Create badge");
    info!("  PUT    /api/badges/{{id}}               - Update badge");
    info!("  DELETE /api/badges/{{id}}               - Delete badge");
    info!("  GET    /api/leaderboard               - Leaderboard");
    info!("  GET    /api/users/{{id|me}}/badges      - Points and badges");
    info!("Press Ctrl+C to stop.");

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    };

    tokio::select! {
        result = http_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown => {}
    }

    listener.abort();

    if let Ok(stats) = db.stats() {
        info!(
            users = stats.user_count,
            badges = stats.badge_count,
            awards = stats.award_count,
            reports = stats.report_count,
            "Final ledger stats"
        );
    }

    Ok(())
}
