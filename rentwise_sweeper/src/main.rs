//! Retention job purging rate limit records and expired sessions.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Error;
use ctrlc::set_handler;
use pico_args::Arguments;
use rentwise_auth::{auth::SessionManager, db::Database, security::RateLimiter};
use rentwise_sweeper::{Sweeper, SweeperConfig, logging, metrics};
use tokio::sync::watch;

const HELP: &str = "\
Purge stale rate limit records and expired sessions

USAGE:
  rentwise_sweeper [OPTIONS]

OPTIONS:
  --db-url        URL        Database connection string  [default: env DATABASE_URL]
  --interval      SECS       Seconds between sweeps      [default: env SWEEP_INTERVAL_SECS or 900]
  --metrics-addr  IP:PORT    Prometheus scrape address   [default: env METRICS_BIND, disabled if unset]

FLAGS:
  --once                     Run a single sweep and exit
  -h, --help                 Print help information

ENVIRONMENT:
  DATABASE_URL               PostgreSQL connection string
  SWEEP_INTERVAL_SECS        Seconds between sweeps
  METRICS_BIND               Prometheus scrape address
  RATE_LIMIT_*               Rate limit rules, checked at startup
  SESSION_*                  Session lifetimes, checked at startup
  RUST_LOG                   Log filter (default: info,sqlx=warn)
  (See .env file for all configuration options)
";

struct Args {
    database_url: Option<String>,
    interval_secs: Option<u64>,
    metrics_addr: Option<SocketAddr>,
    once: bool,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let args = Args {
        database_url: pargs.opt_value_from_str("--db-url")?,
        interval_secs: pargs.opt_value_from_str("--interval")?,
        metrics_addr: pargs.opt_value_from_str("--metrics-addr")?,
        once: pargs.contains("--once"),
    };

    logging::init();

    let config = SweeperConfig::from_env(args.database_url, args.interval_secs, args.metrics_addr)?;
    config.validate()?;

    if let Some(addr) = config.metrics_addr {
        metrics::init_metrics(addr).map_err(|e| anyhow::anyhow!(e))?;
        tracing::info!("Metrics exporter listening on {}", addr);
    }

    let db = Database::new(&config.database)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;
    tracing::info!("Database connected successfully");

    let sweeper = Sweeper::new(
        RateLimiter::new(Arc::new(db.rate_limit_store()), config.rate_limits.clone()),
        SessionManager::new(Arc::new(db.session_store()), config.sessions.clone()),
    );

    if args.once {
        let result = sweeper.run_once().await;
        db.close().await;
        result?;
        return Ok(());
    }

    // Catching signals for a clean stop between sweeps.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    set_handler(move || {
        let _ = shutdown_tx.send(true);
    })?;

    tracing::info!("Sweeping every {:?}", config.interval);
    sweeper.run_loop(config.interval, shutdown_rx).await;

    db.close().await;
    Ok(())
}
