//! CLOB market-making engine binary: loads configuration, opens the store,
//! constructs the venue/catalog/oracle clients, and serves the control API
//! alongside a periodic quoting cycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use clap::Parser;
use clob_market_maker::api::{dispatch, health_check, health_index};
use clob_market_maker::{catalog::CatalogClient, oracle::OracleClient, Config, Engine, Store};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Overrides the `.env`/environment configuration for a headless run.
#[derive(Parser, Debug)]
#[command(name = "clob-market-maker")]
struct Cli {
    /// Run every cycle in paper mode regardless of PAPER_MODE.
    #[arg(long)]
    paper: bool,

    /// Seconds between cycle ticks.
    #[arg(long, env = "CYCLE_INTERVAL_SECS")]
    interval: Option<u64>,

    /// HTTP port for the control API and health endpoint.
    #[arg(long, env = "PORT")]
    port: Option<u16>,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clob_market_maker=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };
    if cli.paper {
        config.paper_mode = true;
    }
    if let Some(interval) = cli.interval {
        config.cycle_interval_secs = interval;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    info!(
        paper_mode = config.paper_mode,
        max_markets = config.max_markets,
        cycle_interval_secs = config.cycle_interval_secs,
        "engine configuration loaded"
    );

    let store = match Store::open(&config.database_path) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to open store");
            std::process::exit(1);
        }
    };

    // A missing signer key is fatal in live mode. In paper mode the signer
    // key is never used to sign orders, so a placeholder lets the client
    // still serve public book/price reads.
    let signer_key = config
        .venue_signer_key
        .clone()
        .filter(|k| !k.trim().is_empty());
    let effective_signer_key = match (&signer_key, config.paper_mode) {
        (Some(key), _) => key.clone(),
        (None, true) => {
            warn!("no venue signer key configured, running paper mode against public endpoints only");
            "paper-mode-placeholder".to_string()
        }
        (None, false) => {
            error!("missing VENUE_SIGNER_KEY and paper mode disabled, cannot start");
            std::process::exit(1);
        }
    };

    let venue = match clob_market_maker::PolymarketClobClient::new(
        &config.venue_base_url,
        &effective_signer_key,
        config.venue_funder_address.as_deref(),
        &config.venue_signature_type,
    ) {
        Ok(v) => Arc::new(v) as Arc<dyn clob_market_maker::VenueClient>,
        Err(e) => {
            error!(error = %e, "failed to construct venue client");
            std::process::exit(1);
        }
    };

    let catalog = CatalogClient::new(&config.catalog_base_url, &config.rewards_base_url);
    let oracle = config
        .oracle_base_url
        .as_deref()
        .map(OracleClient::new);

    let engine = Arc::new(Engine::new(config.clone(), store, venue, catalog, oracle));

    // An immediate first cycle, then the periodic timer. Ticks that overlap
    // an in-flight cycle are dropped by `Engine::tick` itself.
    let cycle_engine = engine.clone();
    let cycle_interval = config.cycle_interval_secs.max(1);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(cycle_interval));
        loop {
            ticker.tick().await;
            if !cycle_engine.is_enabled() {
                continue;
            }
            if let Some(report) = cycle_engine.tick(None).await {
                info!(
                    orders_placed = report.orders_placed,
                    total_markets = report.total_markets,
                    "periodic cycle complete"
                );
            }
        }
    });

    let app = Router::new()
        .route("/", get(health_index))
        .route("/health", get(health_check))
        .route("/api", post(dispatch))
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(
            clob_market_maker::middleware::request_logging_simple,
        ))
        .with_state(engine);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port)
        .parse()
        .context("invalid bind address")?;
    let listener = TcpListener::bind(addr).await.context("failed to bind control API port")?;
    info!(%addr, "control API listening");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
