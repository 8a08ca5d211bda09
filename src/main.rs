//! Job-market analyzer: binary entrypoint.
//! Boots the Axum HTTP server: configuration, source adapters, metrics and routes.

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use job_market_analyzer::{app, config, metrics::Metrics};

/// `MARKET_LOG_JSON=1` switches to JSON lines; `RUST_LOG` overrides the filter.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("job_market_analyzer=info,warn"));
    let json = std::env::var("MARKET_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if let Err(e) = res {
        eprintln!("tracing already initialised: {e}");
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = config::load_default().context("loading market config")?;
    tracing::info!(
        sources = cfg.enabled_sources().count(),
        max_in_flight = cfg.pipeline.max_in_flight,
        global_timeout_ms = cfg.pipeline.global_timeout_ms,
        "configuration loaded"
    );

    let metrics = Metrics::init()?;
    let router = app(&cfg)?.merge(metrics.router());

    Ok(router.into())
}
