// src/lib.rs
// Public library surface for integration tests (and the Shuttle binary).

pub mod aggregate;
pub mod api;
pub mod config;
pub mod dedup;
pub mod ingest;
pub mod metrics;
pub mod normalize;
pub mod orchestrator;

pub use crate::aggregate::MarketAnalysis;
pub use crate::api::{router, AppState};
pub use crate::orchestrator::{Orchestrator, PipelineError, RunPolicy};

use anyhow::{Context, Result};

/// Build the application router from a loaded configuration (no metrics recorder).
pub fn app(cfg: &config::MarketConfig) -> Result<axum::Router> {
    let orchestrator = Orchestrator::from_config(cfg).context("building orchestrator")?;
    Ok(router(AppState::new(orchestrator)))
}
