// src/config/mod.rs
pub mod market;

pub use market::{load_default, load_from, MarketConfig, SourceCfg, SourceKind};
