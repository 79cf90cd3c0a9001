//! Registry-Hub: multi-source enterprise registry aggregator
//!
//! Fans queries out to French enterprise registries (INSEE Sirene, INPI RNE,
//! Recherche d'entreprises) behind one tool surface, with per-source rate
//! limiting, a shared result cache and per-source failure isolation.

pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod network;
pub mod orchestrator;
pub mod query;
pub mod ratelimit;
pub mod results;
pub mod sources;
pub mod tools;
pub mod web;

pub use config::Settings;
pub use error::{SourceError, SourceResult};
pub use orchestrator::{Orchestrator, SourceSelection};
pub use sources::Source;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
