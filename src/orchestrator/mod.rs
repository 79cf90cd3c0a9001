//! Multi-source orchestration module
//!
//! Fans one logical request out to the selected sources, runs them
//! concurrently and assembles their independent outcomes in request order.

mod executor;
mod models;

pub use crate::sources::SourceSelection;
pub use executor::Orchestrator;
pub use models::*;
