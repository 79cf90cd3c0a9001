//! Result types returned by sources and collected by the orchestrator
//!
//! This module defines the canonical enterprise record and the per-source
//! outcome wrappers used for fan-in.

mod outcome;
mod types;

pub use outcome::{PartialOutcome, SourceOutcome};
pub use types::*;
