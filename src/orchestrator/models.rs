//! Aggregated response shapes of the orchestrator

use crate::results::{EnterpriseRecord, PartialOutcome, SourceOutcome};
use crate::sources::SourceStatus;
use std::collections::BTreeMap;

/// One outcome per requested source, in request order
pub type SearchReport = Vec<PartialOutcome<Vec<EnterpriseRecord>>>;

/// Lookup outcome keyed by source name
pub type DetailsReport = BTreeMap<String, SourceOutcome<EnterpriseRecord>>;

/// Health keyed by source name
pub type StatusReport = BTreeMap<String, SourceStatus>;
