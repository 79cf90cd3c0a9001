//! Registry source module
//!
//! Defines the Source trait, the per-call protocol shared by every adapter,
//! and a registry of the configured providers.

mod context;
mod lease;
mod loader;
mod registry;
mod traits;

// Source implementations
pub mod inpi;
pub mod insee;
pub mod recherche;

pub use context::{Probe, SourceContext};
pub use inpi::Inpi;
pub use insee::Insee;
pub use lease::{Lease, LeaseManager, LeaseState, DEFAULT_EXPIRY_MARGIN};
pub use loader::SourceLoader;
pub use recherche::Recherche;
pub use registry::{Resolved, SourceRegistry, SourceSelection};
pub use traits::*;
