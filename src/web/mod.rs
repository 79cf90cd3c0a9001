//! Web server module
//!
//! Serves the boundary tools over HTTP for Registry-Hub.

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
