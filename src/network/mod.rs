//! HTTP networking module
//!
//! Provides the HTTP client used by every source adapter.

mod client;

pub use client::HttpClient;
