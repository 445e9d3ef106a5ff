//! Offline resilience layer for the Spiritualgram client.
//!
//! Three cooperating pieces sit between the UI and the REST API:
//! - a request interceptor that defers mutating calls made while offline
//!   into a durable job queue,
//! - a replay engine that drains that queue in order when connectivity
//!   returns,
//! - a cache controller that answers same-origin GET traffic with one of
//!   three freshness strategies and manages versioned cache buckets.
//!
//! [`client::OfflineClient`] wires the pieces together against a live
//! `reqwest` transport; each piece is also usable on its own.

pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod queue;

pub use client::{OfflineClient, SendError, SendOutcome};
pub use config::Config;
pub use connectivity::ConnectivityWatch;
