//! Versioned response caching for same-origin GET traffic.
//!
//! The controller mirrors a service worker's life: install populates the
//! app-shell bucket, activate sweeps buckets left behind by older versions,
//! and every GET is answered through one of three strategies chosen by an
//! ordered route table (network-first for `/api/*`, stale-while-revalidate
//! for `/uploads/*`, cache-first for everything else on the origin).

mod controller;
mod response;
mod router;
mod storage;

pub use controller::{CacheController, WorkerState};
pub use response::{FetchOutcome, FetchRequest, ServeSource, StoredResponse};
pub use router::{BucketRole, Route, RoutePredicate, Router, Strategy};
pub use storage::{BucketStorage, SqliteBuckets};
