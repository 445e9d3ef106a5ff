//! Offline request queue: capture mutating calls made while offline and
//! replay them, in order, when connectivity returns.

mod interceptor;
mod job;
mod replay;
mod store;

pub use interceptor::{RequestInterceptor, Verdict};
pub use job::{JobRequest, PendingJob};
pub use replay::{ReplayEngine, ReplayReport};
pub use store::{JobStore, MemoryJobStore, SqliteJobStore};
