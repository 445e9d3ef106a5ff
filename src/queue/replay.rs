//! Replay engine: drain the queue against the live API after a reconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use color_eyre::Result;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::api::ReplayTransport;

use super::store::JobStore;

/// Outcome of one reconnect trigger.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayReport {
  /// Jobs attempted across all passes this trigger ran.
  pub attempted: usize,
  /// Jobs that succeeded and were removed.
  pub replayed: usize,
  /// Jobs that failed and stay queued for the next reconnect.
  pub retained: usize,
  /// True when this trigger found a pass already running and folded into it.
  pub coalesced: bool,
}

impl ReplayReport {
  fn absorb(&mut self, pass: ReplayReport) {
    self.attempted += pass.attempted;
    self.replayed += pass.replayed;
    self.retained = pass.retained;
  }
}

/// Drains the job store in FIFO order, one pass per reconnect.
///
/// A pass never aborts early: a failed job is retained in place and later
/// jobs are still attempted. There is no backoff and no retry cap; a job
/// that keeps failing is retried on every reconnect. Only one pass runs at
/// a time; a reconnect arriving mid-pass schedules exactly one follow-up
/// pass instead of racing the current one.
pub struct ReplayEngine<T: ReplayTransport> {
  store: Arc<dyn JobStore>,
  transport: T,
  pass_lock: Mutex<()>,
  rerun: AtomicBool,
}

impl<T: ReplayTransport> ReplayEngine<T> {
  pub fn new(store: Arc<dyn JobStore>, transport: T) -> Self {
    Self {
      store,
      transport,
      pass_lock: Mutex::new(()),
      rerun: AtomicBool::new(false),
    }
  }

  /// Handle one connectivity-restored event.
  pub async fn on_reconnect(&self) -> Result<ReplayReport> {
    let mut report = ReplayReport::default();

    loop {
      {
        let _guard = match self.pass_lock.try_lock() {
          Ok(guard) => guard,
          Err(_) => {
            // A pass is in flight; fold this trigger into one follow-up pass.
            self.rerun.store(true, Ordering::SeqCst);
            report.coalesced = true;
            return Ok(report);
          }
        };

        loop {
          report.absorb(self.run_pass().await?);
          if !self.rerun.swap(false, Ordering::SeqCst) {
            break;
          }
        }
      }

      // A coalescing trigger can land between the final check above and the
      // guard release; re-check so that work is not deferred to the next
      // connectivity edge.
      if !self.rerun.swap(false, Ordering::SeqCst) {
        return Ok(report);
      }
    }
  }

  /// One full pass over a snapshot of the queue.
  async fn run_pass(&self) -> Result<ReplayReport> {
    let snapshot = self.store.snapshot()?;
    if snapshot.is_empty() {
      return Ok(ReplayReport::default());
    }

    debug!(jobs = snapshot.len(), "starting replay pass");

    let mut remaining = Vec::new();
    for job in &snapshot {
      match self.transport.execute(&job.request).await {
        Ok(()) => {
          debug!(job_id = %job.id, url = %job.request.url, "replayed queued request");
        }
        Err(e) => {
          warn!(job_id = %job.id, url = %job.request.url, error = %e, "replay failed, job retained");
          remaining.push(job.clone());
        }
      }
    }

    let report = ReplayReport {
      attempted: snapshot.len(),
      replayed: snapshot.len() - remaining.len(),
      retained: remaining.len(),
      coalesced: false,
    };

    self.store.commit(&snapshot, &remaining)?;

    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::{Method, RequestDescriptor};
  use crate::queue::{JobRequest, MemoryJobStore, PendingJob};
  use std::sync::Mutex as StdMutex;

  /// Transport fake: records every call, fails urls on the deny list.
  #[derive(Default)]
  struct FakeTransport {
    calls: StdMutex<Vec<String>>,
    failing: Vec<String>,
  }

  impl FakeTransport {
    fn failing(urls: &[&str]) -> Self {
      Self {
        calls: StdMutex::new(Vec::new()),
        failing: urls.iter().map(|s| s.to_string()).collect(),
      }
    }

    fn calls(&self) -> Vec<String> {
      self.calls.lock().unwrap().clone()
    }
  }

  impl ReplayTransport for &FakeTransport {
    async fn execute(&self, request: &JobRequest) -> Result<()> {
      self.calls.lock().unwrap().push(request.url.clone());
      if self.failing.contains(&request.url) {
        return Err(color_eyre::eyre::eyre!("503 from server"));
      }
      Ok(())
    }
  }

  fn job(path: &str) -> PendingJob {
    let descriptor = RequestDescriptor::new(Method::Post, path, "http://localhost:5000/api")
      .with_json(serde_json::json!({}));
    PendingJob::capture(&descriptor).unwrap()
  }

  #[tokio::test]
  async fn test_empty_store_is_a_noop() {
    let store: Arc<MemoryJobStore> = Arc::new(MemoryJobStore::new());
    let transport = FakeTransport::default();
    let engine = ReplayEngine::new(store.clone(), &transport);

    let report = engine.on_reconnect().await.unwrap();

    assert_eq!(report, ReplayReport::default());
    assert!(transport.calls().is_empty());
  }

  #[tokio::test]
  async fn test_failed_job_retained_later_jobs_still_attempted() {
    let store: Arc<MemoryJobStore> = Arc::new(MemoryJobStore::new());
    store.enqueue(job("/j1")).unwrap();
    store.enqueue(job("/j2")).unwrap();
    store.enqueue(job("/j3")).unwrap();

    let transport = FakeTransport::failing(&["/j2"]);
    let engine = ReplayEngine::new(store.clone(), &transport);

    let report = engine.on_reconnect().await.unwrap();

    assert_eq!(report.attempted, 3);
    assert_eq!(report.replayed, 2);
    assert_eq!(report.retained, 1);

    // Each job sent exactly once, in insertion order.
    assert_eq!(transport.calls(), vec!["/j1", "/j2", "/j3"]);

    let left = store.snapshot().unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].request.url, "/j2");
  }

  #[tokio::test]
  async fn test_retained_job_retries_on_next_reconnect() {
    let store: Arc<MemoryJobStore> = Arc::new(MemoryJobStore::new());
    store.enqueue(job("/stuck")).unwrap();

    let transport = FakeTransport::failing(&["/stuck"]);
    let engine = ReplayEngine::new(store.clone(), &transport);

    engine.on_reconnect().await.unwrap();
    engine.on_reconnect().await.unwrap();

    assert_eq!(transport.calls(), vec!["/stuck", "/stuck"]);
    assert_eq!(store.len().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_job_enqueued_mid_pass_survives_commit() {
    // Transport that enqueues a new job while the pass is executing the
    // first one, then reports success.
    struct EnqueuingTransport {
      store: Arc<MemoryJobStore>,
      injected: StdMutex<bool>,
    }

    impl ReplayTransport for &EnqueuingTransport {
      async fn execute(&self, _request: &JobRequest) -> Result<()> {
        let mut injected = self.injected.lock().unwrap();
        if !*injected {
          *injected = true;
          self.store.enqueue(job("/arrived-mid-pass")).unwrap();
        }
        Ok(())
      }
    }

    let store: Arc<MemoryJobStore> = Arc::new(MemoryJobStore::new());
    store.enqueue(job("/original")).unwrap();

    let transport = EnqueuingTransport {
      store: store.clone(),
      injected: StdMutex::new(false),
    };
    let engine = ReplayEngine::new(store.clone(), &transport);

    engine.on_reconnect().await.unwrap();

    let left = store.snapshot().unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].request.url, "/arrived-mid-pass");
  }

  #[tokio::test]
  async fn test_second_trigger_mid_pass_coalesces() {
    use tokio::sync::Notify;

    /// Blocks the first call until released, so a second trigger can land
    /// while the pass is provably in flight.
    struct BlockingTransport {
      started: Arc<Notify>,
      release: Arc<Notify>,
      calls: StdMutex<usize>,
    }

    impl ReplayTransport for &BlockingTransport {
      async fn execute(&self, _request: &JobRequest) -> Result<()> {
        let first = {
          let mut calls = self.calls.lock().unwrap();
          *calls += 1;
          *calls == 1
        };
        if first {
          self.started.notify_one();
          self.release.notified().await;
        }
        Ok(())
      }
    }

    let store: Arc<MemoryJobStore> = Arc::new(MemoryJobStore::new());
    store.enqueue(job("/slow")).unwrap();

    let transport: &'static BlockingTransport = Box::leak(Box::new(BlockingTransport {
      started: Arc::new(Notify::new()),
      release: Arc::new(Notify::new()),
      calls: StdMutex::new(0),
    }));
    let engine = Arc::new(ReplayEngine::new(store.clone(), transport));

    let first = {
      let engine = engine.clone();
      tokio::spawn(async move { engine.on_reconnect().await.unwrap() })
    };
    transport.started.notified().await;

    // Second reconnect while the first pass is blocked inside the transport.
    let second = engine.on_reconnect().await.unwrap();
    assert!(second.coalesced);

    // New work arrives before the follow-up pass runs.
    store.enqueue(job("/queued-during-pass")).unwrap();
    transport.release.notify_one();

    let report = first.await.unwrap();
    // First pass replayed /slow, the coalesced follow-up replayed the rest.
    assert_eq!(report.attempted, 2);
    assert!(store.is_empty().unwrap());
    // No trigger may be left pending once the holder returns.
    assert!(!engine.rerun.load(Ordering::SeqCst));
  }

  #[tokio::test]
  async fn test_pending_trigger_is_drained_before_return() {
    // A coalescing trigger can land in the instant the in-flight pass is
    // finishing. Model the flag it leaves behind and verify the next holder
    // drains that work instead of deferring it to a future reconnect.
    let store: Arc<MemoryJobStore> = Arc::new(MemoryJobStore::new());
    store.enqueue(job("/left-behind")).unwrap();

    let transport = FakeTransport::default();
    let engine = ReplayEngine::new(store.clone(), &transport);
    engine.rerun.store(true, Ordering::SeqCst);

    let report = engine.on_reconnect().await.unwrap();

    assert_eq!(report.replayed, 1);
    assert!(store.is_empty().unwrap());
    assert!(!engine.rerun.load(Ordering::SeqCst));
  }
}
