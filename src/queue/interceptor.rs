//! Gate for outgoing API calls: forward when online, queue when offline.

use std::sync::Arc;
use tracing::debug;

use color_eyre::Result;

use crate::api::{RequestBody, RequestDescriptor};
use crate::connectivity::ConnectivityWatch;

use super::job::PendingJob;
use super::store::JobStore;

/// Decision made for a single outgoing call.
#[derive(Debug)]
pub enum Verdict {
  /// Connectivity is present (or the call is a read): execute against the
  /// network as-is.
  Forward(RequestDescriptor),
  /// Offline with a replayable body: the call was captured into the queue.
  /// Callers should show a "queued for later" state, not an error.
  Queued { job_id: String },
  /// Offline with a binary upload body that cannot be captured. The action
  /// needs connectivity; nothing was enqueued.
  RequiresConnectivity,
}

/// Inspects every outgoing call against current connectivity.
///
/// Reads are never queued: they pass through to the cache layer and may fail
/// normally when offline. Exactly one job is appended per queued call.
pub struct RequestInterceptor {
  store: Arc<dyn JobStore>,
  connectivity: ConnectivityWatch,
  auth_token: Option<String>,
}

impl RequestInterceptor {
  pub fn new(store: Arc<dyn JobStore>, connectivity: ConnectivityWatch) -> Self {
    Self {
      store,
      connectivity,
      auth_token: None,
    }
  }

  /// Attach a bearer token to every call that does not already carry one,
  /// so queued jobs replay with auth intact.
  pub fn with_auth_token(mut self, token: Option<String>) -> Self {
    self.auth_token = token;
    self
  }

  pub fn intercept(&self, descriptor: RequestDescriptor) -> Result<Verdict> {
    let descriptor = self.authorize(descriptor);

    if self.connectivity.is_online() || descriptor.method.is_read() {
      return Ok(Verdict::Forward(descriptor));
    }

    if matches!(descriptor.body, RequestBody::Multipart(_)) {
      return Ok(Verdict::RequiresConnectivity);
    }

    // Capture cannot fail here: multipart was ruled out above.
    let job = match PendingJob::capture(&descriptor) {
      Some(job) => job,
      None => return Ok(Verdict::RequiresConnectivity),
    };
    let job_id = job.id.clone();

    debug!(job_id = %job_id, url = %descriptor.url, "queued offline request");
    self.store.enqueue(job)?;

    Ok(Verdict::Queued { job_id })
  }

  fn authorize(&self, mut descriptor: RequestDescriptor) -> RequestDescriptor {
    if let Some(token) = &self.auth_token {
      if !descriptor.has_header("Authorization") {
        descriptor = descriptor.with_header("Authorization", format!("Bearer {}", token));
      }
    }
    descriptor
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::{Method, MultipartUpload};
  use crate::queue::MemoryJobStore;

  fn interceptor(online: bool) -> (RequestInterceptor, Arc<MemoryJobStore>) {
    let store = Arc::new(MemoryJobStore::new());
    let connectivity = ConnectivityWatch::new(online);
    (
      RequestInterceptor::new(store.clone(), connectivity),
      store,
    )
  }

  fn post() -> RequestDescriptor {
    RequestDescriptor::new(Method::Post, "/posts/9/like", "http://localhost:5000/api")
      .with_json(serde_json::json!({}))
  }

  #[test]
  fn test_online_passes_through() {
    let (interceptor, store) = interceptor(true);

    let verdict = interceptor.intercept(post()).unwrap();
    assert!(matches!(verdict, Verdict::Forward(_)));
    assert!(store.is_empty().unwrap());
  }

  #[test]
  fn test_offline_mutation_is_queued_once() {
    let (interceptor, store) = interceptor(false);

    let verdict = interceptor.intercept(post()).unwrap();
    let job_id = match verdict {
      Verdict::Queued { job_id } => job_id,
      other => panic!("expected Queued, got {:?}", other),
    };

    let jobs = store.snapshot().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, job_id);
    assert_eq!(jobs[0].request.url, "/posts/9/like");
    assert_eq!(jobs[0].request.method, Method::Post);
  }

  #[test]
  fn test_offline_get_is_never_queued() {
    let (interceptor, store) = interceptor(false);
    let get = RequestDescriptor::new(Method::Get, "/posts/feed", "http://localhost:5000/api");

    let verdict = interceptor.intercept(get).unwrap();
    assert!(matches!(verdict, Verdict::Forward(_)));
    assert!(store.is_empty().unwrap());
  }

  #[test]
  fn test_offline_upload_requires_connectivity() {
    let (interceptor, store) = interceptor(false);
    let upload = RequestDescriptor::new(Method::Post, "/posts", "http://localhost:5000/api")
      .with_upload(MultipartUpload {
        field: "media".into(),
        file_name: "sunrise.jpg".into(),
        content_type: "image/jpeg".into(),
        bytes: vec![1, 2, 3],
      });

    let verdict = interceptor.intercept(upload).unwrap();
    assert!(matches!(verdict, Verdict::RequiresConnectivity));
    assert!(store.is_empty().unwrap());
  }

  #[test]
  fn test_token_attached_before_capture() {
    let store: Arc<MemoryJobStore> = Arc::new(MemoryJobStore::new());
    let interceptor = RequestInterceptor::new(store.clone(), ConnectivityWatch::new(false))
      .with_auth_token(Some("t0ken".into()));

    interceptor.intercept(post()).unwrap();

    let jobs = store.snapshot().unwrap();
    assert!(jobs[0]
      .request
      .headers
      .iter()
      .any(|(n, v)| n == "Authorization" && v == "Bearer t0ken"));
  }
}
