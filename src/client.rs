//! Offline-aware client facade wiring the queue and cache to a live API.

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::api::{ApiClient, ApiResponse, Method, RequestDescriptor};
use crate::cache::{CacheController, FetchOutcome, FetchRequest, SqliteBuckets};
use crate::config::Config;
use crate::connectivity::ConnectivityWatch;
use crate::queue::{JobStore, ReplayEngine, ReplayReport, RequestInterceptor, SqliteJobStore, Verdict};

/// How a mutating call ended.
#[derive(Debug)]
pub enum SendOutcome {
  /// Executed against the network.
  Sent(ApiResponse),
  /// Captured into the offline queue; will replay on reconnect. Show a
  /// "queued for later" state, not an error.
  Queued { job_id: String },
}

/// Caller-visible failures of [`OfflineClient::send`].
#[derive(Debug, Error)]
pub enum SendError {
  /// Offline with a binary upload body; the action needs connectivity and
  /// nothing was queued.
  #[error("offline: this action requires connectivity")]
  RequiresConnectivity,
  #[error("failed to queue request: {0}")]
  Queue(String),
  #[error("request failed: {0}")]
  Transport(String),
}

/// The full offline layer behind one handle.
///
/// Reads go through the cache controller, mutations through the
/// interceptor, and a background task drains the queue whenever the
/// connectivity watch reports a reconnect.
pub struct OfflineClient {
  config: Config,
  api: ApiClient,
  connectivity: ConnectivityWatch,
  store: Arc<dyn JobStore>,
  interceptor: RequestInterceptor,
  replay: Arc<ReplayEngine<ApiClient>>,
  cache: Arc<CacheController<SqliteBuckets>>,
}

impl OfflineClient {
  /// Open the layer with durable queue and cache at the configured paths.
  pub fn new(config: Config) -> Result<Self> {
    let api = ApiClient::new(&config)?;
    let connectivity = ConnectivityWatch::new(true);

    let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::open_at(&config.queue_db_path()?)?);
    let interceptor = RequestInterceptor::new(Arc::clone(&store), connectivity.clone())
      .with_auth_token(Config::auth_token());
    let replay = Arc::new(ReplayEngine::new(Arc::clone(&store), api.clone()));

    let buckets = SqliteBuckets::open_at(&config.cache_db_path()?)?;
    let cache = Arc::new(
      CacheController::new(buckets, api.origin().clone(), config.cache.version.clone())
        .with_shell_extras(config.cache.shell_extras.clone()),
    );

    Ok(Self {
      config,
      api,
      connectivity,
      store,
      interceptor,
      replay,
      cache,
    })
  }

  pub fn connectivity(&self) -> &ConnectivityWatch {
    &self.connectivity
  }

  pub fn queue(&self) -> &Arc<dyn JobStore> {
    &self.store
  }

  pub fn cache(&self) -> &CacheController<SqliteBuckets> {
    &self.cache
  }

  /// Descriptor for an API call, bound to the configured `/api` base.
  pub fn request(&self, method: Method, path: &str) -> RequestDescriptor {
    RequestDescriptor::new(method, path, self.config.api_base())
  }

  /// Spawn the reconnect listener: every offline-to-online edge triggers
  /// one replay pass (coalesced if one is already running).
  pub fn start(&self) -> tokio::task::JoinHandle<()> {
    let mut events = self.connectivity.subscribe();
    let replay = Arc::clone(&self.replay);
    tokio::spawn(async move {
      while events.reconnected().await {
        match replay.on_reconnect().await {
          Ok(report) if report.attempted > 0 => {
            info!(
              replayed = report.replayed,
              retained = report.retained,
              "drained offline queue"
            );
          }
          Ok(_) => {}
          Err(e) => warn!(error = %e, "replay pass failed"),
        }
      }
    })
  }

  /// Install the cache controller's app shell from the live server.
  pub async fn install(&self) -> Result<()> {
    let api = self.api.clone();
    self
      .cache
      .install(move |request| {
        let api = api.clone();
        async move { api.fetch(&request).await }
      })
      .await
  }

  /// Activate the current cache version, sweeping stale buckets.
  pub async fn activate(&self) -> Result<()> {
    self.cache.activate().await
  }

  /// A same-origin GET through the cache controller. `path` is resolved
  /// against the server origin; absolute URLs are used as-is (and pass
  /// through when cross-origin).
  pub async fn get(&self, path: &str, accept: Option<&str>) -> Result<FetchOutcome> {
    let url = if path.starts_with('/') {
      self
        .api
        .origin()
        .join(path)
        .map_err(|e| eyre!("Invalid path {}: {}", path, e))?
    } else {
      Url::parse(path).map_err(|e| eyre!("Invalid url {}: {}", path, e))?
    };

    let mut request = FetchRequest::get(url);
    if let Some(accept) = accept {
      request = request.with_accept(accept);
    }

    let api = self.api.clone();
    let outcome = self
      .cache
      .handle(&request, move |req| async move { api.fetch(&req).await })
      .await;

    Ok(outcome)
  }

  /// A mutating API call through the interceptor.
  pub async fn send(&self, descriptor: RequestDescriptor) -> Result<SendOutcome, SendError> {
    let verdict = self
      .interceptor
      .intercept(descriptor)
      .map_err(|e| SendError::Queue(e.to_string()))?;

    match verdict {
      Verdict::Forward(descriptor) => {
        let response = self
          .api
          .send(&descriptor)
          .await
          .map_err(|e| SendError::Transport(e.to_string()))?;
        Ok(SendOutcome::Sent(response))
      }
      Verdict::Queued { job_id } => Ok(SendOutcome::Queued { job_id }),
      Verdict::RequiresConnectivity => Err(SendError::RequiresConnectivity),
    }
  }

  /// One manual replay pass, used by the CLI's `queue flush`.
  pub async fn flush(&self) -> Result<ReplayReport> {
    self.replay.on_reconnect().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::MultipartUpload;

  fn offline_client() -> (OfflineClient, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
      data_dir: Some(dir.path().to_path_buf()),
      ..Config::default()
    };
    let client = OfflineClient::new(config).unwrap();
    client.connectivity().set_online(false);
    (client, dir)
  }

  #[tokio::test]
  async fn test_offline_mutation_queues_to_disk() {
    let (client, _dir) = offline_client();

    let descriptor = client
      .request(Method::Post, "/posts/7/comments")
      .with_json(serde_json::json!({"text": "amen"}));

    let outcome = client.send(descriptor).await.unwrap();
    assert!(matches!(outcome, SendOutcome::Queued { .. }));

    let jobs = client.queue().snapshot().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].request.url, "/posts/7/comments");
    assert_eq!(jobs[0].request.base_origin, "http://localhost:5000/api");
  }

  #[tokio::test]
  async fn test_offline_upload_is_rejected_not_queued() {
    let (client, _dir) = offline_client();

    let descriptor = client
      .request(Method::Post, "/posts")
      .with_upload(MultipartUpload {
        field: "media".into(),
        file_name: "psalm.mp4".into(),
        content_type: "video/mp4".into(),
        bytes: vec![0; 16],
      });

    let err = client.send(descriptor).await.unwrap_err();
    assert!(matches!(err, SendError::RequiresConnectivity));
    assert!(client.queue().is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_flush_of_empty_queue_is_noop() {
    let (client, _dir) = offline_client();

    let report = client.flush().await.unwrap();
    assert_eq!(report, ReplayReport::default());
  }

  #[tokio::test]
  async fn test_cross_origin_get_passes_through() {
    let (client, _dir) = offline_client();

    let outcome = client
      .get("https://cdn.example.com/font.woff2", None)
      .await
      .unwrap();
    assert!(matches!(outcome, FetchOutcome::PassThrough));
  }
}
