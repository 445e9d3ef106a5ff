//! Cache controller: strategy dispatch plus bucket lifecycle.
//!
//! Network failures never escape this module. A request always resolves to
//! some response (network, cache, offline page, or a synthetic 503) or to
//! `PassThrough` for traffic the controller does not intercept. Storage
//! errors on the hot path are logged and degrade to cache misses.

use std::future::Future;
use std::sync::{Arc, Mutex};

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, warn};
use url::Url;

use super::response::{FetchOutcome, FetchRequest, ServeSource, StoredResponse};
use super::router::{BucketRole, Router, Strategy};
use super::storage::BucketStorage;

/// Fixed app-shell manifest cached at install time.
const APP_SHELL: &[&str] = &["/", "/offline.html", "/manifest.webmanifest"];

/// Path of the offline fallback page within the app shell.
const OFFLINE_PAGE: &str = "/offline.html";

/// Lifecycle of the controller, mirroring a service worker's.
///
/// Install completes without a waiting period (the skip-waiting behavior),
/// so a new version may activate as soon as its shell is cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Installing,
  Installed,
  Active,
}

/// Answers same-origin GET traffic with one of three freshness strategies
/// and manages versioned bucket lifecycles across deployments.
pub struct CacheController<S: BucketStorage + 'static> {
  storage: Arc<S>,
  router: Router,
  origin: Url,
  version: String,
  shell_extras: Vec<String>,
  state: Mutex<WorkerState>,
}

impl<S: BucketStorage + 'static> CacheController<S> {
  pub fn new(storage: S, origin: Url, version: impl Into<String>) -> Self {
    let router = Router::standard(&origin);
    Self {
      storage: Arc::new(storage),
      router,
      origin,
      version: version.into(),
      shell_extras: Vec::new(),
      state: Mutex::new(WorkerState::Installing),
    }
  }

  /// Additional same-origin paths cached into the app shell at install time.
  pub fn with_shell_extras(mut self, extras: Vec<String>) -> Self {
    self.shell_extras = extras;
    self
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn state(&self) -> WorkerState {
    *self.state.lock().unwrap_or_else(|p| p.into_inner())
  }

  fn set_state(&self, state: WorkerState) {
    *self.state.lock().unwrap_or_else(|p| p.into_inner()) = state;
  }

  fn shell_url(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid shell path {}: {}", path, e))
  }

  fn shell_bucket(&self) -> String {
    BucketRole::AppShell.bucket_name(&self.version)
  }

  /// Install: populate the versioned app-shell bucket with the fixed
  /// manifest. Fails wholesale if any shell entry cannot be fetched.
  pub async fn install<F, Fut>(&self, fetcher: F) -> Result<()>
  where
    F: Fn(FetchRequest) -> Fut,
    Fut: Future<Output = Result<StoredResponse>>,
  {
    let bucket = self.shell_bucket();

    let paths = APP_SHELL
      .iter()
      .map(|p| p.to_string())
      .chain(self.shell_extras.iter().cloned());

    for path in paths {
      let request = FetchRequest::get(self.shell_url(&path)?);
      let response = fetcher(request.clone()).await?;
      self.storage.put(&bucket, &request.cache_key(), &response)?;
    }

    debug!(bucket = %bucket, "app shell installed");
    self.set_state(WorkerState::Installed);
    Ok(())
  }

  /// Activate: delete every bucket whose name does not carry the current
  /// version (exact substring test, not semver), then take over serving.
  /// Requests already flowing through this controller see the new buckets
  /// immediately; nothing needs a reload.
  pub async fn activate(&self) -> Result<()> {
    for name in self.storage.bucket_names()? {
      if !name.contains(&self.version) {
        debug!(bucket = %name, "deleting stale bucket");
        self.storage.delete_bucket(&name)?;
      }
    }

    self.set_state(WorkerState::Active);
    Ok(())
  }

  /// Answer one fetch. Non-GET and cross-origin traffic is not intercepted.
  pub async fn handle<F, Fut>(&self, request: &FetchRequest, fetcher: F) -> FetchOutcome
  where
    F: FnOnce(FetchRequest) -> Fut + Send + 'static,
    Fut: Future<Output = Result<StoredResponse>> + Send + 'static,
  {
    let route = match self.router.resolve(request) {
      Some(route) => *route,
      None => return FetchOutcome::PassThrough,
    };
    let bucket = route.role.bucket_name(&self.version);

    match route.strategy {
      Strategy::NetworkFirst => self.network_first(request, &bucket, fetcher).await,
      Strategy::StaleWhileRevalidate => {
        self.stale_while_revalidate(request, &bucket, fetcher).await
      }
      Strategy::CacheFirst => self.cache_first(request, &bucket, fetcher).await,
    }
  }

  /// Network-first: fresh copy wins; a cached match covers network failure,
  /// then the offline page (HTML) or a synthetic JSON 503.
  async fn network_first<F, Fut>(&self, request: &FetchRequest, bucket: &str, fetcher: F) -> FetchOutcome
  where
    F: FnOnce(FetchRequest) -> Fut,
    Fut: Future<Output = Result<StoredResponse>>,
  {
    match fetcher(request.clone()).await {
      Ok(fresh) => {
        self.put_quiet(bucket, &request.cache_key(), &fresh);
        FetchOutcome::Served {
          response: fresh,
          source: ServeSource::Network,
        }
      }
      Err(_) => {
        if let Some(cached) = self.try_match(bucket, &request.cache_key()) {
          return FetchOutcome::Served {
            response: cached,
            source: ServeSource::Cache,
          };
        }
        if request.accepts_html() {
          self.offline_page()
        } else {
          FetchOutcome::Served {
            response: StoredResponse::offline_json(),
            source: ServeSource::Synthetic,
          }
        }
      }
    }
  }

  /// Stale-while-revalidate: a cached match is returned immediately and
  /// refreshed in the background, any refresh error swallowed. With no
  /// cached match the network is awaited, then the offline page.
  async fn stale_while_revalidate<F, Fut>(
    &self,
    request: &FetchRequest,
    bucket: &str,
    fetcher: F,
  ) -> FetchOutcome
  where
    F: FnOnce(FetchRequest) -> Fut + Send + 'static,
    Fut: Future<Output = Result<StoredResponse>> + Send + 'static,
  {
    if let Some(cached) = self.try_match(bucket, &request.cache_key()) {
      let storage = Arc::clone(&self.storage);
      let bucket = bucket.to_string();
      let key = request.cache_key();
      let revalidate = fetcher(request.clone());
      tokio::spawn(async move {
        if let Ok(fresh) = revalidate.await {
          if let Err(e) = storage.put(&bucket, &key, &fresh) {
            warn!(url = %key, error = %e, "failed to store revalidated response");
          }
        }
      });

      return FetchOutcome::Served {
        response: cached,
        source: ServeSource::Cache,
      };
    }

    match fetcher(request.clone()).await {
      Ok(fresh) => {
        self.put_quiet(bucket, &request.cache_key(), &fresh);
        FetchOutcome::Served {
          response: fresh,
          source: ServeSource::Network,
        }
      }
      Err(_) => self.offline_page(),
    }
  }

  /// Cache-first: a cached match short-circuits; otherwise fetch and store.
  /// Total failure resolves to the offline page (HTML) or a plain 503.
  async fn cache_first<F, Fut>(&self, request: &FetchRequest, bucket: &str, fetcher: F) -> FetchOutcome
  where
    F: FnOnce(FetchRequest) -> Fut,
    Fut: Future<Output = Result<StoredResponse>>,
  {
    if let Some(cached) = self.try_match(bucket, &request.cache_key()) {
      return FetchOutcome::Served {
        response: cached,
        source: ServeSource::Cache,
      };
    }

    match fetcher(request.clone()).await {
      Ok(fresh) => {
        self.put_quiet(bucket, &request.cache_key(), &fresh);
        FetchOutcome::Served {
          response: fresh,
          source: ServeSource::Network,
        }
      }
      Err(_) => {
        if request.accepts_html() {
          self.offline_page()
        } else {
          FetchOutcome::Served {
            response: StoredResponse::offline_text(),
            source: ServeSource::Synthetic,
          }
        }
      }
    }
  }

  /// The offline fallback page from the app shell, or a synthetic body if
  /// the shell was never installed.
  fn offline_page(&self) -> FetchOutcome {
    let key = match self.shell_url(OFFLINE_PAGE) {
      Ok(url) => url.to_string(),
      Err(_) => {
        return FetchOutcome::Served {
          response: StoredResponse::offline_text(),
          source: ServeSource::Synthetic,
        }
      }
    };

    match self.try_match(&self.shell_bucket(), &key) {
      Some(page) => FetchOutcome::Served {
        response: page,
        source: ServeSource::OfflinePage,
      },
      None => FetchOutcome::Served {
        response: StoredResponse::offline_text(),
        source: ServeSource::Synthetic,
      },
    }
  }

  /// Cache lookup that degrades storage errors to a miss.
  fn try_match(&self, bucket: &str, key: &str) -> Option<StoredResponse> {
    match self.storage.match_request(bucket, key) {
      Ok(hit) => hit,
      Err(e) => {
        warn!(bucket = %bucket, url = %key, error = %e, "cache lookup failed");
        None
      }
    }
  }

  /// Cache write that logs instead of failing the request.
  fn put_quiet(&self, bucket: &str, key: &str, response: &StoredResponse) {
    if let Err(e) = self.storage.put(bucket, key, response) {
      warn!(bucket = %bucket, url = %key, error = %e, "failed to store response");
    }
  }
}
