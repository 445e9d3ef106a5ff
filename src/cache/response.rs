//! Request and response shapes the cache layer works with.

use chrono::{DateTime, Utc};
use url::Url;

use crate::api::Method;

/// An incoming fetch the controller may intercept.
#[derive(Debug, Clone)]
pub struct FetchRequest {
  pub url: Url,
  pub method: Method,
  /// Raw `Accept` header, if any. Decides whether a terminal failure is
  /// answered with the offline page or a synthetic payload.
  pub accept: Option<String>,
}

impl FetchRequest {
  pub fn get(url: Url) -> Self {
    Self {
      url,
      method: Method::Get,
      accept: None,
    }
  }

  pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
    self.accept = Some(accept.into());
    self
  }

  pub fn accepts_html(&self) -> bool {
    self
      .accept
      .as_deref()
      .is_some_and(|a| a.contains("text/html"))
  }

  /// Cache key: the full URL string, so a match is always for this exact
  /// request.
  pub fn cache_key(&self) -> String {
    self.url.to_string()
  }
}

/// A complete response held in a cache bucket, or synthesized on failure.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResponse {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
  pub cached_at: DateTime<Utc>,
}

impl StoredResponse {
  pub fn new(status: u16, content_type: Option<String>, body: Vec<u8>) -> Self {
    Self {
      status,
      content_type,
      body,
      cached_at: Utc::now(),
    }
  }

  /// Synthetic JSON body returned when an API GET has no cache and no
  /// network.
  pub fn offline_json() -> Self {
    Self::new(
      503,
      Some("application/json".into()),
      b"{\"error\":\"offline\"}".to_vec(),
    )
  }

  /// Synthetic plain-text body for non-HTML requests that hit total failure.
  pub fn offline_text() -> Self {
    Self::new(503, Some("text/plain".into()), b"offline".to_vec())
  }

  pub fn body_str(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// What the controller did with a request.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
  /// Answered by the controller, from the given source.
  Served {
    response: StoredResponse,
    source: ServeSource,
  },
  /// Non-GET or cross-origin: not intercepted, hand to default handling.
  PassThrough,
}

impl FetchOutcome {
  pub fn response(&self) -> Option<&StoredResponse> {
    match self {
      FetchOutcome::Served { response, .. } => Some(response),
      FetchOutcome::PassThrough => None,
    }
  }

  pub fn source(&self) -> Option<ServeSource> {
    match self {
      FetchOutcome::Served { source, .. } => Some(*source),
      FetchOutcome::PassThrough => None,
    }
  }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeSource {
  /// Fresh from the network (and stored for next time).
  Network,
  /// A previously cached match.
  Cache,
  /// The offline fallback page from the app shell.
  OfflinePage,
  /// A synthesized 503 body.
  Synthetic,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_accepts_html() {
    let url = Url::parse("http://localhost:5000/feed").unwrap();
    let plain = FetchRequest::get(url.clone());
    assert!(!plain.accepts_html());

    let browser = FetchRequest::get(url.clone())
      .with_accept("text/html,application/xhtml+xml,*/*;q=0.8");
    assert!(browser.accepts_html());

    let api = FetchRequest::get(url).with_accept("application/json");
    assert!(!api.accepts_html());
  }

  #[test]
  fn test_synthetic_bodies() {
    let json = StoredResponse::offline_json();
    assert_eq!(json.status, 503);
    assert_eq!(json.body_str(), "{\"error\":\"offline\"}");

    let text = StoredResponse::offline_text();
    assert_eq!(text.status, 503);
    assert_eq!(text.body_str(), "offline");
  }
}
