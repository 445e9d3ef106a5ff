//! HTTP transport: request descriptors and the reqwest-backed API client.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use url::Url;

use crate::cache::{FetchRequest, StoredResponse};
use crate::config::Config;
use crate::queue::JobRequest;

/// HTTP method of an API call. Serialized lowercase, matching the persisted
/// job layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  /// Reads are never queued; they fall through to the cache layer.
  pub fn is_read(&self) -> bool {
    matches!(self, Method::Get)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "get",
      Method::Post => "post",
      Method::Put => "put",
      Method::Patch => "patch",
      Method::Delete => "delete",
    }
  }

  fn to_reqwest(self) -> reqwest::Method {
    match self {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Patch => reqwest::Method::PATCH,
      Method::Delete => reqwest::Method::DELETE,
    }
  }
}

/// Body of an outgoing API call.
///
/// Only `Empty` and `Json` bodies can become pending jobs; a multipart upload
/// holds raw file bytes that the queue refuses by policy (the original client
/// could not persist `FormData` either).
#[derive(Debug, Clone)]
pub enum RequestBody {
  Empty,
  Json(serde_json::Value),
  Multipart(MultipartUpload),
}

/// A binary file upload, sent as one multipart form field.
#[derive(Debug, Clone)]
pub struct MultipartUpload {
  pub field: String,
  pub file_name: String,
  pub content_type: String,
  pub bytes: Vec<u8>,
}

/// A single outgoing API call, fully described.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
  /// Path relative to the API base, e.g. `/posts/42/like`.
  pub url: String,
  pub method: Method,
  pub body: RequestBody,
  pub headers: Vec<(String, String)>,
  /// Origin the call resolves against, e.g. `http://localhost:5000/api`.
  pub base_origin: String,
}

impl RequestDescriptor {
  pub fn new(method: Method, url: impl Into<String>, base_origin: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      method,
      body: RequestBody::Empty,
      headers: Vec::new(),
      base_origin: base_origin.into(),
    }
  }

  pub fn with_json(mut self, body: serde_json::Value) -> Self {
    self.body = RequestBody::Json(body);
    self
  }

  pub fn with_upload(mut self, upload: MultipartUpload) -> Self {
    self.body = RequestBody::Multipart(upload);
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn has_header(&self, name: &str) -> bool {
    self.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
  }
}

/// Response returned to the caller for a directly-executed call.
#[derive(Debug, Clone)]
pub struct ApiResponse {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

/// Executes previously-captured jobs against the live API.
///
/// The replay engine only needs success/failure per job; the real
/// implementation is [`ApiClient`], tests substitute a recording fake.
/// The returned future is `Send` so replay passes can run inside spawned
/// tasks.
pub trait ReplayTransport {
  fn execute(&self, request: &JobRequest) -> impl Future<Output = Result<()>> + Send;
}

/// Thin reqwest wrapper bound to the configured server origin.
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  origin: Url,
}

impl ApiClient {
  pub fn new(config: &Config) -> Result<Self> {
    let origin = Url::parse(config.server.origin())
      .map_err(|e| eyre!("Invalid server origin {}: {}", config.server.origin(), e))?;
    Ok(Self {
      http: reqwest::Client::new(),
      origin,
    })
  }

  pub fn origin(&self) -> &Url {
    &self.origin
  }

  fn resolve(&self, base_origin: &str, path: &str) -> Result<Url> {
    let base = Url::parse(&format!("{}/", base_origin.trim_end_matches('/')))
      .map_err(|e| eyre!("Invalid base origin {}: {}", base_origin, e))?;
    base
      .join(path.trim_start_matches('/'))
      .map_err(|e| eyre!("Invalid request path {}: {}", path, e))
  }

  /// Execute a descriptor directly (the online path of the interceptor).
  pub async fn send(&self, descriptor: &RequestDescriptor) -> Result<ApiResponse> {
    let url = self.resolve(&descriptor.base_origin, &descriptor.url)?;
    let mut req = self.http.request(descriptor.method.to_reqwest(), url);

    for (name, value) in &descriptor.headers {
      req = req.header(name, value);
    }

    req = match &descriptor.body {
      RequestBody::Empty => req,
      RequestBody::Json(value) => req.json(value),
      RequestBody::Multipart(upload) => {
        let part = reqwest::multipart::Part::bytes(upload.bytes.clone())
          .file_name(upload.file_name.clone())
          .mime_str(&upload.content_type)
          .map_err(|e| eyre!("Invalid upload content type: {}", e))?;
        req.multipart(reqwest::multipart::Form::new().part(upload.field.clone(), part))
      }
    };

    let response = req
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", descriptor.url, e))?;

    let status = response.status();
    let content_type = response
      .headers()
      .get(reqwest::header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(String::from);
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body: {}", e))?
      .to_vec();

    if !status.is_success() {
      return Err(eyre!("{} {} returned {}", descriptor.method.as_str(), descriptor.url, status));
    }

    Ok(ApiResponse {
      status: status.as_u16(),
      content_type,
      body,
    })
  }

  /// Plain GET used as the cache controller's network fetcher.
  pub async fn fetch(&self, request: &FetchRequest) -> Result<StoredResponse> {
    let mut req = self.http.get(request.url.clone());
    if let Some(accept) = &request.accept {
      req = req.header(reqwest::header::ACCEPT, accept);
    }

    let response = req
      .send()
      .await
      .map_err(|e| eyre!("Fetch of {} failed: {}", request.url, e))?;

    let status = response.status();
    let content_type = response
      .headers()
      .get(reqwest::header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(String::from);
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?
      .to_vec();

    if !status.is_success() {
      return Err(eyre!("GET {} returned {}", request.url, status));
    }

    Ok(StoredResponse::new(status.as_u16(), content_type, body))
  }
}

impl ReplayTransport for ApiClient {
  async fn execute(&self, request: &JobRequest) -> Result<()> {
    let url = self.resolve(&request.base_origin, &request.url)?;
    let mut req = self.http.request(request.method.to_reqwest(), url);

    for (name, value) in &request.headers {
      req = req.header(name, value);
    }
    if let Some(body) = &request.body {
      req = req.json(body);
    }

    let response = req
      .send()
      .await
      .map_err(|e| eyre!("Replay of {} failed: {}", request.url, e))?;

    response
      .error_for_status()
      .map_err(|e| eyre!("Replay of {} rejected: {}", request.url, e))?;

    Ok(())
  }
}
