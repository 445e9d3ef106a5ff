//! The pending-job record persisted by the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{Method, RequestBody, RequestDescriptor};

/// Self-contained description of a previously-attempted mutating call.
///
/// Everything needed to re-issue the request lives here as plain data; a job
/// never references live handles, so it stays replayable across restarts.
/// Field names mirror the layout the original web client persisted
/// (`config: {url, method, data, headers, baseURL}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
  pub url: String,
  pub method: Method,
  #[serde(rename = "data", default, skip_serializing_if = "Option::is_none")]
  pub body: Option<serde_json::Value>,
  #[serde(default)]
  pub headers: Vec<(String, String)>,
  #[serde(rename = "baseOrigin")]
  pub base_origin: String,
}

/// One entry in the pending-request queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingJob {
  pub id: String,
  #[serde(rename = "createdAt", with = "chrono::serde::ts_milliseconds")]
  pub created_at: DateTime<Utc>,
  #[serde(rename = "config")]
  pub request: JobRequest,
}

impl PendingJob {
  /// Capture a descriptor as a job. Returns `None` for bodies that cannot be
  /// serialized for later replay (binary multipart uploads).
  pub fn capture(descriptor: &RequestDescriptor) -> Option<Self> {
    let body = match &descriptor.body {
      RequestBody::Empty => None,
      RequestBody::Json(value) => Some(value.clone()),
      RequestBody::Multipart(_) => return None,
    };

    Some(Self {
      id: Uuid::new_v4().to_string(),
      created_at: now_millis(),
      request: JobRequest {
        url: descriptor.url.clone(),
        method: descriptor.method,
        body,
        headers: descriptor.headers.clone(),
        base_origin: descriptor.base_origin.clone(),
      },
    })
  }
}

/// Timestamps are persisted at millisecond precision; truncate at capture
/// time so a job in memory is identical to what any reader of the store
/// sees.
fn now_millis() -> DateTime<Utc> {
  let now = Utc::now();
  DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
