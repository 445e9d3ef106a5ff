//! Bucket storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::response::StoredResponse;

/// Named response buckets: open-by-name, match-by-request, put,
/// delete-by-name, list-all-names. Each put replaces the previous entry for
/// the same request atomically, so concurrent writers race safely
/// (last writer wins, never a torn entry).
pub trait BucketStorage: Send + Sync {
  fn put(&self, bucket: &str, request_url: &str, response: &StoredResponse) -> Result<()>;

  fn match_request(&self, bucket: &str, request_url: &str) -> Result<Option<StoredResponse>>;

  fn delete_bucket(&self, bucket: &str) -> Result<()>;

  fn bucket_names(&self) -> Result<Vec<String>>;
}

/// SQLite-backed bucket storage.
pub struct SqliteBuckets {
  conn: Mutex<Connection>,
}

/// Schema for cached responses.
const BUCKET_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    bucket TEXT NOT NULL,
    request_url TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (bucket, request_url)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_bucket ON cache_entries(bucket);
"#;

impl SqliteBuckets {
  /// Open the cache database at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open the cache database at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// In-memory buckets, used in tests.
  pub fn in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory cache: {}", e))?;
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("spiritualgram").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(BUCKET_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

impl BucketStorage for SqliteBuckets {
  fn put(&self, bucket: &str, request_url: &str, response: &StoredResponse) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (bucket, request_url, status, content_type, body, cached_at)
         VALUES (?, ?, ?, ?, ?, datetime('now'))",
        params![
          bucket,
          request_url,
          response.status,
          response.content_type,
          response.body
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    Ok(())
  }

  fn match_request(&self, bucket: &str, request_url: &str) -> Result<Option<StoredResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT status, content_type, body, cached_at FROM cache_entries
         WHERE bucket = ? AND request_url = ?",
      )
      .map_err(|e| eyre!("Failed to prepare cache query: {}", e))?;

    let row: Option<(u16, Option<String>, Vec<u8>, String)> = stmt
      .query_row(params![bucket, request_url], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .ok();

    match row {
      Some((status, content_type, body, cached_at_str)) => Ok(Some(StoredResponse {
        status,
        content_type,
        body,
        cached_at: parse_datetime(&cached_at_str)?,
      })),
      None => Ok(None),
    }
  }

  fn delete_bucket(&self, bucket: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM cache_entries WHERE bucket = ?", params![bucket])
      .map_err(|e| eyre!("Failed to delete bucket {}: {}", bucket, e))?;

    Ok(())
  }

  fn bucket_names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT DISTINCT bucket FROM cache_entries ORDER BY bucket")
      .map_err(|e| eyre!("Failed to prepare bucket query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list buckets: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn response(body: &str) -> StoredResponse {
    StoredResponse::new(200, Some("application/json".into()), body.as_bytes().to_vec())
  }

  #[test]
  fn test_put_and_match() {
    let storage = SqliteBuckets::in_memory().unwrap();
    let url = "http://localhost:5000/api/posts/feed";

    assert!(storage.match_request("api-cache-v1", url).unwrap().is_none());

    storage.put("api-cache-v1", url, &response("[1,2]")).unwrap();

    let hit = storage.match_request("api-cache-v1", url).unwrap().unwrap();
    assert_eq!(hit.status, 200);
    assert_eq!(hit.body_str(), "[1,2]");

    // A different bucket does not see the entry.
    assert!(storage.match_request("static-cache-v1", url).unwrap().is_none());
  }

  #[test]
  fn test_put_replaces_last_writer_wins() {
    let storage = SqliteBuckets::in_memory().unwrap();
    let url = "http://localhost:5000/uploads/x.jpg";

    storage.put("uploads-cache-v1", url, &response("old")).unwrap();
    storage.put("uploads-cache-v1", url, &response("new")).unwrap();

    let hit = storage
      .match_request("uploads-cache-v1", url)
      .unwrap()
      .unwrap();
    assert_eq!(hit.body_str(), "new");
  }

  #[test]
  fn test_delete_bucket_and_names() {
    let storage = SqliteBuckets::in_memory().unwrap();
    storage.put("api-cache-v1", "u1", &response("a")).unwrap();
    storage.put("api-cache-v2", "u1", &response("b")).unwrap();
    storage.put("static-cache-v2", "u2", &response("c")).unwrap();

    assert_eq!(
      storage.bucket_names().unwrap(),
      vec!["api-cache-v1", "api-cache-v2", "static-cache-v2"]
    );

    storage.delete_bucket("api-cache-v1").unwrap();

    assert_eq!(
      storage.bucket_names().unwrap(),
      vec!["api-cache-v2", "static-cache-v2"]
    );
    assert!(storage.match_request("api-cache-v1", "u1").unwrap().is_none());
    assert!(storage.match_request("api-cache-v2", "u1").unwrap().is_some());
  }
}
