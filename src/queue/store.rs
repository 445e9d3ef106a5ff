//! Job store: the durable, ordered list of pending requests.
//!
//! The store is the sole owner of the persisted list. The interceptor only
//! appends; the replay engine drains through the snapshot/commit pair, and
//! `commit` removes exactly the snapshot jobs that succeeded, so jobs
//! enqueued while a replay pass is in flight are never lost to an overwrite.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::job::PendingJob;

/// Storage backend for the pending-request queue.
pub trait JobStore: Send + Sync {
  /// Append a job at the tail of the queue.
  fn enqueue(&self, job: PendingJob) -> Result<()>;

  /// The full queue in insertion order.
  fn snapshot(&self) -> Result<Vec<PendingJob>>;

  /// Finish a replay pass: every job of `snapshot` that is absent from
  /// `remaining` is removed. Jobs outside the snapshot are untouched.
  fn commit(&self, snapshot: &[PendingJob], remaining: &[PendingJob]) -> Result<()>;

  fn len(&self) -> Result<usize>;

  fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }

  fn clear(&self) -> Result<()>;
}

/// SQLite-backed queue. Insertion order is the rowid sequence, so retained
/// jobs keep their place ahead of anything enqueued later.
pub struct SqliteJobStore {
  conn: Mutex<Connection>,
}

/// Schema for the queue table.
const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pending_jobs (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL,
    config BLOB NOT NULL
);
"#;

impl SqliteJobStore {
  /// Open the queue database at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open the queue database at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create queue directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open queue database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// In-memory queue, used in tests and dry runs.
  pub fn in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory queue: {}", e))?;
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("spiritualgram").join("queue.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(QUEUE_SCHEMA)
      .map_err(|e| eyre!("Failed to run queue migrations: {}", e))?;

    Ok(())
  }
}

impl JobStore for SqliteJobStore {
  fn enqueue(&self, job: PendingJob) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let config =
      serde_json::to_vec(&job.request).map_err(|e| eyre!("Failed to serialize job: {}", e))?;

    conn
      .execute(
        "INSERT INTO pending_jobs (id, created_at, config) VALUES (?, ?, ?)",
        params![job.id, job.created_at.timestamp_millis(), config],
      )
      .map_err(|e| eyre!("Failed to enqueue job {}: {}", job.id, e))?;

    Ok(())
  }

  fn snapshot(&self) -> Result<Vec<PendingJob>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT id, created_at, config FROM pending_jobs ORDER BY seq")
      .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

    let rows: Vec<(String, i64, Vec<u8>)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
      .map_err(|e| eyre!("Failed to read queue: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    // Unreadable rows are skipped, matching the original's treatment of a
    // corrupt persisted list as empty.
    let jobs = rows
      .into_iter()
      .filter_map(|(id, created_ms, config)| {
        let request = serde_json::from_slice(&config).ok()?;
        let created_at = chrono::DateTime::from_timestamp_millis(created_ms)?;
        Some(PendingJob {
          id,
          created_at,
          request,
        })
      })
      .collect();

    Ok(jobs)
  }

  fn commit(&self, snapshot: &[PendingJob], remaining: &[PendingJob]) -> Result<()> {
    let keep: HashSet<&str> = remaining.iter().map(|j| j.id.as_str()).collect();

    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    for job in snapshot {
      if keep.contains(job.id.as_str()) {
        continue;
      }
      conn
        .execute("DELETE FROM pending_jobs WHERE id = ?", params![job.id])
        .map_err(|e| eyre!("Failed to remove replayed job {}: {}", job.id, e))?;
    }

    Ok(())
  }

  fn len(&self) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM pending_jobs", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count queue: {}", e))?;

    Ok(count as usize)
  }

  fn clear(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM pending_jobs", [])
      .map_err(|e| eyre!("Failed to clear queue: {}", e))?;

    Ok(())
  }
}

/// Non-durable queue for tests.
#[derive(Default)]
pub struct MemoryJobStore {
  jobs: Mutex<Vec<PendingJob>>,
}

impl MemoryJobStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl JobStore for MemoryJobStore {
  fn enqueue(&self, job: PendingJob) -> Result<()> {
    let mut jobs = self
      .jobs
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    jobs.push(job);
    Ok(())
  }

  fn snapshot(&self) -> Result<Vec<PendingJob>> {
    let jobs = self
      .jobs
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(jobs.clone())
  }

  fn commit(&self, snapshot: &[PendingJob], remaining: &[PendingJob]) -> Result<()> {
    let keep: HashSet<&str> = remaining.iter().map(|j| j.id.as_str()).collect();
    let drop: HashSet<&str> = snapshot
      .iter()
      .map(|j| j.id.as_str())
      .filter(|id| !keep.contains(id))
      .collect();

    let mut jobs = self
      .jobs
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    jobs.retain(|j| !drop.contains(j.id.as_str()));
    Ok(())
  }

  fn len(&self) -> Result<usize> {
    let jobs = self
      .jobs
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(jobs.len())
  }

  fn clear(&self) -> Result<()> {
    let mut jobs = self
      .jobs
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    jobs.clear();
    Ok(())
  }
}
