//! Record storage trait and SQLite implementation.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::scope::Predicate;
use crate::error::StoreError;

/// Last successful fetch of a cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  pub key: String,
  pub last_fetched_at: DateTime<Utc>,
}

/// One pending mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
  Upsert {
    entity_type: String,
    id: String,
    data: Value,
  },
  Delete {
    entity_type: String,
    id: String,
  },
  TouchCache {
    key: String,
    at: DateTime<Utc>,
  },
}

/// Mutations committed together by [`RecordStore::apply`].
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
  ops: Vec<WriteOp>,
}

impl WriteBatch {
  pub fn push(&mut self, op: WriteOp) {
    self.ops.push(op);
  }

  pub fn ops(&self) -> &[WriteOp] {
    &self.ops
  }

  pub fn is_empty(&self) -> bool {
    self.ops.is_empty()
  }
}

/// Trait for record storage backends.
///
/// Records are stored as JSON keyed by `(entity_type, id)`. `apply` is the
/// save point: a batch is committed entirely or not at all.
pub trait RecordStore: Send + Sync {
  /// Get a single record.
  fn get(&self, entity_type: &str, id: &str) -> Result<Option<Value>, StoreError>;

  /// `(id, record)` pairs of a type matching `predicate`, in id order.
  fn fetch(&self, entity_type: &str, predicate: &Predicate) -> Result<Vec<(String, Value)>, StoreError>;

  /// Atomically apply inserts, updates, deletes and cache stamps.
  fn apply(&self, batch: &WriteBatch) -> Result<(), StoreError>;

  /// Look up the TTL entry for a cache key.
  fn cache_entry(&self, key: &str) -> Result<Option<CacheEntry>, StoreError>;

  /// Remove every TTL entry. Returns how many were removed.
  fn clear_cache_entries(&self) -> Result<usize, StoreError>;
}

/// SQLite-based record storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the database at `path`.
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    Self::with_connection(Connection::open(path)?)
  }

  /// Non-persistent database, mostly for tests.
  pub fn open_in_memory() -> Result<Self, StoreError> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf, StoreError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| StoreError::Backend("Could not determine data directory".to_string()))?;

    Ok(data_dir.join("lms-sync").join("store.db"))
  }

  fn with_connection(conn: Connection) -> Result<Self, StoreError> {
    conn.execute_batch(STORE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
    self
      .conn
      .lock()
      .map_err(|e| StoreError::LockPoisoned(e.to_string()))
  }
}

/// Schema for record and TTL tables.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    entity_type TEXT NOT NULL,
    id TEXT NOT NULL,
    data TEXT NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (entity_type, id)
);

CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    last_fetched_at TEXT NOT NULL
);
"#;

fn format_timestamp(at: &DateTime<Utc>) -> String {
  at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|_| StoreError::Timestamp(s.to_string()))
}

fn parse_record(entity_type: &str, data: &str) -> Result<Value, StoreError> {
  serde_json::from_str(data).map_err(|e| StoreError::serialization(entity_type, e))
}

impl RecordStore for SqliteStorage {
  fn get(&self, entity_type: &str, id: &str) -> Result<Option<Value>, StoreError> {
    let conn = self.lock()?;
    let data: Option<String> = conn
      .query_row(
        "SELECT data FROM records WHERE entity_type = ? AND id = ?",
        params![entity_type, id],
        |row| row.get(0),
      )
      .optional()?;

    data.map(|d| parse_record(entity_type, &d)).transpose()
  }

  fn fetch(&self, entity_type: &str, predicate: &Predicate) -> Result<Vec<(String, Value)>, StoreError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT id, data FROM records WHERE entity_type = ? ORDER BY id")?;
    let rows = stmt.query_map(params![entity_type], |row| {
      Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut records = Vec::new();
    for row in rows {
      let (id, data) = row?;
      let record = parse_record(entity_type, &data)?;
      if predicate.matches(&record) {
        records.push((id, record));
      }
    }
    Ok(records)
  }

  fn apply(&self, batch: &WriteBatch) -> Result<(), StoreError> {
    if batch.is_empty() {
      return Ok(());
    }

    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    let now = format_timestamp(&Utc::now());

    for op in batch.ops() {
      match op {
        WriteOp::Upsert {
          entity_type,
          id,
          data,
        } => {
          let data =
            serde_json::to_string(data).map_err(|e| StoreError::serialization(entity_type, e))?;
          tx.execute(
            "INSERT INTO records (entity_type, id, data, stored_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(entity_type, id) DO UPDATE SET data = excluded.data, stored_at = excluded.stored_at",
            params![entity_type, id, data, now],
          )?;
        }
        WriteOp::Delete { entity_type, id } => {
          tx.execute(
            "DELETE FROM records WHERE entity_type = ? AND id = ?",
            params![entity_type, id],
          )?;
        }
        WriteOp::TouchCache { key, at } => {
          tx.execute(
            "INSERT OR REPLACE INTO cache_entries (key, last_fetched_at) VALUES (?, ?)",
            params![key, format_timestamp(at)],
          )?;
        }
      }
    }

    // Dropping an uncommitted transaction rolls it back
    tx.commit()?;
    Ok(())
  }

  fn cache_entry(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
    let conn = self.lock()?;
    let at: Option<String> = conn
      .query_row(
        "SELECT last_fetched_at FROM cache_entries WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()?;

    at.map(|at| {
      Ok(CacheEntry {
        key: key.to_string(),
        last_fetched_at: parse_timestamp(&at)?,
      })
    })
    .transpose()
  }

  fn clear_cache_entries(&self) -> Result<usize, StoreError> {
    let conn = self.lock()?;
    Ok(conn.execute("DELETE FROM cache_entries", [])?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;
  use serde_json::json;

  fn upsert(entity_type: &str, id: &str, data: Value) -> WriteOp {
    WriteOp::Upsert {
      entity_type: entity_type.into(),
      id: id.into(),
      data,
    }
  }

  #[test]
  fn test_apply_get_fetch() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let mut batch = WriteBatch::default();
    batch.push(upsert("course", "2", json!({"id": "2", "name": "Art"})));
    batch.push(upsert("course", "1", json!({"id": "1", "name": "Bio"})));
    batch.push(upsert("plannable", "1", json!({"id": "1", "title": "Quiz"})));
    storage.apply(&batch).unwrap();

    assert_eq!(
      storage.get("course", "1").unwrap(),
      Some(json!({"id": "1", "name": "Bio"}))
    );
    assert_eq!(storage.get("course", "3").unwrap(), None);

    let all = storage.fetch("course", &Predicate::All).unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].0, "1");

    let art = storage.fetch("course", &Predicate::eq("name", "Art")).unwrap();
    assert_eq!(art, vec![("2".to_string(), json!({"id": "2", "name": "Art"}))]);
  }

  #[test]
  fn test_upsert_replaces_and_delete_removes() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let mut batch = WriteBatch::default();
    batch.push(upsert("course", "1", json!({"id": "1", "name": "Old"})));
    batch.push(upsert("course", "1", json!({"id": "1", "name": "New"})));
    storage.apply(&batch).unwrap();
    assert_eq!(storage.fetch("course", &Predicate::All).unwrap().len(), 1);
    assert_eq!(storage.get("course", "1").unwrap().unwrap()["name"], "New");

    let mut batch = WriteBatch::default();
    batch.push(WriteOp::Delete {
      entity_type: "course".into(),
      id: "1".into(),
    });
    storage.apply(&batch).unwrap();
    assert!(storage.get("course", "1").unwrap().is_none());
  }

  #[test]
  fn test_cache_entries() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    assert!(storage.cache_entry("courses").unwrap().is_none());

    let at = Utc::now() - Duration::seconds(30);
    let mut batch = WriteBatch::default();
    batch.push(WriteOp::TouchCache {
      key: "courses".into(),
      at,
    });
    storage.apply(&batch).unwrap();

    let entry = storage.cache_entry("courses").unwrap().unwrap();
    assert_eq!(entry.last_fetched_at.timestamp_micros(), at.timestamp_micros());

    assert_eq!(storage.clear_cache_entries().unwrap(), 1);
    assert!(storage.cache_entry("courses").unwrap().is_none());
  }

  #[test]
  fn test_persists_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("store.db");

    {
      let storage = SqliteStorage::open(&path).unwrap();
      let mut batch = WriteBatch::default();
      batch.push(upsert("course", "1", json!({"id": "1"})));
      storage.apply(&batch).unwrap();
    }

    let storage = SqliteStorage::open(&path).unwrap();
    assert!(storage.get("course", "1").unwrap().is_some());
  }
}
