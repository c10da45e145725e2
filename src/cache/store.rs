//! Persistent generation store: trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::sync::Mutex;

use super::key::RequestKey;
use super::response::{CachedEntry, CachedResponse};

/// Store of cache generations, each holding captured responses keyed by
/// request identity.
///
/// Writes are whole-response and single-call; concurrent writers follow
/// last-writer-wins per key.
pub trait GenerationStore: Send + Sync {
  /// Names of every generation currently in the store, oldest first.
  fn list_generations(&self) -> Result<Vec<String>>;

  /// Most recently created generation, if any.
  fn latest_generation(&self) -> Result<Option<String>>;

  /// Drop a generation and every entry in it.
  fn delete_generation(&self, name: &str) -> Result<()>;

  /// Look up an entry in the given generation.
  fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedEntry>>;

  /// Insert or overwrite a single entry.
  fn put(&self, generation: &str, key: &RequestKey, response: &CachedResponse) -> Result<()>;

  /// Create the generation (if needed) and write all entries in one
  /// transaction: either every entry lands or none do.
  fn put_all(&self, generation: &str, entries: &[(RequestKey, CachedResponse)]) -> Result<()>;

  /// Remove a single entry.
  fn delete(&self, generation: &str, key: &RequestKey) -> Result<()>;

  /// Number of entries in the given generation.
  fn entry_count(&self, generation: &str) -> Result<u64>;
}

/// SQLite-backed generation store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at the default location, creating it if needed.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// In-memory store, used by tests.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Get the default database path.
  fn default_path() -> Result<std::path::PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("arbor").join("cache.db"))
  }

  /// Run database migrations for the store tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for the generation store.
const STORE_SCHEMA: &str = r#"
-- One row per cache generation; rowid order is creation order
CREATE TABLE IF NOT EXISTS generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Captured responses, keyed by request identity within a generation
CREATE TABLE IF NOT EXISTS entries (
    generation TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    path TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers BLOB NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_entries_generation ON entries(generation);
"#;

impl GenerationStore for SqliteStore {
  fn list_generations(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM generations ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn latest_generation(&self) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM generations ORDER BY rowid DESC LIMIT 1")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    Ok(stmt.query_row([], |row| row.get(0)).ok())
  }

  fn delete_generation(&self, name: &str) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE generation = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries for generation {}: {}", name, e))?;
    tx.execute("DELETE FROM generations WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete generation {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, cached_at FROM entries
         WHERE generation = ? AND key_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, Vec<u8>, Vec<u8>, String)> = stmt
      .query_row(params![generation, key.hash()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .ok();

    match row {
      Some((status, headers, body, cached_at_str)) => {
        let headers: Vec<(String, String)> = serde_json::from_slice(&headers)
          .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;
        let cached_at = parse_datetime(&cached_at_str)?;

        Ok(Some(CachedEntry {
          response: CachedResponse {
            status,
            headers,
            body,
          },
          cached_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, generation: &str, key: &RequestKey, response: &CachedResponse) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    insert_entry(&tx, generation, key, response)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn put_all(&self, generation: &str, entries: &[(RequestKey, CachedResponse)]) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // Transaction rolls back on drop if any insert fails, so a failed
    // install never leaves a partially populated generation behind.
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (key, response) in entries {
      insert_entry(&tx, generation, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn delete(&self, generation: &str, key: &RequestKey) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM entries WHERE generation = ? AND key_hash = ?",
        params![generation, key.hash()],
      )
      .map_err(|e| eyre!("Failed to delete entry: {}", e))?;

    Ok(())
  }

  fn entry_count(&self, generation: &str) -> Result<u64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM entries WHERE generation = ?",
        params![generation],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries: {}", e))?;

    Ok(count as u64)
  }
}

/// Upsert one entry, creating the generation row if needed.
fn insert_entry(
  tx: &rusqlite::Transaction<'_>,
  generation: &str,
  key: &RequestKey,
  response: &CachedResponse,
) -> Result<()> {
  let headers = serde_json::to_vec(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  tx.execute(
    "INSERT OR IGNORE INTO generations (name) VALUES (?)",
    params![generation],
  )
  .map_err(|e| eyre!("Failed to record generation {}: {}", generation, e))?;

  tx.execute(
    "INSERT OR REPLACE INTO entries (generation, key_hash, method, path, status, headers, body, cached_at)
     VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
    params![
      generation,
      key.hash(),
      key.method().as_str(),
      key.path(),
      response.status,
      headers,
      response.body,
    ],
  )
  .map_err(|e| eyre!("Failed to store entry {}: {}", key, e))?;

  Ok(())
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
  use crate::cache::key::Method;

  fn store() -> SqliteStore {
    SqliteStore::open_in_memory().unwrap()
  }

  fn response(status: u16, body: &str) -> CachedResponse {
    CachedResponse {
      status,
      headers: vec![("content-type".to_string(), "text/html".to_string())],
      body: body.as_bytes().to_vec(),
    }
  }

  #[test]
  fn test_put_get_roundtrip() {
    let store = store();
    let key = RequestKey::new(Method::Get, "/index.html");

    store.put("v1", &key, &response(200, "hello")).unwrap();

    let entry = store.get("v1", &key).unwrap().unwrap();
    assert_eq!(entry.response, response(200, "hello"));
  }

  #[test]
  fn test_get_missing_is_none() {
    let store = store();
    let key = RequestKey::new(Method::Get, "/index.html");

    assert!(store.get("v1", &key).unwrap().is_none());
  }

  #[test]
  fn test_get_is_generation_scoped() {
    let store = store();
    let key = RequestKey::new(Method::Get, "/index.html");

    store.put("v1", &key, &response(200, "old")).unwrap();

    assert!(store.get("v2", &key).unwrap().is_none());
  }

  #[test]
  fn test_put_overwrites_prior_entry() {
    let store = store();
    let key = RequestKey::new(Method::Get, "/index.html");

    store.put("v1", &key, &response(200, "old")).unwrap();
    store.put("v1", &key, &response(200, "new")).unwrap();

    let entry = store.get("v1", &key).unwrap().unwrap();
    assert_eq!(entry.response.body, b"new");
    assert_eq!(store.entry_count("v1").unwrap(), 1);
  }

  #[test]
  fn test_put_all_populates_generation() {
    let store = store();
    let entries = vec![
      (RequestKey::new(Method::Get, "/"), response(200, "shell")),
      (
        RequestKey::new(Method::Get, "/index.html"),
        response(200, "index"),
      ),
    ];

    store.put_all("v1", &entries).unwrap();

    assert_eq!(store.list_generations().unwrap(), vec!["v1"]);
    assert_eq!(store.entry_count("v1").unwrap(), 2);
    for (key, expected) in &entries {
      let entry = store.get("v1", key).unwrap().unwrap();
      assert_eq!(&entry.response, expected);
    }
  }

  #[test]
  fn test_delete_generation_removes_entries() {
    let store = store();
    let key = RequestKey::new(Method::Get, "/index.html");

    store.put("v1", &key, &response(200, "one")).unwrap();
    store.put("v2", &key, &response(200, "two")).unwrap();

    store.delete_generation("v1").unwrap();

    assert_eq!(store.list_generations().unwrap(), vec!["v2"]);
    assert!(store.get("v1", &key).unwrap().is_none());
    assert_eq!(store.entry_count("v1").unwrap(), 0);
    assert!(store.get("v2", &key).unwrap().is_some());
  }

  #[test]
  fn test_latest_generation_is_creation_order() {
    let store = store();
    let key = RequestKey::new(Method::Get, "/");

    assert!(store.latest_generation().unwrap().is_none());

    store.put("v1", &key, &response(200, "one")).unwrap();
    store.put("v2", &key, &response(200, "two")).unwrap();
    // Re-writing into an existing generation must not bump its recency
    store.put("v1", &key, &response(200, "again")).unwrap();

    assert_eq!(store.latest_generation().unwrap().as_deref(), Some("v2"));
  }

  #[test]
  fn test_delete_single_entry() {
    let store = store();
    let kept = RequestKey::new(Method::Get, "/");
    let dropped = RequestKey::new(Method::Get, "/index.html");

    store.put("v1", &kept, &response(200, "kept")).unwrap();
    store.put("v1", &dropped, &response(200, "dropped")).unwrap();

    store.delete("v1", &dropped).unwrap();

    assert!(store.get("v1", &dropped).unwrap().is_none());
    assert!(store.get("v1", &kept).unwrap().is_some());
    assert_eq!(store.entry_count("v1").unwrap(), 1);
  }

  #[test]
  fn test_keys_distinct_by_method() {
    let store = store();
    let get = RequestKey::new(Method::Get, "/api/records");
    let post = RequestKey::new(Method::Post, "/api/records");

    store.put("v1", &get, &response(200, "list")).unwrap();

    assert!(store.get("v1", &post).unwrap().is_none());
  }
}
