//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;

use super::bound::Snapshot;
use super::ledger::LedgerEntry;
use super::traits::Cacheable;

/// A list query's cached entities, resolved in ledger order.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedList<T> {
  /// The cached entities in remote order
  pub entries: Vec<T>,
  /// Total results the remote reported for the query
  pub total_results: u64,
  /// Next page to request, absent once every page is cached
  pub next_page: Option<u32>,
  /// When the ledger entry was last written
  pub cached_at: DateTime<Utc>,
}

impl<T> CachedList<T> {
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn has_more(&self) -> bool {
    self.next_page.is_some()
  }
}

impl<T> Snapshot for CachedList<T> {
  fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

/// Trait for cache storage backends.
///
/// Reads are point reads; liveness comes from [`CacheStorage::changes`],
/// which ticks after every committed write.
pub trait CacheStorage: Send + Sync + 'static {
  /// Subscribe to commit notifications.
  fn changes(&self) -> watch::Receiver<u64>;

  /// Point read of the ledger entry for a query.
  fn find_ledger_entry(&self, query_key: &str) -> Result<Option<LedgerEntry>>;

  /// Ledger entry plus its resolved entities, read as one consistent snapshot.
  fn load_list<T: Cacheable>(&self, query_key: &str) -> Result<Option<CachedList<T>>>;

  /// Upsert `entities` and replace the ledger entry in one transaction.
  ///
  /// Either everything commits or nothing does; a ledger entry referencing
  /// an id with no cached entity is rejected.
  fn save_page<T: Cacheable>(&self, entry: &LedgerEntry, entities: &[T]) -> Result<()>;

  /// Like [`CacheStorage::save_page`], but only commits while the stored
  /// ledger still matches `base` (same ids, same next page).
  fn merge_page<T: Cacheable>(
    &self,
    base: &LedgerEntry,
    merged: &LedgerEntry,
    entities: &[T],
  ) -> Result<()>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
  changes: watch::Sender<u64>,
}

impl SqliteStorage {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory cache that disappears with the process.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache: {}", e))?;

    Self::with_connection(conn)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("marquee").join("cache.db"))
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    let (changes, _) = watch::channel(0);

    Ok(Self {
      conn: Mutex::new(conn),
      changes,
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Entity cache (stores serialized JSON, last writer wins)
CREATE TABLE IF NOT EXISTS entity_cache (
    entity_type TEXT NOT NULL,
    entity_key TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (entity_type, entity_key)
);

-- Pagination ledger, one row per list query
CREATE TABLE IF NOT EXISTS query_cache (
    query_hash TEXT PRIMARY KEY,
    query_key TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    total_results INTEGER NOT NULL,
    next_page INTEGER,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Ledger ids (preserves remote order)
CREATE TABLE IF NOT EXISTS query_results (
    query_hash TEXT NOT NULL,
    entity_key TEXT NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (query_hash, entity_key)
);

CREATE INDEX IF NOT EXISTS idx_query_results_hash ON query_results(query_hash, position);
"#;

/// Ledger header as stored in `query_cache`.
struct LedgerRow {
  query_key: String,
  entity_type: String,
  total_results: u64,
  next_page: Option<u32>,
  cached_at: DateTime<Utc>,
}

impl CacheStorage for SqliteStorage {
  fn changes(&self) -> watch::Receiver<u64> {
    self.changes.subscribe()
  }

  fn find_ledger_entry(&self, query_key: &str) -> Result<Option<LedgerEntry>> {
    let conn = self.lock()?;
    let query_hash = query_hash(query_key);

    let Some(row) = read_ledger_row(&conn, &query_hash)? else {
      return Ok(None);
    };
    let ids = read_ledger_ids(&conn, &query_hash)?;

    Ok(Some(LedgerEntry {
      query_key: row.query_key,
      ids,
      total_results: row.total_results,
      next_page: row.next_page,
    }))
  }

  fn load_list<T: Cacheable>(&self, query_key: &str) -> Result<Option<CachedList<T>>> {
    let conn = self.lock()?;
    let entity_type = T::entity_type();
    let query_hash = query_hash(query_key);

    let Some(row) = read_ledger_row(&conn, &query_hash)? else {
      return Ok(None);
    };
    if row.entity_type != entity_type {
      return Err(eyre!(
        "Query {} caches {} entities, not {}",
        row.query_key,
        row.entity_type,
        entity_type
      ));
    }

    // Same lock as the ledger read, so ids and entities agree
    let ids = read_ledger_ids(&conn, &query_hash)?;
    let entries = resolve_ids(&conn, &ids)?;

    Ok(Some(CachedList {
      entries,
      total_results: row.total_results,
      next_page: row.next_page,
      cached_at: row.cached_at,
    }))
  }

  fn save_page<T: Cacheable>(&self, entry: &LedgerEntry, entities: &[T]) -> Result<()> {
    self.write_page(None, entry, entities)
  }

  fn merge_page<T: Cacheable>(
    &self,
    base: &LedgerEntry,
    merged: &LedgerEntry,
    entities: &[T],
  ) -> Result<()> {
    self.write_page(Some(base), merged, entities)
  }
}

impl SqliteStorage {
  fn write_page<T: Cacheable>(
    &self,
    base: Option<&LedgerEntry>,
    entry: &LedgerEntry,
    entities: &[T],
  ) -> Result<()> {
    let mut conn = self.lock()?;
    let entity_type = T::entity_type();
    let query_hash = query_hash(&entry.query_key);
    let total_results = i64::try_from(entry.total_results)
      .map_err(|e| eyre!("Total results out of range: {}", e))?;

    // Rolled back on drop unless committed
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    if let Some(base) = base {
      let unchanged = match read_ledger_row(&tx, &query_hash)? {
        Some(row) => {
          row.next_page == base.next_page && read_ledger_ids(&tx, &query_hash)? == base.ids
        }
        None => false,
      };
      if !unchanged {
        return Err(eyre!(
          "Ledger {} changed while the next page was being fetched",
          entry.query_key
        ));
      }
    }

    for entity in entities {
      let data =
        serde_json::to_vec(entity).map_err(|e| eyre!("Failed to serialize entity: {}", e))?;

      tx.execute(
        "INSERT OR REPLACE INTO entity_cache (entity_type, entity_key, data, cached_at)
         VALUES (?, ?, ?, datetime('now'))",
        params![entity_type, entity.cache_key(), data],
      )
      .map_err(|e| eyre!("Failed to store entity: {}", e))?;
    }

    tx.execute(
      "INSERT OR REPLACE INTO query_cache (query_hash, query_key, entity_type, total_results, next_page, cached_at)
       VALUES (?, ?, ?, ?, ?, datetime('now'))",
      params![query_hash, entry.query_key, entity_type, total_results, entry.next_page],
    )
    .map_err(|e| eyre!("Failed to update query cache: {}", e))?;

    tx.execute(
      "DELETE FROM query_results WHERE query_hash = ?",
      params![query_hash],
    )
    .map_err(|e| eyre!("Failed to delete old query results: {}", e))?;

    for (position, id) in entry.ids.iter().enumerate() {
      tx.execute(
        "INSERT INTO query_results (query_hash, entity_key, position) VALUES (?, ?, ?)",
        params![query_hash, id, position],
      )
      .map_err(|e| eyre!("Failed to store query result: {}", e))?;
    }

    let missing: i64 = tx
      .query_row(
        "SELECT COUNT(*) FROM query_results qr
         LEFT JOIN entity_cache ec ON ec.entity_type = ? AND ec.entity_key = qr.entity_key
         WHERE qr.query_hash = ? AND ec.entity_key IS NULL",
        params![entity_type, query_hash],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to verify query results: {}", e))?;

    if missing > 0 {
      return Err(eyre!(
        "Ledger {} references {} uncached entities",
        entry.query_key,
        missing
      ));
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    drop(conn);

    tracing::debug!(
      query = %entry.query_key,
      ids = entry.ids.len(),
      upserted = entities.len(),
      "Committed ledger entry"
    );
    self.changes.send_modify(|generation| *generation += 1);

    Ok(())
  }
}

/// Resolve ids to entities in the order given. Ids with no cached entity
/// are skipped.
fn resolve_ids<T: Cacheable>(conn: &Connection, ids: &[String]) -> Result<Vec<T>> {
  let entity_type = T::entity_type();

  let mut stmt = conn
    .prepare_cached("SELECT data FROM entity_cache WHERE entity_type = ? AND entity_key = ?")
    .map_err(|e| eyre!("Failed to prepare entity query: {}", e))?;

  let mut entities = Vec::with_capacity(ids.len());
  for id in ids {
    let data: Option<Vec<u8>> = stmt
      .query_row(params![entity_type, id], |row| row.get(0))
      .optional()
      .map_err(|e| eyre!("Failed to read entity {}: {}", id, e))?;

    match data {
      Some(data) => entities.push(deserialize(&data)?),
      None => tracing::warn!(entity_type, id = %id, "Ledger id has no cached entity"),
    }
  }

  Ok(entities)
}

/// Stable, fixed-length storage key for a ledger key.
fn query_hash(query_key: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(query_key.as_bytes());
  hex::encode(hasher.finalize())
}

fn read_ledger_row(conn: &Connection, query_hash: &str) -> Result<Option<LedgerRow>> {
  let row: Option<(String, String, i64, Option<u32>, String)> = conn
    .query_row(
      "SELECT query_key, entity_type, total_results, next_page, cached_at FROM query_cache
       WHERE query_hash = ?",
      params![query_hash],
      |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
    )
    .optional()
    .map_err(|e| eyre!("Failed to read ledger entry: {}", e))?;

  let Some((query_key, entity_type, total_results, next_page, cached_at)) = row else {
    return Ok(None);
  };

  Ok(Some(LedgerRow {
    query_key,
    entity_type,
    total_results: u64::try_from(total_results).unwrap_or_default(),
    next_page,
    cached_at: parse_datetime(&cached_at)?,
  }))
}

fn read_ledger_ids(conn: &Connection, query_hash: &str) -> Result<Vec<String>> {
  let mut stmt = conn
    .prepare_cached("SELECT entity_key FROM query_results WHERE query_hash = ? ORDER BY position")
    .map_err(|e| eyre!("Failed to prepare ledger query: {}", e))?;

  let ids = stmt
    .query_map(params![query_hash], |row| row.get(0))
    .map_err(|e| eyre!("Failed to query ledger ids: {}", e))?
    .collect::<rusqlite::Result<Vec<String>>>()
    .map_err(|e| eyre!("Failed to read ledger ids: {}", e))?;

  Ok(ids)
}

fn deserialize<T: Cacheable>(data: &[u8]) -> Result<T> {
  serde_json::from_slice(data).map_err(|e| eyre!("Failed to deserialize entity: {}", e))
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
  use crate::cache::testing::{page, page_range, Item};

  fn storage() -> SqliteStorage {
    SqliteStorage::open_in_memory().unwrap()
  }

  #[test]
  fn test_missing_query_reads_as_none() {
    let storage = storage();
    assert!(storage.find_ledger_entry("nothing").unwrap().is_none());
    assert!(storage.load_list::<Item>("nothing").unwrap().is_none());
  }

  #[test]
  fn test_save_then_load_preserves_order() {
    let storage = storage();
    let page = page(&[5, 3, 9], 30, Some(2));
    let entry = LedgerEntry::first_page("items", &page);
    storage.save_page(&entry, &page.results).unwrap();

    let loaded = storage.find_ledger_entry("items").unwrap().unwrap();
    assert_eq!(loaded, entry);

    let list = storage.load_list::<Item>("items").unwrap().unwrap();
    let ids: Vec<u32> = list.entries.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![5, 3, 9]);
    assert_eq!(list.total_results, 30);
    assert_eq!(list.next_page, Some(2));
    assert!(list.has_more());
  }

  #[test]
  fn test_entities_are_shared_between_ledgers() {
    let storage = storage();
    let first = page(&[1, 2], 2, None);
    let second = page(&[2, 3], 2, None);
    storage
      .save_page(&LedgerEntry::first_page("a", &first), &first.results)
      .unwrap();
    storage
      .save_page(&LedgerEntry::first_page("b", &second), &second.results)
      .unwrap();

    let mut renamed = Item::new(2);
    renamed.name = "renamed".to_string();
    let entry = storage.find_ledger_entry("b").unwrap().unwrap();
    storage.save_page(&entry, &[renamed]).unwrap();

    let a = storage.load_list::<Item>("a").unwrap().unwrap();
    assert_eq!(a.entries[1].name, "renamed");
  }

  #[test]
  fn test_resolve_ids_follows_requested_order() {
    let storage = storage();
    let page = page_range(1, 4, 4, None);
    storage
      .save_page(&LedgerEntry::first_page("items", &page), &page.results)
      .unwrap();

    let ids = vec!["4".to_string(), "1".to_string(), "99".to_string()];
    let items: Vec<Item> = resolve_ids(&storage.lock().unwrap(), &ids).unwrap();
    let resolved: Vec<u32> = items.iter().map(|i| i.id).collect();
    assert_eq!(resolved, vec![4, 1]);
  }

  #[test]
  fn test_dangling_ledger_is_rolled_back() {
    let storage = storage();
    let first = page(&[1, 2], 4, Some(2));
    let entry = LedgerEntry::first_page("items", &first);
    storage.save_page(&entry, &first.results).unwrap();

    // Page 2 ids without their entities
    let second = page(&[3, 4], 4, None);
    let extended = entry.extended(&second);
    let result = storage.save_page::<Item>(&extended, &[]);
    assert!(result.is_err());

    assert_eq!(storage.find_ledger_entry("items").unwrap().unwrap(), entry);
  }

  #[test]
  fn test_merge_commits_onto_matching_ledger() {
    let storage = storage();
    let first = page_range(1, 2, 4, Some(2));
    let base = LedgerEntry::first_page("items", &first);
    storage.save_page(&base, &first.results).unwrap();

    let second = page_range(3, 2, 4, None);
    let merged = base.extended(&second);
    storage.merge_page(&base, &merged, &second.results).unwrap();

    assert_eq!(storage.find_ledger_entry("items").unwrap().unwrap(), merged);
  }

  #[test]
  fn test_merge_onto_replaced_ledger_is_rejected() {
    let storage = storage();
    let first = page_range(1, 2, 4, Some(2));
    let base = LedgerEntry::first_page("items", &first);
    storage.save_page(&base, &first.results).unwrap();

    // Same length and next page, different ids
    let refreshed = page_range(11, 2, 4, Some(2));
    let current = LedgerEntry::first_page("items", &refreshed);
    storage.save_page(&current, &refreshed.results).unwrap();

    let second = page_range(3, 2, 4, None);
    let result = storage.merge_page(&base, &base.extended(&second), &second.results);
    assert!(result.is_err());
    assert_eq!(storage.find_ledger_entry("items").unwrap().unwrap(), current);

    // Nothing to merge onto at all
    let result = storage.merge_page(
      &LedgerEntry::first_page("other", &first),
      &LedgerEntry::first_page("other", &first),
      &first.results,
    );
    assert!(result.is_err());
    assert!(storage.find_ledger_entry("other").unwrap().is_none());
  }

  #[test]
  fn test_commit_notifies_subscribers() {
    let storage = storage();
    let changes = storage.changes();
    assert!(!changes.has_changed().unwrap());

    let page = page(&[1], 1, None);
    storage
      .save_page(&LedgerEntry::first_page("items", &page), &page.results)
      .unwrap();
    assert!(changes.has_changed().unwrap());
  }

  #[test]
  fn test_failed_save_does_not_notify() {
    let storage = storage();
    let changes = storage.changes();

    let page = page(&[1], 1, None);
    let entry = LedgerEntry::first_page("items", &page);
    assert!(storage.save_page::<Item>(&entry, &[]).is_err());
    assert!(!changes.has_changed().unwrap());
  }

  #[test]
  fn test_open_on_disk_creates_parent_dirs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");
    let storage = SqliteStorage::open(&path).unwrap();

    let page = page(&[7], 1, None);
    storage
      .save_page(&LedgerEntry::first_page("items", &page), &page.results)
      .unwrap();
    drop(storage);

    let reopened = SqliteStorage::open(&path).unwrap();
    let list = reopened.load_list::<Item>("items").unwrap().unwrap();
    assert_eq!(list.entries, vec![Item::new(7)]);
  }

  #[test]
  fn test_query_hash_is_stable() {
    assert_eq!(query_hash("items"), query_hash("items"));
    assert_ne!(query_hash("items"), query_hash("Items"));
    assert_eq!(query_hash("items").len(), 64);
  }
}
