//! Durable response caches, organized into named tiers.
//!
//! A tier is a namespace of complete captured responses keyed by request
//! URL. Tier membership is decided at interception time by the routing
//! rules, never stored explicitly. Each entry write is independently
//! atomic; `put_many` additionally wraps a batch in one transaction for the
//! all-or-nothing install step.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use crate::gateway::FetchResponse;

/// Tier for navigational/document responses.
pub const DOCUMENT_TIER: &str = "catalog-app-v1";
/// Tier for API JSON responses.
pub const API_TIER: &str = "catalog-api-v1";
/// Tier for everything else: images, fonts, generic assets.
pub const STATIC_TIER: &str = "catalog-static-v1";

/// The currently recognized tier set. Activation garbage-collects any tier
/// not named here, which clears caches left behind by a prior version.
pub const RECOGNIZED_TIERS: [&str; 3] = [DOCUMENT_TIER, API_TIER, STATIC_TIER];

/// Storage backend for the worker's response caches.
pub trait ResponseCacheStorage: Send + Sync {
  fn get(&self, tier: &str, url: &str) -> Result<Option<FetchResponse>>;

  fn put(&self, tier: &str, url: &str, response: &FetchResponse) -> Result<()>;

  /// Write a batch of `(tier, url, response)` entries as a single
  /// transaction. Either every entry lands or none does.
  fn put_many(&self, entries: &[(String, String, FetchResponse)]) -> Result<()>;

  fn tier_names(&self) -> Result<Vec<String>>;

  /// Delete every tier not in `keep`.
  fn delete_tiers_except(&self, keep: &[&str]) -> Result<()>;
}

/// Schema for the response cache table.
const RESPONSE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS response_cache (
    tier TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (tier, url)
);

CREATE INDEX IF NOT EXISTS idx_response_cache_tier ON response_cache(tier);
"#;

/// SQLite-backed response cache.
pub struct SqliteResponseCache {
  conn: Mutex<Connection>,
}

impl SqliteResponseCache {
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;
    Self::from_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory db: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(RESPONSE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }
}

impl ResponseCacheStorage for SqliteResponseCache {
  fn get(&self, tier: &str, url: &str) -> Result<Option<FetchResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(u16, Option<String>, Vec<u8>)> = conn
      .query_row(
        "SELECT status, content_type, body FROM response_cache WHERE tier = ? AND url = ?",
        params![tier, url],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cached response: {}", e))?;

    Ok(row.map(|(status, content_type, body)| FetchResponse {
      status,
      content_type,
      body,
    }))
  }

  fn put(&self, tier: &str, url: &str, response: &FetchResponse) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO response_cache (tier, url, status, content_type, body, cached_at)
         VALUES (?, ?, ?, ?, ?, datetime('now'))",
        params![tier, url, response.status, response.content_type, response.body],
      )
      .map_err(|e| eyre!("Failed to store cached response: {}", e))?;

    Ok(())
  }

  fn put_many(&self, entries: &[(String, String, FetchResponse)]) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (tier, url, response) in entries {
      let inserted = conn.execute(
        "INSERT OR REPLACE INTO response_cache (tier, url, status, content_type, body, cached_at)
         VALUES (?, ?, ?, ?, ?, datetime('now'))",
        params![tier, url, response.status, response.content_type, response.body],
      );

      if let Err(e) = inserted {
        let _ = conn.execute("ROLLBACK", []);
        return Err(eyre!("Failed to store cached response: {}", e));
      }
    }

    conn
      .execute("COMMIT", [])
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn tier_names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT DISTINCT tier FROM response_cache ORDER BY tier")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let tiers = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list tiers: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(tiers)
  }

  fn delete_tiers_except(&self, keep: &[&str]) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // Small fixed keep-set, so a parameterized NOT IN is built inline.
    let placeholders = vec!["?"; keep.len()].join(", ");
    let sql = format!(
      "DELETE FROM response_cache WHERE tier NOT IN ({})",
      placeholders
    );

    conn
      .execute(&sql, rusqlite::params_from_iter(keep.iter()))
      .map_err(|e| eyre!("Failed to delete stale tiers: {}", e))?;

    Ok(())
  }
}

/// In-memory response cache for tests.
#[derive(Default)]
pub struct MemoryResponseCache {
  tiers: Mutex<HashMap<String, HashMap<String, FetchResponse>>>,
}

impl MemoryResponseCache {
  pub fn new() -> Self {
    Self::default()
  }
}

impl ResponseCacheStorage for MemoryResponseCache {
  fn get(&self, tier: &str, url: &str) -> Result<Option<FetchResponse>> {
    let tiers = self
      .tiers
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(tiers.get(tier).and_then(|t| t.get(url)).cloned())
  }

  fn put(&self, tier: &str, url: &str, response: &FetchResponse) -> Result<()> {
    let mut tiers = self
      .tiers
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    tiers
      .entry(tier.to_string())
      .or_default()
      .insert(url.to_string(), response.clone());
    Ok(())
  }

  fn put_many(&self, entries: &[(String, String, FetchResponse)]) -> Result<()> {
    let mut tiers = self
      .tiers
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    for (tier, url, response) in entries {
      tiers
        .entry(tier.clone())
        .or_default()
        .insert(url.clone(), response.clone());
    }
    Ok(())
  }

  fn tier_names(&self) -> Result<Vec<String>> {
    let tiers = self
      .tiers
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(tiers.keys().cloned().collect())
  }

  fn delete_tiers_except(&self, keep: &[&str]) -> Result<()> {
    let mut tiers = self
      .tiers
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    tiers.retain(|name, _| keep.contains(&name.as_str()));
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn response(body: &str) -> FetchResponse {
    FetchResponse {
      status: 200,
      content_type: Some("text/html".to_string()),
      body: body.as_bytes().to_vec(),
    }
  }

  #[test]
  fn entries_are_scoped_by_tier() {
    let cache = SqliteResponseCache::open_in_memory().unwrap();
    cache.put(DOCUMENT_TIER, "https://a/", &response("doc")).unwrap();

    assert!(cache.get(API_TIER, "https://a/").unwrap().is_none());
    assert_eq!(
      cache.get(DOCUMENT_TIER, "https://a/").unwrap().unwrap().text(),
      "doc"
    );
  }

  #[test]
  fn put_replaces_existing_entry() {
    let cache = SqliteResponseCache::open_in_memory().unwrap();
    cache.put(API_TIER, "https://a/api", &response("old")).unwrap();
    cache.put(API_TIER, "https://a/api", &response("new")).unwrap();

    assert_eq!(cache.get(API_TIER, "https://a/api").unwrap().unwrap().text(), "new");
  }

  #[test]
  fn put_many_lands_all_entries_across_tiers() {
    let cache = SqliteResponseCache::open_in_memory().unwrap();
    let entries = vec![
      (
        DOCUMENT_TIER.to_string(),
        "https://a/".to_string(),
        response("home"),
      ),
      (
        STATIC_TIER.to_string(),
        "https://a/icons/logo.png".to_string(),
        response("icon"),
      ),
    ];
    cache.put_many(&entries).unwrap();

    assert!(cache.get(DOCUMENT_TIER, "https://a/").unwrap().is_some());
    assert!(cache
      .get(STATIC_TIER, "https://a/icons/logo.png")
      .unwrap()
      .is_some());
  }

  #[test]
  fn delete_tiers_except_garbage_collects() {
    let cache = SqliteResponseCache::open_in_memory().unwrap();
    cache.put(DOCUMENT_TIER, "https://a/", &response("doc")).unwrap();
    cache.put(API_TIER, "https://a/api", &response("api")).unwrap();
    cache.put("catalog-app-v0", "https://a/", &response("stale")).unwrap();

    cache.delete_tiers_except(&RECOGNIZED_TIERS).unwrap();

    let tiers = cache.tier_names().unwrap();
    assert!(tiers.contains(&DOCUMENT_TIER.to_string()));
    assert!(tiers.contains(&API_TIER.to_string()));
    assert!(!tiers.contains(&"catalog-app-v0".to_string()));
  }

  #[test]
  fn memory_cache_matches_sqlite_semantics() {
    let cache = MemoryResponseCache::new();
    cache.put("old-tier", "https://a/", &response("x")).unwrap();
    cache.put(DOCUMENT_TIER, "https://a/", &response("y")).unwrap();

    cache.delete_tiers_except(&RECOGNIZED_TIERS).unwrap();
    assert!(cache.get("old-tier", "https://a/").unwrap().is_none());
    assert!(cache.get(DOCUMENT_TIER, "https://a/").unwrap().is_some());
  }
}
