//! Snapshot store: durable single-slot persistence for the catalog snapshot.
//!
//! The store holds at most one snapshot. Writes replace it wholesale in a
//! single statement, so no reader ever observes a half-written value. Reads
//! validate shape and integrity; anything unparsable or corrupted is treated
//! as absence rather than an error, which protects against schema drift
//! between app versions sharing the same database.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;

use crate::catalog::Snapshot;

/// Fixed slot key: the store is effectively a single mutable cell.
const SNAPSHOT_SLOT: &str = "catalog";

/// Schema for the snapshot table.
const SNAPSHOT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS snapshot (
    slot TEXT PRIMARY KEY,
    payload BLOB NOT NULL,
    checksum TEXT NOT NULL,
    saved_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Single-slot snapshot persistence with overwrite semantics.
pub trait SnapshotStore: Send + Sync {
  /// Load the stored snapshot. A corrupted or structurally invalid value
  /// reads as `None`, never as an error.
  fn load(&self) -> Result<Option<Snapshot>>;

  /// Replace the stored snapshot atomically. Rejects a snapshot whose
  /// `last_synced` does not advance past the stored one.
  fn save(&self, snapshot: &Snapshot) -> Result<()>;

  /// Delete the stored snapshot. Only reachable through explicit user or
  /// debug action.
  fn clear(&self) -> Result<()>;
}

/// SQLite-backed snapshot store.
pub struct SqliteSnapshotStore {
  conn: Mutex<Connection>,
}

impl SqliteSnapshotStore {
  /// Open or create the store at a specific path.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create data directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open an in-memory store. Used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory db: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(SNAPSHOT_SCHEMA)
      .map_err(|e| eyre!("Failed to run snapshot migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Read and validate the stored snapshot on an already-held connection.
  /// Checksum mismatch or schema drift reads as absence.
  fn fetch_decoded(conn: &Connection) -> Result<Option<Snapshot>> {
    let row: Option<(Vec<u8>, String)> = conn
      .query_row(
        "SELECT payload, checksum FROM snapshot WHERE slot = ?",
        params![SNAPSHOT_SLOT],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read snapshot: {}", e))?;

    let (payload, stored_checksum) = match row {
      Some(row) => row,
      None => return Ok(None),
    };

    if checksum(&payload) != stored_checksum {
      warn!("stored snapshot failed integrity check, treating as absent");
      return Ok(None);
    }

    match serde_json::from_slice::<Snapshot>(&payload) {
      Ok(snapshot) => Ok(Some(snapshot)),
      Err(e) => {
        warn!("stored snapshot does not match current schema, treating as absent: {}", e);
        Ok(None)
      }
    }
  }
}

fn checksum(payload: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(payload);
  hex::encode(hasher.finalize())
}

impl SnapshotStore for SqliteSnapshotStore {
  fn load(&self) -> Result<Option<Snapshot>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Self::fetch_decoded(&conn)
  }

  fn save(&self, snapshot: &Snapshot) -> Result<()> {
    let payload =
      serde_json::to_vec(snapshot).map_err(|e| eyre!("Failed to serialize snapshot: {}", e))?;
    let digest = checksum(&payload);

    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // Check and write under one lock acquisition, so two writers can never
    // both pass the monotonicity guard.
    if let Some(previous) = Self::fetch_decoded(&conn)? {
      if previous.last_synced >= snapshot.last_synced {
        return Err(eyre!(
          "snapshot timestamp did not advance ({} -> {})",
          previous.last_synced,
          snapshot.last_synced
        ));
      }
    }

    // Single statement: the replace is atomic from any reader's view.
    conn
      .execute(
        "INSERT OR REPLACE INTO snapshot (slot, payload, checksum, saved_at)
         VALUES (?, ?, ?, datetime('now'))",
        params![SNAPSHOT_SLOT, payload, digest],
      )
      .map_err(|e| eyre!("Failed to store snapshot: {}", e))?;

    Ok(())
  }

  fn clear(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM snapshot WHERE slot = ?", params![SNAPSHOT_SLOT])
      .map_err(|e| eyre!("Failed to clear snapshot: {}", e))?;

    Ok(())
  }
}

/// In-memory snapshot store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemorySnapshotStore {
  inner: Mutex<Option<Snapshot>>,
}

impl MemorySnapshotStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl SnapshotStore for MemorySnapshotStore {
  fn load(&self) -> Result<Option<Snapshot>> {
    let inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(inner.clone())
  }

  fn save(&self, snapshot: &Snapshot) -> Result<()> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if let Some(previous) = inner.as_ref() {
      if previous.last_synced >= snapshot.last_synced {
        return Err(eyre!(
          "snapshot timestamp did not advance ({} -> {})",
          previous.last_synced,
          snapshot.last_synced
        ));
      }
    }

    *inner = Some(snapshot.clone());
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    *inner = None;
    Ok(())
  }
}
