//! Durable backing for the quota ledger.
//!
//! # Table design
//!
//! `EVENTS` maps `"<account>/<kind>"` to the JSON-encoded, oldest-first list
//! of admission timestamps for that kind. Each `save_events` replaces the
//! whole list in one write transaction, so a crash leaves either the old or
//! the new history, never a torn one.
//!
//! `COOLDOWNS` maps `"<account>"` to the cooldown expiry in unix milliseconds.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};

use crate::error::{PacerError, Result};
use crate::types::ActionKind;

// ---------------------------------------------------------------------------
// LedgerStore
// ---------------------------------------------------------------------------

/// Where ledger history lives between process runs.
pub trait LedgerStore: Send + Sync {
    /// Stored timestamps for `(account, kind)`, oldest first. Missing keys
    /// yield an empty list.
    fn load_events(&self, account: &str, kind: ActionKind) -> Result<Vec<DateTime<Utc>>>;

    fn save_events(&self, account: &str, kind: ActionKind, events: &[DateTime<Utc>]) -> Result<()>;

    fn load_cooldown(&self, account: &str) -> Result<Option<DateTime<Utc>>>;

    /// `None` clears a stored cooldown.
    fn save_cooldown(&self, account: &str, until: Option<DateTime<Utc>>) -> Result<()>;
}

fn events_key(account: &str, kind: ActionKind) -> String {
    format!("{account}/{}", kind.as_str())
}

fn store_err(e: impl std::fmt::Display) -> PacerError {
    PacerError::Persistence(e.to_string())
}

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

/// Key: `"<account>/<kind>"`. Value: JSON array of RFC 3339 timestamps.
const EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("events");

/// Key: account id. Value: cooldown expiry, unix milliseconds.
const COOLDOWNS: TableDefinition<&str, i64> = TableDefinition::new("cooldowns");

// ---------------------------------------------------------------------------
// RedbLedgerStore
// ---------------------------------------------------------------------------

/// File-backed store using redb.
pub struct RedbLedgerStore {
    db: Database,
}

impl RedbLedgerStore {
    /// Open or create the redb database at `path`.
    ///
    /// Creates both tables if they don't already exist, so read transactions
    /// never see a missing table.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(store_err)?;
        let wt = db.begin_write().map_err(store_err)?;
        wt.open_table(EVENTS).map_err(store_err)?;
        wt.open_table(COOLDOWNS).map_err(store_err)?;
        wt.commit().map_err(store_err)?;
        Ok(Self { db })
    }
}

impl LedgerStore for RedbLedgerStore {
    fn load_events(&self, account: &str, kind: ActionKind) -> Result<Vec<DateTime<Utc>>> {
        let key = events_key(account, kind);
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(EVENTS).map_err(store_err)?;
        let Some(v) = table.get(key.as_str()).map_err(store_err)? else {
            return Ok(Vec::new());
        };
        let events = serde_json::from_slice(v.value()).map_err(store_err)?;
        Ok(events)
    }

    fn save_events(&self, account: &str, kind: ActionKind, events: &[DateTime<Utc>]) -> Result<()> {
        let key = events_key(account, kind);
        let value = serde_json::to_vec(events).map_err(store_err)?;
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(EVENTS).map_err(store_err)?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }

    fn load_cooldown(&self, account: &str) -> Result<Option<DateTime<Utc>>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(COOLDOWNS).map_err(store_err)?;
        let Some(v) = table.get(account).map_err(store_err)? else {
            return Ok(None);
        };
        let ms = v.value();
        DateTime::from_timestamp_millis(ms)
            .map(Some)
            .ok_or_else(|| store_err(format!("cooldown timestamp out of range: {ms}")))
    }

    fn save_cooldown(&self, account: &str, until: Option<DateTime<Utc>>) -> Result<()> {
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(COOLDOWNS).map_err(store_err)?;
            match until {
                Some(ts) => {
                    table
                        .insert(account, ts.timestamp_millis())
                        .map_err(store_err)?;
                }
                None => {
                    table.remove(account).map_err(store_err)?;
                }
            }
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryLedgerStore
// ---------------------------------------------------------------------------

/// Process-local store. History is lost when the value is dropped; share it
/// behind an `Arc` to simulate a restart in tests.
#[derive(Default)]
pub struct MemoryLedgerStore {
    events: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
    cooldowns: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn load_events(&self, account: &str, kind: ActionKind) -> Result<Vec<DateTime<Utc>>> {
        let events = self.events.lock().map_err(store_err)?;
        Ok(events
            .get(&events_key(account, kind))
            .cloned()
            .unwrap_or_default())
    }

    fn save_events(&self, account: &str, kind: ActionKind, events: &[DateTime<Utc>]) -> Result<()> {
        let mut map = self.events.lock().map_err(store_err)?;
        map.insert(events_key(account, kind), events.to_vec());
        Ok(())
    }

    fn load_cooldown(&self, account: &str) -> Result<Option<DateTime<Utc>>> {
        let cooldowns = self.cooldowns.lock().map_err(store_err)?;
        Ok(cooldowns.get(account).copied())
    }

    fn save_cooldown(&self, account: &str, until: Option<DateTime<Utc>>) -> Result<()> {
        let mut cooldowns = self.cooldowns.lock().map_err(store_err)?;
        match until {
            Some(ts) => cooldowns.insert(account.to_string(), ts),
            None => cooldowns.remove(account),
        };
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
