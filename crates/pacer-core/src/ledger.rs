//! Quota ledger: the per-kind, time-indexed log of admitted actions.
//!
//! Quotas are never kept as counters. Every admission appends its timestamp
//! to the kind's log, and window counts are derived from the log at read
//! time. Expired events are pruned lazily on each read or write, never by a
//! timer, so the ledger stays single-threaded and clock-driven.
//!
//! The ledger is the sole mutator of the logs. It is not internally
//! synchronized; the scheduler serializes access.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::LimitsConfig;
use crate::error::{PacerError, Result};
use crate::store::LedgerStore;
use crate::types::ActionKind;

// ---------------------------------------------------------------------------
// QuotaWindow
// ---------------------------------------------------------------------------

/// A rolling window: at most `limit` admissions in any span of `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaWindow {
    pub duration: Duration,
    pub limit: u32,
}

impl QuotaWindow {
    pub fn new(duration: Duration, limit: u32) -> Self {
        Self { duration, limit }
    }
}

/// Current fill level of one window, as reported by [`Ledger::usage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowUsage {
    pub kind: ActionKind,
    pub window_secs: u64,
    pub count: u32,
    pub limit: u32,
    pub remaining: u32,
}

/// Result of a successful [`Ledger::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordReceipt {
    /// False when the store write failed. The in-memory ledger still holds
    /// the event and stays authoritative for this process.
    pub persisted: bool,
}

/// `now - window`, saturating at the earliest representable instant.
pub(crate) fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

struct KindLog {
    /// Sorted shortest first.
    windows: Vec<QuotaWindow>,
    /// Events at or before `now - retention` are dropped on access.
    retention: Duration,
    /// Oldest first.
    events: Vec<DateTime<Utc>>,
}

impl KindLog {
    fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = window_start(now, self.retention);
        let expired = self.events.partition_point(|e| *e <= cutoff);
        self.events.drain(..expired);
        expired
    }

    /// Index of the first event inside `(now - window, ..]`.
    fn window_index(&self, window: Duration, now: DateTime<Utc>) -> usize {
        let start = window_start(now, window);
        self.events.partition_point(|e| *e <= start)
    }

    fn count(&self, window: Duration, now: DateTime<Utc>) -> usize {
        self.events.len() - self.window_index(window, now)
    }
}

pub struct Ledger {
    account: String,
    store: Arc<dyn LedgerStore>,
    logs: HashMap<ActionKind, KindLog>,
}

impl Ledger {
    /// An empty ledger. Nothing is read from `store`.
    pub fn new(account: impl Into<String>, store: Arc<dyn LedgerStore>, limits: &LimitsConfig) -> Self {
        let logs = ActionKind::all()
            .iter()
            .map(|&kind| {
                let kind_limits = limits.for_kind(kind);
                let windows = kind_limits.quota_windows();
                // Keep the newest event long enough to answer spacing checks
                // even when the spacing outlasts every window.
                let retention = windows
                    .iter()
                    .map(|w| w.duration)
                    .max()
                    .unwrap_or_default()
                    .max(kind_limits.min_spacing());
                (
                    kind,
                    KindLog {
                        windows,
                        retention,
                        events: Vec::new(),
                    },
                )
            })
            .collect();
        Self {
            account: account.into(),
            store,
            logs,
        }
    }

    /// Load the full history from `store`, discarding events that predate
    /// every window as of `now`.
    ///
    /// Any store failure is returned as [`PacerError::Persistence`]: quota
    /// correctness cannot be guaranteed without history.
    pub fn load(
        account: impl Into<String>,
        store: Arc<dyn LedgerStore>,
        limits: &LimitsConfig,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let mut ledger = Self::new(account, store, limits);
        let mut discarded = 0usize;
        for &kind in ActionKind::all() {
            let mut events = ledger
                .store
                .load_events(&ledger.account, kind)
                .map_err(|e| match e {
                    PacerError::Persistence(_) => e,
                    other => PacerError::Persistence(other.to_string()),
                })?;
            events.sort_unstable();
            let log = ledger.log_mut(kind);
            log.events = events;
            discarded += log.prune(now);
        }
        tracing::debug!(account = %ledger.account, discarded, "ledger loaded");
        Ok(ledger)
    }

    pub fn windows(&self, kind: ActionKind) -> &[QuotaWindow] {
        &self.log(kind).windows
    }

    /// Events currently held for `kind`, oldest first. Not pruned.
    pub fn events(&self, kind: ActionKind) -> &[DateTime<Utc>] {
        &self.log(kind).events
    }

    pub fn last_admitted(&self, kind: ActionKind) -> Option<DateTime<Utc>> {
        self.log(kind).events.last().copied()
    }

    /// Number of `kind` events with `timestamp > now - window`.
    pub fn count_in_window(&mut self, kind: ActionKind, window: Duration, now: DateTime<Utc>) -> usize {
        let log = self.log_mut(kind);
        log.prune(now);
        log.count(window, now)
    }

    /// Earliest instant at which `window` will have room again for `kind`.
    /// `None` if it has room at `now`, or if its limit is zero and it never
    /// will.
    pub fn window_reopens_at(
        &mut self,
        kind: ActionKind,
        window: QuotaWindow,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let log = self.log_mut(kind);
        log.prune(now);
        let first = log.window_index(window.duration, now);
        let count = log.events.len() - first;
        let limit = window.limit as usize;
        if limit == 0 || count < limit {
            return None;
        }
        // Room opens once `count - limit + 1` of the in-window events expire.
        let expiring = log.events[first + (count - limit)];
        let span = chrono::Duration::from_std(window.duration).ok()?;
        expiring.checked_add_signed(span)
    }

    /// Append an admission for `kind` at `at` and write the kind's history
    /// through to the store.
    ///
    /// Re-checks every window first. A full window here means the caller
    /// skipped the rate gate, which is a logic error, not a denial.
    pub fn record(&mut self, kind: ActionKind, at: DateTime<Utc>) -> Result<RecordReceipt> {
        let log = self.log_mut(kind);
        log.prune(at);
        for w in &log.windows {
            let count = log.count(w.duration, at);
            if count >= w.limit as usize {
                return Err(PacerError::InvalidState(format!(
                    "recording {kind} at {at} would exceed {}/{}s (already {count})",
                    w.limit,
                    w.duration.as_secs()
                )));
            }
        }
        let pos = log.events.partition_point(|e| *e <= at);
        log.events.insert(pos, at);
        tracing::debug!(account = %self.account, kind = %kind, at = %at, "ledger event recorded");

        Ok(RecordReceipt {
            persisted: self.persist_kind_or_warn(kind),
        })
    }

    /// Remove one event for `kind` recorded at exactly `at`. Returns whether
    /// an event was removed.
    pub fn release(&mut self, kind: ActionKind, at: DateTime<Utc>) -> Result<bool> {
        let log = self.log_mut(kind);
        let Some(pos) = log.events.iter().rposition(|e| *e == at) else {
            return Ok(false);
        };
        log.events.remove(pos);
        tracing::debug!(account = %self.account, kind = %kind, at = %at, "ledger event released");
        self.persist_kind_or_warn(kind);
        Ok(true)
    }

    /// Fill level of every configured window, in kind order then shortest
    /// window first.
    pub fn usage(&mut self, now: DateTime<Utc>) -> Vec<WindowUsage> {
        let mut out = Vec::new();
        for &kind in ActionKind::all() {
            let log = self.log_mut(kind);
            log.prune(now);
            for w in &log.windows {
                let count = u32::try_from(log.count(w.duration, now)).unwrap_or(u32::MAX);
                out.push(WindowUsage {
                    kind,
                    window_secs: w.duration.as_secs(),
                    count,
                    limit: w.limit,
                    remaining: w.limit.saturating_sub(count),
                });
            }
        }
        out
    }

    /// Write every kind's history to the store.
    pub fn persist(&self) -> Result<()> {
        for &kind in ActionKind::all() {
            self.persist_kind(kind)?;
        }
        Ok(())
    }

    fn persist_kind(&self, kind: ActionKind) -> Result<()> {
        self.store
            .save_events(&self.account, kind, &self.log(kind).events)
    }

    fn persist_kind_or_warn(&self, kind: ActionKind) -> bool {
        match self.persist_kind(kind) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    account = %self.account,
                    kind = %kind,
                    error = %e,
                    "ledger save failed; continuing with in-memory history"
                );
                false
            }
        }
    }

    fn log(&self, kind: ActionKind) -> &KindLog {
        // Every kind is inserted by `new`.
        &self.logs[&kind]
    }

    fn log_mut(&mut self, kind: ActionKind) -> &mut KindLog {
        self.logs
            .entry(kind)
            .or_insert_with(|| KindLog {
                windows: Vec::new(),
                retention: Duration::ZERO,
                events: Vec::new(),
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
