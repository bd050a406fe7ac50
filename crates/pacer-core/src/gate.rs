//! Admission decisions for proposed actions.
//!
//! Rules, first match wins:
//!
//! 1. a global cooldown is active → `CooldownActive`
//! 2. any window of the kind is full → `QuotaExceeded`, deferred until the
//!    last of the full windows reopens
//! 3. the last admission of the same kind is closer than `min_spacing` →
//!    `TooSoonAfterLast`
//! 4. otherwise admit, with an advisory jitter drawn from the kind's range
//!
//! The cooldown overrides quota math entirely. A full window is reported
//! ahead of spacing since it is the longer wait. `check` never mutates the
//! ledger's history; only pruning happens.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::LimitsConfig;
use crate::ledger::Ledger;
use crate::types::Action;

// ---------------------------------------------------------------------------
// RateGateDecision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    QuotaExceeded,
    TooSoonAfterLast,
    CooldownActive,
}

impl DenyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DenyReason::QuotaExceeded => "quota_exceeded",
            DenyReason::TooSoonAfterLast => "too_soon_after_last",
            DenyReason::CooldownActive => "cooldown_active",
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RateGateDecision {
    /// Run the action after waiting `jitter`. The jitter is advisory and
    /// counts toward nothing.
    Admit {
        #[serde(with = "duration_ms")]
        jitter: Duration,
    },
    /// Not now. `defer_until` is the earliest instant at which the rule that
    /// denied would let the same proposal through, when one is known.
    Deny {
        reason: DenyReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        defer_until: Option<DateTime<Utc>>,
    },
}

impl RateGateDecision {
    pub fn is_admit(&self) -> bool {
        matches!(self, RateGateDecision::Admit { .. })
    }

    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            RateGateDecision::Deny { reason, .. } => Some(*reason),
            RateGateDecision::Admit { .. } => None,
        }
    }

    pub fn defer_until(&self) -> Option<DateTime<Utc>> {
        match self {
            RateGateDecision::Deny { defer_until, .. } => *defer_until,
            RateGateDecision::Admit { .. } => None,
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

// ---------------------------------------------------------------------------
// RateGate
// ---------------------------------------------------------------------------

pub struct RateGate {
    limits: LimitsConfig,
    cooldown_until: Option<DateTime<Utc>>,
    rng: StdRng,
}

impl RateGate {
    pub fn new(limits: LimitsConfig) -> Self {
        Self::with_rng(limits, StdRng::from_entropy())
    }

    /// Deterministic jitter, for tests and replays.
    pub fn seeded(limits: LimitsConfig, seed: u64) -> Self {
        Self::with_rng(limits, StdRng::seed_from_u64(seed))
    }

    fn with_rng(limits: LimitsConfig, rng: StdRng) -> Self {
        Self {
            limits,
            cooldown_until: None,
            rng,
        }
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub fn check(&mut self, ledger: &mut Ledger, action: &Action, now: DateTime<Utc>) -> RateGateDecision {
        let kind = action.kind();

        if let Some(until) = self.cooldown_until.filter(|until| now < *until) {
            return RateGateDecision::Deny {
                reason: DenyReason::CooldownActive,
                defer_until: Some(until),
            };
        }

        // Latest reopening among the full windows; none if one never reopens.
        let mut full = false;
        let mut reopens_at = Some(DateTime::<Utc>::MIN_UTC);
        for window in ledger.windows(kind).to_vec() {
            if ledger.count_in_window(kind, window.duration, now) < window.limit as usize {
                continue;
            }
            full = true;
            reopens_at = reopens_at
                .zip(ledger.window_reopens_at(kind, window, now))
                .map(|(a, b)| a.max(b));
        }
        if full {
            return RateGateDecision::Deny {
                reason: DenyReason::QuotaExceeded,
                defer_until: reopens_at,
            };
        }

        let kind_limits = self.limits.for_kind(kind);
        let spacing = kind_limits.min_spacing();
        if let (false, Some(last)) = (spacing.is_zero(), ledger.last_admitted(kind)) {
            if let Some(ready_at) = chrono::Duration::from_std(spacing)
                .ok()
                .and_then(|s| last.checked_add_signed(s))
            {
                if now < ready_at {
                    return RateGateDecision::Deny {
                        reason: DenyReason::TooSoonAfterLast,
                        defer_until: Some(ready_at),
                    };
                }
            }
        }

        let (lo, hi) = kind_limits.jitter.bounds_ms();
        let jitter_ms = if hi == 0 { 0 } else { self.rng.gen_range(lo..=hi) };
        RateGateDecision::Admit {
            jitter: Duration::from_millis(jitter_ms),
        }
    }

    /// Deny everything until `now + duration`. An active cooldown that ends
    /// later is kept. Returns the resulting expiry.
    pub fn trigger_cooldown(&mut self, now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
        let until = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let until = match self.cooldown_until {
            Some(existing) if existing > until => existing,
            _ => until,
        };
        self.cooldown_until = Some(until);
        until
    }

    pub fn clear_cooldown(&mut self) {
        self.cooldown_until = None;
    }

    /// Reinstate a cooldown expiry read back from storage.
    pub fn restore_cooldown(&mut self, until: Option<DateTime<Utc>>) {
        self.cooldown_until = until;
    }

    /// The cooldown expiry if it is still in the future at `now`.
    pub fn cooldown_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.cooldown_until.filter(|until| now < *until)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
