//! Action scheduler: the single entry point producers call.
//!
//! Per proposal: `Proposed → Admitted → Dispatched → Succeeded | Failed`, or
//! `Proposed → Denied`, or `Cancelled` if shutdown interrupts a wait before
//! dispatch.
//!
//! Proposals of one kind are serialized by a per-kind async lock held for
//! the whole proposal, so two producers can never both see room in a window
//! and overshoot it together. Different kinds run concurrently. The shared
//! ledger and gate sit behind a plain mutex that is only held for
//! synchronous sections, never across an `.await`.
//!
//! On admit, the quota slot is recorded *before* the executor runs. A failed
//! attempt keeps its slot unless `count_failed_attempts` is off; a timeout
//! always keeps it. Denials never touch the ledger and are never requeued
//! here.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::clock::Clock;
use crate::config::Config;
use crate::error::{PacerError, Result};
use crate::executor::Executor;
use crate::gate::{DenyReason, RateGate, RateGateDecision};
use crate::ledger::{Ledger, WindowUsage};
use crate::store::LedgerStore;
use crate::types::{Action, ActionKind, ActionOutcome, FailureReason};

// ---------------------------------------------------------------------------
// ActionState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Proposed,
    Admitted,
    Dispatched,
    Succeeded,
    Failed,
    Denied,
    Cancelled,
}

impl ActionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionState::Proposed => "proposed",
            ActionState::Admitted => "admitted",
            ActionState::Dispatched => "dispatched",
            ActionState::Succeeded => "succeeded",
            ActionState::Failed => "failed",
            ActionState::Denied => "denied",
            ActionState::Cancelled => "cancelled",
        }
    }
}

// ---------------------------------------------------------------------------
// Proposal
// ---------------------------------------------------------------------------

/// What happened to an admitted action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionReport {
    pub action: Action,
    /// The instant the quota slot was recorded.
    pub admitted_at: DateTime<Utc>,
    pub outcome: ActionOutcome,
    /// False if the ledger could not be written; the slot is still held in
    /// memory.
    pub persisted: bool,
    /// True if the slot was handed back because the attempt failed and
    /// failed attempts are configured not to count.
    pub quota_released: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Proposal {
    Denied {
        action: Action,
        decision: RateGateDecision,
    },
    Completed(ActionReport),
    Cancelled {
        action: Action,
    },
}

impl Proposal {
    pub fn action(&self) -> &Action {
        match self {
            Proposal::Denied { action, .. } | Proposal::Cancelled { action } => action,
            Proposal::Completed(report) => &report.action,
        }
    }

    /// Final state of the proposal.
    pub fn state(&self) -> ActionState {
        match self {
            Proposal::Denied { .. } => ActionState::Denied,
            Proposal::Cancelled { .. } => ActionState::Cancelled,
            Proposal::Completed(report) if report.outcome.succeeded => ActionState::Succeeded,
            Proposal::Completed(_) => ActionState::Failed,
        }
    }

    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            Proposal::Denied { decision, .. } => decision.deny_reason(),
            _ => None,
        }
    }

    pub fn defer_until(&self) -> Option<DateTime<Utc>> {
        match self {
            Proposal::Denied { decision, .. } => decision.defer_until(),
            _ => None,
        }
    }

    pub fn report(&self) -> Option<&ActionReport> {
        match self {
            Proposal::Completed(report) => Some(report),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// KindStats
// ---------------------------------------------------------------------------

/// In-process counters since the scheduler was opened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KindStats {
    pub proposed: u64,
    pub denied_quota: u64,
    pub denied_spacing: u64,
    pub denied_cooldown: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

struct Shared {
    ledger: Ledger,
    gate: RateGate,
    stats: BTreeMap<ActionKind, KindStats>,
}

pub struct Scheduler<E> {
    account: String,
    shared: Mutex<Shared>,
    turns: HashMap<ActionKind, tokio::sync::Mutex<()>>,
    executor: E,
    clock: Arc<dyn Clock>,
    store: Arc<dyn LedgerStore>,
    executor_timeout: Duration,
    count_failed_attempts: bool,
    block_cooldown: Option<Duration>,
    shutdown: watch::Sender<bool>,
}

impl<E: Executor> Scheduler<E> {
    /// Validate `config`, load the ledger and any stored cooldown.
    ///
    /// Fails with [`PacerError::Persistence`] if the stored history cannot
    /// be read.
    pub fn open(
        config: &Config,
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        executor: E,
    ) -> Result<Self> {
        config.ensure_valid()?;
        let account = config.account.id.clone();
        let now = clock.now();

        let ledger = Ledger::load(account.as_str(), store.clone(), &config.limits, now)?;
        let mut gate = RateGate::new(config.limits.clone());
        let cooldown = store.load_cooldown(&account)?;
        gate.restore_cooldown(cooldown);
        if let Some(until) = gate.cooldown_until(now) {
            tracing::info!(account = %account, until = %until, "resuming stored cooldown");
        }

        let turns = ActionKind::all()
            .iter()
            .map(|&kind| (kind, tokio::sync::Mutex::new(())))
            .collect();
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            account,
            shared: Mutex::new(Shared {
                ledger,
                gate,
                stats: BTreeMap::new(),
            }),
            turns,
            executor,
            clock,
            store,
            executor_timeout: config.executor_timeout(),
            count_failed_attempts: config.count_failed_attempts,
            block_cooldown: config.cooldown.on_suspected_block(),
            shutdown,
        })
    }

    /// Make jitter draws reproducible.
    pub fn with_jitter_seed(mut self, seed: u64) -> Self {
        let shared = self.shared.get_mut().unwrap_or_else(|p| p.into_inner());
        shared.gate.reseed(seed);
        self
    }

    pub fn with_executor_timeout(mut self, timeout: Duration) -> Self {
        self.executor_timeout = timeout;
        self
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Resolve one proposal: deny it, or admit, record and dispatch it.
    ///
    /// Waits for earlier proposals of the same kind and for the admitted
    /// jitter. Never waits out a denial.
    pub async fn propose(&self, action: Action) -> Result<Proposal> {
        self.resolve(action, None).await
    }

    /// Like [`propose`](Self::propose), but a denial whose `defer_until`
    /// falls within `max_wait` is waited out and re-checked instead of
    /// returned. The action is still dispatched at most once.
    pub async fn propose_waiting(&self, action: Action, max_wait: Duration) -> Result<Proposal> {
        self.resolve(action, Some(max_wait)).await
    }

    /// Ask the gate about `action` at the current time without recording or
    /// dispatching anything.
    pub fn evaluate(&self, action: &Action) -> Result<RateGateDecision> {
        self.check(action, self.clock.now())
    }

    /// Deny every proposal for `duration` from now. Returns the expiry.
    pub fn trigger_cooldown(&self, duration: Duration) -> Result<DateTime<Utc>> {
        let now = self.clock.now();
        let until = self.lock()?.gate.trigger_cooldown(now, duration);
        if let Err(e) = self.store.save_cooldown(&self.account, Some(until)) {
            tracing::warn!(account = %self.account, error = %e, "failed to persist cooldown");
        }
        tracing::warn!(account = %self.account, until = %until, "cooldown active");
        Ok(until)
    }

    pub fn clear_cooldown(&self) -> Result<()> {
        self.lock()?.gate.clear_cooldown();
        if let Err(e) = self.store.save_cooldown(&self.account, None) {
            tracing::warn!(account = %self.account, error = %e, "failed to persist cooldown");
        }
        tracing::info!(account = %self.account, "cooldown cleared");
        Ok(())
    }

    pub fn cooldown_until(&self) -> Result<Option<DateTime<Utc>>> {
        let now = self.clock.now();
        Ok(self.lock()?.gate.cooldown_until(now))
    }

    /// Cancel every in-progress wait. Later proposals resolve as
    /// `Cancelled` without being evaluated.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn stats(&self) -> Result<BTreeMap<ActionKind, KindStats>> {
        Ok(self.lock()?.stats.clone())
    }

    pub fn usage(&self) -> Result<Vec<WindowUsage>> {
        let now = self.clock.now();
        Ok(self.lock()?.ledger.usage(now))
    }

    /// Ledger history for `kind`, oldest first.
    pub fn events(&self, kind: ActionKind) -> Result<Vec<DateTime<Utc>>> {
        Ok(self.lock()?.ledger.events(kind).to_vec())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn resolve(&self, action: Action, max_wait: Option<Duration>) -> Result<Proposal> {
        let kind = action.kind();
        // Time spent queued behind the same kind counts against `max_wait`.
        let deadline = max_wait
            .and_then(|w| chrono::Duration::from_std(w).ok())
            .and_then(|w| self.clock.now().checked_add_signed(w));
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return self.cancelled(action);
        }

        let _turn = tokio::select! {
            turn = self.turns[&kind].lock() => turn,
            _ = shutdown.changed() => return self.cancelled(action),
        };
        self.transition(&action, ActionState::Proposed);
        self.bump(kind, |s| s.proposed += 1)?;

        let mut jittered = false;
        let admitted_at = loop {
            let now = self.clock.now();
            let decision = self.check(&action, now)?;
            match decision {
                RateGateDecision::Admit { jitter } if jittered || jitter.is_zero() => break now,
                RateGateDecision::Admit { jitter } => {
                    tracing::debug!(
                        id = %action.id(),
                        kind = %kind,
                        jitter_ms = u64::try_from(jitter.as_millis()).unwrap_or(u64::MAX),
                        "jitter before dispatch"
                    );
                    if !self.pause(&mut shutdown, jitter).await {
                        return self.cancelled(action);
                    }
                    // Re-check at the new time; a cooldown may have started.
                    jittered = true;
                }
                RateGateDecision::Deny { reason, defer_until } => match (deadline, defer_until) {
                    (Some(deadline), Some(until)) if until <= deadline => {
                        tracing::debug!(
                            id = %action.id(),
                            kind = %kind,
                            reason = %reason,
                            until = %until,
                            "waiting out denial"
                        );
                        let wait = (until - now).to_std().unwrap_or_default();
                        if !self.pause(&mut shutdown, wait).await {
                            return self.cancelled(action);
                        }
                        jittered = false;
                    }
                    _ => return self.denied(action, decision),
                },
            }
        };

        self.transition(&action, ActionState::Admitted);
        let receipt = self.lock()?.ledger.record(kind, admitted_at)?;

        self.transition(&action, ActionState::Dispatched);
        let mut outcome =
            match tokio::time::timeout(self.executor_timeout, self.executor.perform(&action)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!(
                        id = %action.id(),
                        kind = %kind,
                        timeout_ms = u64::try_from(self.executor_timeout.as_millis()).unwrap_or(u64::MAX),
                        "executor timed out"
                    );
                    ActionOutcome::failure(self.clock.now(), FailureReason::Timeout)
                }
            };
        if outcome.succeeded {
            outcome.failure_reason = None;
        } else if outcome.failure_reason.is_none() {
            outcome.failure_reason = Some(FailureReason::Error("unspecified failure".into()));
        }

        let mut quota_released = false;
        match &outcome.failure_reason {
            None => {
                tracing::info!(
                    id = %action.id(),
                    kind = %kind,
                    target = %action.target(),
                    "action succeeded"
                );
                self.bump(kind, |s| s.succeeded += 1)?;
                self.transition(&action, ActionState::Succeeded);
            }
            Some(reason) => {
                tracing::warn!(
                    id = %action.id(),
                    kind = %kind,
                    target = %action.target(),
                    reason = %reason,
                    "action failed"
                );
                if *reason == FailureReason::SuspectedBlock {
                    if let Some(duration) = self.block_cooldown {
                        self.trigger_cooldown(duration)?;
                    }
                }
                if !self.count_failed_attempts && *reason != FailureReason::Timeout {
                    quota_released = self.lock()?.ledger.release(kind, admitted_at)?;
                }
                self.bump(kind, |s| s.failed += 1)?;
                self.transition(&action, ActionState::Failed);
            }
        }

        Ok(Proposal::Completed(ActionReport {
            action,
            admitted_at,
            outcome,
            persisted: receipt.persisted,
            quota_released,
        }))
    }

    fn check(&self, action: &Action, now: DateTime<Utc>) -> Result<RateGateDecision> {
        let mut shared = self.lock()?;
        let Shared { ledger, gate, .. } = &mut *shared;
        Ok(gate.check(ledger, action, now))
    }

    /// Sleep on the injected clock. False if shutdown interrupted the wait.
    async fn pause(&self, shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
        tokio::select! {
            _ = self.clock.sleep(duration) => true,
            _ = shutdown.changed() => false,
        }
    }

    fn denied(&self, action: Action, decision: RateGateDecision) -> Result<Proposal> {
        let reason = decision.deny_reason();
        self.bump(action.kind(), |s| match reason {
            Some(DenyReason::QuotaExceeded) => s.denied_quota += 1,
            Some(DenyReason::TooSoonAfterLast) => s.denied_spacing += 1,
            Some(DenyReason::CooldownActive) => s.denied_cooldown += 1,
            None => {}
        })?;
        tracing::debug!(
            id = %action.id(),
            kind = %action.kind(),
            reason = ?reason,
            defer_until = ?decision.defer_until(),
            "action denied"
        );
        self.transition(&action, ActionState::Denied);
        Ok(Proposal::Denied { action, decision })
    }

    fn cancelled(&self, action: Action) -> Result<Proposal> {
        self.bump(action.kind(), |s| s.cancelled += 1)?;
        self.transition(&action, ActionState::Cancelled);
        Ok(Proposal::Cancelled { action })
    }

    fn bump(&self, kind: ActionKind, f: impl FnOnce(&mut KindStats)) -> Result<()> {
        f(self.lock()?.stats.entry(kind).or_default());
        Ok(())
    }

    fn transition(&self, action: &Action, state: ActionState) {
        tracing::trace!(
            id = %action.id(),
            kind = %action.kind(),
            state = state.as_str(),
            "action state"
        );
    }

    fn lock(&self) -> Result<MutexGuard<'_, Shared>> {
        self.shared
            .lock()
            .map_err(|_| PacerError::InvalidState("scheduler state lock poisoned".into()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, Sleep, SystemClock};
    use crate::config::{JitterRange, KindLimits, LimitsConfig};
    use crate::store::MemoryLedgerStore;
    use chrono::{Duration as CDur, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DAY: Duration = Duration::from_secs(86_400);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + CDur::seconds(secs)
    }

    fn config_with(limits: LimitsConfig) -> Config {
        let mut config = Config::new("acct");
        config.limits = limits;
        config
    }

    /// Follow: 5 per 24h, 30s apart. Everything else unlimited.
    fn follow_config() -> Config {
        let mut limits = LimitsConfig::uniform(KindLimits::unlimited());
        limits.set(
            ActionKind::Follow,
            KindLimits::unlimited()
                .with_window(DAY, 5)
                .with_min_spacing(Duration::from_secs(30)),
        );
        config_with(limits)
    }

    struct ScriptedExecutor {
        clock: ManualClock,
        failure: Option<FailureReason>,
        calls: AtomicUsize,
    }

    impl ScriptedExecutor {
        fn new(clock: &ManualClock, failure: Option<FailureReason>) -> Arc<Self> {
            Arc::new(Self {
                clock: clock.clone(),
                failure,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Executor for ScriptedExecutor {
        async fn perform(&self, _action: &Action) -> ActionOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.failure {
                None => ActionOutcome::success(self.clock.now()),
                Some(reason) => ActionOutcome::failure(self.clock.now(), reason.clone()),
            }
        }
    }

    struct HangingExecutor;

    impl Executor for HangingExecutor {
        async fn perform(&self, _action: &Action) -> ActionOutcome {
            std::future::pending().await
        }
    }

    fn open(
        config: &Config,
        store: Arc<dyn LedgerStore>,
        clock: &ManualClock,
        failure: Option<FailureReason>,
    ) -> (Scheduler<Arc<ScriptedExecutor>>, Arc<ScriptedExecutor>) {
        let executor = ScriptedExecutor::new(clock, failure);
        let scheduler = Scheduler::open(config, store, Arc::new(clock.clone()), executor.clone())
            .unwrap()
            .with_jitter_seed(1);
        (scheduler, executor)
    }

    /// Manual time whose `sleep` parks until the test releases it, so the
    /// test can act while a proposal is mid-wait.
    struct GatedClock {
        inner: ManualClock,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    impl GatedClock {
        fn new(start: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self {
                inner: ManualClock::new(start),
                entered: tokio::sync::Notify::new(),
                release: tokio::sync::Notify::new(),
            })
        }
    }

    impl Clock for GatedClock {
        fn now(&self) -> DateTime<Utc> {
            self.inner.now()
        }

        fn sleep(&self, duration: Duration) -> Sleep<'_> {
            Box::pin(async move {
                self.entered.notify_one();
                self.release.notified().await;
                self.inner.advance(duration);
            })
        }
    }

    fn open_gated(
        config: &Config,
        clock: &Arc<GatedClock>,
    ) -> (Arc<Scheduler<Arc<ScriptedExecutor>>>, Arc<ScriptedExecutor>) {
        let executor = ScriptedExecutor::new(&clock.inner, None);
        let scheduler = Scheduler::open(
            config,
            Arc::new(MemoryLedgerStore::new()),
            clock.clone(),
            executor.clone(),
        )
        .unwrap()
        .with_jitter_seed(1);
        (Arc::new(scheduler), executor)
    }

    async fn propose_at<E: Executor>(
        scheduler: &Scheduler<E>,
        clock: &ManualClock,
        kind: ActionKind,
        secs: i64,
    ) -> Proposal {
        clock.set(at(secs));
        scheduler
            .propose(Action::new(kind, format!("target-{secs}"), at(secs)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn daily_follow_scenario() {
        let clock = ManualClock::new(t0());
        let (scheduler, executor) =
            open(&follow_config(), Arc::new(MemoryLedgerStore::new()), &clock, None);

        for s in [0, 31, 62, 93, 124] {
            let p = propose_at(&scheduler, &clock, ActionKind::Follow, s).await;
            assert_eq!(p.state(), ActionState::Succeeded, "t={s}");
        }
        let sixth = propose_at(&scheduler, &clock, ActionKind::Follow, 150).await;
        assert_eq!(sixth.deny_reason(), Some(DenyReason::QuotaExceeded));

        let seventh = propose_at(&scheduler, &clock, ActionKind::Follow, 90_000).await;
        assert_eq!(seventh.state(), ActionState::Succeeded);

        assert_eq!(executor.calls(), 6);
        let stats = scheduler.stats().unwrap();
        let follow = &stats[&ActionKind::Follow];
        assert_eq!(follow.proposed, 7);
        assert_eq!(follow.denied_quota, 1);
        assert_eq!(follow.succeeded, 6);
    }

    #[tokio::test]
    async fn failed_attempts_consume_quota() {
        let clock = ManualClock::new(t0());
        let (scheduler, executor) = open(
            &follow_config(),
            Arc::new(MemoryLedgerStore::new()),
            &clock,
            Some(FailureReason::Error("http 500".into())),
        );

        for s in [0, 31, 62, 93, 124] {
            let p = propose_at(&scheduler, &clock, ActionKind::Follow, s).await;
            assert_eq!(p.state(), ActionState::Failed);
            assert!(!p.report().unwrap().quota_released);
        }
        let sixth = propose_at(&scheduler, &clock, ActionKind::Follow, 200).await;
        assert_eq!(sixth.deny_reason(), Some(DenyReason::QuotaExceeded));
        assert_eq!(executor.calls(), 5);
        assert_eq!(scheduler.events(ActionKind::Follow).unwrap().len(), 5);
    }

    #[tokio::test]
    async fn failed_attempts_can_be_released() {
        let clock = ManualClock::new(t0());
        let mut config = follow_config();
        config.count_failed_attempts = false;
        let (scheduler, _) = open(
            &config,
            Arc::new(MemoryLedgerStore::new()),
            &clock,
            Some(FailureReason::Error("http 500".into())),
        );

        let p = propose_at(&scheduler, &clock, ActionKind::Follow, 0).await;
        assert!(p.report().unwrap().quota_released);
        assert!(scheduler.events(ActionKind::Follow).unwrap().is_empty());
    }

    #[tokio::test]
    async fn timeout_is_a_failure_that_always_counts() {
        let clock = ManualClock::new(t0());
        let mut config = follow_config();
        config.count_failed_attempts = false;
        let scheduler = Scheduler::open(
            &config,
            Arc::new(MemoryLedgerStore::new()),
            Arc::new(clock.clone()),
            HangingExecutor,
        )
        .unwrap()
        .with_executor_timeout(Duration::from_millis(20));

        let p = propose_at(&scheduler, &clock, ActionKind::Follow, 0).await;
        let report = p.report().unwrap();
        assert_eq!(report.outcome.failure_reason, Some(FailureReason::Timeout));
        assert!(!report.quota_released);
        assert_eq!(scheduler.events(ActionKind::Follow).unwrap(), vec![at(0)]);
    }

    #[tokio::test]
    async fn suspected_block_starts_cooldown() {
        let clock = ManualClock::new(t0());
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryLedgerStore::new());
        let mut config = follow_config();
        config.cooldown.on_suspected_block_secs = 600;
        let (scheduler, _) = open(&config, store.clone(), &clock, Some(FailureReason::SuspectedBlock));

        let p = propose_at(&scheduler, &clock, ActionKind::Follow, 0).await;
        assert_eq!(p.state(), ActionState::Failed);

        let like = propose_at(&scheduler, &clock, ActionKind::Like, 1).await;
        assert_eq!(like.deny_reason(), Some(DenyReason::CooldownActive));
        assert_eq!(like.defer_until(), Some(at(600)));
        assert_eq!(store.load_cooldown("acct").unwrap(), Some(at(600)));
    }

    #[tokio::test]
    async fn cooldown_window_is_half_open() {
        let clock = ManualClock::new(at(1000));
        let (scheduler, _) = open(&follow_config(), Arc::new(MemoryLedgerStore::new()), &clock, None);

        scheduler.trigger_cooldown(Duration::from_secs(300)).unwrap();
        for s in [1000, 1150, 1299] {
            let p = propose_at(&scheduler, &clock, ActionKind::Comment, s).await;
            assert_eq!(p.deny_reason(), Some(DenyReason::CooldownActive), "t={s}");
        }
        let p = propose_at(&scheduler, &clock, ActionKind::Comment, 1300).await;
        assert_eq!(p.state(), ActionState::Succeeded);
        assert_eq!(scheduler.events(ActionKind::Comment).unwrap(), vec![at(1300)]);
    }

    #[tokio::test]
    async fn clear_cooldown_reopens_immediately() {
        let clock = ManualClock::new(t0());
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryLedgerStore::new());
        let (scheduler, _) = open(&follow_config(), store.clone(), &clock, None);

        scheduler.trigger_cooldown(Duration::from_secs(3600)).unwrap();
        scheduler.clear_cooldown().unwrap();
        assert_eq!(scheduler.cooldown_until().unwrap(), None);
        assert_eq!(store.load_cooldown("acct").unwrap(), None);
        let p = propose_at(&scheduler, &clock, ActionKind::Like, 1).await;
        assert_eq!(p.state(), ActionState::Succeeded);
    }

    #[tokio::test]
    async fn quota_survives_restart() {
        let clock = ManualClock::new(t0());
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryLedgerStore::new());
        {
            let (scheduler, _) = open(&follow_config(), store.clone(), &clock, None);
            for s in [0, 31, 62, 93, 124] {
                propose_at(&scheduler, &clock, ActionKind::Follow, s).await;
            }
        }

        let (restarted, executor) = open(&follow_config(), store, &clock, None);
        let p = propose_at(&restarted, &clock, ActionKind::Follow, 200).await;
        assert_eq!(p.deny_reason(), Some(DenyReason::QuotaExceeded));
        assert_eq!(executor.calls(), 0);
    }

    #[tokio::test]
    async fn cooldown_survives_restart() {
        let clock = ManualClock::new(t0());
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryLedgerStore::new());
        {
            let (scheduler, _) = open(&follow_config(), store.clone(), &clock, None);
            scheduler.trigger_cooldown(Duration::from_secs(120)).unwrap();
        }
        let (restarted, _) = open(&follow_config(), store, &clock, None);
        assert_eq!(restarted.cooldown_until().unwrap(), Some(at(120)));
        let p = propose_at(&restarted, &clock, ActionKind::Like, 60).await;
        assert_eq!(p.deny_reason(), Some(DenyReason::CooldownActive));
    }

    #[tokio::test]
    async fn jitter_delays_admission() {
        let clock = ManualClock::new(t0());
        let config = config_with(LimitsConfig::uniform(
            KindLimits::unlimited().with_jitter(JitterRange::new(10, 10)),
        ));
        let (scheduler, _) = open(&config, Arc::new(MemoryLedgerStore::new()), &clock, None);

        let p = propose_at(&scheduler, &clock, ActionKind::Like, 0).await;
        assert_eq!(p.report().unwrap().admitted_at, at(10));
        assert_eq!(scheduler.events(ActionKind::Like).unwrap(), vec![at(10)]);
    }

    #[tokio::test]
    async fn propose_waiting_sits_out_spacing() {
        let clock = ManualClock::new(t0());
        let (scheduler, executor) =
            open(&follow_config(), Arc::new(MemoryLedgerStore::new()), &clock, None);
        propose_at(&scheduler, &clock, ActionKind::Follow, 0).await;

        let p = scheduler
            .propose_waiting(Action::new(ActionKind::Follow, "u2", at(0)), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(p.state(), ActionState::Succeeded);
        assert_eq!(p.report().unwrap().admitted_at, at(30));
        assert_eq!(executor.calls(), 2);
    }

    #[tokio::test]
    async fn propose_waiting_gives_up_past_max_wait() {
        let clock = ManualClock::new(t0());
        let (scheduler, _) = open(&follow_config(), Arc::new(MemoryLedgerStore::new()), &clock, None);
        propose_at(&scheduler, &clock, ActionKind::Follow, 0).await;

        let p = scheduler
            .propose_waiting(Action::new(ActionKind::Follow, "u2", at(0)), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(p.deny_reason(), Some(DenyReason::TooSoonAfterLast));
        assert_eq!(p.defer_until(), Some(at(30)));
        assert_eq!(clock.now(), at(0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_producers_never_overshoot() {
        let clock = ManualClock::new(t0());
        let config = config_with(LimitsConfig::uniform(
            KindLimits::unlimited().with_window(DAY, 5),
        ));
        let (scheduler, executor) = open(&config, Arc::new(MemoryLedgerStore::new()), &clock, None);
        let scheduler = Arc::new(scheduler);

        let mut handles = Vec::new();
        for i in 0..20 {
            let scheduler = scheduler.clone();
            handles.push(tokio::spawn(async move {
                scheduler
                    .propose(Action::new(ActionKind::Like, format!("post-{i}"), at(0)))
                    .await
                    .unwrap()
            }));
        }

        let mut completed = 0;
        let mut denied = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Proposal::Completed(_) => completed += 1,
                Proposal::Denied { decision, .. } => {
                    assert_eq!(decision.deny_reason(), Some(DenyReason::QuotaExceeded));
                    denied += 1;
                }
                Proposal::Cancelled { .. } => panic!("nothing was cancelled"),
            }
        }
        assert_eq!(completed, 5);
        assert_eq!(denied, 15);
        assert_eq!(executor.calls(), 5);
        assert_eq!(scheduler.events(ActionKind::Like).unwrap().len(), 5);
    }

    #[tokio::test]
    async fn shutdown_cancels_jitter_wait_without_recording() {
        let config = config_with(LimitsConfig::uniform(
            KindLimits::unlimited().with_jitter(JitterRange::new(60, 60)),
        ));
        let clock = ManualClock::new(t0());
        let executor = ScriptedExecutor::new(&clock, None);
        let scheduler = Arc::new(
            Scheduler::open(
                &config,
                Arc::new(MemoryLedgerStore::new()),
                Arc::new(SystemClock),
                executor.clone(),
            )
            .unwrap(),
        );

        let task = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                scheduler
                    .propose(Action::new(ActionKind::Comment, "post", Utc::now()))
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.shutdown();

        let p = task.await.unwrap();
        assert_eq!(p.state(), ActionState::Cancelled);
        assert!(scheduler.events(ActionKind::Comment).unwrap().is_empty());
        assert_eq!(executor.calls(), 0);

        let late = scheduler
            .propose(Action::new(ActionKind::Like, "post", Utc::now()))
            .await
            .unwrap();
        assert_eq!(late.state(), ActionState::Cancelled);
    }

    #[tokio::test]
    async fn propose_waiting_denies_at_once_when_a_longer_window_is_full() {
        let clock = ManualClock::new(t0());
        let mut limits = LimitsConfig::uniform(KindLimits::unlimited());
        limits.set(
            ActionKind::Like,
            KindLimits::unlimited()
                .with_window(Duration::from_secs(3600), 2)
                .with_window(DAY, 2),
        );
        let (scheduler, executor) =
            open(&config_with(limits), Arc::new(MemoryLedgerStore::new()), &clock, None);
        propose_at(&scheduler, &clock, ActionKind::Like, 0).await;
        propose_at(&scheduler, &clock, ActionKind::Like, 10).await;

        clock.set(at(20));
        let p = scheduler
            .propose_waiting(Action::new(ActionKind::Like, "post", at(20)), Duration::from_secs(7200))
            .await
            .unwrap();
        assert_eq!(p.deny_reason(), Some(DenyReason::QuotaExceeded));
        assert_eq!(p.defer_until(), Some(at(86_400)));
        assert_eq!(clock.now(), at(20));
        assert_eq!(executor.calls(), 2);
    }

    #[tokio::test]
    async fn cooldown_started_during_jitter_blocks_dispatch() {
        let config = config_with(LimitsConfig::uniform(
            KindLimits::unlimited().with_jitter(JitterRange::new(10, 10)),
        ));
        let clock = GatedClock::new(t0());
        let (scheduler, executor) = open_gated(&config, &clock);

        let task = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                scheduler
                    .propose(Action::new(ActionKind::Comment, "post", t0()))
                    .await
                    .unwrap()
            })
        };
        clock.entered.notified().await;
        scheduler.trigger_cooldown(Duration::from_secs(600)).unwrap();
        clock.release.notify_one();

        let p = task.await.unwrap();
        assert_eq!(p.deny_reason(), Some(DenyReason::CooldownActive));
        assert_eq!(p.defer_until(), Some(at(600)));
        assert!(scheduler.events(ActionKind::Comment).unwrap().is_empty());
        assert_eq!(executor.calls(), 0);
        assert_eq!(scheduler.stats().unwrap()[&ActionKind::Comment].denied_cooldown, 1);
    }

    #[tokio::test]
    async fn max_wait_counts_time_queued_behind_same_kind() {
        let mut limits = LimitsConfig::uniform(KindLimits::unlimited());
        limits.set(
            ActionKind::Follow,
            KindLimits::unlimited()
                .with_min_spacing(Duration::from_secs(30))
                .with_jitter(JitterRange::new(10, 10)),
        );
        let clock = GatedClock::new(t0());
        let (scheduler, executor) = open_gated(&config_with(limits), &clock);

        let first = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                scheduler
                    .propose(Action::new(ActionKind::Follow, "u1", t0()))
                    .await
                    .unwrap()
            })
        };
        // The first proposal now holds the Follow turn inside its jitter wait.
        clock.entered.notified().await;

        let second = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                scheduler
                    .propose_waiting(Action::new(ActionKind::Follow, "u2", t0()), Duration::from_secs(30))
                    .await
                    .unwrap()
            })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        clock.release.notify_one();

        let p = first.await.unwrap();
        assert_eq!(p.report().unwrap().admitted_at, at(10));

        // Queued from t=0 with 30s to spare, so spacing until t=40 is out of reach.
        let p = tokio::time::timeout(Duration::from_secs(5), second)
            .await
            .expect("second proposal should not wait")
            .unwrap();
        assert_eq!(p.deny_reason(), Some(DenyReason::TooSoonAfterLast));
        assert_eq!(p.defer_until(), Some(at(40)));
        assert_eq!(clock.now(), at(10));
        assert_eq!(executor.calls(), 1);
    }

    #[tokio::test]
    async fn evaluate_does_not_record() {
        let clock = ManualClock::new(t0());
        let (scheduler, executor) =
            open(&follow_config(), Arc::new(MemoryLedgerStore::new()), &clock, None);
        let decision = scheduler
            .evaluate(&Action::new(ActionKind::Follow, "u", at(0)))
            .unwrap();
        assert!(decision.is_admit());
        assert!(scheduler.events(ActionKind::Follow).unwrap().is_empty());
        assert_eq!(executor.calls(), 0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let clock = ManualClock::new(t0());
        let mut config = follow_config();
        config.limits.like.jitter = JitterRange::new(9, 1);
        let result = Scheduler::open(
            &config,
            Arc::new(MemoryLedgerStore::new()),
            Arc::new(clock.clone()),
            ScriptedExecutor::new(&clock, None),
        );
        assert!(matches!(result, Err(PacerError::InvalidConfig(_))));
    }

    #[test]
    fn unreadable_history_is_fatal() {
        struct Unreadable;
        impl LedgerStore for Unreadable {
            fn load_events(&self, _: &str, _: ActionKind) -> Result<Vec<DateTime<Utc>>> {
                Err(PacerError::Persistence("corrupt ledger".into()))
            }
            fn save_events(&self, _: &str, _: ActionKind, _: &[DateTime<Utc>]) -> Result<()> {
                Ok(())
            }
            fn load_cooldown(&self, _: &str) -> Result<Option<DateTime<Utc>>> {
                Ok(None)
            }
            fn save_cooldown(&self, _: &str, _: Option<DateTime<Utc>>) -> Result<()> {
                Ok(())
            }
        }

        let clock = ManualClock::new(t0());
        let result = Scheduler::open(
            &follow_config(),
            Arc::new(Unreadable),
            Arc::new(clock.clone()),
            ScriptedExecutor::new(&clock, None),
        );
        assert!(matches!(result, Err(PacerError::Persistence(_))));
    }

    #[test]
    fn proposal_serializes_with_status() {
        let action = Action::new(ActionKind::Like, "post", t0());
        let p = Proposal::Denied {
            action,
            decision: RateGateDecision::Deny {
                reason: DenyReason::TooSoonAfterLast,
                defer_until: Some(at(30)),
            },
        };
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["status"], "denied");
        assert_eq!(json["decision"]["reason"], "too_soon_after_last");
        assert_eq!(json["action"]["kind"], "like");
    }
}
