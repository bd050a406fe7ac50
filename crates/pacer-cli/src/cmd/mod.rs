pub mod check;
pub mod config;
pub mod cooldown;
pub mod init;
pub mod propose;
pub mod status;

use anyhow::Context;
use pacer_core::{
    clock::{Clock, SystemClock},
    config::Config,
    executor::DryRunExecutor,
    paths,
    scheduler::Scheduler,
    store::RedbLedgerStore,
    types::ActionKind,
};
use std::path::Path;
use std::sync::Arc;

/// Load config and ledger from `root` and build a scheduler that dispatches
/// to the dry-run executor.
pub fn open_scheduler(root: &Path) -> anyhow::Result<Scheduler<DryRunExecutor>> {
    let config = Config::load(root).context("failed to load config")?;
    let store = RedbLedgerStore::open(&paths::ledger_path(root)).context("failed to open ledger")?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let executor = DryRunExecutor::new(clock.clone());
    let scheduler = Scheduler::open(&config, Arc::new(store), clock, executor)
        .context("failed to start scheduler")?;
    Ok(scheduler)
}

pub fn parse_kind(kind: &str) -> anyhow::Result<ActionKind> {
    Ok(kind.parse::<ActionKind>()?)
}
