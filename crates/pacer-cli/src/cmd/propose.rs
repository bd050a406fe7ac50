use crate::output::{print_json, timestamp};
use pacer_core::{
    executor::Executor,
    scheduler::{Proposal, Scheduler},
    types::Action,
};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub fn run(
    root: &Path,
    kind: &str,
    target: &str,
    wait_secs: Option<u64>,
    json: bool,
) -> anyhow::Result<()> {
    let kind = super::parse_kind(kind)?;
    let scheduler = Arc::new(super::open_scheduler(root)?);
    let action = Action::new(kind, target, chrono::Utc::now());
    let max_wait = wait_secs.map(Duration::from_secs);

    let rt = tokio::runtime::Runtime::new()?;
    let proposal = rt.block_on(propose_until_interrupted(
        scheduler,
        action,
        max_wait,
        async {
            let _ = tokio::signal::ctrl_c().await;
        },
    ))?;

    if json {
        return print_json(&proposal);
    }

    match &proposal {
        Proposal::Completed(report) => {
            println!(
                "{kind} {target}: {} at {}",
                proposal.state().as_str(),
                timestamp(report.admitted_at)
            );
            if let Some(reason) = &report.outcome.failure_reason {
                println!("  reason: {reason}");
            }
            if !report.persisted {
                println!("  warning: ledger write failed; slot held in memory only");
            }
        }
        Proposal::Denied { decision, .. } => {
            let reason = decision
                .deny_reason()
                .map(|r| r.as_str())
                .unwrap_or("unknown");
            print!("{kind} {target}: denied ({reason})");
            match decision.defer_until() {
                Some(until) => println!(", retry after {}", timestamp(until)),
                None => println!(),
            }
        }
        Proposal::Cancelled { .. } => println!("{kind} {target}: cancelled"),
    }
    Ok(())
}

/// Drive one proposal to its end. `interrupt` resolving shuts the scheduler
/// down, and the proposal then comes back as `Cancelled` on its own.
async fn propose_until_interrupted<E: Executor + 'static>(
    scheduler: Arc<Scheduler<E>>,
    action: Action,
    max_wait: Option<Duration>,
    interrupt: impl Future<Output = ()> + Send + 'static,
) -> pacer_core::Result<Proposal> {
    let watcher = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            interrupt.await;
            scheduler.shutdown();
        })
    };
    let result = match max_wait {
        Some(wait) => scheduler.propose_waiting(action, wait).await,
        None => scheduler.propose(action).await,
    };
    watcher.abort();
    result
}
