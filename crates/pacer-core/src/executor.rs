//! The boundary to whatever actually performs an action against the
//! platform (browser driver, HTTP client). The scheduler only ever talks to
//! an [`Executor`].

use std::future::Future;
use std::sync::Arc;

use crate::clock::Clock;
use crate::types::{Action, ActionOutcome};

pub trait Executor: Send + Sync {
    /// Perform an admitted action. Ordinary failures are reported through
    /// the returned outcome, never by panicking.
    fn perform(&self, action: &Action) -> impl Future<Output = ActionOutcome> + Send;
}

impl<E: Executor> Executor for Arc<E> {
    fn perform(&self, action: &Action) -> impl Future<Output = ActionOutcome> + Send {
        (**self).perform(action)
    }
}

/// Logs the action and reports success without touching the platform.
pub struct DryRunExecutor {
    clock: Arc<dyn Clock>,
}

impl DryRunExecutor {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl Executor for DryRunExecutor {
    async fn perform(&self, action: &Action) -> ActionOutcome {
        tracing::info!(
            id = %action.id(),
            kind = %action.kind(),
            target = %action.target(),
            "dry run: action not sent"
        );
        ActionOutcome::success(self.clock.now())
    }
}
