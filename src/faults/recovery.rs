// Recovery ledger for two-step faults
//
// `pause` and `kill_restart` leave a target degraded between their first and
// second runtime call. The step still owed is recorded here so an
// interrupted run can put the target back before exiting.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::runtime::{CommandOutput, RuntimeClient};

/// Compensating call still owed to a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingStep {
    Unpause,
    Start,
}

/// Result of one compensating call made during drain
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryOutcome {
    pub target: String,
    pub step: PendingStep,
    pub output: CommandOutput,
}

#[derive(Debug, Clone, Default)]
pub struct RecoveryLedger {
    pending: Arc<Mutex<BTreeMap<String, PendingStep>>>,
}

impl RecoveryLedger {
    pub fn register(&self, target: &str, step: PendingStep) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(target.to_string(), step);
        }
    }

    pub fn clear(&self, target: &str) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(target);
        }
    }

    /// Snapshot of the outstanding steps
    pub fn pending(&self) -> BTreeMap<String, PendingStep> {
        self.pending
            .lock()
            .map(|pending| pending.clone())
            .unwrap_or_default()
    }

    /// Run every outstanding compensating call and empty the ledger
    pub async fn drain(&self, runtime: &RuntimeClient) -> Vec<RecoveryOutcome> {
        let steps = match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(_) => return Vec::new(),
        };

        let mut outcomes = Vec::with_capacity(steps.len());
        for (target, step) in steps {
            let output = match step {
                PendingStep::Unpause => runtime.unpause(&target).await,
                PendingStep::Start => runtime.start(&target).await,
            };
            match &output.error {
                None => info!(container = %target, ?step, "Recovered target"),
                Some(e) => warn!(container = %target, ?step, error = %e, "Recovery step failed"),
            }
            outcomes.push(RecoveryOutcome { target, step, output });
        }
        outcomes
    }
}
