//! Batch operation runner.
//!
//! Applies one per-VM operation to every resolved target, one after another,
//! against a single inventory snapshot. A failing target becomes a recorded
//! outcome; it never stops the rest of the batch. Cancellation stops new
//! targets from starting and leaves completed ones as they are.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::directory::{Inventory, Vm};
use crate::error::QuickVmError;
use crate::target::TargetSet;

/// Names an operation for progress output and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    /// `"stop"`
    pub name: &'static str,
    /// `"Stopping"`
    pub active: &'static str,
    /// `"stopped"`
    pub done: &'static str,
}

impl Operation {
    pub const START: Operation = Operation {
        name: "start",
        active: "Starting",
        done: "started",
    };
    pub const STOP: Operation = Operation {
        name: "stop",
        active: "Stopping",
        done: "stopped",
    };
    pub const RESTART: Operation = Operation {
        name: "restart",
        active: "Restarting",
        done: "restarted",
    };
}

/// What happened to one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    pub index: usize,
    pub name: String,
    pub success: bool,
    /// Success message, or the error text including shell diagnostics.
    pub message: String,
}

/// Aggregate of one batch run. Outcomes are in ascending target order;
/// names recorded with [`BatchResult::record_unresolved`] follow them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult {
    pub operation: &'static str,
    pub outcomes: Vec<OperationOutcome>,
    pub success_count: usize,
    pub fail_count: usize,
    /// Number of targets requested, including any skipped by cancellation.
    pub total_count: usize,
    pub cancelled: bool,
}

impl BatchResult {
    pub fn skipped_count(&self) -> usize {
        self.total_count - self.success_count - self.fail_count
    }

    pub fn all_succeeded(&self) -> bool {
        self.fail_count == 0 && !self.cancelled
    }

    /// Count a requested target that has no VM in the inventory as failed.
    /// It carries index 0 since it has no position in the listing.
    pub fn record_unresolved(&mut self, name: &str) {
        let error = QuickVmError::VmNotFound {
            name: name.to_string(),
        };
        tracing::warn!(vm = %name, operation = self.operation, "not in inventory");
        self.outcomes.push(OperationOutcome {
            index: 0,
            name: name.to_string(),
            success: false,
            message: error.to_string(),
        });
        self.fail_count += 1;
        self.total_count += 1;
    }

    /// `Ok` when every target succeeded, `BatchFailed` otherwise.
    pub fn into_status(self) -> Result<(), QuickVmError> {
        if self.all_succeeded() {
            Ok(())
        } else {
            Err(QuickVmError::BatchFailed {
                failed: self.fail_count + self.skipped_count(),
                total: self.total_count,
            })
        }
    }
}

/// Receives per-target progress while a batch runs.
pub trait BatchObserver {
    fn on_start(&mut self, _vm: &Vm, _position: usize, _total: usize) {}
    fn on_outcome(&mut self, _outcome: &OperationOutcome, _position: usize, _total: usize) {}
}

impl BatchObserver for () {}

/// Run `op` for each target in `targets`, looking targets up in `inventory`.
pub async fn run_batch<'a, F, Fut>(
    operation: Operation,
    inventory: &'a Inventory,
    targets: &TargetSet,
    cancel: &CancellationToken,
    observer: &mut dyn BatchObserver,
    mut op: F,
) -> BatchResult
where
    F: FnMut(&'a Vm) -> Fut,
    Fut: Future<Output = Result<(), QuickVmError>>,
{
    let total = targets.len();
    let mut result = BatchResult {
        operation: operation.name,
        outcomes: Vec::with_capacity(total),
        success_count: 0,
        fail_count: 0,
        total_count: total,
        cancelled: false,
    };

    for (position, index) in targets.iter().enumerate() {
        if cancel.is_cancelled() {
            tracing::warn!(
                operation = operation.name,
                remaining = total - position,
                "batch cancelled"
            );
            result.cancelled = true;
            break;
        }

        let outcome = match inventory.vm(index) {
            Ok(vm) => {
                observer.on_start(vm, position + 1, total);
                match op(vm).await {
                    Ok(()) => {
                        tracing::info!(vm = %vm.name, "{}", operation.done);
                        OperationOutcome {
                            index,
                            name: vm.name.clone(),
                            success: true,
                            message: format!("VM {} successfully", operation.done),
                        }
                    }
                    Err(e) => {
                        tracing::warn!(vm = %vm.name, error = %e, "{} failed", operation.name);
                        OperationOutcome {
                            index,
                            name: vm.name.clone(),
                            success: false,
                            message: e.to_string(),
                        }
                    }
                }
            }
            Err(e) => OperationOutcome {
                index,
                name: String::new(),
                success: false,
                message: e.to_string(),
            },
        };

        if outcome.success {
            result.success_count += 1;
        } else {
            result.fail_count += 1;
        }
        observer.on_outcome(&outcome, position + 1, total);
        result.outcomes.push(outcome);
    }

    result
}
