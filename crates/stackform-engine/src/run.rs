//! Run context and run results
//!
//! The "current run" is an explicit object threaded through planning and
//! execution instead of ambient global state: it carries the run id, the
//! cancellation signal, and nothing else.

use crate::executor::InstanceStatus;
use stackform_core::InstanceAddr;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Context for one plan/apply run
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    cancelled: Arc<AtomicBool>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle that can cancel this run from another task. Cancellation lets
    /// in-flight remote calls finish; nothing new is dispatched once it is
    /// observed.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancelled))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Overall result of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every planned instance succeeded
    Success,
    /// Some instances failed or were blocked; succeeded work is preserved
    /// in state and only the remainder re-plans next run
    PartialFailure,
    /// Fatal configuration or staleness error, nothing was mutated
    Aborted,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Success => write!(f, "success"),
            RunOutcome::PartialFailure => write!(f, "partial failure"),
            RunOutcome::Aborted => write!(f, "aborted"),
        }
    }
}

/// Per-instance statuses and errors accumulated over a run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    pub statuses: BTreeMap<InstanceAddr, InstanceStatus>,
    pub errors: BTreeMap<InstanceAddr, String>,

    /// Set when the run aborted before execution
    pub abort_reason: Option<String>,
}

impl RunReport {
    pub fn aborted(run_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            run_id,
            outcome: RunOutcome::Aborted,
            statuses: BTreeMap::new(),
            errors: BTreeMap::new(),
            abort_reason: Some(reason.into()),
        }
    }

    pub fn status(&self, addr: &InstanceAddr) -> Option<InstanceStatus> {
        self.statuses.get(addr).copied()
    }

    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Success
    }
}
