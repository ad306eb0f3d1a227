//! Task lifecycle transition table.
//!
//! ```text
//! CREATED ──► MATCHING ──► DISPATCHED ──► ACCEPTED ──► IN_PROGRESS ──► COMPLETED
//!    │           │  ▲          │             │              │
//!    │           ▼  │ retry    ▼             │              │
//!    │         FAILED ◄────────┘             │              │
//!    └───────────┴─────────────┴─────────────┴──────────────┴──► CANCELLED
//! ```
//!
//! Cancellation bypasses this table (see `forced_transition_allowed`) but
//! still writes conditionally on the observed status. System failure stays on
//! the table's FAILED edges.

use crate::common::{DispatchError, DispatchResult, TaskStatus};

impl TaskStatus {
    /// Structurally allowed targets from `self`.
    pub fn allowed_transitions(&self) -> &'static [TaskStatus] {
        use TaskStatus::*;
        match self {
            Created => &[Matching, Cancelled],
            Matching => &[Dispatched, Failed, Cancelled],
            Dispatched => &[Accepted, Failed, Cancelled],
            Accepted => &[InProgress, Cancelled],
            InProgress => &[Completed, Cancelled],
            Failed => &[Matching],
            Completed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        self.allowed_transitions().contains(&to)
    }

    /// COMPLETED and CANCELLED never change again. FAILED can be retried.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }

    /// The helper assignment is only meaningful in these states.
    pub fn holds_helper(&self) -> bool {
        matches!(
            self,
            TaskStatus::Accepted | TaskStatus::InProgress | TaskStatus::Completed
        )
    }

    /// States a stuck dispatch may be failed from by the system.
    pub fn is_failable(&self) -> bool {
        matches!(self, TaskStatus::Matching | TaskStatus::Dispatched)
    }
}

/// Whitelist check: `InvalidTransition` unless `to` is allowed from `from`.
pub fn ensure_transition(from: TaskStatus, to: TaskStatus) -> DispatchResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(DispatchError::InvalidTransition { from, to })
    }
}

/// Cancellation is universal for non-terminal tasks; system failure is
/// limited to dispatch-phase states.
pub fn forced_transition_allowed(from: TaskStatus, to: TaskStatus) -> bool {
    match to {
        TaskStatus::Cancelled => !from.is_terminal(),
        TaskStatus::Failed => from.is_failable(),
        _ => from.can_transition_to(to),
    }
}
