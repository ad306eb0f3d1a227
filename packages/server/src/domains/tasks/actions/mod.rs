//! Task domain actions - lifecycle operations called from the HTTP and
//! WebSocket surfaces and from background workers.
//!
//! Actions take `&ServerDeps`, perform one conditional write through the
//! store, then announce the committed change through the event publisher.

mod create_task;
mod dispatch;
mod lifecycle;
mod notify;
mod queries;

pub use create_task::create_task;
pub use dispatch::{resume_pending_dispatches, run_dispatch, sweep_stale_tasks, MatchAndDispatch};
pub use lifecycle::{
    cancel_task, claim_task, complete_task, decline_task, fail_task, retry_task, start_task,
    transition,
};
pub use queries::{can_join_room, get_task, list_events};
