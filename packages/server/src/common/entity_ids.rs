//! Typed ID definitions for all dispatch entities.
//!
//! ```rust
//! use dispatch_core::common::{HelperId, TaskId};
//!
//! let task_id = TaskId::new();
//! let helper_id = HelperId::new();
//! // let wrong: TaskId = helper_id; // compile error
//! # let _ = (task_id, helper_id);
//! ```

pub use super::id::{Id, V4, V7};

// ============================================================================
// Entity marker types
// ============================================================================

/// Marker for requested units of work.
pub struct TaskEntity;

/// Marker for rows of the task audit trail.
pub struct TaskEventEntity;

/// Marker for service providers.
pub struct HelperEntity;

/// Marker for authenticated users (requesters, helpers, admins).
pub struct UserEntity;

/// Marker for live client sessions.
pub struct SessionEntity;

/// Marker for fan-out events.
pub struct EventEntity;

// ============================================================================
// Type aliases - the primary API
// ============================================================================

pub type TaskId = Id<TaskEntity>;

pub type TaskEventId = Id<TaskEventEntity>;

pub type HelperId = Id<HelperEntity>;

pub type UserId = Id<UserEntity>;

/// Sessions are never persisted, so they use random ids.
pub type SessionId = Id<SessionEntity, V4>;

pub type EventId = Id<EventEntity>;
