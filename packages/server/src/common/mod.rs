// Common types and utilities shared across the application

pub mod auth;
pub mod entity_ids;
pub mod error;
pub mod id;
pub mod types;
pub mod utils;

pub use auth::{Actor, AuthUser};
pub use entity_ids::{EventId, HelperId, SessionId, TaskEventId, TaskId, UserId};
pub use error::{DispatchError, DispatchResult};
pub use id::{Id, V4, V7};
pub use types::{Role, TaskStatus};
pub use utils::Coordinate;
