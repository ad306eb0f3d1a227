//! Task domain - lifecycle state machine, audit trail and dispatch.

pub mod actions;
pub mod models;
pub mod state;
pub mod store;

pub use models::{NewTask, Task, TaskEvent};
pub use store::{InMemoryTaskStore, PostgresTaskStore, StatusChange, TaskStore};
