// Hyperlocal Task Dispatch - Core
//
// This crate dispatches service requests to nearby helpers and streams
// status and position updates to both parties until the task concludes.
// Domains hold the business rules; the kernel holds infrastructure.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
