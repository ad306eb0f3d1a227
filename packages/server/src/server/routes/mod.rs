// HTTP routes
pub mod health;
pub mod helpers;
pub mod realtime;
pub mod tasks;

pub use health::*;
