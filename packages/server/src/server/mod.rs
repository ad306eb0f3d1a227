// HTTP server setup (Axum REST + WebSocket)
pub mod app;
pub mod auth;
pub mod error;
pub mod middleware;
pub mod routes;

pub use app::*;
