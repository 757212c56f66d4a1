// ABOUTME: HTTP server for archscribe, streaming agent task events over SSE.
// ABOUTME: Uses Axum with shared state holding the provider, task storage, and running tasks.

pub mod api;
pub mod app_state;
pub mod config;
pub mod routes;

pub use app_state::{AppState, SharedState};
pub use config::{ConfigError, ServerConfig};
pub use routes::create_router;
