//! HTTP API for the session server.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check (no auth)
//! - `POST /session` - Create a session, returns `{sessionId}`
//! - `POST /reset` - Reset a session's conversation
//! - `POST /chat` - Run one turn, streamed as Server-Sent Events
//! - `GET /tools` - List the registered tool catalog
//!
//! When a bearer token is configured, every endpoint except `/health`
//! requires `Authorization: Bearer <token>`.

mod auth;
mod routes;
pub mod types;

pub use routes::{router, serve, AppState};
pub use types::*;
