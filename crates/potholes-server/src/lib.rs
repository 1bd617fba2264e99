//! HTTP and `WebSocket` service for Potholes Live.
//!
//! This crate is the composition root. It exposes:
//!
//! - **REST endpoints** for dedup-checked report ingest, batch ingest,
//!   owner history, reverse geocoding and share image composition
//! - **`WebSocket` endpoints** that stream live report subscriptions as
//!   complete result sets
//!
//! Every collaborator is built once from [`ServiceConfig`] and injected
//! through [`AppState`]; the binary in `main.rs` only wires configuration,
//! logging and shutdown around [`start_server`].

pub mod config;
pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;
pub mod ws;

pub use config::{ConfigError, LogFormat, ServiceConfig};
pub use error::ApiError;
pub use router::build_router;
pub use server::{ServerConfig, ServerError, start_server};
pub use state::AppState;
