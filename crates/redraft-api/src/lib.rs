//! HTTP API for Redraft
//!
//! Exposes the optimize operation, health and metrics over axum and maps
//! every [`redraft_core::PipelineError`] onto the boundary error payload.

pub mod error;
pub mod rest;
mod state;

pub use error::ApiError;
pub use rest::create_router;
pub use state::AppState;
