//! Core types, traits and configuration shared by every Redraft crate.
//!
//! Everything that crosses a crate boundary lives here: the job data model,
//! the single [`PipelineError`] type surfaced to callers, the boundary error
//! payload, and the [`InferenceClient`] seam implemented by the adapters.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::*;
pub use types::*;

pub use traits::{HealthCheck, InferenceClient, InferenceRequest};
