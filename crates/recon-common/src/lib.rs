//! Recon Common Library
//!
//! Shared types, utilities, and error handling for the recon converter workspace.
//!
//! # Overview
//!
//! - **Error Handling**: the shared error type
//! - **Logging**: tracing subscriber setup driven by `LogConfig`
//! - **Types**: per-file outcomes and failure kinds reported to operators
//!
//! # Example
//!
//! ```no_run
//! use recon_common::types::{FailureKind, Outcome};
//!
//! let outcome = Outcome::failure(FailureKind::InvalidFile);
//! assert!(!outcome.is_success());
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::ReconError;
pub use types::{FailureKind, Outcome};
