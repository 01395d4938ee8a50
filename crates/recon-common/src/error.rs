//! Error types shared across the recon workspace

use thiserror::Error;

/// Main error type for recon
#[derive(Error, Debug)]
pub enum ReconError {
    #[error("Unknown failure kind: {0}")]
    UnknownFailureKind(String),
}
