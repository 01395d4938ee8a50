//! Common types used across recon

use serde::{Deserialize, Serialize};

use crate::error::ReconError;

/// Classification of a per-file failure
///
/// The serialized names are the keys operators see in notification
/// templates and logs, so they are kept stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// The expected file was absent when it was opened
    #[serde(rename = "notExistsError")]
    NotExists,
    /// Schema or content mismatch, or the converted output could not be read back
    #[serde(rename = "invalidFileError")]
    InvalidFile,
    /// The sheet held no data rows
    #[serde(rename = "emptyFileError")]
    EmptyFile,
    /// A staging directory could not be created or the destination write failed
    #[serde(rename = "directoryError")]
    Directory,
    /// Unexpected I/O or parse failure
    #[serde(rename = "internalError")]
    Internal,
}

impl FailureKind {
    pub const ALL: [FailureKind; 5] = [
        FailureKind::NotExists,
        FailureKind::InvalidFile,
        FailureKind::EmptyFile,
        FailureKind::Directory,
        FailureKind::Internal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::NotExists => "notExistsError",
            FailureKind::InvalidFile => "invalidFileError",
            FailureKind::EmptyFile => "emptyFileError",
            FailureKind::Directory => "directoryError",
            FailureKind::Internal => "internalError",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FailureKind {
    type Err = ReconError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        FailureKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ReconError::UnknownFailureKind(s.to_string()))
    }
}

/// Terminal result of one source file's conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Delivered; the counts may differ and are surfaced for inspection
    Success { rows_before: usize, rows_after: usize },
    Failure { kind: FailureKind },
}

impl Outcome {
    pub fn success(rows_before: usize, rows_after: usize) -> Self {
        Outcome::Success {
            rows_before,
            rows_after,
        }
    }

    pub fn failure(kind: FailureKind) -> Self {
        Outcome::Failure { kind }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success {
                rows_before,
                rows_after,
            } => write!(f, "success (rows before: {}, rows after: {})", rows_before, rows_after),
            Outcome::Failure { kind } => write!(f, "failure ({})", kind),
        }
    }
}
