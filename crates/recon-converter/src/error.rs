//! Invocation-level errors
//!
//! These abort a whole pipeline or sweeper invocation. Per-file problems
//! never surface here; they become a [`recon_common::Outcome`] instead.

use thiserror::Error;

use crate::remote::RemoteError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Channel '{channel}': cannot open {role} session: {source}")]
    Session {
        channel: String,
        role: &'static str,
        #[source]
        source: RemoteError,
    },

    #[error("Channel '{channel}': cannot list {path}: {source}")]
    Listing {
        channel: String,
        path: String,
        #[source]
        source: RemoteError,
    },

    #[error("Channel '{channel}': background task failed: {message}")]
    Task { channel: String, message: String },
}

impl PipelineError {
    pub fn session(channel: &str, role: &'static str, source: RemoteError) -> Self {
        Self::Session {
            channel: channel.to_string(),
            role,
            source,
        }
    }

    pub fn listing(channel: &str, path: &str, source: RemoteError) -> Self {
        Self::Listing {
            channel: channel.to_string(),
            path: path.to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
