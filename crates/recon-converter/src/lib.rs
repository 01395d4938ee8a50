//! Recon Converter Library
//!
//! Pulls partner reconciliation workbooks (XLSX) from SFTP, converts them to
//! `;`-delimited text, delivers the result to a destination SFTP host,
//! verifies the delivered row count, archives the source and notifies
//! operators. A retention sweeper purges old archives.
//!
//! # Modules
//!
//! - **remote**: remote file store traits and the SFTP implementation
//! - **workbook**: XLSX sheet reader
//! - **convert**: header validation, serialization and partner profiles
//! - **pipeline**: the per-channel, per-file conversion pipeline
//! - **sweeper**: retention sweeper for archived sources
//! - **notify**: operator notifications (log or SMTP)
//! - **scheduler**: per-channel timers and shutdown handling
//!
//! # Example
//!
//! ```no_run
//! use recon_converter::config::Config;
//! use recon_converter::notify::LogNotifier;
//! use recon_converter::pipeline::ChannelPipeline;
//! use recon_converter::remote::SftpConnector;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let connector = Arc::new(SftpConnector::new(
//!         config.timeouts.connect(),
//!         config.timeouts.io(),
//!     ));
//!     let pipeline = ChannelPipeline::new(
//!         config.channels[0].clone(),
//!         config.temp_root.clone(),
//!         connector,
//!         Arc::new(LogNotifier::default()),
//!     );
//!     let summary = pipeline.run(&CancellationToken::new())?;
//!     println!("{} delivered, {} failed", summary.succeeded(), summary.failed());
//!     Ok(())
//! }
//! ```
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod convert;
pub mod error;
pub mod notify;
pub mod pipeline;
pub mod remote;
pub mod scheduler;
pub mod sweeper;
pub mod workbook;

pub use error::PipelineError;
