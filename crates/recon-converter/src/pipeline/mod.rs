//! Channel pipeline
//!
//! One invocation lists the channel's source directory and runs every
//! regular file through a [`ConversionJob`]. A failing file is reported and
//! skipped; only session or listing failures abort the invocation.
//!
//! All work here is blocking. The scheduler runs invocations on the
//! blocking thread pool.

pub mod job;
pub mod staging;

use recon_common::{FailureKind, Outcome};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn};

use crate::config::ChannelConfig;
use crate::convert::ConversionRules;
use crate::error::{PipelineError, Result};
use crate::notify::Notifier;
use crate::remote::{remote_path, RemoteConnector, RemoteSession};

pub use job::{convert_local, ConversionJob, Delivery, JobError, LocalConversion};
pub use staging::{Phase, StagingArea, StagingFile};

/// What happened to one source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub file: String,
    /// Destination name, when conversion got that far and delivered
    pub output_name: Option<String>,
    pub outcome: Outcome,
    /// Whether the source was moved into the backup directory
    pub archived: bool,
}

/// Every per-file outcome of one invocation, in listing order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub channel: String,
    pub files: Vec<FileReport>,
    /// The invocation stopped early on shutdown
    pub cancelled: bool,
}

impl RunSummary {
    fn new(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            ..Default::default()
        }
    }

    pub fn succeeded(&self) -> usize {
        self.files.iter().filter(|f| f.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.files.len() - self.succeeded()
    }

    pub fn report(&self, file: &str) -> Option<&FileReport> {
        self.files.iter().find(|f| f.file == file)
    }
}

/// Pipeline bound to one channel
pub struct ChannelPipeline {
    channel: ChannelConfig,
    rules: ConversionRules,
    staging: StagingArea,
    connector: Arc<dyn RemoteConnector>,
    notifier: Arc<dyn Notifier>,
}

impl ChannelPipeline {
    pub fn new(
        channel: ChannelConfig,
        temp_root: impl Into<PathBuf>,
        connector: Arc<dyn RemoteConnector>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let rules = channel.profile.rules();
        let staging = StagingArea::new(temp_root, channel.name.clone());
        Self {
            channel,
            rules,
            staging,
            connector,
            notifier,
        }
    }

    pub fn name(&self) -> &str {
        &self.channel.name
    }

    pub fn channel(&self) -> &ChannelConfig {
        &self.channel
    }

    /// Run one invocation over the current contents of the source directory
    pub fn run(&self, cancel: &CancellationToken) -> Result<RunSummary> {
        let name = self.channel.name.as_str();
        let span = info_span!("pipeline", channel = %name, profile = %self.channel.profile);
        let _enter = span.enter();

        let source = self
            .connector
            .connect(&self.channel.source)
            .map_err(|e| PipelineError::session(name, "source", e))?;

        let files: Vec<String> = source
            .list(&self.channel.source_path)
            .map_err(|e| PipelineError::listing(name, &self.channel.source_path, e))?
            .into_iter()
            .filter(|entry| !entry.is_dir)
            .map(|entry| entry.name)
            .collect();

        let mut summary = RunSummary::new(name);
        if files.is_empty() {
            debug!(path = %self.channel.source_path, "No source files");
            return Ok(summary);
        }

        let destination = self
            .connector
            .connect(&self.channel.destination)
            .map_err(|e| PipelineError::session(name, "destination", e))?;

        info!(files = files.len(), "Processing source files");

        for file in files {
            if cancel.is_cancelled() {
                info!("Shutdown requested, leaving remaining files for the next run");
                summary.cancelled = true;
                break;
            }

            match self.process(&file, source.as_ref(), destination.as_ref(), cancel) {
                Some(report) => {
                    debug!(file = %report.file, outcome = %report.outcome, archived = report.archived, "File finished");
                    summary.files.push(report);
                },
                None => {
                    summary.cancelled = true;
                    break;
                },
            }
        }

        info!(
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            cancelled = summary.cancelled,
            "Pipeline invocation finished"
        );
        Ok(summary)
    }

    /// Run one file to its terminal state; `None` when cancelled mid-way
    fn process(
        &self,
        file: &str,
        source: &dyn RemoteSession,
        destination: &dyn RemoteSession,
        cancel: &CancellationToken,
    ) -> Option<FileReport> {
        let span = info_span!("file", file = %file);
        let _enter = span.enter();

        let job = ConversionJob {
            file_name: file,
            source_dir: &self.channel.source_path,
            destination_dir: &self.channel.destination_path,
            rules: &self.rules,
            staging: &self.staging,
        };

        match job.run(source, destination, cancel) {
            Ok(delivery) => {
                if delivery.rows_before == delivery.rows_after {
                    info!(
                        output = %delivery.output_name,
                        rows_before = delivery.rows_before,
                        rows_after = delivery.rows_after,
                        "File delivered"
                    );
                } else {
                    warn!(
                        output = %delivery.output_name,
                        rows_before = delivery.rows_before,
                        rows_after = delivery.rows_after,
                        "File delivered with differing row counts"
                    );
                }

                if let Err(e) = self.notifier.notify_success(
                    self.name(),
                    delivery.rows_before,
                    delivery.rows_after,
                ) {
                    warn!(error = %e, "Failed to send success notification");
                }

                let archived = self.archive(source, file);
                Some(FileReport {
                    file: file.to_string(),
                    outcome: Outcome::success(delivery.rows_before, delivery.rows_after),
                    output_name: Some(delivery.output_name),
                    archived,
                })
            },
            Err(JobError::Cancelled) => {
                info!("Shutdown requested before upload, file left for the next run");
                None
            },
            Err(e) => {
                let kind = e.kind();
                warn!(kind = %kind, error = %e, "File conversion failed");
                Some(self.failed(file, kind))
            },
        }
    }

    fn failed(&self, file: &str, kind: FailureKind) -> FileReport {
        if let Err(e) = self.notifier.notify_failure(self.name(), kind) {
            warn!(error = %e, "Failed to send failure notification");
        }
        FileReport {
            file: file.to_string(),
            output_name: None,
            outcome: Outcome::failure(kind),
            archived: false,
        }
    }

    /// Move a delivered source into the backup directory; failures are logged only
    fn archive(&self, source: &dyn RemoteSession, file: &str) -> bool {
        let from = remote_path(&self.channel.source_path, file);
        let to = remote_path(&self.channel.backup_path, file);
        match source.rename(&from, &to) {
            Ok(()) => {
                debug!(from = %from, to = %to, "Archived source file");
                true
            },
            Err(e) => {
                warn!(from = %from, to = %to, error = %e, "Failed to archive source file");
                false
            },
        }
    }
}
