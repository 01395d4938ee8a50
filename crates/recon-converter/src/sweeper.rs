//! Retention sweeper
//!
//! Purges archived source files from a channel's backup directory once they
//! are older than the channel's retention threshold.

use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, info_span, warn};

use crate::config::ChannelConfig;
use crate::error::{PipelineError, Result};
use crate::remote::{remote_path, RemoteConnector, RemoteEndpoint};

/// Result of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Regular files examined
    pub examined: usize,
    pub removed: Vec<String>,
    /// Entries that were due but could not be removed, with the reason
    pub failed: Vec<(String, String)>,
    /// Entries without a modification time
    pub skipped: Vec<String>,
}

/// Sweeper bound to one channel's backup directory
pub struct RetentionSweeper {
    channel: String,
    endpoint: RemoteEndpoint,
    backup_path: String,
    retention: Duration,
    connector: Arc<dyn RemoteConnector>,
}

impl RetentionSweeper {
    pub fn new(channel: &ChannelConfig, connector: Arc<dyn RemoteConnector>) -> Self {
        Self {
            channel: channel.name.clone(),
            endpoint: channel.source.clone(),
            backup_path: channel.backup_path.clone(),
            retention: channel.retention(),
            connector,
        }
    }

    pub fn name(&self) -> &str {
        &self.channel
    }

    pub fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(SystemTime::now())
    }

    /// Sweep as if the current time were `now`
    ///
    /// An entry is removed when `now - mtime` is strictly greater than the
    /// retention threshold. Directories are never touched.
    pub fn sweep_at(&self, now: SystemTime) -> Result<SweepReport> {
        let span = info_span!("sweep", channel = %self.channel);
        let _enter = span.enter();

        let session = self
            .connector
            .connect(&self.endpoint)
            .map_err(|e| PipelineError::session(&self.channel, "source", e))?;

        let entries = session
            .list(&self.backup_path)
            .map_err(|e| PipelineError::listing(&self.channel, &self.backup_path, e))?;

        let mut report = SweepReport::default();
        for entry in entries.into_iter().filter(|e| !e.is_dir) {
            report.examined += 1;

            let Some(age) = entry.age(now) else {
                debug!(file = %entry.name, "No modification time, skipping");
                report.skipped.push(entry.name);
                continue;
            };
            if age <= self.retention {
                continue;
            }

            let path = remote_path(&self.backup_path, &entry.name);
            match session.remove(&path) {
                Ok(()) => {
                    debug!(file = %entry.name, age_secs = age.as_secs(), "Removed expired backup");
                    report.removed.push(entry.name);
                },
                Err(e) => {
                    warn!(file = %entry.name, error = %e, "Failed to remove expired backup");
                    report.failed.push((entry.name, e.to_string()));
                },
            }
        }

        info!(
            examined = report.examined,
            removed = report.removed.len(),
            failed = report.failed.len(),
            "Sweep finished"
        );
        Ok(report)
    }
}
