//! Channel scheduler
//!
//! Every channel gets two independent timer tasks: one for its pipeline and
//! one for its retention sweeper. Each pipeline tick runs the pipeline
//! `retry_iterations` times, `retry_delay_secs` apart, so files that land in
//! the middle of a window are picked up without waiting a full interval.
//!
//! Blocking remote work runs on the blocking pool. A shared
//! [`CancellationToken`] stops the timers; an in-flight invocation finishes
//! its current file and returns.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::PipelineError;
use crate::notify::Notifier;
use crate::pipeline::{ChannelPipeline, RunSummary};
use crate::remote::RemoteConnector;
use crate::sweeper::{RetentionSweeper, SweepReport};

/// Runs all configured channels until cancelled
pub struct Scheduler {
    pipelines: Vec<Arc<ChannelPipeline>>,
    sweepers: Vec<(Arc<RetentionSweeper>, Duration)>,
}

impl Scheduler {
    pub fn new(
        config: &Config,
        connector: Arc<dyn RemoteConnector>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let pipelines = config
            .channels
            .iter()
            .map(|channel| {
                Arc::new(ChannelPipeline::new(
                    channel.clone(),
                    config.temp_root.clone(),
                    connector.clone(),
                    notifier.clone(),
                ))
            })
            .collect();

        let sweepers = config
            .channels
            .iter()
            .map(|channel| {
                (
                    Arc::new(RetentionSweeper::new(channel, connector.clone())),
                    channel.sweep_interval(),
                )
            })
            .collect();

        Self {
            pipelines,
            sweepers,
        }
    }

    /// Start every timer and wait for all of them to stop
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(
            channels = self.pipelines.len(),
            "Starting channel scheduler"
        );

        let mut tasks = JoinSet::new();
        for pipeline in self.pipelines {
            tasks.spawn(run_channel(pipeline, shutdown.clone()));
        }
        for (sweeper, interval) in self.sweepers {
            tasks.spawn(run_sweeps(sweeper, interval, shutdown.clone()));
        }

        let mut panicked = 0usize;
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Scheduler task terminated abnormally");
                panicked += 1;
            }
        }

        info!("Channel scheduler stopped");
        if panicked > 0 {
            anyhow::bail!("{} scheduler task(s) terminated abnormally", panicked);
        }
        Ok(())
    }
}

/// Pipeline timer for one channel
pub async fn run_channel(pipeline: Arc<ChannelPipeline>, cancel: CancellationToken) {
    let channel = pipeline.channel();
    let iterations = channel.retry_iterations.max(1);
    let retry_delay = channel.retry_delay();

    let mut ticker = tokio::time::interval(channel.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        channel = %pipeline.name(),
        interval_secs = channel.interval_secs,
        iterations,
        "Pipeline timer started"
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        for iteration in 1..=iterations {
            if cancel.is_cancelled() {
                break;
            }

            match run_pipeline(pipeline.clone(), cancel.clone()).await {
                Ok(summary) if !summary.files.is_empty() => {
                    info!(
                        channel = %pipeline.name(),
                        iteration,
                        succeeded = summary.succeeded(),
                        failed = summary.failed(),
                        "Pipeline iteration complete"
                    );
                },
                Ok(_) => {},
                Err(e) => warn!(channel = %pipeline.name(), iteration, error = %e, "Pipeline iteration aborted"),
            }

            if iteration < iterations {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(retry_delay) => {}
                }
            }
        }
    }

    info!(channel = %pipeline.name(), "Pipeline timer stopped");
}

/// Sweeper timer for one channel
pub async fn run_sweeps(sweeper: Arc<RetentionSweeper>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if let Err(e) = run_sweep(sweeper.clone()).await {
            warn!(channel = %sweeper.name(), error = %e, "Sweep aborted");
        }
    }

    info!(channel = %sweeper.name(), "Sweeper timer stopped");
}

/// One pipeline invocation on the blocking pool
pub async fn run_pipeline(
    pipeline: Arc<ChannelPipeline>,
    cancel: CancellationToken,
) -> std::result::Result<RunSummary, PipelineError> {
    let channel = pipeline.name().to_string();
    tokio::task::spawn_blocking(move || pipeline.run(&cancel))
        .await
        .map_err(|e| PipelineError::Task {
            channel,
            message: e.to_string(),
        })?
}

/// One sweeper pass on the blocking pool
pub async fn run_sweep(
    sweeper: Arc<RetentionSweeper>,
) -> std::result::Result<SweepReport, PipelineError> {
    let channel = sweeper.name().to_string();
    tokio::task::spawn_blocking(move || sweeper.sweep())
        .await
        .map_err(|e| PipelineError::Task {
            channel,
            message: e.to_string(),
        })?
}

/// Wait for SIGINT or SIGTERM (Ctrl-C elsewhere)
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => info!(signal = "SIGINT", "Signal received"),
                    _ = sigterm.recv() => info!(signal = "SIGTERM", "Signal received"),
                }
                return;
            },
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Failed to install signal handlers, falling back to Ctrl-C");
            },
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!(signal = "ctrl-c", "Signal received");
}

/// Cancel `token` once a shutdown signal arrives
pub fn cancel_on_shutdown(token: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutting down, waiting for in-flight work");
        token.cancel();
    });
}
