//! Recon Converter - XLSX to delimited text reconciliation service

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use recon_common::logging::{init_logging, LogConfig, LogLevel};
use recon_converter::config::{Config, CONFIG_ENV, DEFAULT_CONFIG_PATH};
use recon_converter::convert::ChannelProfile;
use recon_converter::notify::{LogNotifier, NotificationCatalog, Notifier, SmtpNotifier};
use recon_converter::pipeline::{convert_local, ChannelPipeline};
use recon_converter::remote::SftpConnector;
use recon_converter::scheduler::{cancel_on_shutdown, run_pipeline, run_sweep, Scheduler};
use recon_converter::sweeper::RetentionSweeper;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "recon-converter")]
#[command(author, version, about = "Partner reconciliation XLSX to CSV converter")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration file
    #[arg(short, long, global = true, env = CONFIG_ENV, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every channel on its schedule until interrupted
    Run,

    /// Run one pipeline invocation for a channel
    Once {
        /// Channel name
        #[arg(long)]
        channel: String,
    },

    /// Run one retention sweep for a channel
    Sweep {
        /// Channel name
        #[arg(long)]
        channel: String,
    },

    /// Convert a local workbook without touching any remote host
    Convert {
        /// Workbook to convert
        file: PathBuf,

        /// Conversion profile (ovo, indodana)
        #[arg(short, long)]
        profile: ChannelProfile,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Load and validate the configuration, then exit
    CheckConfig,
}

fn log_config(cli: &Cli, config: Option<&Config>) -> Result<LogConfig> {
    let mut log_config = config
        .and_then(|c| c.logging.clone())
        .unwrap_or_else(|| {
            LogConfig::builder()
                .log_file_prefix("recon-converter")
                .build()
        });
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }

    // Environment variables take precedence
    Ok(log_config.merge_env()?)
}

fn build_notifier(config: &Config) -> Result<Arc<dyn Notifier>> {
    let catalog = Arc::new(NotificationCatalog::default());

    let Some(notifications) = &config.notifications else {
        info!("No SMTP relay configured, outcomes will only be logged");
        return Ok(Arc::new(LogNotifier::new(catalog)));
    };

    let notifier = SmtpNotifier::from_config(notifications, catalog)
        .context("Failed to configure SMTP notifier")?;
    if notifications.smtp.verify_on_startup {
        notifier
            .test_connection()
            .context("SMTP relay is not reachable")?;
    }
    Ok(Arc::new(notifier))
}

fn connector(config: &Config) -> Arc<SftpConnector> {
    Arc::new(SftpConnector::new(
        config.timeouts.connect(),
        config.timeouts.io(),
    ))
}

fn find_channel<'a>(config: &'a Config, name: &str) -> Result<&'a recon_converter::config::ChannelConfig> {
    config.channel(name).with_context(|| {
        let known: Vec<&str> = config.channels.iter().map(|c| c.name.as_str()).collect();
        format!("Unknown channel '{}'. Configured channels: {}", name, known.join(", "))
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Command::Convert {
        file,
        profile,
        output,
    } = &cli.command
    {
        let _guard = init_logging(&log_config(&cli, None)?)?;
        let converted = convert_local(file, &profile.rules(), output)
            .with_context(|| format!("Failed to convert {}", file.display()))?;
        info!(
            output = %converted.output.display(),
            rows_before = converted.rows_before,
            rows_after = converted.rows_after,
            "Conversion complete"
        );
        if converted.rows_before != converted.rows_after {
            warn!("Row counts differ, verify the output");
        }
        return Ok(());
    }

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    let _guard = init_logging(&log_config(&cli, Some(&config))?)?;

    match &cli.command {
        Command::CheckConfig => {
            info!(
                channels = config.channels.len(),
                notifications = config.notifications.is_some(),
                "Configuration is valid"
            );
        },
        Command::Run => {
            let notifier = build_notifier(&config)?;
            let shutdown = CancellationToken::new();
            cancel_on_shutdown(shutdown.clone());
            Scheduler::new(&config, connector(&config), notifier)
                .run(shutdown)
                .await?;
        },
        Command::Once { channel } => {
            let channel = find_channel(&config, channel)?;
            let notifier = build_notifier(&config)?;
            let pipeline = Arc::new(ChannelPipeline::new(
                channel.clone(),
                config.temp_root.clone(),
                connector(&config),
                notifier,
            ));

            let shutdown = CancellationToken::new();
            cancel_on_shutdown(shutdown.clone());
            let summary = run_pipeline(pipeline, shutdown).await?;
            info!(
                channel = %summary.channel,
                succeeded = summary.succeeded(),
                failed = summary.failed(),
                cancelled = summary.cancelled,
                "Run complete"
            );
        },
        Command::Sweep { channel } => {
            let channel = find_channel(&config, channel)?;
            let sweeper = Arc::new(RetentionSweeper::new(channel, connector(&config)));
            let report = run_sweep(sweeper).await?;
            info!(
                channel = %channel.name,
                removed = report.removed.len(),
                failed = report.failed.len(),
                "Sweep complete"
            );
        },
        Command::Convert { .. } => {},
    }

    Ok(())
}
