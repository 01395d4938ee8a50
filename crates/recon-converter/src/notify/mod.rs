//! Operator notifications
//!
//! The pipeline reports each terminal file outcome through [`Notifier`].
//! Message wording lives in one immutable [`NotificationCatalog`] shared by
//! every notifier, so the failure-kind to reason mapping exists once.

pub mod smtp;

use chrono::{DateTime, Local};
use recon_common::FailureKind;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub use smtp::SmtpNotifier;

/// Timestamp layout used in subjects
pub const SUBJECT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const STATUS_OK: &str = "OK";
const ROWS_UNCHANGED: &str =
    "Tidak ada perubahan jumlah data. Silahkan verifikasi isi file jika diperlukan";
const ROWS_CHANGED: &str = "Terdapat perbedaan jumlah data. Silahkan verifikasi isi file";

/// Errors raised while delivering a notification
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Invalid mailbox '{address}': {message}")]
    Address { address: String, message: String },

    #[error("Failed to build message: {0}")]
    Message(String),

    #[error("SMTP transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, NotifyError>;

/// Receives per-file outcomes
///
/// Implementations are called from blocking pipeline threads. Errors are
/// returned to the caller, which logs them; delivery never affects the
/// pipeline.
pub trait Notifier: Send + Sync {
    fn notify_success(&self, channel: &str, rows_before: usize, rows_after: usize) -> Result<()>;

    fn notify_failure(&self, channel: &str, kind: FailureKind) -> Result<()>;
}

/// A rendered notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

/// Fixed operator-facing wording
#[derive(Debug, Clone)]
pub struct NotificationCatalog {
    reasons: HashMap<FailureKind, &'static str>,
}

impl Default for NotificationCatalog {
    fn default() -> Self {
        let reasons = HashMap::from([
            (FailureKind::NotExists, "File tidak ditemukan"),
            (FailureKind::InvalidFile, "File tidak valid"),
            (FailureKind::EmptyFile, "File kosong"),
            (FailureKind::Directory, "Directory Error"),
            (FailureKind::Internal, "Internal Error"),
        ]);
        Self { reasons }
    }
}

impl NotificationCatalog {
    /// Human-readable reason for a failure kind
    pub fn reason(&self, kind: FailureKind) -> &'static str {
        self.reasons.get(&kind).copied().unwrap_or("Internal Error")
    }

    pub fn success_subject(&self, channel: &str, at: DateTime<Local>) -> String {
        format!(
            "[Berhasil] Proses Konversi Excel ke CSV - {} {}",
            channel,
            at.format(SUBJECT_TIME_FORMAT)
        )
    }

    pub fn failure_subject(&self, channel: &str, at: DateTime<Local>) -> String {
        format!(
            "Proses Konversi Excel ke CSV - {} {}",
            channel,
            at.format(SUBJECT_TIME_FORMAT)
        )
    }

    pub fn success(
        &self,
        channel: &str,
        rows_before: usize,
        rows_after: usize,
        at: DateTime<Local>,
    ) -> Notification {
        let subject = self.success_subject(channel, at);
        let remark = if rows_before == rows_after {
            ROWS_UNCHANGED
        } else {
            ROWS_CHANGED
        };
        let body = render_body(&BodyFields {
            subject: &subject,
            available: STATUS_OK,
            conversion: STATUS_OK,
            delivery: STATUS_OK,
            rows_before: &rows_before.to_string(),
            rows_after: &rows_after.to_string(),
            remark,
        });
        Notification { subject, body }
    }

    pub fn failure(&self, channel: &str, kind: FailureKind, at: DateTime<Local>) -> Notification {
        let subject = self.failure_subject(channel, at);
        let body = render_body(&BodyFields {
            subject: &subject,
            available: "",
            conversion: "",
            delivery: "",
            rows_before: "",
            rows_after: "",
            remark: self.reason(kind),
        });
        Notification { subject, body }
    }
}

struct BodyFields<'a> {
    subject: &'a str,
    available: &'a str,
    conversion: &'a str,
    delivery: &'a str,
    rows_before: &'a str,
    rows_after: &'a str,
    remark: &'a str,
}

fn render_body(fields: &BodyFields<'_>) -> String {
    format!(
        "{}\n\n\
         File tersedia    : {}\n\
         Konversi         : {}\n\
         Pengiriman       : {}\n\
         Jumlah data awal : {}\n\
         Jumlah data akhir: {}\n\n\
         {}\n",
        fields.subject,
        fields.available,
        fields.conversion,
        fields.delivery,
        fields.rows_before,
        fields.rows_after,
        fields.remark
    )
}

/// Notifier that only writes structured log events
///
/// Used when no SMTP relay is configured and by the offline CLI commands.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier {
    catalog: Arc<NotificationCatalog>,
}

impl LogNotifier {
    pub fn new(catalog: Arc<NotificationCatalog>) -> Self {
        Self { catalog }
    }
}

impl Notifier for LogNotifier {
    fn notify_success(&self, channel: &str, rows_before: usize, rows_after: usize) -> Result<()> {
        let note = self.catalog.success(channel, rows_before, rows_after, Local::now());
        info!(
            channel = %channel,
            rows_before,
            rows_after,
            subject = %note.subject,
            "Conversion succeeded"
        );
        Ok(())
    }

    fn notify_failure(&self, channel: &str, kind: FailureKind) -> Result<()> {
        let note = self.catalog.failure(channel, kind, Local::now());
        warn!(
            channel = %channel,
            kind = %kind,
            reason = self.catalog.reason(kind),
            subject = %note.subject,
            "Conversion failed"
        );
        Ok(())
    }
}
