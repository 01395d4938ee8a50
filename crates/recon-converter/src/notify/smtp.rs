//! Email delivery over SMTP
//!
//! Uses the blocking `lettre` transport; notifications are sent from the
//! pipeline's blocking thread, never from the async runtime.

use chrono::Local;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Message, SmtpTransport, Transport};
use recon_common::FailureKind;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{Notification, NotificationCatalog, Notifier, NotifyError, Result};
use crate::config::{NotificationConfig, SmtpTlsMode};

/// Sends one email per outcome to every configured receiver
pub struct SmtpNotifier {
    transport: SmtpTransport,
    from: Mailbox,
    receivers: Vec<Mailbox>,
    catalog: Arc<NotificationCatalog>,
}

fn parse_mailbox(address: &str) -> Result<Mailbox> {
    address.parse().map_err(|e: lettre::address::AddressError| NotifyError::Address {
        address: address.to_string(),
        message: e.to_string(),
    })
}

impl SmtpNotifier {
    pub fn from_config(config: &NotificationConfig, catalog: Arc<NotificationCatalog>) -> Result<Self> {
        let smtp = &config.smtp;

        let tls = match smtp.tls {
            SmtpTlsMode::None => Tls::None,
            mode => {
                let params = TlsParameters::builder(smtp.host.clone())
                    .dangerous_accept_invalid_certs(smtp.accept_invalid_certs)
                    .build()
                    .map_err(|e| NotifyError::Transport(e.to_string()))?;
                match mode {
                    SmtpTlsMode::Opportunistic => Tls::Opportunistic(params),
                    SmtpTlsMode::Required => Tls::Required(params),
                    _ => Tls::Wrapper(params),
                }
            },
        };

        let mut builder = SmtpTransport::builder_dangerous(smtp.host.as_str())
            .port(smtp.port)
            .tls(tls)
            .timeout(Some(Duration::from_secs(smtp.timeout_secs)));

        if let Some(user) = smtp.user.as_deref().filter(|u| !u.is_empty()) {
            builder = builder.credentials(Credentials::new(
                user.to_string(),
                smtp.password.clone().unwrap_or_default(),
            ));
        }

        let receivers = config
            .receivers
            .iter()
            .map(|r| parse_mailbox(r))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            transport: builder.build(),
            from: parse_mailbox(&smtp.from)?,
            receivers,
            catalog,
        })
    }

    /// Open and close one connection to the relay
    pub fn test_connection(&self) -> Result<()> {
        match self.transport.test_connection() {
            Ok(true) => {
                info!("SMTP relay reachable");
                Ok(())
            },
            Ok(false) => Err(NotifyError::Transport(
                "relay did not accept the connection".to_string(),
            )),
            Err(e) => Err(NotifyError::Transport(e.to_string())),
        }
    }

    fn build_message(&self, note: &Notification) -> Result<Message> {
        let mut builder = Message::builder().from(self.from.clone());
        for receiver in &self.receivers {
            builder = builder.to(receiver.clone());
        }
        builder
            .subject(note.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(note.body.clone())
            .map_err(|e| NotifyError::Message(e.to_string()))
    }

    fn send(&self, note: &Notification) -> Result<()> {
        let message = self.build_message(note)?;
        self.transport
            .send(&message)
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        debug!(subject = %note.subject, receivers = self.receivers.len(), "Notification sent");
        Ok(())
    }
}

impl Notifier for SmtpNotifier {
    fn notify_success(&self, channel: &str, rows_before: usize, rows_after: usize) -> Result<()> {
        let note = self.catalog.success(channel, rows_before, rows_after, Local::now());
        self.send(&note)
    }

    fn notify_failure(&self, channel: &str, kind: FailureKind) -> Result<()> {
        let note = self.catalog.failure(channel, kind, Local::now());
        self.send(&note)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::SmtpConfig;

    fn config(receivers: &[&str]) -> NotificationConfig {
        NotificationConfig {
            smtp: SmtpConfig {
                host: "localhost".to_string(),
                port: 2525,
                user: None,
                password: None,
                from: "Recon <recon@example.com>".to_string(),
                tls: SmtpTlsMode::None,
                accept_invalid_certs: false,
                timeout_secs: 1,
                verify_on_startup: false,
            },
            receivers: receivers.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn test_builds_message_for_all_receivers() {
        let notifier = SmtpNotifier::from_config(
            &config(&["ops@example.com", "finance@example.com"]),
            Arc::new(NotificationCatalog::default()),
        )
        .unwrap();

        let note = Notification {
            subject: "subject".to_string(),
            body: "body".to_string(),
        };
        let message = notifier.build_message(&note).unwrap();
        let envelope = message.envelope();
        assert_eq!(envelope.to().len(), 2);
        assert_eq!(
            envelope.from().map(|a| a.to_string()),
            Some("recon@example.com".to_string())
        );
    }

    #[test]
    fn test_rejects_bad_receiver() {
        let result = SmtpNotifier::from_config(
            &config(&["not an address"]),
            Arc::new(NotificationCatalog::default()),
        );
        assert!(matches!(result, Err(NotifyError::Address { .. })));
    }
}
