//! Remote file store abstraction
//!
//! The pipeline talks to source and destination hosts only through
//! [`RemoteConnector`] and [`RemoteSession`]. Production uses the SFTP
//! implementation in [`sftp`]; tests plug in an in-memory store.
//!
//! Sessions are released when dropped, so holding a `Box<dyn RemoteSession>`
//! in a local binding is enough to guarantee the connection is closed on every
//! exit path, including unwinding.

pub mod sftp;

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::time::{Duration, SystemTime};
use thiserror::Error;

pub use sftp::{SftpConnector, SftpSession};

/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Errors raised by a remote file store
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("SSH handshake with {endpoint} failed: {message}")]
    Handshake { endpoint: String, message: String },

    #[error("Authentication as '{user}' rejected by {endpoint}")]
    Auth { endpoint: String, user: String },

    #[error("No such remote path: {0}")]
    NotFound(String),

    #[error("Remote I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("SFTP error on {path}: {message}")]
    Protocol { path: String, message: String },
}

impl RemoteError {
    /// Whether the error means the path does not exist on the remote side
    pub fn is_not_found(&self) -> bool {
        match self {
            RemoteError::NotFound(_) => true,
            RemoteError::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Connection parameters for one remote host
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEndpoint {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

impl RemoteEndpoint {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// Keep secrets out of logs and panics.
impl std::fmt::Debug for RemoteEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Directory listing entry, as seen at listing time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    /// Last modification time reported by the server, if any
    pub modified: Option<SystemTime>,
    pub is_dir: bool,
}

impl RemoteEntry {
    pub fn file(name: impl Into<String>, modified: SystemTime) -> Self {
        Self {
            name: name.into(),
            modified: Some(modified),
            is_dir: false,
        }
    }

    /// Age of the entry relative to `now`; `None` without a timestamp.
    /// Timestamps in the future count as zero age.
    pub fn age(&self, now: SystemTime) -> Option<Duration> {
        self.modified
            .map(|modified| now.duration_since(modified).unwrap_or(Duration::ZERO))
    }
}

/// An open, authenticated session on one remote host
pub trait RemoteSession: Send {
    /// List the entries of a directory (not recursive, no `.` or `..`)
    fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, RemoteError>;

    /// Open a remote file for reading
    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>, RemoteError>;

    /// Create (or truncate) a remote file for writing
    fn create(&self, path: &str) -> Result<Box<dyn Write + Send>, RemoteError>;

    fn rename(&self, from: &str, to: &str) -> Result<(), RemoteError>;

    fn remove(&self, path: &str) -> Result<(), RemoteError>;
}

/// Opens sessions against remote hosts
pub trait RemoteConnector: Send + Sync {
    fn connect(&self, endpoint: &RemoteEndpoint) -> Result<Box<dyn RemoteSession>, RemoteError>;
}

/// Join a remote directory and a file name with exactly one `/`
pub fn remote_path(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_path_joins_with_single_slash() {
        assert_eq!(remote_path("/upload", "a.xlsx"), "/upload/a.xlsx");
        assert_eq!(remote_path("/upload/", "a.xlsx"), "/upload/a.xlsx");
        assert_eq!(remote_path("/", "a.xlsx"), "/a.xlsx");
        assert_eq!(remote_path("relative", "a.xlsx"), "relative/a.xlsx");
    }

    #[test]
    fn test_entry_age() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(10_000);
        let entry = RemoteEntry::file("a", now - Duration::from_secs(600));
        assert_eq!(entry.age(now), Some(Duration::from_secs(600)));

        let future = RemoteEntry::file("b", now + Duration::from_secs(5));
        assert_eq!(future.age(now), Some(Duration::ZERO));

        let unknown = RemoteEntry {
            name: "c".to_string(),
            modified: None,
            is_dir: false,
        };
        assert_eq!(unknown.age(now), None);
    }

    #[test]
    fn test_endpoint_debug_redacts_password() {
        let endpoint = RemoteEndpoint {
            host: "sftp.example.com".to_string(),
            port: 22,
            user: "recon".to_string(),
            password: "hunter2".to_string(),
        };
        let rendered = format!("{:?}", endpoint);
        assert!(rendered.contains("sftp.example.com"));
        assert!(!rendered.contains("hunter2"));
        assert_eq!(endpoint.address(), "sftp.example.com:22");
    }

    #[test]
    fn test_not_found_classification() {
        assert!(RemoteError::NotFound("/x".into()).is_not_found());
        let io = RemoteError::Io {
            path: "/x".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert!(io.is_not_found());
        let other = RemoteError::Protocol {
            path: "/x".into(),
            message: "permission denied".into(),
        };
        assert!(!other.is_not_found());
    }
}
