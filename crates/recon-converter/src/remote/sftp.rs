//! SFTP implementation of the remote file store
//!
//! Built on `ssh2` (libssh2). Every session gets an explicit TCP connect
//! timeout plus a read/write timeout on both the socket and the libssh2
//! session, so a hung server surfaces as an error instead of blocking a
//! pipeline forever.

use ssh2::{ErrorCode, Session, Sftp};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use super::{RemoteConnector, RemoteEndpoint, RemoteEntry, RemoteError, RemoteSession};

/// libssh2 status codes that mean "path does not exist"
const SFTP_NO_SUCH_FILE: i32 = 2;
const SFTP_NO_SUCH_PATH: i32 = 10;

/// Opens password-authenticated SFTP sessions
#[derive(Debug, Clone)]
pub struct SftpConnector {
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl SftpConnector {
    pub fn new(connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            io_timeout,
        }
    }

    fn open_tcp(&self, endpoint: &RemoteEndpoint) -> Result<TcpStream, RemoteError> {
        let connect_err = |source| RemoteError::Connect {
            endpoint: endpoint.address(),
            source,
        };

        let addrs = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(connect_err)?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream
                        .set_read_timeout(Some(self.io_timeout))
                        .map_err(connect_err)?;
                    stream
                        .set_write_timeout(Some(self.io_timeout))
                        .map_err(connect_err)?;
                    return Ok(stream);
                },
                Err(e) => {
                    debug!(address = %addr, error = %e, "TCP connect attempt failed");
                    last_err = Some(e);
                },
            }
        }

        Err(connect_err(last_err.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "host resolved to no addresses")
        })))
    }
}

impl RemoteConnector for SftpConnector {
    fn connect(&self, endpoint: &RemoteEndpoint) -> Result<Box<dyn RemoteSession>, RemoteError> {
        debug!(endpoint = %endpoint.address(), user = %endpoint.user, "Opening SFTP session");

        let handshake_err = |e: ssh2::Error| RemoteError::Handshake {
            endpoint: endpoint.address(),
            message: e.message().to_string(),
        };

        let tcp = self.open_tcp(endpoint)?;
        let mut session = Session::new().map_err(handshake_err)?;
        session.set_tcp_stream(tcp);
        session.set_timeout(u32::try_from(self.io_timeout.as_millis()).unwrap_or(u32::MAX));
        session.handshake().map_err(handshake_err)?;

        // Failed password auth reports through `authenticated()` as well as the error.
        if let Err(e) = session.userauth_password(&endpoint.user, &endpoint.password) {
            debug!(error = %e, "Password authentication failed");
        }
        if !session.authenticated() {
            return Err(RemoteError::Auth {
                endpoint: endpoint.address(),
                user: endpoint.user.clone(),
            });
        }

        let sftp = session.sftp().map_err(handshake_err)?;

        Ok(Box::new(SftpSession {
            endpoint: endpoint.address(),
            sftp: Some(sftp),
            session,
        }))
    }
}

/// Authenticated SFTP session; disconnects on drop
pub struct SftpSession {
    endpoint: String,
    sftp: Option<Sftp>,
    session: Session,
}

impl SftpSession {
    fn sftp(&self, path: &str) -> Result<&Sftp, RemoteError> {
        self.sftp.as_ref().ok_or_else(|| RemoteError::Protocol {
            path: path.to_string(),
            message: "session already closed".to_string(),
        })
    }
}

fn map_ssh_error(path: &str, err: ssh2::Error) -> RemoteError {
    match err.code() {
        ErrorCode::SFTP(SFTP_NO_SUCH_FILE) | ErrorCode::SFTP(SFTP_NO_SUCH_PATH) => {
            RemoteError::NotFound(path.to_string())
        },
        _ => RemoteError::Protocol {
            path: path.to_string(),
            message: err.message().to_string(),
        },
    }
}

fn to_system_time(mtime: Option<u64>) -> Option<SystemTime> {
    mtime.map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
}

impl RemoteSession for SftpSession {
    fn list(&self, dir: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let entries = self
            .sftp(dir)?
            .readdir(Path::new(dir))
            .map_err(|e| map_ssh_error(dir, e))?;

        Ok(entries
            .into_iter()
            .filter_map(|(path, stat)| {
                let name = path.file_name()?.to_string_lossy().into_owned();
                Some(RemoteEntry {
                    name,
                    modified: to_system_time(stat.mtime),
                    is_dir: stat.is_dir(),
                })
            })
            .collect())
    }

    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>, RemoteError> {
        let file = self
            .sftp(path)?
            .open(Path::new(path))
            .map_err(|e| map_ssh_error(path, e))?;
        Ok(Box::new(file))
    }

    fn create(&self, path: &str) -> Result<Box<dyn Write + Send>, RemoteError> {
        let file = self
            .sftp(path)?
            .create(Path::new(path))
            .map_err(|e| map_ssh_error(path, e))?;
        Ok(Box::new(file))
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), RemoteError> {
        self.sftp(from)?
            .rename(Path::new(from), Path::new(to), None)
            .map_err(|e| map_ssh_error(from, e))
    }

    fn remove(&self, path: &str) -> Result<(), RemoteError> {
        self.sftp(path)?
            .unlink(Path::new(path))
            .map_err(|e| map_ssh_error(path, e))
    }
}

impl Drop for SftpSession {
    fn drop(&mut self) {
        // The SFTP channel must go before the transport it rides on.
        drop(self.sftp.take());
        if let Err(e) = self.session.disconnect(None, "recon session closed", None) {
            warn!(endpoint = %self.endpoint, error = %e, "SFTP session did not disconnect cleanly");
        } else {
            debug!(endpoint = %self.endpoint, "SFTP session closed");
        }
    }
}
