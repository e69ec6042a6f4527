//! Best-effort delivery of monitor updates to whichever panel is listening.

use std::io::{self, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use relay_proto::{FrameStage, FramingError};
use serde::Serialize;
use socket2::{Domain, SockAddr, Socket, Type};
use thiserror::Error;
use tracing::{debug, trace};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("no panel listening at {}", .path.display())]
    NoListener { path: PathBuf },
    /// The socket is bound but its backlog is full: the panel is not accepting.
    #[error("panel at {} did not accept within {timeout:?}", .path.display())]
    Unresponsive { path: PathBuf, timeout: Duration },
    #[error("failed to connect to {}: {source}", .path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Framing(#[from] FramingError),
}

/// Opens one connection per update, writes a single frame, and hangs up.
#[derive(Debug, Clone)]
pub struct StreamPublisher {
    socket_path: PathBuf,
    timeout: Duration,
}

impl StreamPublisher {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Returns false when the update could not be delivered. A missing panel
    /// is expected, so nothing is raised and nothing is retried.
    pub fn send<T>(&self, update: &T) -> bool
    where
        T: Serialize + ?Sized,
    {
        match self.try_send(update) {
            Ok(()) => true,
            Err(err) => {
                debug!(target: "relay::publisher", error = %err, "panel update not delivered");
                false
            }
        }
    }

    pub fn try_send<T>(&self, update: &T) -> Result<(), PublishError>
    where
        T: Serialize + ?Sized,
    {
        let frame = relay_proto::encode(update)?;
        if !self.socket_path.exists() {
            return Err(self.no_listener());
        }

        let mut stream = self.connect()?;
        stream
            .write_all(&frame)
            .and_then(|()| stream.flush())
            .map_err(|source| FramingError::Io {
                stage: FrameStage::Body,
                source,
            })?;
        let _ = stream.shutdown(Shutdown::Both);

        trace!(
            target: "relay::publisher",
            path = %self.socket_path.display(),
            bytes = frame.len(),
            "panel update sent"
        );
        Ok(())
    }

    /// Both the connect and every later write are bounded by the timeout, so
    /// a wedged panel costs the caller at most that long.
    fn connect(&self) -> Result<UnixStream, PublishError> {
        let connect_error = |source| PublishError::Connect {
            path: self.socket_path.clone(),
            source,
        };
        let addr = SockAddr::unix(&self.socket_path).map_err(connect_error)?;
        let socket = Socket::new(Domain::UNIX, Type::STREAM, None).map_err(connect_error)?;
        socket
            .connect_timeout(&addr, self.timeout)
            .map_err(|source| match source.kind() {
                // A stale file from a crashed panel refuses connections.
                io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => self.no_listener(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => PublishError::Unresponsive {
                    path: self.socket_path.clone(),
                    timeout: self.timeout,
                },
                _ => connect_error(source),
            })?;
        socket
            .set_nonblocking(false)
            .and_then(|()| socket.set_write_timeout(Some(self.timeout)))
            .map_err(connect_error)?;
        Ok(UnixStream::from(std::os::fd::OwnedFd::from(socket)))
    }

    fn no_listener(&self) -> PublishError {
        PublishError::NoListener {
            path: self.socket_path.clone(),
        }
    }
}
