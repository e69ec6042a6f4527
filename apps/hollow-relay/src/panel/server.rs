//! Stream-socket front of the panel: one frame per connection, merged into
//! the shared monitor state.

use std::fmt;
use std::io;
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use relay_proto::frame::{read_body, read_prefix};
use relay_proto::FramingError;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use super::socket::SocketGuard;
use super::state::{MonitorPatch, SharedMonitor};
use crate::error::BindError;

/// Sleep between accept attempts when nothing is pending.
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// A publisher that connects and then stalls is cut off after this long.
pub const CONNECTION_READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
pub struct PanelStats {
    accepted: AtomicU64,
    merged: AtomicU64,
    failed: AtomicU64,
}

impl PanelStats {
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Connections whose frame decoded, whether or not it changed anything.
    pub fn merged(&self) -> u64 {
        self.merged.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Listens on the panel socket until stopped or dropped. The socket file is
/// removed once the accept thread has exited.
pub struct PanelServer {
    monitor: SharedMonitor,
    stats: Arc<PanelStats>,
    shutdown: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
    // Declared last so the file outlives the accept thread.
    socket: SocketGuard,
}

impl PanelServer {
    pub fn bind(path: impl Into<PathBuf>, monitor: SharedMonitor) -> Result<Self, BindError> {
        let (listener, socket) = SocketGuard::bind(path.into())?;
        listener
            .set_nonblocking(true)
            .map_err(|err| BindError::prepare(socket.path().display(), err))?;

        let stats = Arc::new(PanelStats::default());
        let shutdown = Arc::new(AtomicBool::new(false));
        let accept_thread = {
            let monitor = monitor.clone();
            let stats = Arc::clone(&stats);
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name("relay-panel-accept".into())
                .spawn(move || accept_loop(listener, &monitor, &stats, &shutdown))
                .map_err(|source| BindError::Spawn {
                    thread: "panel accept",
                    source,
                })?
        };

        info!(target: "relay::panel", path = %socket.path().display(), "panel listening");
        Ok(Self {
            monitor,
            stats,
            shutdown,
            accept_thread: Some(accept_thread),
            socket,
        })
    }

    pub fn socket_path(&self) -> &Path {
        self.socket.path()
    }

    pub fn monitor(&self) -> &SharedMonitor {
        &self.monitor
    }

    pub fn stats(&self) -> &PanelStats {
        &self.stats
    }

    /// Stop accepting. Connections already being served finish on their own.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.accept_thread.take() {
            if handle.join().is_err() {
                warn!(target: "relay::panel", "panel accept thread panicked");
            }
            debug!(target: "relay::panel", path = %self.socket.path().display(), "panel stopped");
        }
    }
}

impl Drop for PanelServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: UnixListener,
    monitor: &SharedMonitor,
    stats: &Arc<PanelStats>,
    shutdown: &AtomicBool,
) {
    let mut next_id = 0u64;
    while !shutdown.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, _)) => {
                next_id += 1;
                stats.accepted.fetch_add(1, Ordering::Relaxed);
                let connection = Connection::new(next_id, stream);
                let handler_monitor = monitor.clone();
                let handler_stats = Arc::clone(stats);
                let spawned = thread::Builder::new()
                    .name(format!("relay-panel-conn-{next_id}"))
                    .spawn(move || handle_connection(connection, &handler_monitor, &handler_stats));
                if let Err(err) = spawned {
                    // The connection went down with the closure; the peer sees a reset.
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(target: "relay::panel", conn = next_id, error = %err, "failed to spawn connection handler");
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                warn!(target: "relay::panel", error = %err, "panel accept failed");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
}

/// Where a connection is in its single-frame lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Accepted,
    ReadingPrefix,
    ReadingBody,
    Merging,
    Closed,
    Failed,
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionPhase::Accepted => "accepted",
            ConnectionPhase::ReadingPrefix => "reading-prefix",
            ConnectionPhase::ReadingBody => "reading-body",
            ConnectionPhase::Merging => "merging",
            ConnectionPhase::Closed => "closed",
            ConnectionPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to configure connection: {0}")]
    Configure(#[source] io::Error),
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error("frame payload is a {kind}, expected an object")]
    NotAnObject { kind: &'static str },
}

struct Connection {
    id: u64,
    stream: UnixStream,
    phase: ConnectionPhase,
    accepted_at: Instant,
    last_activity: Instant,
}

impl Connection {
    fn new(id: u64, stream: UnixStream) -> Self {
        let now = Instant::now();
        Self {
            id,
            stream,
            phase: ConnectionPhase::Accepted,
            accepted_at: now,
            last_activity: now,
        }
    }

    fn advance(&mut self, phase: ConnectionPhase) {
        self.phase = phase;
        self.last_activity = Instant::now();
        trace!(target: "relay::panel", conn = self.id, phase = %phase, "connection phase");
    }

    fn serve(&mut self, monitor: &SharedMonitor) -> Result<MonitorPatch, ConnectionError> {
        // Accepted sockets inherit non-blocking mode from the listener on
        // some platforms.
        self.stream
            .set_nonblocking(false)
            .and_then(|()| self.stream.set_read_timeout(Some(CONNECTION_READ_TIMEOUT)))
            .map_err(ConnectionError::Configure)?;

        self.advance(ConnectionPhase::ReadingPrefix);
        let len = read_prefix(&mut self.stream)?;
        self.advance(ConnectionPhase::ReadingBody);
        let payload: Value = read_body(&mut self.stream, len)?;

        self.advance(ConnectionPhase::Merging);
        let Value::Object(payload) = payload else {
            return Err(ConnectionError::NotAnObject {
                kind: json_kind(&payload),
            });
        };
        Ok(monitor.merge_payload(&payload))
    }

    fn close(&mut self, phase: ConnectionPhase) {
        let _ = self.stream.shutdown(Shutdown::Both);
        self.advance(phase);
    }
}

fn handle_connection(mut connection: Connection, monitor: &SharedMonitor, stats: &PanelStats) {
    match connection.serve(monitor) {
        Ok(patch) => {
            stats.merged.fetch_add(1, Ordering::Relaxed);
            for err in &patch.errors {
                warn!(target: "relay::panel", conn = connection.id, error = %err, "kept previous value");
            }
            if !patch.ignored.is_empty() {
                trace!(target: "relay::panel", conn = connection.id, keys = ?patch.ignored, "ignored keys");
            }
            connection.close(ConnectionPhase::Closed);
            debug!(
                target: "relay::panel",
                conn = connection.id,
                elapsed_ms = connection.accepted_at.elapsed().as_millis() as u64,
                changed = !patch.is_empty(),
                "frame merged"
            );
        }
        Err(err) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            let phase = connection.phase;
            let idle_ms = connection.last_activity.elapsed().as_millis() as u64;
            connection.close(ConnectionPhase::Failed);
            warn!(
                target: "relay::panel",
                conn = connection.id,
                phase = %phase,
                idle_ms,
                error = %err,
                "dropping panel connection"
            );
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn pair() -> (UnixStream, UnixStream) {
        UnixStream::pair().expect("socket pair")
    }

    #[test_timeout::timeout(5)]
    fn serve_merges_a_single_frame() {
        let (mut client, server) = pair();
        let monitor = SharedMonitor::new();
        relay_proto::write_frame(&mut client, &serde_json::json!({"episode": 9})).expect("write");

        let mut connection = Connection::new(1, server);
        let patch = connection.serve(&monitor).expect("serve");
        assert_eq!(patch.episode, Some(9));
        assert_eq!(connection.phase, ConnectionPhase::Merging);
        assert_eq!(monitor.snapshot().episode, 9);
    }

    #[test_timeout::timeout(5)]
    fn truncated_body_fails_in_body_phase() {
        let (mut client, server) = pair();
        client.write_all(&20u32.to_be_bytes()).expect("prefix");
        client.write_all(b"{\"epi").expect("partial body");
        drop(client);

        let mut connection = Connection::new(2, server);
        let err = connection.serve(&SharedMonitor::new()).unwrap_err();
        assert!(matches!(err, ConnectionError::Framing(FramingError::Truncated { .. })));
        assert_eq!(connection.phase, ConnectionPhase::ReadingBody);
    }

    #[test_timeout::timeout(5)]
    fn non_object_payload_is_rejected() {
        let (mut client, server) = pair();
        relay_proto::write_frame(&mut client, &serde_json::json!([1, 2, 3])).expect("write");

        let monitor = SharedMonitor::new();
        let err = Connection::new(3, server).serve(&monitor).unwrap_err();
        assert!(matches!(err, ConnectionError::NotAnObject { kind: "array" }));
        assert_eq!(monitor.snapshot().frames_merged, 0);
    }

    #[test_timeout::timeout(5)]
    fn handler_counts_failures() {
        let (client, server) = pair();
        drop(client);
        let stats = PanelStats::default();
        handle_connection(Connection::new(4, server), &SharedMonitor::new(), &stats);
        assert_eq!(stats.failed(), 1);
        assert_eq!(stats.merged(), 0);
    }
}
