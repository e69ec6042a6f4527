//! Datagram side of the relay: game-state updates in, [`StateStore`] out.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use relay_proto::UpdateMessage;
use tracing::{debug, info, trace, warn};

use crate::error::BindError;
use crate::game_link::GameLink;
use crate::store::StateStore;
use crate::telemetry::hexdump;

/// Largest datagram the receive buffer holds.
pub const MAX_DATAGRAM_LEN: usize = 1024 * 1024;
/// How long a receive blocks before the shutdown flag is re-checked.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const HEXDUMP_LIMIT: usize = 256;

/// Counters maintained by the receive loop.
#[derive(Debug, Default)]
pub struct ReceiverStats {
    received: AtomicU64,
    applied: AtomicU64,
    unknown: AtomicU64,
    dropped: AtomicU64,
}

impl ReceiverStats {
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    pub fn unknown(&self) -> u64 {
        self.unknown.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Owns the receive thread. Dropping it stops the thread.
pub struct DatagramReceiver {
    local_addr: SocketAddr,
    // Second handle on the bound socket, for sending to the game.
    socket: UdpSocket,
    listening: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<ReceiverStats>,
    worker: Option<JoinHandle<()>>,
}

impl DatagramReceiver {
    pub fn spawn(addr: &str, store: Arc<StateStore>) -> Result<Self, BindError> {
        Self::spawn_with(addr, store, DEFAULT_POLL_INTERVAL)
    }

    /// Bind `addr` and start the receive thread. Bind failures are returned
    /// here, before any thread exists.
    pub fn spawn_with(
        addr: &str,
        store: Arc<StateStore>,
        poll_interval: Duration,
    ) -> Result<Self, BindError> {
        let socket = UdpSocket::bind(addr).map_err(|err| BindError::bind(addr, err))?;
        socket
            .set_read_timeout(Some(poll_interval))
            .map_err(|err| BindError::prepare(addr, err))?;
        let local_addr = socket
            .local_addr()
            .map_err(|err| BindError::prepare(addr, err))?;
        let sender = socket
            .try_clone()
            .map_err(|err| BindError::prepare(addr, err))?;

        let listening = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(ReceiverStats::default());

        let worker = {
            let listening = Arc::clone(&listening);
            let shutdown = Arc::clone(&shutdown);
            let stats = Arc::clone(&stats);
            thread::Builder::new()
                .name("relay-datagram".into())
                .spawn(move || {
                    receive_loop(socket, &store, &stats, &shutdown, poll_interval);
                    listening.store(false, Ordering::Release);
                })
                .map_err(|source| BindError::Spawn {
                    thread: "datagram receiver",
                    source,
                })?
        };

        info!(target: "relay::receiver", addr = %local_addr, "datagram receiver listening");

        Ok(Self {
            local_addr,
            socket: sender,
            listening,
            shutdown,
            stats,
            worker: Some(worker),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    /// Whether the receive thread is still alive.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    /// A link to the game that sends from this receiver's address, so the
    /// mod's replies land in the receive loop.
    pub fn game_link(&self, target: &str) -> Result<GameLink, BindError> {
        let socket = self
            .socket
            .try_clone()
            .map_err(|err| BindError::prepare(self.local_addr, err))?;
        GameLink::from_socket(socket, target)
    }

    /// Ask the loop to exit and wait for it. The pending receive returns
    /// within one poll interval.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(target: "relay::receiver", "datagram receiver thread panicked");
            }
            debug!(target: "relay::receiver", addr = %self.local_addr, "datagram receiver stopped");
        }
        self.listening.store(false, Ordering::Release);
    }
}

impl Drop for DatagramReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(
    socket: UdpSocket,
    store: &StateStore,
    stats: &ReceiverStats,
    shutdown: &AtomicBool,
    poll_interval: Duration,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
    while !shutdown.load(Ordering::Acquire) {
        let (len, peer) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(err) => {
                // ICMP errors from earlier sends surface here on some
                // platforms; none of them end the loop.
                warn!(target: "relay::receiver", error = %err, "datagram receive failed");
                thread::sleep(poll_interval);
                continue;
            }
        };
        stats.received.fetch_add(1, Ordering::Relaxed);
        handle_datagram(&buf[..len], peer, store, stats);
    }
}

fn handle_datagram(bytes: &[u8], peer: SocketAddr, store: &StateStore, stats: &ReceiverStats) {
    match UpdateMessage::decode(bytes) {
        Ok(UpdateMessage::Unknown { tag }) => {
            stats.unknown.fetch_add(1, Ordering::Relaxed);
            debug!(target: "relay::receiver", %peer, tag = %tag, "ignoring unknown message type");
        }
        Ok(message) => {
            let tag = message.tag().to_owned();
            store.apply(message);
            stats.applied.fetch_add(1, Ordering::Relaxed);
            trace!(target: "relay::receiver", %peer, tag = %tag, bytes = bytes.len(), "applied update");
        }
        Err(err) => {
            stats.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                target: "relay::receiver",
                %peer,
                bytes = bytes.len(),
                error = %err,
                "dropping malformed datagram"
            );
            trace!(
                target: "relay::receiver",
                "rejected payload:\n{}",
                hexdump(&bytes[..bytes.len().min(HEXDUMP_LIMIT)])
            );
        }
    }
}
