//! Local telemetry bridge between a game mod, a training loop, and a
//! terminal monitor panel.
//!
//! Game state arrives as UDP datagrams and lands in a [`StateStore`]. The
//! trainer pushes progress to the panel over a Unix stream socket with
//! [`StreamPublisher`], and the panel merges each frame into its own
//! [`panel::MonitorState`] and redraws it on a fixed tick.

#[cfg(not(unix))]
compile_error!("hollow-relay needs Unix domain sockets and is only supported on Unix platforms");

pub mod config;
pub mod error;
pub mod game_link;
pub mod panel;
pub mod publisher;
pub mod receiver;
pub mod shutdown;
pub mod store;
pub mod telemetry;
pub mod terminal;

pub use config::RelayConfig;
pub use error::BindError;
pub use game_link::GameLink;
pub use panel::{PanelServer, SharedMonitor};
pub use publisher::{PublishError, StreamPublisher};
pub use receiver::DatagramReceiver;
pub use store::StateStore;
