//! Wire formats shared by the relay's producers and consumers.

pub mod frame;
pub mod game;
pub mod monitor;
pub mod update;

pub use frame::{decode, encode, write_frame, FrameStage, FramingError, MAX_FRAME_LEN};
pub use game::GameCommand;
pub use monitor::{fields, Action, MonitorUpdate, RecordingStatus};
pub use update::{DecodeError, StateSnapshot, UpdateMessage};
