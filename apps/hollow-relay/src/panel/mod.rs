//! Monitor panel: a stream-socket listener that merges trainer updates into
//! one shared record, and a render loop that draws it as a single line.

pub mod render;
pub mod server;
pub mod socket;
pub mod state;

pub use render::{panel_line, run_render_loop, PanelSink, PanelView, TerminalSink};
pub use server::{ConnectionError, ConnectionPhase, PanelServer, PanelStats};
pub use socket::SocketGuard;
pub use state::{
    capture_local_offset, ControllerInput, FieldError, MonitorPatch, MonitorState, SharedMonitor,
    TimestampParseError,
};
