use clap::{Args, Parser, Subcommand, ValueEnum};
use relay_proto::{Action, RecordingStatus};
use std::path::PathBuf;

use crate::config::{self, RelayConfig};
use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "hollow-relay",
    about = "Relay game state, trainer progress, and controller input between the game mod and a terminal panel",
    author,
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(flatten)]
    pub endpoints: EndpointArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "HOLLOW_RELAY_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        env = "HOLLOW_RELAY_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

/// Overrides for where the panel socket lives. Environment variables are
/// read by [`RelayConfig::from_env`]; flags win over both.
#[derive(Args, Debug, Clone, Default)]
pub struct EndpointArgs {
    #[arg(
        long = "runtime-dir",
        value_name = "DIR",
        global = true,
        help = "Directory holding the panel socket (defaults to the user runtime dir)"
    )]
    pub runtime_dir: Option<PathBuf>,

    #[arg(
        long = "app-id",
        value_name = "ID",
        global = true,
        help = "Application id used to name the panel socket"
    )]
    pub app_id: Option<String>,

    #[arg(
        long = "socket",
        value_name = "PATH",
        global = true,
        help = "Explicit panel socket path; overrides --runtime-dir and --app-id"
    )]
    pub socket: Option<PathBuf>,
}

impl EndpointArgs {
    pub fn apply(&self, config: &mut RelayConfig) {
        if let Some(dir) = &self.runtime_dir {
            config.runtime_dir = dir.clone();
        }
        if let Some(app_id) = &self.app_id {
            config.app_id = app_id.clone();
        }
    }

    pub fn socket_path(&self, config: &RelayConfig) -> PathBuf {
        self.socket
            .clone()
            .unwrap_or_else(|| config.panel_socket_path())
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the monitor panel: accept trainer updates and draw them on one line
    Panel(PanelArgs),
    /// Receive game-state datagrams and report the live state
    Listen(ListenArgs),
    /// Send one update to a running panel
    Publish(PublishArgs),
    /// Send controller input or control commands to the game mod
    Input(InputArgs),
    /// Open the panel in a one-line kitty panel at the bottom of the screen
    SpawnPanel(SpawnPanelArgs),
}

#[derive(Args, Debug, Default)]
pub struct PanelArgs {
    #[arg(
        long = "render-hz",
        value_name = "HZ",
        help = "Redraw rate, clamped to 1..=60 (defaults to HOLLOW_RELAY_RENDER_HZ or 10)"
    )]
    pub render_hz: Option<u32>,
}

#[derive(Args, Debug, Default)]
pub struct ListenArgs {
    #[arg(long, value_name = "HOST", help = "Address to bind (defaults to HOLLOW_RELAY_HOST or 127.0.0.1)")]
    pub host: Option<String>,

    #[arg(long, value_name = "PORT", help = "UDP port to bind (defaults to HOLLOW_RELAY_PORT or 9999)")]
    pub port: Option<u16>,

    #[arg(
        long = "report-ms",
        value_name = "MS",
        default_value_t = 1000,
        help = "Interval between state reports"
    )]
    pub report_ms: u64,

    #[arg(
        long = "dump",
        action = clap::ArgAction::SetTrue,
        help = "Print the full state as JSON with each report"
    )]
    pub dump: bool,

    #[arg(
        long = "request-state",
        action = clap::ArgAction::SetTrue,
        help = "Ask the game for a full update once the receiver is bound"
    )]
    pub request_state: bool,

    #[arg(long = "game-addr", value_name = "ADDR", help = "Game mod address (defaults to HOLLOW_RELAY_GAME_ADDR or 127.0.0.1:9998)")]
    pub game_addr: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct PublishArgs {
    #[arg(long, value_name = "REWARD")]
    pub reward: Option<f64>,

    #[arg(long, value_name = "N")]
    pub episode: Option<u64>,

    #[arg(long = "obs-status", value_enum, value_name = "STATUS")]
    pub obs_status: Option<StatusArg>,

    #[arg(
        long = "press",
        value_enum,
        value_delimiter = ',',
        value_name = "ACTIONS",
        help = "Actions to show as held; every other action is shown released"
    )]
    pub press: Option<Vec<ActionArg>>,

    #[arg(
        long = "start-now",
        action = clap::ArgAction::SetTrue,
        help = "Reset the run clock to the current time"
    )]
    pub start_now: bool,

    #[arg(
        long = "spawn-now",
        action = clap::ArgAction::SetTrue,
        help = "Reset the alive clock to the current time"
    )]
    pub spawn_now: bool,

    #[arg(
        long = "json",
        value_name = "OBJECT",
        conflicts_with_all = ["reward", "episode", "obs_status", "press", "start_now", "spawn_now"],
        help = "Send this JSON object verbatim instead of building one from flags"
    )]
    pub json: Option<String>,

    #[arg(
        long = "timeout-ms",
        value_name = "MS",
        default_value_t = 250,
        help = "Give up if the panel has not accepted and read the update within this long"
    )]
    pub timeout_ms: u64,
}

#[derive(Args, Debug, Default)]
pub struct InputArgs {
    #[arg(long = "game-addr", value_name = "ADDR", help = "Game mod address (defaults to HOLLOW_RELAY_GAME_ADDR or 127.0.0.1:9998)")]
    pub game_addr: Option<String>,

    #[arg(long = "press", value_enum, value_delimiter = ',', value_name = "ACTIONS")]
    pub press: Vec<ActionArg>,

    #[arg(long = "release", value_enum, value_delimiter = ',', value_name = "ACTIONS")]
    pub release: Vec<ActionArg>,

    #[arg(long, action = clap::ArgAction::SetTrue, conflicts_with_all = ["press", "release", "get_state"])]
    pub reset: bool,

    #[arg(long = "get-state", action = clap::ArgAction::SetTrue, conflicts_with_all = ["press", "release"])]
    pub get_state: bool,
}

#[derive(Args, Debug)]
pub struct SpawnPanelArgs {
    #[arg(long = "kitten", value_name = "PROGRAM", default_value = "kitten")]
    pub kitten: String,

    #[arg(long, value_name = "N", default_value_t = 1)]
    pub lines: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ActionArg {
    Up,
    Left,
    Down,
    Right,
    Jump,
    Attack,
}

impl From<ActionArg> for Action {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::Up => Action::Up,
            ActionArg::Left => Action::Left,
            ActionArg::Down => Action::Down,
            ActionArg::Right => Action::Right,
            ActionArg::Jump => Action::Jump,
            ActionArg::Attack => Action::Attack,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    Unknown,
    Recording,
    Idle,
    Disconnected,
}

impl From<StatusArg> for RecordingStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Unknown => RecordingStatus::Unknown,
            StatusArg::Recording => RecordingStatus::Recording,
            StatusArg::Idle => RecordingStatus::Idle,
            StatusArg::Disconnected => RecordingStatus::Disconnected,
        }
    }
}

/// Environment first, then command-line overrides.
pub fn resolve_config(endpoints: &EndpointArgs) -> RelayConfig {
    let mut config = RelayConfig::from_env();
    endpoints.apply(&mut config);
    config.render_hz = config::clamp_render_hz(config.render_hz);
    config
}
