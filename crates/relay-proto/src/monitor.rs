//! Payload shapes shared by panel publishers and the panel server.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Keys the panel server merges. Anything else in a frame is ignored.
pub mod fields {
    pub const CONTROLLER_INPUT: &str = "controller_input";
    pub const OBS_STATUS: &str = "obs_status";
    pub const SPAWN_TIME: &str = "spawn_time";
    pub const START_TIME: &str = "start_time";
    pub const REWARD: &str = "reward";
    pub const EPISODE: &str = "episode";
}

/// Controller actions the agent can hold down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Up,
    Left,
    Down,
    Right,
    Jump,
    Attack,
}

impl Action {
    /// Display order, which is also the positional order of array payloads.
    pub const ALL: [Action; 6] = [
        Action::Up,
        Action::Left,
        Action::Down,
        Action::Right,
        Action::Jump,
        Action::Attack,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Up => "up",
            Action::Left => "left",
            Action::Down => "down",
            Action::Right => "right",
            Action::Jump => "jump",
            Action::Attack => "attack",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Action::ALL.into_iter().find(|action| action.as_str() == name)
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recording tool state as reported by the training loop.
///
/// Travels as an integer: 0 unknown, 1 recording, 2 idle, 3 disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum RecordingStatus {
    #[default]
    Unknown,
    Recording,
    Idle,
    Disconnected,
}

impl RecordingStatus {
    pub fn code(self) -> u8 {
        match self {
            RecordingStatus::Unknown => 0,
            RecordingStatus::Recording => 1,
            RecordingStatus::Idle => 2,
            RecordingStatus::Disconnected => 3,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(RecordingStatus::Unknown),
            1 => Some(RecordingStatus::Recording),
            2 => Some(RecordingStatus::Idle),
            3 => Some(RecordingStatus::Disconnected),
            _ => None,
        }
    }
}

impl From<RecordingStatus> for u8 {
    fn from(status: RecordingStatus) -> Self {
        status.code()
    }
}

impl TryFrom<u8> for RecordingStatus {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        RecordingStatus::from_code(u64::from(code))
            .ok_or_else(|| format!("unknown recording status {code}"))
    }
}

/// Partial monitor payload built by publishers. Unset fields are left out of
/// the frame entirely so the server keeps its current value for them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_input: Option<BTreeMap<Action, bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obs_status: Option<RecordingStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawn_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<u64>,
}

impl MonitorUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pressed(mut self, action: Action, pressed: bool) -> Self {
        self.controller_input
            .get_or_insert_with(BTreeMap::new)
            .insert(action, pressed);
        self
    }

    /// Report every action, pressed or not.
    pub fn controller(mut self, pressed: impl IntoIterator<Item = Action>) -> Self {
        let mut input: BTreeMap<Action, bool> =
            Action::ALL.into_iter().map(|action| (action, false)).collect();
        for action in pressed {
            input.insert(action, true);
        }
        self.controller_input = Some(input);
        self
    }

    pub fn obs_status(mut self, status: RecordingStatus) -> Self {
        self.obs_status = Some(status);
        self
    }

    /// An instant that cannot be rendered as RFC 3339 leaves the field unset.
    pub fn spawn_time(mut self, at: OffsetDateTime) -> Self {
        self.spawn_time = at.format(&Rfc3339).ok();
        self
    }

    pub fn start_time(mut self, at: OffsetDateTime) -> Self {
        self.start_time = at.format(&Rfc3339).ok();
        self
    }

    pub fn reward(mut self, reward: f64) -> Self {
        self.reward = Some(reward);
        self
    }

    pub fn episode(mut self, episode: u64) -> Self {
        self.episode = Some(episode);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}
