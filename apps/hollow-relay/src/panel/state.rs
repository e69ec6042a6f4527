//! The render-facing monitor record and the allow-list merge into it.

use std::borrow::Cow;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use relay_proto::{fields, Action, RecordingStatus};
use serde_json::{Map, Value};
use thiserror::Error;
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

static LOCAL_OFFSET: OnceLock<UtcOffset> = OnceLock::new();

/// Record the local UTC offset used for timestamps that carry none.
///
/// The offset can only be read reliably while the process is single
/// threaded, so call this first thing in `main`. Without it naive
/// timestamps are taken as UTC.
pub fn capture_local_offset() -> UtcOffset {
    *LOCAL_OFFSET.get_or_init(|| UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC))
}

fn local_offset() -> UtcOffset {
    LOCAL_OFFSET.get().copied().unwrap_or(UtcOffset::UTC)
}

/// Pressed state for the fixed action set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerInput([bool; 6]);

impl ControllerInput {
    pub fn is_pressed(&self, action: Action) -> bool {
        self.0[action.index()]
    }

    pub fn set(&mut self, action: Action, pressed: bool) {
        self.0[action.index()] = pressed;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Action, bool)> + '_ {
        Action::ALL.into_iter().map(|action| (action, self.is_pressed(action)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorState {
    pub controller_input: ControllerInput,
    pub obs_status: RecordingStatus,
    pub spawn_time: OffsetDateTime,
    pub start_time: OffsetDateTime,
    pub reward: f64,
    pub episode: u64,
    /// Frames that changed at least one field.
    pub frames_merged: u64,
}

impl MonitorState {
    pub fn new(now: OffsetDateTime) -> Self {
        Self {
            controller_input: ControllerInput::default(),
            obs_status: RecordingStatus::Unknown,
            spawn_time: now,
            start_time: now,
            reward: 0.0,
            episode: 0,
            frames_merged: 0,
        }
    }

    pub fn apply(&mut self, patch: &MonitorPatch) {
        if patch.is_empty() {
            return;
        }
        for &(action, pressed) in &patch.controller_input {
            self.controller_input.set(action, pressed);
        }
        if let Some(status) = patch.obs_status {
            self.obs_status = status;
        }
        if let Some(at) = patch.spawn_time {
            self.spawn_time = at;
        }
        if let Some(at) = patch.start_time {
            self.start_time = at;
        }
        if let Some(reward) = patch.reward {
            self.reward = reward;
        }
        if let Some(episode) = patch.episode {
            self.episode = episode;
        }
        self.frames_merged += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("`{field}` is not an ISO-8601 timestamp: {text:?}")]
pub struct TimestampParseError {
    pub field: &'static str,
    pub text: String,
}

/// Why a recognized field was left unchanged.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    #[error(transparent)]
    Timestamp(#[from] TimestampParseError),
    #[error("`{field}` has an unusable value {value}")]
    Value { field: &'static str, value: Value },
}

/// The recognized, well-typed subset of one frame. Built before the monitor
/// lock is taken so the lock only covers plain assignments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorPatch {
    pub controller_input: Vec<(Action, bool)>,
    pub obs_status: Option<RecordingStatus>,
    pub spawn_time: Option<OffsetDateTime>,
    pub start_time: Option<OffsetDateTime>,
    pub reward: Option<f64>,
    pub episode: Option<u64>,
    /// Recognized fields that were present but unusable.
    pub errors: Vec<FieldError>,
    /// Keys outside the allow-list, plus unknown action names.
    pub ignored: Vec<String>,
}

impl MonitorPatch {
    pub fn from_payload(payload: &Map<String, Value>) -> Self {
        Self::from_payload_with_offset(payload, local_offset())
    }

    pub fn from_payload_with_offset(payload: &Map<String, Value>, naive_offset: UtcOffset) -> Self {
        let mut patch = MonitorPatch::default();
        for (key, value) in payload {
            match key.as_str() {
                fields::CONTROLLER_INPUT => patch.read_controller(value),
                fields::OBS_STATUS => {
                    match value.as_u64().and_then(RecordingStatus::from_code) {
                        Some(status) => patch.obs_status = Some(status),
                        None => patch.reject(fields::OBS_STATUS, value),
                    }
                }
                fields::SPAWN_TIME => {
                    patch.spawn_time = patch.read_timestamp(fields::SPAWN_TIME, value, naive_offset)
                }
                fields::START_TIME => {
                    patch.start_time = patch.read_timestamp(fields::START_TIME, value, naive_offset)
                }
                fields::REWARD => match value.as_f64() {
                    Some(reward) => patch.reward = Some(reward),
                    None => patch.reject(fields::REWARD, value),
                },
                fields::EPISODE => match value.as_u64() {
                    Some(episode) => patch.episode = Some(episode),
                    None => patch.reject(fields::EPISODE, value),
                },
                _ => patch.ignored.push(key.clone()),
            }
        }
        patch
    }

    /// True when applying the patch would change nothing.
    pub fn is_empty(&self) -> bool {
        self.controller_input.is_empty()
            && self.obs_status.is_none()
            && self.spawn_time.is_none()
            && self.start_time.is_none()
            && self.reward.is_none()
            && self.episode.is_none()
    }

    fn reject(&mut self, field: &'static str, value: &Value) {
        self.errors.push(FieldError::Value {
            field,
            value: value.clone(),
        });
    }

    fn read_controller(&mut self, value: &Value) {
        match value {
            Value::Object(input) => {
                for (name, pressed) in input {
                    match (Action::from_name(name), pressed.as_bool()) {
                        (Some(action), Some(pressed)) => self.controller_input.push((action, pressed)),
                        (Some(_), None) => self.reject(fields::CONTROLLER_INPUT, pressed),
                        (None, _) => self.ignored.push(format!("{}.{name}", fields::CONTROLLER_INPUT)),
                    }
                }
            }
            // Positional form: up, left, down, right, jump, attack.
            Value::Array(input) if input.len() <= Action::ALL.len() => {
                for (action, pressed) in Action::ALL.into_iter().zip(input) {
                    match pressed.as_bool() {
                        Some(pressed) => self.controller_input.push((action, pressed)),
                        None => self.reject(fields::CONTROLLER_INPUT, pressed),
                    }
                }
            }
            other => self.reject(fields::CONTROLLER_INPUT, other),
        }
    }

    fn read_timestamp(
        &mut self,
        field: &'static str,
        value: &Value,
        naive_offset: UtcOffset,
    ) -> Option<OffsetDateTime> {
        let Some(text) = value.as_str() else {
            self.reject(field, value);
            return None;
        };
        match parse_timestamp(field, text, naive_offset) {
            Ok(at) => Some(at),
            Err(err) => {
                self.errors.push(err.into());
                None
            }
        }
    }
}

/// Accepts RFC 3339 and ISO-8601 with or without an offset. Timestamps with
/// no offset are read in `naive_offset`.
pub fn parse_timestamp(
    field: &'static str,
    text: &str,
    naive_offset: UtcOffset,
) -> Result<OffsetDateTime, TimestampParseError> {
    let text = text.trim();
    let normalized = with_date_separator(text);
    let candidate = normalized.as_ref();
    OffsetDateTime::parse(candidate, &Rfc3339)
        .or_else(|_| OffsetDateTime::parse(candidate, &Iso8601::DEFAULT))
        .or_else(|_| {
            PrimitiveDateTime::parse(candidate, &Iso8601::DEFAULT)
                .map(|naive| naive.assume_offset(naive_offset))
        })
        .map_err(|_| TimestampParseError {
            field,
            text: text.to_owned(),
        })
}

/// `2024-03-10 12:30:00` becomes `2024-03-10T12:30:00`.
fn with_date_separator(text: &str) -> Cow<'_, str> {
    match text.as_bytes().get(10) {
        Some(b' ') => Cow::Owned(format!("{}T{}", &text[..10], &text[11..])),
        _ => Cow::Borrowed(text),
    }
}

/// Cloneable handle to the one monitor record and its lock.
#[derive(Debug, Clone)]
pub struct SharedMonitor {
    inner: Arc<Mutex<MonitorState>>,
}

impl SharedMonitor {
    pub fn new() -> Self {
        Self::with_state(MonitorState::new(OffsetDateTime::now_utc()))
    }

    pub fn with_state(state: MonitorState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    pub fn snapshot(&self) -> MonitorState {
        self.inner.lock().clone()
    }

    /// Run `f` against the state while holding the lock.
    pub fn read<R>(&self, f: impl FnOnce(&MonitorState) -> R) -> R {
        f(&self.inner.lock())
    }

    /// Merge the recognized fields of `payload`. Returns the patch so callers
    /// can report what was skipped.
    pub fn merge_payload(&self, payload: &Map<String, Value>) -> MonitorPatch {
        let patch = MonitorPatch::from_payload(payload);
        if !patch.is_empty() {
            self.inner.lock().apply(&patch);
        }
        patch
    }
}

impl Default for SharedMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn fresh() -> SharedMonitor {
        SharedMonitor::with_state(MonitorState::new(datetime!(2024-01-01 00:00 UTC)))
    }

    #[test]
    fn recognized_fields_are_merged() {
        let monitor = fresh();
        monitor.merge_payload(&object(json!({
            "controller_input": {"jump": true, "left": true},
            "obs_status": 1,
            "reward": 12.5,
            "episode": 4,
        })));
        let state = monitor.snapshot();
        assert!(state.controller_input.is_pressed(Action::Jump));
        assert!(state.controller_input.is_pressed(Action::Left));
        assert!(!state.controller_input.is_pressed(Action::Attack));
        assert_eq!(state.obs_status, RecordingStatus::Recording);
        assert_eq!(state.reward, 12.5);
        assert_eq!(state.episode, 4);
        assert_eq!(state.frames_merged, 1);
    }

    #[test]
    fn unrecognized_keys_are_ignored() {
        let monitor = fresh();
        let patch = monitor.merge_payload(&object(json!({"x": 1, "hitboxes": []})));
        assert!(patch.is_empty());
        assert_eq!(patch.ignored.len(), 2);
        assert_eq!(monitor.snapshot(), MonitorState::new(datetime!(2024-01-01 00:00 UTC)));
    }

    #[test]
    fn partial_controller_input_keeps_other_actions() {
        let monitor = fresh();
        monitor.merge_payload(&object(json!({"controller_input": {"up": true, "attack": true}})));
        monitor.merge_payload(&object(json!({"controller_input": {"up": false, "focus": true}})));
        let input = monitor.snapshot().controller_input;
        assert!(!input.is_pressed(Action::Up));
        assert!(input.is_pressed(Action::Attack));
    }

    #[test]
    fn positional_controller_input_is_accepted() {
        let monitor = fresh();
        monitor.merge_payload(&object(json!({
            "controller_input": [false, true, false, true, false, true]
        })));
        let pressed: Vec<Action> = monitor
            .snapshot()
            .controller_input
            .iter()
            .filter_map(|(action, pressed)| pressed.then_some(action))
            .collect();
        assert_eq!(pressed, vec![Action::Left, Action::Right, Action::Attack]);
    }

    #[test]
    fn bad_timestamp_keeps_previous_value() {
        let monitor = fresh();
        let patch = monitor.merge_payload(&object(json!({
            "start_time": "yesterday-ish",
            "episode": 2,
        })));
        assert!(matches!(
            patch.errors.as_slice(),
            [FieldError::Timestamp(TimestampParseError { field: "start_time", .. })]
        ));
        let state = monitor.snapshot();
        assert_eq!(state.start_time, datetime!(2024-01-01 00:00 UTC));
        assert_eq!(state.episode, 2);
    }

    #[test]
    fn timestamps_parse_with_and_without_offset() {
        let offset = UtcOffset::from_hms(-5, 0, 0).unwrap();
        assert_eq!(
            parse_timestamp("start_time", "2024-03-10T12:30:00Z", offset).unwrap(),
            datetime!(2024-03-10 12:30 UTC)
        );
        assert_eq!(
            parse_timestamp("start_time", "2024-03-10T12:30:00+02:00", offset).unwrap(),
            datetime!(2024-03-10 10:30 UTC)
        );
        assert_eq!(
            parse_timestamp("spawn_time", "2024-03-10T12:30:00", offset).unwrap(),
            datetime!(2024-03-10 17:30 UTC)
        );
        assert!(parse_timestamp("spawn_time", "", offset).is_err());
    }

    #[test]
    fn space_separated_timestamps_are_accepted() {
        let offset = UtcOffset::from_hms(-5, 0, 0).unwrap();
        assert_eq!(
            parse_timestamp("spawn_time", "2024-03-10 12:30:00", offset).unwrap(),
            datetime!(2024-03-10 17:30 UTC)
        );
        assert_eq!(
            parse_timestamp("start_time", "2024-03-10 12:30:00.123456+00:00", offset).unwrap(),
            datetime!(2024-03-10 12:30:00.123456 UTC)
        );
        assert!(parse_timestamp("start_time", "2024-03-10  12:30:00", offset).is_err());
    }

    #[test]
    fn wrong_types_are_rejected_not_coerced() {
        let monitor = fresh();
        let patch = monitor.merge_payload(&object(json!({
            "reward": "lots",
            "episode": -1,
            "obs_status": 9,
            "controller_input": "jump",
        })));
        assert!(patch.is_empty());
        assert_eq!(patch.errors.len(), 4);
        assert_eq!(monitor.snapshot().frames_merged, 0);
    }
}
