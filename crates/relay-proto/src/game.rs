//! Datagrams sent from the trainer to the game-side mod.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::monitor::Action;

#[derive(Debug, Clone, PartialEq)]
pub enum GameCommand {
    /// Held/released state per action. Sent as a bare object with no `type`.
    Input(BTreeMap<Action, bool>),
    /// Ask the mod to reset the scene; it answers with `reset_done`.
    Reset,
    /// Ask the mod for a state dump.
    GetState,
}

impl GameCommand {
    pub fn to_value(&self) -> Value {
        match self {
            GameCommand::Input(input) => Value::Object(
                input
                    .iter()
                    .map(|(action, pressed)| (action.as_str().to_owned(), Value::Bool(*pressed)))
                    .collect::<Map<String, Value>>(),
            ),
            GameCommand::Reset => json!({"type": "reset"}),
            GameCommand::GetState => json!({"type": "get_state"}),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.to_value()).unwrap_or_default()
    }
}
