use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use roundtable_core::error::{Result, RoundtableError};

/// Graph state: a JSON object whose keys are channels.
pub type StateMap = serde_json::Map<String, Value>;

/// How a node's update to a key combines with the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MergePolicy {
    /// The update replaces the current value.
    #[default]
    Overwrite,
    /// Arrays in the update are appended to the current array; any other
    /// value is pushed as a single element.
    Append,
}

/// Per-key merge policies for a graph's state. Undeclared keys overwrite.
#[derive(Debug, Clone, Default)]
pub struct Channels {
    policies: HashMap<String, MergePolicy>,
}

impl Channels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an accumulating key.
    pub fn append(mut self, key: impl Into<String>) -> Self {
        self.policies.insert(key.into(), MergePolicy::Append);
        self
    }

    pub fn policy(&self, key: &str) -> MergePolicy {
        self.policies.get(key).copied().unwrap_or_default()
    }

    /// Merge a partial update into `state`.
    pub fn merge(&self, state: &mut StateMap, update: StateMap) {
        for (key, value) in update {
            match self.policy(&key) {
                MergePolicy::Overwrite => {
                    state.insert(key, value);
                }
                MergePolicy::Append => {
                    let slot = state
                        .entry(key)
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if !slot.is_array() {
                        let previous = std::mem::take(slot);
                        *slot = Value::Array(if previous.is_null() {
                            vec![]
                        } else {
                            vec![previous]
                        });
                    }
                    if let Value::Array(items) = slot {
                        match value {
                            Value::Array(new_items) => items.extend(new_items),
                            Value::Null => {}
                            other => items.push(other),
                        }
                    }
                }
            }
        }
    }
}

/// Serialize a typed state or update into a `StateMap`.
pub fn to_state<T: Serialize>(value: &T) -> Result<StateMap> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(RoundtableError::InvalidInput(format!(
            "graph state must serialize to an object, got {}",
            other
        ))),
    }
}

/// Deserialize a typed view of the state.
pub fn from_state<T: DeserializeOwned>(state: &StateMap) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(state.clone()))?)
}
