use std::collections::HashSet;

use futures::future::BoxFuture;
use serde_json::json;
use tracing::info;

use roundtable_core::error::{Result, RoundtableError};
use roundtable_core::types::{Analyst, ChatMessage, Perspectives};
use roundtable_llm::ChatModel;

use crate::graph::{from_state, to_state, Node, NodeContext, StateMap};
use crate::prompts;
use crate::state::WorkflowState;

/// JSON Schema for `Perspectives`.
pub fn perspectives_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "analysts": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string", "description": "Name of the analyst."},
                        "role": {"type": "string", "description": "Role of the analyst in the context of the topic."},
                        "affiliation": {"type": "string", "description": "Primary affiliation of the analyst."},
                        "description": {"type": "string", "description": "Description of the analyst focus, concerns, and motives."},
                        "gender": {"type": "string"}
                    },
                    "required": ["name", "role", "affiliation", "description"]
                }
            }
        },
        "required": ["analysts"]
    })
}

/// Check a generated panel: exactly `expected` analysts with distinct names.
pub fn validate_analysts(analysts: &[Analyst], expected: usize) -> Result<()> {
    if analysts.len() != expected {
        return Err(RoundtableError::Generation(format!(
            "expected {} analysts, got {}",
            expected,
            analysts.len()
        )));
    }
    let mut seen = HashSet::new();
    for analyst in analysts {
        let key = analyst.name.trim().to_lowercase();
        if key.is_empty() {
            return Err(RoundtableError::Generation("analyst with an empty name".into()));
        }
        if !seen.insert(key) {
            return Err(RoundtableError::Generation(format!(
                "duplicate analyst '{}'",
                analyst.name.trim()
            )));
        }
    }
    Ok(())
}

/// Generates the analyst panel for the topic, taking any human feedback
/// into account.
pub struct CreateAnalysts {
    model: ChatModel,
}

impl CreateAnalysts {
    pub fn new(model: ChatModel) -> Self {
        Self { model }
    }
}

impl Node for CreateAnalysts {
    fn run(&self, ctx: NodeContext, state: StateMap) -> BoxFuture<'_, Result<StateMap>> {
        Box::pin(async move {
            let state: WorkflowState = from_state(&state)?;
            let system = prompts::analyst_instructions(
                &state.topic,
                state.max_analysts,
                state.human_feedback.as_deref(),
            );

            let perspectives: Perspectives = self
                .model
                .generate_structured(
                    "create_analysts",
                    &system,
                    &[ChatMessage::human("Generate the set of analysts.")],
                    &perspectives_schema(),
                )
                .await?;
            validate_analysts(&perspectives.analysts, state.max_analysts)?;

            info!(
                session_id = %ctx.session_id,
                analysts = ?perspectives.analysts.iter().map(|a| a.name.as_str()).collect::<Vec<_>>(),
                "Analysts generated"
            );
            to_state(&json!({ "analysts": perspectives.analysts }))
        })
    }
}

/// Interrupt point for human review of the panel. Runs no logic.
pub async fn human_feedback(_ctx: NodeContext, _state: StateMap) -> Result<StateMap> {
    Ok(StateMap::new())
}
