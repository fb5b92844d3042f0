use tracing::info;

use roundtable_core::error::Result;
use roundtable_core::types::ChatMessage;

use crate::graph::{from_state, to_state, Branch, Route, Router, StateMap};
use crate::state::{InterviewState, WorkflowState};

pub const CONDUCT_INTERVIEW: &str = "conduct_interview";
pub const CREATE_ANALYSTS: &str = "create_analysts";

/// Whether feedback approves the current panel: absent, blank, or the
/// approval token (trimmed, case-insensitive).
pub fn is_approval(feedback: Option<&str>, approval_token: &str) -> bool {
    match feedback.map(str::trim) {
        None => true,
        Some(f) => f.is_empty() || f.eq_ignore_ascii_case(approval_token.trim()),
    }
}

/// First message of every interview.
pub fn opening_message(topic: &str) -> ChatMessage {
    ChatMessage::human(format!(
        "So you said you were writing an article on {}?",
        topic
    ))
}

/// Routes out of human review: one interview branch per analyst when the
/// panel is approved, back to analyst generation otherwise.
pub struct InterviewDispatch {
    approval_token: String,
    max_num_turns: usize,
}

impl InterviewDispatch {
    pub fn new(approval_token: &str, max_num_turns: usize) -> Self {
        Self {
            approval_token: approval_token.to_string(),
            max_num_turns,
        }
    }
}

impl Router for InterviewDispatch {
    fn route(&self, state: &StateMap) -> Result<Route> {
        let state: WorkflowState = from_state(state)?;

        if !is_approval(state.human_feedback.as_deref(), &self.approval_token) {
            info!(feedback = ?state.human_feedback, "Panel rejected, regenerating analysts");
            return Ok(Route::to(CREATE_ANALYSTS));
        }

        info!(interviews = state.analysts.len(), "Panel approved, dispatching interviews");
        let branches = state
            .analysts
            .into_iter()
            .map(|analyst| {
                let interview =
                    InterviewState::new(analyst, opening_message(&state.topic), self.max_num_turns);
                Ok(Branch::new(CONDUCT_INTERVIEW, to_state(&interview)?))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Route::Send(branches))
    }
}
