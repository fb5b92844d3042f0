use serde::{Deserialize, Serialize};

use roundtable_core::types::{Analyst, ChatMessage};

use crate::graph::Channels;

/// Author tag of interview questions.
pub const ANALYST: &str = "analyst";
/// Author tag of interview answers.
pub const EXPERT: &str = "expert";

/// Top-level research state. One per session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowState {
    pub topic: String,
    pub max_analysts: usize,
    #[serde(default)]
    pub analysts: Vec<Analyst>,
    #[serde(default)]
    pub human_feedback: Option<String>,
    /// One section per completed interview, in analyst order.
    #[serde(default)]
    pub sections: Vec<String>,
    #[serde(default)]
    pub report_body: Option<String>,
    #[serde(default)]
    pub introduction: Option<String>,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub final_report: Option<String>,
    #[serde(default)]
    pub podcast_script: Option<String>,
    /// Why the podcast script is missing, when its generation failed.
    #[serde(default)]
    pub podcast_error: Option<String>,
}

impl WorkflowState {
    pub fn new(topic: impl Into<String>, max_analysts: usize) -> Self {
        Self {
            topic: topic.into(),
            max_analysts,
            ..Self::default()
        }
    }

    pub fn channels() -> Channels {
        Channels::new().append("sections")
    }
}

/// State of one interview branch. Owned by that branch alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewState {
    pub analyst: Analyst,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub max_num_turns: usize,
    /// Formatted search results, accumulated across turns.
    #[serde(default)]
    pub context: Vec<String>,
    #[serde(default)]
    pub interview: Option<String>,
    #[serde(default)]
    pub sections: Vec<String>,
}

impl InterviewState {
    pub fn new(analyst: Analyst, opening: ChatMessage, max_num_turns: usize) -> Self {
        Self {
            analyst,
            messages: vec![opening],
            max_num_turns,
            context: vec![],
            interview: None,
            sections: vec![],
        }
    }

    pub fn channels() -> Channels {
        Channels::new()
            .append("messages")
            .append("context")
            .append("sections")
    }

    /// Answers the expert has given so far.
    pub fn turn_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_from(EXPERT)).count()
    }

    /// The most recent question asked by the analyst.
    pub fn last_question(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.is_from(ANALYST))
    }
}
