use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique session identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Human,
    Ai,
}

/// A chat message. AI messages may carry an author tag (e.g. `"expert"`)
/// identifying which participant of a conversation produced them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self::with_role(Role::System, text)
    }

    pub fn human(text: impl Into<String>) -> Self {
        Self::with_role(Role::Human, text)
    }

    pub fn ai(text: impl Into<String>) -> Self {
        Self::with_role(Role::Ai, text)
    }

    fn with_role(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: text.into(),
            name: None,
            timestamp: Some(Utc::now()),
        }
    }

    /// Tag the message with its author.
    pub fn authored_by(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Whether this is an AI message tagged with the given author.
    pub fn is_from(&self, author: &str) -> bool {
        self.role == Role::Ai && self.name.as_deref() == Some(author)
    }

    /// Prefix used when flattening a conversation into a transcript.
    pub fn speaker(&self) -> &str {
        match self.role {
            Role::System => "System",
            Role::Human => "Human",
            Role::Ai => self.name.as_deref().unwrap_or("AI"),
        }
    }
}

/// Flatten messages into a role-prefixed, newline-joined transcript.
pub fn transcript(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.speaker(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Stop reason from the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
}

/// A streaming delta from the LLM.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    /// A chunk of text content.
    TextDelta(String),

    /// The response is complete.
    Stop(StopReason),

    /// Usage information.
    Usage {
        input_tokens: u64,
        output_tokens: u64,
    },
}

/// A research analyst persona driving one interview.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Analyst {
    /// Name of the analyst.
    pub name: String,
    /// Role of the analyst in the context of the topic.
    pub role: String,
    /// Primary affiliation of the analyst.
    pub affiliation: String,
    /// Focus, concerns, and motives of the analyst.
    pub description: String,
    #[serde(default)]
    pub gender: String,
}

impl Analyst {
    /// Persona text used to condition the analyst's questions and the
    /// expert's answers.
    pub fn persona(&self) -> String {
        format!(
            "Name: {}\nRole: {}\nAffiliation: {}\nDescription: {}\n",
            self.name, self.role, self.affiliation, self.description
        )
    }

    /// Short `Name (Role)` label.
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.role)
    }
}

/// Structured output of the analyst-generation step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Perspectives {
    pub analysts: Vec<Analyst>,
}

/// Structured output of search-query derivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub search_query: String,
}

/// A document returned by one of the search collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchDocument {
    Web {
        url: String,
        content: String,
    },
    Encyclopedia {
        source: String,
        page: String,
        content: String,
    },
    News {
        url: String,
        published_at: String,
        content: String,
    },
}

impl SearchDocument {
    /// Render as a document-with-source-citation block.
    pub fn to_context(&self) -> String {
        match self {
            Self::Web { url, content } => {
                format!("<Document href=\"{}\"/>\n{}\n</Document>", url, content)
            }
            Self::Encyclopedia {
                source,
                page,
                content,
            } => format!(
                "<Document source=\"{}\" page=\"{}\"/>\n{}\n</Document>",
                source, page, content
            ),
            Self::News {
                url,
                published_at,
                content,
            } => format!(
                "<Document source=\"{}\" published=\"{}\"/>\n{}\n</Document>",
                url, published_at, content
            ),
        }
    }
}

/// Join documents into a single context entry.
pub fn format_documents(docs: &[SearchDocument]) -> String {
    docs.iter()
        .map(SearchDocument::to_context)
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Progress event broadcast by the graph runtime.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// A node began executing.
    NodeStarted { session_id: String, node: String },
    /// A node finished and its update was merged.
    NodeCompleted {
        session_id: String,
        node: String,
        elapsed_ms: u64,
    },
    /// A fan-out branch failed and was excluded from the join.
    BranchFailed {
        session_id: String,
        branch: String,
        error: String,
    },
    /// The run paused before an interrupt node.
    Interrupted { session_id: String, node: String },
    /// The run reached END.
    RunComplete { session_id: String, steps: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_is_role_prefixed() {
        let messages = vec![
            ChatMessage::human("So you said you were writing an article on Rust?"),
            ChatMessage::ai("Yes. What drives adoption?").authored_by("analyst"),
            ChatMessage::ai("Memory safety.").authored_by("expert"),
        ];
        assert_eq!(
            transcript(&messages),
            "Human: So you said you were writing an article on Rust?\n\
             analyst: Yes. What drives adoption?\n\
             expert: Memory safety."
        );
    }

    #[test]
    fn is_from_requires_ai_role() {
        let tagged = ChatMessage::human("hi").authored_by("expert");
        assert!(!tagged.is_from("expert"));
        assert!(ChatMessage::ai("hi").authored_by("expert").is_from("expert"));
    }

    #[test]
    fn persona_mentions_every_field() {
        let a = Analyst {
            name: "Dr. Lin".into(),
            role: "Hardware researcher".into(),
            affiliation: "MIT".into(),
            description: "Qubit fabrication".into(),
            gender: "female".into(),
        };
        let p = a.persona();
        assert!(p.contains("Dr. Lin") && p.contains("MIT") && p.contains("Qubit fabrication"));
        assert_eq!(a.label(), "Dr. Lin (Hardware researcher)");
    }

    #[test]
    fn document_citations() {
        let docs = vec![
            SearchDocument::Web {
                url: "https://a.example".into(),
                content: "alpha".into(),
            },
            SearchDocument::News {
                url: "https://n.example".into(),
                published_at: "2024-01-01T00:00:00Z".into(),
                content: "beta".into(),
            },
        ];
        let ctx = format_documents(&docs);
        assert!(ctx.starts_with("<Document href=\"https://a.example\"/>\nalpha\n</Document>"));
        assert!(ctx.contains("\n\n---\n\n"));
        assert!(ctx.contains("published=\"2024-01-01T00:00:00Z\""));
    }

    #[test]
    fn analyst_gender_defaults() {
        let json = r#"{"name":"A","role":"R","affiliation":"X","description":"D"}"#;
        let a: Analyst = serde_json::from_str(json).unwrap();
        assert_eq!(a.gender, "");
    }
}
