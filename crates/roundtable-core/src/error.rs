use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoundtableError {
    // Graph errors
    #[error("Graph configuration error: {0}")]
    Configuration(String),

    #[error("Node '{node}' failed in session {session_id}: {source}")]
    NodeFailed {
        session_id: String,
        node: String,
        #[source]
        source: Box<RoundtableError>,
    },

    #[error("Barrier at '{node}' timed out in session {session_id}; unreported: {}", .pending.join(", "))]
    BarrierTimeout {
        session_id: String,
        node: String,
        pending: Vec<String>,
    },

    #[error("Run exceeded recursion limit ({limit}) in session {session_id}")]
    RecursionLimit { session_id: String, limit: usize },

    // Session errors
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Session {session_id} was modified concurrently (expected version {expected}, found {found})")]
    VersionConflict {
        session_id: String,
        expected: u64,
        found: u64,
    },

    // Generation errors
    #[error("Generation error: {0}")]
    Generation(String),

    // Collaborator errors
    #[error("Collaborator '{collaborator}' failed: {message}")]
    Collaborator {
        collaborator: String,
        message: String,
    },

    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    // Input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RoundtableError {
    /// Build a collaborator failure.
    pub fn collaborator(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Collaborator {
            collaborator: collaborator.into(),
            message: message.into(),
        }
    }

    /// Whether this failure came from an external collaborator call
    /// (model, search, speech) and may be degraded in place.
    pub fn is_collaborator(&self) -> bool {
        matches!(
            self,
            Self::Collaborator { .. } | Self::LlmRequest(_) | Self::LlmStream(_)
        )
    }

    /// Attach the session id and node name to a failure, unless it already
    /// carries them.
    pub fn at_node(self, session_id: &str, node: &str) -> Self {
        match self {
            e @ (Self::NodeFailed { .. }
            | Self::BarrierTimeout { .. }
            | Self::RecursionLimit { .. }
            | Self::SessionNotFound { .. }
            | Self::VersionConflict { .. }) => e,
            other => Self::NodeFailed {
                session_id: session_id.to_string(),
                node: node.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, looking through `NodeFailed` wrappers.
    pub fn root(&self) -> &RoundtableError {
        match self {
            Self::NodeFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, RoundtableError>;
