use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::info;

use roundtable_core::config::{AppConfig, WorkflowConfig};
use roundtable_core::error::{Result, RoundtableError};
use roundtable_core::traits::SessionStore;
use roundtable_core::EventBus;
use roundtable_llm::ChatModel;
use roundtable_search::SearchSources;

use crate::analysts::{human_feedback, CreateAnalysts};
use crate::dispatch::{InterviewDispatch, CONDUCT_INTERVIEW, CREATE_ANALYSTS};
use crate::graph::{to_state, CompileOptions, CompiledGraph, StateGraph, StateSnapshot, END, START};
use crate::interview::build_interview_graph;
use crate::report::{
    FinalizeReport, Framing, WriteFraming, WriteReport, FINALIZE_REPORT, WRITE_CONCLUSION,
    WRITE_INTRODUCTION, WRITE_REPORT,
};
use crate::state::WorkflowState;

pub const HUMAN_FEEDBACK: &str = "human_feedback";

/// Build the top-level research graph, paused before human review.
pub fn build_research_graph(
    model: &ChatModel,
    sources: &SearchSources,
    store: Arc<dyn SessionStore>,
    config: &WorkflowConfig,
    events: Option<Arc<EventBus>>,
) -> Result<CompiledGraph> {
    let interview = build_interview_graph(model, sources, config, events.clone())?;

    let mut graph = StateGraph::new(WorkflowState::channels());
    graph.add_node(CREATE_ANALYSTS, CreateAnalysts::new(model.clone()))?;
    graph.add_node(HUMAN_FEEDBACK, human_feedback)?;
    graph.add_subgraph(CONDUCT_INTERVIEW, interview, &["sections"])?;
    graph.add_node(WRITE_REPORT, WriteReport::new(model.clone()))?;
    graph.add_node(
        WRITE_INTRODUCTION,
        WriteFraming::new(Framing::Introduction, model.clone()),
    )?;
    graph.add_node(
        WRITE_CONCLUSION,
        WriteFraming::new(Framing::Conclusion, model.clone()),
    )?;
    graph.add_node(
        FINALIZE_REPORT,
        FinalizeReport::new(model.clone(), &config.podcast_host, &config.podcast_name),
    )?;

    graph.add_edge(START, CREATE_ANALYSTS)?;
    graph.add_edge(CREATE_ANALYSTS, HUMAN_FEEDBACK)?;
    graph.add_conditional_edges(
        HUMAN_FEEDBACK,
        InterviewDispatch::new(&config.approval_token, config.max_num_turns),
        &[CREATE_ANALYSTS, CONDUCT_INTERVIEW],
    )?;
    graph.add_edge(CONDUCT_INTERVIEW, WRITE_REPORT)?;
    graph.add_edge(CONDUCT_INTERVIEW, WRITE_INTRODUCTION)?;
    graph.add_edge(CONDUCT_INTERVIEW, WRITE_CONCLUSION)?;
    graph.add_join(
        &[WRITE_REPORT, WRITE_INTRODUCTION, WRITE_CONCLUSION],
        FINALIZE_REPORT,
    )?;
    graph.add_edge(FINALIZE_REPORT, END)?;

    let mut options = CompileOptions::default()
        .interrupt_before(&[HUMAN_FEEDBACK])
        .with_store(store)
        .recursion_limit(config.recursion_limit)
        .barrier_timeout(
            config.barrier_timeout_secs.map(Duration::from_secs),
            config.on_barrier_timeout,
        );
    if let Some(events) = events {
        options = options.with_events(events);
    }
    graph.compile(options)
}

/// The research workflow as its callers drive it: start a session, review
/// the analyst panel, resume to the finished report.
pub struct ResearchWorkflow {
    graph: CompiledGraph,
    store: Arc<dyn SessionStore>,
    config: WorkflowConfig,
}

impl ResearchWorkflow {
    pub fn new(
        model: ChatModel,
        sources: SearchSources,
        store: Arc<dyn SessionStore>,
        config: WorkflowConfig,
        events: Option<Arc<EventBus>>,
    ) -> Result<Self> {
        let graph = build_research_graph(&model, &sources, store.clone(), &config, events)?;
        Ok(Self {
            graph,
            store,
            config,
        })
    }

    /// Wire the configured model, search sources, and session store.
    pub fn from_config(config: &AppConfig, events: Option<Arc<EventBus>>) -> Result<Self> {
        let model = roundtable_llm::create_chat_model(config);
        let sources = SearchSources::from_config(&config.search);
        let store = roundtable_memory::open_store(&config.store)?;
        Self::new(model, sources, store, config.workflow.clone(), events)
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Start (or restart) a session. Returns paused before human review with
    /// the generated analysts.
    pub async fn start(
        &self,
        session_id: &str,
        topic: &str,
        max_analysts: Option<usize>,
    ) -> Result<StateSnapshot> {
        if session_id.trim().is_empty() {
            return Err(RoundtableError::InvalidInput("session id must not be empty".into()));
        }
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(RoundtableError::InvalidInput("topic must not be empty".into()));
        }
        let max_analysts = max_analysts.unwrap_or(self.config.max_analysts);
        if max_analysts == 0 {
            return Err(RoundtableError::InvalidInput(
                "max_analysts must be at least 1".into(),
            ));
        }

        info!(session_id, topic, max_analysts, "Starting research session");
        let initial = to_state(&WorkflowState::new(topic, max_analysts))?;
        self.graph.invoke(session_id, initial).await
    }

    /// Record the reviewer's feedback on a session paused before human
    /// review. `None`, blank, or the approval token approve the panel; any
    /// other text sends it back for regeneration. Call `resume` to act on it.
    pub async fn submit_feedback(
        &self,
        session_id: &str,
        feedback: Option<&str>,
    ) -> Result<StateSnapshot> {
        let value = feedback.map_or(Value::Null, |f| json!(f));
        let mut update = serde_json::Map::new();
        update.insert("human_feedback".to_string(), value);
        self.graph
            .update_paused_state(session_id, update, HUMAN_FEEDBACK)
            .await
    }

    /// Continue a session until the next review point or the end.
    pub async fn resume(&self, session_id: &str) -> Result<StateSnapshot> {
        self.graph.resume(session_id).await
    }

    pub async fn snapshot(&self, session_id: &str) -> Result<StateSnapshot> {
        self.graph.get_state(session_id).await
    }

    /// The session's state as a typed `WorkflowState`.
    pub async fn state(&self, session_id: &str) -> Result<WorkflowState> {
        self.snapshot(session_id).await?.typed()
    }

    pub async fn sessions(&self) -> Result<Vec<String>> {
        self.store.list().await
    }

    pub async fn delete(&self, session_id: &str) -> Result<bool> {
        self.graph.delete_session(session_id).await
    }
}
