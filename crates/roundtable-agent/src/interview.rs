use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::json;
use tracing::{debug, warn};

use roundtable_core::config::WorkflowConfig;
use roundtable_core::error::{Result, RoundtableError};
use roundtable_core::traits::SearchSource;
use roundtable_core::types::{format_documents, transcript, ChatMessage, Role, SearchQuery};
use roundtable_core::EventBus;
use roundtable_llm::ChatModel;
use roundtable_search::SearchSources;

use crate::graph::{
    from_state, to_state, CompileOptions, CompiledGraph, Node, NodeContext, Route, Router,
    StateGraph, StateMap, END, START,
};
use crate::prompts;
use crate::state::{InterviewState, ANALYST, EXPERT};

pub const ASK_QUESTION: &str = "ask_question";
pub const SEARCH_WEB: &str = "search_web";
pub const SEARCH_ENCYCLOPEDIA: &str = "search_encyclopedia";
pub const SEARCH_NEWS: &str = "search_news";
pub const ANSWER_QUESTION: &str = "answer_question";
pub const SAVE_INTERVIEW: &str = "save_interview";
pub const WRITE_SECTION: &str = "write_section";

/// The conversation from one participant's side: their own messages are
/// assistant turns, everyone else's are user turns.
pub fn as_seen_by(messages: &[ChatMessage], speaker: &str) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|m| {
            if m.role == Role::Ai && !m.is_from(speaker) {
                ChatMessage {
                    role: Role::Human,
                    ..m.clone()
                }
            } else {
                m.clone()
            }
        })
        .collect()
}

/// Asks the analyst's next question.
pub struct AskQuestion {
    model: ChatModel,
    closing_phrase: String,
}

impl AskQuestion {
    pub fn new(model: ChatModel, closing_phrase: &str) -> Self {
        Self {
            model,
            closing_phrase: closing_phrase.to_string(),
        }
    }
}

impl Node for AskQuestion {
    fn run(&self, _ctx: NodeContext, state: StateMap) -> BoxFuture<'_, Result<StateMap>> {
        Box::pin(async move {
            let state: InterviewState = from_state(&state)?;
            let system = prompts::question_instructions(&state.analyst, &self.closing_phrase);
            let question = self
                .model
                .generate(ASK_QUESTION, &system, &as_seen_by(&state.messages, ANALYST))
                .await?
                .authored_by(ANALYST);
            to_state(&json!({ "messages": [question] }))
        })
    }
}

/// One of the three information sources consulted each turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Web,
    Encyclopedia,
    News,
}

impl SearchKind {
    pub fn node_name(self) -> &'static str {
        match self {
            Self::Web => SEARCH_WEB,
            Self::Encyclopedia => SEARCH_ENCYCLOPEDIA,
            Self::News => SEARCH_NEWS,
        }
    }

    /// Context entry used when the source fails or times out.
    pub fn error_placeholder(self) -> &'static str {
        match self {
            Self::Web => "Error retrieving web search results. Please try again later.",
            Self::Encyclopedia => "Error retrieving encyclopedia results. Please try again later.",
            Self::News => "Error retrieving news articles. Please try again later.",
        }
    }

    /// Context entry used when the source finds nothing.
    pub fn empty_placeholder(self) -> &'static str {
        match self {
            Self::Web => "No web search results found.",
            Self::Encyclopedia => "No encyclopedia articles found.",
            Self::News => "No recent news articles found.",
        }
    }
}

/// Derives a query from the conversation, searches one source, and
/// contributes the formatted documents to the context. Never fails: any
/// error degrades to a placeholder entry.
pub struct SearchNode {
    kind: SearchKind,
    model: ChatModel,
    source: Arc<dyn SearchSource>,
}

impl SearchNode {
    pub fn new(kind: SearchKind, model: ChatModel, source: Arc<dyn SearchSource>) -> Self {
        Self {
            kind,
            model,
            source,
        }
    }

    async fn search(&self, messages: &[ChatMessage]) -> Result<String> {
        let todays_date = chrono::Local::now().format("%Y-%m-%d").to_string();
        let query: SearchQuery = self
            .model
            .generate_structured(
                self.kind.node_name(),
                &prompts::search_instructions(&todays_date),
                messages,
                &json!({
                    "type": "object",
                    "properties": {
                        "search_query": {"type": "string", "description": "Search query for retrieval."}
                    },
                    "required": ["search_query"]
                }),
            )
            .await?;

        let timeout = Duration::from_secs(self.source.timeout_secs());
        debug!(source = self.source.name(), query = %query.search_query, "Searching");
        let docs = tokio::time::timeout(timeout, self.source.search(&query.search_query))
            .await
            .map_err(|_| {
                RoundtableError::collaborator(
                    self.source.name(),
                    format!("timed out after {}s", timeout.as_secs()),
                )
            })??;

        if docs.is_empty() {
            return Ok(self.kind.empty_placeholder().to_string());
        }
        Ok(format_documents(&docs))
    }
}

impl Node for SearchNode {
    fn run(&self, ctx: NodeContext, state: StateMap) -> BoxFuture<'_, Result<StateMap>> {
        Box::pin(async move {
            let state: InterviewState = from_state(&state)?;
            let entry = match self.search(&state.messages).await {
                Ok(entry) => entry,
                Err(e) if e.is_collaborator() => {
                    warn!(
                        session_id = %ctx.session_id,
                        source = self.source.name(),
                        error = %e,
                        "Search failed, continuing with a placeholder"
                    );
                    self.kind.error_placeholder().to_string()
                }
                Err(e) => {
                    warn!(
                        session_id = %ctx.session_id,
                        source = self.source.name(),
                        error = %e,
                        "No usable search query, continuing with a placeholder"
                    );
                    self.kind.error_placeholder().to_string()
                }
            };
            to_state(&json!({ "context": [entry] }))
        })
    }
}

/// Answers the latest question from the gathered context, as the expert.
pub struct AnswerQuestion {
    model: ChatModel,
}

impl AnswerQuestion {
    pub fn new(model: ChatModel) -> Self {
        Self { model }
    }
}

impl Node for AnswerQuestion {
    fn run(&self, _ctx: NodeContext, state: StateMap) -> BoxFuture<'_, Result<StateMap>> {
        Box::pin(async move {
            let state: InterviewState = from_state(&state)?;
            let system = prompts::answer_instructions(&state.analyst, &state.context);
            let answer = self
                .model
                .generate(ANSWER_QUESTION, &system, &as_seen_by(&state.messages, EXPERT))
                .await?
                .authored_by(EXPERT);
            to_state(&json!({ "messages": [answer] }))
        })
    }
}

/// Decides after each answer whether the interview goes on.
///
/// Ends once the expert has answered `max_num_turns` times, or when the
/// analyst's latest question contains the closing phrase (case-sensitive).
pub struct TurnRouter {
    closing_phrase: String,
}

impl TurnRouter {
    pub fn new(closing_phrase: &str) -> Self {
        Self {
            closing_phrase: closing_phrase.to_string(),
        }
    }

    pub fn is_finished(&self, state: &InterviewState) -> bool {
        if state.turn_count() >= state.max_num_turns {
            return true;
        }
        state
            .last_question()
            .is_some_and(|q| q.content.contains(&self.closing_phrase))
    }
}

impl Router for TurnRouter {
    fn route(&self, state: &StateMap) -> Result<Route> {
        let state: InterviewState = from_state(state)?;
        if self.is_finished(&state) {
            debug!(analyst = %state.analyst.name, turns = state.turn_count(), "Interview finished");
            Ok(Route::to(SAVE_INTERVIEW))
        } else {
            Ok(Route::to(ASK_QUESTION))
        }
    }
}

/// Flattens the conversation into a transcript.
pub async fn save_interview(_ctx: NodeContext, state: StateMap) -> Result<StateMap> {
    let state: InterviewState = from_state(&state)?;
    to_state(&json!({ "interview": transcript(&state.messages) }))
}

/// Writes the analyst's report section from the gathered context.
pub struct WriteSection {
    model: ChatModel,
}

impl WriteSection {
    pub fn new(model: ChatModel) -> Self {
        Self { model }
    }
}

impl Node for WriteSection {
    fn run(&self, _ctx: NodeContext, state: StateMap) -> BoxFuture<'_, Result<StateMap>> {
        Box::pin(async move {
            let state: InterviewState = from_state(&state)?;
            let system = prompts::section_writer_instructions(&state.analyst.description);
            let source = ChatMessage::human(format!(
                "Use this source to write your section: {}",
                state.context.join("\n\n")
            ));
            let section = self.model.generate(WRITE_SECTION, &system, &[source]).await?;
            to_state(&json!({ "sections": [section.content] }))
        })
    }
}

/// Build the per-analyst interview graph.
pub fn build_interview_graph(
    model: &ChatModel,
    sources: &SearchSources,
    config: &WorkflowConfig,
    events: Option<Arc<EventBus>>,
) -> Result<CompiledGraph> {
    let mut graph = StateGraph::new(InterviewState::channels());
    graph.add_node(ASK_QUESTION, AskQuestion::new(model.clone(), &config.closing_phrase))?;
    graph.add_node(
        SEARCH_WEB,
        SearchNode::new(SearchKind::Web, model.clone(), sources.web.clone()),
    )?;
    graph.add_node(
        SEARCH_ENCYCLOPEDIA,
        SearchNode::new(SearchKind::Encyclopedia, model.clone(), sources.encyclopedia.clone()),
    )?;
    graph.add_node(
        SEARCH_NEWS,
        SearchNode::new(SearchKind::News, model.clone(), sources.news.clone()),
    )?;
    graph.add_node(ANSWER_QUESTION, AnswerQuestion::new(model.clone()))?;
    graph.add_node(SAVE_INTERVIEW, save_interview)?;
    graph.add_node(WRITE_SECTION, WriteSection::new(model.clone()))?;

    graph.add_edge(START, ASK_QUESTION)?;
    graph.add_edge(ASK_QUESTION, SEARCH_WEB)?;
    graph.add_edge(ASK_QUESTION, SEARCH_ENCYCLOPEDIA)?;
    graph.add_edge(ASK_QUESTION, SEARCH_NEWS)?;
    graph.add_join(&[SEARCH_WEB, SEARCH_ENCYCLOPEDIA, SEARCH_NEWS], ANSWER_QUESTION)?;
    graph.add_conditional_edges(
        ANSWER_QUESTION,
        TurnRouter::new(&config.closing_phrase),
        &[ASK_QUESTION, SAVE_INTERVIEW],
    )?;
    graph.add_edge(SAVE_INTERVIEW, WRITE_SECTION)?;
    graph.add_edge(WRITE_SECTION, END)?;

    // Three supersteps per turn plus save and write.
    let needed = config.max_num_turns * 3 + 2;
    let mut options = CompileOptions::default()
        .recursion_limit(config.recursion_limit.max(needed))
        .barrier_timeout(
            config.barrier_timeout_secs.map(Duration::from_secs),
            config.on_barrier_timeout,
        );
    if let Some(events) = events {
        options = options.with_events(events);
    }
    graph.compile(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use roundtable_core::types::{Analyst, SearchDocument};
    use roundtable_test_utils::{model_config, FailingSearch, ScriptedLlm, StaticSearch};

    fn analyst() -> Analyst {
        Analyst {
            name: "Dr. Ada Lin".into(),
            role: "Hardware researcher".into(),
            affiliation: "MIT".into(),
            description: "Qubit fabrication".into(),
            gender: "female".into(),
        }
    }

    fn interview_state(max_num_turns: usize) -> InterviewState {
        InterviewState::new(
            analyst(),
            ChatMessage::human("So you said you were writing an article on quantum computing?"),
            max_num_turns,
        )
    }

    /// Replies by step, recognized from the system prompt.
    fn scripted(closing_after: Option<usize>) -> ScriptedLlm {
        let questions = std::sync::atomic::AtomicUsize::new(0);
        ScriptedLlm::new(move |messages| {
            let system = &messages[0].content;
            if system.contains("search query") {
                Ok(r#"{"search_query": "qubit fabrication"}"#.into())
            } else if system.contains("interviewing an expert") {
                let n = questions.fetch_add(1, Ordering::SeqCst) + 1;
                if closing_after == Some(n) {
                    Ok("Thank you so much for your help!".into())
                } else {
                    Ok(format!("Question {}?", n))
                }
            } else if system.contains("being interviewed") {
                Ok("An answer [1].".into())
            } else if system.contains("technical writer") {
                Ok("## Section\nBody".into())
            } else {
                Ok("unexpected".into())
            }
        })
    }

    fn model(llm: ScriptedLlm) -> ChatModel {
        ChatModel::new(Arc::new(llm), model_config())
    }

    fn sources() -> SearchSources {
        SearchSources::new(
            Arc::new(StaticSearch::web("web")),
            Arc::new(StaticSearch::new(
                "encyclopedia",
                vec![SearchDocument::Encyclopedia {
                    source: "https://en.wikipedia.org/wiki/Qubit".into(),
                    page: "Qubit".into(),
                    content: "A qubit is a two-state system.".into(),
                }],
            )),
            Arc::new(StaticSearch::new("news", vec![])),
        )
    }

    fn ctx() -> NodeContext {
        NodeContext {
            session_id: "s1".into(),
            task: "conduct_interview#0".into(),
        }
    }

    #[test]
    fn test_perspective_mapping() {
        let messages = vec![
            ChatMessage::human("So you said...?"),
            ChatMessage::ai("Q").authored_by(ANALYST),
            ChatMessage::ai("A").authored_by(EXPERT),
        ];
        let analyst_view = as_seen_by(&messages, ANALYST);
        assert_eq!(analyst_view[1].role, Role::Ai);
        assert_eq!(analyst_view[2].role, Role::Human);
        assert_eq!(analyst_view[2].name.as_deref(), Some(EXPERT));

        let expert_view = as_seen_by(&messages, EXPERT);
        assert_eq!(expert_view[0].role, Role::Human);
        assert_eq!(expert_view[1].role, Role::Human);
        assert_eq!(expert_view[2].role, Role::Ai);
    }

    #[test]
    fn test_turn_router_limits() {
        let router = TurnRouter::new("Thank you so much for your help");
        let mut state = interview_state(2);
        state.messages.push(ChatMessage::ai("Q1").authored_by(ANALYST));
        state.messages.push(ChatMessage::ai("A1").authored_by(EXPERT));
        assert!(!router.is_finished(&state));

        state.messages.push(ChatMessage::ai("Q2").authored_by(ANALYST));
        state.messages.push(ChatMessage::ai("A2").authored_by(EXPERT));
        assert!(router.is_finished(&state));
    }

    #[test]
    fn test_turn_router_closing_phrase_is_case_sensitive() {
        let router = TurnRouter::new("Thank you so much for your help");
        let mut state = interview_state(5);
        state
            .messages
            .push(ChatMessage::ai("thank you so much for your help").authored_by(ANALYST));
        state.messages.push(ChatMessage::ai("A1").authored_by(EXPERT));
        assert!(!router.is_finished(&state));

        state
            .messages
            .push(ChatMessage::ai("Great. Thank you so much for your help!").authored_by(ANALYST));
        state.messages.push(ChatMessage::ai("A2").authored_by(EXPERT));
        assert!(router.is_finished(&state));
    }

    #[tokio::test]
    async fn test_search_failure_degrades_to_placeholder() {
        let node = SearchNode::new(
            SearchKind::News,
            model(scripted(None)),
            Arc::new(FailingSearch::new("news")),
        );
        let update = node
            .run(ctx(), to_state(&interview_state(2)).unwrap())
            .await
            .unwrap();
        assert_eq!(
            update["context"],
            json!(["Error retrieving news articles. Please try again later."])
        );
    }

    #[tokio::test]
    async fn test_unparsable_query_degrades_without_searching() {
        let web = StaticSearch::web("web");
        let calls = web.call_counter();
        let node = SearchNode::new(
            SearchKind::Web,
            model(ScriptedLlm::constant("no json here")),
            Arc::new(web),
        );
        let update = node
            .run(ctx(), to_state(&interview_state(2)).unwrap())
            .await
            .unwrap();
        assert_eq!(
            update["context"],
            json!([SearchKind::Web.error_placeholder()])
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_search_timeout_degrades_to_placeholder() {
        let slow = StaticSearch::web("web").with_delay(Duration::from_secs(3));
        let node = SearchNode::new(SearchKind::Web, model(scripted(None)), Arc::new(slow));
        let update = node
            .run(ctx(), to_state(&interview_state(2)).unwrap())
            .await
            .unwrap();
        assert_eq!(
            update["context"],
            json!([SearchKind::Web.error_placeholder()])
        );
    }

    #[tokio::test]
    async fn test_interview_runs_max_turns_and_writes_one_section() {
        let sources = sources();
        let web_calls = StaticSearch::web("web");
        let web_counter = web_calls.call_counter();
        let sources = SearchSources::new(
            Arc::new(web_calls),
            sources.encyclopedia.clone(),
            sources.news.clone(),
        );
        let graph =
            build_interview_graph(&model(scripted(None)), &sources, &WorkflowConfig::default(), None)
                .unwrap();

        let out = graph
            .run("s1/conduct_interview#0", to_state(&interview_state(2)).unwrap())
            .await
            .unwrap();
        let state: InterviewState = from_state(&out).unwrap();

        assert_eq!(state.turn_count(), 2);
        assert_eq!(web_counter.load(Ordering::SeqCst), 2);
        assert_eq!(state.sections, vec!["## Section\nBody".to_string()]);
        // Three entries per turn, web first.
        assert_eq!(state.context.len(), 6);
        assert!(state.context[0].contains("<Document href=\"https://web.example/article\"/>"));
        assert!(state.context[1].contains("page=\"Qubit\""));
        assert_eq!(state.context[2], "No recent news articles found.");

        let transcript = state.interview.unwrap();
        assert!(transcript.starts_with("Human: So you said"));
        assert!(transcript.contains("analyst: Question 1?"));
        assert!(transcript.contains("expert: An answer [1]."));
    }

    #[tokio::test]
    async fn test_interview_ends_early_on_closing_phrase() {
        let graph = build_interview_graph(
            &model(scripted(Some(1))),
            &sources(),
            &WorkflowConfig::default(),
            None,
        )
        .unwrap();
        let out = graph
            .run("s1/conduct_interview#0", to_state(&interview_state(4)).unwrap())
            .await
            .unwrap();
        let state: InterviewState = from_state(&out).unwrap();
        assert_eq!(state.turn_count(), 1);
        assert_eq!(state.sections.len(), 1);
    }

    #[tokio::test]
    async fn test_one_failing_source_does_not_abort() {
        let sources = SearchSources::new(
            Arc::new(StaticSearch::web("web")),
            Arc::new(FailingSearch::new("encyclopedia")),
            Arc::new(StaticSearch::web("news")),
        );
        let graph =
            build_interview_graph(&model(scripted(None)), &sources, &WorkflowConfig::default(), None)
                .unwrap();
        let out = graph
            .run("s1/conduct_interview#0", to_state(&interview_state(1)).unwrap())
            .await
            .unwrap();
        let state: InterviewState = from_state(&out).unwrap();
        assert_eq!(state.turn_count(), 1);
        assert_eq!(state.context.len(), 3);
        assert!(state.context[0].contains("web findings"));
        assert_eq!(state.context[1], SearchKind::Encyclopedia.error_placeholder());
        assert!(state.context[2].contains("news findings"));
    }
}
