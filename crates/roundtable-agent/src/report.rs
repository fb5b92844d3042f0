use futures::future::BoxFuture;
use serde_json::json;
use tracing::{info, warn};

use roundtable_core::error::Result;
use roundtable_core::types::ChatMessage;
use roundtable_llm::ChatModel;

use crate::graph::{from_state, to_state, Node, NodeContext, StateMap};
use crate::prompts;
use crate::state::WorkflowState;

pub const WRITE_REPORT: &str = "write_report";
pub const WRITE_INTRODUCTION: &str = "write_introduction";
pub const WRITE_CONCLUSION: &str = "write_conclusion";
pub const FINALIZE_REPORT: &str = "finalize_report";

const SEPARATOR: &str = "\n\n---\n\n";

fn joined_sections(state: &WorkflowState) -> String {
    state.sections.join("\n\n")
}

/// Consolidates every interview section into the report body.
pub struct WriteReport {
    model: ChatModel,
}

impl WriteReport {
    pub fn new(model: ChatModel) -> Self {
        Self { model }
    }
}

impl Node for WriteReport {
    fn run(&self, _ctx: NodeContext, state: StateMap) -> BoxFuture<'_, Result<StateMap>> {
        Box::pin(async move {
            let state: WorkflowState = from_state(&state)?;
            let system = prompts::report_writer_instructions(&state.topic, &joined_sections(&state));
            let body = self
                .model
                .generate(
                    WRITE_REPORT,
                    &system,
                    &[ChatMessage::human("Write a report based upon these memos.")],
                )
                .await?;
            to_state(&json!({ "report_body": body.content }))
        })
    }
}

/// Which framing section a [`WriteFraming`] node produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Introduction,
    Conclusion,
}

impl Framing {
    fn key(self) -> &'static str {
        match self {
            Self::Introduction => "introduction",
            Self::Conclusion => "conclusion",
        }
    }

    fn node_name(self) -> &'static str {
        match self {
            Self::Introduction => WRITE_INTRODUCTION,
            Self::Conclusion => WRITE_CONCLUSION,
        }
    }
}

/// Writes the introduction or the conclusion from the sections.
pub struct WriteFraming {
    framing: Framing,
    model: ChatModel,
}

impl WriteFraming {
    pub fn new(framing: Framing, model: ChatModel) -> Self {
        Self { framing, model }
    }
}

impl Node for WriteFraming {
    fn run(&self, _ctx: NodeContext, state: StateMap) -> BoxFuture<'_, Result<StateMap>> {
        Box::pin(async move {
            let state: WorkflowState = from_state(&state)?;
            let system =
                prompts::intro_conclusion_instructions(&state.topic, &joined_sections(&state));
            let instruction = format!("Write the report {}", self.framing.key());
            let text = self
                .model
                .generate(self.framing.node_name(), &system, &[ChatMessage::human(instruction)])
                .await?;
            let mut update = StateMap::new();
            update.insert(self.framing.key().to_string(), json!(text.content));
            Ok(update)
        })
    }
}

/// Strips a leading `## Insights` header from the report body.
pub fn strip_insights_header(body: &str) -> &str {
    body.trim_start()
        .strip_prefix("## Insights")
        .map(str::trim_start)
        .unwrap_or(body)
}

/// Splits off a trailing `## Sources` block, if present.
pub fn split_sources(body: &str) -> (&str, Option<&str>) {
    match body.find("\n## Sources") {
        Some(idx) => {
            let sources = body[idx..].trim_start().trim_start_matches("## Sources").trim();
            (body[..idx].trim_end(), Some(sources))
        }
        None => (body, None),
    }
}

/// Assemble introduction, body, and conclusion into the final report.
pub fn assemble_report(introduction: &str, body: &str, conclusion: &str) -> String {
    let body = strip_insights_header(body);
    let (content, sources) = split_sources(body);
    let mut report = format!(
        "{}{}{}{}{}",
        introduction.trim(),
        SEPARATOR,
        content.trim(),
        SEPARATOR,
        conclusion.trim()
    );
    if let Some(sources) = sources.filter(|s| !s.is_empty()) {
        report.push_str("\n\n## Sources\n");
        report.push_str(sources);
    }
    report
}

/// Assembles the final report and drafts the podcast script. A failed
/// podcast script leaves the report intact and records why it is missing.
pub struct FinalizeReport {
    model: ChatModel,
    host: String,
    show: String,
}

impl FinalizeReport {
    pub fn new(model: ChatModel, host: &str, show: &str) -> Self {
        Self {
            model,
            host: host.to_string(),
            show: show.to_string(),
        }
    }

    async fn podcast(&self, state: &WorkflowState, report: &str) -> Result<String> {
        let system = prompts::podcast_instructions(
            &self.host,
            &self.show,
            &state.topic,
            &state.analysts,
            report,
        );
        let script = self
            .model
            .generate(
                "podcast_script",
                &system,
                &[ChatMessage::human("Create an engaging podcast script.")],
            )
            .await?;
        Ok(script.content)
    }
}

impl Node for FinalizeReport {
    fn run(&self, ctx: NodeContext, state: StateMap) -> BoxFuture<'_, Result<StateMap>> {
        Box::pin(async move {
            let state: WorkflowState = from_state(&state)?;
            let report = assemble_report(
                state.introduction.as_deref().unwrap_or_default(),
                state.report_body.as_deref().unwrap_or_default(),
                state.conclusion.as_deref().unwrap_or_default(),
            );
            info!(
                session_id = %ctx.session_id,
                sections = state.sections.len(),
                chars = report.len(),
                "Report assembled"
            );

            let (podcast_script, podcast_error) = match self.podcast(&state, &report).await {
                Ok(script) => (Some(script), None),
                Err(e) => {
                    warn!(session_id = %ctx.session_id, error = %e, "Podcast script failed");
                    (None, Some(e.to_string()))
                }
            };

            to_state(&json!({
                "final_report": report,
                "podcast_script": podcast_script,
                "podcast_error": podcast_error,
            }))
        })
    }
}
