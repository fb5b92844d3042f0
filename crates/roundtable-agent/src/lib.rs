//! Research workflow: a small state-graph runtime and the analyst, interview,
//! and report steps built on it.

pub mod analysts;
pub mod dispatch;
pub mod graph;
pub mod interview;
pub mod prompts;
pub mod report;
pub mod state;
pub mod workflow;

pub use graph::{CompiledGraph, StateGraph, StateSnapshot};
pub use state::{InterviewState, WorkflowState};
pub use workflow::{build_research_graph, ResearchWorkflow, HUMAN_FEEDBACK};
