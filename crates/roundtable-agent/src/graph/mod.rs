//! State-graph runtime shared by the research workflow and the interview
//! sub-workflow.
//!
//! Nodes are async functions from the current state to a partial update.
//! Updates merge into the state per key (`Channels`). Edges are static,
//! joins (a barrier over several sources), or conditional; a conditional
//! edge can fan out by returning `Route::Send` branches, each running on
//! its own sub-state. A compiled graph with a session store can halt before
//! interrupt nodes and be resumed later by session id.

pub mod builder;
pub mod edge;
pub mod executor;
pub mod node;
pub mod state;

pub use builder::{CompileOptions, StateGraph};
pub use edge::{Branch, Route, Router, END, START};
pub use executor::{CompiledGraph, StateSnapshot};
pub use node::{Node, NodeContext, SubgraphNode};
pub use state::{from_state, to_state, Channels, MergePolicy, StateMap};
