use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use roundtable_core::error::Result;

use super::executor::CompiledGraph;
use super::state::StateMap;

/// Where a node is running: the run it belongs to and its task label
/// (`node` or, for a fan-out branch, `node#index`).
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub session_id: String,
    pub task: String,
}

/// A named state transition: reads the state, returns a partial update.
pub trait Node: Send + Sync + 'static {
    fn run(&self, ctx: NodeContext, state: StateMap) -> BoxFuture<'_, Result<StateMap>>;
}

impl<F, Fut> Node for F
where
    F: Fn(NodeContext, StateMap) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StateMap>> + Send + 'static,
{
    fn run(&self, ctx: NodeContext, state: StateMap) -> BoxFuture<'_, Result<StateMap>> {
        Box::pin(self(ctx, state))
    }
}

/// A compiled graph embedded as a node. It runs to completion on the state
/// it is given and contributes the listed keys of its final state.
pub struct SubgraphNode {
    graph: Arc<CompiledGraph>,
    output_keys: Vec<String>,
}

impl SubgraphNode {
    pub fn new(graph: CompiledGraph, output_keys: &[&str]) -> Self {
        Self {
            graph: Arc::new(graph),
            output_keys: output_keys.iter().map(|k| k.to_string()).collect(),
        }
    }
}

impl Node for SubgraphNode {
    fn run(&self, ctx: NodeContext, state: StateMap) -> BoxFuture<'_, Result<StateMap>> {
        Box::pin(async move {
            let run_id = format!("{}/{}", ctx.session_id, ctx.task);
            let mut final_state = self.graph.run(&run_id, state).await?;
            Ok(self
                .output_keys
                .iter()
                .filter_map(|k| final_state.remove(k).map(|v| (k.clone(), v)))
                .collect())
        })
    }
}
