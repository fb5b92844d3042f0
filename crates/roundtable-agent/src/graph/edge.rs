use std::sync::Arc;

use roundtable_core::error::Result;

use super::state::StateMap;

/// Entry sentinel, usable as the source of `add_edge`.
pub const START: &str = "__start__";
/// Terminal sentinel.
pub const END: &str = "__end__";

/// One fan-out branch: a node to run on its own isolated state.
#[derive(Debug, Clone)]
pub struct Branch {
    pub node: String,
    pub state: StateMap,
}

impl Branch {
    pub fn new(node: impl Into<String>, state: StateMap) -> Self {
        Self {
            node: node.into(),
            state,
        }
    }
}

/// Decision returned by a conditional edge.
#[derive(Debug, Clone)]
pub enum Route {
    /// Continue to these nodes with the shared state.
    To(Vec<String>),
    /// Spawn one task per branch, each on its own sub-state.
    Send(Vec<Branch>),
    End,
}

impl Route {
    pub fn to(node: impl Into<String>) -> Self {
        Self::To(vec![node.into()])
    }
}

/// A transition decision evaluated against the merged state after its
/// source node completes.
pub trait Router: Send + Sync + 'static {
    fn route(&self, state: &StateMap) -> Result<Route>;
}

impl<F> Router for F
where
    F: Fn(&StateMap) -> Result<Route> + Send + Sync + 'static,
{
    fn route(&self, state: &StateMap) -> Result<Route> {
        self(state)
    }
}

#[derive(Clone)]
pub(crate) enum Edge {
    Static {
        from: String,
        to: String,
    },
    /// `target` runs once every source has completed.
    Join {
        sources: Vec<String>,
        target: String,
    },
    Conditional {
        from: String,
        router: Arc<dyn Router>,
        destinations: Vec<String>,
    },
}

impl Edge {
    /// Whether this edge leaves `node`.
    pub(crate) fn leaves(&self, node: &str) -> bool {
        match self {
            Edge::Static { from, .. } | Edge::Conditional { from, .. } => from == node,
            Edge::Join { sources, .. } => sources.iter().any(|s| s == node),
        }
    }

    /// Every node this edge can lead to.
    pub(crate) fn targets(&self) -> Vec<&str> {
        match self {
            Edge::Static { to, .. } => vec![to.as_str()],
            Edge::Join { target, .. } => vec![target.as_str()],
            Edge::Conditional { destinations, .. } => {
                destinations.iter().map(String::as_str).collect()
            }
        }
    }

    pub(crate) fn is_conditional(&self) -> bool {
        matches!(self, Edge::Conditional { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_endpoints() {
        let join = Edge::Join {
            sources: vec!["a".into(), "b".into()],
            target: "c".into(),
        };
        assert!(join.leaves("a") && join.leaves("b") && !join.leaves("c"));
        assert_eq!(join.targets(), vec!["c"]);

        let cond = Edge::Conditional {
            from: "c".into(),
            router: Arc::new(|_: &StateMap| -> Result<Route> { Ok(Route::End) }),
            destinations: vec!["a".into(), END.into()],
        };
        assert!(cond.is_conditional());
        assert_eq!(cond.targets(), vec!["a", END]);
    }
}
