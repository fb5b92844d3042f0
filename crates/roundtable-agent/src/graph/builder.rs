use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use roundtable_core::config::BarrierTimeoutPolicy;
use roundtable_core::error::{Result, RoundtableError};
use roundtable_core::traits::SessionStore;
use roundtable_core::EventBus;

use super::edge::{Edge, Router, END, START};
use super::executor::CompiledGraph;
use super::node::{Node, SubgraphNode};
use super::state::Channels;

const DEFAULT_RECURSION_LIMIT: usize = 25;

/// Runtime options fixed when a graph is compiled.
#[derive(Clone)]
pub struct CompileOptions {
    pub interrupt_before: Vec<String>,
    pub store: Option<Arc<dyn SessionStore>>,
    pub events: Option<Arc<EventBus>>,
    pub recursion_limit: usize,
    pub barrier_timeout: Option<Duration>,
    pub on_barrier_timeout: BarrierTimeoutPolicy,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            interrupt_before: vec![],
            store: None,
            events: None,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            barrier_timeout: None,
            on_barrier_timeout: BarrierTimeoutPolicy::default(),
        }
    }
}

impl CompileOptions {
    /// Halt before executing any of these nodes.
    pub fn interrupt_before(mut self, nodes: &[&str]) -> Self {
        self.interrupt_before = nodes.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Persist sessions in `store`. Required for `invoke`, `resume`,
    /// `get_state`, and `update_state`.
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Ceiling for each superstep, and what to do with tasks still running
    /// when it passes.
    pub fn barrier_timeout(mut self, timeout: Option<Duration>, policy: BarrierTimeoutPolicy) -> Self {
        self.barrier_timeout = timeout;
        self.on_barrier_timeout = policy;
        self
    }
}

/// Builder for a state graph. Nodes must be declared before edges refer to
/// them.
pub struct StateGraph {
    channels: Channels,
    nodes: HashMap<String, Arc<dyn Node>>,
    order: Vec<String>,
    edges: Vec<Edge>,
    entry: Option<String>,
}

impl StateGraph {
    pub fn new(channels: Channels) -> Self {
        Self {
            channels,
            nodes: HashMap::new(),
            order: Vec::new(),
            edges: Vec::new(),
            entry: None,
        }
    }

    pub fn add_node(&mut self, name: &str, node: impl Node) -> Result<&mut Self> {
        if name == START || name == END || name.is_empty() {
            return Err(RoundtableError::Configuration(format!(
                "'{}' is not a valid node name",
                name
            )));
        }
        if self.nodes.contains_key(name) {
            return Err(RoundtableError::Configuration(format!(
                "node '{}' is already declared",
                name
            )));
        }
        self.nodes.insert(name.to_string(), Arc::new(node));
        self.order.push(name.to_string());
        Ok(self)
    }

    /// Embed a compiled graph as a node contributing `output_keys`.
    pub fn add_subgraph(
        &mut self,
        name: &str,
        graph: CompiledGraph,
        output_keys: &[&str],
    ) -> Result<&mut Self> {
        self.add_node(name, SubgraphNode::new(graph, output_keys))
    }

    /// Unconditional transition. `from` may be `START`, `to` may be `END`.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<&mut Self> {
        self.check_target(to)?;
        if from == START {
            return self.set_entry_point(to);
        }
        self.check_declared(from)?;
        self.edges.push(Edge::Static {
            from: from.to_string(),
            to: to.to_string(),
        });
        Ok(self)
    }

    /// Barrier: `target` runs once, after every one of `sources` completed.
    pub fn add_join(&mut self, sources: &[&str], target: &str) -> Result<&mut Self> {
        if sources.is_empty() {
            return Err(RoundtableError::Configuration(format!(
                "join into '{}' has no sources",
                target
            )));
        }
        for source in sources {
            self.check_declared(source)?;
        }
        self.check_target(target)?;
        self.edges.push(Edge::Join {
            sources: sources.iter().map(|s| s.to_string()).collect(),
            target: target.to_string(),
        });
        Ok(self)
    }

    /// Transition decided at run time by `router`, which may only choose
    /// among `destinations`.
    pub fn add_conditional_edges(
        &mut self,
        from: &str,
        router: impl Router,
        destinations: &[&str],
    ) -> Result<&mut Self> {
        self.check_declared(from)?;
        if destinations.is_empty() {
            return Err(RoundtableError::Configuration(format!(
                "conditional edge from '{}' has no destinations",
                from
            )));
        }
        for dest in destinations {
            self.check_target(dest)?;
        }
        self.edges.push(Edge::Conditional {
            from: from.to_string(),
            router: Arc::new(router),
            destinations: destinations.iter().map(|d| d.to_string()).collect(),
        });
        Ok(self)
    }

    pub fn set_entry_point(&mut self, name: &str) -> Result<&mut Self> {
        self.check_declared(name)?;
        self.entry = Some(name.to_string());
        Ok(self)
    }

    fn check_declared(&self, name: &str) -> Result<()> {
        if self.nodes.contains_key(name) {
            Ok(())
        } else {
            Err(RoundtableError::Configuration(format!(
                "node '{}' is not declared",
                name
            )))
        }
    }

    fn check_target(&self, name: &str) -> Result<()> {
        if name == END {
            Ok(())
        } else {
            self.check_declared(name)
        }
    }

    /// Freeze the graph after checking its shape.
    pub fn compile(self, options: CompileOptions) -> Result<CompiledGraph> {
        let entry = self
            .entry
            .clone()
            .ok_or_else(|| RoundtableError::Configuration("graph has no entry point".into()))?;

        for name in &options.interrupt_before {
            self.check_declared(name)?;
        }
        if options.recursion_limit == 0 {
            return Err(RoundtableError::Configuration(
                "recursion limit must be at least 1".into(),
            ));
        }

        self.check_outgoing()?;
        self.check_reachable(&entry)?;
        self.check_terminates()?;
        self.check_static_cycles()?;

        Ok(CompiledGraph::new(
            self.channels,
            self.nodes,
            self.edges,
            entry,
            options,
        ))
    }

    fn check_outgoing(&self) -> Result<()> {
        for name in &self.order {
            if !self.edges.iter().any(|e| e.leaves(name)) {
                return Err(RoundtableError::Configuration(format!(
                    "node '{}' has no outgoing edge",
                    name
                )));
            }
        }
        Ok(())
    }

    fn check_reachable(&self, entry: &str) -> Result<()> {
        let mut seen: HashSet<&str> = HashSet::from([entry]);
        let mut queue = VecDeque::from([entry]);
        while let Some(node) = queue.pop_front() {
            for edge in self.edges.iter().filter(|e| e.leaves(node)) {
                for target in edge.targets() {
                    if target != END && seen.insert(target) {
                        queue.push_back(target);
                    }
                }
            }
        }
        match self.order.iter().find(|n| !seen.contains(n.as_str())) {
            Some(orphan) => Err(RoundtableError::Configuration(format!(
                "node '{}' is unreachable from '{}'",
                orphan, entry
            ))),
            None => Ok(()),
        }
    }

    fn check_terminates(&self) -> Result<()> {
        // Walk backwards from END.
        let mut done: HashSet<&str> = HashSet::new();
        let mut queue = VecDeque::from([END]);
        while let Some(node) = queue.pop_front() {
            for edge in &self.edges {
                if !edge.targets().contains(&node) {
                    continue;
                }
                let sources: Vec<&str> = match edge {
                    Edge::Static { from, .. } | Edge::Conditional { from, .. } => vec![from.as_str()],
                    Edge::Join { sources, .. } => sources.iter().map(String::as_str).collect(),
                };
                for source in sources {
                    if done.insert(source) {
                        queue.push_back(source);
                    }
                }
            }
        }
        match self.order.iter().find(|n| !done.contains(n.as_str())) {
            Some(stuck) => Err(RoundtableError::Configuration(format!(
                "node '{}' has no path to END",
                stuck
            ))),
            None => Ok(()),
        }
    }

    /// Cycles are only allowed through a conditional edge.
    fn check_static_cycles(&self) -> Result<()> {
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in self.edges.iter().filter(|e| !e.is_conditional()) {
            for node in &self.order {
                if edge.leaves(node) {
                    adjacency
                        .entry(node.as_str())
                        .or_default()
                        .extend(edge.targets().into_iter().filter(|t| *t != END));
                }
            }
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            node: &'a str,
            adjacency: &HashMap<&'a str, Vec<&'a str>>,
            marks: &mut HashMap<&'a str, Mark>,
        ) -> Option<&'a str> {
            match marks.get(node) {
                Some(Mark::Done) => return None,
                Some(Mark::Visiting) => return Some(node),
                None => {}
            }
            marks.insert(node, Mark::Visiting);
            for next in adjacency.get(node).into_iter().flatten() {
                if let Some(cycle) = visit(*next, adjacency, marks) {
                    return Some(cycle);
                }
            }
            marks.insert(node, Mark::Done);
            None
        }

        let mut marks = HashMap::new();
        for node in &self.order {
            if let Some(at) = visit(node, &adjacency, &mut marks) {
                return Err(RoundtableError::Configuration(format!(
                    "cycle through '{}' without a conditional edge",
                    at
                )));
            }
        }
        Ok(())
    }
}
