use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use roundtable_core::config::BarrierTimeoutPolicy;
use roundtable_core::error::{Result, RoundtableError};
use roundtable_core::session::{BranchFailure, PendingTask, SessionRecord};
use roundtable_core::traits::SessionStore;
use roundtable_core::types::WorkflowEvent;
use roundtable_core::EventBus;

use super::builder::CompileOptions;
use super::edge::{Edge, Route, END};
use super::node::{Node, NodeContext};
use super::state::{from_state, Channels, StateMap};

/// Read-only view of a persisted session.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub session_id: String,
    pub values: StateMap,
    /// Task labels that will run on resume.
    pub next: Vec<String>,
    /// Interrupt node the run is halted before, if any.
    pub paused_at: Option<String>,
    pub version: u64,
    pub failures: Vec<BranchFailure>,
}

impl StateSnapshot {
    fn from_record(record: &SessionRecord) -> Self {
        Self {
            session_id: record.session_id.clone(),
            values: record.state.clone(),
            next: task_labels(&record.next),
            paused_at: record.paused_at.clone(),
            version: record.version,
            failures: record.failures.clone(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.next.is_empty() && self.paused_at.is_none()
    }

    /// A single key, deserialized. Missing and null keys are `None`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.values.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        }
    }

    /// The whole state as a typed view.
    pub fn typed<T: DeserializeOwned>(&self) -> Result<T> {
        from_state(&self.values)
    }
}

enum TaskError {
    Failed(RoundtableError),
    TimedOut,
}

struct Progress {
    state: StateMap,
    paused_at: Option<String>,
}

/// A frozen graph. Executes in supersteps: every task of a step runs
/// concurrently, their updates merge in task order, and the next step is
/// computed from the merged state.
pub struct CompiledGraph {
    channels: Channels,
    nodes: HashMap<String, Arc<dyn Node>>,
    edges: Vec<Edge>,
    entry: String,
    interrupt_before: HashSet<String>,
    store: Option<Arc<dyn SessionStore>>,
    events: Option<Arc<EventBus>>,
    recursion_limit: usize,
    barrier_timeout: Option<Duration>,
    on_barrier_timeout: BarrierTimeoutPolicy,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CompiledGraph {
    pub(crate) fn new(
        channels: Channels,
        nodes: HashMap<String, Arc<dyn Node>>,
        edges: Vec<Edge>,
        entry: String,
        options: CompileOptions,
    ) -> Self {
        Self {
            channels,
            nodes,
            edges,
            entry,
            interrupt_before: options.interrupt_before.into_iter().collect(),
            store: options.store,
            events: options.events,
            recursion_limit: options.recursion_limit,
            barrier_timeout: options.barrier_timeout,
            on_barrier_timeout: options.on_barrier_timeout,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Run from the entry point to END without persisting anything.
    pub async fn run(&self, run_id: &str, initial: StateMap) -> Result<StateMap> {
        let tasks = vec![PendingTask::node(&self.entry)];
        let progress = self.execute(run_id, initial, tasks, None, false).await?;
        match progress.paused_at {
            Some(node) => Err(RoundtableError::Configuration(format!(
                "run {} reached interrupt '{}' without a session store",
                run_id, node
            ))),
            None => Ok(progress.state),
        }
    }

    /// Start a session from the entry point, replacing any existing record
    /// under the same id. Returns at the first interrupt or at END.
    pub async fn invoke(&self, session_id: &str, initial: StateMap) -> Result<StateSnapshot> {
        let store = self.store()?;
        let _guard = self.session_lock(session_id).await;

        let mut record = SessionRecord::new(session_id);
        record.version = store
            .load(session_id)
            .await?
            .map(|existing| existing.version)
            .unwrap_or(0);
        record.state = initial;
        record.next = vec![PendingTask::node(&self.entry)];
        self.checkpoint(&mut record).await?;

        info!(session_id, entry = %self.entry, "Run started");
        let state = record.state.clone();
        let tasks = record.next.clone();
        self.execute(session_id, state, tasks, Some(&mut record), false)
            .await?;
        Ok(StateSnapshot::from_record(&record))
    }

    /// Continue a session from its saved tasks. The interrupt the session is
    /// paused at is not re-checked.
    pub async fn resume(&self, session_id: &str) -> Result<StateSnapshot> {
        let _guard = self.session_lock(session_id).await;
        let mut record = self.load(session_id).await?;

        if record.next.is_empty() {
            debug!(session_id, "Session already complete, nothing to resume");
            return Ok(StateSnapshot::from_record(&record));
        }

        info!(session_id, next = ?task_labels(&record.next), "Run resumed");
        let state = record.state.clone();
        let tasks = record.next.clone();
        self.execute(session_id, state, tasks, Some(&mut record), true)
            .await?;
        Ok(StateSnapshot::from_record(&record))
    }

    pub async fn get_state(&self, session_id: &str) -> Result<StateSnapshot> {
        Ok(StateSnapshot::from_record(&self.load(session_id).await?))
    }

    /// Merge `update` into a session as if `as_node` had just produced it,
    /// without running `as_node`. The session's next tasks become
    /// `as_node`'s successors under the merged state.
    pub async fn update_state(
        &self,
        session_id: &str,
        update: StateMap,
        as_node: &str,
    ) -> Result<StateSnapshot> {
        self.apply_update(session_id, update, as_node, false).await
    }

    /// Like `update_state`, but only while the session is paused before
    /// `node`. The paused position is checked under the session lock, so a
    /// concurrent resume cannot slip in between the check and the write.
    pub async fn update_paused_state(
        &self,
        session_id: &str,
        update: StateMap,
        node: &str,
    ) -> Result<StateSnapshot> {
        self.apply_update(session_id, update, node, true).await
    }

    /// Remove a session's record and its lock entry. Waits for any run
    /// holding the session to finish first.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let store = self.store()?;
        let guard = self.session_lock(session_id).await;
        let deleted = store.delete(session_id).await?;

        let mut locks = self.locks.lock().await;
        drop(guard);
        // A count of one means only the map holds the lock.
        if locks
            .get(session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(session_id);
        }

        info!(session_id, deleted, "Session deleted");
        Ok(deleted)
    }

    async fn apply_update(
        &self,
        session_id: &str,
        update: StateMap,
        as_node: &str,
        require_paused: bool,
    ) -> Result<StateSnapshot> {
        if !self.nodes.contains_key(as_node) {
            return Err(RoundtableError::Configuration(format!(
                "node '{}' is not declared",
                as_node
            )));
        }

        let _guard = self.session_lock(session_id).await;
        let mut record = self.load(session_id).await?;

        if require_paused && record.paused_at.as_deref() != Some(as_node) {
            return Err(RoundtableError::InvalidInput(format!(
                "session {} is not paused at '{}'",
                session_id, as_node
            )));
        }

        self.channels.merge(&mut record.state, update);
        let mut joins = HashMap::new();
        record.next =
            self.next_tasks(session_id, &[as_node.to_string()], &record.state, &mut joins)?;
        record.paused_at = None;
        record.pending_interrupt = false;
        self.checkpoint(&mut record).await?;

        info!(session_id, as_node, next = ?task_labels(&record.next), "State updated");
        Ok(StateSnapshot::from_record(&record))
    }

    fn store(&self) -> Result<&Arc<dyn SessionStore>> {
        self.store.as_ref().ok_or_else(|| {
            RoundtableError::Configuration("graph was compiled without a session store".into())
        })
    }

    async fn load(&self, session_id: &str) -> Result<SessionRecord> {
        self.store()?
            .load(session_id)
            .await?
            .ok_or_else(|| RoundtableError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    async fn checkpoint(&self, record: &mut SessionRecord) -> Result<()> {
        record.updated_at = Utc::now();
        record.version = self.store()?.save(record, record.version).await?;
        Ok(())
    }

    /// Serializes runs, updates and deletes per session id.
    async fn session_lock(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(session_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    fn publish(&self, event: WorkflowEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }

    async fn execute(
        &self,
        run_id: &str,
        mut state: StateMap,
        mut tasks: Vec<PendingTask>,
        mut record: Option<&mut SessionRecord>,
        resuming: bool,
    ) -> Result<Progress> {
        let mut steps = 0usize;
        let mut joins: HashMap<usize, HashSet<String>> = HashMap::new();

        loop {
            if tasks.is_empty() {
                info!(session_id = %run_id, steps, "Run complete");
                if let Some(r) = record.as_deref_mut() {
                    r.state = state.clone();
                    r.next.clear();
                    r.paused_at = None;
                    r.pending_interrupt = false;
                    self.checkpoint(r).await?;
                }
                self.publish(WorkflowEvent::RunComplete {
                    session_id: run_id.to_string(),
                    steps,
                });
                return Ok(Progress {
                    state,
                    paused_at: None,
                });
            }

            if !(resuming && steps == 0) {
                let paused = tasks
                    .iter()
                    .find(|t| self.interrupt_before.contains(&t.node))
                    .map(|t| t.node.clone());
                if let Some(node) = paused {
                    info!(session_id = %run_id, node = %node, "Run interrupted");
                    if let Some(r) = record.as_deref_mut() {
                        r.state = state.clone();
                        r.next = tasks;
                        r.paused_at = Some(node.clone());
                        r.pending_interrupt = true;
                        self.checkpoint(r).await?;
                    }
                    self.publish(WorkflowEvent::Interrupted {
                        session_id: run_id.to_string(),
                        node: node.clone(),
                    });
                    return Ok(Progress {
                        state,
                        paused_at: Some(node),
                    });
                }
            }

            if steps >= self.recursion_limit {
                return Err(RoundtableError::RecursionLimit {
                    session_id: run_id.to_string(),
                    limit: self.recursion_limit,
                });
            }
            steps += 1;

            let labels = task_labels(&tasks);
            debug!(session_id = %run_id, step = steps, tasks = ?labels, "Superstep");
            let outcomes = self.run_step(run_id, &state, &tasks, &labels).await;

            let mut completed: Vec<String> = Vec::new();
            let mut step_failures: Vec<BranchFailure> = Vec::new();
            let mut branch_errors: Vec<(String, RoundtableError)> = Vec::new();
            let mut timed_out: Vec<(String, String)> = Vec::new();

            for ((task, label), outcome) in tasks.iter().zip(&labels).zip(outcomes) {
                match outcome {
                    Ok(update) => {
                        self.channels.merge(&mut state, update);
                        if !completed.contains(&task.node) {
                            completed.push(task.node.clone());
                        }
                    }
                    Err(TaskError::Failed(e)) if task.is_branch() => {
                        warn!(
                            session_id = %run_id,
                            branch = %label,
                            error = %e,
                            "Branch failed, excluding it from the join"
                        );
                        self.publish(WorkflowEvent::BranchFailed {
                            session_id: run_id.to_string(),
                            branch: label.clone(),
                            error: e.to_string(),
                        });
                        step_failures.push(BranchFailure {
                            branch: label.clone(),
                            error: e.to_string(),
                            timestamp: Utc::now(),
                        });
                        branch_errors.push((task.node.clone(), e));
                    }
                    Err(TaskError::Failed(e)) => return Err(e.at_node(run_id, &task.node)),
                    Err(TaskError::TimedOut) => timed_out.push((task.node.clone(), label.clone())),
                }
            }

            if !timed_out.is_empty() {
                let pending: Vec<String> = timed_out.iter().map(|(_, l)| l.clone()).collect();
                let starved = timed_out.iter().find(|(n, _)| !completed.contains(n));
                if self.on_barrier_timeout == BarrierTimeoutPolicy::Abort || starved.is_some() {
                    let node = starved.unwrap_or(&timed_out[0]).0.clone();
                    return Err(RoundtableError::BarrierTimeout {
                        session_id: run_id.to_string(),
                        node,
                        pending,
                    });
                }
                warn!(
                    session_id = %run_id,
                    pending = ?pending,
                    "Barrier timed out, proceeding without unreported tasks"
                );
                for label in pending {
                    step_failures.push(BranchFailure {
                        branch: label,
                        error: "timed out before the barrier".into(),
                        timestamp: Utc::now(),
                    });
                }
            }

            // A fan-out where every branch failed has nothing to join.
            if let Some(pos) = branch_errors.iter().position(|(n, _)| !completed.contains(n)) {
                let (node, err) = branch_errors.swap_remove(pos);
                return Err(err.at_node(run_id, &node));
            }

            tasks = self.next_tasks(run_id, &completed, &state, &mut joins)?;

            if let Some(r) = record.as_deref_mut() {
                r.state = state.clone();
                r.next = tasks.clone();
                r.paused_at = None;
                r.pending_interrupt = false;
                r.failures.extend(step_failures);
                self.checkpoint(r).await?;
            }
        }
    }

    async fn run_step(
        &self,
        run_id: &str,
        state: &StateMap,
        tasks: &[PendingTask],
        labels: &[String],
    ) -> Vec<std::result::Result<StateMap, TaskError>> {
        let deadline = self
            .barrier_timeout
            .map(|t| tokio::time::Instant::now() + t);

        let futures = tasks.iter().zip(labels).map(|(task, label)| async move {
            let node = match self.nodes.get(&task.node) {
                Some(node) => node.clone(),
                None => {
                    return Err(TaskError::Failed(RoundtableError::Configuration(format!(
                        "node '{}' is not declared",
                        task.node
                    ))))
                }
            };
            let input = task.input.clone().unwrap_or_else(|| state.clone());
            let ctx = NodeContext {
                session_id: run_id.to_string(),
                task: label.clone(),
            };

            debug!(session_id = %run_id, task = %label, "Node started");
            self.publish(WorkflowEvent::NodeStarted {
                session_id: run_id.to_string(),
                node: label.clone(),
            });
            let started = Instant::now();

            let result = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, node.run(ctx, input)).await {
                    Ok(result) => result.map_err(TaskError::Failed),
                    Err(_) => Err(TaskError::TimedOut),
                },
                None => node.run(ctx, input).await.map_err(TaskError::Failed),
            };

            if result.is_ok() {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                debug!(session_id = %run_id, task = %label, elapsed_ms, "Node completed");
                self.publish(WorkflowEvent::NodeCompleted {
                    session_id: run_id.to_string(),
                    node: label.clone(),
                    elapsed_ms,
                });
            }
            result
        });

        join_all(futures).await
    }

    /// Successor tasks of the nodes completed in one step, in edge order,
    /// with plain node tasks deduplicated.
    fn next_tasks(
        &self,
        run_id: &str,
        completed: &[String],
        state: &StateMap,
        joins: &mut HashMap<usize, HashSet<String>>,
    ) -> Result<Vec<PendingTask>> {
        let mut next = Vec::new();

        for node in completed {
            for (idx, edge) in self.edges.iter().enumerate() {
                match edge {
                    Edge::Static { from, to } if from == node => {
                        push_task(&mut next, PendingTask::node(to));
                    }
                    Edge::Join { sources, target } if sources.contains(node) => {
                        let seen = joins.entry(idx).or_default();
                        seen.insert(node.clone());
                        if sources.iter().all(|s| seen.contains(s)) {
                            joins.remove(&idx);
                            push_task(&mut next, PendingTask::node(target));
                        }
                    }
                    Edge::Conditional {
                        from,
                        router,
                        destinations,
                    } if from == node => {
                        let route = router.route(state).map_err(|e| e.at_node(run_id, node))?;
                        let check = |dest: &str| -> Result<()> {
                            if dest == END || destinations.iter().any(|d| d == dest) {
                                Ok(())
                            } else {
                                Err(RoundtableError::Configuration(format!(
                                    "router on '{}' chose undeclared destination '{}'",
                                    node, dest
                                )))
                            }
                        };
                        match route {
                            Route::End => {}
                            Route::To(targets) => {
                                for target in targets {
                                    check(&target)?;
                                    push_task(&mut next, PendingTask::node(target));
                                }
                            }
                            Route::Send(branches) => {
                                for branch in branches {
                                    check(&branch.node)?;
                                    push_task(&mut next, PendingTask::branch(branch.node, branch.state));
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(next)
    }
}

fn push_task(next: &mut Vec<PendingTask>, task: PendingTask) {
    if task.node == END {
        return;
    }
    if !task.is_branch() && next.iter().any(|t| !t.is_branch() && t.node == task.node) {
        return;
    }
    next.push(task);
}

/// `node` for plain tasks, `node#index` for fan-out branches.
fn task_labels(tasks: &[PendingTask]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    tasks
        .iter()
        .map(|t| {
            if t.is_branch() {
                let index = counts.entry(t.node.as_str()).or_insert(0);
                let label = format!("{}#{}", t.node, index);
                *index += 1;
                label
            } else {
                t.node.clone()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::{json, Value};

    use roundtable_memory::MemorySessionStore;

    use super::*;
    use crate::graph::{Branch, StateGraph, START};

    fn obj(v: Value) -> StateMap {
        v.as_object().cloned().unwrap()
    }

    fn set(key: &'static str, value: Value) -> impl Node {
        move |_ctx: NodeContext, _state: StateMap| {
            let update = obj(json!({ key: value.clone() }));
            async move { Ok::<_, RoundtableError>(update) }
        }
    }

    fn counting(counter: Arc<AtomicUsize>, key: &'static str) -> impl Node {
        move |_ctx: NodeContext, _state: StateMap| {
            counter.fetch_add(1, Ordering::SeqCst);
            let update = obj(json!({ key: [key] }));
            async move { Ok::<_, RoundtableError>(update) }
        }
    }

    fn store() -> Arc<dyn SessionStore> {
        Arc::new(MemorySessionStore::new())
    }

    #[tokio::test]
    async fn test_linear_run_merges_updates() {
        let mut g = StateGraph::new(Channels::new());
        g.add_node("a", set("x", json!(1))).unwrap();
        g.add_node("b", set("y", json!(2))).unwrap();
        g.add_edge(START, "a").unwrap();
        g.add_edge("a", "b").unwrap();
        g.add_edge("b", END).unwrap();
        let graph = g.compile(CompileOptions::default()).unwrap();

        let out = graph.run("r1", obj(json!({"x": 0, "z": 9}))).await.unwrap();
        assert_eq!(Value::Object(out), json!({"x": 1, "y": 2, "z": 9}));
    }

    #[tokio::test]
    async fn test_join_waits_for_all_sources() {
        let joined = Arc::new(AtomicUsize::new(0));
        let mut g = StateGraph::new(Channels::new().append("log"));
        g.add_node("start", set("log", json!(["start"]))).unwrap();
        g.add_node("left", set("log", json!(["left"]))).unwrap();
        g.add_node("right", set("log", json!(["right"]))).unwrap();
        g.add_node("merge", counting(joined.clone(), "log")).unwrap();
        g.add_edge(START, "start").unwrap();
        g.add_edge("start", "left").unwrap();
        g.add_edge("start", "right").unwrap();
        g.add_join(&["left", "right"], "merge").unwrap();
        g.add_edge("merge", END).unwrap();
        let graph = g.compile(CompileOptions::default()).unwrap();

        let out = graph.run("r1", StateMap::new()).await.unwrap();
        assert_eq!(joined.load(Ordering::SeqCst), 1);
        assert_eq!(out["log"], json!(["start", "left", "right", "log"]));
    }

    fn fan_out_graph(worker: impl Node, options: CompileOptions) -> CompiledGraph {
        let mut g = StateGraph::new(Channels::new().append("results"));
        g.add_node("plan", set("items", json!([0, 1, 2]))).unwrap();
        g.add_node("worker", worker).unwrap();
        g.add_edge(START, "plan").unwrap();
        g.add_conditional_edges(
            "plan",
            |state: &StateMap| -> Result<Route> {
                let items = state["items"].as_array().cloned().unwrap_or_default();
                Ok(Route::Send(
                    items
                        .into_iter()
                        .map(|i| Branch::new("worker", obj(json!({ "item": i }))))
                        .collect(),
                ))
            },
            &["worker"],
        )
        .unwrap();
        g.add_edge("worker", END).unwrap();
        g.compile(options).unwrap()
    }

    /// Later items finish first; results still merge in branch order.
    async fn slow_worker(_ctx: NodeContext, state: StateMap) -> Result<StateMap> {
        let item = state["item"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(30 * (3 - item))).await;
        if state.contains_key("items") {
            return Err(RoundtableError::InvalidInput("branch saw parent state".into()));
        }
        Ok(obj(json!({ "results": [format!("item-{}", item)] })))
    }

    async fn flaky_worker(_ctx: NodeContext, state: StateMap) -> Result<StateMap> {
        let item = state["item"].as_u64().unwrap_or(0);
        if item == 1 {
            return Err(RoundtableError::collaborator("search", "HTTP 500"));
        }
        Ok(obj(json!({ "results": [item] })))
    }

    #[tokio::test]
    async fn test_send_branches_isolated_and_ordered() {
        let graph = fan_out_graph(slow_worker, CompileOptions::default());
        let out = graph.run("r1", StateMap::new()).await.unwrap();
        assert_eq!(out["results"], json!(["item-0", "item-1", "item-2"]));
    }

    #[tokio::test]
    async fn test_failed_branch_is_excluded_and_recorded() {
        let graph = fan_out_graph(flaky_worker, CompileOptions::default().with_store(store()));
        let snap = graph.invoke("s1", StateMap::new()).await.unwrap();
        assert!(snap.is_complete());
        assert_eq!(snap.values["results"], json!([0, 2]));
        assert_eq!(snap.failures.len(), 1);
        assert_eq!(snap.failures[0].branch, "worker#1");
    }

    #[tokio::test]
    async fn test_all_branches_failing_fails_the_run() {
        let failing = |_ctx: NodeContext, _state: StateMap| async {
            Err::<StateMap, _>(RoundtableError::Generation("nope".into()))
        };
        let graph = fan_out_graph(failing, CompileOptions::default());
        let err = graph.run("r1", StateMap::new()).await.unwrap_err();
        assert!(matches!(err, RoundtableError::NodeFailed { ref node, .. } if node == "worker"));
    }

    #[tokio::test]
    async fn test_node_failure_carries_session_and_node() {
        let mut g = StateGraph::new(Channels::new());
        g.add_node("boom", |_ctx: NodeContext, _state: StateMap| async {
            Err::<StateMap, _>(RoundtableError::Generation("expected 3 analysts, got 2".into()))
        })
        .unwrap();
        g.add_edge(START, "boom").unwrap();
        g.add_edge("boom", END).unwrap();
        let graph = g.compile(CompileOptions::default().with_store(store())).unwrap();

        match graph.invoke("s9", StateMap::new()).await.unwrap_err() {
            RoundtableError::NodeFailed {
                session_id, node, ..
            } => {
                assert_eq!(session_id, "s9");
                assert_eq!(node, "boom");
            }
            other => panic!("unexpected {:?}", other),
        }
        // The record from before the failed step survives for a retry.
        let snap = graph.get_state("s9").await.unwrap();
        assert_eq!(snap.next, vec!["boom".to_string()]);
    }

    fn gated_graph(store: Arc<dyn SessionStore>, drafts: Arc<AtomicUsize>) -> CompiledGraph {
        let mut g = StateGraph::new(Channels::new().append("published"));
        g.add_node("draft", counting(drafts, "drafts")).unwrap();
        g.add_node("review", set("reviewed", json!(true))).unwrap();
        g.add_node("publish", set("published", json!(["done"]))).unwrap();
        g.add_edge(START, "draft").unwrap();
        g.add_edge("draft", "review").unwrap();
        g.add_conditional_edges(
            "review",
            |state: &StateMap| -> Result<Route> {
                match state.get("feedback").and_then(Value::as_str) {
                    Some("redo") => Ok(Route::to("draft")),
                    _ => Ok(Route::to("publish")),
                }
            },
            &["draft", "publish"],
        )
        .unwrap();
        g.add_edge("publish", END).unwrap();
        g.compile(
            CompileOptions::default()
                .interrupt_before(&["review"])
                .with_store(store),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_interrupt_update_and_resume() {
        let drafts = Arc::new(AtomicUsize::new(0));
        let graph = gated_graph(store(), drafts.clone());

        let snap = graph.invoke("s1", StateMap::new()).await.unwrap();
        assert_eq!(snap.paused_at.as_deref(), Some("review"));
        assert_eq!(snap.next, vec!["review".to_string()]);
        assert!(snap.values.get("reviewed").is_none());

        let snap = graph
            .update_state("s1", obj(json!({"feedback": "redo"})), "review")
            .await
            .unwrap();
        assert_eq!(snap.next, vec!["draft".to_string()]);
        assert!(snap.paused_at.is_none());

        let snap = graph.resume("s1").await.unwrap();
        assert_eq!(drafts.load(Ordering::SeqCst), 2);
        assert_eq!(snap.paused_at.as_deref(), Some("review"));

        graph
            .update_state("s1", obj(json!({"feedback": "ship it"})), "review")
            .await
            .unwrap();
        let snap = graph.resume("s1").await.unwrap();
        assert!(snap.is_complete());
        assert_eq!(snap.values["published"], json!(["done"]));
        assert!(snap.values.get("reviewed").is_none());
    }

    #[tokio::test]
    async fn test_resume_without_update_runs_interrupt_node() {
        let graph = gated_graph(store(), Arc::new(AtomicUsize::new(0)));
        graph.invoke("s1", StateMap::new()).await.unwrap();
        let snap = graph.resume("s1").await.unwrap();
        assert!(snap.is_complete());
        assert_eq!(snap.values["reviewed"], json!(true));
    }

    #[tokio::test]
    async fn test_paused_update_rejected_once_session_moves_on() {
        let graph = gated_graph(store(), Arc::new(AtomicUsize::new(0)));
        graph.invoke("s1", StateMap::new()).await.unwrap();

        assert!(matches!(
            graph
                .update_paused_state("s1", StateMap::new(), "draft")
                .await,
            Err(RoundtableError::InvalidInput(_))
        ));

        let snap = graph.resume("s1").await.unwrap();
        assert!(snap.is_complete());
        let before = snap.version;

        let err = graph
            .update_paused_state("s1", obj(json!({"feedback": "redo"})), "review")
            .await
            .unwrap_err();
        assert!(matches!(err, RoundtableError::InvalidInput(_)));
        let snap = graph.get_state("s1").await.unwrap();
        assert!(snap.is_complete());
        assert_eq!(snap.version, before);
        assert!(snap.values.get("feedback").is_none());
    }

    #[tokio::test]
    async fn test_delete_session_drops_lock_entry() {
        let graph = gated_graph(store(), Arc::new(AtomicUsize::new(0)));
        graph.invoke("s1", StateMap::new()).await.unwrap();
        assert!(graph.locks.lock().await.contains_key("s1"));

        assert!(graph.delete_session("s1").await.unwrap());
        assert!(!graph.locks.lock().await.contains_key("s1"));
        assert!(matches!(
            graph.get_state("s1").await,
            Err(RoundtableError::SessionNotFound { .. })
        ));
        assert!(!graph.delete_session("s1").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let graph = gated_graph(store(), Arc::new(AtomicUsize::new(0)));
        assert!(matches!(
            graph.get_state("ghost").await,
            Err(RoundtableError::SessionNotFound { .. })
        ));
        assert!(matches!(
            graph.resume("ghost").await,
            Err(RoundtableError::SessionNotFound { .. })
        ));
        assert!(matches!(
            graph.update_state("ghost", StateMap::new(), "review").await,
            Err(RoundtableError::SessionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_concurrent_resumes_are_serialized() {
        let graph = gated_graph(store(), Arc::new(AtomicUsize::new(0)));
        graph.invoke("s1", StateMap::new()).await.unwrap();
        graph
            .update_state("s1", obj(json!({"feedback": "ship it"})), "review")
            .await
            .unwrap();

        let (a, b) = tokio::join!(graph.resume("s1"), graph.resume("s1"));
        let (a, b) = (a.unwrap(), b.unwrap());
        // Whichever resume runs second finds the session complete.
        assert!(a.is_complete() && b.is_complete());
        assert_eq!(a.version, b.version);
        let snap = graph.get_state("s1").await.unwrap();
        assert_eq!(snap.values["published"], json!(["done"]));
    }

    #[tokio::test]
    async fn test_barrier_timeout_abort_lists_pending() {
        let options = CompileOptions::default()
            .barrier_timeout(Some(Duration::from_millis(40)), BarrierTimeoutPolicy::Abort);
        let graph = fan_out_graph(slow_worker, options);
        match graph.run("r1", StateMap::new()).await.unwrap_err() {
            RoundtableError::BarrierTimeout { node, pending, .. } => {
                assert_eq!(node, "worker");
                assert_eq!(pending, vec!["worker#0".to_string(), "worker#1".to_string()]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_barrier_timeout_proceed_keeps_partial_results() {
        let options = CompileOptions::default()
            .barrier_timeout(Some(Duration::from_millis(40)), BarrierTimeoutPolicy::Proceed)
            .with_store(store());
        let graph = fan_out_graph(slow_worker, options);
        let snap = graph.invoke("s1", StateMap::new()).await.unwrap();
        assert_eq!(snap.values["results"], json!(["item-2"]));
        assert_eq!(snap.failures.len(), 2);
    }

    #[tokio::test]
    async fn test_recursion_limit() {
        let mut g = StateGraph::new(Channels::new());
        g.add_node("spin", set("x", json!(1))).unwrap();
        g.add_edge(START, "spin").unwrap();
        g.add_conditional_edges(
            "spin",
            |_: &StateMap| -> Result<Route> { Ok(Route::to("spin")) },
            &["spin", END],
        )
        .unwrap();
        let graph = g.compile(CompileOptions::default().recursion_limit(5)).unwrap();
        assert!(matches!(
            graph.run("r1", StateMap::new()).await,
            Err(RoundtableError::RecursionLimit { limit: 5, .. })
        ));
    }

    #[tokio::test]
    async fn test_router_cannot_leave_declared_destinations() {
        let mut g = StateGraph::new(Channels::new());
        g.add_node("a", set("x", json!(1))).unwrap();
        g.add_node("b", set("x", json!(2))).unwrap();
        g.add_node("c", set("x", json!(3))).unwrap();
        g.add_edge(START, "a").unwrap();
        g.add_conditional_edges(
            "a",
            |_: &StateMap| -> Result<Route> { Ok(Route::to("c")) },
            &["b", END],
        )
        .unwrap();
        g.add_edge("b", "c").unwrap();
        g.add_edge("c", END).unwrap();
        let graph = g.compile(CompileOptions::default()).unwrap();

        match graph.run("r1", StateMap::new()).await.unwrap_err() {
            RoundtableError::Configuration(msg) => assert!(msg.contains("undeclared destination 'c'")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_subgraph_contributes_output_keys() {
        let mut inner = StateGraph::new(Channels::new().append("notes"));
        inner.add_node("n1", set("notes", json!(["one"]))).unwrap();
        inner.add_node("n2", set("notes", json!(["two"]))).unwrap();
        inner.add_node("sum", |_ctx: NodeContext, state: StateMap| async move {
            let count = state["notes"].as_array().map(Vec::len).unwrap_or(0);
            Ok::<_, RoundtableError>(obj(json!({ "summary": [format!("{} notes", count)] })))
        })
        .unwrap();
        inner.add_edge(START, "n1").unwrap();
        inner.add_edge("n1", "n2").unwrap();
        inner.add_edge("n2", "sum").unwrap();
        inner.add_edge("sum", END).unwrap();
        let inner = inner.compile(CompileOptions::default()).unwrap();

        let mut outer = StateGraph::new(Channels::new().append("summary"));
        outer.add_subgraph("child", inner, &["summary"]).unwrap();
        outer.add_edge(START, "child").unwrap();
        outer.add_edge("child", END).unwrap();
        let outer = outer.compile(CompileOptions::default()).unwrap();

        let out = outer.run("r1", StateMap::new()).await.unwrap();
        assert_eq!(out["summary"], json!(["2 notes"]));
        assert!(out.get("notes").is_none());
    }
}
