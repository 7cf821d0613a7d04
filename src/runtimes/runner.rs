//! The superstep loop: plan, dispatch, commit, checkpoint, repeat.
//!
//! One [`SuperstepRunner`] drives one invocation of a compiled graph.
//! Per superstep it:
//!
//! 1. plans tasks from channel version deltas (pull) and the
//!    checkpoint's pending sends (push);
//! 2. halts when nothing is planned, or fails once the recursion limit
//!    is hit;
//! 3. honors the `interrupt_before` gate;
//! 4. dispatches tasks in parallel against the start-of-step snapshot,
//!    each under its node's retry policy;
//! 5. records every completed task's writes through
//!    `Checkpointer::put_writes` *before* committing them, making a
//!    crashed superstep recoverable;
//! 6. commits all writes atomically through the channels' update
//!    rules, bumps versions, advances seen-versions;
//! 7. persists one checkpoint and emits the event records;
//! 8. honors the `interrupt_after` gate.
//!
//! The loop itself is single-threaded: planning, commit, version
//! assignment, and checkpoint emission never overlap with task
//! execution of the same superstep.

use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use super::LoopError;
use super::cancel::CancelToken;
use super::executor::{TaskOutcome, run_task};
use super::stream::{EventStream, StreamEmitter, StreamEvent, StreamModes};
use crate::channels::{Channel, ChannelError};
use crate::checkpoint::{Checkpoint, CheckpointMetadata, CheckpointSource};
use crate::checkpointers::{Checkpointer, PendingWrite};
use crate::config::RunConfig;
use crate::graph::CompiledGraph;
use crate::node::NodeContext;
use crate::task::Task;
use crate::types::{
    BRANCH_PREFIX, ChannelVersion, END, ERROR, INTERRUPT, START, branch_channel, format_version,
    stable_value_hash, version_seq,
};

/// Drives the superstep loop for one compiled graph.
pub struct SuperstepRunner<'g> {
    pub(crate) graph: &'g CompiledGraph,
}

/// Mutable state threaded through one invocation.
pub(crate) struct LoopState {
    /// Thread-level config (checkpoint id cleared).
    pub base_config: RunConfig,
    /// Config naming the current checkpoint; `put_writes` targets it
    /// and the next `put` records it as parent.
    pub current_config: RunConfig,
    pub channels: FxHashMap<String, Channel>,
    pub checkpoint: Checkpoint,
    /// Next superstep index to plan.
    pub step: i64,
    /// Writes already persisted against `checkpoint`, replayed instead
    /// of re-running their tasks.
    pub pending_writes: Vec<PendingWrite>,
    /// Resuming without input skips the before-gate for the first
    /// planned step, otherwise the gate would re-fire forever.
    pub skip_before_gate: bool,
    /// Set when resuming at an explicit historical checkpoint; the
    /// first committed checkpoint is marked `source = fork`.
    pub forked: bool,
}

impl<'g> SuperstepRunner<'g> {
    #[must_use]
    pub fn new(graph: &'g CompiledGraph) -> Self {
        Self { graph }
    }

    /// Run to termination (or an interrupt gate) without streaming.
    pub async fn run_to_completion(
        &self,
        input: Option<Value>,
        config: &RunConfig,
        cancel: CancelToken,
    ) -> Result<Option<Value>, LoopError> {
        self.run_inner(input, config, cancel, StreamEmitter::disabled())
            .await
    }

    /// Run on a spawned task, streaming events through the returned
    /// handle.
    pub(crate) fn spawn_stream(
        graph: CompiledGraph,
        input: Option<Value>,
        config: RunConfig,
        modes: &[super::stream::StreamMode],
    ) -> EventStream {
        let (tx, rx) = flume::unbounded();
        let emitter = StreamEmitter::new(tx, StreamModes::from_modes(modes));
        let handle = tokio::spawn(async move {
            let runner = SuperstepRunner::new(&graph);
            let result = runner
                .run_inner(input, &config, CancelToken::new(), emitter.clone())
                .await;
            match &result {
                Ok(output) => emitter.emit_end(output.clone(), None),
                Err(error) => emitter.emit_end(None, Some(error.to_string())),
            }
            result
        });
        EventStream { rx, handle }
    }

    #[instrument(skip_all, fields(thread = %config.thread_id, ns = %config.checkpoint_ns))]
    async fn run_inner(
        &self,
        input: Option<Value>,
        config: &RunConfig,
        cancel: CancelToken,
        emitter: StreamEmitter,
    ) -> Result<Option<Value>, LoopError> {
        let mut state = self.prepare(input, config).await?;
        enter_contexts(&mut state.channels);
        let result = self
            .drive(&mut state, config, &cancel, &emitter)
            .await;
        // Context resources are released on every exit path, including
        // errors and cancellation.
        exit_contexts(&mut state.channels);
        result
    }

    /// Load the resume point and ingest new input, if any.
    async fn prepare(
        &self,
        input: Option<Value>,
        config: &RunConfig,
    ) -> Result<LoopState, LoopError> {
        let checkpointer = self.graph.checkpointer.clone();
        let tuple = match &checkpointer {
            Some(cp) => cp.get_tuple(config).await?,
            None => None,
        };
        if input.is_none() && tuple.is_none() {
            return Err(LoopError::EmptyInput {
                thread_id: config.thread_id.clone(),
            });
        }

        let forked = config.checkpoint_id.is_some() && tuple.is_some();
        let mut base_config = config.clone();
        base_config.checkpoint_id = None;

        let skip_before_gate = input.is_none();
        let (checkpoint, last_step, pending_writes, current_config) = match tuple {
            Some(tuple) => (
                tuple.checkpoint,
                tuple.metadata.step,
                tuple.pending_writes,
                tuple.config,
            ),
            None => (Checkpoint::empty(), -2, Vec::new(), base_config.clone()),
        };
        let mut channels = hydrate(self.graph, &checkpoint);
        let mut state = LoopState {
            base_config,
            current_config,
            channels: FxHashMap::default(),
            checkpoint,
            step: last_step + 1,
            pending_writes,
            skip_before_gate,
            forked,
        };

        if let Some(value) = input {
            let input_step = if last_step >= -1 { last_step + 1 } else { -1 };
            let mut next = state.checkpoint.next_generation();
            next.pending_sends = state.checkpoint.pending_sends.clone();

            let grouped = bind_input_writes(self.graph, &value);
            let new_versions = apply_writes_to_channels(
                &mut channels,
                &mut next,
                grouped,
                checkpointer.as_deref(),
            )?;

            let mut summary = FxHashMap::default();
            summary.insert(START.to_string(), value);
            let metadata = CheckpointMetadata {
                source: CheckpointSource::Input,
                step: input_step,
                writes: Some(summary),
                parents: config.checkpoint_map.clone(),
                extra: config.labels.clone(),
            };
            state.current_config = match &checkpointer {
                Some(cp) => {
                    cp.put(&state.current_config, next.clone(), metadata, new_versions)
                        .await?
                }
                None => state.current_config.for_checkpoint(next.id.clone()),
            };
            state.checkpoint = next;
            state.step = input_step + 1;
            state.pending_writes = Vec::new();
        }

        state.channels = channels;
        Ok(state)
    }

    /// The superstep loop proper.
    async fn drive(
        &self,
        state: &mut LoopState,
        config: &RunConfig,
        cancel: &CancelToken,
        emitter: &StreamEmitter,
    ) -> Result<Option<Value>, LoopError> {
        let graph = self.graph;
        loop {
            if cancel.is_cancelled() {
                return Err(LoopError::Cancelled);
            }

            // PLAN: pull tasks from version deltas, push tasks from
            // pending sends.
            let mut tasks = plan_tasks(graph, &state.checkpoint, &state.channels, state.step);

            // HALT: nothing to do means normal termination.
            if tasks.is_empty() {
                return Ok(Some(read_output(graph, &state.channels)));
            }
            if state.step >= state.base_config.recursion_limit as i64 {
                return Err(LoopError::RecursionExceeded {
                    limit: state.base_config.recursion_limit,
                });
            }

            // INTERRUPT GATE (before).
            if !state.skip_before_gate
                && tasks.iter().any(|t| graph.interrupt_before.matches(&t.name))
            {
                debug!(step = state.step, "pausing at interrupt_before gate");
                return Ok(None);
            }
            state.skip_before_gate = false;

            for task in &tasks {
                emitter.emit_debug(StreamEvent::Task {
                    id: task.id.clone(),
                    name: task.name.clone(),
                    step: state.step,
                    input: task.input.clone(),
                    triggers: task.triggers.clone(),
                });
            }

            // DISPATCH: replay persisted writes where available, run
            // everything else in parallel on the worker pool.
            let mut cached: FxHashMap<String, Vec<(String, Value)>> = FxHashMap::default();
            for pw in &state.pending_writes {
                if pw.channel == ERROR || pw.channel == INTERRUPT {
                    // Error and interrupt markers are discarded on
                    // resume; their tasks re-run.
                    continue;
                }
                cached
                    .entry(pw.task_id.clone())
                    .or_default()
                    .push((pw.channel.clone(), pw.value.clone()));
            }

            let semaphore = Arc::new(Semaphore::new(graph.max_concurrency));
            let mut join_set: JoinSet<(usize, TaskOutcome)> = JoinSet::new();
            for (index, task) in tasks.iter_mut().enumerate() {
                if let Some(writes) = cached.remove(&task.id) {
                    task.writes = writes;
                    task.replayed = true;
                    continue;
                }
                let Some(node) = graph.node(&task.name) else {
                    // Planner already filtered unknown names.
                    continue;
                };
                let body = Arc::clone(&node.body);
                let policy = node.spec.retry.clone();
                let input = task.input.clone();
                let ctx = NodeContext::new(
                    task.name.clone(),
                    state.step,
                    task.id.clone(),
                    state.checkpoint.id.clone(),
                    state.base_config.clone(),
                    cancel.clone(),
                    emitter.clone(),
                    graph.store.clone(),
                    graph.checkpointer.clone(),
                );
                let semaphore = Arc::clone(&semaphore);
                join_set.spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    (index, run_task(body, input, ctx, policy).await)
                });
            }

            let mut outcomes: Vec<Option<TaskOutcome>> = Vec::new();
            outcomes.resize_with(tasks.len(), || None);
            while let Some(joined) = join_set.join_next().await {
                let (index, outcome) = joined?;
                outcomes[index] = Some(outcome);
            }

            // PENDING-WRITE RECORDING and outcome triage, in task
            // order.
            let mut first_failure: Option<(String, crate::node::NodeError)> = None;
            let mut multiple_subgraphs: Option<String> = None;
            let mut invalid_write: Option<ChannelError> = None;
            let mut any_interrupt = false;

            for (index, task) in tasks.iter_mut().enumerate() {
                if task.replayed {
                    debug!(task = %task.id, node = %task.name, "replaying persisted writes");
                    emitter.emit_debug(StreamEvent::TaskResult {
                        id: task.id.clone(),
                        name: task.name.clone(),
                        writes: task.writes.clone(),
                        error: None,
                        interrupts: Vec::new(),
                    });
                    continue;
                }
                let Some(outcome) = outcomes[index].take() else {
                    continue;
                };
                let TaskOutcome {
                    writes,
                    dispatches,
                    error,
                    interrupts,
                    attempts: _,
                } = outcome;
                match error {
                    Some(crate::node::NodeError::MultipleSubgraphs { node }) => {
                        task.error = Some(format!("subgraph invoked twice in node `{node}`"));
                        multiple_subgraphs.get_or_insert(node);
                    }
                    Some(error) => {
                        task.error = Some(error.to_string());
                        self.record_writes(
                            state,
                            &task.id,
                            vec![(ERROR.to_string(), json!(error.to_string()))],
                        )
                        .await?;
                        if first_failure.is_none() {
                            first_failure = Some((task.name.clone(), error));
                        }
                    }
                    None if !interrupts.is_empty() => {
                        task.interrupts = interrupts;
                        any_interrupt = true;
                        for payload in &task.interrupts {
                            emitter.emit_debug(StreamEvent::Interrupt {
                                node: task.name.clone(),
                                payload: payload.clone(),
                            });
                        }
                        self.record_writes(
                            state,
                            &task.id,
                            vec![(INTERRUPT.to_string(), json!(task.interrupts.clone()))],
                        )
                        .await?;
                    }
                    None => {
                        task.writes = writes;
                        task.dispatches = dispatches;
                        if let Some(violation) = check_write_universe(graph, task) {
                            invalid_write.get_or_insert(violation);
                        }
                        append_route_writes(graph, task);
                        self.record_writes(state, &task.id, task.writes.clone())
                            .await?;
                    }
                }
                emitter.emit_debug(StreamEvent::TaskResult {
                    id: task.id.clone(),
                    name: task.name.clone(),
                    writes: task.writes.clone(),
                    error: task.error.clone(),
                    interrupts: task.interrupts.clone(),
                });
            }

            // Terminal conditions are resolved only after every task's
            // pending writes were recorded; that is what makes the
            // superstep recoverable.
            if let Some(node) = multiple_subgraphs {
                return Err(LoopError::MultipleSubgraphs { node });
            }
            if let Some(violation) = invalid_write {
                return Err(LoopError::InvalidUpdate(violation));
            }
            if cancel.is_cancelled() {
                return Err(LoopError::Cancelled);
            }
            if let Some((node, source)) = first_failure {
                return Err(LoopError::Node { node, source });
            }
            if any_interrupt {
                // No commit: interrupted nodes re-plan on resume and
                // completed siblings replay from pending writes.
                return Ok(None);
            }

            // COMMIT: single-superstep channels clear, then all writes
            // aggregate per channel under the variant's rule.
            for channel in state.channels.values_mut() {
                channel.consume();
            }
            let grouped = group_writes(&tasks);
            let mut next_checkpoint = state.checkpoint.next_generation();
            next_checkpoint.pending_sends = tasks
                .iter()
                .flat_map(|t| t.dispatches.iter().cloned())
                .collect();
            let new_versions = apply_writes_to_channels(
                &mut state.channels,
                &mut next_checkpoint,
                grouped,
                self.graph.checkpointer.as_deref(),
            )?;
            for task in &tasks {
                if task.observed.is_empty() {
                    continue;
                }
                let seen = next_checkpoint
                    .versions_seen
                    .entry(task.name.clone())
                    .or_default();
                for (channel, version) in &task.observed {
                    seen.insert(channel.clone(), version.clone());
                }
            }

            // EMIT CHECKPOINT.
            let metadata = CheckpointMetadata {
                source: if state.forked {
                    CheckpointSource::Fork
                } else {
                    CheckpointSource::Loop
                },
                step: state.step,
                writes: Some(writes_summary(&tasks)),
                parents: config.checkpoint_map.clone(),
                extra: config.labels.clone(),
            };
            state.forked = false;
            state.current_config = match &self.graph.checkpointer {
                Some(cp) => {
                    cp.put(
                        &state.current_config,
                        next_checkpoint.clone(),
                        metadata.clone(),
                        new_versions,
                    )
                    .await?
                }
                None => state
                    .current_config
                    .for_checkpoint(next_checkpoint.id.clone()),
            };

            let values = public_values(&next_checkpoint.channel_values);
            let next_names = plan_preview(graph, &next_checkpoint, &state.channels, state.step + 1);
            emitter.emit_debug(StreamEvent::Checkpoint {
                step: state.step,
                source: metadata.source,
                values: values.clone(),
                next: next_names,
            });
            emitter.emit_values(state.step, values);
            for task in &tasks {
                let writes = public_write_map(&task.writes);
                if !writes.is_empty() {
                    emitter.emit_updates(state.step, &task.name, writes);
                }
            }

            let ran: Vec<&str> = tasks.iter().map(|t| t.name.as_str()).collect();
            state.checkpoint = next_checkpoint;
            state.pending_writes = Vec::new();

            // INTERRUPT GATE (after).
            if ran.iter().any(|name| graph.interrupt_after.matches(name)) {
                debug!(step = state.step, "pausing at interrupt_after gate");
                return Ok(None);
            }

            state.step += 1;
        }
    }

    async fn record_writes(
        &self,
        state: &LoopState,
        task_id: &str,
        writes: Vec<(String, Value)>,
    ) -> Result<(), LoopError> {
        if writes.is_empty() {
            return Ok(());
        }
        if let Some(cp) = &self.graph.checkpointer {
            cp.put_writes(&state.current_config, writes, task_id).await?;
        }
        Ok(())
    }
}

/// Hydrate working channels from a checkpoint's values.
pub(crate) fn hydrate(
    graph: &CompiledGraph,
    checkpoint: &Checkpoint,
) -> FxHashMap<String, Channel> {
    graph
        .channels
        .iter()
        .map(|(name, proto)| {
            let snapshot = checkpoint.channel_values.get(name).cloned();
            (name.clone(), proto.from_checkpoint(snapshot))
        })
        .collect()
}

fn enter_contexts(channels: &mut FxHashMap<String, Channel>) {
    for channel in channels.values_mut() {
        if let Channel::Context(ctx) = channel {
            ctx.enter();
        }
    }
}

fn exit_contexts(channels: &mut FxHashMap<String, Channel>) {
    for channel in channels.values_mut() {
        if let Channel::Context(ctx) = channel {
            ctx.exit();
        }
    }
}

/// Compute the tasks of one superstep.
///
/// Pull tasks come first, one per triggered node, in node declaration
/// order (ties between triggers break by trigger declaration order);
/// push tasks follow in pending-send order.
pub(crate) fn plan_tasks(
    graph: &CompiledGraph,
    checkpoint: &Checkpoint,
    channels: &FxHashMap<String, Channel>,
    step: i64,
) -> Vec<Task> {
    let mut tasks = Vec::new();
    for node in &graph.nodes {
        let name = &node.spec.name;
        let seen = checkpoint.versions_seen.get(name);
        let advanced = node.spec.triggers.iter().find(|trigger| {
            let Some(current) = checkpoint.channel_versions.get(*trigger) else {
                return false;
            };
            match seen.and_then(|s| s.get(*trigger)) {
                Some(seen_version) => current > seen_version,
                None => true,
            }
        });
        let Some(trigger) = advanced else { continue };

        let mut observed = FxHashMap::default();
        for trigger in &node.spec.triggers {
            if let Some(version) = checkpoint.channel_versions.get(trigger) {
                observed.insert(trigger.clone(), version.clone());
            }
        }
        tasks.push(Task::pull(
            &checkpoint.id,
            name,
            step,
            trigger,
            bind_input(&node.spec.inputs, channels),
            node.spec.triggers.clone(),
            observed,
        ));
    }
    for (index, dispatch) in checkpoint.pending_sends.iter().enumerate() {
        if graph.node(&dispatch.node).is_none() {
            warn!(node = %dispatch.node, "dropping dispatch to unknown node");
            continue;
        }
        tasks.push(Task::push(&checkpoint.id, step, index, dispatch));
    }
    tasks
}

/// Cheap plan that only yields the names of the next step's tasks.
fn plan_preview(
    graph: &CompiledGraph,
    checkpoint: &Checkpoint,
    channels: &FxHashMap<String, Channel>,
    step: i64,
) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for task in plan_tasks(graph, checkpoint, channels, step) {
        if !names.contains(&task.name) {
            names.push(task.name);
        }
    }
    names
}

/// Bind a node's input value from the channel snapshot: raw value for
/// one input channel, keyed record for several, null for none.
fn bind_input(inputs: &[String], channels: &FxHashMap<String, Channel>) -> Value {
    match inputs {
        [] => Value::Null,
        [single] => channels
            .get(single)
            .and_then(|c| c.get(single).ok())
            .unwrap_or(Value::Null),
        many => {
            let mut record = serde_json::Map::new();
            for name in many {
                if let Some(value) = channels.get(name).and_then(|c| c.get(name).ok()) {
                    record.insert(name.clone(), value);
                }
            }
            Value::Object(record)
        }
    }
}

/// Translate caller input into channel writes: the input channels get
/// the value (keyed by channel when several are declared), and the
/// `__start__` marker always fires.
fn bind_input_writes(graph: &CompiledGraph, value: &Value) -> Vec<(String, Vec<Value>)> {
    let mut writes: Vec<(String, Vec<Value>)> = Vec::new();
    match (graph.input_channels.as_slice(), value) {
        ([single], _) => writes.push((single.clone(), vec![value.clone()])),
        (many, Value::Object(map)) => {
            for name in many {
                if let Some(v) = map.get(name) {
                    writes.push((name.clone(), vec![v.clone()]));
                }
            }
        }
        (many, _) => {
            for name in many {
                writes.push((name.clone(), vec![value.clone()]));
            }
        }
    }
    writes.push((START.to_string(), vec![value.clone()]));
    writes
}

/// Group task writes per channel, in task order then emission order.
/// Engine route markers collapse to one write per channel.
fn group_writes(tasks: &[Task]) -> Vec<(String, Vec<Value>)> {
    let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for task in tasks {
        for (channel, value) in &task.writes {
            grouped
                .entry(channel.clone())
                .or_default()
                .push(value.clone());
        }
    }
    grouped
        .into_iter()
        .map(|(channel, mut values)| {
            if channel.starts_with(BRANCH_PREFIX) {
                values.truncate(1);
            }
            (channel, values)
        })
        .collect()
}

/// Apply grouped writes to the channels, bump versions for every
/// changed tracked channel, and refresh the checkpoint's value map.
pub(crate) fn apply_writes_to_channels(
    channels: &mut FxHashMap<String, Channel>,
    next: &mut Checkpoint,
    grouped: Vec<(String, Vec<Value>)>,
    checkpointer: Option<&dyn Checkpointer>,
) -> Result<FxHashMap<String, ChannelVersion>, LoopError> {
    let mut new_versions = FxHashMap::default();
    for (name, values) in grouped {
        let Some(channel) = channels.get_mut(&name) else {
            return Err(LoopError::InvalidUpdate(ChannelError::InvalidUpdate {
                channel: name,
                reason: "channel is not declared in the compiled graph".to_string(),
            }));
        };
        let changed = channel.update(&name, values)?;
        if changed && channel.is_tracked() {
            let content = channel.checkpoint().unwrap_or(Value::Null);
            let current = next.channel_versions.get(&name);
            let version = match checkpointer {
                Some(cp) => cp.next_version(current, &content),
                None => default_next_version(current, &content),
            };
            next.channel_versions.insert(name.clone(), version.clone());
            new_versions.insert(name, version);
        }
    }
    next.channel_values = channels
        .iter()
        .filter_map(|(name, channel)| channel.checkpoint().map(|v| (name.clone(), v)))
        .collect();
    Ok(new_versions)
}

/// Version successor used when no checkpointer is attached; identical
/// to the trait's default derivation.
fn default_next_version(current: Option<&ChannelVersion>, value: &Value) -> ChannelVersion {
    let seq = current.map(|v| version_seq(v)).unwrap_or(0) + 1;
    format_version(seq, stable_value_hash(value))
}

/// Reject writes outside the node's declared write set. Engine route
/// markers are appended after this check and are exempt.
fn check_write_universe(graph: &CompiledGraph, task: &Task) -> Option<ChannelError> {
    let spec = &graph.node(&task.name)?.spec;
    for (channel, _) in &task.writes {
        if !spec.writes.contains(channel) {
            return Some(ChannelError::InvalidUpdate {
                channel: channel.clone(),
                reason: format!("not in node `{}`'s write set", task.name),
            });
        }
    }
    None
}

/// Append the engine's routing writes: one marker per static edge
/// target, plus the targets picked by the node's branch routers.
fn append_route_writes(graph: &CompiledGraph, task: &mut Task) {
    if let Some(targets) = graph.edges.get(&task.name) {
        for target in targets {
            task.writes.push((branch_channel(target), Value::Null));
        }
    }
    let node_writes = public_write_map(&task.writes);
    for branch in graph.branches.iter().filter(|b| b.from == task.name) {
        for target in (branch.router)(&node_writes) {
            if target == END {
                continue;
            }
            if !branch.targets.contains(&target) {
                warn!(
                    node = %task.name,
                    %target,
                    "branch router returned an undeclared target; skipping"
                );
                continue;
            }
            task.writes.push((branch_channel(&target), Value::Null));
        }
    }
}

/// Per-node writes summary for checkpoint metadata, internal channels
/// excluded.
fn writes_summary(tasks: &[Task]) -> FxHashMap<String, Value> {
    let mut summary: FxHashMap<String, Value> = FxHashMap::default();
    for task in tasks {
        let writes = public_write_map(&task.writes);
        let entry = summary
            .entry(task.name.clone())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let (Value::Object(base), writes) = (entry, writes) {
            for (channel, value) in writes {
                base.insert(channel, value);
            }
        }
    }
    summary
}

/// A task's writes as a map, with engine-internal channels filtered
/// out.
fn public_write_map(writes: &[(String, Value)]) -> FxHashMap<String, Value> {
    writes
        .iter()
        .filter(|(channel, _)| is_public_channel(channel))
        .map(|(channel, value)| (channel.clone(), value.clone()))
        .collect()
}

/// Channel values with engine-internal channels filtered out.
pub(crate) fn public_values(values: &FxHashMap<String, Value>) -> FxHashMap<String, Value> {
    values
        .iter()
        .filter(|(channel, _)| is_public_channel(channel))
        .map(|(channel, value)| (channel.clone(), value.clone()))
        .collect()
}

pub(crate) fn is_public_channel(name: &str) -> bool {
    name != START && !name.starts_with(BRANCH_PREFIX)
}

/// Project the output channels into the invocation's return value.
fn read_output(graph: &CompiledGraph, channels: &FxHashMap<String, Channel>) -> Value {
    match graph.output_channels.as_slice() {
        [] => {
            let mut record = serde_json::Map::new();
            for (name, channel) in channels {
                if is_public_channel(name) {
                    if let Some(value) = channel.checkpoint() {
                        record.insert(name.clone(), value);
                    }
                }
            }
            Value::Object(record)
        }
        [single] => channels
            .get(single)
            .and_then(|c| c.get(single).ok())
            .unwrap_or(Value::Null),
        many => {
            let mut record = serde_json::Map::new();
            for name in many {
                if let Some(value) = channels.get(name).and_then(|c| c.get(name).ok()) {
                    record.insert(name.clone(), value);
                }
            }
            Value::Object(record)
        }
    }
}
