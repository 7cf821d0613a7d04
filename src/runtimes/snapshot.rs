//! State inspection and external mutation.
//!
//! `get_state` and `get_state_history` project persisted checkpoints
//! into [`StateSnapshot`]s: current values, the derived `next` tuple
//! (re-planned from the checkpoint, empty iff terminated), per-task
//! records, and lineage. `update_state` writes a new checkpoint as if
//! a chosen node had produced the given writes.

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use rustc_hash::FxHashMap;
use serde_json::Value;

use super::LoopError;
use super::runner::{
    SuperstepRunner, apply_writes_to_channels, hydrate, plan_tasks, public_values,
};
use super::subgraph::{effective_child, namespace_segment};
use crate::checkpoint::{CheckpointMetadata, CheckpointSource};
use crate::checkpointers::{CheckpointQuery, CheckpointTuple, Checkpointer};
use crate::config::RunConfig;
use crate::graph::CompiledGraph;
use crate::types::{ERROR, INTERRUPT, START, TaskPath};

/// Per-task record embedded in a [`StateSnapshot`].
#[derive(Clone, Debug)]
pub struct TaskSnapshot {
    pub id: String,
    pub name: String,
    pub path: TaskPath,
    /// Terminal error recorded for this task, if any.
    pub error: Option<String>,
    /// Dynamic interrupt payloads recorded for this task.
    pub interrupts: Vec<Value>,
    /// The nested graph's state, populated by
    /// `get_state(subgraphs = true)` for subgraph nodes.
    pub state: Option<Box<StateSnapshot>>,
}

/// Snapshot of one thread's state at a checkpoint.
#[derive(Clone, Debug)]
pub struct StateSnapshot {
    /// Channel values (engine-internal channels excluded).
    pub values: FxHashMap<String, Value>,
    /// Node names scheduled for the next superstep; empty iff the run
    /// has terminated.
    pub next: Vec<String>,
    /// The next step's planned tasks, with any recorded errors and
    /// interrupts.
    pub tasks: Vec<TaskSnapshot>,
    /// Fully qualified config naming the snapshotted checkpoint.
    pub config: RunConfig,
    pub metadata: Option<CheckpointMetadata>,
    pub created_at: Option<DateTime<Utc>>,
    pub parent_config: Option<RunConfig>,
}

impl StateSnapshot {
    /// Snapshot for a thread with no checkpoints yet.
    #[must_use]
    pub(crate) fn missing(config: RunConfig) -> Self {
        Self {
            values: FxHashMap::default(),
            next: Vec::new(),
            tasks: Vec::new(),
            config,
            metadata: None,
            created_at: None,
            parent_config: None,
        }
    }

    /// Whether the thread has nothing left to run.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.next.is_empty()
    }
}

fn require_checkpointer(
    graph: &CompiledGraph,
) -> Result<&std::sync::Arc<dyn Checkpointer>, LoopError> {
    graph.checkpointer.as_ref().ok_or(LoopError::NoCheckpointer)
}

impl SuperstepRunner<'_> {
    /// Snapshot the checkpoint named by `config` (latest when no
    /// checkpoint id is pinned).
    pub async fn get_state(
        &self,
        config: &RunConfig,
        subgraphs: bool,
    ) -> Result<StateSnapshot, LoopError> {
        let checkpointer = require_checkpointer(self.graph)?;
        match checkpointer.get_tuple(config).await? {
            Some(tuple) => self.snapshot_from_tuple(config, tuple, subgraphs).await,
            None => Ok(StateSnapshot::missing(config.clone())),
        }
    }

    /// History of snapshots, newest first. `before` is exclusive.
    pub async fn get_state_history(
        &self,
        config: &RunConfig,
        limit: Option<usize>,
        before: Option<String>,
    ) -> Result<Vec<StateSnapshot>, LoopError> {
        let checkpointer = require_checkpointer(self.graph)?;
        let tuples = checkpointer
            .list(config, CheckpointQuery { before, limit })
            .await?;
        let mut snapshots = Vec::with_capacity(tuples.len());
        for tuple in tuples {
            snapshots.push(self.snapshot_from_tuple(config, tuple, false).await?);
        }
        Ok(snapshots)
    }

    /// Create a checkpoint with `source = update`, recording `writes`
    /// as if produced by `as_node` (or the synthetic start node).
    pub async fn update_state(
        &self,
        config: &RunConfig,
        writes: Vec<(String, Value)>,
        as_node: Option<&str>,
    ) -> Result<RunConfig, LoopError> {
        let checkpointer = require_checkpointer(self.graph)?;
        let tuple = checkpointer.get_tuple(config).await?;
        let (checkpoint, step, current_config) = match tuple {
            Some(tuple) => (
                tuple.checkpoint,
                tuple.metadata.step + 1,
                tuple.config,
            ),
            None => {
                let mut base = config.clone();
                base.checkpoint_id = None;
                (crate::checkpoint::Checkpoint::empty(), 0, base)
            }
        };

        let mut channels = hydrate(self.graph, &checkpoint);
        let mut next = checkpoint.next_generation();
        next.pending_sends = checkpoint.pending_sends.clone();

        let mut grouped: Vec<(String, Vec<Value>)> = Vec::new();
        for (channel, value) in &writes {
            match grouped.iter_mut().find(|(name, _)| name == channel) {
                Some((_, values)) => values.push(value.clone()),
                None => grouped.push((channel.clone(), vec![value.clone()])),
            }
        }
        let new_versions = apply_writes_to_channels(
            &mut channels,
            &mut next,
            grouped,
            Some(checkpointer.as_ref()),
        )?;

        // Advance the acting node's seen-versions so the update does
        // not re-trigger it; downstream nodes still see fresh versions.
        let node_name = as_node.unwrap_or(START).to_string();
        if let Some(node) = self.graph.node(&node_name) {
            let seen = next.versions_seen.entry(node_name.clone()).or_default();
            for trigger in &node.spec.triggers {
                if let Some(version) = next.channel_versions.get(trigger) {
                    seen.insert(trigger.clone(), version.clone());
                }
            }
        }

        let mut summary = FxHashMap::default();
        summary.insert(
            node_name,
            Value::Object(writes.into_iter().map(|(k, v)| (k, v)).collect()),
        );
        let metadata = CheckpointMetadata {
            source: CheckpointSource::Update,
            step,
            writes: Some(summary),
            parents: config.checkpoint_map.clone(),
            extra: config.labels.clone(),
        };
        Ok(checkpointer
            .put(&current_config, next, metadata, new_versions)
            .await?)
    }

    async fn snapshot_from_tuple(
        &self,
        config: &RunConfig,
        tuple: CheckpointTuple,
        subgraphs: bool,
    ) -> Result<StateSnapshot, LoopError> {
        let channels = hydrate(self.graph, &tuple.checkpoint);
        let step = tuple.metadata.step + 1;
        let planned = plan_tasks(self.graph, &tuple.checkpoint, &channels, step);

        let mut next = Vec::new();
        let mut tasks = Vec::with_capacity(planned.len());
        for task in planned {
            if !next.contains(&task.name) {
                next.push(task.name.clone());
            }
            let mut snap = TaskSnapshot {
                id: task.id.clone(),
                name: task.name.clone(),
                path: task.path.clone(),
                error: None,
                interrupts: Vec::new(),
                state: None,
            };
            for pw in tuple.pending_writes.iter().filter(|pw| pw.task_id == task.id) {
                if pw.channel == ERROR {
                    snap.error = Some(
                        pw.value
                            .as_str()
                            .map(str::to_string)
                            .unwrap_or_else(|| pw.value.to_string()),
                    );
                } else if pw.channel == INTERRUPT {
                    if let Value::Array(payloads) = &pw.value {
                        snap.interrupts = payloads.clone();
                    }
                }
            }
            if subgraphs {
                if let Some(node) = self.graph.node(&task.name) {
                    if let Some(child) = &node.subgraph {
                        let child_graph =
                            effective_child(child, self.graph.checkpointer.clone());
                        let mut base = config.clone();
                        base.checkpoint_id = None;
                        let child_config = base.child(
                            &namespace_segment(&task.name, &task.id),
                            &tuple.checkpoint.id,
                        );
                        let child_state =
                            get_state_boxed(&child_graph, child_config).await?;
                        snap.state = Some(Box::new(child_state));
                    }
                }
            }
            tasks.push(snap);
        }

        Ok(StateSnapshot {
            values: public_values(&tuple.checkpoint.channel_values),
            next,
            tasks,
            config: tuple.config,
            created_at: Some(tuple.checkpoint.created_at),
            metadata: Some(tuple.metadata),
            parent_config: tuple.parent_config,
        })
    }
}

/// Type-erased recursive call; breaks the otherwise infinitely sized
/// future of `get_state → snapshot → get_state`.
fn get_state_boxed<'a>(
    graph: &'a CompiledGraph,
    config: RunConfig,
) -> BoxFuture<'a, Result<StateSnapshot, LoopError>> {
    Box::pin(async move {
        SuperstepRunner::new(graph)
            .get_state(&config, true)
            .await
    })
}
