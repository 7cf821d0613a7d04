//! Compiled workflow graphs and their invocation surface.
//!
//! A [`CompiledGraph`] is plain data: node specs in declaration order,
//! channel prototypes, static edges, branch routers, and interrupt
//! configuration, validated once at compile time. The executable
//! bodies are looked up by name at dispatch time; running a graph is
//! the job of the superstep loop in [`crate::runtimes`], which this
//! module's methods delegate to.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::{Value, json};
//! use stepweave::channels::Channel;
//! use stepweave::checkpointers::MemoryCheckpointer;
//! use stepweave::config::RunConfig;
//! use stepweave::graph::GraphBuilder;
//! use stepweave::node::{NodeSpec, NodeUpdate, node_fn};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let add_one = |target: &'static str| {
//!     node_fn(move |input: Value, _ctx| async move {
//!         Ok(NodeUpdate::new().write(target, json!(input.as_i64().unwrap_or(0) + 1)))
//!     })
//! };
//!
//! let graph = GraphBuilder::new()
//!     .add_node(
//!         NodeSpec::new("one").triggered_by(["input"]).reads(["input"]).writes(["inbox"]),
//!         add_one("inbox"),
//!     )
//!     .add_node(
//!         NodeSpec::new("two").triggered_by(["inbox"]).reads(["inbox"]).writes(["output"]),
//!         add_one("output"),
//!     )
//!     .with_input("input")
//!     .with_output("output")
//!     .with_checkpointer(Arc::new(MemoryCheckpointer::new()))
//!     .compile()?;
//!
//! let out = graph.invoke(Some(json!(2)), &RunConfig::new("t1")).await?;
//! assert_eq!(out, Some(json!(4)));
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod validate;

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;

pub use builder::GraphBuilder;
pub use validate::GraphError;

use crate::channels::Channel;
use crate::checkpointers::Checkpointer;
use crate::config::RunConfig;
use crate::node::{Node, NodeSpec};
use crate::runtimes::cancel::CancelToken;
use crate::runtimes::runner::SuperstepRunner;
use crate::runtimes::snapshot::StateSnapshot;
use crate::runtimes::stream::{EventStream, StreamMode};
use crate::runtimes::LoopError;
use crate::store::Store;

/// Router deciding branch targets from the originating node's writes
/// (keyed by channel). Returned names must be declared branch targets;
/// unknown names are skipped with a warning.
pub type BranchRouter = Arc<dyn Fn(&FxHashMap<String, Value>) -> Vec<String> + Send + Sync>;

/// A conditional edge: after `from` commits, `router` picks the next
/// nodes among `targets` (or [`END`](crate::types::END)).
#[derive(Clone)]
pub struct BranchSpec {
    pub from: String,
    pub targets: Vec<String>,
    pub router: BranchRouter,
}

impl fmt::Debug for BranchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BranchSpec")
            .field("from", &self.from)
            .field("targets", &self.targets)
            .finish_non_exhaustive()
    }
}

/// Which nodes an interrupt gate matches.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum InterruptNodes {
    /// Gate disabled.
    #[default]
    None,
    /// Matches every node (`"*"`).
    All,
    /// Matches the named nodes.
    Names(Vec<String>),
}

impl InterruptNodes {
    #[must_use]
    pub fn matches(&self, node: &str) -> bool {
        match self {
            InterruptNodes::None => false,
            InterruptNodes::All => true,
            InterruptNodes::Names(names) => names.iter().any(|n| n == node),
        }
    }
}

/// One node of a compiled graph: the immutable spec plus its body.
#[derive(Clone)]
pub struct CompiledNode {
    pub spec: NodeSpec,
    pub body: Arc<dyn Node>,
    /// Set when the body bridges a nested compiled graph; lets
    /// `get_state(subgraphs=true)` descend without downcasting.
    pub subgraph: Option<Arc<CompiledGraph>>,
}

impl fmt::Debug for CompiledNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledNode")
            .field("spec", &self.spec)
            .field("subgraph", &self.subgraph.is_some())
            .finish_non_exhaustive()
    }
}

/// Validated, executable graph description.
///
/// Cheap to clone: node bodies, channels prototypes, and nested graphs
/// are shared behind `Arc`s.
#[derive(Clone)]
pub struct CompiledGraph {
    pub(crate) nodes: Vec<CompiledNode>,
    pub(crate) node_index: FxHashMap<String, usize>,
    pub(crate) channels: FxHashMap<String, Channel>,
    pub(crate) input_channels: Vec<String>,
    pub(crate) output_channels: Vec<String>,
    pub(crate) edges: FxHashMap<String, Vec<String>>,
    pub(crate) branches: Vec<BranchSpec>,
    pub(crate) interrupt_before: InterruptNodes,
    pub(crate) interrupt_after: InterruptNodes,
    pub(crate) checkpointer: Option<Arc<dyn Checkpointer>>,
    pub(crate) store: Option<Arc<dyn Store>>,
    pub(crate) max_concurrency: usize,
}

impl fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("nodes", &self.nodes)
            .field("channels", &self.channels.keys().collect::<Vec<_>>())
            .field("input_channels", &self.input_channels)
            .field("output_channels", &self.output_channels)
            .field("interrupt_before", &self.interrupt_before)
            .field("interrupt_after", &self.interrupt_after)
            .field("checkpointer", &self.checkpointer.is_some())
            .field("max_concurrency", &self.max_concurrency)
            .finish_non_exhaustive()
    }
}

impl CompiledGraph {
    /// Look up a node by name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&CompiledNode> {
        self.node_index.get(name).map(|&i| &self.nodes[i])
    }

    /// Node specs in declaration order.
    pub fn node_specs(&self) -> impl Iterator<Item = &NodeSpec> {
        self.nodes.iter().map(|n| &n.spec)
    }

    /// The configured checkpointer, if any.
    #[must_use]
    pub fn checkpointer(&self) -> Option<&Arc<dyn Checkpointer>> {
        self.checkpointer.as_ref()
    }

    /// Run to termination and return the output channels' values.
    ///
    /// `input = None` resumes the thread named by `config` without new
    /// input (after an interrupt, an error, or for replay). Returns
    /// `None` when the run stopped at an interrupt gate instead of
    /// terminating.
    pub async fn invoke(
        &self,
        input: Option<Value>,
        config: &RunConfig,
    ) -> Result<Option<Value>, LoopError> {
        self.invoke_with_cancel(input, config, CancelToken::new())
            .await
    }

    /// [`invoke`](Self::invoke) with an external cancellation signal.
    pub async fn invoke_with_cancel(
        &self,
        input: Option<Value>,
        config: &RunConfig,
        cancel: CancelToken,
    ) -> Result<Option<Value>, LoopError> {
        SuperstepRunner::new(self)
            .run_to_completion(input, config, cancel)
            .await
    }

    /// Run the graph on a background task, returning a lazy, finite,
    /// non-restartable event stream projected through `modes`.
    #[must_use]
    pub fn stream(
        &self,
        input: Option<Value>,
        config: &RunConfig,
        modes: &[StreamMode],
    ) -> EventStream {
        SuperstepRunner::spawn_stream(self.clone(), input, config.clone(), modes)
    }

    /// Parallel invocations, one per input, under the same config.
    ///
    /// With a checkpointer attached, callers should ensure the inputs
    /// target distinct threads; the engine does not arbitrate
    /// concurrent writers of one thread.
    pub async fn batch(
        &self,
        inputs: Vec<Option<Value>>,
        config: &RunConfig,
    ) -> Vec<Result<Option<Value>, LoopError>> {
        let futures = inputs
            .into_iter()
            .map(|input| self.invoke(input, config))
            .collect::<Vec<_>>();
        futures_util::future::join_all(futures).await
    }

    /// Snapshot of the thread's current state (latest checkpoint, or
    /// the one named by `config.checkpoint_id`).
    pub async fn get_state(
        &self,
        config: &RunConfig,
        subgraphs: bool,
    ) -> Result<StateSnapshot, LoopError> {
        SuperstepRunner::new(self).get_state(config, subgraphs).await
    }

    /// Snapshots of the thread's history, newest first.
    pub async fn get_state_history(
        &self,
        config: &RunConfig,
        limit: Option<usize>,
        before: Option<String>,
    ) -> Result<Vec<StateSnapshot>, LoopError> {
        SuperstepRunner::new(self)
            .get_state_history(config, limit, before)
            .await
    }

    /// Externally mutate thread state: record `writes` as if produced
    /// by `as_node` and persist a new checkpoint descending from the
    /// one named by `config`. Returns the config naming the new
    /// checkpoint.
    pub async fn update_state(
        &self,
        config: &RunConfig,
        writes: Vec<(String, Value)>,
        as_node: Option<&str>,
    ) -> Result<RunConfig, LoopError> {
        SuperstepRunner::new(self)
            .update_state(config, writes, as_node)
            .await
    }
}
