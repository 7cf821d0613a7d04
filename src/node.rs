//! Node declarations and the executable contract.
//!
//! A node is two things: an immutable [`NodeSpec`] describing *when* it
//! runs (trigger channels), *what* it reads (input channels), and
//! *where* it may write (write channels); and an opaque [`Node`] body
//! the engine invokes with the bound input. The engine never inspects
//! the body beyond its return value.
//!
//! # Writing a node
//!
//! ```rust
//! use stepweave::node::{Node, NodeContext, NodeError, NodeUpdate};
//! use async_trait::async_trait;
//! use serde_json::Value;
//!
//! struct AddOne;
//!
//! #[async_trait]
//! impl Node for AddOne {
//!     async fn run(&self, input: Value, _ctx: NodeContext) -> Result<NodeUpdate, NodeError> {
//!         let n = input.as_i64().ok_or(NodeError::MissingInput {
//!             what: "numeric input".into(),
//!         })?;
//!         Ok(NodeUpdate::new().write("inbox", Value::from(n + 1)))
//!     }
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::checkpointers::Checkpointer;
use crate::config::RunConfig;
use crate::retry::RetryPolicy;
use crate::runtimes::cancel::CancelToken;
use crate::runtimes::stream::StreamEmitter;
use crate::store::Store;

/// Immutable description of when a node runs and what it touches.
#[derive(Clone, Debug)]
pub struct NodeSpec {
    /// Unique node name within the graph.
    pub name: String,
    /// Channels whose version advance schedules this node. Non-empty
    /// for every real node (validated at compile time).
    pub triggers: Vec<String>,
    /// Channels read and bound to the node's input argument. A single
    /// channel binds the raw value; multiple channels bind a JSON
    /// object keyed by channel name.
    pub inputs: Vec<String>,
    /// The universe of channels the node may write to.
    pub writes: Vec<String>,
    /// Retry policy applied to each task of this node.
    pub retry: RetryPolicy,
    /// Free-form metadata, surfaced in state snapshots.
    pub metadata: FxHashMap<String, Value>,
}

impl NodeSpec {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            triggers: Vec::new(),
            inputs: Vec::new(),
            writes: Vec::new(),
            retry: RetryPolicy::none(),
            metadata: FxHashMap::default(),
        }
    }

    /// Add trigger channels.
    #[must_use]
    pub fn triggered_by<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.triggers.extend(channels.into_iter().map(Into::into));
        self
    }

    /// Add input channels.
    #[must_use]
    pub fn reads<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.extend(channels.into_iter().map(Into::into));
        self
    }

    /// Add write channels.
    #[must_use]
    pub fn writes<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.writes.extend(channels.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A dynamically scheduled task: run `node` next superstep with
/// `input`, bypassing the trigger machinery.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dispatch {
    pub node: String,
    pub input: Value,
}

impl Dispatch {
    #[must_use]
    pub fn new(node: impl Into<String>, input: Value) -> Self {
        Self {
            node: node.into(),
            input,
        }
    }
}

/// The write proposals a node body hands back to the engine.
///
/// Writes are applied atomically at the superstep's commit barrier;
/// dispatches become the next checkpoint's pending sends. Nodes never
/// mutate channels directly.
#[derive(Clone, Debug, Default)]
pub struct NodeUpdate {
    /// (channel, value) pairs, in emission order.
    pub writes: Vec<(String, Value)>,
    /// Dynamic tasks to schedule for the next superstep.
    pub dispatches: Vec<Dispatch>,
}

impl NodeUpdate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Propose a write to `channel`.
    #[must_use]
    pub fn write(mut self, channel: impl Into<String>, value: Value) -> Self {
        self.writes.push((channel.into(), value));
        self
    }

    /// Schedule a dynamic task for the next superstep.
    #[must_use]
    pub fn dispatch(mut self, node: impl Into<String>, input: Value) -> Self {
        self.dispatches.push(Dispatch::new(node, input));
        self
    }
}

/// Execution context handed to a node body for one task.
#[derive(Clone)]
pub struct NodeContext {
    /// Name of the executing node.
    pub node: String,
    /// Superstep index.
    pub step: i64,
    /// Content-addressed id of this task.
    pub task_id: String,
    /// Id of the checkpoint this superstep was planned from; subgraph
    /// bodies record it in their child config's checkpoint map.
    pub checkpoint_id: String,
    /// The run's configuration; subgraph bodies derive child configs
    /// from it.
    pub config: RunConfig,
    /// Cooperative cancellation signal for this invocation.
    pub cancel: CancelToken,
    pub(crate) emitter: StreamEmitter,
    pub(crate) store: Option<Arc<dyn Store>>,
    pub(crate) checkpointer: Option<Arc<dyn Checkpointer>>,
    pub(crate) subgraph_guard: Arc<AtomicBool>,
}

impl NodeContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        node: String,
        step: i64,
        task_id: String,
        checkpoint_id: String,
        config: RunConfig,
        cancel: CancelToken,
        emitter: StreamEmitter,
        store: Option<Arc<dyn Store>>,
        checkpointer: Option<Arc<dyn Checkpointer>>,
    ) -> Self {
        Self {
            node,
            step,
            task_id,
            checkpoint_id,
            config,
            cancel,
            emitter,
            store,
            checkpointer,
            subgraph_guard: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Emit an opaque payload on the `custom` stream mode.
    pub fn emit_custom(&self, payload: Value) {
        self.emitter.emit_custom(&self.node, payload);
    }

    /// Cross-thread store handle, if the graph was built with one.
    #[must_use]
    pub fn store(&self) -> Option<&Arc<dyn Store>> {
        self.store.as_ref()
    }

    /// Marks this task as having entered a subgraph. Returns `false`
    /// on the second entry within the same task, which is the
    /// `MultipleSubgraphs` condition.
    pub(crate) fn enter_subgraph(&self) -> bool {
        !self.subgraph_guard.swap(true, Ordering::SeqCst)
    }
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("node", &self.node)
            .field("step", &self.step)
            .field("task_id", &self.task_id)
            .finish_non_exhaustive()
    }
}

/// Core trait for executable node bodies.
///
/// Bodies receive a *copy* of their bound input and return write
/// proposals; they never see or mutate channel state directly.
#[async_trait]
pub trait Node: Send + Sync {
    async fn run(&self, input: Value, ctx: NodeContext) -> Result<NodeUpdate, NodeError>;
}

/// Adapt an async closure into a [`Node`].
///
/// ```rust
/// use stepweave::node::{node_fn, NodeUpdate};
/// use serde_json::Value;
///
/// let add_one = node_fn(|input: Value, _ctx| async move {
///     let n = input.as_i64().unwrap_or(0);
///     Ok(NodeUpdate::new().write("out", Value::from(n + 1)))
/// });
/// ```
pub fn node_fn<F, Fut>(f: F) -> FnNode<F>
where
    F: Fn(Value, NodeContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<NodeUpdate, NodeError>> + Send,
{
    FnNode(f)
}

/// Closure-backed [`Node`] implementation; see [`node_fn`].
pub struct FnNode<F>(F);

#[async_trait]
impl<F, Fut> Node for FnNode<F>
where
    F: Fn(Value, NodeContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<NodeUpdate, NodeError>> + Send,
{
    async fn run(&self, input: Value, ctx: NodeContext) -> Result<NodeUpdate, NodeError> {
        (self.0)(input, ctx).await
    }
}

/// Errors (and the interrupt control signal) a node body can raise.
///
/// `Interrupt` is not an error to the caller: the engine records the
/// payload on the task, discards the attempt's writes, and re-plans the
/// node on the next invocation.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    /// Expected input data was missing or malformed.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(stepweave::node::missing_input),
        help("Check that upstream nodes produced the required data: {what}.")
    )]
    MissingInput { what: String },

    /// Transient connectivity failure; retryable under the default
    /// transient policy.
    #[error("connection error: {message}")]
    #[diagnostic(code(stepweave::node::connection))]
    Connection { message: String },

    /// Input validation failed.
    #[error("validation failed: {0}")]
    #[diagnostic(code(stepweave::node::validation))]
    ValidationFailed(String),

    /// JSON (de)serialization error.
    #[error(transparent)]
    #[diagnostic(code(stepweave::node::serde_json))]
    Serde(#[from] serde_json::Error),

    /// Cooperative suspension request carrying an opaque payload.
    #[error("node requested interrupt")]
    #[diagnostic(code(stepweave::node::interrupt))]
    Interrupt { payload: Value },

    /// The same subgraph was entered twice within one node body while
    /// checkpointing was active.
    #[error("subgraph invoked twice in node `{node}`")]
    #[diagnostic(
        code(stepweave::node::multiple_subgraphs),
        help("A node body may run its subgraph at most once per task.")
    )]
    MultipleSubgraphs { node: String },

    /// Anything else the body considers fatal.
    #[error("{0}")]
    #[diagnostic(code(stepweave::node::other))]
    Other(String),
}

impl NodeError {
    /// Whether this error is worth retrying under a transient policy.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, NodeError::Connection { .. })
    }

    /// Shorthand for raising a dynamic interrupt.
    #[must_use]
    pub fn interrupt(payload: Value) -> Self {
        NodeError::Interrupt { payload }
    }
}
