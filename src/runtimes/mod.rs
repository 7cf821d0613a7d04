//! Superstep execution runtime.
//!
//! This module drives compiled graphs: it plans tasks from channel
//! version deltas, dispatches them in parallel, commits their writes
//! atomically, and persists a checkpoint per superstep. The public
//! entry points live on [`CompiledGraph`](crate::graph::CompiledGraph);
//! everything here is the machinery behind them.
//!
//! # Architecture
//!
//! - [`runner`] — the loop itself: ingestion, planning, halt checks,
//!   interrupt gates, commit, checkpoint emission
//! - [`executor`] — per-task execution under retry policies
//! - [`stream`] — the typed event stream and its mode projections
//! - [`snapshot`] — state inspection: `get_state`, history, updates
//! - [`subgraph`] — running a compiled graph as a node of another
//! - [`cancel`] — cooperative cancellation tokens

pub mod cancel;
pub mod executor;
pub mod runner;
pub mod snapshot;
pub mod stream;
pub mod subgraph;

use miette::Diagnostic;
use thiserror::Error;
use tokio::task::JoinError;

pub use cancel::CancelToken;
pub use runner::SuperstepRunner;
pub use snapshot::{StateSnapshot, TaskSnapshot};
pub use stream::{EventStream, StreamEvent, StreamMode};

use crate::channels::ChannelError;
use crate::checkpointers::CheckpointerError;

/// Errors terminating a superstep loop invocation.
///
/// Dynamic interrupts are *not* errors; an interrupted run returns
/// `Ok(None)` from `invoke`.
#[derive(Debug, Error, Diagnostic)]
pub enum LoopError {
    /// The planned superstep count exceeded the configured limit.
    #[error("recursion limit of {limit} supersteps exceeded")]
    #[diagnostic(
        code(stepweave::runtimes::recursion),
        help("Raise `recursion_limit` on the run config, or check for a trigger cycle.")
    )]
    RecursionExceeded { limit: usize },

    /// A committed write violated a channel's update semantics.
    #[error(transparent)]
    #[diagnostic(code(stepweave::runtimes::invalid_update))]
    InvalidUpdate(#[from] ChannelError),

    /// The same subgraph was entered twice in one parent node body.
    #[error("subgraph invoked twice in node `{node}`")]
    #[diagnostic(
        code(stepweave::runtimes::multiple_subgraphs),
        help("A node body may run its subgraph at most once per task.")
    )]
    MultipleSubgraphs { node: String },

    /// External cancellation propagated through the cancel token.
    #[error("invocation cancelled")]
    #[diagnostic(code(stepweave::runtimes::cancelled))]
    Cancelled,

    /// A node body failed after its retry policy was exhausted.
    #[error("node `{node}` failed: {source}")]
    #[diagnostic(code(stepweave::runtimes::node))]
    Node {
        node: String,
        #[source]
        source: crate::node::NodeError,
    },

    /// No input was supplied and the thread has no prior state.
    #[error("no input and no existing state for thread `{thread_id}`")]
    #[diagnostic(
        code(stepweave::runtimes::empty_input),
        help("Pass an input value, or resume a thread that has checkpoints.")
    )]
    EmptyInput { thread_id: String },

    /// The operation needs a checkpointer but the graph has none.
    #[error("operation requires a checkpointer")]
    #[diagnostic(
        code(stepweave::runtimes::no_checkpointer),
        help("Compile the graph with `.with_checkpointer(...)`.")
    )]
    NoCheckpointer,

    #[error(transparent)]
    #[diagnostic(code(stepweave::runtimes::checkpointer))]
    Checkpointer(#[from] CheckpointerError),

    #[error("task join error: {0}")]
    #[diagnostic(code(stepweave::runtimes::join))]
    Join(#[from] JoinError),
}
