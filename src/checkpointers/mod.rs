//! Pluggable checkpoint persistence.
//!
//! A [`Checkpointer`] stores [`Checkpoint`]s keyed by (thread,
//! namespace, id) and the task-scoped pending writes that make crashed
//! supersteps recoverable. The loop is the only writer per thread;
//! backends must preserve total ordering per (thread, namespace) and
//! atomicity of a single `put` with respect to `get_tuple`.
//!
//! Two implementations ship with the crate:
//! - [`MemoryCheckpointer`] — volatile, for tests and ephemeral runs;
//! - `SqliteCheckpointer` — durable, behind the `sqlite` feature.
//!
//! Concurrent invocations of the same thread are not arbitrated by the
//! engine; a backend may refuse or serialize them.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use memory::MemoryCheckpointer;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCheckpointer;

use crate::checkpoint::{Checkpoint, CheckpointMetadata};
use crate::config::RunConfig;
use crate::types::{ChannelVersion, format_version, stable_value_hash, version_seq};

/// Errors from checkpointer operations.
#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointerError {
    /// The config named a checkpoint that does not exist.
    #[error("checkpoint not found: thread `{thread_id}`, id {checkpoint_id:?}")]
    #[diagnostic(
        code(stepweave::checkpointer::not_found),
        help("Verify the thread id and checkpoint id against `list`.")
    )]
    NotFound {
        thread_id: String,
        checkpoint_id: Option<String>,
    },

    /// Backend storage error (database, filesystem, etc.).
    #[error("backend error: {message}")]
    #[diagnostic(
        code(stepweave::checkpointer::backend),
        help("Check backend connectivity and permissions; backend message: {message}.")
    )]
    Backend { message: String },

    /// Serialization or other unexpected failure.
    #[error("checkpointer error: {message}")]
    #[diagnostic(code(stepweave::checkpointer::other))]
    Other { message: String },
}

pub type Result<T> = std::result::Result<T, CheckpointerError>;

/// One task-scoped write persisted before the superstep commit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub task_id: String,
    pub channel: String,
    pub value: Value,
}

/// Query options for [`Checkpointer::list`].
#[derive(Clone, Debug, Default)]
pub struct CheckpointQuery {
    /// Return only checkpoints strictly older than this id (exclusive).
    pub before: Option<String>,
    /// Maximum number of results.
    pub limit: Option<usize>,
}

/// A checkpoint together with its provenance, lineage, and any pending
/// writes recorded against it.
#[derive(Clone, Debug)]
pub struct CheckpointTuple {
    /// Fully qualified config naming this checkpoint.
    pub config: RunConfig,
    pub checkpoint: Checkpoint,
    pub metadata: CheckpointMetadata,
    /// Config of the immediate predecessor, if any.
    pub parent_config: Option<RunConfig>,
    /// Task writes persisted against this checkpoint, in append order.
    pub pending_writes: Vec<PendingWrite>,
}

/// Trait for persistent storage and retrieval of checkpoints.
///
/// For one (thread, namespace), `list` returns checkpoints
/// newest-first, `list(before=C)` returns strictly older than `C`, and
/// `put_writes` is append-only. Backend errors surface unchanged to
/// the caller.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Fetch the checkpoint named by `config.checkpoint_id`, or the
    /// latest for the (thread, namespace) when unset.
    async fn get_tuple(&self, config: &RunConfig) -> Result<Option<CheckpointTuple>>;

    /// List checkpoints for the config's (thread, namespace),
    /// newest-first.
    async fn list(&self, config: &RunConfig, query: CheckpointQuery)
    -> Result<Vec<CheckpointTuple>>;

    /// Persist a checkpoint and return the config naming it.
    ///
    /// `parent_config` identifies the checkpoint this one descends
    /// from; `new_versions` lists the channels whose version the
    /// producing step advanced (backends may index on it).
    async fn put(
        &self,
        config: &RunConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        new_versions: FxHashMap<String, ChannelVersion>,
    ) -> Result<RunConfig>;

    /// Record one task's writes against the checkpoint named by
    /// `config`, keyed by task id. Called before the commit so a crash
    /// between recording and commit is recoverable.
    async fn put_writes(
        &self,
        config: &RunConfig,
        writes: Vec<(String, Value)>,
        task_id: &str,
    ) -> Result<()>;

    /// Convenience projection of [`Checkpointer::get_tuple`].
    async fn get(&self, config: &RunConfig) -> Result<Option<Checkpoint>> {
        Ok(self.get_tuple(config).await?.map(|t| t.checkpoint))
    }

    /// Successor version token for a channel, derived from the current
    /// token and the committed content.
    ///
    /// Tokens are totally ordered per channel and deterministic given
    /// the update content; see [`crate::types::format_version`].
    fn next_version(&self, current: Option<&ChannelVersion>, value: &Value) -> ChannelVersion {
        let seq = current.map(|v| version_seq(v)).unwrap_or(0) + 1;
        format_version(seq, stable_value_hash(value))
    }
}
