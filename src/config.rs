//! Invocation configuration: persistence lane, namespace breadcrumb,
//! and resume point for a run.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::id_generator::IdGenerator;

/// Default superstep bound before a run fails with
/// [`LoopError::RecursionExceeded`](crate::runtimes::LoopError::RecursionExceeded).
pub const DEFAULT_RECURSION_LIMIT: usize = 25;

/// Keyed configuration for one checkpointed invocation.
///
/// The engine recognizes the thread id (persistence lane), the
/// checkpoint namespace (subgraph nesting breadcrumb), an optional
/// checkpoint id (resume at a historical point: time-travel / fork),
/// the engine-managed checkpoint map (ancestor namespace → ancestor
/// checkpoint id), and the recursion limit. Any other labels the caller
/// wants to correlate runs by travel in `labels` and are merged into
/// each step's checkpoint metadata verbatim.
///
/// # Examples
///
/// ```rust
/// use stepweave::config::RunConfig;
///
/// let config = RunConfig::new("thread-1")
///     .with_recursion_limit(50)
///     .with_label("run_kind", serde_json::json!("nightly"));
/// assert_eq!(config.thread_id, "thread-1");
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Persistence lane. Required for any checkpointed invocation.
    pub thread_id: String,
    /// Namespace breadcrumb for subgraph nesting. Engine-managed; empty
    /// at the root.
    #[serde(default)]
    pub checkpoint_ns: String,
    /// Resume at this historical checkpoint instead of the latest one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
    /// Ancestor namespace → ancestor checkpoint id. Engine-managed;
    /// tells a subgraph which generation of its parent it belongs to.
    #[serde(default)]
    pub checkpoint_map: FxHashMap<String, String>,
    /// Maximum superstep count for one invocation.
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,
    /// Caller-supplied labels, forwarded into checkpoint metadata.
    #[serde(default)]
    pub labels: FxHashMap<String, Value>,
}

fn default_recursion_limit() -> usize {
    DEFAULT_RECURSION_LIMIT
}

impl RunConfig {
    /// Create a config for the given thread with engine defaults.
    #[must_use]
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            checkpoint_ns: String::new(),
            checkpoint_id: None,
            checkpoint_map: FxHashMap::default(),
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            labels: FxHashMap::default(),
        }
    }

    /// Create a config with a generated thread id, for one-off runs
    /// that still want checkpointing.
    #[must_use]
    pub fn ephemeral() -> Self {
        Self::new(IdGenerator::new().generate_thread_id())
    }

    /// Pin the run to a historical checkpoint (time-travel / fork).
    #[must_use]
    pub fn at_checkpoint(mut self, checkpoint_id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(checkpoint_id.into());
        self
    }

    /// Override the recursion limit.
    #[must_use]
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Attach a caller label, merged into checkpoint metadata.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: Value) -> Self {
        self.labels.insert(key.into(), value);
        self
    }

    /// Derive the config naming a freshly persisted checkpoint on the
    /// same thread and namespace.
    #[must_use]
    pub fn for_checkpoint(&self, checkpoint_id: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.checkpoint_id = Some(checkpoint_id.into());
        next
    }

    /// Derive a child config for a nested graph.
    ///
    /// Appends `ns_segment` to the namespace breadcrumb and records the
    /// parent's current checkpoint id in the checkpoint map so the
    /// child restarts at the right generation of its parent.
    #[must_use]
    pub fn child(&self, ns_segment: &str, parent_checkpoint_id: &str) -> Self {
        let checkpoint_ns = if self.checkpoint_ns.is_empty() {
            ns_segment.to_string()
        } else {
            format!("{}|{}", self.checkpoint_ns, ns_segment)
        };
        let mut checkpoint_map = self.checkpoint_map.clone();
        checkpoint_map.insert(self.checkpoint_ns.clone(), parent_checkpoint_id.to_string());
        Self {
            thread_id: self.thread_id.clone(),
            checkpoint_ns,
            checkpoint_id: None,
            checkpoint_map,
            recursion_limit: self.recursion_limit,
            labels: self.labels.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_config_extends_namespace_and_records_parent() {
        let parent = RunConfig::new("t1");
        let child = parent.child("sub:abc", "cp-42");
        assert_eq!(child.thread_id, "t1");
        assert_eq!(child.checkpoint_ns, "sub:abc");
        assert_eq!(child.checkpoint_map.get(""), Some(&"cp-42".to_string()));

        let grandchild = child.child("sub:def", "cp-77");
        assert_eq!(grandchild.checkpoint_ns, "sub:abc|sub:def");
        assert_eq!(
            grandchild.checkpoint_map.get("sub:abc"),
            Some(&"cp-77".to_string())
        );
    }

    #[test]
    fn for_checkpoint_pins_id_only() {
        let config = RunConfig::new("t1").with_recursion_limit(7);
        let pinned = config.for_checkpoint("cp-9");
        assert_eq!(pinned.checkpoint_id.as_deref(), Some("cp-9"));
        assert_eq!(pinned.recursion_limit, 7);
    }
}
