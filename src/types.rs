//! Core identifiers shared across the engine.
//!
//! This module defines the reserved channel and node names, the version
//! token format used by channels, and the task path type that
//! distinguishes trigger-driven from dynamically dispatched work.
//!
//! # Version tokens
//!
//! Channel versions are opaque strings of the form
//! `"{sequence:032}.{hash:016x}"`. Zero-padding makes lexicographic
//! comparison agree with numeric ordering of the sequence, and the hash
//! suffix makes the successor of a version deterministic given the
//! committed content. Version assignment itself is centralized in the
//! [`Checkpointer`](crate::checkpointers::Checkpointer).

use std::fmt;
use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of the virtual entry node and of the channel that marks fresh
/// input. Edges from [`START`] give entry nodes their trigger.
pub const START: &str = "__start__";

/// Sentinel branch target naming graph termination. Never a real node.
pub const END: &str = "__end__";

/// Pending-write channel marker recording a task's terminal error.
pub const ERROR: &str = "__error__";

/// Pending-write channel marker recording a task's dynamic interrupt
/// payloads.
pub const INTERRUPT: &str = "__interrupt__";

/// Prefix of the ephemeral channels compiled from static edges and
/// branch routing. An edge `a -> b` is realized as a write to
/// `branch:to:b`.
pub const BRANCH_PREFIX: &str = "branch:to:";

/// Build the trigger channel name for an edge target.
#[must_use]
pub fn branch_channel(target: &str) -> String {
    format!("{BRANCH_PREFIX}{target}")
}

/// Opaque, totally ordered (per channel) version token.
pub type ChannelVersion = String;

/// Compose a version token from its sequence number and content hash.
#[must_use]
pub fn format_version(seq: u64, hash: u64) -> ChannelVersion {
    format!("{seq:032}.{hash:016x}")
}

/// Extract the sequence number from a version token.
///
/// Tokens produced by [`format_version`] always parse; a malformed
/// token is treated as sequence 0 so that any real version supersedes
/// it.
#[must_use]
pub fn version_seq(version: &str) -> u64 {
    version
        .split('.')
        .next()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0)
}

/// Hash a JSON value into a stable 64-bit fingerprint.
///
/// `FxHasher` is seed-free, so the fingerprint is reproducible across
/// process restarts; `serde_json` renders object keys in sorted order,
/// so logically equal values hash equally.
#[must_use]
pub fn stable_value_hash(value: &Value) -> u64 {
    let mut hasher = FxHasher::default();
    value.to_string().hash(&mut hasher);
    hasher.finish()
}

/// How a task came to be scheduled.
///
/// Pull tasks are planned because a trigger channel advanced past the
/// node's seen version; push tasks are planned from the checkpoint's
/// pending-sends list. The path participates in the task id, so the
/// same node scheduled both ways in one step yields distinct tasks.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPath {
    /// Scheduled because `channel` advanced.
    Pull { channel: String },
    /// Scheduled from position `index` of the pending-sends list.
    Push { index: usize },
}

impl fmt::Display for TaskPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskPath::Pull { channel } => write!(f, "pull:{channel}"),
            TaskPath::Push { index } => write!(f, "push:{index}"),
        }
    }
}

/// Derive the content-addressed id of a task.
///
/// The id is a stable hash of (checkpoint id, node name, step, path):
/// re-planning the same step from the same checkpoint reproduces the
/// same ids, which is what lets pending-write replay and fork detection
/// match tasks across process restarts.
#[must_use]
pub fn task_id(checkpoint_id: &str, node: &str, step: i64, path: &TaskPath) -> String {
    let mut hasher = FxHasher::default();
    checkpoint_id.hash(&mut hasher);
    node.hash(&mut hasher);
    step.hash(&mut hasher);
    path.to_string().hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn version_tokens_order_lexicographically() {
        let a = format_version(1, 0xdead);
        let b = format_version(2, 0x0001);
        let c = format_version(10, 0xbeef);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(version_seq(&c), 10);
    }

    #[test]
    fn malformed_version_parses_as_zero() {
        assert_eq!(version_seq("not-a-version"), 0);
    }

    #[test]
    fn task_ids_are_reproducible_and_path_sensitive() {
        let pull = TaskPath::Pull {
            channel: "inbox".into(),
        };
        let push = TaskPath::Push { index: 0 };
        let a = task_id("cp-1", "worker", 3, &pull);
        let b = task_id("cp-1", "worker", 3, &pull);
        let c = task_id("cp-1", "worker", 3, &push);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn value_hash_ignores_key_order() {
        let a = json!({"x": 1, "y": 2});
        let b = json!({"y": 2, "x": 1});
        assert_eq!(stable_value_hash(&a), stable_value_hash(&b));
    }
}
