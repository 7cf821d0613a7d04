//! One scheduled execution of a node within one superstep.

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::node::Dispatch;
use crate::types::{ChannelVersion, TaskPath, task_id};

/// Transient record of one node execution.
///
/// Created at plan time, filled in by the executor, consumed by the
/// commit phase. The id is content-addressed (checkpoint id, node,
/// step, path), so re-planning the same step reproduces the same ids —
/// the property pending-write replay and forking rely on.
#[derive(Clone, Debug)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub path: TaskPath,
    /// Bound input value: raw for a single input channel, keyed object
    /// for several, the dispatch payload for push tasks.
    pub input: Value,
    /// Trigger channels that caused scheduling (empty for push tasks).
    pub triggers: Vec<String>,
    /// Realized writes, in emission order.
    pub writes: Vec<(String, Value)>,
    /// Dynamic tasks emitted by the body.
    pub dispatches: Vec<Dispatch>,
    /// Terminal error message, after retries were exhausted.
    pub error: Option<String>,
    /// Dynamic interrupt payloads raised by the body.
    pub interrupts: Vec<Value>,
    /// Versions of the trigger channels observed at plan time; commit
    /// advances the node's seen-versions to these.
    pub(crate) observed: FxHashMap<String, ChannelVersion>,
    /// True when the writes were replayed from persisted pending
    /// writes instead of executing the body.
    pub(crate) replayed: bool,
}

impl Task {
    /// Plan a trigger-driven task.
    #[must_use]
    pub fn pull(
        checkpoint_id: &str,
        name: &str,
        step: i64,
        trigger: &str,
        input: Value,
        triggers: Vec<String>,
        observed: FxHashMap<String, ChannelVersion>,
    ) -> Self {
        let path = TaskPath::Pull {
            channel: trigger.to_string(),
        };
        Self {
            id: task_id(checkpoint_id, name, step, &path),
            name: name.to_string(),
            path,
            input,
            triggers,
            writes: Vec::new(),
            dispatches: Vec::new(),
            error: None,
            interrupts: Vec::new(),
            observed,
            replayed: false,
        }
    }

    /// Plan a dynamically dispatched task.
    #[must_use]
    pub fn push(checkpoint_id: &str, step: i64, index: usize, dispatch: &Dispatch) -> Self {
        let path = TaskPath::Push { index };
        Self {
            id: task_id(checkpoint_id, &dispatch.node, step, &path),
            name: dispatch.node.clone(),
            path,
            input: dispatch.input.clone(),
            triggers: Vec::new(),
            writes: Vec::new(),
            dispatches: Vec::new(),
            error: None,
            interrupts: Vec::new(),
            observed: FxHashMap::default(),
            replayed: false,
        }
    }

    /// Task finished cleanly and its writes may be committed.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.interrupts.is_empty()
    }

    /// Task raised a dynamic interrupt.
    #[must_use]
    pub fn interrupted(&self) -> bool {
        !self.interrupts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pull_and_push_ids_differ_for_same_node() {
        let pull = Task::pull(
            "cp",
            "worker",
            2,
            "inbox",
            json!(1),
            vec!["inbox".into()],
            FxHashMap::default(),
        );
        let push = Task::push("cp", 2, 0, &Dispatch::new("worker", json!(1)));
        assert_ne!(pull.id, push.id);
        assert_eq!(pull.name, push.name);
    }

    #[test]
    fn replanning_reproduces_ids() {
        let a = Task::push("cp", 4, 1, &Dispatch::new("two", json!({"k": 1})));
        let b = Task::push("cp", 4, 1, &Dispatch::new("two", json!({"k": 2})));
        // Identity depends on position, not payload.
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn lifecycle_predicates() {
        let mut task = Task::push("cp", 0, 0, &Dispatch::new("n", json!(null)));
        assert!(task.succeeded());
        assert!(!task.interrupted());

        task.interrupts.push(json!("pause"));
        assert!(task.interrupted());
        assert!(!task.succeeded());

        task.interrupts.clear();
        task.error = Some("boom".into());
        assert!(!task.succeeded());
    }
}
