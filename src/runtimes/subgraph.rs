//! Running a compiled graph as a node of another graph.
//!
//! There is no separate execution path for nested graphs: the child is
//! literally a compiled graph stored as a node body, re-entering the
//! same superstep loop under a derived checkpoint namespace. This
//! module only supplies the namespace plumbing and the output/interrupt
//! bridging.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::graph::CompiledGraph;
use crate::node::{Node, NodeContext, NodeError, NodeUpdate};

/// Namespace segment for one subgraph instantiation.
///
/// Derived from the parent task id, which is itself content-addressed,
/// so the segment is stable across retries, resumes, and forks — and
/// unique per parent task within a superstep.
#[must_use]
pub(crate) fn namespace_segment(node: &str, task_id: &str) -> String {
    format!("{node}:{task_id}")
}

/// Give a child graph the parent's checkpointer when it has none of
/// its own, so its checkpoints land in the same store under the child
/// namespace.
pub(crate) fn effective_child(
    child: &Arc<CompiledGraph>,
    parent_checkpointer: Option<Arc<dyn crate::checkpointers::Checkpointer>>,
) -> CompiledGraph {
    let mut graph = (**child).clone();
    if graph.checkpointer.is_none() {
        graph.checkpointer = parent_checkpointer;
    }
    graph
}

/// Node body that delegates execution to a nested compiled graph.
pub struct SubgraphNode {
    name: String,
    writes: Vec<String>,
    graph: Arc<CompiledGraph>,
}

impl SubgraphNode {
    #[must_use]
    pub(crate) fn new(name: String, writes: Vec<String>, graph: Arc<CompiledGraph>) -> Self {
        Self { name, writes, graph }
    }

    /// Map the child's final output onto the parent node's write set.
    fn map_output(&self, value: Value) -> NodeUpdate {
        let mut update = NodeUpdate::new();
        match self.writes.as_slice() {
            [] => {}
            [single] => update = update.write(single.clone(), value),
            many => match value {
                Value::Object(map) => {
                    for name in many {
                        if let Some(v) = map.get(name) {
                            update = update.write(name.clone(), v.clone());
                        }
                    }
                }
                other => {
                    for name in many {
                        update = update.write(name.clone(), other.clone());
                    }
                }
            },
        }
        update
    }
}

#[async_trait]
impl Node for SubgraphNode {
    async fn run(&self, input: Value, ctx: NodeContext) -> Result<NodeUpdate, NodeError> {
        let checkpointing = self.graph.checkpointer.is_some() || ctx.checkpointer.is_some();
        if checkpointing && !ctx.enter_subgraph() {
            // A second entry would race on the child namespace.
            return Err(NodeError::MultipleSubgraphs {
                node: ctx.node.clone(),
            });
        }

        let graph = effective_child(&self.graph, ctx.checkpointer.clone());
        let child_config = ctx
            .config
            .child(&namespace_segment(&self.name, &ctx.task_id), &ctx.checkpoint_id);

        // Resume the child at its own latest checkpoint when it is
        // mid-run; otherwise start (or fork-replay) it with the bound
        // input.
        let child_input = if graph.checkpointer.is_some() {
            let snapshot = graph
                .get_state(&child_config, false)
                .await
                .map_err(|e| NodeError::Other(e.to_string()))?;
            if snapshot.next.is_empty() {
                Some(input)
            } else {
                debug!(subgraph = %self.name, "resuming child at its latest checkpoint");
                None
            }
        } else {
            Some(input)
        };

        let output = graph
            .invoke_with_cancel(child_input, &child_config, ctx.cancel.clone())
            .await
            .map_err(|e| NodeError::Other(e.to_string()))?;

        match output {
            // The child stopped at one of its interrupt gates; the
            // parent task records the interruption and re-enters the
            // child on resume.
            None => Err(NodeError::interrupt(json!({ "subgraph": self.name }))),
            Some(value) => Ok(self.map_output(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpointers::MemoryCheckpointer;
    use crate::config::RunConfig;
    use crate::graph::GraphBuilder;
    use crate::node::{NodeSpec, node_fn};
    use crate::runtimes::cancel::CancelToken;
    use crate::runtimes::stream::StreamEmitter;
    use serde_json::json;

    fn child_graph() -> CompiledGraph {
        GraphBuilder::new()
            .add_node(
                NodeSpec::new("inner")
                    .triggered_by(["input"])
                    .reads(["input"])
                    .writes(["out"]),
                node_fn(|input: Value, _ctx| async move {
                    Ok(NodeUpdate::new().write("out", input))
                }),
            )
            .with_input("input")
            .with_output("out")
            .compile()
            .unwrap()
    }

    fn parent_ctx(saver: Arc<MemoryCheckpointer>) -> NodeContext {
        NodeContext::new(
            "child".into(),
            0,
            "task-1".into(),
            "cp-1".into(),
            RunConfig::new("t"),
            CancelToken::new(),
            StreamEmitter::disabled(),
            None,
            Some(saver),
        )
    }

    #[tokio::test]
    async fn second_entry_in_one_task_is_rejected() {
        let node = SubgraphNode::new(
            "child".into(),
            vec!["out".into()],
            Arc::new(child_graph()),
        );
        let ctx = parent_ctx(Arc::new(MemoryCheckpointer::new()));

        let first = node.run(json!(1), ctx.clone()).await.unwrap();
        assert_eq!(first.writes, vec![("out".to_string(), json!(1))]);

        let second = node.run(json!(1), ctx).await;
        assert!(matches!(
            second,
            Err(NodeError::MultipleSubgraphs { .. })
        ));
    }

    #[tokio::test]
    async fn guard_is_inactive_without_checkpointing() {
        let node = SubgraphNode::new(
            "child".into(),
            vec!["out".into()],
            Arc::new(child_graph()),
        );
        let ctx = NodeContext::new(
            "child".into(),
            0,
            "task-1".into(),
            "cp-1".into(),
            RunConfig::new("t"),
            CancelToken::new(),
            StreamEmitter::disabled(),
            None,
            None,
        );
        assert!(node.run(json!(1), ctx.clone()).await.is_ok());
        assert!(node.run(json!(2), ctx).await.is_ok());
    }

    #[test]
    fn namespace_segments_are_task_scoped() {
        assert_eq!(namespace_segment("child", "abc"), "child:abc");
        assert_ne!(
            namespace_segment("child", "abc"),
            namespace_segment("child", "def")
        );
    }
}
