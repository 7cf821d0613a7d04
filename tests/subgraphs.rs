mod common;

use std::sync::Arc;

use serde_json::json;
use stepweave::checkpointers::{Checkpointer, MemoryCheckpointer};
use stepweave::config::RunConfig;
use stepweave::graph::{CompiledGraph, GraphBuilder};
use stepweave::node::NodeSpec;

use common::{add_one, chain_graph};

/// Child chain `input -> mid -> out` that pauses before its second
/// node.
fn interruptible_child() -> CompiledGraph {
    GraphBuilder::new()
        .add_node(
            NodeSpec::new("inner_1")
                .triggered_by(["input"])
                .reads(["input"])
                .writes(["mid"]),
            add_one("mid"),
        )
        .add_node(
            NodeSpec::new("inner_2")
                .triggered_by(["mid"])
                .reads(["mid"])
                .writes(["out"]),
            add_one("out"),
        )
        .with_input("input")
        .with_output("out")
        .interrupt_before(["inner_2"])
        .compile()
        .unwrap()
}

fn parent_with_child(saver: Arc<MemoryCheckpointer>) -> CompiledGraph {
    GraphBuilder::new()
        .add_subgraph(
            NodeSpec::new("child")
                .triggered_by(["input"])
                .reads(["input"])
                .writes(["output"]),
            interruptible_child(),
        )
        .with_input("input")
        .with_output("output")
        .with_checkpointer(saver)
        .compile()
        .unwrap()
}

#[tokio::test]
async fn child_interrupt_suspends_parent_and_resume_completes_both() {
    let saver = Arc::new(MemoryCheckpointer::new());
    let graph = parent_with_child(saver.clone());
    let config = RunConfig::new("t1");

    // The child pauses before `inner_2`; the parent surfaces the
    // interruption and still lists the subgraph node as next.
    let out = graph.invoke(Some(json!(1)), &config).await.unwrap();
    assert_eq!(out, None);
    let state = graph.get_state(&config, false).await.unwrap();
    assert_eq!(state.next, vec!["child".to_string()]);
    let child_task = &state.tasks[0];
    assert!(!child_task.interrupts.is_empty());

    // Resuming the parent with no input re-enters the child at its own
    // latest checkpoint: 1 -> 2 (before pause) -> 3.
    let out = graph.invoke(None, &config).await.unwrap();
    assert_eq!(out, Some(json!(3)));
}

#[tokio::test]
async fn get_state_with_subgraphs_embeds_child_state() {
    let saver = Arc::new(MemoryCheckpointer::new());
    let graph = parent_with_child(saver.clone());
    let config = RunConfig::new("t1");
    graph.invoke(Some(json!(1)), &config).await.unwrap();

    let state = graph.get_state(&config, true).await.unwrap();
    let child_task = state.tasks.iter().find(|t| t.name == "child").unwrap();
    let child_state = child_task.state.as_ref().expect("embedded child state");
    assert_eq!(child_state.next, vec!["inner_2".to_string()]);
    assert_eq!(child_state.values.get("mid"), Some(&json!(2)));
    assert!(
        child_state.config.checkpoint_ns.starts_with("child:"),
        "namespace {:?}",
        child_state.config.checkpoint_ns
    );
}

#[tokio::test]
async fn sibling_subgraphs_get_distinct_namespaces() {
    let saver = Arc::new(MemoryCheckpointer::new());
    let graph = GraphBuilder::new()
        .add_subgraph(
            NodeSpec::new("left")
                .triggered_by(["input"])
                .reads(["input"])
                .writes(["l_out"]),
            interruptible_child(),
        )
        .add_subgraph(
            NodeSpec::new("right")
                .triggered_by(["input"])
                .reads(["input"])
                .writes(["r_out"]),
            interruptible_child(),
        )
        .with_input("input")
        .with_checkpointer(saver.clone())
        .compile()
        .unwrap();
    let config = RunConfig::new("t1");

    // Both children pause; the parent pauses with both tasks pending.
    let out = graph.invoke(Some(json!(1)), &config).await.unwrap();
    assert_eq!(out, None);

    let state = graph.get_state(&config, true).await.unwrap();
    let namespaces: Vec<String> = state
        .tasks
        .iter()
        .map(|t| {
            t.state
                .as_ref()
                .expect("embedded child state")
                .config
                .checkpoint_ns
                .clone()
        })
        .collect();
    assert_eq!(namespaces.len(), 2);
    assert_ne!(namespaces[0], namespaces[1]);
}

#[tokio::test]
async fn completed_subgraph_runs_end_to_end() {
    // A child without interrupts behaves like a plain node.
    let saver = Arc::new(MemoryCheckpointer::new());
    let child = chain_graph(None).compile().unwrap();
    let graph = GraphBuilder::new()
        .add_subgraph(
            NodeSpec::new("child")
                .triggered_by(["parent_in"])
                .reads(["parent_in"])
                .writes(["parent_out"]),
            child,
        )
        .with_input("parent_in")
        .with_output("parent_out")
        .with_checkpointer(saver.clone() as Arc<dyn Checkpointer>)
        .compile()
        .unwrap();
    let out = graph
        .invoke(Some(json!(2)), &RunConfig::new("t1"))
        .await
        .unwrap();
    assert_eq!(out, Some(json!(4)));
}
