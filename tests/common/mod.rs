//! Shared fixtures for integration tests.
#![allow(dead_code)] // not every suite uses every fixture

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use serde_json::{Value, json};
use stepweave::checkpointers::{Checkpointer, MemoryCheckpointer};
use stepweave::graph::{CompiledGraph, GraphBuilder};
use stepweave::node::{Node, NodeSpec, NodeUpdate, node_fn};

/// Node body reading a number and writing `n + 1` to `target`.
pub fn add_one(target: &'static str) -> impl Node + 'static {
    node_fn(move |input: Value, _ctx| async move {
        let n = input.as_i64().unwrap_or(0);
        Ok(NodeUpdate::new().write(target, json!(n + 1)))
    })
}

/// The two-adder chain: `input --+1--> inbox --+1--> output`.
pub fn chain_graph(checkpointer: Option<Arc<dyn Checkpointer>>) -> GraphBuilder {
    let mut builder = GraphBuilder::new()
        .add_node(
            NodeSpec::new("one")
                .triggered_by(["input"])
                .reads(["input"])
                .writes(["inbox"]),
            add_one("inbox"),
        )
        .add_node(
            NodeSpec::new("two")
                .triggered_by(["inbox"])
                .reads(["inbox"])
                .writes(["output"]),
            add_one("output"),
        )
        .with_input("input")
        .with_output("output");
    if let Some(cp) = checkpointer {
        builder = builder.with_checkpointer(cp);
    }
    builder
}

/// Compiled chain with a fresh in-memory checkpointer.
pub fn checkpointed_chain() -> (CompiledGraph, Arc<MemoryCheckpointer>) {
    let saver = Arc::new(MemoryCheckpointer::new());
    let graph = chain_graph(Some(saver.clone() as Arc<dyn Checkpointer>))
        .compile()
        .expect("chain compiles");
    (graph, saver)
}

/// Node body that counts its executions.
pub fn counting_node(target: &'static str, calls: Arc<AtomicU32>) -> impl Node + 'static {
    node_fn(move |_input: Value, _ctx| {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(NodeUpdate::new().write(target, json!(true)))
        }
    })
}
