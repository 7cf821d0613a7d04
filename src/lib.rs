//! # Stepweave: Superstep Graph Execution Engine
//!
//! Stepweave executes stateful computations expressed as directed
//! graphs of nodes communicating through typed, versioned channels.
//! Each iteration is a superstep: the engine plans the nodes whose
//! trigger channels advanced, runs them concurrently against a stable
//! snapshot, commits their writes atomically under per-channel
//! aggregation rules, and persists an immutable checkpoint — then
//! repeats until nothing is triggered or the recursion limit is hit.
//!
//! ## Core Concepts
//!
//! - **Channels**: Typed slots aggregating one superstep's writes into
//!   a value readable in the next ([`channels`])
//! - **Nodes**: Declarative trigger/read/write specs wrapping opaque
//!   async bodies ([`node`])
//! - **Checkpoints**: Immutable snapshots enabling resume, fork,
//!   time-travel, and crash recovery ([`checkpoint`],
//!   [`checkpointers`])
//! - **The loop**: Plan → dispatch → commit → checkpoint, with
//!   interrupt gates and retry policies ([`runtimes`])
//! - **Subgraphs**: Compiled graphs nested as node bodies under
//!   derived checkpoint namespaces ([`runtimes::subgraph`])
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::{Value, json};
//! use stepweave::checkpointers::MemoryCheckpointer;
//! use stepweave::config::RunConfig;
//! use stepweave::graph::GraphBuilder;
//! use stepweave::node::{NodeSpec, NodeUpdate, node_fn};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let graph = GraphBuilder::new()
//!     .add_node(
//!         NodeSpec::new("double")
//!             .triggered_by(["input"])
//!             .reads(["input"])
//!             .writes(["output"]),
//!         node_fn(|input: Value, _ctx| async move {
//!             let n = input.as_i64().unwrap_or(0);
//!             Ok(NodeUpdate::new().write("output", json!(n * 2)))
//!         }),
//!     )
//!     .with_input("input")
//!     .with_output("output")
//!     .with_checkpointer(Arc::new(MemoryCheckpointer::new()))
//!     .compile()?;
//!
//! let output = graph.invoke(Some(json!(21)), &RunConfig::new("t1")).await?;
//! assert_eq!(output, Some(json!(42)));
//! # Ok(())
//! # }
//! ```
//!
//! ## Resuming, interrupting, inspecting
//!
//! Runs are addressed by a thread id on the [`config::RunConfig`].
//! `invoke(None, config)` resumes a thread from its latest checkpoint;
//! pinning `checkpoint_id` resumes at a historical point (time-travel /
//! fork). Interrupt gates (`interrupt_before` / `interrupt_after`) and
//! dynamic interrupts from node bodies pause a run, returning `None`;
//! [`graph::CompiledGraph::get_state`] shows what would run next, and
//! [`graph::CompiledGraph::update_state`] edits state between runs.
//!
//! ## Module Guide
//!
//! - [`graph`] - Graph construction, validation, and the public API
//! - [`channels`] - Channel variants and their update semantics
//! - [`node`] - Node specs, bodies, contexts, and errors
//! - [`task`] - Scheduled executions and content-addressed ids
//! - [`retry`] - Retry policies with exponential backoff
//! - [`checkpoint`] / [`checkpointers`] - Snapshots and persistence
//! - [`runtimes`] - The superstep loop, streaming, cancellation
//! - [`store`] - Cross-thread key-value store contract
//! - [`reducers`] - Named reducers for aggregate channels
//! - [`telemetry`] - Tracing setup helpers

pub mod channels;
pub mod checkpoint;
pub mod checkpointers;
pub mod config;
pub mod graph;
pub mod node;
pub mod reducers;
pub mod retry;
pub mod runtimes;
pub mod store;
pub mod task;
pub mod telemetry;
pub mod types;
pub mod utils;
