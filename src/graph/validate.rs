//! Compile-time structural validation.
//!
//! Every violation here fails `GraphBuilder::compile`; nothing in this
//! module runs after compilation, so a compiled graph can be executed
//! without structural checks.

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use super::{BranchSpec, CompiledNode};
use crate::types::{END, START, branch_channel};

/// Structural violations detected at compile time.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("graph has no nodes")]
    #[diagnostic(code(stepweave::graph::empty))]
    Empty,

    #[error("duplicate node name `{name}`")]
    #[diagnostic(code(stepweave::graph::duplicate_node))]
    DuplicateNode { name: String },

    #[error("node name `{name}` is reserved")]
    #[diagnostic(
        code(stepweave::graph::reserved_name),
        help("`__start__` and `__end__` are engine sentinels; pick another name.")
    )]
    ReservedName { name: String },

    #[error("{referenced_by} references unknown node `{name}`")]
    #[diagnostic(code(stepweave::graph::unknown_node))]
    UnknownNode {
        name: String,
        referenced_by: String,
    },

    #[error("node `{node}` is unreachable from the graph inputs")]
    #[diagnostic(
        code(stepweave::graph::unreachable),
        help(
            "Give `{node}` a trigger fed by an input channel, an edge, or another node's writes."
        )
    )]
    Unreachable { node: String },

    #[error("graph declares no input channels")]
    #[diagnostic(code(stepweave::graph::no_inputs))]
    NoInputs,
}

/// Validate the assembled graph structure.
///
/// `edges` maps node name (or [`START`]) to static edge targets;
/// `channel_names` is the full channel universe after auto-declaration.
pub(super) fn validate(
    nodes: &[CompiledNode],
    edges: &FxHashMap<String, Vec<String>>,
    branches: &[BranchSpec],
    input_channels: &[String],
    channel_names: &FxHashSet<String>,
) -> Result<(), GraphError> {
    if nodes.is_empty() {
        return Err(GraphError::Empty);
    }
    if input_channels.is_empty() {
        return Err(GraphError::NoInputs);
    }

    let node_names: FxHashSet<&str> = nodes.iter().map(|n| n.spec.name.as_str()).collect();

    for node in nodes {
        if node.spec.name == START || node.spec.name == END {
            return Err(GraphError::ReservedName {
                name: node.spec.name.clone(),
            });
        }
    }

    // Every node referenced by an edge must exist.
    for (from, targets) in edges {
        if from != START && !node_names.contains(from.as_str()) {
            return Err(GraphError::UnknownNode {
                name: from.clone(),
                referenced_by: "an edge".to_string(),
            });
        }
        for to in targets {
            if !node_names.contains(to.as_str()) {
                return Err(GraphError::UnknownNode {
                    name: to.clone(),
                    referenced_by: format!("edge from `{from}`"),
                });
            }
        }
    }

    // Every declared branch target must resolve to a real node or END.
    for branch in branches {
        if !node_names.contains(branch.from.as_str()) {
            return Err(GraphError::UnknownNode {
                name: branch.from.clone(),
                referenced_by: "a branch".to_string(),
            });
        }
        for target in &branch.targets {
            if target != END && !node_names.contains(target.as_str()) {
                return Err(GraphError::UnknownNode {
                    name: target.clone(),
                    referenced_by: format!("branch from `{}`", branch.from),
                });
            }
        }
    }

    // Reachability fixpoint over the trigger/write graph. Ingestion
    // makes the input channels and `__start__` live; a triggered node
    // is live when any of its triggers is, and its writes (plus the
    // branch channels of its edges and branches) become live in turn.
    // Trigger-less nodes are dispatch targets, reachable only
    // dynamically, and are exempt.
    let mut live_channels: FxHashSet<String> = input_channels.iter().cloned().collect();
    live_channels.insert(START.to_string());
    let mut live_nodes: FxHashSet<String> = FxHashSet::default();
    loop {
        let mut grew = false;
        for node in nodes {
            let name = &node.spec.name;
            if live_nodes.contains(name) || node.spec.triggers.is_empty() {
                continue;
            }
            if !node.spec.triggers.iter().any(|t| live_channels.contains(t)) {
                continue;
            }
            live_nodes.insert(name.clone());
            grew = true;
            for write in &node.spec.writes {
                live_channels.insert(write.clone());
            }
            if let Some(targets) = edges.get(name) {
                for target in targets {
                    live_channels.insert(branch_channel(target));
                }
            }
            for branch in branches.iter().filter(|b| &b.from == name) {
                for target in &branch.targets {
                    if target != END {
                        live_channels.insert(branch_channel(target));
                    }
                }
            }
        }
        if !grew {
            break;
        }
    }
    for node in nodes {
        if !node.spec.triggers.is_empty() && !live_nodes.contains(&node.spec.name) {
            return Err(GraphError::Unreachable {
                node: node.spec.name.clone(),
            });
        }
    }

    // Triggers and inputs must name channels that exist after
    // auto-declaration; this guards against typos in explicit specs.
    for node in nodes {
        for referenced in node.spec.triggers.iter().chain(node.spec.inputs.iter()) {
            debug_assert!(
                channel_names.contains(referenced),
                "channel `{referenced}` missing after auto-declaration"
            );
        }
    }

    Ok(())
}
