//! Fluent construction of compiled graphs.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::warn;

use super::validate::{GraphError, validate};
use super::{BranchRouter, BranchSpec, CompiledGraph, CompiledNode, InterruptNodes};
use crate::channels::Channel;
use crate::checkpointers::Checkpointer;
use crate::node::{Node, NodeSpec};
use crate::runtimes::subgraph::SubgraphNode;
use crate::store::Store;
use crate::types::{END, START, branch_channel};

/// Builder assembling channels, nodes, edges, and runtime wiring into
/// a validated [`CompiledGraph`].
///
/// Channels referenced by node specs but never declared are
/// auto-declared as last-value slots; edge and branch trigger channels
/// are declared ephemeral by the compiler. See the module docs of
/// [`crate::graph`] for a complete example.
pub struct GraphBuilder {
    channels: FxHashMap<String, Channel>,
    nodes: Vec<CompiledNode>,
    edges: FxHashMap<String, Vec<String>>,
    branches: Vec<BranchSpec>,
    input_channels: Vec<String>,
    output_channels: Vec<String>,
    interrupt_before: InterruptNodes,
    interrupt_after: InterruptNodes,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    store: Option<Arc<dyn Store>>,
    max_concurrency: Option<usize>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: FxHashMap::default(),
            nodes: Vec::new(),
            edges: FxHashMap::default(),
            branches: Vec::new(),
            input_channels: Vec::new(),
            output_channels: Vec::new(),
            interrupt_before: InterruptNodes::None,
            interrupt_after: InterruptNodes::None,
            checkpointer: None,
            store: None,
            max_concurrency: None,
        }
    }

    /// Declare a channel explicitly (overrides auto-declaration).
    #[must_use]
    pub fn add_channel(mut self, name: impl Into<String>, channel: Channel) -> Self {
        self.channels.insert(name.into(), channel);
        self
    }

    /// Register a node: its immutable spec plus the executable body.
    #[must_use]
    pub fn add_node(mut self, spec: NodeSpec, body: impl Node + 'static) -> Self {
        self.nodes.push(CompiledNode {
            spec,
            body: Arc::new(body),
            subgraph: None,
        });
        self
    }

    /// Register a nested compiled graph as a node body.
    ///
    /// The child runs under a namespace derived from the parent task;
    /// its final output becomes the parent node's writes.
    #[must_use]
    pub fn add_subgraph(mut self, spec: NodeSpec, graph: CompiledGraph) -> Self {
        let graph = Arc::new(graph);
        self.nodes.push(CompiledNode {
            body: Arc::new(SubgraphNode::new(
                spec.name.clone(),
                spec.writes.clone(),
                Arc::clone(&graph),
            )),
            subgraph: Some(graph),
            spec,
        });
        self
    }

    /// Static edge: after `from` commits, schedule `to`.
    ///
    /// `from = START` makes `to` an entry node triggered by ingestion.
    #[must_use]
    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.entry(from.into()).or_default().push(to.into());
        self
    }

    /// Conditional edge: after `from` commits, `router` picks among the
    /// declared `targets` (each a node name, or [`END`]).
    #[must_use]
    pub fn add_branch<I, S>(
        mut self,
        from: impl Into<String>,
        targets: I,
        router: BranchRouter,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.branches.push(BranchSpec {
            from: from.into(),
            targets: targets.into_iter().map(Into::into).collect(),
            router,
        });
        self
    }

    /// Channel written by caller input.
    #[must_use]
    pub fn with_input(mut self, channel: impl Into<String>) -> Self {
        self.input_channels.push(channel.into());
        self
    }

    /// Channel projected into the final output.
    #[must_use]
    pub fn with_output(mut self, channel: impl Into<String>) -> Self {
        self.output_channels.push(channel.into());
        self
    }

    /// Pause before running any of `nodes` (`"*"` matches all).
    #[must_use]
    pub fn interrupt_before<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interrupt_before = Self::interrupt_set(nodes);
        self
    }

    /// Pause after any of `nodes` ran (`"*"` matches all).
    #[must_use]
    pub fn interrupt_after<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interrupt_after = Self::interrupt_set(nodes);
        self
    }

    fn interrupt_set<I, S>(nodes: I) -> InterruptNodes
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = nodes.into_iter().map(Into::into).collect();
        if names.iter().any(|n| n == "*") {
            InterruptNodes::All
        } else if names.is_empty() {
            InterruptNodes::None
        } else {
            InterruptNodes::Names(names)
        }
    }

    /// Attach checkpoint persistence.
    #[must_use]
    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    /// Attach a cross-thread store, injected into node contexts.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Cap the per-superstep worker pool.
    #[must_use]
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    /// Assemble, auto-declare channels, and validate.
    pub fn compile(self) -> Result<CompiledGraph, GraphError> {
        let Self {
            mut channels,
            mut nodes,
            edges,
            branches,
            input_channels,
            output_channels,
            interrupt_before,
            interrupt_after,
            checkpointer,
            store,
            max_concurrency,
        } = self;

        // Duplicate detection before any spec rewriting.
        let mut seen = FxHashSet::default();
        for node in &nodes {
            if !seen.insert(node.spec.name.clone()) {
                return Err(GraphError::DuplicateNode {
                    name: node.spec.name.clone(),
                });
            }
        }

        // The ingestion marker channel always exists.
        channels
            .entry(START.to_string())
            .or_insert_with(Channel::ephemeral);

        // Wire edges and branches into triggers on their targets.
        let mut extra_triggers: FxHashMap<String, Vec<String>> = FxHashMap::default();
        for (from, targets) in &edges {
            for to in targets {
                if from == START {
                    extra_triggers
                        .entry(to.clone())
                        .or_default()
                        .push(START.to_string());
                } else {
                    let trigger = branch_channel(to);
                    channels
                        .entry(trigger.clone())
                        .or_insert_with(Channel::ephemeral);
                    extra_triggers.entry(to.clone()).or_default().push(trigger);
                }
            }
        }
        for branch in &branches {
            for target in branch.targets.iter().filter(|t| *t != END) {
                let trigger = branch_channel(target);
                channels
                    .entry(trigger.clone())
                    .or_insert_with(Channel::ephemeral);
                extra_triggers
                    .entry(target.clone())
                    .or_default()
                    .push(trigger);
            }
        }
        for node in &mut nodes {
            if let Some(added) = extra_triggers.remove(&node.spec.name) {
                for trigger in added {
                    if !node.spec.triggers.contains(&trigger) {
                        node.spec.triggers.push(trigger);
                    }
                }
            }
        }
        if !extra_triggers.is_empty() {
            // Targets that never resolved to a node; validation below
            // reports them, this is just for operator visibility.
            warn!(targets = ?extra_triggers.keys().collect::<Vec<_>>(),
                  "edge targets without matching nodes");
        }

        // Auto-declare every remaining referenced channel as LastValue.
        for name in input_channels.iter().chain(output_channels.iter()) {
            channels
                .entry(name.clone())
                .or_insert_with(Channel::last_value);
        }
        for node in &nodes {
            for name in node
                .spec
                .triggers
                .iter()
                .chain(node.spec.inputs.iter())
                .chain(node.spec.writes.iter())
            {
                channels
                    .entry(name.clone())
                    .or_insert_with(Channel::last_value);
            }
        }

        let channel_names: FxHashSet<String> = channels.keys().cloned().collect();
        validate(&nodes, &edges, &branches, &input_channels, &channel_names)?;

        let node_index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.spec.name.clone(), i))
            .collect();
        let max_concurrency = max_concurrency.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });

        Ok(CompiledGraph {
            nodes,
            node_index,
            channels,
            input_channels,
            output_channels,
            edges,
            branches,
            interrupt_before,
            interrupt_after,
            checkpointer,
            store,
            max_concurrency,
        })
    }
}
