//! Typed event stream emitted by the superstep loop.
//!
//! The loop produces a heterogeneous record stream; callers select a
//! projection with one or more [`StreamMode`]s. `Debug` carries the
//! raw task / task-result / checkpoint / interrupt taxonomy; `Values`
//! and `Updates` are the per-step projections most callers want;
//! `Custom` forwards node-emitted payloads. A terminal
//! [`StreamEvent::End`] is always emitted.

use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::task::JoinHandle;

use super::LoopError;
use crate::checkpoint::CheckpointSource;

/// Projection selector for [`CompiledGraph::stream`](crate::graph::CompiledGraph::stream).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamMode {
    /// Full channel values after each committed superstep.
    Values,
    /// Per-task writes after each committed superstep.
    Updates,
    /// Raw task / task_result / checkpoint / interrupt records.
    Debug,
    /// Payloads emitted by node bodies via
    /// [`NodeContext::emit_custom`](crate::node::NodeContext::emit_custom).
    Custom,
}

/// Which projections are active for a stream.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct StreamModes {
    pub values: bool,
    pub updates: bool,
    pub debug: bool,
    pub custom: bool,
}

impl StreamModes {
    pub(crate) fn from_modes(modes: &[StreamMode]) -> Self {
        let mut set = Self::default();
        for mode in modes {
            match mode {
                StreamMode::Values => set.values = true,
                StreamMode::Updates => set.updates = true,
                StreamMode::Debug => set.debug = true,
                StreamMode::Custom => set.custom = true,
            }
        }
        set
    }
}

/// One record of the stream.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    /// A task was planned and is about to run (debug mode).
    Task {
        id: String,
        name: String,
        step: i64,
        input: Value,
        triggers: Vec<String>,
    },
    /// A task finished (debug mode). Exactly one per `Task` event.
    TaskResult {
        id: String,
        name: String,
        writes: Vec<(String, Value)>,
        error: Option<String>,
        interrupts: Vec<Value>,
    },
    /// A checkpoint was committed (debug mode).
    Checkpoint {
        step: i64,
        source: CheckpointSource,
        values: FxHashMap<String, Value>,
        next: Vec<String>,
    },
    /// A node raised a dynamic interrupt (debug mode).
    Interrupt { node: String, payload: Value },
    /// Channel values after a committed superstep (values mode).
    Values {
        step: i64,
        values: FxHashMap<String, Value>,
    },
    /// One node's writes at a committed superstep (updates mode).
    Updates {
        step: i64,
        node: String,
        writes: FxHashMap<String, Value>,
    },
    /// Node-emitted payload (custom mode).
    Custom { node: String, payload: Value },
    /// Terminal marker; always emitted exactly once.
    End {
        output: Option<Value>,
        error: Option<String>,
    },
}

/// Cloneable emitter handed to the loop and node contexts.
///
/// A disabled emitter (plain `invoke`) drops everything; an enabled
/// one forwards events matching the active modes into a flume channel.
#[derive(Clone)]
pub(crate) struct StreamEmitter {
    tx: Option<flume::Sender<StreamEvent>>,
    modes: StreamModes,
}

impl StreamEmitter {
    pub(crate) fn disabled() -> Self {
        Self {
            tx: None,
            modes: StreamModes::default(),
        }
    }

    pub(crate) fn new(tx: flume::Sender<StreamEvent>, modes: StreamModes) -> Self {
        Self { tx: Some(tx), modes }
    }

    fn send(&self, event: StreamEvent) {
        if let Some(tx) = &self.tx {
            // Receiver gone means the consumer stopped listening; the
            // loop keeps running for its side effects.
            let _ = tx.send(event);
        }
    }

    pub(crate) fn emit_debug(&self, event: StreamEvent) {
        if self.modes.debug {
            self.send(event);
        }
    }

    pub(crate) fn emit_values(&self, step: i64, values: FxHashMap<String, Value>) {
        if self.modes.values {
            self.send(StreamEvent::Values { step, values });
        }
    }

    pub(crate) fn emit_updates(&self, step: i64, node: &str, writes: FxHashMap<String, Value>) {
        if self.modes.updates {
            self.send(StreamEvent::Updates {
                step,
                node: node.to_string(),
                writes,
            });
        }
    }

    pub(crate) fn emit_custom(&self, node: &str, payload: Value) {
        if self.modes.custom {
            self.send(StreamEvent::Custom {
                node: node.to_string(),
                payload,
            });
        }
    }

    pub(crate) fn emit_end(&self, output: Option<Value>, error: Option<String>) {
        self.send(StreamEvent::End { output, error });
    }
}

/// Lazy, finite, non-restartable sequence of [`StreamEvent`]s.
///
/// Produced by [`CompiledGraph::stream`](crate::graph::CompiledGraph::stream);
/// the loop runs on a background task and the stream ends after the
/// terminal [`StreamEvent::End`].
pub struct EventStream {
    pub(crate) rx: flume::Receiver<StreamEvent>,
    pub(crate) handle: JoinHandle<Result<Option<Value>, LoopError>>,
}

impl EventStream {
    /// Next event, or `None` once the stream is exhausted.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.rx.recv_async().await.ok()
    }

    /// Drain the remaining events into a vector.
    pub async fn collect(mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }

    /// Wait for the underlying run and return its result, discarding
    /// any unread events.
    pub async fn join(self) -> Result<Option<Value>, LoopError> {
        drop(self.rx);
        self.handle.await?
    }
}
