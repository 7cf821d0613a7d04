//! Immutable snapshots of channel state at superstep boundaries.
//!
//! A [`Checkpoint`] captures everything the loop needs to resume a
//! thread: channel values, per-channel versions, per-node seen
//! versions, and the dynamic tasks deferred to the next step. Its
//! companion [`CheckpointMetadata`] records provenance (where the
//! checkpoint came from, which step produced it, what was written) and
//! lineage across subgraph namespaces.
//!
//! Checkpoints are never mutated after creation; new generations get
//! fresh ids and link to their parent through the persistence layer.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::node::Dispatch;
use crate::types::ChannelVersion;
use crate::utils::id_generator::IdGenerator;

/// Serialized checkpoint schema version.
pub const CHECKPOINT_SCHEMA_VERSION: u32 = 1;

/// Immutable snapshot of all channel values and node seen-versions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Schema version, for forward-compatible persistence.
    pub v: u32,
    /// Generated identifier, unique per (thread, namespace).
    pub id: String,
    /// Wall-clock creation time.
    pub created_at: DateTime<Utc>,
    /// Serialized value of every tracked, non-empty channel.
    pub channel_values: FxHashMap<String, Value>,
    /// Monotonic version token of every tracked channel ever written.
    pub channel_versions: FxHashMap<String, ChannelVersion>,
    /// node → (channel → version): the greatest version of each trigger
    /// channel each node has observed. Planning compares these against
    /// `channel_versions` to decide what runs next.
    pub versions_seen: FxHashMap<String, FxHashMap<String, ChannelVersion>>,
    /// Dynamic tasks deferred to the next superstep, in emission order.
    pub pending_sends: Vec<Dispatch>,
}

impl Checkpoint {
    /// Create an empty first-generation checkpoint.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            v: CHECKPOINT_SCHEMA_VERSION,
            id: IdGenerator::new().generate_checkpoint_id(),
            created_at: Utc::now(),
            channel_values: FxHashMap::default(),
            channel_versions: FxHashMap::default(),
            versions_seen: FxHashMap::default(),
            pending_sends: Vec::new(),
        }
    }

    /// Derive the next generation: same state, fresh identity.
    ///
    /// The caller mutates the copy's maps during commit; the original
    /// stays untouched.
    #[must_use]
    pub fn next_generation(&self) -> Self {
        Self {
            v: CHECKPOINT_SCHEMA_VERSION,
            id: IdGenerator::new().generate_checkpoint_id(),
            created_at: Utc::now(),
            channel_values: self.channel_values.clone(),
            channel_versions: self.channel_versions.clone(),
            versions_seen: self.versions_seen.clone(),
            pending_sends: Vec::new(),
        }
    }

}

/// Where a checkpoint came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointSource {
    /// Ingested caller input (step −1).
    Input,
    /// Emitted by the superstep loop after a commit.
    Loop,
    /// Created by an external `update_state` call.
    Update,
    /// Created by resuming at a historical checkpoint.
    Fork,
}

/// Provenance and lineage attached to every persisted checkpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub source: CheckpointSource,
    /// −1 for the input record, 0..N for loop and update records.
    pub step: i64,
    /// node → writes summary for the step that produced this
    /// checkpoint; `None` when nothing ran (input / update records may
    /// carry a synthetic entry).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writes: Option<FxHashMap<String, Value>>,
    /// namespace → parent checkpoint id, one entry per ancestor graph.
    #[serde(default)]
    pub parents: FxHashMap<String, String>,
    /// Caller labels forwarded verbatim from the run config.
    #[serde(default)]
    pub extra: FxHashMap<String, Value>,
}

impl CheckpointMetadata {
    /// Metadata for a checkpoint with no writes.
    #[must_use]
    pub fn new(source: CheckpointSource, step: i64) -> Self {
        Self {
            source,
            step,
            writes: None,
            parents: FxHashMap::default(),
            extra: FxHashMap::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn next_generation_keeps_state_but_not_identity() {
        let mut first = Checkpoint::empty();
        first
            .channel_values
            .insert("inbox".into(), json!(3));
        first
            .channel_versions
            .insert("inbox".into(), "v1".into());

        let second = first.next_generation();
        assert_ne!(second.id, first.id);
        assert_eq!(second.channel_values, first.channel_values);
        assert!(second.pending_sends.is_empty());
    }

    #[test]
    fn metadata_serializes_source_as_snake_case() {
        let meta = CheckpointMetadata::new(CheckpointSource::Input, -1);
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["source"], json!("input"));
        assert_eq!(json["step"], json!(-1));
    }
}
