//! Volatile in-process checkpointer.
//!
//! Keeps full history per (thread, namespace) in insertion order, which
//! for a single-writer thread is also generation order. Suitable for
//! tests and ephemeral runs; nothing survives the process.

use std::sync::RwLock;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::Value;

use super::{
    CheckpointQuery, CheckpointTuple, Checkpointer, CheckpointerError, PendingWrite, Result,
};
use crate::checkpoint::{Checkpoint, CheckpointMetadata};
use crate::config::RunConfig;
use crate::types::ChannelVersion;

#[derive(Clone, Debug)]
struct StoredCheckpoint {
    checkpoint: Checkpoint,
    metadata: CheckpointMetadata,
    parent_id: Option<String>,
}

/// In-memory [`Checkpointer`] storing full per-lane history.
#[derive(Default)]
pub struct MemoryCheckpointer {
    /// (thread, namespace) → checkpoints in insertion order.
    lanes: RwLock<FxHashMap<(String, String), Vec<StoredCheckpoint>>>,
    /// (thread, namespace, checkpoint id) → pending writes, append-only.
    writes: RwLock<FxHashMap<(String, String, String), Vec<PendingWrite>>>,
}

impl MemoryCheckpointer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lane_key(config: &RunConfig) -> (String, String) {
        (config.thread_id.clone(), config.checkpoint_ns.clone())
    }

    fn poisoned(e: impl std::fmt::Display) -> CheckpointerError {
        CheckpointerError::Backend {
            message: format!("lock poisoned: {e}"),
        }
    }

    fn tuple_for(&self, config: &RunConfig, stored: &StoredCheckpoint) -> Result<CheckpointTuple> {
        let writes = self.writes.read().map_err(Self::poisoned)?;
        let key = (
            config.thread_id.clone(),
            config.checkpoint_ns.clone(),
            stored.checkpoint.id.clone(),
        );
        Ok(CheckpointTuple {
            config: config.for_checkpoint(stored.checkpoint.id.clone()),
            checkpoint: stored.checkpoint.clone(),
            metadata: stored.metadata.clone(),
            parent_config: stored
                .parent_id
                .as_ref()
                .map(|id| config.for_checkpoint(id.clone())),
            pending_writes: writes.get(&key).cloned().unwrap_or_default(),
        })
    }
}

#[async_trait]
impl Checkpointer for MemoryCheckpointer {
    async fn get_tuple(&self, config: &RunConfig) -> Result<Option<CheckpointTuple>> {
        let lanes = self.lanes.read().map_err(Self::poisoned)?;
        let Some(lane) = lanes.get(&Self::lane_key(config)) else {
            return Ok(None);
        };
        let stored = match &config.checkpoint_id {
            Some(id) => lane.iter().find(|s| &s.checkpoint.id == id),
            None => lane.last(),
        };
        match stored {
            Some(stored) => Ok(Some(self.tuple_for(config, stored)?)),
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        config: &RunConfig,
        query: CheckpointQuery,
    ) -> Result<Vec<CheckpointTuple>> {
        let lanes = self.lanes.read().map_err(Self::poisoned)?;
        let Some(lane) = lanes.get(&Self::lane_key(config)) else {
            return Ok(Vec::new());
        };
        // `before` is exclusive: everything stored earlier than the
        // named checkpoint, newest-first.
        let cut = match &query.before {
            Some(before_id) => lane
                .iter()
                .position(|s| &s.checkpoint.id == before_id)
                .unwrap_or(lane.len()),
            None => lane.len(),
        };
        let mut tuples = Vec::new();
        for stored in lane[..cut].iter().rev() {
            if query.limit.is_some_and(|limit| tuples.len() >= limit) {
                break;
            }
            tuples.push(self.tuple_for(config, stored)?);
        }
        Ok(tuples)
    }

    async fn put(
        &self,
        config: &RunConfig,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        _new_versions: FxHashMap<String, ChannelVersion>,
    ) -> Result<RunConfig> {
        let mut lanes = self.lanes.write().map_err(Self::poisoned)?;
        let lane = lanes.entry(Self::lane_key(config)).or_default();
        let next_config = config.for_checkpoint(checkpoint.id.clone());
        let stored = StoredCheckpoint {
            parent_id: config.checkpoint_id.clone(),
            checkpoint,
            metadata,
        };
        // Idempotent re-put of the same generation replaces in place.
        match lane
            .iter_mut()
            .find(|s| s.checkpoint.id == stored.checkpoint.id)
        {
            Some(existing) => *existing = stored,
            None => lane.push(stored),
        }
        Ok(next_config)
    }

    async fn put_writes(
        &self,
        config: &RunConfig,
        writes: Vec<(String, Value)>,
        task_id: &str,
    ) -> Result<()> {
        let checkpoint_id =
            config
                .checkpoint_id
                .clone()
                .ok_or_else(|| CheckpointerError::Other {
                    message: "put_writes requires a config naming a checkpoint".to_string(),
                })?;
        let key = (
            config.thread_id.clone(),
            config.checkpoint_ns.clone(),
            checkpoint_id,
        );
        let mut map = self.writes.write().map_err(Self::poisoned)?;
        let entries = map.entry(key).or_default();
        entries.extend(writes.into_iter().map(|(channel, value)| PendingWrite {
            task_id: task_id.to_string(),
            channel,
            value,
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointSource;
    use serde_json::json;

    async fn put_chain(n: usize) -> (MemoryCheckpointer, RunConfig, Vec<String>) {
        let saver = MemoryCheckpointer::new();
        let mut config = RunConfig::new("t1");
        let mut ids = Vec::new();
        for step in 0..n {
            let checkpoint = Checkpoint::empty();
            ids.push(checkpoint.id.clone());
            config = saver
                .put(
                    &config,
                    checkpoint,
                    CheckpointMetadata::new(CheckpointSource::Loop, step as i64),
                    FxHashMap::default(),
                )
                .await
                .unwrap();
        }
        (saver, config, ids)
    }

    #[tokio::test]
    async fn latest_wins_without_checkpoint_id() {
        let (saver, config, ids) = put_chain(3).await;
        let mut latest_config = config.clone();
        latest_config.checkpoint_id = None;
        let tuple = saver.get_tuple(&latest_config).await.unwrap().unwrap();
        assert_eq!(tuple.checkpoint.id, ids[2]);
        assert_eq!(
            tuple.parent_config.unwrap().checkpoint_id.as_deref(),
            Some(ids[1].as_str())
        );

        // The `get` projection agrees with `get_tuple`.
        let checkpoint = saver.get(&latest_config).await.unwrap().unwrap();
        assert_eq!(checkpoint.id, ids[2]);
    }

    #[tokio::test]
    async fn list_is_newest_first_and_before_is_exclusive() {
        let (saver, config, ids) = put_chain(4).await;
        let all = saver
            .list(&config, CheckpointQuery::default())
            .await
            .unwrap();
        let listed: Vec<_> = all.iter().map(|t| t.checkpoint.id.clone()).collect();
        let mut expected = ids.clone();
        expected.reverse();
        assert_eq!(listed, expected);

        let older = saver
            .list(
                &config,
                CheckpointQuery {
                    before: Some(ids[2].clone()),
                    limit: None,
                },
            )
            .await
            .unwrap();
        let listed: Vec<_> = older.iter().map(|t| t.checkpoint.id.clone()).collect();
        assert_eq!(listed, vec![ids[1].clone(), ids[0].clone()]);

        let limited = saver
            .list(
                &config,
                CheckpointQuery {
                    before: None,
                    limit: Some(2),
                },
            )
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn pending_writes_attach_to_their_checkpoint() {
        let (saver, config, ids) = put_chain(2).await;
        let at_first = config.for_checkpoint(ids[0].clone());
        saver
            .put_writes(&at_first, vec![("out".into(), json!(1))], "task-a")
            .await
            .unwrap();

        let tuple = saver.get_tuple(&at_first).await.unwrap().unwrap();
        assert_eq!(tuple.pending_writes.len(), 1);
        assert_eq!(tuple.pending_writes[0].task_id, "task-a");

        let at_second = config.for_checkpoint(ids[1].clone());
        let tuple = saver.get_tuple(&at_second).await.unwrap().unwrap();
        assert!(tuple.pending_writes.is_empty());
    }

    #[tokio::test]
    async fn lanes_are_isolated_by_namespace() {
        let saver = MemoryCheckpointer::new();
        let root = RunConfig::new("t1");
        let child = root.child("sub:x", "cp-root");
        saver
            .put(
                &root,
                Checkpoint::empty(),
                CheckpointMetadata::new(CheckpointSource::Input, -1),
                FxHashMap::default(),
            )
            .await
            .unwrap();
        assert!(saver.get_tuple(&child).await.unwrap().is_none());
    }
}
