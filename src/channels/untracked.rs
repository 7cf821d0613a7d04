//! Process-scoped value excluded from checkpoints.

use serde_json::Value;

use super::ChannelError;

/// Holds an opaque value that never enters a checkpoint and is never
/// versioned. Read-only to nodes; populated at graph construction.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UntrackedValue {
    pub(crate) value: Option<Value>,
}

impl UntrackedValue {
    pub(crate) fn new(value: Value) -> Self {
        Self { value: Some(value) }
    }

    pub(crate) fn get(&self, name: &str) -> Result<Value, ChannelError> {
        self.value.clone().ok_or_else(|| ChannelError::Empty {
            channel: name.to_string(),
        })
    }
}
