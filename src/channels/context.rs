//! Loop-scoped external resource handle.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::ChannelError;

/// Factory producing the resource handle when the loop starts.
pub type ContextAcquire = Arc<dyn Fn() -> Value + Send + Sync>;

/// Hook invoked with the handle when the loop exits, on every path.
pub type ContextRelease = Arc<dyn Fn(Value) + Send + Sync>;

/// Scoped acquisition of an external resource.
///
/// The handle is acquired when the loop enters and released after the
/// loop's final checkpoint, whether the run succeeded, failed, or was
/// cancelled. Nodes see the handle read-only; the channel is never
/// checkpointed.
#[derive(Clone)]
pub struct ContextValue {
    pub(crate) acquire: ContextAcquire,
    pub(crate) release: Option<ContextRelease>,
    pub(crate) value: Option<Value>,
}

impl fmt::Debug for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextValue")
            .field("acquired", &self.value.is_some())
            .finish_non_exhaustive()
    }
}

impl ContextValue {
    pub(crate) fn new(acquire: ContextAcquire, release: Option<ContextRelease>) -> Self {
        Self {
            acquire,
            release,
            value: None,
        }
    }

    pub(crate) fn enter(&mut self) {
        if self.value.is_none() {
            self.value = Some((self.acquire)());
        }
    }

    pub(crate) fn exit(&mut self) {
        if let (Some(value), Some(release)) = (self.value.take(), self.release.as_ref()) {
            release(value);
        }
    }

    pub(crate) fn get(&self, name: &str) -> Result<Value, ChannelError> {
        self.value.clone().ok_or_else(|| ChannelError::Empty {
            channel: name.to_string(),
        })
    }
}
