//! Single-superstep slot.

use serde_json::Value;

use super::ChannelError;

/// Like a last-value slot, but the value does not survive into the
/// superstep after it has been consumed.
///
/// Edge trigger channels are ephemeral: the marker written by a parent
/// node is visible exactly once, to the planning phase that schedules
/// the child.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EphemeralValue {
    pub(crate) value: Option<Value>,
}

impl EphemeralValue {
    pub(crate) fn update(
        &mut self,
        name: &str,
        mut writes: Vec<Value>,
    ) -> Result<bool, ChannelError> {
        match writes.len() {
            0 => Ok(false),
            1 => {
                self.value = Some(writes.pop().expect("len checked"));
                Ok(true)
            }
            n => Err(ChannelError::InvalidUpdate {
                channel: name.to_string(),
                reason: format!("expected at most one write per superstep, got {n}"),
            }),
        }
    }

    pub(crate) fn get(&self, name: &str) -> Result<Value, ChannelError> {
        self.value.clone().ok_or_else(|| ChannelError::Empty {
            channel: name.to_string(),
        })
    }

    pub(crate) fn consume(&mut self) -> bool {
        self.value.take().is_some()
    }
}
