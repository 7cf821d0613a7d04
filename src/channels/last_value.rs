//! Single-writer slot holding the most recent committed value.

use serde_json::Value;

use super::ChannelError;

/// Stores the last value written to it, persisting across supersteps.
///
/// At most one write per superstep is legal; a second writer in the
/// same step is a collision and fails the update with
/// [`ChannelError::InvalidUpdate`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LastValue {
    pub(crate) value: Option<Value>,
}

impl LastValue {
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
}
