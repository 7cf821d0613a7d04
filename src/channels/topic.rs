//! Multi-writer sequence cleared after one superstep.

use serde_json::Value;

use super::ChannelError;

/// Accepts any number of writes per superstep and exposes them, in
/// write order, to the following superstep only.
///
/// Readers see the sequence accumulated by the *previous* step; once
/// consumed the sequence is cleared, so a Topic never leaks values
/// across more than one superstep boundary.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Topic {
    pub(crate) values: Vec<Value>,
}

impl Topic {
    pub(crate) fn update(&mut self, writes: Vec<Value>) -> bool {
        if writes.is_empty() {
            return false;
        }
        self.values = writes;
        true
    }

    pub(crate) fn get(&self, name: &str) -> Result<Value, ChannelError> {
        if self.values.is_empty() {
            return Err(ChannelError::Empty {
                channel: name.to_string(),
            });
        }
        Ok(Value::Array(self.values.clone()))
    }

    /// Clear the sequence once the superstep's reads are done.
    pub(crate) fn consume(&mut self) -> bool {
        if self.values.is_empty() {
            return false;
        }
        self.values.clear();
        true
    }
}
