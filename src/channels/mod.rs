//! Channel-based state storage and versioning.
//!
//! Channels are the typed slots nodes communicate through. Each channel
//! aggregates the writes of one superstep into a value readable in the
//! next, under semantics chosen by its variant. The set of variants is
//! closed, so [`Channel`] is a sum type rather than an open trait:
//!
//! | Variant | Writes per step | Lifetime |
//! |---|---|---|
//! | [`LastValue`] | at most one | persists |
//! | [`Topic`] | any number, ordered | one superstep |
//! | [`BinaryOperatorAggregate`] | any number, folded | persists |
//! | [`EphemeralValue`] | at most one | one superstep |
//! | [`UntrackedValue`] | none (read-only) | process |
//! | [`ContextValue`] | none (read-only) | loop |
//!
//! Version bookkeeping lives outside the channel: the loop asks the
//! [`Checkpointer`](crate::checkpointers::Checkpointer) for the
//! successor token of every channel whose `update` reported a change.
//!
//! # Examples
//!
//! ```rust
//! use stepweave::channels::Channel;
//! use serde_json::json;
//!
//! let mut inbox = Channel::last_value();
//! assert!(inbox.update("inbox", vec![json!(3)]).unwrap());
//! assert_eq!(inbox.get("inbox").unwrap(), json!(3));
//!
//! // Two writers in one superstep collide.
//! let err = inbox.update("inbox", vec![json!(1), json!(2)]).unwrap_err();
//! assert!(err.to_string().contains("inbox"));
//! ```

pub mod aggregate;
pub mod context;
pub mod ephemeral;
pub mod last_value;
pub mod topic;
pub mod untracked;

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

pub use aggregate::BinaryOperatorAggregate;
pub use context::{ContextAcquire, ContextRelease, ContextValue};
pub use ephemeral::EphemeralValue;
pub use last_value::LastValue;
pub use topic::Topic;
pub use untracked::UntrackedValue;

use crate::reducers::ReducerFn;

/// Errors raised by channel reads and updates.
#[derive(Debug, Error, Diagnostic)]
pub enum ChannelError {
    /// A batch of writes violated the channel's write semantics.
    #[error("invalid update on channel `{channel}`: {reason}")]
    #[diagnostic(
        code(stepweave::channels::invalid_update),
        help("Check how many nodes write to `{channel}` in the same superstep.")
    )]
    InvalidUpdate { channel: String, reason: String },

    /// The channel has no readable value yet.
    #[error("channel `{channel}` is empty")]
    #[diagnostic(code(stepweave::channels::empty))]
    Empty { channel: String },
}

/// A typed slot communicating values between nodes across supersteps.
///
/// Channel instances held by a compiled graph act as prototypes; the
/// loop hydrates a fresh working copy per invocation via
/// [`Channel::from_checkpoint`].
#[derive(Clone, Debug)]
pub enum Channel {
    LastValue(LastValue),
    Topic(Topic),
    Aggregate(BinaryOperatorAggregate),
    Ephemeral(EphemeralValue),
    Untracked(UntrackedValue),
    Context(ContextValue),
}

impl Channel {
    /// Single-writer slot persisting across supersteps.
    #[must_use]
    pub fn last_value() -> Self {
        Channel::LastValue(LastValue::default())
    }

    /// Multi-writer sequence visible for exactly one superstep.
    #[must_use]
    pub fn topic() -> Self {
        Channel::Topic(Topic::default())
    }

    /// Fold-on-write accumulator over an associative reducer.
    #[must_use]
    pub fn aggregate(reducer: ReducerFn, identity: Value) -> Self {
        Channel::Aggregate(BinaryOperatorAggregate::new(reducer, identity))
    }

    /// Single-writer slot cleared after consumption.
    #[must_use]
    pub fn ephemeral() -> Self {
        Channel::Ephemeral(EphemeralValue::default())
    }

    /// Process-scoped read-only value, excluded from checkpoints.
    #[must_use]
    pub fn untracked(value: Value) -> Self {
        Channel::Untracked(UntrackedValue::new(value))
    }

    /// Loop-scoped resource handle with guaranteed release.
    #[must_use]
    pub fn context(acquire: ContextAcquire, release: Option<ContextRelease>) -> Self {
        Channel::Context(ContextValue::new(acquire, release))
    }

    /// Apply one superstep's writes atomically.
    ///
    /// Returns `true` iff the channel's value changed, which is the
    /// loop's cue to assign a new version.
    pub fn update(&mut self, name: &str, writes: Vec<Value>) -> Result<bool, ChannelError> {
        match self {
            Channel::LastValue(c) => c.update(name, writes),
            Channel::Topic(c) => Ok(c.update(writes)),
            Channel::Aggregate(c) => Ok(c.update(writes)),
            Channel::Ephemeral(c) => c.update(name, writes),
            Channel::Untracked(_) | Channel::Context(_) => {
                if writes.is_empty() {
                    Ok(false)
                } else {
                    Err(ChannelError::InvalidUpdate {
                        channel: name.to_string(),
                        reason: "channel is read-only to nodes".to_string(),
                    })
                }
            }
        }
    }

    /// Produce the current readable value.
    pub fn get(&self, name: &str) -> Result<Value, ChannelError> {
        match self {
            Channel::LastValue(c) => c.get(name),
            Channel::Topic(c) => c.get(name),
            Channel::Aggregate(c) => c.get(name),
            Channel::Ephemeral(c) => c.get(name),
            Channel::Untracked(c) => c.get(name),
            Channel::Context(c) => c.get(name),
        }
    }

    /// Serializable representation of the current value, or `None` for
    /// variants excluded from checkpoints (and for empty slots).
    #[must_use]
    pub fn checkpoint(&self) -> Option<Value> {
        match self {
            Channel::LastValue(c) => c.value.clone(),
            Channel::Topic(c) => {
                if c.values.is_empty() {
                    None
                } else {
                    Some(Value::Array(c.values.clone()))
                }
            }
            Channel::Aggregate(c) => c.value.clone(),
            Channel::Ephemeral(c) => c.value.clone(),
            Channel::Untracked(_) | Channel::Context(_) => None,
        }
    }

    /// Hydrate a working copy of this prototype from a snapshot value.
    #[must_use]
    pub fn from_checkpoint(&self, snapshot: Option<Value>) -> Channel {
        let mut restored = self.clone();
        match (&mut restored, snapshot) {
            (Channel::LastValue(c), snap) => c.value = snap,
            (Channel::Topic(c), Some(Value::Array(values))) => c.values = values,
            (Channel::Topic(c), _) => c.values = Vec::new(),
            (Channel::Aggregate(c), snap) => c.value = snap,
            (Channel::Ephemeral(c), snap) => c.value = snap,
            // Untracked and context values live outside checkpoints;
            // the prototype's state carries over as-is.
            (Channel::Untracked(_) | Channel::Context(_), _) => {}
        }
        restored
    }

    /// Called once per superstep after reads; single-superstep variants
    /// clear themselves here. Returns `true` if state was discarded.
    pub fn consume(&mut self) -> bool {
        match self {
            Channel::Topic(c) => c.consume(),
            Channel::Ephemeral(c) => c.consume(),
            _ => false,
        }
    }

    /// Whether this channel participates in checkpoints and versioning.
    #[must_use]
    pub fn is_tracked(&self) -> bool {
        !matches!(self, Channel::Untracked(_) | Channel::Context(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducers;
    use serde_json::json;

    #[test]
    fn last_value_rejects_two_writers() {
        let mut c = Channel::last_value();
        let err = c.update("out", vec![json!(1), json!(2)]).unwrap_err();
        assert!(matches!(err, ChannelError::InvalidUpdate { .. }));
    }

    #[test]
    fn topic_orders_writes_and_clears_on_consume() {
        let mut c = Channel::topic();
        assert!(c.update("fanin", vec![json!(3), json!(3)]).unwrap());
        assert_eq!(c.get("fanin").unwrap(), json!([3, 3]));
        assert!(c.consume());
        assert!(matches!(
            c.get("fanin"),
            Err(ChannelError::Empty { .. })
        ));
    }

    #[test]
    fn aggregate_folds_from_identity() {
        let mut c = Channel::aggregate(reducers::sum(), json!(0));
        assert!(c.update("total", vec![json!(2), json!(3)]).unwrap());
        assert_eq!(c.get("total").unwrap(), json!(5));
        assert!(c.update("total", vec![json!(10)]).unwrap());
        assert_eq!(c.get("total").unwrap(), json!(15));
    }

    #[test]
    fn ephemeral_clears_once_consumed() {
        let mut c = Channel::ephemeral();
        c.update("tick", vec![json!(true)]).unwrap();
        assert_eq!(c.get("tick").unwrap(), json!(true));
        assert!(c.consume());
        assert!(c.get("tick").is_err());
        assert!(!c.consume());
    }

    #[test]
    fn untracked_is_read_only_and_uncheckpointed() {
        let mut c = Channel::untracked(json!({"pool": "primary"}));
        assert!(c.update("cfg", vec![json!(1)]).is_err());
        assert_eq!(c.checkpoint(), None);
        assert_eq!(c.get("cfg").unwrap(), json!({"pool": "primary"}));
    }

    #[test]
    fn checkpoint_roundtrip_restores_value() {
        let mut c = Channel::last_value();
        c.update("inbox", vec![json!(42)]).unwrap();
        let snap = c.checkpoint();
        let restored = Channel::last_value().from_checkpoint(snap);
        assert_eq!(restored.get("inbox").unwrap(), json!(42));
    }
}
