//! Fold-on-write aggregation over an associative reducer.

use std::fmt;

use serde_json::Value;

use super::ChannelError;
use crate::reducers::ReducerFn;

/// Folds every write into an accumulated value using a configured
/// associative reducer with an identity element.
///
/// The accumulated value persists across supersteps; multiple writers
/// in one step fold left in write order.
#[derive(Clone)]
pub struct BinaryOperatorAggregate {
    pub(crate) reducer: ReducerFn,
    pub(crate) identity: Value,
    pub(crate) value: Option<Value>,
}

impl fmt::Debug for BinaryOperatorAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryOperatorAggregate")
            .field("identity", &self.identity)
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

impl BinaryOperatorAggregate {
    pub(crate) fn new(reducer: ReducerFn, identity: Value) -> Self {
        Self {
            reducer,
            identity,
            value: None,
        }
    }

    pub(crate) fn update(&mut self, writes: Vec<Value>) -> bool {
        if writes.is_empty() {
            return false;
        }
        let mut acc = self.value.take().unwrap_or_else(|| self.identity.clone());
        for write in writes {
            acc = (self.reducer)(acc, write);
        }
        self.value = Some(acc);
        true
    }

    pub(crate) fn get(&self, name: &str) -> Result<Value, ChannelError> {
        self.value.clone().ok_or_else(|| ChannelError::Empty {
            channel: name.to_string(),
        })
    }
}
