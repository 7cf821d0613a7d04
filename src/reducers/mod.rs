//! Named binary reducers for aggregate channels.
//!
//! A reducer is an associative `fn(acc, write) -> acc` over JSON
//! values. Aggregate channels fold every write of a superstep through
//! their reducer, so multiple concurrent writers merge
//! deterministically in write order.

use std::sync::Arc;

use serde_json::Value;

/// Associative fold function used by
/// [`BinaryOperatorAggregate`](crate::channels::BinaryOperatorAggregate).
pub type ReducerFn = Arc<dyn Fn(Value, Value) -> Value + Send + Sync>;

/// Wrap a plain closure as a [`ReducerFn`].
pub fn reducer<F>(f: F) -> ReducerFn
where
    F: Fn(Value, Value) -> Value + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Numeric addition. Non-numeric operands pass the accumulator through.
#[must_use]
pub fn sum() -> ReducerFn {
    reducer(|acc, write| match (acc.as_f64(), write.as_f64()) {
        (Some(a), Some(b)) => {
            let total = a + b;
            // Keep integers integral when both operands were.
            if total.fract() == 0.0 && acc.is_i64() && write.is_i64() {
                Value::from(total as i64)
            } else {
                Value::from(total)
            }
        }
        _ => acc,
    })
}

/// Numeric maximum.
#[must_use]
pub fn max() -> ReducerFn {
    reducer(|acc, write| match (acc.as_f64(), write.as_f64()) {
        (Some(a), Some(b)) if b > a => write,
        _ => acc,
    })
}

/// Array concatenation. Scalar writes are appended as single elements.
#[must_use]
pub fn append() -> ReducerFn {
    reducer(|acc, write| {
        let mut items = match acc {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        };
        match write {
            Value::Array(mut more) => items.append(&mut more),
            other => items.push(other),
        }
        Value::Array(items)
    })
}

/// Shallow object merge; the write's keys win on conflict.
#[must_use]
pub fn merge() -> ReducerFn {
    reducer(|acc, write| match (acc, write) {
        (Value::Object(mut base), Value::Object(incoming)) => {
            for (k, v) in incoming {
                base.insert(k, v);
            }
            Value::Object(base)
        }
        (acc, Value::Null) => acc,
        (_, write) => write,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sum_keeps_integers_integral() {
        let r = sum();
        assert_eq!(r(json!(2), json!(3)), json!(5));
        assert_eq!(r(json!(2.5), json!(0.5)), json!(3.0));
    }

    #[test]
    fn append_flattens_array_writes() {
        let r = append();
        let acc = r(json!([1]), json!(2));
        assert_eq!(r(acc, json!([3, 4])), json!([1, 2, 3, 4]));
    }

    #[test]
    fn merge_prefers_incoming_keys() {
        let r = merge();
        assert_eq!(
            r(json!({"a": 1, "b": 1}), json!({"b": 2})),
            json!({"a": 1, "b": 2})
        );
    }

    #[test]
    fn max_picks_larger_operand() {
        let r = max();
        assert_eq!(r(json!(4), json!(9)), json!(9));
        assert_eq!(r(json!(9), json!(4)), json!(9));
    }
}
