use proptest::prelude::*;
use serde_json::{Value, json};
use stepweave::channels::{Channel, ChannelError};
use stepweave::types::{TaskPath, format_version, stable_value_hash, task_id, version_seq};

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        "[a-z]{0,12}".prop_map(Value::from),
        Just(Value::Null),
    ]
}

proptest! {
    // Successive version tokens are strictly increasing no matter what
    // content hashes they embed.
    #[test]
    fn version_tokens_increase_monotonically(values in prop::collection::vec(arb_value(), 1..40)) {
        let mut current: Option<String> = None;
        for value in &values {
            let seq = current.as_deref().map(version_seq).unwrap_or(0) + 1;
            let next = format_version(seq, stable_value_hash(value));
            if let Some(previous) = &current {
                prop_assert!(next > *previous, "{next} <= {previous}");
            }
            current = Some(next);
        }
    }

    // Task identity is a pure function of its inputs and distinguishes
    // steps and paths.
    #[test]
    fn task_ids_are_stable_and_step_sensitive(
        checkpoint in "[a-f0-9]{8}",
        node in "[a-z]{1,10}",
        step in 0i64..1000,
    ) {
        let path = TaskPath::Pull { channel: "c".into() };
        prop_assert_eq!(
            task_id(&checkpoint, &node, step, &path),
            task_id(&checkpoint, &node, step, &path)
        );
        prop_assert_ne!(
            task_id(&checkpoint, &node, step, &path),
            task_id(&checkpoint, &node, step + 1, &path)
        );
    }

    // A last-value slot accepts at most one write per superstep.
    #[test]
    fn last_value_rejects_concurrent_writers(values in prop::collection::vec(arb_value(), 0..6)) {
        let mut channel = Channel::last_value();
        let result = channel.update("slot", values.clone());
        match values.len() {
            0 => prop_assert_eq!(result.unwrap(), false),
            1 => prop_assert_eq!(result.unwrap(), true),
            _ => {
                let is_invalid_update = matches!(result, Err(ChannelError::InvalidUpdate { .. }));
                prop_assert!(is_invalid_update);
            }
        }
    }

    // A topic preserves write order and exposes exactly one step's
    // writes.
    #[test]
    fn topic_preserves_write_order(values in prop::collection::vec(arb_value(), 1..12)) {
        let mut channel = Channel::topic();
        channel.update("fanin", values.clone()).unwrap();
        prop_assert_eq!(channel.get("fanin").unwrap(), json!(values));
        channel.consume();
        prop_assert!(channel.get("fanin").is_err());
    }
}
