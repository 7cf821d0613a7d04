//! Task execution under retry policies.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use serde_json::Value;
use tracing::{debug, warn};

use crate::node::{Dispatch, Node, NodeContext, NodeError};
use crate::retry::RetryPolicy;

/// What one task execution produced.
#[derive(Debug)]
pub(crate) struct TaskOutcome {
    pub writes: Vec<(String, Value)>,
    pub dispatches: Vec<Dispatch>,
    /// Terminal error, after the retry budget was spent.
    pub error: Option<NodeError>,
    /// Dynamic interrupt payloads; mutually exclusive with `error`.
    pub interrupts: Vec<Value>,
    pub attempts: u32,
}

/// Run one node body to completion under its retry policy.
///
/// Interrupt requests short-circuit: the attempt's writes are
/// discarded, nothing is retried, and the payload is surfaced in
/// `interrupts`. Retries sleep on the policy's backoff curve; a
/// cancellation request ends the retry loop early with the last error.
pub(crate) async fn run_task(
    body: Arc<dyn Node>,
    input: Value,
    ctx: NodeContext,
    policy: RetryPolicy,
) -> TaskOutcome {
    let mut attempt = 1u32;
    loop {
        // Each attempt gets a fresh subgraph guard; a retried body may
        // legitimately re-enter its subgraph.
        ctx.subgraph_guard.store(false, Ordering::SeqCst);

        match body.run(input.clone(), ctx.clone()).await {
            Ok(update) => {
                return TaskOutcome {
                    writes: update.writes,
                    dispatches: update.dispatches,
                    error: None,
                    interrupts: Vec::new(),
                    attempts: attempt,
                };
            }
            Err(NodeError::Interrupt { payload }) => {
                debug!(node = %ctx.node, task = %ctx.task_id, "task requested interrupt");
                return TaskOutcome {
                    writes: Vec::new(),
                    dispatches: Vec::new(),
                    error: None,
                    interrupts: vec![payload],
                    attempts: attempt,
                };
            }
            Err(error) => {
                let budget_left = attempt < policy.max_attempts;
                if budget_left && policy.should_retry(&error) && !ctx.cancel.is_cancelled() {
                    attempt += 1;
                    let delay = policy.backoff(attempt);
                    warn!(
                        node = %ctx.node,
                        task = %ctx.task_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "retrying task after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return TaskOutcome {
                    writes: Vec::new(),
                    dispatches: Vec::new(),
                    error: Some(error),
                    interrupts: Vec::new(),
                    attempts: attempt,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::node::{NodeUpdate, node_fn};
    use crate::runtimes::cancel::CancelToken;
    use crate::runtimes::stream::StreamEmitter;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn test_ctx() -> NodeContext {
        NodeContext::new(
            "n".into(),
            0,
            "task".into(),
            "cp".into(),
            RunConfig::new("t"),
            CancelToken::new(),
            StreamEmitter::disabled(),
            None,
            None,
        )
    }

    #[tokio::test]
    async fn retries_transient_errors_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let body = Arc::new(node_fn(move |_input, _ctx| {
            let calls = Arc::clone(&counter);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(NodeError::Connection {
                        message: "reset".into(),
                    })
                } else {
                    Ok(NodeUpdate::new().write("total", json!(2)))
                }
            }
        }));
        let policy =
            RetryPolicy::transient(3).with_initial_interval(Duration::from_millis(1));
        let outcome = run_task(body, json!(null), test_ctx(), policy).await;
        assert!(outcome.error.is_none());
        assert_eq!(outcome.attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retryable_error_is_terminal_on_first_attempt() {
        let body = Arc::new(node_fn(|_input, _ctx| async {
            Err::<NodeUpdate, _>(NodeError::Other("logic bug".into()))
        }));
        let outcome = run_task(
            body,
            json!(null),
            test_ctx(),
            RetryPolicy::transient(5),
        )
        .await;
        assert_eq!(outcome.attempts, 1);
        assert!(matches!(outcome.error, Some(NodeError::Other(_))));
    }

    #[tokio::test]
    async fn interrupt_discards_writes_and_skips_retry() {
        let body = Arc::new(node_fn(|_input, _ctx| async {
            Err::<NodeUpdate, _>(NodeError::interrupt(json!({"reason": "review"})))
        }));
        let outcome = run_task(
            body,
            json!(null),
            test_ctx(),
            RetryPolicy::transient(5),
        )
        .await;
        assert!(outcome.error.is_none());
        assert!(outcome.writes.is_empty());
        assert_eq!(outcome.interrupts, vec![json!({"reason": "review"})]);
        assert_eq!(outcome.attempts, 1);
    }
}
