//! Resilient call adapter: per-attempt timeout plus bounded retries with a
//! fixed delay. Used by the tool, mcp_tool and llm executors and by the
//! parallel branch runner.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::error::NodeError;

/// Retry/timeout policy for one external call, read from a node's `data` bag
/// (`timeout`, `retryAttempts`, `retryDelay`, all in milliseconds except the
/// attempt count).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for CallPolicy {
    fn default() -> Self {
        CallPolicy {
            timeout_ms: 30_000,
            max_attempts: 1,
            retry_delay_ms: 1_000,
        }
    }
}

impl CallPolicy {
    /// Read the policy out of a node's configuration, falling back to
    /// defaults for absent or malformed fields.
    pub fn from_node_data(data: &Value) -> Self {
        let defaults = CallPolicy::default();
        CallPolicy {
            timeout_ms: data
                .get("timeout")
                .and_then(Value::as_u64)
                .unwrap_or(defaults.timeout_ms),
            max_attempts: data
                .get("retryAttempts")
                .and_then(Value::as_u64)
                .map(|n| (n as u32).max(1))
                .unwrap_or(defaults.max_attempts),
            retry_delay_ms: data
                .get("retryDelay")
                .and_then(Value::as_u64)
                .unwrap_or(defaults.retry_delay_ms),
        }
    }
}

/// Run `op` under the policy. Every attempt races the timeout; failed
/// attempts wait `retry_delay_ms` before the next one. On success returns
/// the value and the number of retries consumed (0 when the first attempt
/// succeeded). On exhaustion returns [`NodeError::RetryExhausted`] naming
/// the attempt count and the last failure.
pub async fn call_with_retry<T, F, Fut>(policy: &CallPolicy, mut op: F) -> Result<(T, u32), NodeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, NodeError>>,
{
    let mut last_error = String::new();

    for attempt in 0..policy.max_attempts {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(policy.retry_delay_ms)).await;
        }
        match tokio::time::timeout(Duration::from_millis(policy.timeout_ms), op()).await {
            Ok(Ok(value)) => return Ok((value, attempt)),
            Ok(Err(e)) => {
                warn!(attempt = attempt + 1, error = %e, "call attempt failed");
                last_error = e.to_string();
            }
            Err(_) => {
                warn!(attempt = attempt + 1, timeout_ms = policy.timeout_ms, "call attempt timed out");
                last_error = NodeError::Timeout(policy.timeout_ms).to_string();
            }
        }
    }

    Err(NodeError::RetryExhausted {
        attempts: policy.max_attempts,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_policy_from_node_data() {
        let p = CallPolicy::from_node_data(&serde_json::json!({
            "timeout": 5000,
            "retryAttempts": 3,
            "retryDelay": 10
        }));
        assert_eq!(p.timeout_ms, 5000);
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.retry_delay_ms, 10);

        let d = CallPolicy::from_node_data(&serde_json::json!({"retryAttempts": 0}));
        assert_eq!(d.max_attempts, 1);
        assert_eq!(d.timeout_ms, 30_000);
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let policy = CallPolicy {
            timeout_ms: 1000,
            max_attempts: 3,
            retry_delay_ms: 1,
        };
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let (value, retries) = call_with_retry(&policy, move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(NodeError::CallFailed("flaky".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 42);
        assert_eq!(retries, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_error() {
        let policy = CallPolicy {
            timeout_ms: 1000,
            max_attempts: 2,
            retry_delay_ms: 1,
        };
        let err = call_with_retry::<(), _, _>(&policy, || async {
            Err(NodeError::CallFailed("down".into()))
        })
        .await
        .unwrap_err();
        match err {
            NodeError::RetryExhausted { attempts, last_error } => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("down"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let policy = CallPolicy {
            timeout_ms: 5,
            max_attempts: 1,
            retry_delay_ms: 1,
        };
        let err = call_with_retry::<(), _, _>(&policy, || async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("5ms"));
    }
}
