//! Lifecycle events published by the engine, and the non-blocking emitter
//! that carries them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

/// Workflow and node lifecycle notifications. Payloads are sanitized before
/// emission; consumers never see credential-shaped values.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    WorkflowStarted {
        execution_id: String,
        workflow_id: String,
        timestamp: DateTime<Utc>,
    },
    WorkflowCompleted {
        execution_id: String,
        output: Value,
        duration_ms: i64,
        timestamp: DateTime<Utc>,
    },
    WorkflowFailed {
        execution_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        execution_id: String,
        node_id: String,
        node_type: String,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        execution_id: String,
        node_id: String,
        node_type: String,
        output: Value,
        duration_ms: i64,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        execution_id: String,
        node_id: String,
        node_type: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    NodeWaiting {
        execution_id: String,
        node_id: String,
        node_type: String,
        waiting_for: String,
        timestamp: DateTime<Utc>,
    },
}

const REDACTED: &str = "[REDACTED]";
const SENSITIVE_KEY_PARTS: [&str; 5] = ["password", "token", "secret", "apikey", "authorization"];

fn is_sensitive_key(key: &str) -> bool {
    let folded: String = key.to_lowercase().replace(['_', '-'], "");
    SENSITIVE_KEY_PARTS.iter().any(|part| folded.contains(part))
}

/// Recursively redact values under credential-shaped keys.
pub fn sanitize(value: &Value) -> Value {
    match value {
        Value::Object(obj) => {
            let mut out = serde_json::Map::with_capacity(obj.len());
            for (k, v) in obj {
                if is_sensitive_key(k) {
                    out.insert(k.clone(), Value::String(REDACTED.to_string()));
                } else {
                    out.insert(k.clone(), sanitize(v));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize).collect()),
        other => other.clone(),
    }
}

/// Sender wrapper for lifecycle events, with an atomic active flag so that
/// emission can be cheaply skipped when no listener is attached. Sends are
/// `try_send`: a slow consumer drops events instead of stalling the engine.
#[derive(Clone)]
pub struct EventEmitter {
    tx: Option<mpsc::Sender<LifecycleEvent>>,
    active: Arc<AtomicBool>,
}

impl EventEmitter {
    /// An emitter with no listener; every emit is a no-op.
    pub fn disabled() -> Self {
        EventEmitter {
            tx: None,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create an emitter and its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        let emitter = EventEmitter {
            tx: Some(tx),
            active: Arc::new(AtomicBool::new(true)),
        };
        (emitter, rx)
    }

    #[inline(always)]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Detach the listener; subsequent emits are skipped.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Relaxed);
    }

    pub fn emit(&self, event: LifecycleEvent) {
        if !self.is_active() {
            return;
        }
        if let Some(tx) = &self.tx {
            if let Err(e) = tx.try_send(event) {
                debug!(error = %e, "dropping lifecycle event");
            }
        }
    }
}
