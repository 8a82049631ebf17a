//! Execution records: the mutable run state of one workflow instance and the
//! per-node step records, mirroring what the engine persists through the
//! [`ExecutionStore`](crate::engine::store::ExecutionStore).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::context::ExecutionContext;

/// Lifecycle status of one execution. Exactly one execution exists per run;
/// it is the unit of persistence and of suspend/resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    WaitingInput,
    WaitingEvent,
    WaitingApproval,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn is_waiting(self) -> bool {
        matches!(
            self,
            ExecutionStatus::WaitingInput
                | ExecutionStatus::WaitingEvent
                | ExecutionStatus::WaitingApproval
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::WaitingInput => "waiting_input",
            ExecutionStatus::WaitingEvent => "waiting_event",
            ExecutionStatus::WaitingApproval => "waiting_approval",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

/// The mutable run record for one workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub current_node_id: Option<String>,
    pub context: ExecutionContext,
    #[serde(default)]
    pub input: Option<Map<String, Value>>,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub trigger_type: Option<String>,
    #[serde(default)]
    pub trigger_data: Option<Value>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Execution {
    pub fn new(workflow_id: &str) -> Self {
        Execution {
            id: Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            status: ExecutionStatus::Pending,
            current_node_id: None,
            context: ExecutionContext::new(),
            input: None,
            output: None,
            error: None,
            trigger_type: None,
            trigger_data: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.output = Some(Value::Object(self.context.flat().clone()));
        self.completed_at = Some(Utc::now());
    }

    pub fn cancel(&mut self) {
        self.status = ExecutionStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }
}

/// Status of one node invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Waiting,
}

/// One record per node invocation. Created when a node begins executing;
/// terminal once the executor returns, fails, or suspends the execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStep {
    pub id: String,
    pub execution_id: String,
    pub node_id: String,
    pub node_type: String,
    pub node_label: String,
    pub status: StepStatus,
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionStep {
    pub fn begin(execution_id: &str, node_id: &str, node_type: &str, node_label: &str) -> Self {
        ExecutionStep {
            id: Uuid::new_v4().to_string(),
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
            node_type: node_type.to_string(),
            node_label: node_label.to_string(),
            status: StepStatus::Running,
            input: None,
            output: None,
            error: None,
            retry_count: 0,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn complete(&mut self, output: Value, retry_count: u32) {
        self.status = StepStatus::Completed;
        self.output = Some(output);
        self.retry_count = retry_count;
        self.completed_at = Some(Utc::now());
    }

    pub fn wait(&mut self, output: Value) {
        self.status = StepStatus::Waiting;
        self.output = Some(output);
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        let s = serde_json::to_string(&ExecutionStatus::WaitingInput).unwrap();
        assert_eq!(s, "\"waiting_input\"");
        let back: ExecutionStatus = serde_json::from_str(&s).unwrap();
        assert_eq!(back, ExecutionStatus::WaitingInput);
    }

    #[test]
    fn test_status_predicates() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::WaitingApproval.is_waiting());
        assert!(!ExecutionStatus::Failed.is_waiting());
    }

    #[test]
    fn test_execution_fail_stamps_completed_at() {
        let mut exec = Execution::new("wf1");
        exec.fail("boom");
        assert_eq!(exec.status, ExecutionStatus::Failed);
        assert_eq!(exec.error.as_deref(), Some("boom"));
        assert!(exec.completed_at.is_some());
    }

    #[test]
    fn test_step_lifecycle() {
        let mut step = ExecutionStep::begin("e1", "n1", "tool", "Tool");
        assert_eq!(step.status, StepStatus::Running);
        step.complete(serde_json::json!({"ok": true}), 2);
        assert_eq!(step.status, StepStatus::Completed);
        assert_eq!(step.retry_count, 2);
        assert!(step.completed_at.is_some());
    }
}
