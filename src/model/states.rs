//! Loop and parallel sub-states, stored under `loops` / `parallels` in the
//! execution context and deleted on loop exit / join.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// State of one active loop. Created on first entry to the matching
/// `loop_start` node; `current_iteration` increments on every re-entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopState {
    pub loop_id: String,
    pub current_iteration: u32,
    pub max_iterations: u32,
    pub start_node_id: String,
    #[serde(default)]
    pub exit_condition: Option<String>,
    #[serde(default)]
    pub exit_event_type: Option<String>,
    #[serde(default)]
    pub exit_event_condition: Option<String>,
    #[serde(default)]
    pub exit_keyword: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParallelStrategy {
    #[default]
    WaitAll,
    WaitAny,
    WaitFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailureStrategy {
    #[default]
    FailFast,
    ContinueOnError,
    IgnoreErrors,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// State of one branch within a parallel region.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchState {
    pub branch_id: String,
    pub branch_name: String,
    pub status: BranchStatus,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

/// State of one active parallel region. Created on `parallel_start`; deleted
/// on the join decision in `parallel_end`. `results` is written only by the
/// join point, never by branch tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelState {
    pub parallel_id: String,
    pub strategy: ParallelStrategy,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    pub start_time: DateTime<Utc>,
    pub branches: Vec<BranchState>,
    pub completed_branches: Vec<String>,
    pub failed_branches: Vec<String>,
    pub results: Map<String, Value>,
    pub failure_strategy: FailureStrategy,
}

impl ParallelState {
    pub fn branch_mut(&mut self, branch_id: &str) -> Option<&mut BranchState> {
        self.branches.iter_mut().find(|b| b.branch_id == branch_id)
    }

    pub fn finished_count(&self) -> usize {
        self.completed_branches.len() + self.failed_branches.len()
    }
}

/// The join decision for a parallel region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinDecision {
    Complete { reason: &'static str },
    Wait,
}

impl ParallelState {
    /// Compute whether the region should complete under its strategy.
    /// Timeout is checked by the join loop itself, not here.
    pub fn join_decision(&self) -> JoinDecision {
        let total = self.branches.len();
        let completed = self.completed_branches.len();
        let failed = self.failed_branches.len();

        match self.strategy {
            ParallelStrategy::WaitAll => {
                if completed == total {
                    JoinDecision::Complete {
                        reason: "all_completed",
                    }
                } else if failed > 0 && self.failure_strategy == FailureStrategy::FailFast {
                    JoinDecision::Complete { reason: "fail_fast" }
                } else if completed + failed == total {
                    JoinDecision::Complete {
                        reason: "all_finished",
                    }
                } else {
                    JoinDecision::Wait
                }
            }
            ParallelStrategy::WaitAny => {
                if completed > 0 {
                    JoinDecision::Complete {
                        reason: "any_completed",
                    }
                } else if failed == total {
                    JoinDecision::Complete {
                        reason: "all_failed",
                    }
                } else {
                    JoinDecision::Wait
                }
            }
            ParallelStrategy::WaitFirst => {
                if completed + failed > 0 {
                    JoinDecision::Complete {
                        reason: "first_finished",
                    }
                } else {
                    JoinDecision::Wait
                }
            }
        }
    }
}
