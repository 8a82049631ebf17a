//! Data model: workflow definitions, execution records, and the loop/parallel
//! sub-states stored inside the execution context.

pub mod execution;
pub mod routing;
pub mod states;
pub mod workflow;

pub use execution::{Execution, ExecutionStatus, ExecutionStep, StepStatus};
pub use routing::{
    ConditionType, MatchType, RoutingRule, RoutingStrategy, ValueMatchRule, ValueMatchType,
    ValueMatchingConfig,
};
pub use states::{
    BranchState, BranchStatus, FailureStrategy, JoinDecision, LoopState, ParallelState,
    ParallelStrategy,
};
pub use workflow::{Edge, Node, Trigger, TriggerType, WorkflowDefinition};
