//! Execution persistence. The driver saves through this trait at every
//! state transition so a host can swap in a durable store; the in-memory
//! implementation is what the tests and the demo binary use.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{EngineError, EngineResult};
use crate::model::{Execution, ExecutionStatus, ExecutionStep};

pub trait ExecutionStore: Send + Sync {
    fn save_execution(&self, execution: &Execution) -> EngineResult<()>;
    fn execution(&self, id: &str) -> EngineResult<Execution>;
    fn list_by_status(&self, status: ExecutionStatus) -> EngineResult<Vec<Execution>>;
    fn save_step(&self, step: &ExecutionStep) -> EngineResult<()>;
    /// Steps of one execution in creation order.
    fn steps(&self, execution_id: &str) -> EngineResult<Vec<ExecutionStep>>;
}

#[derive(Default)]
pub struct InMemoryExecutionStore {
    executions: RwLock<HashMap<String, Execution>>,
    /// Step ids per execution, insertion-ordered.
    step_index: RwLock<HashMap<String, Vec<String>>>,
    steps: RwLock<HashMap<String, ExecutionStep>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionStore for InMemoryExecutionStore {
    fn save_execution(&self, execution: &Execution) -> EngineResult<()> {
        self.executions
            .write()
            .insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    fn execution(&self, id: &str) -> EngineResult<Execution> {
        self.executions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::ExecutionNotFound(id.to_string()))
    }

    fn list_by_status(&self, status: ExecutionStatus) -> EngineResult<Vec<Execution>> {
        Ok(self
            .executions
            .read()
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect())
    }

    fn save_step(&self, step: &ExecutionStep) -> EngineResult<()> {
        let mut steps = self.steps.write();
        if !steps.contains_key(&step.id) {
            self.step_index
                .write()
                .entry(step.execution_id.clone())
                .or_default()
                .push(step.id.clone());
        }
        steps.insert(step.id.clone(), step.clone());
        Ok(())
    }

    fn steps(&self, execution_id: &str) -> EngineResult<Vec<ExecutionStep>> {
        let index = self.step_index.read();
        let steps = self.steps.read();
        Ok(index
            .get(execution_id)
            .map(|ids| ids.iter().filter_map(|id| steps.get(id)).cloned().collect())
            .unwrap_or_default())
    }
}
