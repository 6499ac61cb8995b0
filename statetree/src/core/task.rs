//! Capabilities implemented by tasks and evaluators.
//!
//! The graph holds template objects; every runtime instance duplicates them so
//! no two instances share mutable task state. Working memory that should live
//! in the instance-data block is declared through `instance_record` and
//! reached at runtime through [`ExecutionContext::record`].

use std::fmt;

use crate::core::arena::{InstanceData, InstanceObject, RecordValue};
use crate::core::descriptor::Record;
use crate::core::types::{Owner, RunStatus};
use crate::core::variables::{ConstantTable, PoolValue, VariableHandle, VariablePool};

/// Everything a task or evaluator may touch while it runs.
pub struct ExecutionContext<'a> {
    owner: &'a Owner,
    state: &'a str,
    slot: usize,
    data: &'a mut InstanceData,
    variables: &'a mut VariablePool,
    constants: &'a ConstantTable,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(
        owner: &'a Owner,
        state: &'a str,
        slot: usize,
        data: &'a mut InstanceData,
        variables: &'a mut VariablePool,
        constants: &'a ConstantTable,
    ) -> Self {
        Self {
            owner,
            state,
            slot,
            data,
            variables,
            constants,
        }
    }

    pub fn owner(&self) -> &Owner {
        self.owner
    }

    /// Name of the active state; empty for evaluators.
    pub fn state_name(&self) -> &str {
        self.state
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// This node's own working-memory record, if it declared one of type `T`.
    pub fn record<T: Record>(&mut self) -> Option<&mut T> {
        self.data.get_mut::<T>(self.slot)
    }

    pub fn object<T: InstanceObject>(&mut self, index: usize) -> Option<&mut T> {
        self.data.object_mut::<T>(index)
    }

    pub fn get_value<T: PoolValue>(&self, handle: VariableHandle, default: T) -> T {
        self.variables.get_value(self.constants, handle, default)
    }

    pub fn set_value<T: PoolValue>(&mut self, handle: VariableHandle, value: T) -> bool {
        self.variables.set_value(handle, value)
    }
}

/// A unit of work run sequentially inside a state.
pub trait Task: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Default value of this task's instance-data slot.
    fn instance_record(&self) -> RecordValue {
        RecordValue::empty()
    }

    fn duplicate(&self) -> Box<dyn Task>;

    fn activate(&mut self, _ctx: &mut ExecutionContext<'_>) {}

    fn deactivate(&mut self, _ctx: &mut ExecutionContext<'_>) {}

    fn tick(&mut self, ctx: &mut ExecutionContext<'_>, dt: f32) -> RunStatus;
}

/// A graph-wide updater ticked before state resolution, regardless of state.
pub trait Evaluator: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn instance_record(&self) -> RecordValue {
        RecordValue::empty()
    }

    fn duplicate(&self) -> Box<dyn Evaluator>;

    fn activate(&mut self, _ctx: &mut ExecutionContext<'_>) {}

    fn deactivate(&mut self, _ctx: &mut ExecutionContext<'_>) {}

    fn tick(&mut self, ctx: &mut ExecutionContext<'_>, dt: f32);
}
