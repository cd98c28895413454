//! Fluent construction of workflow definitions
//!
//! The builder replaces module-level workflow maps populated by side effects:
//! a host constructs each definition explicitly and hands it to the registry.
//!
//! ```
//! use flowstate::workflow::{builder::WorkflowBuilder, result::Payload, types::handler_fn};
//!
//! let extract = handler_fn(|_ctx, _payload| async { Ok(Payload::new()) });
//! let definition = WorkflowBuilder::new("nightly-sync")
//!     .task("Extract", extract, "Done")
//!     .succeed("Done")
//!     .build()
//!     .unwrap();
//! assert_eq!(definition.start_state, "Extract");
//! ```

use crate::error::DefinitionError;
use crate::workflow::result::ErrorKind;
use crate::workflow::trigger::{EventTrigger, ScheduleTrigger, Trigger};
use crate::workflow::types::{ChoiceState, StateNode, TaskHandler, TaskState, WorkflowDefinition};
use std::collections::BTreeMap;

#[derive(Debug)]
pub struct WorkflowBuilder {
    id: String,
    trigger: Trigger,
    start_state: Option<String>,
    first_state: Option<String>,
    states: BTreeMap<String, StateNode>,
    duplicate: Option<String>,
}

impl WorkflowBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            trigger: Trigger::Manual,
            start_state: None,
            first_state: None,
            states: BTreeMap::new(),
            duplicate: None,
        }
    }

    pub fn trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn on_event(self, trigger: EventTrigger) -> Self {
        self.trigger(Trigger::Event(trigger))
    }

    pub fn on_schedule(self, trigger: ScheduleTrigger) -> Self {
        self.trigger(Trigger::Schedule(trigger))
    }

    /// Name the start state; defaults to the first state defined
    pub fn start_at(mut self, name: impl Into<String>) -> Self {
        self.start_state = Some(name.into());
        self
    }

    /// Define a task state running `handler` and then moving to `next`
    pub fn task(
        self,
        name: impl Into<String>,
        handler: impl TaskHandler,
        next: impl Into<String>,
    ) -> Self {
        self.task_state(name, TaskState::new(handler, next))
    }

    /// Alias of [`Self::task`]
    pub fn define(
        self,
        name: impl Into<String>,
        handler: impl TaskHandler,
        next: impl Into<String>,
    ) -> Self {
        self.task(name, handler, next)
    }

    /// Define a fully configured task state (timeout, input transform)
    pub fn task_state(self, name: impl Into<String>, task: TaskState) -> Self {
        self.state(name, StateNode::Task(task))
    }

    pub fn succeed(self, name: impl Into<String>) -> Self {
        self.state(name, StateNode::Succeed)
    }

    pub fn fail(self, name: impl Into<String>, error: ErrorKind) -> Self {
        self.state(name, StateNode::fail(error))
    }

    pub fn choice(self, name: impl Into<String>, choice: ChoiceState) -> Self {
        self.state(name, StateNode::Choice(choice))
    }

    /// Define an arbitrary state node
    ///
    /// Redefining a name is remembered and reported by [`Self::build`] as
    /// `DUPLICATE_STATE`; the first definition is kept.
    pub fn state(mut self, name: impl Into<String>, node: StateNode) -> Self {
        let name = name.into();
        if self.states.contains_key(&name) {
            self.duplicate.get_or_insert(name);
            return self;
        }
        self.first_state.get_or_insert_with(|| name.clone());
        self.states.insert(name, node);
        self
    }

    /// Finish the definition
    ///
    /// Only local checks happen here; graph validation (references,
    /// reachability) runs when the definition is registered.
    pub fn build(self) -> Result<WorkflowDefinition, DefinitionError> {
        if self.id.trim().is_empty() {
            return Err(DefinitionError::EmptyWorkflowId);
        }
        if let Some(name) = self.duplicate {
            return Err(DefinitionError::DuplicateState(name));
        }
        let start_state = self
            .start_state
            .or(self.first_state)
            .ok_or_else(|| DefinitionError::MissingStartState(self.id.clone()))?;

        Ok(WorkflowDefinition {
            id: self.id,
            trigger: self.trigger,
            start_state,
            states: self.states,
        })
    }
}
