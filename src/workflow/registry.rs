/// Workflow registry
///
/// Maps workflow ids to validated definitions and resolves triggers against
/// them. The host populates it during startup with `&mut` access, then shares
/// it behind an `Arc`; from then on every read is lock-free because nothing
/// mutates it.

use crate::error::{DefinitionError, InvokeError};
use crate::runtime::engine::{ExecutionEngine, RunResult};
use crate::workflow::graph::{self, GraphReport};
use crate::workflow::result::Payload;
use crate::workflow::trigger::InboundEvent;
use crate::workflow::types::WorkflowDefinition;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct WorkflowRegistry {
    /// Key: workflow_id
    workflows: HashMap<String, Arc<CompiledWorkflow>>,

    /// Engine used by manual invocation
    engine: Arc<ExecutionEngine>,

    /// Treat unreachable states as fatal
    strict: bool,
}

/// Validated workflow with its graph report
#[derive(Debug)]
pub struct CompiledWorkflow {
    pub definition: WorkflowDefinition,
    pub report: GraphReport,
}

impl CompiledWorkflow {
    /// Validate a definition's graph without registering it
    pub fn compile(definition: WorkflowDefinition, strict: bool) -> Result<Self, DefinitionError> {
        let report = graph::validate(&definition, strict)?;
        Ok(Self { definition, report })
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new(Arc::new(ExecutionEngine::default()))
    }
}

impl WorkflowRegistry {
    pub fn new(engine: Arc<ExecutionEngine>) -> Self {
        Self {
            workflows: HashMap::new(),
            engine,
            strict: false,
        }
    }

    /// Reject definitions with unreachable states instead of warning
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    /// Validate and add a definition
    ///
    /// Rejected definitions leave the registry unchanged.
    pub fn register(&mut self, definition: WorkflowDefinition) -> Result<Arc<CompiledWorkflow>, DefinitionError> {
        if self.workflows.contains_key(&definition.id) {
            return Err(DefinitionError::DuplicateWorkflow(definition.id));
        }

        let compiled = Arc::new(CompiledWorkflow::compile(definition, self.strict)?);

        tracing::info!(
            workflow = %compiled.id(),
            trigger = compiled.definition.trigger.kind(),
            states = compiled.definition.states.len(),
            "📋 Registered workflow"
        );

        self.workflows
            .insert(compiled.id().to_string(), Arc::clone(&compiled));
        Ok(compiled)
    }

    pub fn get(&self, workflow_id: &str) -> Option<Arc<CompiledWorkflow>> {
        self.workflows.get(workflow_id).cloned()
    }

    /// All workflows, ordered by id
    pub fn list(&self) -> Vec<Arc<CompiledWorkflow>> {
        let mut all: Vec<_> = self.workflows.values().cloned().collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    /// Every workflow whose event trigger matches, ordered by id
    pub fn resolve_for_event(&self, event: &InboundEvent) -> Vec<Arc<CompiledWorkflow>> {
        self.resolve(|compiled| compiled.definition.trigger.matches_event(event))
    }

    /// Every workflow whose schedule fires in the minute of `timestamp`, ordered by id
    pub fn resolve_for_tick(&self, timestamp: DateTime<Utc>) -> Vec<Arc<CompiledWorkflow>> {
        self.resolve(|compiled| compiled.definition.trigger.matches_tick(timestamp))
    }

    fn resolve(&self, matches: impl Fn(&CompiledWorkflow) -> bool) -> Vec<Arc<CompiledWorkflow>> {
        let mut matched: Vec<_> = self
            .workflows
            .values()
            .filter(|compiled| matches(compiled))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.id().cmp(b.id()));
        matched
    }

    /// Run a workflow by id with a caller-supplied payload
    pub async fn invoke(&self, workflow_id: &str, payload: Payload) -> Result<RunResult, InvokeError> {
        self.invoke_with_cancellation(workflow_id, payload, CancellationToken::new())
            .await
    }

    pub async fn invoke_with_cancellation(
        &self,
        workflow_id: &str,
        payload: Payload,
        cancellation: CancellationToken,
    ) -> Result<RunResult, InvokeError> {
        let compiled = self
            .get(workflow_id)
            .ok_or_else(|| InvokeError::UnknownWorkflow(workflow_id.to_string()))?;

        tracing::info!(workflow = %workflow_id, "▶️ Manual invocation");
        Ok(self
            .engine
            .execute(&compiled, payload, cancellation)
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::builder::WorkflowBuilder;
    use crate::workflow::result::{ErrorKind, TaskResult};
    use crate::workflow::trigger::{EventTrigger, ScheduleTrigger};
    use crate::workflow::types::TaskContext;
    use chrono::TimeZone;

    async fn noop(_ctx: TaskContext, _payload: Payload) -> TaskResult {
        Ok(Payload::new())
    }

    fn simple(id: &str) -> WorkflowDefinition {
        WorkflowBuilder::new(id).task("Work", noop, "Done").succeed("Done").build().unwrap()
    }

    #[test]
    fn test_duplicate_workflow_rejected() {
        let mut registry = WorkflowRegistry::default();
        registry.register(simple("sync")).unwrap();

        let err = registry.register(simple("sync")).unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_WORKFLOW");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_invalid_definition_leaves_registry_unchanged() {
        let mut registry = WorkflowRegistry::default();
        let broken = WorkflowBuilder::new("broken")
            .task("Work", noop, "Missing")
            .succeed("Done")
            .build()
            .unwrap();

        assert!(registry.register(broken).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_compile_rejects_dangling_transition() {
        let broken = WorkflowBuilder::new("broken")
            .task("Work", noop, "Missing")
            .succeed("Done")
            .build()
            .unwrap();

        let err = CompiledWorkflow::compile(broken, false).unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_STATE");
    }

    #[test]
    fn test_strict_registry_rejects_unreachable() {
        let mut registry = WorkflowRegistry::default().strict(true);
        let definition = WorkflowBuilder::new("wf")
            .succeed("Done")
            .fail("Unused", ErrorKind::Internal)
            .build()
            .unwrap();

        let err = registry.register(definition).unwrap_err();
        assert_eq!(err.code(), "UNREACHABLE_STATE");
    }

    #[test]
    fn test_resolve_only_matching_trigger_kind() {
        let mut registry = WorkflowRegistry::default();
        let event = EventTrigger::new("default", ["crm"], ["export.ready"]);
        registry
            .register(
                WorkflowBuilder::new("on-event")
                    .on_event(event)
                    .succeed("Done")
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .register(
                WorkflowBuilder::new("hourly")
                    .on_schedule(ScheduleTrigger::new("0 0 * * * *").unwrap())
                    .succeed("Done")
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry.register(simple("manual")).unwrap();

        let tick = Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 30).unwrap();
        let ticked: Vec<_> = registry.resolve_for_tick(tick).iter().map(|c| c.id().to_string()).collect();
        assert_eq!(ticked, vec!["hourly"]);

        let inbound = InboundEvent {
            bus: "default".to_string(),
            source: "crm".to_string(),
            detail_type: "export.ready".to_string(),
            body: Payload::new(),
        };
        let evented: Vec<_> = registry.resolve_for_event(&inbound).iter().map(|c| c.id().to_string()).collect();
        assert_eq!(evented, vec!["on-event"]);
    }

    #[tokio::test]
    async fn test_invoke_unknown_workflow() {
        let registry = WorkflowRegistry::default();
        let err = registry.invoke("ghost", Payload::new()).await.unwrap_err();
        assert_eq!(err, InvokeError::UnknownWorkflow("ghost".to_string()));
    }

    #[tokio::test]
    async fn test_invoke_runs_manual_workflow() {
        let mut registry = WorkflowRegistry::default();
        registry.register(simple("manual")).unwrap();

        let result = registry.invoke("manual", Payload::new()).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.visited_states, vec!["Work", "Done"]);
    }
}
