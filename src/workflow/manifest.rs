/// Declarative workflow manifests
///
/// Workflows can be declared as JSON files instead of Rust builder code.
/// Task states name a handler in a [`HandlerCatalog`]; each catalog entry is
/// a factory turning the state's `params` into a [`TaskHandler`], so new step
/// types are added by registering a factory.
///
/// ```json
/// {
///   "id": "nightly-sync",
///   "trigger": { "type": "schedule", "cron": "0 0 2 * * *", "timezone": "UTC" },
///   "start_at": "Extract",
///   "states": [
///     { "name": "Extract", "type": "task", "handler": "pass",
///       "params": { "output": { "rows": 10 } }, "next": "Check" },
///     { "name": "Check", "type": "choice",
///       "branches": [ { "variable": "$.rows", "operator": "greater_than", "value": 0, "next": "Done" } ],
///       "default": "Empty" },
///     { "name": "Done", "type": "succeed" },
///     { "name": "Empty", "type": "fail", "error": "VALIDATION", "cause": "no rows" }
///   ]
/// }
/// ```

use crate::error::ManifestError;
use crate::workflow::builder::WorkflowBuilder;
use crate::workflow::result::{ErrorKind, Payload, TaskError};
use crate::workflow::trigger::{EventTrigger, ScheduleTrigger, Trigger};
use crate::workflow::types::{
    handler_fn, BoxedTaskHandler, ChoiceState, Condition, InputTransform, Operator, StateNode,
    TaskContext, TaskState, WorkflowDefinition,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Builds a handler from a task state's `params`
pub type HandlerFactory = Arc<dyn Fn(&Value) -> Result<BoxedTaskHandler, String> + Send + Sync>;

/// Top-level manifest document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowManifest {
    pub id: String,
    #[serde(default)]
    pub trigger: TriggerManifest,
    #[serde(default)]
    pub start_at: Option<String>,
    pub states: Vec<StateManifest>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerManifest {
    Event {
        #[serde(default = "default_bus")]
        bus: String,
        sources: Vec<String>,
        detail_types: Vec<String>,
    },
    Schedule {
        cron: String,
        #[serde(default)]
        timezone: Option<String>,
    },
    #[default]
    Manual,
}

fn default_bus() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateManifest {
    pub name: String,
    #[serde(flatten)]
    pub kind: StateKindManifest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateKindManifest {
    Task {
        handler: String,
        #[serde(default)]
        params: Value,
        next: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
        /// Output key -> JSONPath into the run payload
        #[serde(default)]
        input: Option<BTreeMap<String, String>>,
    },
    Succeed,
    Fail {
        error: ErrorKind,
        #[serde(default)]
        cause: Option<String>,
    },
    Choice {
        branches: Vec<BranchManifest>,
        #[serde(default)]
        default: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchManifest {
    pub variable: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
    pub next: String,
}

/// Named handler factories available to manifests
#[derive(Clone)]
pub struct HandlerCatalog {
    factories: HashMap<String, HandlerFactory>,
}

impl std::fmt::Debug for HandlerCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("HandlerCatalog").field("handlers", &names).finish()
    }
}

impl Default for HandlerCatalog {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl HandlerCatalog {
    /// Catalog with no handlers at all
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Catalog preloaded with `pass`, `require` and `wait`
    pub fn with_builtins() -> Self {
        let mut catalog = Self::empty();
        catalog.register("pass", pass_handler);
        catalog.register("require", require_handler);
        catalog.register("wait", wait_handler);
        catalog
    }

    /// Add or replace a handler factory
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&Value) -> Result<BoxedTaskHandler, String> + Send + Sync + 'static,
    ) {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    fn build(&self, state: &str, handler: &str, params: &Value) -> Result<BoxedTaskHandler, ManifestError> {
        let factory = self
            .factories
            .get(handler)
            .ok_or_else(|| ManifestError::UnknownHandler {
                state: state.to_string(),
                handler: handler.to_string(),
            })?;
        factory(params).map_err(|reason| ManifestError::InvalidParams {
            handler: handler.to_string(),
            reason,
        })
    }
}

/// `pass`: returns the `output` object unchanged
fn pass_handler(params: &Value) -> Result<BoxedTaskHandler, String> {
    let output: Payload = match params.get("output") {
        None | Some(Value::Null) => Payload::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return Err("'output' must be an object".to_string()),
    };
    Ok(Arc::new(handler_fn(move |_ctx, _payload| {
        let output = output.clone();
        async move { Ok(output) }
    })))
}

/// `require`: fails `VALIDATION` unless every key in `keys` is present
fn require_handler(params: &Value) -> Result<BoxedTaskHandler, String> {
    let keys: Vec<String> = params
        .get("keys")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| format!("'keys' must be a list of strings: {}", e))?
        .ok_or_else(|| "'keys' is required".to_string())?;
    let keys = Arc::new(keys);
    Ok(Arc::new(handler_fn(move |_ctx, payload: Payload| {
        let keys = Arc::clone(&keys);
        async move {
            let missing: Vec<&str> = keys
                .iter()
                .filter(|key| !payload.contains_key(key.as_str()))
                .map(String::as_str)
                .collect();
            if missing.is_empty() {
                Ok(Payload::new())
            } else {
                Err(TaskError::validation(format!("missing keys: {}", missing.join(", "))))
            }
        }
    })))
}

/// `wait`: sleeps `ms` milliseconds, giving up early when cancelled
fn wait_handler(params: &Value) -> Result<BoxedTaskHandler, String> {
    let ms = params
        .get("ms")
        .and_then(Value::as_u64)
        .ok_or_else(|| "'ms' must be a non-negative integer".to_string())?;
    Ok(Arc::new(handler_fn(move |ctx: TaskContext, _payload| async move {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(Payload::new()),
            _ = ctx.cancellation.cancelled() => {
                Err(TaskError::new(ErrorKind::Cancelled, "wait interrupted by cancellation"))
            }
        }
    })))
}

/// Check a JSONPath compiles by evaluating it against an empty document
fn check_path(path: &str) -> Result<(), ManifestError> {
    jsonpath_lib::select(&Value::Object(Payload::new()), path)
        .map(|_| ())
        .map_err(|e| ManifestError::InvalidPath {
            path: path.to_string(),
            reason: format!("{:?}", e),
        })
}

impl WorkflowManifest {
    /// Turn the manifest into a definition, resolving handlers via `catalog`
    ///
    /// Graph validation is left to registration, as for builder definitions.
    pub fn into_definition(self, catalog: &HandlerCatalog) -> Result<WorkflowDefinition, ManifestError> {
        let trigger = match self.trigger {
            TriggerManifest::Manual => Trigger::Manual,
            TriggerManifest::Event {
                bus,
                sources,
                detail_types,
            } => Trigger::Event(EventTrigger::new(bus, sources, detail_types)),
            TriggerManifest::Schedule { cron, timezone } => Trigger::Schedule(match timezone {
                Some(tz) => ScheduleTrigger::with_timezone(&cron, &tz)?,
                None => ScheduleTrigger::new(&cron)?,
            }),
        };

        let mut builder = WorkflowBuilder::new(self.id).trigger(trigger);
        if let Some(start) = self.start_at {
            builder = builder.start_at(start);
        }

        for state in self.states {
            let node = match state.kind {
                StateKindManifest::Task {
                    handler,
                    params,
                    next,
                    timeout_ms,
                    input,
                } => {
                    let boxed = catalog.build(&state.name, &handler, &params)?;
                    let mut task = TaskState::from_boxed(boxed, next);
                    if let Some(ms) = timeout_ms {
                        task = task.with_timeout(Duration::from_millis(ms));
                    }
                    if let Some(selections) = input {
                        for path in selections.values() {
                            check_path(path)?;
                        }
                        task = task.with_input(InputTransform::select(selections));
                    }
                    StateNode::Task(task)
                }
                StateKindManifest::Succeed => StateNode::Succeed,
                StateKindManifest::Fail { error, cause } => StateNode::Fail { error, cause },
                StateKindManifest::Choice { branches, default } => {
                    let mut choice = ChoiceState::new();
                    for branch in branches {
                        if branch.variable.starts_with('$') {
                            check_path(&branch.variable)?;
                        }
                        let condition = Condition::new(branch.variable, branch.operator, branch.value);
                        choice = choice.when(condition.into(), branch.next);
                    }
                    choice.default = default;
                    StateNode::Choice(choice)
                }
            };
            builder = builder.state(state.name, node);
        }

        Ok(builder.build()?)
    }
}

/// Parse one manifest document; `origin` names it in errors
pub fn parse_manifest(
    source: &str,
    origin: &str,
    catalog: &HandlerCatalog,
) -> Result<WorkflowDefinition, ManifestError> {
    let manifest: WorkflowManifest =
        serde_json::from_str(source).map_err(|source| ManifestError::Parse {
            path: origin.to_string(),
            source,
        })?;
    manifest.into_definition(catalog)
}

pub fn load_manifest(path: &Path, catalog: &HandlerCatalog) -> Result<WorkflowDefinition, ManifestError> {
    let display = path.display().to_string();
    let source = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: display.clone(),
        source,
    })?;
    parse_manifest(&source, &display, catalog)
}

/// Load every `*.json` manifest in `dir`, in file name order
pub fn load_dir(dir: &Path, catalog: &HandlerCatalog) -> Result<Vec<WorkflowDefinition>, ManifestError> {
    let io_error = |source| ManifestError::Io {
        path: dir.display().to_string(),
        source,
    };

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut definitions = Vec::with_capacity(paths.len());
    for path in paths {
        let definition = load_manifest(&path, catalog)?;
        tracing::debug!(workflow = %definition.id, path = %path.display(), "📄 Loaded manifest");
        definitions.push(definition);
    }
    Ok(definitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::engine::{ExecutionEngine, RunStatus};
    use crate::workflow::registry::CompiledWorkflow;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn parse(value: Value) -> Result<WorkflowDefinition, ManifestError> {
        parse_manifest(&value.to_string(), "inline", &HandlerCatalog::default())
    }

    fn compile(value: Value) -> CompiledWorkflow {
        CompiledWorkflow::compile(parse(value).unwrap(), false).unwrap()
    }

    #[test]
    fn test_unknown_handler() {
        let err = parse(json!({
            "id": "wf",
            "states": [
                { "name": "A", "type": "task", "handler": "sftp_upload", "next": "Done" },
                { "name": "Done", "type": "succeed" }
            ]
        }))
        .unwrap_err();

        assert!(matches!(err, ManifestError::UnknownHandler { ref handler, .. } if handler == "sftp_upload"));
    }

    #[test]
    fn test_bad_params() {
        let err = parse(json!({
            "id": "wf",
            "states": [
                { "name": "A", "type": "task", "handler": "wait", "params": { "ms": "soon" }, "next": "Done" },
                { "name": "Done", "type": "succeed" }
            ]
        }))
        .unwrap_err();

        assert!(matches!(err, ManifestError::InvalidParams { .. }));
    }

    #[test]
    fn test_duplicate_state_surfaces_as_definition_error() {
        let err = parse(json!({
            "id": "wf",
            "states": [
                { "name": "Done", "type": "succeed" },
                { "name": "Done", "type": "succeed" }
            ]
        }))
        .unwrap_err();

        match err {
            ManifestError::Definition(inner) => assert_eq!(inner.code(), "DUPLICATE_STATE"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_cron() {
        let err = parse(json!({
            "id": "wf",
            "trigger": { "type": "schedule", "cron": "not a cron" },
            "states": [ { "name": "Done", "type": "succeed" } ]
        }))
        .unwrap_err();

        match err {
            ManifestError::Definition(inner) => assert_eq!(inner.code(), "INVALID_SCHEDULE"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_event_trigger_defaults_bus() {
        let definition = parse(json!({
            "id": "wf",
            "trigger": { "type": "event", "sources": ["crm"], "detail_types": ["export.ready"] },
            "states": [ { "name": "Done", "type": "succeed" } ]
        }))
        .unwrap();

        match definition.trigger {
            Trigger::Event(trigger) => assert_eq!(trigger.bus, "default"),
            other => panic!("unexpected trigger: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_choice_and_pass_run_end_to_end() {
        let definition = compile(json!({
            "id": "wf",
            "states": [
                { "name": "Extract", "type": "task", "handler": "pass",
                  "params": { "output": { "rows": 3 } }, "next": "Check" },
                { "name": "Check", "type": "choice",
                  "branches": [ { "variable": "$.rows", "operator": "greater_than", "value": 0, "next": "Done" } ],
                  "default": "Empty" },
                { "name": "Done", "type": "succeed" },
                { "name": "Empty", "type": "fail", "error": "VALIDATION", "cause": "no rows" }
            ]
        }));

        let result = ExecutionEngine::default()
            .execute(&definition, Payload::new(), CancellationToken::new())
            .await;

        assert_eq!(result.status, RunStatus::Succeeded);
        assert_eq!(result.payload.get("rows"), Some(&json!(3)));
        assert_eq!(result.visited_states, vec!["Extract", "Check", "Done"]);
    }

    #[tokio::test]
    async fn test_require_reports_missing_keys() {
        let definition = compile(json!({
            "id": "wf",
            "states": [
                { "name": "Check", "type": "task", "handler": "require",
                  "params": { "keys": ["customer_id"] }, "next": "Done" },
                { "name": "Done", "type": "succeed" }
            ]
        }));

        let result = ExecutionEngine::default()
            .execute(&definition, Payload::new(), CancellationToken::new())
            .await;

        assert_eq!(result.error_kind(), Some(ErrorKind::Validation));
        assert_eq!(result.visited_states, vec!["Check"]);
    }

    #[tokio::test]
    async fn test_wait_reports_host_cancellation() {
        let definition = compile(json!({
            "id": "wf",
            "states": [
                { "name": "Hold", "type": "task", "handler": "wait",
                  "params": { "ms": 5000 }, "next": "Done" },
                { "name": "Done", "type": "succeed" }
            ]
        }));
        let token = CancellationToken::new();
        let host = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            host.cancel();
        });

        let result = ExecutionEngine::default()
            .execute(&definition, Payload::new(), token)
            .await;

        assert_eq!(result.error_kind(), Some(ErrorKind::Cancelled));
        assert_eq!(result.error.unwrap().state, "Hold");
    }

    #[test]
    fn test_catalog_accepts_custom_handlers() {
        let mut catalog = HandlerCatalog::empty();
        catalog.register("noop", |_params| {
            Ok(Arc::new(handler_fn(|_ctx, _payload| async { Ok(Payload::new()) })) as BoxedTaskHandler)
        });

        let definition = parse_manifest(
            &json!({
                "id": "wf",
                "states": [
                    { "name": "A", "type": "task", "handler": "noop", "next": "Done" },
                    { "name": "Done", "type": "succeed" }
                ]
            })
            .to_string(),
            "inline",
            &catalog,
        )
        .unwrap();
        assert_eq!(definition.start_state, "A");
        assert!(!catalog.contains("pass"));
    }
}
