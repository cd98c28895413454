use flowstate::runtime::RunStatus;
use flowstate::workflow::manifest::{load_dir, HandlerCatalog};
use flowstate::workflow::{ErrorKind, InboundEvent, Payload, WorkflowRegistry};
use flowstate::ManifestError;
use serde_json::json;
use std::fs;

const EXPORT: &str = r#"{
  "id": "crm-export",
  "trigger": { "type": "event", "bus": "default", "sources": ["crm"], "detail_types": ["export.ready"] },
  "states": [
    { "name": "Validate", "type": "task", "handler": "require", "params": { "keys": ["account"] }, "next": "Select" },
    { "name": "Select", "type": "task", "handler": "pass", "params": { "output": { "exported": true } },
      "input": { "account_id": "$.account" }, "next": "Done" },
    { "name": "Done", "type": "succeed" }
  ]
}"#;

const NIGHTLY: &str = r#"{
  "id": "nightly-sync",
  "trigger": { "type": "schedule", "cron": "0 2 * * *" },
  "start_at": "Extract",
  "states": [
    { "name": "Extract", "type": "task", "handler": "pass", "params": { "output": { "rows": 0 } }, "next": "Check" },
    { "name": "Check", "type": "choice",
      "branches": [ { "variable": "$.rows", "operator": "greater_than", "value": 0, "next": "Done" } ],
      "default": "Empty" },
    { "name": "Done", "type": "succeed" },
    { "name": "Empty", "type": "fail", "error": "NOT_FOUND", "cause": "nothing to sync" }
  ]
}"#;

#[tokio::test]
async fn directory_of_manifests_registers_and_runs() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("b-export.json"), EXPORT).unwrap();
    fs::write(dir.path().join("a-nightly.json"), NIGHTLY).unwrap();
    fs::write(dir.path().join("README.md"), "not a manifest").unwrap();

    let definitions = load_dir(dir.path(), &HandlerCatalog::default()).unwrap();
    let ids: Vec<_> = definitions.iter().map(|d| d.id.clone()).collect();
    assert_eq!(ids, vec!["nightly-sync", "crm-export"]);

    let mut registry = WorkflowRegistry::default();
    for definition in definitions {
        registry.register(definition).unwrap();
    }

    let mut body = Payload::new();
    body.insert("account".to_string(), json!("acme"));
    let event = InboundEvent {
        bus: "default".to_string(),
        source: "crm".to_string(),
        detail_type: "export.ready".to_string(),
        body: body.clone(),
    };
    let matched = registry.resolve_for_event(&event);
    assert_eq!(matched.len(), 1);

    let result = registry.invoke("crm-export", body).await.unwrap();
    assert_eq!(result.status, RunStatus::Succeeded);
    assert_eq!(result.payload.get("exported"), Some(&json!(true)));

    let nightly = registry.invoke("nightly-sync", Payload::new()).await.unwrap();
    let failure = nightly.error.unwrap();
    assert_eq!(failure.kind, ErrorKind::NotFound);
    assert_eq!(failure.message.as_deref(), Some("nothing to sync"));
}

#[test]
fn malformed_json_names_the_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("broken.json"), "{ \"id\": ").unwrap();

    let err = load_dir(dir.path(), &HandlerCatalog::default()).unwrap_err();
    match err {
        ManifestError::Parse { path, .. } => assert!(path.ends_with("broken.json")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn invalid_input_path_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = json!({
        "id": "bad-path",
        "states": [
            { "name": "A", "type": "task", "handler": "pass", "input": { "x": "$..[" }, "next": "Done" },
            { "name": "Done", "type": "succeed" }
        ]
    });
    fs::write(dir.path().join("bad.json"), manifest.to_string()).unwrap();

    let err = load_dir(dir.path(), &HandlerCatalog::default()).unwrap_err();
    assert!(matches!(err, ManifestError::InvalidPath { .. }));
}

#[test]
fn missing_directory_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_dir(&dir.path().join("absent"), &HandlerCatalog::default()).unwrap_err();
    assert!(matches!(err, ManifestError::Io { .. }));
}
