//! Template import: atomicity and rule enforcement end to end.

mod common;

use common::{TRIAGE_TEMPLATE, harness};
use gatewright::engine::EngineError;
use gatewright::storage::Storage;

#[tokio::test]
async fn valid_template_imports_and_persists_wiring() {
    let h = harness();
    let template = h.engine.import_template_yaml(TRIAGE_TEMPLATE).await.unwrap();

    let mut txn = h.storage.begin().await.unwrap();
    let record = txn.fetch_template(&template).await.unwrap();
    assert_eq!(record.name, "invoice-triage");
    assert!(record.attributes.contains(&"score".to_string()));

    let blueprint = txn.fetch_blueprint(template.as_str()).await.unwrap();
    assert_eq!(blueprint.roles.len(), 5);
    assert_eq!(blueprint.interactions.len(), 3);
    assert_eq!(blueprint.components.len(), 6);
    // Guards persisted for the gate, the cerberus, and the ate-path edge.
    assert_eq!(blueprint.guards.len(), 3);
}

#[tokio::test]
async fn missing_cerberus_aborts_import_with_nothing_persisted() {
    let broken = TRIAGE_TEMPLATE.replace(
        "guardian: { type: CERBERUS }",
        "guardian: { type: PASS_THRU }",
    );
    let h = harness();
    let err = h.engine.import_template_yaml(&broken).await.unwrap_err();
    let EngineError::Template(validation) = err else {
        panic!("expected a template validation error, got {err:?}");
    };
    assert!(validation.violations.iter().any(|v| v.article == "R9"));

    // Validation runs before the first write, so the store stays empty:
    // a fresh import of the valid template is the first template row.
    let template = h.engine.import_template_yaml(TRIAGE_TEMPLATE).await.unwrap();
    let mut txn = h.storage.begin().await.unwrap();
    assert!(txn.fetch_template(&template).await.is_ok());
}

#[tokio::test]
async fn unparsable_template_is_a_validation_error() {
    let h = harness();
    let err = h
        .engine
        .import_template_yaml("workflow: [this is not a workflow")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { .. }));
}

#[tokio::test]
async fn json_import_matches_yaml_import() {
    let h = harness();
    let spec = gatewright::template::TemplateSpec::from_yaml(TRIAGE_TEMPLATE).unwrap();
    let as_json = serde_json::to_string(&spec).unwrap();
    let template = h.engine.import_template_json(&as_json).await.unwrap();
    let mut txn = h.storage.begin().await.unwrap();
    let record = txn.fetch_template(&template).await.unwrap();
    assert_eq!(record.version, "1.0");
}
