//! End-to-end lifecycle: instantiate, checkout, decompose, submit,
//! terminal gate.

mod common;

use common::{
    FORK_TEMPLATE, TRIAGE_TEMPLATE, actor, harness, harness_with, interaction_name, load_history,
    load_uow, role_id,
};
use gatewright::config::EngineConfig;
use gatewright::engine::SubmitOutcome;
use gatewright::history::verify_chain;
use gatewright::types::UowStatus;
use serde_json::json;

#[tokio::test]
async fn happy_path_reaches_omega_through_cerberus() {
    // Park & Notify off so the terminal gate completes directly.
    let h = harness_with(|e| e.with_config(EngineConfig::default().without_park_and_notify()));
    let template = h.engine.import_template_yaml(TRIAGE_TEMPLATE).await.unwrap();
    let instance = h
        .engine
        .instantiate_workflow(
            &template,
            [("amount".to_string(), json!(100))],
            Default::default(),
        )
        .await
        .unwrap();

    let workers = role_id(&h.storage, &instance, "Workers").await;
    let w1 = actor("actor-w1");
    let w2 = actor("actor-w2");

    // Lease the seed and fan it out into one child shard.
    let seed = h
        .engine
        .checkout_work(&w1, &workers)
        .await
        .unwrap()
        .expect("seed should be leasable");
    assert_eq!(seed.attributes.get("amount"), Some(&json!(100)));

    let children = h
        .engine
        .decompose(&seed.uow_id, &workers, 1, &w1)
        .await
        .unwrap();
    assert_eq!(children.len(), 1);

    // The shard is the only PENDING token; it burns off at the terminal
    // gate (no children of its own) and lands on the Ate Path.
    let shard = h
        .engine
        .checkout_work(&w2, &workers)
        .await
        .unwrap()
        .expect("shard should be leasable");
    assert_eq!(shard.uow_id, children[0]);
    let receipt = h
        .engine
        .submit_work(
            &shard.uow_id,
            &w2,
            [("score".to_string(), json!(0.1))],
            None,
        )
        .await
        .unwrap();
    assert!(
        matches!(receipt.outcome, SubmitOutcome::Halted { ref reason } if reason.starts_with("CERBERUS_BLOCKED")),
        "{receipt:?}"
    );
    let shard_row = load_uow(&h.storage, &shard.uow_id).await;
    assert_eq!(shard_row.status, UowStatus::Failed);
    assert_eq!(
        interaction_name(&h.storage, &instance, &shard_row).await.as_deref(),
        Some("AtePath")
    );

    // Parent now has 1/1 finished children; its submit completes.
    let parent_before = load_uow(&h.storage, &seed.uow_id).await;
    assert_eq!(parent_before.child_count, 1);
    assert_eq!(parent_before.finished_child_count, 1);

    let receipt = h
        .engine
        .submit_work(&seed.uow_id, &w1, [("score".to_string(), json!(0.1))], None)
        .await
        .unwrap();
    assert_eq!(receipt.outcome, SubmitOutcome::Completed);

    let parent = load_uow(&h.storage, &seed.uow_id).await;
    assert_eq!(parent.status, UowStatus::Completed);
    assert_eq!(parent.lease_actor_id, None);
    // Exactly one routing advance: the completing submit.
    assert_eq!(parent.interaction_count, 1);

    // The ledger replays to the stored content hash.
    let history = load_history(&h.storage, &seed.uow_id).await;
    verify_chain(&history, Some(&parent.content_hash)).unwrap();
}

#[tokio::test]
async fn high_risk_fork_routes_by_risk() {
    let h = harness();
    let template = h.engine.import_template_yaml(FORK_TEMPLATE).await.unwrap();

    for (risk, expected_queue) in [(0.95, "Critical_Queue"), (0.2, "Standard_Queue")] {
        let instance = h
            .engine
            .instantiate_workflow(&template, [], Default::default())
            .await
            .unwrap();
        let screeners = role_id(&h.storage, &instance, "Screeners").await;
        let worker = actor("actor-screener");

        let lease = h
            .engine
            .checkout_work(&worker, &screeners)
            .await
            .unwrap()
            .expect("seed should be leasable");
        let receipt = h
            .engine
            .submit_work(
                &lease.uow_id,
                &worker,
                [("risk".to_string(), json!(risk))],
                None,
            )
            .await
            .unwrap();
        assert_eq!(
            receipt.outcome,
            SubmitOutcome::Routed {
                interaction: expected_queue.to_string()
            }
        );

        let row = load_uow(&h.storage, &lease.uow_id).await;
        assert_eq!(row.status, UowStatus::Pending);
        assert_eq!(
            interaction_name(&h.storage, &instance, &row).await.as_deref(),
            Some(expected_queue)
        );
        assert_eq!(row.interaction_count, 1);
    }
}

#[tokio::test]
async fn declared_but_unbound_name_falls_to_on_error_branch() {
    // Scenario: branch 0 references a declared attribute nobody wrote;
    // the error is captured and the on_error branch routes instead.
    let template_yaml = FORK_TEMPLATE.replace(
        r#"              - { condition: "risk > 0.8", action: ROUTE, next_interaction: Critical_Queue }
            default: { action: ROUTE, next_interaction: Standard_Queue }"#,
        r#"              - { condition: "undefined_attr > 0", action: ROUTE, next_interaction: Critical_Queue }
              - { condition: "true", action: ROUTE, next_interaction: Standard_Queue, on_error: true }"#,
    );
    assert_ne!(template_yaml, FORK_TEMPLATE, "fixture edit must apply");

    let h = harness();
    let template = h.engine.import_template_yaml(&template_yaml).await.unwrap();
    let instance = h
        .engine
        .instantiate_workflow(&template, [], Default::default())
        .await
        .unwrap();
    let screeners = role_id(&h.storage, &instance, "Screeners").await;
    let worker = actor("actor-screener");

    let lease = h
        .engine
        .checkout_work(&worker, &screeners)
        .await
        .unwrap()
        .unwrap();
    let receipt = h
        .engine
        .submit_work(&lease.uow_id, &worker, [], None)
        .await
        .unwrap();
    assert_eq!(
        receipt.outcome,
        SubmitOutcome::Routed {
            interaction: "Standard_Queue".to_string()
        }
    );
}

#[tokio::test]
async fn children_inherit_global_blueprint_only() {
    use chrono::Utc;
    use gatewright::attrs::AttributeRecord;
    use gatewright::types::ActorId;

    let h = harness_with(|e| e.with_config(EngineConfig::default().without_park_and_notify()));
    let template = h.engine.import_template_yaml(TRIAGE_TEMPLATE).await.unwrap();
    let instance = h
        .engine
        .instantiate_workflow(
            &template,
            [("amount".to_string(), json!(100))],
            Default::default(),
        )
        .await
        .unwrap();
    let workers = role_id(&h.storage, &instance, "Workers").await;
    let w1 = actor("actor-w1");

    let seed = h.engine.checkout_work(&w1, &workers).await.unwrap().unwrap();

    // A Personal Playbook row on the parent must not cross over.
    common::write_raw_attribute(
        &h.storage,
        AttributeRecord {
            uow_id: seed.uow_id.clone(),
            key: "private_note".to_string(),
            version: 1,
            value: json!("w1 eyes only"),
            owner_actor_id: Some(ActorId::from("actor-w1")),
            author_actor_id: ActorId::from("actor-w1"),
            reasoning: None,
            written_at: Utc::now(),
        },
    )
    .await;

    let children = h
        .engine
        .decompose(&seed.uow_id, &workers, 3, &w1)
        .await
        .unwrap();
    assert_eq!(children.len(), 3);

    for child in &children {
        let attrs = common::load_attributes(&h.storage, child).await;
        assert!(attrs.iter().all(|a| a.owner_actor_id.is_none()));
        let keys: Vec<&str> = attrs.iter().map(|a| a.key.as_str()).collect();
        assert!(keys.contains(&"amount"));
        assert!(!keys.contains(&"private_note"));
    }

    let parent = load_uow(&h.storage, &seed.uow_id).await;
    assert_eq!(parent.child_count, 3);
    assert_eq!(parent.finished_child_count, 0);
}

#[tokio::test]
async fn concurrent_checkouts_grant_exactly_one_lease() {
    let h = harness();
    let template = h.engine.import_template_yaml(FORK_TEMPLATE).await.unwrap();
    let instance = h
        .engine
        .instantiate_workflow(&template, [], Default::default())
        .await
        .unwrap();
    let screeners = role_id(&h.storage, &instance, "Screeners").await;

    let mut handles = Vec::new();
    for i in 0..5 {
        let engine = h.engine.clone();
        let role = screeners.clone();
        handles.push(tokio::spawn(async move {
            let principal = actor(&format!("actor-{i}"));
            engine.checkout_work(&principal, &role).await.unwrap()
        }));
    }
    let mut granted = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            granted += 1;
        }
    }
    assert_eq!(granted, 1, "exactly one checkout must win the lease");
}

#[tokio::test]
async fn submit_without_lease_is_rejected() {
    let h = harness();
    let template = h.engine.import_template_yaml(FORK_TEMPLATE).await.unwrap();
    let instance = h
        .engine
        .instantiate_workflow(&template, [], Default::default())
        .await
        .unwrap();
    let screeners = role_id(&h.storage, &instance, "Screeners").await;

    let owner = actor("actor-owner");
    let impostor = actor("actor-impostor");
    let lease = h
        .engine
        .checkout_work(&owner, &screeners)
        .await
        .unwrap()
        .unwrap();

    let err = h
        .engine
        .submit_work(&lease.uow_id, &impostor, [], None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        gatewright::engine::EngineError::LeaseLost { .. }
    ));
}
