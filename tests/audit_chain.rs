//! Audit chain integrity: linkage after real operation sequences and
//! tamper detection.

mod common;

use common::*;
use overtime_approval_service::{
    models::{
        approval_step::{DecideStepRequest, DecisionVerdict},
        audit_entry::ChainVerification,
    },
    services::{approval_service, audit_chain, request_service},
};
use sqlx::PgPool;
use uuid::Uuid;

fn decision(verdict: DecisionVerdict) -> DecideStepRequest {
    DecideStepRequest {
        decision: verdict,
        comment: None,
        expected_row_version: None,
    }
}

#[sqlx::test]
async fn chains_stay_valid_through_an_operation_sequence(pool: PgPool) {
    let owner = create_employee(&pool, "Avery", "engineer", "finance").await;
    let (supervisor, manager, _) = create_fallback_approvers(&pool, "finance").await;

    let created = request_service::submit(
        &pool,
        test_policy(),
        &owner,
        submit_payload(0, 18, 20, "key-audit"),
        TTL_HOURS,
    )
    .await
    .expect("submit")
    .result;
    let request_id = created.request.id;

    approval_service::decide(
        &pool,
        &supervisor,
        request_id,
        1,
        decision(DecisionVerdict::Approved),
    )
    .await
    .expect("approve step 1");

    approval_service::decide(
        &pool,
        &manager,
        request_id,
        2,
        decision(DecisionVerdict::Rejected),
    )
    .await
    .expect("reject step 2");

    // Request chain: CREATE, ADVANCE, REJECT.
    let verification =
        audit_chain::verify_chain(&pool, audit_chain::REQUESTS_TABLE, request_id)
            .await
            .expect("verify request chain");
    assert_eq!(verification, ChainVerification::Valid { length: 3 });

    // Each decided step carries its own one-entry chain.
    for step in &created.steps[..2] {
        let verification = audit_chain::verify_chain(&pool, audit_chain::STEPS_TABLE, step.id)
            .await
            .expect("verify step chain");
        assert_eq!(verification, ChainVerification::Valid { length: 1 });
    }
}

#[sqlx::test]
async fn entries_link_previous_hash_to_content_hash(pool: PgPool) {
    let owner = create_employee(&pool, "Avery", "engineer", "finance").await;
    let (supervisor, _, _) = create_fallback_approvers(&pool, "finance").await;

    let created = request_service::submit(
        &pool,
        test_policy(),
        &owner,
        submit_payload(0, 18, 20, "key-links"),
        TTL_HOURS,
    )
    .await
    .expect("submit")
    .result;

    approval_service::decide(
        &pool,
        &supervisor,
        created.request.id,
        1,
        decision(DecisionVerdict::Approved),
    )
    .await
    .expect("approve step 1");

    let entries =
        audit_chain::list_entries(&pool, audit_chain::REQUESTS_TABLE, created.request.id)
            .await
            .expect("list entries");

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].seq, 1);
    assert_eq!(entries[0].previous_hash, None);
    assert_eq!(entries[0].action, "CREATE");
    assert_eq!(entries[1].seq, 2);
    assert_eq!(
        entries[1].previous_hash.as_deref(),
        Some(entries[0].content_hash.as_str())
    );
}

#[sqlx::test]
async fn a_tampered_diff_breaks_the_chain(pool: PgPool) {
    let owner = create_employee(&pool, "Avery", "engineer", "finance").await;
    let (supervisor, _, _) = create_fallback_approvers(&pool, "finance").await;

    let created = request_service::submit(
        &pool,
        test_policy(),
        &owner,
        submit_payload(0, 18, 20, "key-tamper"),
        TTL_HOURS,
    )
    .await
    .expect("submit")
    .result;
    let request_id = created.request.id;

    approval_service::decide(
        &pool,
        &supervisor,
        request_id,
        1,
        decision(DecisionVerdict::Approved),
    )
    .await
    .expect("approve step 1");

    // Doctor the first entry's payload behind the recorder's back.
    sqlx::query(
        r#"
        UPDATE audit_entries
        SET diff = '{"reason": "doctored"}'::jsonb
        WHERE entity_table = $1 AND entity_id = $2 AND seq = 1
        "#,
    )
    .bind(audit_chain::REQUESTS_TABLE)
    .bind(request_id)
    .execute(&pool)
    .await
    .expect("tamper");

    let verification = audit_chain::verify_chain(&pool, audit_chain::REQUESTS_TABLE, request_id)
        .await
        .expect("verify");
    match verification {
        ChainVerification::BrokenAt { seq, .. } => assert_eq!(seq, 1),
        other => panic!("expected a broken chain, got {other:?}"),
    }
}

#[sqlx::test]
async fn a_rewritten_hash_breaks_the_link_to_the_next_entry(pool: PgPool) {
    let owner = create_employee(&pool, "Avery", "engineer", "finance").await;
    let (supervisor, _, _) = create_fallback_approvers(&pool, "finance").await;

    let created = request_service::submit(
        &pool,
        test_policy(),
        &owner,
        submit_payload(0, 18, 20, "key-rewrite"),
        TTL_HOURS,
    )
    .await
    .expect("submit")
    .result;
    let request_id = created.request.id;

    approval_service::decide(
        &pool,
        &supervisor,
        request_id,
        1,
        decision(DecisionVerdict::Approved),
    )
    .await
    .expect("approve step 1");

    // Rewriting entry 1 consistently (diff + recomputed hash) still breaks
    // entry 2's back-link.
    let doctored = serde_json::json!({"reason": "doctored"});
    let new_hash = overtime_approval_service::models::audit_entry::content_hash(
        "CREATE", None, &doctored, None,
    );
    sqlx::query(
        r#"
        UPDATE audit_entries
        SET diff = $1, actor_id = NULL, content_hash = $2
        WHERE entity_table = $3 AND entity_id = $4 AND seq = 1
        "#,
    )
    .bind(&doctored)
    .bind(&new_hash)
    .bind(audit_chain::REQUESTS_TABLE)
    .bind(request_id)
    .execute(&pool)
    .await
    .expect("tamper consistently");

    let verification = audit_chain::verify_chain(&pool, audit_chain::REQUESTS_TABLE, request_id)
        .await
        .expect("verify");
    match verification {
        ChainVerification::BrokenAt { seq, .. } => assert_eq!(seq, 2),
        other => panic!("expected a broken chain, got {other:?}"),
    }
}

#[sqlx::test]
async fn an_empty_chain_verifies_as_valid(pool: PgPool) {
    let verification =
        audit_chain::verify_chain(&pool, audit_chain::REQUESTS_TABLE, Uuid::new_v4())
            .await
            .expect("verify");
    assert_eq!(verification, ChainVerification::Valid { length: 0 });
}
