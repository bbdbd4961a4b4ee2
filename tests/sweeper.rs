//! Maintenance sweeper: draft expiration, approval escalation and
//! idempotency reclamation.

mod common;

use chrono::Duration;
use common::*;
use overtime_approval_service::{
    models::{
        approval_step::StepStatus,
        audit_entry::ChainVerification,
        request::{OvertimeRequest, RequestStatus},
    },
    services::{audit_chain, request_service, sweeper::{self, SweeperSettings}},
};
use sqlx::PgPool;
use std::time::Duration as StdDuration;
use uuid::Uuid;

fn settings() -> SweeperSettings {
    SweeperSettings {
        interval: StdDuration::from_secs(300),
        batch_size: 100,
        draft_max_age: Duration::hours(48),
        escalation_timeout: Duration::hours(72),
    }
}

async fn backdate_request(pool: &PgPool, request_id: Uuid, hours: i64) {
    sqlx::query(
        "UPDATE overtime_requests SET created_at = created_at - make_interval(hours => $1) WHERE id = $2",
    )
    .bind(hours as i32)
    .bind(request_id)
    .execute(pool)
    .await
    .expect("backdate request");
}

async fn backdate_steps(pool: &PgPool, request_id: Uuid, hours: i64) {
    sqlx::query(
        "UPDATE approval_steps SET created_at = created_at - make_interval(hours => $1) WHERE request_id = $2",
    )
    .bind(hours as i32)
    .bind(request_id)
    .execute(pool)
    .await
    .expect("backdate steps");
}

async fn fetch_request(pool: &PgPool, request_id: Uuid) -> OvertimeRequest {
    sqlx::query_as("SELECT * FROM overtime_requests WHERE id = $1")
        .bind(request_id)
        .fetch_one(pool)
        .await
        .expect("fetch request")
}

#[sqlx::test]
async fn stale_drafts_expire_with_an_audit_entry(pool: PgPool) {
    let actor = create_employee(&pool, "Avery", "engineer", "finance").await;

    let draft = request_service::save_draft(&pool, &actor, draft_payload(0, 18, 20))
        .await
        .expect("save draft");
    backdate_request(&pool, draft.id, 100).await;

    let expired = sweeper::expire_stale_drafts(&pool, &settings())
        .await
        .expect("sweep");
    assert_eq!(expired, 1);

    let request = fetch_request(&pool, draft.id).await;
    assert_eq!(request.status, RequestStatus::Expired);
    assert_eq!(request.row_version, draft.row_version + 1);

    let entries = audit_chain::list_entries(&pool, audit_chain::REQUESTS_TABLE, draft.id)
        .await
        .expect("list entries");
    assert_eq!(entries.last().map(|e| e.action.as_str()), Some("EXPIRE"));
    assert_eq!(entries.last().and_then(|e| e.actor_id), None);

    let verification = audit_chain::verify_chain(&pool, audit_chain::REQUESTS_TABLE, draft.id)
        .await
        .expect("verify");
    assert!(matches!(verification, ChainVerification::Valid { .. }));

    // An expired draft releases its window.
    request_service::submit(
        &pool,
        test_policy(),
        &actor,
        submit_payload(0, 18, 20, "key-reclaimed-window"),
        TTL_HOURS,
    )
    .await
    .expect("window reclaimed");
}

#[sqlx::test]
async fn fresh_drafts_are_left_alone(pool: PgPool) {
    let actor = create_employee(&pool, "Avery", "engineer", "finance").await;

    let draft = request_service::save_draft(&pool, &actor, draft_payload(0, 18, 20))
        .await
        .expect("save draft");

    let expired = sweeper::expire_stale_drafts(&pool, &settings())
        .await
        .expect("sweep");
    assert_eq!(expired, 0);

    let request = fetch_request(&pool, draft.id).await;
    assert_eq!(request.status, RequestStatus::Draft);
}

#[sqlx::test]
async fn a_fully_stalled_chain_expires_the_request(pool: PgPool) {
    let actor = create_employee(&pool, "Avery", "engineer", "finance").await;

    let created = request_service::submit(
        &pool,
        test_policy(),
        &actor,
        submit_payload(0, 18, 20, "key-stalled"),
        TTL_HOURS,
    )
    .await
    .expect("submit")
    .result;
    backdate_steps(&pool, created.request.id, 100).await;

    let skipped = sweeper::escalate_stalled_steps(&pool, &settings())
        .await
        .expect("sweep");
    assert_eq!(skipped, 3);

    let request = fetch_request(&pool, created.request.id).await;
    assert_eq!(request.status, RequestStatus::Expired);

    let statuses: Vec<StepStatus> = sqlx::query_scalar(
        "SELECT status FROM approval_steps WHERE request_id = $1 ORDER BY step_order",
    )
    .bind(created.request.id)
    .fetch_all(&pool)
    .await
    .expect("step statuses");
    assert_eq!(statuses, vec![StepStatus::Skipped; 3]);

    // Every chain the sweep touched still verifies.
    let verification =
        audit_chain::verify_chain(&pool, audit_chain::REQUESTS_TABLE, created.request.id)
            .await
            .expect("verify request chain");
    assert!(matches!(verification, ChainVerification::Valid { .. }));
    for step in &created.steps {
        let verification = audit_chain::verify_chain(&pool, audit_chain::STEPS_TABLE, step.id)
            .await
            .expect("verify step chain");
        assert_eq!(verification, ChainVerification::Valid { length: 1 });
    }
}

#[sqlx::test]
async fn a_single_stalled_step_advances_the_chain(pool: PgPool) {
    let actor = create_employee(&pool, "Avery", "engineer", "finance").await;

    let created = request_service::submit(
        &pool,
        test_policy(),
        &actor,
        submit_payload(0, 18, 20, "key-one-stalled"),
        TTL_HOURS,
    )
    .await
    .expect("submit")
    .result;

    // Only step 1 stalled past the timeout.
    sqlx::query(
        r#"
        UPDATE approval_steps
        SET created_at = created_at - make_interval(hours => 100)
        WHERE request_id = $1 AND step_order = 1
        "#,
    )
    .bind(created.request.id)
    .execute(&pool)
    .await
    .expect("backdate step 1");

    let skipped = sweeper::escalate_stalled_steps(&pool, &settings())
        .await
        .expect("sweep");
    assert_eq!(skipped, 1);

    let request = fetch_request(&pool, created.request.id).await;
    assert_eq!(request.status, RequestStatus::Submitted);
    assert_eq!(request.current_level, 2);

    let step_one_status: StepStatus = sqlx::query_scalar(
        "SELECT status FROM approval_steps WHERE request_id = $1 AND step_order = 1",
    )
    .bind(created.request.id)
    .fetch_one(&pool)
    .await
    .expect("step 1 status");
    assert_eq!(step_one_status, StepStatus::Skipped);
}

#[sqlx::test]
async fn expired_idempotency_keys_are_reclaimed(pool: PgPool) {
    let actor = create_employee(&pool, "Avery", "engineer", "finance").await;
    let policy = test_policy();

    request_service::submit(
        &pool,
        policy,
        &actor,
        submit_payload(0, 18, 20, "old-key"),
        TTL_HOURS,
    )
    .await
    .expect("submit");

    sqlx::query("UPDATE idempotency_keys SET expires_at = NOW() - INTERVAL '1 hour'")
        .execute(&pool)
        .await
        .expect("expire key");

    let reclaimed = sweeper::reclaim_idempotency_keys(&pool, &settings())
        .await
        .expect("sweep");
    assert_eq!(reclaimed, 1);

    // The key is usable again; with a fresh window it executes a new
    // submission instead of replaying.
    let executed = request_service::submit(
        &pool,
        policy,
        &actor,
        submit_payload(1, 18, 20, "old-key"),
        TTL_HOURS,
    )
    .await
    .expect("reused key after reclamation");
    assert!(!executed.duplicate);
}

#[sqlx::test]
async fn live_keys_are_not_reclaimed(pool: PgPool) {
    let actor = create_employee(&pool, "Avery", "engineer", "finance").await;

    request_service::submit(
        &pool,
        test_policy(),
        &actor,
        submit_payload(0, 18, 20, "live-key"),
        TTL_HOURS,
    )
    .await
    .expect("submit");

    let reclaimed = sweeper::reclaim_idempotency_keys(&pool, &settings())
        .await
        .expect("sweep");
    assert_eq!(reclaimed, 0);
}
