//! Idempotency gate: replay, key-body binding, release on failure, and
//! concurrent callers.

mod common;

use common::*;
use overtime_approval_service::{
    error::{AppError, ConflictDetails},
    services::request_service,
};
use sqlx::PgPool;

#[sqlx::test]
async fn retried_submit_replays_the_original_response(pool: PgPool) {
    let actor = create_employee(&pool, "Avery", "engineer", "finance").await;
    let policy = test_policy();

    let first = request_service::submit(
        &pool,
        policy,
        &actor,
        submit_payload(0, 18, 20, "retry-key"),
        TTL_HOURS,
    )
    .await
    .expect("first call");
    assert!(!first.duplicate);

    // The retried call re-claims nothing: same id, no second row, and no
    // overlap conflict even though the window is identical.
    let second = request_service::submit(
        &pool,
        policy,
        &actor,
        submit_payload(0, 18, 20, "retry-key"),
        TTL_HOURS,
    )
    .await
    .expect("retried call");
    assert!(second.duplicate);
    assert_eq!(second.result.request.id, first.result.request.id);
    assert_eq!(second.result.steps.len(), first.result.steps.len());

    assert_eq!(count_requests(&pool, actor.actor_id).await, 1);
}

#[sqlx::test]
async fn key_reuse_with_a_different_body_is_rejected(pool: PgPool) {
    let actor = create_employee(&pool, "Avery", "engineer", "finance").await;
    let policy = test_policy();

    request_service::submit(
        &pool,
        policy,
        &actor,
        submit_payload(0, 18, 20, "shared-key"),
        TTL_HOURS,
    )
    .await
    .expect("first call");

    // Same key, different window.
    let err = request_service::submit(
        &pool,
        policy,
        &actor,
        submit_payload(1, 18, 20, "shared-key"),
        TTL_HOURS,
    )
    .await
    .expect_err("different body under a used key");
    assert!(matches!(err, AppError::Validation(_)));
}

#[sqlx::test]
async fn keys_are_scoped_per_employee(pool: PgPool) {
    let first = create_employee(&pool, "Avery", "engineer", "finance").await;
    let second = create_employee(&pool, "Blair", "engineer", "finance").await;
    let policy = test_policy();

    request_service::submit(
        &pool,
        policy,
        &first,
        submit_payload(0, 18, 20, "same-key"),
        TTL_HOURS,
    )
    .await
    .expect("first employee");

    // The same key from another employee is a fresh operation.
    let executed = request_service::submit(
        &pool,
        policy,
        &second,
        submit_payload(0, 18, 20, "same-key"),
        TTL_HOURS,
    )
    .await
    .expect("second employee");
    assert!(!executed.duplicate);
}

#[sqlx::test]
async fn a_failed_submit_releases_the_key(pool: PgPool) {
    let actor = create_employee(&pool, "Avery", "engineer", "finance").await;
    let policy = test_policy();

    // 300 minutes: daily cap violation, nothing written.
    request_service::submit(
        &pool,
        policy,
        &actor,
        submit_payload(0, 15, 20, "reusable-key"),
        TTL_HOURS,
    )
    .await
    .expect_err("over the cap");

    // The corrected retry executes under the same key.
    let executed = request_service::submit(
        &pool,
        policy,
        &actor,
        submit_payload(0, 18, 20, "reusable-key"),
        TTL_HOURS,
    )
    .await
    .expect("corrected retry");
    assert!(!executed.duplicate);
}

#[sqlx::test]
async fn empty_key_is_rejected(pool: PgPool) {
    let actor = create_employee(&pool, "Avery", "engineer", "finance").await;

    let err = request_service::submit(
        &pool,
        test_policy(),
        &actor,
        submit_payload(0, 18, 20, "  "),
        TTL_HOURS,
    )
    .await
    .expect_err("blank key");
    assert!(matches!(err, AppError::Validation(_)));
}

#[sqlx::test]
async fn concurrent_calls_execute_the_operation_once(pool: PgPool) {
    let actor = create_employee(&pool, "Avery", "engineer", "finance").await;
    let policy = test_policy();

    let payload = submit_payload(0, 18, 20, "contended-key");
    let (a, b, c) = tokio::join!(
        request_service::submit(&pool, policy, &actor, payload.clone(), TTL_HOURS),
        request_service::submit(&pool, policy, &actor, payload.clone(), TTL_HOURS),
        request_service::submit(&pool, policy, &actor, payload.clone(), TTL_HOURS),
    );

    let mut ids = Vec::new();
    for outcome in [a, b, c] {
        match outcome {
            // Executed or replayed: must be the one request.
            Ok(executed) => ids.push(executed.result.request.id),
            // Arrived while the winner was still in flight; a later retry
            // would replay the cached response.
            Err(AppError::Conflict(ConflictDetails::OperationInFlight)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert!(!ids.is_empty());
    assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(count_requests(&pool, actor.actor_id).await, 1);
}
