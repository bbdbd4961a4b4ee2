//! Maintenance sweeper - background batch jobs over stale rows.
//!
//! Runs on a timer, never in the request path. Three jobs per tick:
//! expiring stale drafts, escalating stalled approval steps, and reclaiming
//! expired idempotency keys.
//!
//! # Locking Discipline
//!
//! Every candidate scan and every per-row lock uses `FOR UPDATE SKIP
//! LOCKED`: a row held by an in-flight user action is skipped this sweep
//! and retried next cycle, never blocked on. Batch sizes are bounded so a
//! single run never holds a large lock set, and each row is transitioned in
//! its own transaction — one row's failure is logged and skipped, never
//! aborting the rest of the batch. Both properties together make the jobs
//! idempotent and safe to run concurrently with live traffic and with each
//! other.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::time::Duration as StdDuration;
use uuid::Uuid;

use crate::{
    config::Config,
    db::DbPool,
    error::AppError,
    models::request::{OvertimeRequest, RequestStatus},
    services::audit_chain,
};

/// Sweeper pacing and age thresholds, extracted from [`Config`].
#[derive(Debug, Clone, Copy)]
pub struct SweeperSettings {
    /// Pause between runs
    pub interval: StdDuration,

    /// Max rows per job per run
    pub batch_size: i64,

    /// DRAFT requests older than this are expired
    pub draft_max_age: Duration,

    /// PENDING steps older than this are skipped
    pub escalation_timeout: Duration,
}

impl SweeperSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: StdDuration::from_secs(config.sweeper_interval_secs),
            batch_size: config.sweeper_batch_size,
            draft_max_age: Duration::hours(config.draft_max_age_hours),
            escalation_timeout: Duration::hours(config.escalation_timeout_hours),
        }
    }
}

/// Spawn the background sweeper task. Call this once at startup.
pub fn spawn(pool: DbPool, settings: SweeperSettings) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(settings.interval);
        loop {
            interval.tick().await;
            run_once(&pool, &settings).await;
        }
    });
}

/// One full sweep. Job failures are independent of each other.
pub async fn run_once(pool: &DbPool, settings: &SweeperSettings) {
    match expire_stale_drafts(pool, settings).await {
        Ok(0) => {}
        Ok(expired) => tracing::info!(rows = expired, "expired stale drafts"),
        Err(err) => tracing::error!("draft expiration sweep failed: {err}"),
    }

    match escalate_stalled_steps(pool, settings).await {
        Ok(0) => {}
        Ok(skipped) => tracing::info!(rows = skipped, "escalated stalled approval steps"),
        Err(err) => tracing::error!("approval escalation sweep failed: {err}"),
    }

    match reclaim_idempotency_keys(pool, settings).await {
        Ok(0) => {}
        Ok(reclaimed) => tracing::info!(rows = reclaimed, "reclaimed expired idempotency keys"),
        Err(err) => tracing::error!("idempotency reclamation sweep failed: {err}"),
    }
}

/// Expire DRAFT requests older than the configured age.
///
/// Returns how many rows were transitioned this run.
pub async fn expire_stale_drafts(
    pool: &DbPool,
    settings: &SweeperSettings,
) -> Result<u64, AppError> {
    let cutoff = Utc::now() - settings.draft_max_age;

    // Candidate scan; rows locked by live transactions are simply not
    // candidates this cycle.
    let candidates: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM overtime_requests
        WHERE status = 'DRAFT'
          AND is_active
          AND created_at < $1
        ORDER BY created_at
        LIMIT $2
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(cutoff)
    .bind(settings.batch_size)
    .fetch_all(pool)
    .await?;

    let mut expired = 0;
    for request_id in candidates {
        match expire_one_draft(pool, request_id, cutoff).await {
            Ok(true) => expired += 1,
            // Raced away: locked elsewhere or no longer a stale draft.
            Ok(false) => {}
            Err(err) => {
                tracing::error!(request_id = %request_id, "failed to expire draft: {err}");
            }
        }
    }

    Ok(expired)
}

/// Transition one stale draft, re-locked and re-checked in its own
/// transaction.
async fn expire_one_draft(
    pool: &DbPool,
    request_id: Uuid,
    cutoff: DateTime<Utc>,
) -> Result<bool, AppError> {
    let mut tx = pool.begin().await?;

    let Some(request) = sqlx::query_as::<_, OvertimeRequest>(
        r#"
        SELECT * FROM overtime_requests
        WHERE id = $1
          AND is_active
          AND status = 'DRAFT'
          AND created_at < $2
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(request_id)
    .bind(cutoff)
    .fetch_optional(&mut *tx)
    .await?
    else {
        return Ok(false);
    };

    sqlx::query(
        r#"
        UPDATE overtime_requests
        SET status = 'EXPIRED',
            row_version = row_version + 1,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(request.id)
    .execute(&mut *tx)
    .await?;

    audit_chain::append(
        &mut tx,
        audit_chain::REQUESTS_TABLE,
        request.id,
        "EXPIRE",
        None,
        json!({
            "status": {"from": "DRAFT", "to": "EXPIRED"},
            "draft_age_cutoff": cutoff,
        }),
    )
    .await?;

    tx.commit().await?;
    Ok(true)
}

/// Skip PENDING steps that stalled past the escalation timeout.
///
/// A request whose last PENDING step gets skipped is itself transitioned
/// to EXPIRED (there is no separate escalation target).
pub async fn escalate_stalled_steps(
    pool: &DbPool,
    settings: &SweeperSettings,
) -> Result<u64, AppError> {
    let cutoff = Utc::now() - settings.escalation_timeout;

    let candidates: Vec<(Uuid, Uuid)> = sqlx::query_as(
        r#"
        SELECT s.id, s.request_id FROM approval_steps s
        JOIN overtime_requests r ON r.id = s.request_id
        WHERE s.status = 'PENDING'
          AND s.created_at < $1
          AND r.status = 'SUBMITTED'
          AND r.is_active
        ORDER BY s.created_at
        LIMIT $2
        FOR UPDATE OF s SKIP LOCKED
        "#,
    )
    .bind(cutoff)
    .bind(settings.batch_size)
    .fetch_all(pool)
    .await?;

    let mut skipped = 0;
    for (step_id, request_id) in candidates {
        match escalate_one_step(pool, step_id, request_id, cutoff).await {
            Ok(true) => skipped += 1,
            Ok(false) => {}
            Err(err) => {
                tracing::error!(step_id = %step_id, "failed to escalate step: {err}");
            }
        }
    }

    Ok(skipped)
}

/// Skip one stalled step.
///
/// Locks the parent request first, matching the approval state machine's
/// lock order, then re-checks the step under its own lock.
async fn escalate_one_step(
    pool: &DbPool,
    step_id: Uuid,
    request_id: Uuid,
    cutoff: DateTime<Utc>,
) -> Result<bool, AppError> {
    let mut tx = pool.begin().await?;

    let Some(request) = sqlx::query_as::<_, OvertimeRequest>(
        r#"
        SELECT * FROM overtime_requests
        WHERE id = $1
          AND is_active
          AND status = 'SUBMITTED'
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(request_id)
    .fetch_optional(&mut *tx)
    .await?
    else {
        return Ok(false);
    };

    let step_still_stalled: Option<i32> = sqlx::query_scalar(
        r#"
        SELECT step_order FROM approval_steps
        WHERE id = $1
          AND status = 'PENDING'
          AND created_at < $2
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(step_id)
    .bind(cutoff)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(step_order) = step_still_stalled else {
        return Ok(false);
    };

    sqlx::query(
        r#"
        UPDATE approval_steps
        SET status = 'SKIPPED',
            decided_at = NOW(),
            comment = 'auto-skipped after escalation timeout',
            row_version = row_version + 1,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(step_id)
    .execute(&mut *tx)
    .await?;

    audit_chain::append(
        &mut tx,
        audit_chain::STEPS_TABLE,
        step_id,
        "SKIP_STEP",
        None,
        json!({
            "step_order": step_order,
            "status": {"from": "PENDING", "to": "SKIPPED"},
            "stalled_since_before": cutoff,
        }),
    )
    .await?;

    let next_pending: Option<i32> = sqlx::query_scalar(
        "SELECT MIN(step_order) FROM approval_steps WHERE request_id = $1 AND status = 'PENDING'",
    )
    .bind(request_id)
    .fetch_one(&mut *tx)
    .await?;

    match next_pending {
        Some(next_order) => {
            sqlx::query(
                r#"
                UPDATE overtime_requests
                SET current_level = $1,
                    row_version = row_version + 1,
                    updated_at = NOW()
                WHERE id = $2
                "#,
            )
            .bind(next_order)
            .bind(request_id)
            .execute(&mut *tx)
            .await?;

            audit_chain::append(
                &mut tx,
                audit_chain::REQUESTS_TABLE,
                request_id,
                "ADVANCE",
                None,
                json!({
                    "current_level": {"from": request.current_level, "to": next_order},
                    "skipped_step": step_order,
                }),
            )
            .await?;
        }
        None => {
            // The skip emptied the PENDING set: the whole chain stalled out.
            sqlx::query(
                r#"
                UPDATE overtime_requests
                SET status = $1,
                    row_version = row_version + 1,
                    updated_at = NOW()
                WHERE id = $2
                "#,
            )
            .bind(RequestStatus::Expired)
            .bind(request_id)
            .execute(&mut *tx)
            .await?;

            audit_chain::append(
                &mut tx,
                audit_chain::REQUESTS_TABLE,
                request_id,
                "EXPIRE",
                None,
                json!({
                    "status": {"from": "SUBMITTED", "to": "EXPIRED"},
                    "skipped_step": step_order,
                }),
            )
            .await?;
        }
    }

    tx.commit().await?;
    Ok(true)
}

/// Delete idempotency records past their TTL.
///
/// Includes crashed in-flight placeholders: a row stuck in `in_flight`
/// only becomes reclaimable once its TTL passes, which keeps the
/// at-most-once guarantee for live retries while still freeing keys after
/// a crash.
pub async fn reclaim_idempotency_keys(
    pool: &DbPool,
    settings: &SweeperSettings,
) -> Result<u64, AppError> {
    let deleted = sqlx::query(
        r#"
        DELETE FROM idempotency_keys
        WHERE id IN (
            SELECT id FROM idempotency_keys
            WHERE expires_at < NOW()
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        "#,
    )
    .bind(settings.batch_size)
    .execute(pool)
    .await?;

    Ok(deleted.rows_affected())
}
