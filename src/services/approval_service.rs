//! Approval state machine - advancing and closing approval chains.
//!
//! `decide` is the only code path that mutates step and request status
//! after submission. Everything happens inside one transaction: step
//! lookup, authorization, version check, step update, request update and
//! both audit appends — any failure rolls back all of it.
//!
//! # Concurrency
//!
//! The parent request row is locked first, so all decisions on one chain
//! serialize. The optimistic `expected_row_version` check turns "two
//! approvers click simultaneously" into one success and one clean 409: the
//! second transaction waits on the row lock, then sees the bumped version.

use serde_json::json;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::{AppError, ConflictDetails},
    middleware::auth::ActorContext,
    models::{
        approval_step::{
            ApprovalStep, DecideStepRequest, DecisionResponse, DecisionVerdict, StepStatus,
        },
        request::{OvertimeRequest, RequestStatus},
    },
    services::audit_chain,
};

/// Decide one approval step.
///
/// # Rules
///
/// - Only the step's assigned approver (fixed employee or role match) may
///   decide it
/// - Only the lowest-order PENDING step is eligible
/// - A terminal step cannot be re-decided
/// - A supplied `expected_row_version` must match the request row before
///   anything is touched
/// - REJECTED closes the whole chain: the request goes terminal no matter
///   how many steps remain
/// - The final APPROVED decision sets the request to APPROVED with
///   `current_level = max_level`
///
/// Every mutation increments the affected `row_version` by exactly 1 and
/// appends one audit entry for that entity, computed inside this same
/// transaction.
pub async fn decide(
    pool: &DbPool,
    actor: &ActorContext,
    request_id: Uuid,
    step_order: i32,
    payload: DecideStepRequest,
) -> Result<DecisionResponse, AppError> {
    let mut tx = pool.begin().await?;

    // Lock the parent first: decisions on one chain serialize here.
    let request = sqlx::query_as::<_, OvertimeRequest>(
        "SELECT * FROM overtime_requests WHERE id = $1 AND is_active FOR UPDATE",
    )
    .bind(request_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("request"))?;

    // Optimistic lock, checked before any row is touched.
    if let Some(expected) = payload.expected_row_version {
        if expected != request.row_version {
            return Err(AppError::Conflict(ConflictDetails::VersionMismatch {
                expected,
                actual: request.row_version,
            }));
        }
    }

    // A terminal request accepts no more decisions; a DRAFT has no chain yet.
    if request.status != RequestStatus::Submitted {
        return Err(AppError::Conflict(ConflictDetails::ChainClosed {
            request_status: request.status,
        }));
    }

    let step = sqlx::query_as::<_, ApprovalStep>(
        "SELECT * FROM approval_steps WHERE request_id = $1 AND step_order = $2 FOR UPDATE",
    )
    .bind(request_id)
    .bind(step_order)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("approval step"))?;

    if step.status.is_terminal() {
        return Err(AppError::Conflict(ConflictDetails::StepAlreadyDecided {
            current_status: step.status,
        }));
    }

    // Sequential chains: only the lowest-order PENDING step is decidable.
    let active_order: Option<i32> = sqlx::query_scalar(
        "SELECT MIN(step_order) FROM approval_steps WHERE request_id = $1 AND status = 'PENDING'",
    )
    .bind(request_id)
    .fetch_one(&mut *tx)
    .await?;

    if active_order != Some(step.step_order) {
        return Err(AppError::Conflict(ConflictDetails::StepNotEligible {
            active_order,
        }));
    }

    if !step.approver.matches(actor.actor_id, &actor.role) {
        return Err(AppError::Authorization(
            "you are not the approver for this step".to_string(),
        ));
    }

    let new_step_status = match payload.decision {
        DecisionVerdict::Approved => StepStatus::Approved,
        DecisionVerdict::Rejected => StepStatus::Rejected,
    };

    let updated_step = sqlx::query_as::<_, ApprovalStep>(
        r#"
        UPDATE approval_steps
        SET status = $1,
            decided_by = $2,
            decided_at = NOW(),
            comment = $3,
            row_version = row_version + 1,
            updated_at = NOW()
        WHERE id = $4
        RETURNING *
        "#,
    )
    .bind(new_step_status)
    .bind(actor.actor_id)
    .bind(&payload.comment)
    .bind(step.id)
    .fetch_one(&mut *tx)
    .await?;

    let step_action = match payload.decision {
        DecisionVerdict::Approved => "APPROVE_STEP",
        DecisionVerdict::Rejected => "REJECT_STEP",
    };
    audit_chain::append(
        &mut tx,
        audit_chain::STEPS_TABLE,
        updated_step.id,
        step_action,
        Some(actor.actor_id),
        json!({
            "step_order": updated_step.step_order,
            "status": {"from": "PENDING", "to": updated_step.status},
            "comment": updated_step.comment,
        }),
    )
    .await?;

    // Advance (or close) the parent request.
    let next_pending: Option<i32> = sqlx::query_scalar(
        "SELECT MIN(step_order) FROM approval_steps WHERE request_id = $1 AND status = 'PENDING'",
    )
    .bind(request_id)
    .fetch_one(&mut *tx)
    .await?;

    let (updated_request, is_final) = match (payload.decision, next_pending) {
        // A single rejection is terminal for the whole chain.
        (DecisionVerdict::Rejected, _) => {
            let updated = transition_request(&mut tx, request.id, RequestStatus::Rejected, None).await?;
            audit_chain::append(
                &mut tx,
                audit_chain::REQUESTS_TABLE,
                updated.id,
                "REJECT",
                Some(actor.actor_id),
                json!({
                    "status": {"from": "SUBMITTED", "to": "REJECTED"},
                    "rejected_at_step": updated_step.step_order,
                }),
            )
            .await?;
            (updated, true)
        }
        (DecisionVerdict::Approved, None) => {
            let updated = transition_request(
                &mut tx,
                request.id,
                RequestStatus::Approved,
                Some(request.max_level),
            )
            .await?;
            audit_chain::append(
                &mut tx,
                audit_chain::REQUESTS_TABLE,
                updated.id,
                "APPROVE",
                Some(actor.actor_id),
                json!({
                    "status": {"from": "SUBMITTED", "to": "APPROVED"},
                    "current_level": {"from": request.current_level, "to": updated.current_level},
                }),
            )
            .await?;
            (updated, true)
        }
        (DecisionVerdict::Approved, Some(next_order)) => {
            let updated = sqlx::query_as::<_, OvertimeRequest>(
                r#"
                UPDATE overtime_requests
                SET current_level = $1,
                    row_version = row_version + 1,
                    updated_at = NOW()
                WHERE id = $2
                RETURNING *
                "#,
            )
            .bind(next_order)
            .bind(request.id)
            .fetch_one(&mut *tx)
            .await?;
            audit_chain::append(
                &mut tx,
                audit_chain::REQUESTS_TABLE,
                updated.id,
                "ADVANCE",
                Some(actor.actor_id),
                json!({
                    "current_level": {"from": request.current_level, "to": updated.current_level},
                }),
            )
            .await?;
            (updated, false)
        }
    };

    tx.commit().await?;

    tracing::info!(
        request_id = %request.id,
        step_order,
        decision = ?payload.decision,
        is_final,
        "approval step decided"
    );

    Ok(DecisionResponse {
        step: updated_step.into(),
        request: updated_request.into(),
        is_final,
    })
}

/// Move a request to a new status, bumping its version by exactly 1.
async fn transition_request(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    request_id: Uuid,
    status: RequestStatus,
    current_level: Option<i32>,
) -> Result<OvertimeRequest, AppError> {
    let request = sqlx::query_as::<_, OvertimeRequest>(
        r#"
        UPDATE overtime_requests
        SET status = $1,
            current_level = COALESCE($2, current_level),
            row_version = row_version + 1,
            updated_at = NOW()
        WHERE id = $3
        RETURNING *
        "#,
    )
    .bind(status)
    .bind(current_level)
    .bind(request_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(request)
}
