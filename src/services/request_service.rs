//! Request lifecycle manager - creation and owner-side transitions.
//!
//! This service handles:
//! - Submitting overtime requests (validation, reservation, chain creation)
//! - Saving and promoting drafts
//! - Owner cancellation
//!
//! # Atomicity Guarantees
//!
//! Every write path runs inside one PostgreSQL transaction: interval
//! reservation, the request row, its approval steps and the audit entry
//! either all commit or all roll back. Submission is additionally wrapped
//! by the idempotency gate, so a retried call replays the original result
//! instead of claiming a second window.

use chrono::{Datelike, Duration, NaiveDate, Utc, Weekday};
use serde_json::json;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::{
    config::OvertimePolicy,
    db::DbPool,
    error::{AppError, ConflictDetails, RuleViolation},
    middleware::auth::ActorContext,
    models::{
        approval_step::{ApprovalStep, ChainTemplateStep},
        request::{
            DraftOvertimeRequest, OvertimeRequest, RequestResponse, RequestStatus,
            RequestWithSteps, SubmitOvertimeRequest, Window,
        },
    },
    services::{
        audit_chain,
        idempotency::{self, Executed},
        interval_store,
    },
};

/// Operation signature stored with submit idempotency keys.
pub const SUBMIT_SIGNATURE: &str = "POST /api/v1/requests";

/// Accumulated overtime minutes already claimed by an employee.
#[derive(Debug, Clone, Copy)]
pub struct UsageTotals {
    /// Minutes on the same calendar day as the new window
    pub day_minutes: i64,

    /// Minutes in the same cap week as the new window
    pub week_minutes: i64,
}

/// First and last day (inclusive) of the cap week containing `date`.
///
/// The week boundary is policy, not a constant: `week_starts_on` comes from
/// configuration.
pub fn week_bounds(date: NaiveDate, week_starts_on: Weekday) -> (NaiveDate, NaiveDate) {
    let offset = (7 + date.weekday().num_days_from_monday() as i64
        - week_starts_on.num_days_from_monday() as i64)
        % 7;
    let start = date - Duration::days(offset);
    (start, start + Duration::days(6))
}

/// Evaluate the overtime policy rules for a new window.
///
/// Collects *every* violated rule instead of stopping at the first, so the
/// caller can report all of them in one round trip. Pure function: the
/// aggregates come in via [`UsageTotals`], which keeps the rules testable
/// without a database.
pub fn evaluate_rules(
    policy: &OvertimePolicy,
    window: &Window,
    totals: &UsageTotals,
    today: NaiveDate,
) -> Vec<RuleViolation> {
    let mut violations = Vec::new();
    let requested = window.duration_minutes();

    let day_total = totals.day_minutes + requested;
    if day_total > policy.daily_cap_minutes {
        violations.push(RuleViolation {
            rule: "daily_cap_exceeded",
            message: format!(
                "daily overtime cap is {} minutes; this submission would reach {}",
                policy.daily_cap_minutes, day_total
            ),
            limit_minutes: Some(policy.daily_cap_minutes),
            actual_minutes: Some(day_total),
        });
    }

    let week_total = totals.week_minutes + requested;
    if week_total > policy.weekly_cap_minutes {
        violations.push(RuleViolation {
            rule: "weekly_cap_exceeded",
            message: format!(
                "weekly overtime cap is {} minutes; this submission would reach {}",
                policy.weekly_cap_minutes, week_total
            ),
            limit_minutes: Some(policy.weekly_cap_minutes),
            actual_minutes: Some(week_total),
        });
    }

    let days_late = (today - window.work_date()).num_days();
    if days_late > policy.submission_deadline_days {
        violations.push(RuleViolation {
            rule: "submission_deadline_passed",
            message: format!(
                "submissions are accepted up to {} days after the work date; this one is {} days late",
                policy.submission_deadline_days, days_late
            ),
            limit_minutes: None,
            actual_minutes: None,
        });
    }

    violations
}

/// Sum existing claims on the window's day and week.
///
/// Counts active rows in any state that still holds a window (DRAFT,
/// SUBMITTED, APPROVED), excluding `exclude_id` so a draft being promoted
/// does not count against itself.
async fn load_usage_totals(
    tx: &mut Transaction<'_, Postgres>,
    employee_id: Uuid,
    window: &Window,
    week: (NaiveDate, NaiveDate),
    exclude_id: Option<Uuid>,
) -> Result<UsageTotals, AppError> {
    let day_minutes: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(duration_minutes), 0)::BIGINT FROM overtime_requests
        WHERE employee_id = $1
          AND is_active
          AND status NOT IN ('REJECTED', 'CANCELED', 'EXPIRED')
          AND work_date = $2
          AND ($3::uuid IS NULL OR id <> $3)
        "#,
    )
    .bind(employee_id)
    .bind(window.work_date())
    .bind(exclude_id)
    .fetch_one(&mut **tx)
    .await?;

    let week_minutes: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(duration_minutes), 0)::BIGINT FROM overtime_requests
        WHERE employee_id = $1
          AND is_active
          AND status NOT IN ('REJECTED', 'CANCELED', 'EXPIRED')
          AND work_date BETWEEN $2 AND $3
          AND ($4::uuid IS NULL OR id <> $4)
        "#,
    )
    .bind(employee_id)
    .bind(week.0)
    .bind(week.1)
    .bind(exclude_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(UsageTotals {
        day_minutes,
        week_minutes,
    })
}

/// Resolve the approval chain for a department.
///
/// A missing or empty template falls back to the deterministic three-step
/// default; so does a failed lookup — chain configuration problems must
/// never abort a submission. Runs on the pool, before the write
/// transaction opens, so a lookup error cannot poison it. Step orders are
/// renumbered 1..N to tolerate gaps in the template.
async fn resolve_chain(pool: &DbPool, department: &str) -> Vec<ChainTemplateStep> {
    let looked_up = sqlx::query_as::<_, ChainTemplateStep>(
        r#"
        SELECT step_order, approver_kind, approver_user_id, approver_role
        FROM approval_chain_templates
        WHERE department = $1
        ORDER BY step_order
        "#,
    )
    .bind(department)
    .fetch_all(pool)
    .await;

    let chain = match looked_up {
        Ok(rows) if !rows.is_empty() => rows,
        Ok(_) => {
            tracing::warn!(department, "no approval chain configured; using fallback chain");
            ChainTemplateStep::fallback_chain()
        }
        Err(err) => {
            tracing::warn!(department, "approval chain lookup failed ({err}); using fallback chain");
            ChainTemplateStep::fallback_chain()
        }
    };

    chain
        .into_iter()
        .enumerate()
        .map(|(index, step)| ChainTemplateStep {
            step_order: index as i32 + 1,
            approver: step.approver,
        })
        .collect()
}

/// Insert the full chain for a request. All steps start PENDING.
async fn insert_steps(
    tx: &mut Transaction<'_, Postgres>,
    request_id: Uuid,
    chain: &[ChainTemplateStep],
) -> Result<Vec<ApprovalStep>, AppError> {
    let mut steps = Vec::with_capacity(chain.len());

    for template in chain {
        let (kind, approver_user_id, approver_role) = template.approver.to_columns();

        let step = sqlx::query_as::<_, ApprovalStep>(
            r#"
            INSERT INTO approval_steps (
                request_id,
                step_order,
                approver_kind,
                approver_user_id,
                approver_role
            )
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(request_id)
        .bind(template.step_order)
        .bind(kind)
        .bind(approver_user_id)
        .bind(approver_role)
        .fetch_one(&mut **tx)
        .await?;

        steps.push(step);
    }

    Ok(steps)
}

/// Submit a new overtime request, wrapped by the idempotency gate.
///
/// A retried call with the same key returns the original result without
/// re-validating or re-writing anything.
pub async fn submit(
    pool: &DbPool,
    policy: OvertimePolicy,
    actor: &ActorContext,
    payload: SubmitOvertimeRequest,
    idempotency_ttl_hours: i64,
) -> Result<Executed<RequestWithSteps>, AppError> {
    // The body hash covers the operation parameters, not the key itself.
    let body = json!({
        "starts_at": payload.starts_at,
        "ends_at": payload.ends_at,
        "reason": payload.reason,
    });

    idempotency::execute(
        pool,
        &payload.idempotency_key,
        actor.actor_id,
        SUBMIT_SIGNATURE,
        &body,
        idempotency_ttl_hours,
        || submit_once(pool, policy, actor, &payload),
    )
    .await
}

/// The underlying submit operation, executed at most once per key.
///
/// # Process
///
/// 1. Validate window shape (400 on malformed input)
/// 2. Resolve the department's approval chain (fallback never aborts)
/// 3. In one transaction: check the policy rules (422 listing every
///    violation), reserve the interval (409 listing conflicting ids),
///    insert the request and all its steps, append the CREATE audit entry
async fn submit_once(
    pool: &DbPool,
    policy: OvertimePolicy,
    actor: &ActorContext,
    payload: &SubmitOvertimeRequest,
) -> Result<RequestWithSteps, AppError> {
    let window = payload.window();
    window.validate().map_err(AppError::Validation)?;

    let chain = resolve_chain(pool, &actor.department).await;

    let mut tx = pool.begin().await?;

    let week = week_bounds(window.work_date(), policy.week_starts_on);
    let totals = load_usage_totals(&mut tx, actor.actor_id, &window, week, None).await?;
    let violations = evaluate_rules(&policy, &window, &totals, Utc::now().date_naive());
    if !violations.is_empty() {
        return Err(AppError::BusinessRule(violations));
    }

    interval_store::try_reserve(&mut tx, actor.actor_id, &window, None).await?;

    let request = sqlx::query_as::<_, OvertimeRequest>(
        r#"
        INSERT INTO overtime_requests (
            employee_id,
            starts_at,
            ends_at,
            work_date,
            duration_minutes,
            reason,
            status,
            current_level,
            max_level
        )
        VALUES ($1, $2, $3, $4, $5, $6, 'SUBMITTED', 1, $7)
        RETURNING *
        "#,
    )
    .bind(actor.actor_id)
    .bind(window.starts_at)
    .bind(window.ends_at)
    .bind(window.work_date())
    .bind(window.duration_minutes())
    .bind(&payload.reason)
    .bind(chain.len() as i32)
    .fetch_one(&mut *tx)
    .await
    // The exclusion constraint is the second overlap layer; a race the
    // pre-check skipped past lands here.
    .map_err(interval_store::map_overlap_error)?;

    let steps = insert_steps(&mut tx, request.id, &chain).await?;

    audit_chain::append(
        &mut tx,
        audit_chain::REQUESTS_TABLE,
        request.id,
        "CREATE",
        Some(actor.actor_id),
        json!({
            "status": {"to": "SUBMITTED"},
            "starts_at": request.starts_at,
            "ends_at": request.ends_at,
            "reason": request.reason,
            "steps": steps.len(),
        }),
    )
    .await?;

    tx.commit().await?;

    tracing::info!(
        request_id = %request.id,
        employee_id = %actor.actor_id,
        steps = steps.len(),
        "overtime request submitted"
    );

    Ok(RequestWithSteps {
        request: request.into(),
        steps: steps.into_iter().map(Into::into).collect(),
    })
}

/// Save a draft.
///
/// The window is reserved immediately (drafts occupy their interval) but
/// the cap/deadline rules wait until submission, when the window is final.
pub async fn save_draft(
    pool: &DbPool,
    actor: &ActorContext,
    payload: DraftOvertimeRequest,
) -> Result<RequestResponse, AppError> {
    let window = payload.window();
    window.validate().map_err(AppError::Validation)?;

    let mut tx = pool.begin().await?;

    interval_store::try_reserve(&mut tx, actor.actor_id, &window, None).await?;

    let request = sqlx::query_as::<_, OvertimeRequest>(
        r#"
        INSERT INTO overtime_requests (
            employee_id,
            starts_at,
            ends_at,
            work_date,
            duration_minutes,
            reason,
            status
        )
        VALUES ($1, $2, $3, $4, $5, $6, 'DRAFT')
        RETURNING *
        "#,
    )
    .bind(actor.actor_id)
    .bind(window.starts_at)
    .bind(window.ends_at)
    .bind(window.work_date())
    .bind(window.duration_minutes())
    .bind(&payload.reason)
    .fetch_one(&mut *tx)
    .await
    .map_err(interval_store::map_overlap_error)?;

    audit_chain::append(
        &mut tx,
        audit_chain::REQUESTS_TABLE,
        request.id,
        "CREATE",
        Some(actor.actor_id),
        json!({
            "status": {"to": "DRAFT"},
            "starts_at": request.starts_at,
            "ends_at": request.ends_at,
            "reason": request.reason,
        }),
    )
    .await?;

    tx.commit().await?;

    Ok(request.into())
}

/// Promote a draft to SUBMITTED.
///
/// Re-runs the policy rules (the draft's own minutes are excluded from the
/// totals), creates the approval chain and bumps the row version.
pub async fn submit_draft(
    pool: &DbPool,
    policy: OvertimePolicy,
    actor: &ActorContext,
    request_id: Uuid,
) -> Result<RequestWithSteps, AppError> {
    let chain = resolve_chain(pool, &actor.department).await;

    let mut tx = pool.begin().await?;

    let request = lock_request(&mut tx, request_id).await?;

    if request.employee_id != actor.actor_id {
        return Err(AppError::Authorization(
            "only the owner may submit a draft".to_string(),
        ));
    }
    if request.status != RequestStatus::Draft {
        return Err(AppError::Conflict(ConflictDetails::WrongState {
            current_status: request.status,
        }));
    }

    let window = request.window();
    let week = week_bounds(window.work_date(), policy.week_starts_on);
    let totals =
        load_usage_totals(&mut tx, actor.actor_id, &window, week, Some(request.id)).await?;
    let violations = evaluate_rules(&policy, &window, &totals, Utc::now().date_naive());
    if !violations.is_empty() {
        return Err(AppError::BusinessRule(violations));
    }

    let steps = insert_steps(&mut tx, request.id, &chain).await?;

    let updated = sqlx::query_as::<_, OvertimeRequest>(
        r#"
        UPDATE overtime_requests
        SET status = 'SUBMITTED',
            current_level = 1,
            max_level = $1,
            row_version = row_version + 1,
            updated_at = NOW()
        WHERE id = $2
        RETURNING *
        "#,
    )
    .bind(chain.len() as i32)
    .bind(request.id)
    .fetch_one(&mut *tx)
    .await?;

    audit_chain::append(
        &mut tx,
        audit_chain::REQUESTS_TABLE,
        updated.id,
        "SUBMIT",
        Some(actor.actor_id),
        json!({
            "status": {"from": "DRAFT", "to": "SUBMITTED"},
            "steps": steps.len(),
        }),
    )
    .await?;

    tx.commit().await?;

    tracing::info!(request_id = %updated.id, "draft submitted");

    Ok(RequestWithSteps {
        request: updated.into(),
        steps: steps.into_iter().map(Into::into).collect(),
    })
}

/// Cancel an own, non-terminal request.
///
/// CANCELED releases the window: the exclusion constraint stops counting
/// the row the moment this transaction commits.
pub async fn cancel(
    pool: &DbPool,
    actor: &ActorContext,
    request_id: Uuid,
) -> Result<RequestResponse, AppError> {
    let mut tx = pool.begin().await?;

    let request = lock_request(&mut tx, request_id).await?;

    if request.employee_id != actor.actor_id {
        return Err(AppError::Authorization(
            "only the owner may cancel a request".to_string(),
        ));
    }
    if request.status.is_terminal() {
        return Err(AppError::Conflict(ConflictDetails::WrongState {
            current_status: request.status,
        }));
    }

    let updated = sqlx::query_as::<_, OvertimeRequest>(
        r#"
        UPDATE overtime_requests
        SET status = 'CANCELED',
            row_version = row_version + 1,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(request.id)
    .fetch_one(&mut *tx)
    .await?;

    audit_chain::append(
        &mut tx,
        audit_chain::REQUESTS_TABLE,
        updated.id,
        "CANCEL",
        Some(actor.actor_id),
        json!({
            "status": {"from": request.status, "to": "CANCELED"},
        }),
    )
    .await?;

    tx.commit().await?;

    tracing::info!(request_id = %updated.id, "request canceled");

    Ok(updated.into())
}

/// Fetch one request with its chain.
///
/// Visible to the owner and to anyone the chain names as an approver;
/// everyone else gets a 404, not a 403, to avoid leaking existence.
pub async fn get_request(
    pool: &DbPool,
    actor: &ActorContext,
    request_id: Uuid,
) -> Result<RequestWithSteps, AppError> {
    let request = sqlx::query_as::<_, OvertimeRequest>(
        "SELECT * FROM overtime_requests WHERE id = $1 AND is_active",
    )
    .bind(request_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("request"))?;

    let steps = sqlx::query_as::<_, ApprovalStep>(
        "SELECT * FROM approval_steps WHERE request_id = $1 ORDER BY step_order",
    )
    .bind(request_id)
    .fetch_all(pool)
    .await?;

    let is_owner = request.employee_id == actor.actor_id;
    let is_approver = steps
        .iter()
        .any(|step| step.approver.matches(actor.actor_id, &actor.role));
    if !is_owner && !is_approver {
        return Err(AppError::NotFound("request"));
    }

    Ok(RequestWithSteps {
        request: request.into(),
        steps: steps.into_iter().map(Into::into).collect(),
    })
}

/// List the actor's own requests, newest first.
pub async fn list_requests(
    pool: &DbPool,
    actor: &ActorContext,
) -> Result<Vec<RequestResponse>, AppError> {
    let requests = sqlx::query_as::<_, OvertimeRequest>(
        r#"
        SELECT * FROM overtime_requests
        WHERE employee_id = $1 AND is_active
        ORDER BY created_at DESC
        "#,
    )
    .bind(actor.actor_id)
    .fetch_all(pool)
    .await?;

    Ok(requests.into_iter().map(Into::into).collect())
}

/// Lock an active request row for update.
async fn lock_request(
    tx: &mut Transaction<'_, Postgres>,
    request_id: Uuid,
) -> Result<OvertimeRequest, AppError> {
    sqlx::query_as::<_, OvertimeRequest>(
        "SELECT * FROM overtime_requests WHERE id = $1 AND is_active FOR UPDATE",
    )
    .bind(request_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(AppError::NotFound("request"))
}
