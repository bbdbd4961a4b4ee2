//! Shared fixtures for the integration suite.

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc, Weekday};
use overtime_approval_service::{
    config::OvertimePolicy,
    middleware::auth::ActorContext,
    models::request::{DraftOvertimeRequest, SubmitOvertimeRequest},
};
use sqlx::PgPool;
use uuid::Uuid;

pub const TTL_HOURS: i64 = 24;

pub fn test_policy() -> OvertimePolicy {
    OvertimePolicy {
        daily_cap_minutes: 240,
        weekly_cap_minutes: 900,
        submission_deadline_days: 30,
        week_starts_on: Weekday::Sun,
    }
}

/// Insert an employee and return the actor context the middleware would
/// have produced for them.
pub async fn create_employee(
    pool: &PgPool,
    name: &str,
    role: &str,
    department: &str,
) -> ActorContext {
    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO employees (display_name, role, department, token_hash)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(name)
    .bind(role)
    .bind(department)
    .bind(format!("test-hash-{}", Uuid::new_v4()))
    .fetch_one(pool)
    .await
    .expect("insert employee");

    ActorContext {
        actor_id: id,
        display_name: name.to_string(),
        role: role.to_string(),
        department: department.to_string(),
    }
}

/// The three approvers matching the fallback chain roles.
pub async fn create_fallback_approvers(
    pool: &PgPool,
    department: &str,
) -> (ActorContext, ActorContext, ActorContext) {
    let supervisor = create_employee(pool, "Sam Supervisor", "supervisor", department).await;
    let manager = create_employee(pool, "Mia Manager", "manager", department).await;
    let hr = create_employee(pool, "Harper HR", "hr", department).await;
    (supervisor, manager, hr)
}

/// A window on `day_offset` days from today, between the given hours.
pub fn window(day_offset: i64, start_h: u32, end_h: u32) -> (DateTime<Utc>, DateTime<Utc>) {
    let date = (Utc::now() + Duration::days(day_offset)).date_naive();
    let starts_at = date.and_hms_opt(start_h, 0, 0).unwrap().and_utc();
    let ends_at = date.and_hms_opt(end_h, 0, 0).unwrap().and_utc();
    (starts_at, ends_at)
}

pub fn submit_payload(
    day_offset: i64,
    start_h: u32,
    end_h: u32,
    key: &str,
) -> SubmitOvertimeRequest {
    let (starts_at, ends_at) = window(day_offset, start_h, end_h);
    SubmitOvertimeRequest {
        starts_at,
        ends_at,
        reason: "quarter-end close".to_string(),
        idempotency_key: key.to_string(),
    }
}

pub fn draft_payload(day_offset: i64, start_h: u32, end_h: u32) -> DraftOvertimeRequest {
    let (starts_at, ends_at) = window(day_offset, start_h, end_h);
    DraftOvertimeRequest {
        starts_at,
        ends_at,
        reason: "quarter-end close".to_string(),
    }
}

/// How many overtime request rows exist for an employee.
pub async fn count_requests(pool: &PgPool, employee_id: Uuid) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM overtime_requests WHERE employee_id = $1")
        .bind(employee_id)
        .fetch_one(pool)
        .await
        .expect("count requests")
}
