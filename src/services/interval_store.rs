//! Interval store - enforcement of the per-employee non-overlap invariant.
//!
//! Two layers, both required:
//!
//! 1. A locked pre-check inside the caller's transaction. Candidate
//!    overlapping rows are read with `FOR UPDATE SKIP LOCKED`, so a
//!    legitimate conflict surfaces as a clean 409 with the conflicting ids,
//!    while unrelated writers are never blocked.
//! 2. The `excl_no_overlapping_windows` exclusion constraint in the
//!    database. This is the last line of defense: a race the pre-check
//!    cannot see (a conflicting row locked by an uncommitted writer is
//!    skipped, not waited on) ends as a constraint violation at
//!    commit/insert time rather than as silent corruption.
//!
//! Either layer firing must abort the caller's whole transaction — no
//! partial request or step creation may survive an overlap.

use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::{
    error::{AppError, ConflictDetails},
    models::request::Window,
};

/// PostgreSQL SQLSTATE for exclusion constraint violations.
const EXCLUSION_VIOLATION: &str = "23P01";

/// Check that `window` is free for `employee_id`, locking conflicting rows.
///
/// Must be called inside the same transaction as the insert/update that
/// claims the window. The overlap test is closed-interval, matching the
/// exclusion constraint, and only counts active rows whose status still
/// holds a window (everything but REJECTED/CANCELED/EXPIRED).
///
/// # Arguments
///
/// * `exclude_id` - Request to ignore, for updates re-claiming their own
///   window
///
/// # Errors
///
/// `ConflictDetails::OverlappingWindow` listing every conflicting request
/// id found.
pub async fn try_reserve(
    tx: &mut Transaction<'_, Postgres>,
    employee_id: Uuid,
    window: &Window,
    exclude_id: Option<Uuid>,
) -> Result<(), AppError> {
    let overlapping_ids: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM overtime_requests
        WHERE employee_id = $1
          AND is_active
          AND status NOT IN ('REJECTED', 'CANCELED', 'EXPIRED')
          AND starts_at <= $3
          AND ends_at >= $2
          AND ($4::uuid IS NULL OR id <> $4)
        ORDER BY starts_at
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(employee_id)
    .bind(window.starts_at)
    .bind(window.ends_at)
    .bind(exclude_id)
    .fetch_all(&mut **tx)
    .await?;

    if !overlapping_ids.is_empty() {
        return Err(AppError::Conflict(ConflictDetails::OverlappingWindow {
            overlapping_ids,
        }));
    }

    Ok(())
}

/// Whether a database error is the exclusion constraint firing.
pub fn is_overlap_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(EXCLUSION_VIOLATION),
        _ => false,
    }
}

/// Map an insert/update error, converting an exclusion violation into the
/// same `ConflictError` the pre-check raises.
///
/// The constraint path cannot name the conflicting rows (the transaction is
/// already aborted), so the id list is empty; the pre-check catches the
/// common case with full detail.
pub fn map_overlap_error(err: sqlx::Error) -> AppError {
    if is_overlap_violation(&err) {
        AppError::Conflict(ConflictDetails::OverlappingWindow {
            overlapping_ids: Vec::new(),
        })
    } else {
        err.into()
    }
}
