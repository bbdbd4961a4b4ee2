//! Overtime request data models and API request/response types.
//!
//! This module defines:
//! - `OvertimeRequest`: Database entity representing one overtime window
//! - `RequestStatus`: Request lifecycle states
//! - `Window`: The time interval an overtime claim covers
//! - Request types for submitting and drafting requests
//! - `RequestResponse`: Response body returned to clients

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of an overtime request.
///
/// # Transitions
///
/// ```text
/// DRAFT ----> SUBMITTED ----> APPROVED
///   |             |---------> REJECTED
///   |             |---------> EXPIRED   (all steps skipped)
///   |             '---------> CANCELED
///   |----------> EXPIRED     (stale draft)
///   '----------> CANCELED
/// ```
///
/// APPROVED, REJECTED, EXPIRED and CANCELED are terminal. A request in
/// REJECTED, EXPIRED or CANCELED no longer holds its time window; an
/// APPROVED request keeps it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "request_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
    Expired,
    Canceled,
}

impl RequestStatus {
    /// Whether no further transitions are allowed from this state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::Approved
                | RequestStatus::Rejected
                | RequestStatus::Expired
                | RequestStatus::Canceled
        )
    }

    /// Whether a request in this state has released its time window.
    ///
    /// Mirrors the WHERE clause of the overlap exclusion constraint:
    /// REJECTED, CANCELED and EXPIRED rows no longer occupy their interval,
    /// everything else (including APPROVED) does.
    pub fn releases_window(self) -> bool {
        matches!(
            self,
            RequestStatus::Rejected | RequestStatus::Canceled | RequestStatus::Expired
        )
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RequestStatus::Draft => "DRAFT",
            RequestStatus::Submitted => "SUBMITTED",
            RequestStatus::Approved => "APPROVED",
            RequestStatus::Rejected => "REJECTED",
            RequestStatus::Expired => "EXPIRED",
            RequestStatus::Canceled => "CANCELED",
        };
        f.write_str(s)
    }
}

/// The time interval one overtime claim covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl Window {
    /// Check that the window is well-formed.
    ///
    /// A window must end strictly after it starts and must span at least
    /// one whole minute (durations are tracked in minutes).
    pub fn validate(&self) -> Result<(), String> {
        if self.ends_at <= self.starts_at {
            return Err("window must end after it starts".to_string());
        }
        if self.duration_minutes() < 1 {
            return Err("window must span at least one minute".to_string());
        }
        Ok(())
    }

    /// Window length in whole minutes.
    pub fn duration_minutes(&self) -> i64 {
        (self.ends_at - self.starts_at).num_minutes()
    }

    /// Calendar day the window belongs to (the day it starts on).
    ///
    /// Used by the daily and weekly cap checks and the submission deadline.
    pub fn work_date(&self) -> NaiveDate {
        self.starts_at.date_naive()
    }

    /// Closed-interval intersection test.
    ///
    /// Two windows that merely touch at an endpoint count as overlapping,
    /// matching the `tstzrange(..., '[]')` exclusion constraint.
    pub fn overlaps(&self, other: &Window) -> bool {
        self.starts_at <= other.ends_at && self.ends_at >= other.starts_at
    }
}

/// Represents an overtime request record from the database.
///
/// # Database Table
///
/// Maps to the `overtime_requests` table. Each request:
/// - Belongs to one employee and covers one time window
/// - Carries approval progress counters (`current_level` / `max_level`)
/// - Carries a `row_version` for optimistic locking (+1 on every mutation)
/// - Is never physically deleted; `is_active = false` plus `deleted_at`
///   marks soft deletion
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct OvertimeRequest {
    /// Unique identifier for this request
    pub id: Uuid,

    /// Employee who claims the overtime
    pub employee_id: Uuid,

    /// Window start
    pub starts_at: DateTime<Utc>,

    /// Window end
    pub ends_at: DateTime<Utc>,

    /// Calendar day of the window (denormalized for the cap queries)
    pub work_date: NaiveDate,

    /// Window length in minutes (derived at write time)
    pub duration_minutes: i64,

    /// Free-text justification supplied by the employee
    pub reason: String,

    /// Lifecycle state
    pub status: RequestStatus,

    /// Index of the currently active approval step (0 while DRAFT)
    pub current_level: i32,

    /// Total number of approval steps (0 while DRAFT)
    pub max_level: i32,

    /// Optimistic lock counter
    ///
    /// Starts at 1 and increments by exactly 1 on every mutation. A caller
    /// supplying a stale value gets a 409 instead of overwriting someone
    /// else's decision.
    pub row_version: i64,

    /// Soft-delete flag; inactive rows are invisible to all operations
    pub is_active: bool,

    /// When the request was created
    pub created_at: DateTime<Utc>,

    /// When the request was last mutated
    pub updated_at: DateTime<Utc>,

    /// When the request was soft-deleted, if ever
    pub deleted_at: Option<DateTime<Utc>>,
}

impl OvertimeRequest {
    /// The time window this request occupies.
    pub fn window(&self) -> Window {
        Window {
            starts_at: self.starts_at,
            ends_at: self.ends_at,
        }
    }
}

/// Request body for submitting an overtime request.
///
/// # JSON Example
///
/// ```json
/// {
///   "starts_at": "2025-03-10T18:00:00Z",
///   "ends_at": "2025-03-10T20:00:00Z",
///   "reason": "Quarter-end close",
///   "idempotency_key": "submit-2025-03-10-a81f"
/// }
/// ```
///
/// The idempotency key is mandatory: overtime submissions travel over
/// unreliable client networks, and a retried POST must return the original
/// result instead of claiming a second window.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitOvertimeRequest {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,

    /// Free-text justification
    pub reason: String,

    /// Client-supplied token guaranteeing at-most-once execution
    pub idempotency_key: String,
}

impl SubmitOvertimeRequest {
    pub fn window(&self) -> Window {
        Window {
            starts_at: self.starts_at,
            ends_at: self.ends_at,
        }
    }
}

/// Request body for saving a draft.
///
/// Drafts reserve their window immediately but skip the cap/deadline rules
/// until submission.
#[derive(Debug, Clone, Deserialize)]
pub struct DraftOvertimeRequest {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub reason: String,
}

impl DraftOvertimeRequest {
    pub fn window(&self) -> Window {
        Window {
            starts_at: self.starts_at,
            ends_at: self.ends_at,
        }
    }
}

/// Response body for request endpoints.
///
/// Strips the soft-delete bookkeeping fields clients don't need.
/// Deserialize is derived because submit responses are cached by the
/// idempotency gate and replayed on retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestResponse {
    pub id: Uuid,
    pub employee_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub work_date: NaiveDate,
    pub duration_minutes: i64,
    pub reason: String,
    pub status: RequestStatus,
    pub current_level: i32,
    pub max_level: i32,
    pub row_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<OvertimeRequest> for RequestResponse {
    fn from(request: OvertimeRequest) -> Self {
        Self {
            id: request.id,
            employee_id: request.employee_id,
            starts_at: request.starts_at,
            ends_at: request.ends_at,
            work_date: request.work_date,
            duration_minutes: request.duration_minutes,
            reason: request.reason,
            status: request.status,
            current_level: request.current_level,
            max_level: request.max_level,
            row_version: request.row_version,
            created_at: request.created_at,
            updated_at: request.updated_at,
        }
    }
}

/// A request together with its approval chain.
///
/// Returned by submit and fetch endpoints; also the payload the
/// idempotency gate caches for replay.
#[derive(Debug, Serialize, Deserialize)]
pub struct RequestWithSteps {
    pub request: RequestResponse,
    pub steps: Vec<super::approval_step::StepResponse>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window(start_h: u32, end_h: u32) -> Window {
        Window {
            starts_at: Utc.with_ymd_and_hms(2025, 3, 10, start_h, 0, 0).unwrap(),
            ends_at: Utc.with_ymd_and_hms(2025, 3, 10, end_h, 0, 0).unwrap(),
        }
    }

    #[test]
    fn well_formed_window_passes_validation() {
        assert!(window(18, 20).validate().is_ok());
    }

    #[test]
    fn inverted_window_fails_validation() {
        let w = Window {
            starts_at: window(18, 20).ends_at,
            ends_at: window(18, 20).starts_at,
        };
        assert!(w.validate().is_err());
    }

    #[test]
    fn zero_length_window_fails_validation() {
        let point = Utc.with_ymd_and_hms(2025, 3, 10, 18, 0, 0).unwrap();
        let w = Window {
            starts_at: point,
            ends_at: point,
        };
        assert!(w.validate().is_err());
    }

    #[test]
    fn sub_minute_window_fails_validation() {
        let start = Utc.with_ymd_and_hms(2025, 3, 10, 18, 0, 0).unwrap();
        let w = Window {
            starts_at: start,
            ends_at: start + chrono::Duration::seconds(30),
        };
        assert!(w.validate().is_err());
    }

    #[test]
    fn duration_is_reported_in_minutes() {
        assert_eq!(window(18, 20).duration_minutes(), 120);
    }

    #[test]
    fn overlapping_windows_are_detected() {
        assert!(window(18, 20).overlaps(&window(19, 21)));
        assert!(window(19, 21).overlaps(&window(18, 20)));
    }

    #[test]
    fn contained_window_overlaps() {
        assert!(window(18, 22).overlaps(&window(19, 20)));
    }

    #[test]
    fn touching_endpoints_overlap_under_closed_intervals() {
        assert!(window(18, 20).overlaps(&window(20, 22)));
    }

    #[test]
    fn disjoint_windows_do_not_overlap() {
        assert!(!window(18, 19).overlaps(&window(20, 22)));
    }

    #[test]
    fn terminal_states_classified() {
        assert!(RequestStatus::Approved.is_terminal());
        assert!(RequestStatus::Rejected.is_terminal());
        assert!(RequestStatus::Expired.is_terminal());
        assert!(RequestStatus::Canceled.is_terminal());
        assert!(!RequestStatus::Draft.is_terminal());
        assert!(!RequestStatus::Submitted.is_terminal());
    }

    #[test]
    fn approved_requests_keep_their_window() {
        assert!(!RequestStatus::Approved.releases_window());
        assert!(RequestStatus::Rejected.releases_window());
        assert!(RequestStatus::Canceled.releases_window());
        assert!(RequestStatus::Expired.releases_window());
    }
}
