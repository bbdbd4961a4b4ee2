//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::models::{approval_step::StepStatus, request::RequestStatus};

/// Application-wide error type.
///
/// Each variant maps to a specific HTTP status code and a structured JSON
/// body. The structure matters: a 409 must carry enough detail (conflicting
/// ids, expected vs. actual version) for a client to decide whether
/// refresh-and-retry makes sense, and a 422 must enumerate *every* violated
/// rule, not just the first one hit.
///
/// # Error Categories
///
/// - **Database Errors**: Any sqlx::Error from database operations
/// - **Authentication Errors**: Invalid or missing bearer tokens
/// - **Validation Errors**: Malformed input — the caller's fault, not retried
/// - **Business Rule Violations**: Policy caps/deadlines exceeded
/// - **Conflicts**: Overlaps, optimistic-lock mismatches, already-decided steps
/// - **Authorization Errors**: Wrong actor for this step
/// - **Resource Errors**: Requested entities not found
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed (e.g., connection error, query error).
    ///
    /// This wraps any sqlx::Error using the `#[from]` attribute, which
    /// automatically implements `From<sqlx::Error> for AppError`.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Bearer token is missing, invalid, or belongs to a deactivated employee.
    ///
    /// Returns HTTP 401 Unauthorized.
    #[error("Invalid access token")]
    InvalidToken,

    /// Request body or parameters are malformed.
    ///
    /// Returns HTTP 400 Bad Request.
    /// The String contains details about what was invalid.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// One or more overtime policy rules were violated.
    ///
    /// Returns HTTP 422 Unprocessable Entity. Carries the complete list of
    /// violations so the client can report everything in one round trip.
    #[error("{} business rule(s) violated", .0.len())]
    BusinessRule(Vec<RuleViolation>),

    /// State-level conflict: overlapping window, stale row version, or a
    /// step/request already in a terminal state.
    ///
    /// Returns HTTP 409 Conflict. Safe for the caller to retry after
    /// refreshing state.
    #[error("Conflict: {0}")]
    Conflict(ConflictDetails),

    /// The actor is authenticated but not allowed to perform this action.
    ///
    /// Returns HTTP 403 Forbidden.
    #[error("Forbidden: {0}")]
    Authorization(String),

    /// The requested entity does not exist (or is soft-deleted).
    ///
    /// Returns HTTP 404 Not Found.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Invariant breach that should never happen in normal operation
    /// (e.g., a cached response that no longer deserializes).
    ///
    /// Returns HTTP 500 Internal Server Error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// One violated overtime policy rule.
///
/// The lifecycle manager evaluates all rules before writing anything and
/// collects every violation into `AppError::BusinessRule`.
#[derive(Debug, Clone, Serialize)]
pub struct RuleViolation {
    /// Stable machine-readable rule code (e.g., "daily_cap_exceeded")
    pub rule: &'static str,

    /// Human-readable explanation
    pub message: String,

    /// Configured limit in minutes, where the rule is a cap
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_minutes: Option<i64>,

    /// Accumulated minutes that would result from this submission
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_minutes: Option<i64>,
}

/// Structured payload describing what exactly conflicted.
///
/// Serialized into the `details` field of the 409 response body.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConflictDetails {
    /// The submitted window intersects existing active windows.
    OverlappingWindow { overlapping_ids: Vec<Uuid> },

    /// Optimistic lock failure: the request row moved underneath the caller.
    VersionMismatch { expected: i64, actual: i64 },

    /// The step is already in a terminal state and cannot be re-decided.
    StepAlreadyDecided { current_status: StepStatus },

    /// The parent request is terminal; its chain accepts no more decisions.
    ChainClosed { request_status: RequestStatus },

    /// The step exists but is not the lowest-order PENDING step.
    StepNotEligible { active_order: Option<i32> },

    /// The request is not in the state this operation requires
    /// (e.g., canceling a terminal request, submitting a non-draft).
    WrongState { current_status: RequestStatus },

    /// Another call with the same idempotency key is still executing.
    OperationInFlight,
}

impl std::fmt::Display for ConflictDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictDetails::OverlappingWindow { overlapping_ids } => write!(
                f,
                "window overlaps {} existing request(s)",
                overlapping_ids.len()
            ),
            ConflictDetails::VersionMismatch { expected, actual } => write!(
                f,
                "row version mismatch (expected {expected}, actual {actual})"
            ),
            ConflictDetails::StepAlreadyDecided { current_status } => {
                write!(f, "step already decided ({current_status})")
            }
            ConflictDetails::ChainClosed { request_status } => {
                write!(f, "approval chain closed (request is {request_status})")
            }
            ConflictDetails::StepNotEligible { active_order } => match active_order {
                Some(order) => write!(f, "step not eligible; active step is {order}"),
                None => write!(f, "step not eligible; no step is pending"),
            },
            ConflictDetails::WrongState { current_status } => {
                write!(f, "request is {current_status}")
            }
            ConflictDetails::OperationInFlight => {
                write!(f, "an operation with this idempotency key is in flight")
            }
        }
    }
}

/// Convert AppError into an HTTP response.
///
/// This implementation allows Axum handlers to return `Result<T, AppError>`
/// and have errors automatically converted to proper HTTP responses.
///
/// # Response Format
///
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message",
///     "details": { }
///   }
/// }
/// ```
///
/// # Status Code Mapping
///
/// - `InvalidToken` → 401 Unauthorized
/// - `Validation` → 400 Bad Request
/// - `BusinessRule` → 422 Unprocessable Entity (details = all violations)
/// - `Conflict` → 409 Conflict (details = structured conflict payload)
/// - `Authorization` → 403 Forbidden
/// - `NotFound` → 404 Not Found
/// - `Database` → 500 Internal Server Error (hides details from client)
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            AppError::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                "invalid_token",
                self.to_string(),
                None,
            ),
            AppError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                self.to_string(),
                None,
            ),
            AppError::BusinessRule(violations) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "business_rule_violation",
                self.to_string(),
                serde_json::to_value(violations).ok(),
            ),
            AppError::Conflict(details) => (
                StatusCode::CONFLICT,
                "conflict",
                self.to_string(),
                serde_json::to_value(details).ok(),
            ),
            AppError::Authorization(_) => {
                (StatusCode::FORBIDDEN, "forbidden", self.to_string(), None)
            }
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", self.to_string(), None),
            AppError::Internal(message) => {
                tracing::error!("internal error: {message}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            AppError::Database(err) => {
                // Log the real error; clients get a generic message.
                tracing::error!("database error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
                "details": details,
            }
        }));

        (status, body).into_response()
    }
}
