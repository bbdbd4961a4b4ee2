//! Approval step data models and decision request/response types.
//!
//! This module defines:
//! - `ApprovalStep`: Database entity for one ordered stage of a chain
//! - `StepStatus`: Per-step states
//! - `Approver`: Who may decide a step — a fixed employee or a role match
//! - `ChainTemplateStep`: One configured stage of a department's chain
//! - Request/response types for the decision endpoint

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, postgres::PgRow};
use uuid::Uuid;

use super::request::RequestResponse;

/// State of one approval step.
///
/// PENDING is the only non-terminal state. APPROVED and REJECTED are actor
/// decisions; SKIPPED is applied by the maintenance sweeper when a step
/// stalls past the escalation timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "step_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum StepStatus {
    Pending,
    Approved,
    Rejected,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, StepStatus::Pending)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Pending => "PENDING",
            StepStatus::Approved => "APPROVED",
            StepStatus::Rejected => "REJECTED",
            StepStatus::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

/// Who is allowed to decide a step.
///
/// Modeled as a tagged variant rather than two nullable columns with
/// implicit precedence, so the resolution rule stays explicit: a `Fixed`
/// step is bound to one employee id, a `RoleMatch` step accepts any actor
/// holding the role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Approver {
    /// Bound to a specific employee
    Fixed(Uuid),

    /// Bound to any employee holding this role
    RoleMatch(String),
}

impl Approver {
    /// Whether the given actor satisfies this approver binding.
    pub fn matches(&self, actor_id: Uuid, actor_role: &str) -> bool {
        match self {
            Approver::Fixed(user_id) => *user_id == actor_id,
            Approver::RoleMatch(role) => role == actor_role,
        }
    }

    /// Reassemble the variant from its database columns.
    ///
    /// `approver_kind` discriminates; the CHECK constraint on the table
    /// guarantees the matching column is populated.
    pub fn from_columns(
        kind: &str,
        user_id: Option<Uuid>,
        role: Option<String>,
    ) -> Result<Self, String> {
        match kind {
            "fixed" => user_id
                .map(Approver::Fixed)
                .ok_or_else(|| "fixed approver without approver_user_id".to_string()),
            "role" => role
                .map(Approver::RoleMatch)
                .ok_or_else(|| "role approver without approver_role".to_string()),
            other => Err(format!("unknown approver kind: {other}")),
        }
    }

    /// Flatten the variant into its database columns
    /// `(approver_kind, approver_user_id, approver_role)`.
    pub fn to_columns(&self) -> (&'static str, Option<Uuid>, Option<&str>) {
        match self {
            Approver::Fixed(user_id) => ("fixed", Some(*user_id), None),
            Approver::RoleMatch(role) => ("role", None, Some(role.as_str())),
        }
    }
}

/// Represents an approval step record from the database.
///
/// # Database Table
///
/// Maps to the `approval_steps` table. All steps of a request are created
/// together in the submit transaction; `step_order` is unique per request
/// and the lowest-order PENDING step is the only one eligible for a
/// decision.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalStep {
    /// Unique identifier for this step
    pub id: Uuid,

    /// Parent request
    pub request_id: Uuid,

    /// Position in the chain (1..N)
    pub step_order: i32,

    /// Who may decide this step
    pub approver: Approver,

    /// Step state
    pub status: StepStatus,

    /// Actor who decided the step (None while PENDING, or when SKIPPED by
    /// the sweeper)
    pub decided_by: Option<Uuid>,

    /// When the decision happened
    pub decided_at: Option<DateTime<Utc>>,

    /// Optional decision comment
    pub comment: Option<String>,

    /// Optimistic lock counter, +1 on every mutation
    pub row_version: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Manual row mapping: the `approver` tagged variant is assembled from the
/// `approver_kind` / `approver_user_id` / `approver_role` columns.
impl<'r> sqlx::FromRow<'r, PgRow> for ApprovalStep {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let kind: String = row.try_get("approver_kind")?;
        let approver = Approver::from_columns(
            &kind,
            row.try_get("approver_user_id")?,
            row.try_get("approver_role")?,
        )
        .map_err(|message| sqlx::Error::ColumnDecode {
            index: "approver_kind".to_string(),
            source: message.into(),
        })?;

        Ok(Self {
            id: row.try_get("id")?,
            request_id: row.try_get("request_id")?,
            step_order: row.try_get("step_order")?,
            approver,
            status: row.try_get("status")?,
            decided_by: row.try_get("decided_by")?,
            decided_at: row.try_get("decided_at")?,
            comment: row.try_get("comment")?,
            row_version: row.try_get("row_version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// One configured stage of a department's approval chain.
///
/// Submission snapshots these into `approval_steps` rows, so later template
/// edits never rewrite chains already in flight.
#[derive(Debug, Clone)]
pub struct ChainTemplateStep {
    pub step_order: i32,
    pub approver: Approver,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ChainTemplateStep {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let kind: String = row.try_get("approver_kind")?;
        let approver = Approver::from_columns(
            &kind,
            row.try_get("approver_user_id")?,
            row.try_get("approver_role")?,
        )
        .map_err(|message| sqlx::Error::ColumnDecode {
            index: "approver_kind".to_string(),
            source: message.into(),
        })?;

        Ok(Self {
            step_order: row.try_get("step_order")?,
            approver,
        })
    }
}

impl ChainTemplateStep {
    /// Deterministic fallback chain used when a department has no template.
    ///
    /// Three role-bound stages: supervisor, then manager, then HR.
    pub fn fallback_chain() -> Vec<ChainTemplateStep> {
        ["supervisor", "manager", "hr"]
            .into_iter()
            .enumerate()
            .map(|(index, role)| ChainTemplateStep {
                step_order: index as i32 + 1,
                approver: Approver::RoleMatch(role.to_string()),
            })
            .collect()
    }
}

/// The verdict an approver can hand down.
///
/// SKIPPED is not listed: only the maintenance sweeper skips steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecisionVerdict {
    Approved,
    Rejected,
}

/// Request body for deciding a step.
///
/// # JSON Example
///
/// ```json
/// {
///   "decision": "APPROVED",
///   "comment": "ok for quarter close",
///   "expected_row_version": 3
/// }
/// ```
///
/// `expected_row_version` is the optimistic lock: when supplied, the
/// decision is refused with a 409 if the request row has moved since the
/// client last read it.
#[derive(Debug, Clone, Deserialize)]
pub struct DecideStepRequest {
    pub decision: DecisionVerdict,
    pub comment: Option<String>,
    pub expected_row_version: Option<i64>,
}

/// Response body for step data.
///
/// Deserialize is derived because the idempotency gate caches submit
/// responses containing steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResponse {
    pub id: Uuid,
    pub request_id: Uuid,
    pub step_order: i32,
    pub approver: Approver,
    pub status: StepStatus,
    pub decided_by: Option<Uuid>,
    pub decided_at: Option<DateTime<Utc>>,
    pub comment: Option<String>,
    pub row_version: i64,
}

impl From<ApprovalStep> for StepResponse {
    fn from(step: ApprovalStep) -> Self {
        Self {
            id: step.id,
            request_id: step.request_id,
            step_order: step.step_order,
            approver: step.approver,
            status: step.status,
            decided_by: step.decided_by,
            decided_at: step.decided_at,
            comment: step.comment,
            row_version: step.row_version,
        }
    }
}

/// Response body for the decision endpoint.
#[derive(Debug, Serialize)]
pub struct DecisionResponse {
    pub step: StepResponse,
    pub request: RequestResponse,

    /// Whether this decision closed the whole chain
    pub is_final: bool,
}
