//! Idempotency record data model.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Record state while the wrapped operation is still executing.
pub const STATE_IN_FLIGHT: &str = "in_flight";

/// Record state once the cached response is stored.
pub const STATE_COMPLETED: &str = "completed";

/// Represents an idempotency record from the database.
///
/// # Database Table
///
/// Maps to the `idempotency_keys` table. One row per
/// `(employee_id, idem_key)` pair; the unique constraint on that pair is
/// what makes the placeholder insert the at-most-once step. A key may be
/// consumed (replay the cached response) any number of times, but the
/// underlying operation executes at most once.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IdempotencyRecord {
    pub id: Uuid,

    /// Client-supplied key
    pub idem_key: String,

    /// Owner of the key; keys are scoped per employee
    pub employee_id: Uuid,

    /// Operation signature ("POST /api/v1/requests") the key was used with
    pub op_signature: String,

    /// SHA-256 of the canonical request body
    ///
    /// A retried call must carry the same body; reusing a key with a
    /// different body is a client bug and is refused.
    pub request_hash: String,

    /// "in_flight" until the operation completes, then "completed"
    pub state: String,

    /// Cached success response, replayed on duplicate calls
    pub response: Option<Value>,

    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    /// After this instant the sweeper may reclaim the row
    pub expires_at: DateTime<Utc>,
}
