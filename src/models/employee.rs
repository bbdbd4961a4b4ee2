//! Employee model for authentication and chain resolution.
//!
//! Employees are the actor source for every core operation. Bearer tokens
//! are stored as SHA-256 hashes, never in the clear.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Represents an employee record from the database.
///
/// # Database Table
///
/// Maps to the `employees` table. The auth middleware resolves
/// `Authorization: Bearer <token>` to a row here by hashing the token and
/// matching `token_hash` where `is_active = true`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Employee {
    /// Unique identifier for this employee
    pub id: Uuid,

    /// Human-readable name
    pub display_name: String,

    /// Role used by role-bound approval steps ("supervisor", "manager", ...)
    pub role: String,

    /// Department, selects the approval chain template at submission
    pub department: String,

    /// SHA-256 hash of the employee's access token (64 hex characters)
    pub token_hash: String,

    /// Whether this employee may authenticate
    ///
    /// Deactivated employees are rejected during authentication. This
    /// provides a way to revoke access without deleting the record.
    pub is_active: bool,

    /// Timestamp when this employee was created
    pub created_at: DateTime<Utc>,
}
