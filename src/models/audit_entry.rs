//! Audit entry data model and hash computation.
//!
//! Audit entries form a per-entity hash chain: each entry's `previous_hash`
//! must equal the `content_hash` of the entry before it, so any tampering
//! with a stored entry (or a gap in the sequence) is detectable by
//! recomputation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Represents an immutable audit log record from the database.
///
/// # Database Table
///
/// Maps to the `audit_entries` table. Entries are append-only: never
/// updated, never deleted. `seq` orders the chain per entity; wall-clock
/// timestamps are informational only (clock skew must not reorder a chain).
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct AuditEntry {
    /// Unique identifier for this entry
    pub id: Uuid,

    /// Table of the entity this entry describes
    pub entity_table: String,

    /// Id of the entity this entry describes
    pub entity_id: Uuid,

    /// Position in the entity's chain (1..N, unique per entity)
    pub seq: i64,

    /// What happened (CREATE, SUBMIT, APPROVE_STEP, ...)
    pub action: String,

    /// Who did it; None for system actions such as sweeper transitions
    pub actor_id: Option<Uuid>,

    /// Structured description of what changed
    pub diff: Value,

    /// `content_hash` of the previous entry in this chain; None for the
    /// first entry
    pub previous_hash: Option<String>,

    /// SHA-256 over this entry's canonical payload
    pub content_hash: String,

    pub created_at: DateTime<Utc>,
}

/// Compute the content hash of an audit entry.
///
/// The canonical payload is a JSON object over `{action, actor_id, diff,
/// previous_hash}`; object keys serialize in sorted order, so equal inputs
/// always produce equal bytes. Including `previous_hash` is what links the
/// chain: rewriting one entry invalidates every entry after it.
pub fn content_hash(
    action: &str,
    actor_id: Option<Uuid>,
    diff: &Value,
    previous_hash: Option<&str>,
) -> String {
    let payload = serde_json::json!({
        "action": action,
        "actor_id": actor_id,
        "diff": diff,
        "previous_hash": previous_hash,
    });

    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

impl AuditEntry {
    /// Recompute this entry's hash from its stored fields.
    ///
    /// Equal to `content_hash` unless the row was tampered with.
    pub fn recomputed_hash(&self) -> String {
        content_hash(
            &self.action,
            self.actor_id,
            &self.diff,
            self.previous_hash.as_deref(),
        )
    }
}

/// Result of walking an entity's audit chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ChainVerification {
    /// Every link checked out.
    Valid { length: usize },

    /// The first entry whose stored hash or back-link does not match.
    BrokenAt { entry_id: Uuid, seq: i64 },
}
