//! Audit chain recorder - tamper-evident log of every state change.
//!
//! Every mutation of a request or step appends one entry to that entity's
//! hash chain. The recorder always runs inside the caller's transaction:
//! a rolled-back business operation never leaves an orphan entry, and a
//! committed one is never missing its entry.
//!
//! # Chain Discipline
//!
//! The head of a chain is locked (`FOR UPDATE`) before the new entry is
//! computed, so `previous_hash` can never come from a stale read. For the
//! empty-chain race (two first entries for the same entity), the
//! `UNIQUE (entity_table, entity_id, seq)` constraint makes one of the two
//! transactions abort instead of forking the chain.

use serde_json::Value;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::audit_entry::{AuditEntry, ChainVerification, content_hash},
};

/// Entity table name for request chains.
pub const REQUESTS_TABLE: &str = "overtime_requests";

/// Entity table name for approval step chains.
pub const STEPS_TABLE: &str = "approval_steps";

/// Append one entry to an entity's audit chain.
///
/// # Process
///
/// 1. Lock the current chain head for this `(entity_table, entity_id)`
/// 2. Take its `content_hash` as the new entry's `previous_hash`
///    (None when the chain is empty)
/// 3. Compute the new `content_hash` over the canonical payload
/// 4. Insert with `seq = head.seq + 1`
///
/// Runs inside the caller's transaction; the entry commits or rolls back
/// together with the business mutation it describes.
///
/// # Arguments
///
/// * `tx` - The caller's open transaction
/// * `entity_table` - [`REQUESTS_TABLE`] or [`STEPS_TABLE`]
/// * `entity_id` - Id of the mutated entity
/// * `action` - What happened (CREATE, SUBMIT, APPROVE_STEP, ...)
/// * `actor_id` - Who did it; None for sweeper/system transitions
/// * `diff` - Structured description of the change
pub async fn append(
    tx: &mut Transaction<'_, Postgres>,
    entity_table: &str,
    entity_id: Uuid,
    action: &str,
    actor_id: Option<Uuid>,
    diff: Value,
) -> Result<AuditEntry, AppError> {
    // Lock the chain head; concurrent appends to the same entity serialize
    // here. Ordering is by seq, not wall-clock, so clock skew cannot
    // reorder a chain.
    let head = sqlx::query_as::<_, AuditEntry>(
        r#"
        SELECT * FROM audit_entries
        WHERE entity_table = $1 AND entity_id = $2
        ORDER BY seq DESC
        LIMIT 1
        FOR UPDATE
        "#,
    )
    .bind(entity_table)
    .bind(entity_id)
    .fetch_optional(&mut **tx)
    .await?;

    let (seq, previous_hash) = match &head {
        Some(entry) => (entry.seq + 1, Some(entry.content_hash.clone())),
        None => (1, None),
    };

    let hash = content_hash(action, actor_id, &diff, previous_hash.as_deref());

    let entry = sqlx::query_as::<_, AuditEntry>(
        r#"
        INSERT INTO audit_entries (
            entity_table,
            entity_id,
            seq,
            action,
            actor_id,
            diff,
            previous_hash,
            content_hash
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(entity_table)
    .bind(entity_id)
    .bind(seq)
    .bind(action)
    .bind(actor_id)
    .bind(&diff)
    .bind(&previous_hash)
    .bind(&hash)
    .fetch_one(&mut **tx)
    .await?;

    Ok(entry)
}

/// Walk an entity's chain and confirm every link.
///
/// # Checks
///
/// - `seq` values run 1..N without gaps
/// - each `previous_hash` equals the prior entry's `content_hash`
/// - each stored `content_hash` matches a recomputation from the stored
///   fields
///
/// Returns [`ChainVerification::BrokenAt`] with the first failing entry;
/// used by tests and operational tooling via the verify endpoint.
pub async fn verify_chain(
    pool: &DbPool,
    entity_table: &str,
    entity_id: Uuid,
) -> Result<ChainVerification, AppError> {
    let entries = list_entries(pool, entity_table, entity_id).await?;

    let mut expected_previous: Option<String> = None;
    for (index, entry) in entries.iter().enumerate() {
        let broken = entry.seq != index as i64 + 1
            || entry.previous_hash != expected_previous
            || entry.recomputed_hash() != entry.content_hash;

        if broken {
            return Ok(ChainVerification::BrokenAt {
                entry_id: entry.id,
                seq: entry.seq,
            });
        }

        expected_previous = Some(entry.content_hash.clone());
    }

    Ok(ChainVerification::Valid {
        length: entries.len(),
    })
}

/// All audit entries for one entity, in chain order.
pub async fn list_entries(
    pool: &DbPool,
    entity_table: &str,
    entity_id: Uuid,
) -> Result<Vec<AuditEntry>, AppError> {
    let entries = sqlx::query_as::<_, AuditEntry>(
        r#"
        SELECT * FROM audit_entries
        WHERE entity_table = $1 AND entity_id = $2
        ORDER BY seq ASC
        "#,
    )
    .bind(entity_table)
    .bind(entity_id)
    .fetch_all(pool)
    .await?;

    Ok(entries)
}
