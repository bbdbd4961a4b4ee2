//! Idempotency gate - at-most-once execution of retried client calls.
//!
//! Network-unreliable clients retry; the gate guarantees the wrapped
//! operation runs at most once per `(employee, key)` pair and that every
//! retry sees the original response.
//!
//! # At-Most-Once Mechanics
//!
//! The placeholder insert is the unique-constraint-protected step: whoever
//! wins the `UNIQUE (employee_id, idem_key)` race runs the operation, every
//! loser reads the existing row instead. A crash between placeholder insert
//! and completion leaves an `in_flight` row that refuses concurrent reruns;
//! the maintenance sweeper reclaims it once the TTL passes.

use chrono::{Duration, Utc};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::future::Future;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::{AppError, ConflictDetails},
    models::idempotency::{IdempotencyRecord, STATE_COMPLETED},
};

/// Outcome of a gated call.
#[derive(Debug)]
pub struct Executed<T> {
    /// True when the result was replayed from the cache instead of executed
    pub duplicate: bool,

    pub result: T,
}

/// SHA-256 over the canonical JSON form of a request body.
///
/// Stored with the key so a reused key carrying a *different* body is
/// detected as a client bug instead of silently replaying an unrelated
/// response.
pub fn body_hash(body: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Run `operation` at most once for this `(employee, key)` pair.
///
/// # Process
///
/// 1. Insert an `in_flight` placeholder (`ON CONFLICT DO NOTHING`)
/// 2. If the insert lost the race: replay the cached response when the
///    existing record is completed, or refuse with a 409 while it is still
///    in flight
/// 3. If the insert won: run the operation, store its response, mark the
///    record completed
///
/// A failed operation releases the placeholder, so the client may fix the
/// request and retry under the same key; only success responses are cached.
///
/// # Errors
///
/// - `Validation`: empty key, or key reused with a different body or
///   operation signature
/// - `Conflict(OperationInFlight)`: a concurrent call holds the key
pub async fn execute<T, F, Fut>(
    pool: &DbPool,
    key: &str,
    employee_id: Uuid,
    op_signature: &str,
    request_body: &Value,
    ttl_hours: i64,
    operation: F,
) -> Result<Executed<T>, AppError>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    if key.trim().is_empty() {
        return Err(AppError::Validation(
            "idempotency key must not be empty".to_string(),
        ));
    }

    let request_hash = body_hash(request_body);
    let expires_at = Utc::now() + Duration::hours(ttl_hours);

    // The placeholder insert is the at-most-once step.
    let placeholder_id: Option<Uuid> = sqlx::query_scalar(
        r#"
        INSERT INTO idempotency_keys (
            idem_key,
            employee_id,
            op_signature,
            request_hash,
            state,
            expires_at
        )
        VALUES ($1, $2, $3, $4, 'in_flight', $5)
        ON CONFLICT (employee_id, idem_key) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(key)
    .bind(employee_id)
    .bind(op_signature)
    .bind(&request_hash)
    .bind(expires_at)
    .fetch_optional(pool)
    .await?;

    let Some(placeholder_id) = placeholder_id else {
        return replay(pool, key, employee_id, op_signature, &request_hash).await;
    };

    match operation().await {
        Ok(result) => {
            let cached = serde_json::to_value(&result)
                .map_err(|err| AppError::Internal(format!("cannot cache response: {err}")))?;

            sqlx::query(
                r#"
                UPDATE idempotency_keys
                SET state = 'completed',
                    response = $1,
                    completed_at = NOW()
                WHERE id = $2
                "#,
            )
            .bind(&cached)
            .bind(placeholder_id)
            .execute(pool)
            .await?;

            Ok(Executed {
                duplicate: false,
                result,
            })
        }
        Err(err) => {
            // Release the key; errors are not cached.
            if let Err(release_err) = sqlx::query("DELETE FROM idempotency_keys WHERE id = $1")
                .bind(placeholder_id)
                .execute(pool)
                .await
            {
                tracing::error!(
                    idempotency_key = key,
                    "failed to release idempotency placeholder: {release_err}"
                );
            }
            Err(err)
        }
    }
}

/// Lost the placeholder race: serve from the existing record.
async fn replay<T: DeserializeOwned>(
    pool: &DbPool,
    key: &str,
    employee_id: Uuid,
    op_signature: &str,
    request_hash: &str,
) -> Result<Executed<T>, AppError> {
    let record = sqlx::query_as::<_, IdempotencyRecord>(
        "SELECT * FROM idempotency_keys WHERE employee_id = $1 AND idem_key = $2",
    )
    .bind(employee_id)
    .bind(key)
    .fetch_optional(pool)
    .await?
    // The holder released the key between our insert and this read; the
    // retry will win the placeholder next time.
    .ok_or(AppError::Conflict(ConflictDetails::OperationInFlight))?;

    if record.request_hash != request_hash || record.op_signature != op_signature {
        return Err(AppError::Validation(
            "idempotency key was already used with a different request".to_string(),
        ));
    }

    if record.state != STATE_COMPLETED {
        return Err(AppError::Conflict(ConflictDetails::OperationInFlight));
    }

    let cached = record.response.ok_or_else(|| {
        AppError::Internal("completed idempotency record has no response".to_string())
    })?;

    let result: T = serde_json::from_value(cached)
        .map_err(|err| AppError::Internal(format!("cached response no longer decodes: {err}")))?;

    Ok(Executed {
        duplicate: true,
        result,
    })
}
