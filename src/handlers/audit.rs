//! Audit chain HTTP handlers.
//!
//! This module exposes the tamper-evidence tooling:
//! - GET /api/v1/requests/:id/audit - Audit entries for a request
//! - GET /api/v1/audit/:table/:id/verify - Walk and verify a chain

use crate::{
    AppState,
    error::AppError,
    middleware::auth::ActorContext,
    models::audit_entry::{AuditEntry, ChainVerification},
    services::{audit_chain, request_service},
};
use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

/// List the audit chain of one request, in order.
///
/// Visibility follows the request itself: owner or chain approver.
pub async fn list_request_audit(
    State(state): State<AppState>,
    Extension(actor): Extension<ActorContext>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    // Reuse the request fetch for its visibility rule.
    request_service::get_request(&state.pool, &actor, request_id).await?;

    let entries =
        audit_chain::list_entries(&state.pool, audit_chain::REQUESTS_TABLE, request_id).await?;
    Ok(Json(entries))
}

/// Verify an entity's audit chain link by link.
///
/// # Response (200)
///
/// ```json
/// {"result": "valid", "length": 4}
/// ```
///
/// or, after tampering:
///
/// ```json
/// {"result": "broken_at", "entry_id": "770e8400-...", "seq": 3}
/// ```
pub async fn verify_chain(
    State(state): State<AppState>,
    Path((entity_table, entity_id)): Path<(String, Uuid)>,
) -> Result<Json<ChainVerification>, AppError> {
    // Only the two audited tables are addressable.
    if entity_table != audit_chain::REQUESTS_TABLE && entity_table != audit_chain::STEPS_TABLE {
        return Err(AppError::Validation(format!(
            "unknown audited entity table: {entity_table}"
        )));
    }

    let verification = audit_chain::verify_chain(&state.pool, &entity_table, entity_id).await?;
    Ok(Json(verification))
}
