//! Overtime request HTTP handlers.
//!
//! This module implements the request lifecycle endpoints:
//! - POST /api/v1/requests - Submit a request (idempotent)
//! - POST /api/v1/requests/draft - Save a draft
//! - POST /api/v1/requests/:id/submit - Promote a draft
//! - POST /api/v1/requests/:id/cancel - Cancel an own request
//! - GET /api/v1/requests - List own requests
//! - GET /api/v1/requests/:id - Get a request with its chain

use crate::{
    AppState,
    error::AppError,
    middleware::auth::ActorContext,
    models::request::{
        DraftOvertimeRequest, RequestResponse, RequestWithSteps, SubmitOvertimeRequest,
    },
    services::request_service,
};
use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

/// Submit an overtime request.
///
/// # Request Body
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
/// # Idempotency
///
/// The whole operation is gated on `idempotency_key`: a retried call with
/// the same key returns the originally created request instead of claiming
/// a second window.
pub async fn submit_request(
    State(state): State<AppState>,
    Extension(actor): Extension<ActorContext>,
    Json(request): Json<SubmitOvertimeRequest>,
) -> Result<Json<RequestWithSteps>, AppError> {
    let executed = request_service::submit(
        &state.pool,
        state.policy,
        &actor,
        request,
        state.idempotency_ttl_hours,
    )
    .await?;

    if executed.duplicate {
        tracing::info!(employee_id = %actor.actor_id, "replayed idempotent submit");
    }

    Ok(Json(executed.result))
}

/// Save a draft request.
///
/// The window is reserved immediately; policy caps are checked at
/// submission time.
pub async fn save_draft(
    State(state): State<AppState>,
    Extension(actor): Extension<ActorContext>,
    Json(request): Json<DraftOvertimeRequest>,
) -> Result<Json<RequestResponse>, AppError> {
    let draft = request_service::save_draft(&state.pool, &actor, request).await?;
    Ok(Json(draft))
}

/// Promote a draft to SUBMITTED, creating its approval chain.
pub async fn submit_draft(
    State(state): State<AppState>,
    Extension(actor): Extension<ActorContext>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<RequestWithSteps>, AppError> {
    let submitted =
        request_service::submit_draft(&state.pool, state.policy, &actor, request_id).await?;
    Ok(Json(submitted))
}

/// Cancel an own, non-terminal request.
pub async fn cancel_request(
    State(state): State<AppState>,
    Extension(actor): Extension<ActorContext>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<RequestResponse>, AppError> {
    let canceled = request_service::cancel(&state.pool, &actor, request_id).await?;
    Ok(Json(canceled))
}

/// List the authenticated employee's requests, newest first.
pub async fn list_requests(
    State(state): State<AppState>,
    Extension(actor): Extension<ActorContext>,
) -> Result<Json<Vec<RequestResponse>>, AppError> {
    let requests = request_service::list_requests(&state.pool, &actor).await?;
    Ok(Json(requests))
}

/// Get one request with its approval chain.
///
/// # Security
///
/// Returns 404 unless the actor owns the request or is named by its chain.
pub async fn get_request(
    State(state): State<AppState>,
    Extension(actor): Extension<ActorContext>,
    Path(request_id): Path<Uuid>,
) -> Result<Json<RequestWithSteps>, AppError> {
    let request = request_service::get_request(&state.pool, &actor, request_id).await?;
    Ok(Json(request))
}
