//! Approval decision HTTP handler.
//!
//! POST /api/v1/requests/:id/steps/:order/decision

use crate::{
    AppState,
    error::AppError,
    middleware::auth::ActorContext,
    models::approval_step::{DecideStepRequest, DecisionResponse},
    services::approval_service,
};
use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

/// Decide an approval step.
///
/// # Request Body
///
/// ```json
/// {
///   "decision": "APPROVED",
///   "comment": "ok for quarter close",
///   "expected_row_version": 3
/// }
/// ```
///
/// # Responses
///
/// - 200 with the updated step, the updated request and `is_final`
/// - 403 if the actor is not this step's approver
/// - 404 if the request or step does not exist
/// - 409 if the step is already decided, out of order, the chain is
///   closed, or `expected_row_version` is stale
pub async fn decide_step(
    State(state): State<AppState>,
    Extension(actor): Extension<ActorContext>,
    Path((request_id, step_order)): Path<(Uuid, i32)>,
    Json(request): Json<DecideStepRequest>,
) -> Result<Json<DecisionResponse>, AppError> {
    let outcome =
        approval_service::decide(&state.pool, &actor, request_id, step_order, request).await?;
    Ok(Json(outcome))
}
