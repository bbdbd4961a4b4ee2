//! Bearer-token authentication middleware.
//!
//! This middleware intercepts every protected request to:
//! 1. Extract the access token from the Authorization header
//! 2. Hash it and verify it belongs to an active employee
//! 3. Inject the actor context into the request
//! 4. Reject unauthorized requests with HTTP 401

use crate::{AppState, error::AppError, models::employee::Employee};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Authenticated-actor context attached to every core call.
///
/// This struct is inserted into the request's extension map and can be
/// extracted by route handlers to know who made the request. Everything
/// downstream (ownership checks, approver matching, chain resolution)
/// works off these fields.
#[derive(Debug, Clone)]
pub struct ActorContext {
    /// ID of the authenticated employee
    pub actor_id: Uuid,

    /// Name of the employee making the request
    pub display_name: String,

    /// Role used by role-bound approval steps
    pub role: String,

    /// Department, selects the approval chain template
    pub department: String,
}

/// Bearer-token authentication middleware function.
///
/// # Flow
///
/// 1. Extract `Authorization: Bearer <token>` header from request
/// 2. Hash the `<token>` using SHA-256
/// 3. Query database for matching hash where `is_active = true`
/// 4. If found: inject `ActorContext` into request, call next handler
/// 5. If not found: return 401 Unauthorized error
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    // Step 1: Extract Authorization header
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::InvalidToken)?;

    // Step 2: Extract Bearer token
    // Expected format: "Bearer <token>"
    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AppError::InvalidToken)?;

    // Step 3: Hash the token using SHA-256
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let token_hash = hex::encode(hasher.finalize());

    // Step 4: Lookup hashed token in database
    let employee = sqlx::query_as::<_, Employee>(
        "SELECT * FROM employees WHERE token_hash = $1 AND is_active = true",
    )
    .bind(&token_hash)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::InvalidToken)?;

    // Step 5: Create actor context
    let actor = ActorContext {
        actor_id: employee.id,
        display_name: employee.display_name,
        role: employee.role,
        department: employee.department,
    };

    // Step 6: Inject context into request extensions
    // Route handlers can now extract this using Extension<ActorContext>
    request.extensions_mut().insert(actor);

    // Step 7: Call the next middleware/handler
    Ok(next.run(request).await)
}
