//! Overtime Approval Service - Main Application Entry Point
//!
//! REST API server for managing employee overtime requests through a
//! multi-step approval chain: idempotent submission, non-overlapping
//! window reservation, optimistically locked approval decisions, a
//! hash-chained audit log and a background maintenance sweeper.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries)
//! - **Authentication**: Bearer token with SHA-256 hashing
//! - **Format**: JSON requests/responses
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool
//! 3. Run database migrations
//! 4. Spawn the maintenance sweeper
//! 5. Build HTTP router with routes and middleware
//! 6. Start server on configured port

use overtime_approval_service::{
    AppState, config, db, handlers, middleware,
    services::sweeper::{self, SweeperSettings},
};

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber. Reads RUST_LOG
    // environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Load configuration
    let config = config::Config::from_env()?;
    let policy = config.overtime_policy()?;
    tracing::info!("Configuration loaded");

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    // Start the background maintenance sweeper
    sweeper::spawn(pool.clone(), SweeperSettings::from_config(&config));
    tracing::info!("Maintenance sweeper started");

    let state = AppState {
        pool,
        policy,
        idempotency_ttl_hours: config.idempotency_ttl_hours,
    };

    // Create authenticated routes (API endpoints)
    let authenticated_routes = Router::new()
        // Request lifecycle routes
        .route("/api/v1/requests", post(handlers::requests::submit_request))
        .route("/api/v1/requests", get(handlers::requests::list_requests))
        .route(
            "/api/v1/requests/draft",
            post(handlers::requests::save_draft),
        )
        .route(
            "/api/v1/requests/{id}",
            get(handlers::requests::get_request),
        )
        .route(
            "/api/v1/requests/{id}/submit",
            post(handlers::requests::submit_draft),
        )
        .route(
            "/api/v1/requests/{id}/cancel",
            post(handlers::requests::cancel_request),
        )
        // Approval decision route
        .route(
            "/api/v1/requests/{id}/steps/{order}/decision",
            post(handlers::decisions::decide_step),
        )
        // Audit routes
        .route(
            "/api/v1/requests/{id}/audit",
            get(handlers::audit::list_request_audit),
        )
        .route(
            "/api/v1/audit/{table}/{id}/verify",
            get(handlers::audit::verify_chain),
        )
        // Apply authentication middleware to all routes in this group
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    // Combine authenticated routes with public routes
    let app = Router::new()
        // Public routes (no authentication required)
        .route("/health", get(handlers::health::health_check))
        // Merge authenticated routes
        .merge(authenticated_routes)
        // Add distributed tracing middleware for observability
        .layer(TraceLayer::new_for_http())
        // Drop requests that outlive the timeout; the aborted database
        // transaction rolls back, so no partial write becomes visible
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.request_timeout_secs,
        )))
        // Share state with all handlers via State extraction
        .with_state(state);

    // Bind to network address and start server
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Start serving HTTP requests
    // This blocks forever, handling requests concurrently with tokio
    axum::serve(listener, app).await?;

    Ok(())
}
