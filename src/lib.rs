//! Overtime approval service library.
//!
//! The concurrency and consistency engine behind overtime requests:
//! non-overlapping window reservation, a multi-step approval state machine
//! with optimistic locking, a hash-chained audit log, an idempotency gate
//! for unreliable clients, and a background maintenance sweeper.
//!
//! The binary in `main.rs` wires these modules into an HTTP server;
//! integration tests drive the service layer directly.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use config::OvertimePolicy;
use db::DbPool;

/// Shared state handed to every handler and middleware.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Database connection pool
    pub pool: DbPool,

    /// Overtime policy values (caps, deadline, week start)
    pub policy: OvertimePolicy,

    /// TTL for idempotency records
    pub idempotency_ttl_hours: i64,
}
