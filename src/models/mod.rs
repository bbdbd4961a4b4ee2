//! Data models representing database entities.
//!
//! This module contains all data structures that map to database tables,
//! plus the API request/response types derived from them.

/// Approval step entity and decision types
pub mod approval_step;
/// Hash-chained audit entry
pub mod audit_entry;
/// Employee (actor) entity
pub mod employee;
/// Idempotency record
pub mod idempotency;
/// Overtime request entity and window types
pub mod request;
