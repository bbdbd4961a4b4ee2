//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, etc.)
//! 2. Calls into the service layer
//! 3. Returns HTTP response (JSON, status code)

/// Audit chain endpoints
pub mod audit;
/// Approval decision endpoint
pub mod decisions;
/// Health check endpoint
pub mod health;
/// Request lifecycle endpoints
pub mod requests;
