//! Business logic services.
//!
//! Services contain the concurrency and consistency core separated from
//! HTTP handlers: transactional writes, locking discipline, audit chaining
//! and the background sweeper.

pub mod approval_service;
pub mod audit_chain;
pub mod idempotency;
pub mod interval_store;
pub mod request_service;
pub mod sweeper;
