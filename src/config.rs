//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to automatically deserialize environment
//! variables into a type-safe struct. Every overtime policy knob has a
//! hard-coded fallback, so a bare `DATABASE_URL` is enough to run.

use chrono::Weekday;
use serde::Deserialize;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `DAILY_CAP_MINUTES` (optional): max overtime minutes per employee per
///   calendar day, defaults to 240
/// - `WEEKLY_CAP_MINUTES` (optional): max overtime minutes per employee per
///   week, defaults to 900
/// - `SUBMISSION_DEADLINE_DAYS` (optional): how many days after the work
///   date a submission is still accepted, defaults to 30
/// - `WEEK_STARTS_ON` (optional): weekday that opens the cap week
///   (chrono weekday name), defaults to "sunday"
/// - `ESCALATION_TIMEOUT_HOURS` (optional): age after which a PENDING step
///   is skipped by the sweeper, defaults to 72
/// - `DRAFT_MAX_AGE_HOURS` (optional): age after which a DRAFT request is
///   expired by the sweeper, defaults to 48
/// - `IDEMPOTENCY_TTL_HOURS` (optional): lifetime of idempotency records,
///   defaults to 24
/// - `SWEEPER_INTERVAL_SECS` (optional): pause between sweeper runs,
///   defaults to 300
/// - `SWEEPER_BATCH_SIZE` (optional): max rows touched per job per run,
///   defaults to 100
/// - `REQUEST_TIMEOUT_SECS` (optional): request-level timeout after which
///   an in-flight operation is dropped and rolled back, defaults to 30
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_daily_cap_minutes")]
    pub daily_cap_minutes: i64,

    #[serde(default = "default_weekly_cap_minutes")]
    pub weekly_cap_minutes: i64,

    #[serde(default = "default_submission_deadline_days")]
    pub submission_deadline_days: i64,

    #[serde(default = "default_week_starts_on")]
    pub week_starts_on: String,

    #[serde(default = "default_escalation_timeout_hours")]
    pub escalation_timeout_hours: i64,

    #[serde(default = "default_draft_max_age_hours")]
    pub draft_max_age_hours: i64,

    #[serde(default = "default_idempotency_ttl_hours")]
    pub idempotency_ttl_hours: i64,

    #[serde(default = "default_sweeper_interval_secs")]
    pub sweeper_interval_secs: u64,

    #[serde(default = "default_sweeper_batch_size")]
    pub sweeper_batch_size: i64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Default port if SERVER_PORT environment variable is not set.
fn default_port() -> u16 {
    3000
}

/// 4 hours of overtime per day.
fn default_daily_cap_minutes() -> i64 {
    240
}

/// 15 hours of overtime per week.
fn default_weekly_cap_minutes() -> i64 {
    900
}

fn default_submission_deadline_days() -> i64 {
    30
}

fn default_week_starts_on() -> String {
    "sunday".to_string()
}

fn default_escalation_timeout_hours() -> i64 {
    72
}

fn default_draft_max_age_hours() -> i64 {
    48
}

fn default_idempotency_ttl_hours() -> i64 {
    24
}

fn default_sweeper_interval_secs() -> u64 {
    300
}

fn default_sweeper_batch_size() -> i64 {
    100
}

/// A request that outlives this rolls back; the idempotency gate makes the
/// client's retry safe.
fn default_request_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config
    /// struct.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Required environment variables are missing (e.g., DATABASE_URL)
    /// - Environment variable values cannot be parsed into expected types
    pub fn from_env() -> Result<Self, envy::Error> {
        // Try to load .env file if it exists (does nothing if not found)
        dotenvy::dotenv().ok();

        // Parse environment variables into Config struct
        // Field names are automatically converted: database_url -> DATABASE_URL
        envy::from_env::<Config>()
    }

    /// Extract the policy values consumed by the request lifecycle manager.
    ///
    /// # Errors
    ///
    /// Fails if `WEEK_STARTS_ON` is not a weekday name chrono understands
    /// ("sunday", "mon", "Friday", ...).
    pub fn overtime_policy(&self) -> anyhow::Result<OvertimePolicy> {
        let week_starts_on: Weekday = self.week_starts_on.parse().map_err(|_| {
            anyhow::anyhow!("WEEK_STARTS_ON is not a weekday name: {}", self.week_starts_on)
        })?;

        Ok(OvertimePolicy {
            daily_cap_minutes: self.daily_cap_minutes,
            weekly_cap_minutes: self.weekly_cap_minutes,
            submission_deadline_days: self.submission_deadline_days,
            week_starts_on,
        })
    }
}

/// Overtime policy values checked at submission time.
///
/// Kept `Copy` so services can take it by value without plumbing references
/// through every call.
#[derive(Debug, Clone, Copy)]
pub struct OvertimePolicy {
    /// Max accumulated overtime minutes per employee per calendar day
    pub daily_cap_minutes: i64,

    /// Max accumulated overtime minutes per employee per week
    pub weekly_cap_minutes: i64,

    /// Submissions older than this many days after the work date are refused
    pub submission_deadline_days: i64,

    /// Which weekday opens the cap week
    pub week_starts_on: Weekday,
}
