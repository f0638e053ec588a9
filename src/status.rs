//! Translation between wire status/health codes and persisted values.
//!
//! Wire values arrive as raw `i32`s inside prost messages, so the wire to
//! store direction can fail on codes this build does not know about. The
//! store enums are closed, so the opposite direction is total.

use chrono::{DateTime, Utc};

use crate::error::{JobRunnerError, Result};
use crate::proto;
use crate::store::{Health, Status};

/// Convert a wire run-status code to its persisted value.
pub fn status_from_wire(code: i32) -> Result<Status> {
    match proto::Status::try_from(code) {
        Ok(proto::Status::Startup) => Ok(Status::Startup),
        Ok(proto::Status::Running) => Ok(Status::Running),
        Ok(proto::Status::Stopped) => Ok(Status::Stopped),
        Ok(proto::Status::Same) => Ok(Status::Same),
        Err(_) => Err(JobRunnerError::UnrecognizedCode {
            kind: "status",
            value: code,
        }),
    }
}

/// Convert a persisted run status to its wire value.
pub fn status_to_wire(status: Status) -> proto::Status {
    match status {
        Status::Startup => proto::Status::Startup,
        Status::Running => proto::Status::Running,
        Status::Stopped => proto::Status::Stopped,
        Status::Same => proto::Status::Same,
    }
}

/// Convert a wire health code to its persisted value.
pub fn health_from_wire(code: i32) -> Result<Health> {
    match proto::Health::try_from(code) {
        Ok(proto::Health::Ok) => Ok(Health::Ok),
        Ok(proto::Health::Degraded) => Ok(Health::Degraded),
        Ok(proto::Health::Error) => Ok(Health::Error),
        Ok(proto::Health::Same) => Ok(Health::Same),
        Err(_) => Err(JobRunnerError::UnrecognizedCode {
            kind: "health",
            value: code,
        }),
    }
}

/// Convert a persisted health to its wire value.
pub fn health_to_wire(health: Health) -> proto::Health {
    match health {
        Health::Ok => proto::Health::Ok,
        Health::Degraded => proto::Health::Degraded,
        Health::Error => proto::Health::Error,
        Health::Same => proto::Health::Same,
    }
}

/// Convert a wire timestamp (unix seconds) to a persisted one. Zero means
/// "not reported" and maps to `None`, as do out-of-range values.
pub fn timestamp_from_wire(secs: i64) -> Option<DateTime<Utc>> {
    if secs == 0 {
        return None;
    }
    DateTime::from_timestamp(secs, 0)
}

/// Convert a persisted timestamp to unix seconds, zero when absent.
pub fn timestamp_to_wire(at: Option<DateTime<Utc>>) -> i64 {
    at.map(|t| t.timestamp()).unwrap_or(0)
}
