use chrono::{NaiveDate, NaiveTime};
use thiserror::Error;

use shared_models::error::AppError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AvailabilityError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid booking window: {0}")]
    InvalidWindow(String),

    #[error("Invalid slot time {0}")]
    InvalidTime(String),

    #[error("Availability unknown for {date}: {reason}")]
    UnknownAvailability { date: NaiveDate, reason: String },

    #[error("Precondition violation: {0}")]
    PreconditionViolation(String),

    #[error("Slot {} on {date} is no longer available", .start_time.format("%H:%M"))]
    Conflict { date: NaiveDate, start_time: NaiveTime },

    #[error("Submission failed: {0}")]
    Submission(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<AvailabilityError> for AppError {
    fn from(err: AvailabilityError) -> Self {
        match err {
            AvailabilityError::Configuration(_)
            | AvailabilityError::InvalidWindow(_)
            | AvailabilityError::InvalidTime(_) => AppError::ValidationError(err.to_string()),
            AvailabilityError::PreconditionViolation(_) => AppError::BadRequest(err.to_string()),
            AvailabilityError::Conflict { .. } => AppError::Conflict(err.to_string()),
            AvailabilityError::UnknownAvailability { .. }
            | AvailabilityError::Submission(_)
            | AvailabilityError::Transport(_) => AppError::ExternalService(err.to_string()),
        }
    }
}
