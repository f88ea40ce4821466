use std::time::Duration;

use thiserror::Error;

use crate::core::activity::ActivityId;

/// Failure talking to the execution service.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    /// Non-2xx response. `body` is the raw response text, kept for diagnostics.
    #[error("{url} returned {status} {reason}")]
    Status {
        url: String,
        status: u16,
        reason: String,
        body: String,
    },

    #[error("invalid response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("invalid submission: {0}")]
    InvalidRequest(String),

    #[error("service rejected submission: {0}")]
    Rejected(#[source] ClientError),
}

/// Terminal client-side failure of a poll. Delivered through the completion
/// continuation, never thrown across the task boundary.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("activity {0} is missing from the service's activity list")]
    NotFound(ActivityId),

    #[error("activity {activity_id} did not finish within {elapsed:?}")]
    Timeout {
        activity_id: ActivityId,
        elapsed: Duration,
    },

    #[error("execution service unreachable after {attempts} attempts: {last_error}")]
    Unreachable {
        attempts: u32,
        #[source]
        last_error: ClientError,
    },
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Poll(#[from] PollError),
}
