//! Router Errors

use std::time::Duration;

use thiserror::Error;

use crate::backend::BackendError;

/// Errors returned by routing calls
#[derive(Debug, Error)]
pub enum RouterError {
    /// No endpoint is available, closed-circuit and capable of the task
    #[error("no available endpoints")]
    NoAvailableEndpoints,

    /// A single attempt exceeded its time limit
    #[error("attempt on endpoint '{endpoint_id}' timed out after {}ms", .timeout.as_millis())]
    AttemptTimeout {
        /// Endpoint that timed out
        endpoint_id: String,
        /// Limit that was exceeded
        timeout: Duration,
    },

    /// A single attempt failed in the backend
    #[error("attempt on endpoint '{endpoint_id}' failed: {source}")]
    AttemptFailed {
        /// Endpoint that failed
        endpoint_id: String,
        /// Backend error
        #[source]
        source: BackendError,
    },

    /// Every attempt failed
    #[error("all endpoints failed after {attempts} attempt(s){}", describe_last(.last_error))]
    AllEndpointsFailed {
        /// Attempts made
        attempts: u32,
        /// Error from the final attempt
        last_error: Option<Box<RouterError>>,
    },

    /// No endpoint is registered under this id
    #[error("unknown endpoint '{0}'")]
    UnknownEndpoint(String),
}

impl RouterError {
    /// Endpoint an attempt-level error refers to
    #[must_use]
    pub fn endpoint_id(&self) -> Option<&str> {
        match self {
            Self::AttemptTimeout { endpoint_id, .. } | Self::AttemptFailed { endpoint_id, .. } => {
                Some(endpoint_id)
            }
            _ => None,
        }
    }

    /// Final attempt error of an exhausted route
    #[must_use]
    pub fn last_error(&self) -> Option<&RouterError> {
        match self {
            Self::AllEndpointsFailed { last_error, .. } => last_error.as_deref(),
            _ => None,
        }
    }
}

fn describe_last(last_error: &Option<Box<RouterError>>) -> String {
    match last_error {
        Some(e) => format!(": {e}"),
        None => String::new(),
    }
}

/// Result alias for routing calls
pub type Result<T> = std::result::Result<T, RouterError>;
