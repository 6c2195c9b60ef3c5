//! Probe error taxonomy and outcome classification
//!
//! Probes return a [`CollectError`]; the scheduler never sees a raw transport
//! or HTTP error. Classification into an [`Outcome`] decides how the breakers
//! and retry schedule are charged:
//!
//! - transport problems (connection refused, socket timeout, aborted reads)
//!   count as timeouts and are retried with back-off
//! - HTTP 5xx, 408 and 429 are retriable failures
//! - every other non-2xx status and all decode errors are non-retriable
//!   failures that wait for the next check interval

use std::fmt;

use reqwest::StatusCode;

/// Result of classifying one probe invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The call did not complete in time, or could not reach the target at
    /// the transport level.
    Timeout,
    Failure {
        retriable: bool,
    },
    /// The invocation was cancelled by an enclosing scope; nothing is
    /// recorded for it.
    Cancelled,
    /// Do not record this outcome at all.
    Ignored,
}

/// Errors that can occur while collecting from a service.
#[derive(Debug)]
pub enum CollectError {
    /// Transport-level I/O error: connection refused, socket timeout,
    /// aborted read. Always retriable.
    Transport(reqwest::Error),

    /// The target responded with a non-2xx status.
    Http { status: StatusCode },

    /// The response arrived but could not be decoded.
    Decode(String),

    /// Structured collection error raised by probe code itself.
    Other { message: String, retriable: bool },

    /// The probe decided this attempt should not be recorded at all, e.g.
    /// the service does not expose the endpoint the probe targets.
    Skipped { message: String },
}

impl CollectError {
    /// A probe-level error with an explicit retriable flag.
    pub fn other(message: impl Into<String>, retriable: bool) -> Self {
        CollectError::Other {
            message: message.into(),
            retriable,
        }
    }

    /// An attempt the probe wants ignored by breakers and schedules.
    pub fn skipped(message: impl Into<String>) -> Self {
        CollectError::Skipped {
            message: message.into(),
        }
    }

    /// Whether this error should be retried with back-off before the next
    /// scheduled check interval.
    pub fn is_retriable(&self) -> bool {
        match self {
            CollectError::Transport(_) => true,
            CollectError::Http { status } => retriable_status(*status),
            CollectError::Decode(_) => false,
            CollectError::Other { retriable, .. } => *retriable,
            CollectError::Skipped { .. } => false,
        }
    }

    /// Classify this error for breaker accounting.
    pub fn outcome(&self) -> Outcome {
        match self {
            CollectError::Transport(_) => Outcome::Timeout,
            CollectError::Http { status } => Outcome::Failure {
                retriable: retriable_status(*status),
            },
            CollectError::Decode(_) => Outcome::Failure { retriable: false },
            CollectError::Other { retriable, .. } => Outcome::Failure {
                retriable: *retriable,
            },
            CollectError::Skipped { .. } => Outcome::Ignored,
        }
    }
}

fn retriable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

impl fmt::Display for CollectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectError::Transport(err) => write!(f, "transport error: {err}"),
            CollectError::Http { status } => write!(f, "unexpected HTTP status: {status}"),
            CollectError::Decode(msg) => write!(f, "failed to decode response: {msg}"),
            CollectError::Other { message, .. } => write!(f, "collection failed: {message}"),
            CollectError::Skipped { message } => write!(f, "collection skipped: {message}"),
        }
    }
}

impl std::error::Error for CollectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CollectError::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for CollectError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            CollectError::Http { status }
        } else if err.is_decode() {
            CollectError::Decode(err.to_string())
        } else {
            // connect, timeout, request and body errors are all transport
            CollectError::Transport(err)
        }
    }
}
