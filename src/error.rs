use std::fmt;

use thiserror::Error;

/// How an external call failed. Kept separate from the message so surfaces
/// can map failures to status codes without parsing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceFailure {
    RateLimited,
    Timeout,
    Http(u16),
    Malformed,
    Transport,
}

impl fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceFailure::RateLimited => f.write_str("rate limited"),
            ServiceFailure::Timeout => f.write_str("timed out"),
            ServiceFailure::Http(status) => write!(f, "HTTP {status}"),
            ServiceFailure::Malformed => f.write_str("malformed response"),
            ServiceFailure::Transport => f.write_str("transport error"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ResponderError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("{service} call failed ({failure}): {message}")]
    ExternalService {
        service: &'static str,
        failure: ServiceFailure,
        message: String,
    },
}

impl ResponderError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        ResponderError::InvalidInput(msg.into())
    }

    pub fn dataset(msg: impl Into<String>) -> Self {
        ResponderError::Dataset(msg.into())
    }

    pub fn external(
        service: &'static str,
        failure: ServiceFailure,
        message: impl Into<String>,
    ) -> Self {
        ResponderError::ExternalService {
            service,
            failure,
            message: message.into(),
        }
    }

    /// Classify a reqwest error raised while talking to `service`.
    pub fn from_reqwest(service: &'static str, err: reqwest::Error) -> Self {
        let failure = if err.is_timeout() {
            ServiceFailure::Timeout
        } else if err.is_decode() {
            ServiceFailure::Malformed
        } else if let Some(status) = err.status() {
            ServiceFailure::Http(status.as_u16())
        } else {
            ServiceFailure::Transport
        };
        Self::external(service, failure, err.to_string())
    }

    pub fn is_external(&self) -> bool {
        matches!(self, ResponderError::ExternalService { .. })
    }
}

pub type ResponderResult<T> = Result<T, ResponderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_error_message_names_service_and_failure() {
        let err = ResponderError::external("generation", ServiceFailure::Timeout, "no reply after 30s");
        assert_eq!(
            err.to_string(),
            "generation call failed (timed out): no reply after 30s"
        );
        assert!(err.is_external());
    }

    #[test]
    fn http_failure_displays_status() {
        assert_eq!(ServiceFailure::Http(503).to_string(), "HTTP 503");
    }
}
