//! Error kinds surfaced by the detector, the process adapter and the LLM clients.
//!
//! Every variant maps onto one HTTP status in [`GatewayError::status_code`].
//! `BackendUnavailable` is only produced by the load-time probe and is absorbed
//! there; it never reaches an HTTP caller.

use std::time::Duration;

use thiserror::Error;

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("detection backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("failed to start backend process '{program}': {source}")]
    SpawnFailure {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("backend process exited with {}: {stderr}", exit_label(.code))]
    BackendProcessError { code: Option<i32>, stderr: String },
    #[error("backend process timed out after {0:?}")]
    BackendTimeout(Duration),
    #[error("backend invocation cancelled")]
    Cancelled,
    #[error("failed to parse backend response: {0}")]
    MalformedResponse(String),
    #[error("backend reported failure: {0}")]
    BackendRejected(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("payload exceeds limit of {limit} bytes")]
    PayloadTooLarge { limit: usize },
    #[error("{0}")]
    Unsupported(String),
    #[error("detector model not loaded")]
    NotLoaded,
    #[error("camera is not active; start the camera first")]
    CameraNotActive,
    #[error("{0} API key not configured")]
    ProviderNotConfigured(&'static str),
    #[error("{provider} API error: {message}")]
    UpstreamProviderError {
        provider: &'static str,
        message: String,
    },
}

impl GatewayError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn upstream(provider: &'static str, message: impl Into<String>) -> Self {
        Self::UpstreamProviderError {
            provider,
            message: message.into(),
        }
    }

    /// HTTP status used when the error reaches the route layer.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => 400,
            Self::CameraNotActive => 409,
            Self::PayloadTooLarge { .. } => 413,
            Self::Unsupported(_) => 501,
            Self::NotLoaded | Self::ProviderNotConfigured(_) => 503,
            Self::BackendTimeout(_) => 504,
            Self::SpawnFailure { .. }
            | Self::BackendProcessError { .. }
            | Self::MalformedResponse(_)
            | Self::BackendRejected(_)
            | Self::UpstreamProviderError { .. } => 502,
            Self::BackendUnavailable(_) | Self::Cancelled => 500,
        }
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_errors_are_client_errors() {
        assert_eq!(GatewayError::invalid_input("bad").status_code(), 400);
        assert_eq!(GatewayError::CameraNotActive.status_code(), 409);
        assert_eq!(
            GatewayError::PayloadTooLarge { limit: 10 }.status_code(),
            413
        );
    }

    #[test]
    fn backend_failures_are_gateway_errors() {
        let spawn = GatewayError::SpawnFailure {
            program: "python".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(spawn.status_code(), 502);
        assert_eq!(
            GatewayError::MalformedResponse("eof".into()).status_code(),
            502
        );
        assert_eq!(
            GatewayError::BackendTimeout(Duration::from_secs(1)).status_code(),
            504
        );
    }

    #[test]
    fn process_error_message_carries_stderr() {
        let err = GatewayError::BackendProcessError {
            code: Some(2),
            stderr: "ModuleNotFoundError: torch".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "backend process exited with status 2: ModuleNotFoundError: torch"
        );
        let killed = GatewayError::BackendProcessError {
            code: None,
            stderr: String::new(),
        };
        assert!(killed.to_string().contains("signal"));
    }
}
