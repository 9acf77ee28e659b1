use std::time::Duration;

use crate::model::ProviderId;
use crate::types::Api;

/// Errors raised by a provider adapter while opening or reading a stream.
///
/// These never escape a started call: the driver turns them into a terminal
/// `error` event. Context overflow is not a variant; it is detected from the
/// final message (see [`crate::overflow`]).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("authentication failed ({provider}): {message}")]
    AuthenticationFailed { provider: ProviderId, message: String },
    #[error("rate limited ({provider}): {message}")]
    RateLimited {
        provider: ProviderId,
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("request timed out ({provider}): {message}")]
    Timeout { provider: ProviderId, message: String },
    /// Transport or stream I/O failed.
    #[error("network error ({provider}): {message}")]
    Network { provider: ProviderId, message: String },
    #[error("invalid request ({provider}): {message}")]
    InvalidRequest {
        provider: ProviderId,
        message: String,
        status_code: Option<u16>,
    },
    #[error("service unavailable ({provider}): {message}")]
    ServiceUnavailable {
        provider: ProviderId,
        message: String,
        status_code: Option<u16>,
    },
    #[error("content filtered ({provider}): {message}")]
    ContentFiltered { provider: ProviderId, message: String },
    /// Provider response shape or event sequencing was invalid.
    #[error("protocol error ({provider}): {message}")]
    Protocol { provider: ProviderId, message: String },
    #[error("request aborted ({provider})")]
    Aborted { provider: ProviderId },
    #[error("provider error ({provider}): {message}")]
    Unknown {
        provider: ProviderId,
        message: String,
        status_code: Option<u16>,
    },
}

impl ProviderError {
    /// Creates a transport-level error.
    pub fn network(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self::Network {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol-level error.
    pub fn protocol(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self::Protocol {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn aborted(provider: impl Into<ProviderId>) -> Self {
        Self::Aborted {
            provider: provider.into(),
        }
    }

    pub fn auth(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self::AuthenticationFailed {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Classifies an error reported inside an otherwise successful stream
    /// (for example an SSE `error` frame) from its vendor type and message.
    pub fn from_stream_error(
        provider: impl Into<ProviderId>,
        kind: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        let provider = provider.into();
        let message = message.into();
        let kind = kind.unwrap_or_default().to_ascii_lowercase();
        if kind.contains("overloaded") || kind.contains("unavailable") {
            Self::ServiceUnavailable {
                provider,
                message,
                status_code: None,
            }
        } else if kind.contains("rate_limit") || kind.contains("throttling") {
            Self::RateLimited {
                provider,
                message,
                retry_after: None,
            }
        } else if kind.contains("invalid_request") || kind.contains("validation") {
            Self::InvalidRequest {
                provider,
                message,
                status_code: None,
            }
        } else if kind.contains("authentication") || kind.contains("permission") {
            Self::AuthenticationFailed { provider, message }
        } else {
            Self::Unknown {
                provider,
                message,
                status_code: None,
            }
        }
    }

    /// Maps a non-success HTTP response to the error taxonomy.
    pub fn from_status(
        provider: impl Into<ProviderId>,
        status: u16,
        body: &str,
        retry_after: Option<Duration>,
    ) -> Self {
        let provider = provider.into();
        let message = format!("{status} {}", body.trim());
        match status {
            401 | 403 => Self::AuthenticationFailed { provider, message },
            408 | 504 => Self::Timeout { provider, message },
            429 => Self::RateLimited {
                provider,
                message,
                retry_after,
            },
            500 | 502 | 503 | 529 => Self::ServiceUnavailable {
                provider,
                message,
                status_code: Some(status),
            },
            400..=499 => Self::InvalidRequest {
                provider,
                message,
                status_code: Some(status),
            },
            _ => Self::Unknown {
                provider,
                message,
                status_code: Some(status),
            },
        }
    }

    /// Returns the provider associated with this error.
    pub fn provider_id(&self) -> &ProviderId {
        match self {
            Self::AuthenticationFailed { provider, .. }
            | Self::RateLimited { provider, .. }
            | Self::Timeout { provider, .. }
            | Self::Network { provider, .. }
            | Self::InvalidRequest { provider, .. }
            | Self::ServiceUnavailable { provider, .. }
            | Self::ContentFiltered { provider, .. }
            | Self::Protocol { provider, .. }
            | Self::Aborted { provider }
            | Self::Unknown { provider, .. } => provider,
        }
    }

    /// Returns the human-readable message for this error.
    pub fn message(&self) -> &str {
        match self {
            Self::AuthenticationFailed { message, .. }
            | Self::RateLimited { message, .. }
            | Self::Timeout { message, .. }
            | Self::Network { message, .. }
            | Self::InvalidRequest { message, .. }
            | Self::ServiceUnavailable { message, .. }
            | Self::ContentFiltered { message, .. }
            | Self::Protocol { message, .. }
            | Self::Unknown { message, .. } => message,
            Self::Aborted { .. } => "Request was aborted",
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::InvalidRequest { status_code, .. }
            | Self::ServiceUnavailable { status_code, .. }
            | Self::Unknown { status_code, .. } => *status_code,
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

/// Structural problem found by the message transformation pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("structural violation after stage `{stage}` at message {index}: {message}")]
    StructuralViolation {
        stage: String,
        index: usize,
        message: String,
    },
}

/// Top-level error type for the public harness API.
///
/// Returned only before a call's task starts; failures after that point are
/// delivered as a terminal `error` event on the stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HarnessError {
    /// Invalid harness/provider configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input.
    #[error("validation error: {0}")]
    Validation(String),
    /// No adapter is registered for the model's protocol.
    #[error("no provider registered for api: {api}")]
    ProviderNotFound { api: Api },
    #[error("provider for api {api} is disabled")]
    ProviderDisabled { api: Api },
    /// The registered adapter declares a different protocol than the model.
    #[error("model api {model_api} does not match adapter api {adapter_api}")]
    ApiMismatch { model_api: Api, adapter_api: Api },
    #[error("registry error: {0}")]
    Registry(String),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// The stream closed without a terminal event.
    #[error("stream ended without a final message")]
    StreamEnded,
    /// Waiting for a stream result exceeded the caller's deadline.
    #[error("timed out after {0:?} waiting for stream result")]
    Timeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_taxonomy() {
        assert!(matches!(
            ProviderError::from_status("openai", 429, "slow down", None),
            ProviderError::RateLimited { .. }
        ));
        assert!(matches!(
            ProviderError::from_status("openai", 401, "bad key", None),
            ProviderError::AuthenticationFailed { .. }
        ));
        assert!(matches!(
            ProviderError::from_status("anthropic", 529, "overloaded", None),
            ProviderError::ServiceUnavailable {
                status_code: Some(529),
                ..
            }
        ));
        assert!(matches!(
            ProviderError::from_status("anthropic", 400, "prompt is too long", None),
            ProviderError::InvalidRequest { .. }
        ));
    }

    #[test]
    fn message_keeps_status_and_body() {
        let err = ProviderError::from_status("groq", 413, " too big ", None);
        assert_eq!(err.message(), "413 too big");
        assert_eq!(err.provider_id().as_str(), "groq");
    }

    #[test]
    fn stream_error_types_are_classified() {
        let err = ProviderError::from_stream_error(
            "anthropic",
            Some("overloaded_error"),
            "Overloaded",
        );
        assert!(matches!(err, ProviderError::ServiceUnavailable { .. }));
    }
}
