use std::time::Duration;

/// What went wrong while talking to the chat backend.
///
/// The split between fatal and retryable is informational: generation
/// never retries on its own, but logs and wire payloads carry the
/// classification so operators can tell a bad request from a flaky
/// upstream.
#[derive(Clone, Debug, thiserror::Error)]
pub enum BackendError {
    /// The API key was rejected. Retrying cannot help.
    #[error("backend rejected the credentials: {0}")]
    AuthenticationFailed(String),

    /// The backend refused the request shape itself.
    #[error("malformed request: {0}")]
    InvalidRequest(String),

    #[error("rate limited by the backend")]
    RateLimited,

    #[error("backend returned status {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("backend is shedding load")]
    Overloaded,

    #[error("transport failure: {0}")]
    NetworkError(String),

    #[error("stream cut short: {0}")]
    StreamInterrupted(String),

    /// The stream produced no bytes for the whole idle window.
    #[error("no data within {0:?}")]
    Timeout(Duration),
}

impl BackendError {
    /// True for failures a later attempt could plausibly get past.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited
                | Self::ServerError { .. }
                | Self::Overloaded
                | Self::NetworkError(_)
                | Self::StreamInterrupted(_)
                | Self::Timeout(_)
        )
    }

    /// Stable snake_case tag used in logs and error chunks.
    pub fn error_kind(&self) -> &'static str {
        use BackendError::*;
        match self {
            AuthenticationFailed(_) => "authentication_failed",
            InvalidRequest(_) => "invalid_request",
            RateLimited => "rate_limited",
            ServerError { .. } => "server_error",
            Overloaded => "overloaded",
            NetworkError(_) => "network_error",
            StreamInterrupted(_) => "stream_interrupted",
            Timeout(_) => "timeout",
        }
    }

    /// Fold a non-200 HTTP response into the taxonomy.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            400 | 404 | 422 => Self::InvalidRequest(body),
            401 | 403 => Self::AuthenticationFailed(body),
            429 => Self::RateLimited,
            503 => Self::Overloaded,
            other @ 500..=599 => Self::ServerError {
                status: other,
                body,
            },
            other => Self::InvalidRequest(format!("unexpected status {other}: {body}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_covers_transient_failures() {
        let transient = [
            BackendError::RateLimited,
            BackendError::ServerError {
                status: 502,
                body: "bad gateway".into(),
            },
            BackendError::Overloaded,
            BackendError::NetworkError("connection reset".into()),
            BackendError::StreamInterrupted("eof mid-frame".into()),
            BackendError::Timeout(Duration::from_secs(45)),
        ];
        for error in transient {
            assert!(error.is_retryable(), "{error}");
        }

        assert!(!BackendError::AuthenticationFailed("denied".into()).is_retryable());
        assert!(!BackendError::InvalidRequest("no model".into()).is_retryable());
    }

    #[test]
    fn status_codes_fold_into_the_taxonomy() {
        for status in [400u16, 401, 403, 404, 422] {
            let error = BackendError::from_status(status, "denied".into());
            assert!(!error.is_retryable(), "status {status}");
        }
        for status in [429u16, 500, 502, 503] {
            let error = BackendError::from_status(status, "busy".into());
            assert!(error.is_retryable(), "status {status}");
        }

        assert!(matches!(
            BackendError::from_status(503, "draining".into()),
            BackendError::Overloaded
        ));
        assert!(matches!(
            BackendError::from_status(429, "slow down".into()),
            BackendError::RateLimited
        ));
        assert!(matches!(
            BackendError::from_status(418, "teapot".into()),
            BackendError::InvalidRequest(_)
        ));
    }

    #[test]
    fn kind_tags_are_stable() {
        let cases = [
            (BackendError::Timeout(Duration::from_secs(1)), "timeout"),
            (BackendError::Overloaded, "overloaded"),
            (BackendError::RateLimited, "rate_limited"),
            (BackendError::NetworkError("dns".into()), "network_error"),
            (
                BackendError::AuthenticationFailed("bad key".into()),
                "authentication_failed",
            ),
        ];
        for (error, kind) in cases {
            assert_eq!(error.error_kind(), kind);
        }
    }
}
