//! Stream error taxonomy.
//!
//! Every failure mode of a streaming turn maps onto one of three variants so
//! callers can branch on recoverability without string matching. Backend
//! errors carry the backend's own code and recoverability verdict; the other
//! variants are produced client-side. Malformed frames are not an error here:
//! the router drops them silently and the turn keeps streaming.

use thiserror::Error;

/// Errors surfaced while opening or consuming a streaming turn.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The request could not be sent or the backend refused it.
    #[error("transport error ({status:?}): {message}")]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// The byte stream broke mid-turn.
    #[error("stream read error: {message}")]
    Read { message: String },

    /// The backend reported an error through the stream itself.
    #[error("backend error [{code}]: {message}")]
    Backend {
        code: String,
        message: String,
        recoverable: bool,
    },
}

impl StreamError {
    /// Build a transport error from an HTTP status line.
    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        StreamError::Transport {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Build a backend error from stream-reported fields.
    pub fn backend(code: impl Into<String>, message: impl Into<String>, recoverable: bool) -> Self {
        StreamError::Backend {
            code: code.into(),
            message: message.into(),
            recoverable,
        }
    }

    /// Stable short code for logs and telemetry.
    pub fn error_code(&self) -> &str {
        match self {
            StreamError::Transport { .. } => "TRANSPORT",
            StreamError::Read { .. } => "READ",
            StreamError::Backend { code, .. } => code,
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            StreamError::Transport { status, .. } => {
                // 4xx means the request itself is bad; retrying won't help.
                !matches!(status, Some(s) if (400..500).contains(s))
            }
            StreamError::Read { .. } => true,
            StreamError::Backend { recoverable, .. } => *recoverable,
        }
    }

    /// Short human-readable message suitable for direct display.
    pub fn user_message(&self) -> String {
        match self {
            StreamError::Transport { status: Some(s), .. } if (500..600).contains(s) => {
                "The server hit an internal error. Please try again.".to_string()
            }
            StreamError::Transport {
                status: Some(s), ..
            } if (400..500).contains(s) => {
                "The request was rejected by the server.".to_string()
            }
            StreamError::Transport { .. } => {
                "Could not reach the server. Check your connection.".to_string()
            }
            StreamError::Read { .. } => {
                "The connection dropped mid-response. You can retry.".to_string()
            }
            StreamError::Backend { message, .. } => message.clone(),
        }
    }
}

impl From<reqwest::Error> for StreamError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            StreamError::Transport {
                status: Some(status.as_u16()),
                message: err.to_string(),
            }
        } else if err.is_body() || err.is_decode() {
            StreamError::Read {
                message: err.to_string(),
            }
        } else {
            StreamError::Transport {
                status: None,
                message: err.to_string(),
            }
        }
    }
}

impl From<crate::events::ErrorInfo> for StreamError {
    fn from(info: crate::events::ErrorInfo) -> Self {
        StreamError::backend(
            info.code.unwrap_or_else(|| "UNKNOWN".to_string()),
            info.message,
            info.recoverable,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ErrorInfo;

    #[test]
    fn test_error_codes() {
        assert_eq!(StreamError::http_status(502, "bad gateway").error_code(), "TRANSPORT");
        assert_eq!(
            StreamError::Read { message: "eof".into() }.error_code(),
            "READ"
        );
        assert_eq!(
            StreamError::backend("TIMEOUT", "model timed out", true).error_code(),
            "TIMEOUT"
        );
    }

    #[test]
    fn test_recoverability() {
        assert!(StreamError::http_status(503, "unavailable").is_recoverable());
        assert!(!StreamError::http_status(422, "bad request").is_recoverable());
        assert!(StreamError::Read { message: "reset".into() }.is_recoverable());
        assert!(!StreamError::backend("POLICY", "refused", false).is_recoverable());
    }

    #[test]
    fn test_user_messages_are_nonempty() {
        let errors = [
            StreamError::http_status(500, "boom"),
            StreamError::http_status(404, "gone"),
            StreamError::Transport { status: None, message: "dns".into() },
            StreamError::Read { message: "reset".into() },
            StreamError::backend("TIMEOUT", "model timed out", true),
        ];
        for err in errors {
            assert!(!err.user_message().is_empty());
        }
    }

    #[test]
    fn test_backend_user_message_passes_through() {
        let err = StreamError::backend("TIMEOUT", "model timed out", true);
        assert_eq!(err.user_message(), "model timed out");
    }

    #[test]
    fn test_from_error_info() {
        let err: StreamError = ErrorInfo::new("TIMEOUT", "slow", true).into();
        assert_eq!(err.error_code(), "TIMEOUT");
        assert!(err.is_recoverable());

        let anon: StreamError = ErrorInfo {
            code: None,
            message: "x".into(),
            recoverable: false,
        }
        .into();
        assert_eq!(anon.error_code(), "UNKNOWN");
        assert!(!anon.is_recoverable());
    }
}
