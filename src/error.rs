use thiserror::Error;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed buffer sizes or dimensions, rejected before any state mutation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Signaling connection or data channel not open
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// SDP create/set failure
    #[error("Negotiation failure: {0}")]
    NegotiationFailure(String),

    /// Requested capture path is not implemented
    #[error("Unsupported capture path: {0}")]
    UnsupportedPath(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Video error: {0}")]
    VideoError(String),

    #[error("Signaling error: {0}")]
    SignalingError(String),

    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Short machine-readable kind, used as the key for throttled logging
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::InvalidInput(_) => "invalid_input",
            AppError::TransportUnavailable(_) => "transport_unavailable",
            AppError::NegotiationFailure(_) => "negotiation_failure",
            AppError::UnsupportedPath(_) => "unsupported_path",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::Serialization(_) => "serialization",
            AppError::VideoError(_) => "video",
            AppError::SignalingError(_) => "signaling",
            AppError::WebRtcError(_) => "webrtc",
            AppError::Internal(_) => "internal",
        }
    }
}

impl From<webrtc::Error> for AppError {
    fn from(e: webrtc::Error) -> Self {
        AppError::WebRtcError(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_is_stable() {
        assert_eq!(AppError::InvalidInput("x".into()).kind(), "invalid_input");
        assert_eq!(
            AppError::NegotiationFailure("x".into()).kind(),
            "negotiation_failure"
        );
    }

    #[test]
    fn test_display() {
        let err = AppError::TransportUnavailable("signaling not open".into());
        assert_eq!(err.to_string(), "Transport unavailable: signaling not open");
    }
}
