use thiserror::Error;

/// Unified error type for the Sluice application
///
/// Extraction attempts never produce this type; their failures are values in
/// the attempt trail. These errors cover setup: configuration, rule sets and
/// request construction.
#[derive(Error, Debug)]
pub enum SluiceError {
    // Proxy errors
    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    #[error("Unsupported proxy protocol: {0}")]
    UnsupportedProtocol(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid classification pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),
}

/// Result type alias for Sluice operations
pub type Result<T> = std::result::Result<T, SluiceError>;

impl SluiceError {
    /// Problems with a single request rather than with the process setup
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            SluiceError::InvalidRequest(_) | SluiceError::UnknownStrategy(_)
        )
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for SluiceError {
    fn from(err: url::ParseError) -> Self {
        SluiceError::InvalidProxyAddress(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_error_classification() {
        assert!(SluiceError::InvalidRequest("empty".to_string()).is_request_error());
        assert!(SluiceError::UnknownStrategy("nope".to_string()).is_request_error());

        assert!(!SluiceError::InvalidConfig("bad".to_string()).is_request_error());
        assert!(!SluiceError::InvalidPattern {
            pattern: "(".to_string(),
            reason: "unclosed group".to_string(),
        }
        .is_request_error());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            SluiceError::InvalidProxyAddress("nope".to_string()).to_string(),
            "Invalid proxy address: nope"
        );
        assert_eq!(
            SluiceError::InvalidPattern {
                pattern: "(".to_string(),
                reason: "unclosed group".to_string(),
            }
            .to_string(),
            "Invalid classification pattern `(`: unclosed group"
        );
    }

    #[test]
    fn test_from_url_parse_error() {
        let err: SluiceError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, SluiceError::InvalidProxyAddress(_)));
    }
}
