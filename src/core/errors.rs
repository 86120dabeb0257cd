use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Request failed after {attempts} attempts: {last_error}")]
    TransientRequestFailure { attempts: u32, last_error: String },

    #[error("API error: {code} - {message}")]
    ApiError { code: i64, message: String },

    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Authentication fault: {0}")]
    AuthenticationFault(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection timeout: {0}")]
    ConnectionTimeout(String),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::core::config::ConfigError),
}

impl ExchangeError {
    /// Whether the failure is a transport hiccup worth retrying locally.
    ///
    /// Venue rejections, client-side HTTP errors and configuration problems
    /// are surfaced to the caller untouched.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NetworkError(_) | Self::ConnectionTimeout(_) => true,
            Self::HttpStatus { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }

    /// Whether this is the venue's own application-level rejection.
    pub fn is_venue_error(&self) -> bool {
        matches!(self, Self::ApiError { .. })
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::ConnectionTimeout(e.to_string())
        } else {
            Self::NetworkError(e.to_string())
        }
    }
}
