use thiserror::Error;

/// Unified error type for dialer construction and use
#[derive(Error, Debug)]
pub enum DialerError {
    // Construction errors
    #[error("No transport registered for: {0}")]
    UnsupportedTransport(String),

    #[error("Unable to construct transport dialer: {0}")]
    TransportConstruction(#[source] anyhow::Error),

    // Per-dial errors
    #[error("Dial failed: {0}")]
    DialFailed(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),
}

/// Result type alias for dialer operations
pub type Result<T> = std::result::Result<T, DialerError>;

impl DialerError {
    /// Check if this error is fatal to constructing a dialer
    ///
    /// Construction errors mean the caller must skip this server entirely;
    /// everything else is a per-call failure.
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            DialerError::UnsupportedTransport(_)
                | DialerError::TransportConstruction(_)
                | DialerError::InvalidConfig(_)
        )
    }
}

// Convert from hyper errors
impl From<hyper::Error> for DialerError {
    fn from(err: hyper::Error) -> Self {
        DialerError::Http(err.to_string())
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for DialerError {
    fn from(err: url::ParseError) -> Self {
        DialerError::InvalidAddress(err.to_string())
    }
}
