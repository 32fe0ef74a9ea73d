/// Result alias that carries the custom [`WaveEngineError`] type.
pub type Result<T> = std::result::Result<T, WaveEngineError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum WaveEngineError {
    /// A parameter was out of range. Raised synchronously at construction or
    /// reconfiguration; whatever state was active before stays active.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// Free-form failure, mostly poisoned locks inside the scheduler.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration files that fail to parse.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// Errors surfaced by the FFT planner used by the spectrum adapter.
    #[error("{0}")]
    Fft(#[from] realfft::FftError),
}

impl WaveEngineError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn invalid_config<T: Into<String>>(msg: T) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Returns `true` for [`WaveEngineError::InvalidConfiguration`].
    pub fn is_invalid_configuration(&self) -> bool {
        matches!(self, Self::InvalidConfiguration(_))
    }
}

impl From<&str> for WaveEngineError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for WaveEngineError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
