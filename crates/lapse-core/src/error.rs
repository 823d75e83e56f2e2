use thiserror::Error;

#[derive(Debug, Error)]
pub enum LapseError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid timestamp: {0}")]
    Timestamp(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LapseError {
    /// Short error code string, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            LapseError::Config(_) => "CONFIG_ERROR",
            LapseError::Timestamp(_) => "TIMESTAMP_ERROR",
            LapseError::Serialization(_) => "SERIALIZATION_ERROR",
            LapseError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, LapseError>;
