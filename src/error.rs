//! Error types for the rotative trading engine

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the rotative trading engine
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    // Market data errors (isolated per symbol, never abort a cycle)
    #[error("Market data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    #[error("Exchange request failed: {0}")]
    Exchange(String),

    #[error("Exchange request timed out after {0}ms")]
    ExchangeTimeout(u64),

    // Risk errors
    #[error("Trade rejected by risk checks: {}", reasons.join("; "))]
    ValidationRejected { reasons: Vec<String> },

    // Execution errors
    #[error("Order execution failed for {symbol}: {reason}")]
    ExecutionFailed { symbol: String, reason: String },

    // Position lifecycle errors
    #[error("Position not found: {0}")]
    PositionNotFound(String),

    #[error("Position {0} is already closed")]
    PositionClosed(String),

    // Persistence errors
    #[error("Persistence failed for {record}: {reason}")]
    PersistenceFailed { record: String, reason: String },

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    // Orchestrator errors
    #[error("Analysis engine is already running")]
    AlreadyRunning,

    #[error("Analysis engine is not running")]
    NotRunning,

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is contained at symbol/record scope and must not
    /// abort the surrounding cycle or monitoring tick.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::DataUnavailable { .. }
                | Error::Exchange(_)
                | Error::ExchangeTimeout(_)
                | Error::ValidationRejected { .. }
                | Error::ExecutionFailed { .. }
                | Error::PersistenceFailed { .. }
        )
    }

    /// Check if this error aborts engine start-up (configuration absence).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::MissingEnvVar(_) | Error::AlreadyRunning
        )
    }

    /// Shorthand for a per-symbol market data failure.
    pub fn data_unavailable(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::DataUnavailable {
            symbol: symbol.into(),
            reason: reason.into(),
        }
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

// Conversion from reqwest errors
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::ExchangeTimeout(10_000)
        } else {
            Error::Exchange(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(Error::data_unavailable("BTCUSDT", "timeout").is_recoverable());
        assert!(Error::ExecutionFailed {
            symbol: "BTCUSDT".to_string(),
            reason: "rejected".to_string(),
        }
        .is_recoverable());
        assert!(!Error::Config("empty watchlist".to_string()).is_recoverable());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Config("no strategies enabled".to_string()).is_fatal());
        assert!(Error::MissingEnvVar("BINANCE_API_KEY".to_string()).is_fatal());
        assert!(!Error::Exchange("503".to_string()).is_fatal());
    }

    #[test]
    fn test_validation_rejected_display() {
        let err = Error::ValidationRejected {
            reasons: vec!["leverage too high".to_string(), "drawdown".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("leverage too high"));
        assert!(msg.contains("drawdown"));
    }
}
