//! Bot-wide error types

use thiserror::Error;

/// Errors that can occur while running a grid strategy
#[derive(Error, Debug)]
pub enum BotError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Unrecoverable state: {0}")]
    State(String),

    #[error("Illegal state transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Unknown order: {0}")]
    UnknownOrder(String),

    #[error("Exchange error: {0}")]
    Exchange(String),

    #[error("Order '{txid}' could not be fetched after {attempts} attempts")]
    OrderFetchFailed { txid: String, attempts: u32 },

    #[error("Insufficient {currency}: required {required}, available {available}")]
    InsufficientFunds {
        currency: String,
        required: f64,
        available: f64,
    },

    #[error("State persistence error: {0}")]
    Persistence(String),

    #[error("Stream error: {0}")]
    Stream(String),
}

impl From<serde_json::Error> for BotError {
    fn from(err: serde_json::Error) -> Self {
        BotError::Persistence(err.to_string())
    }
}

impl From<std::io::Error> for BotError {
    fn from(err: std::io::Error) -> Self {
        BotError::Persistence(err.to_string())
    }
}

/// Result type for bot operations
pub type BotResult<T> = std::result::Result<T, BotError>;
