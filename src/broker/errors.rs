//! Broker error types.

use thiserror::Error;

use crate::job::codec::CodecError;

/// Errors raised by broker operations.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Broker connection error: {message}")]
    Connection { message: String },

    #[error("Broker command failed: {command}: {message}")]
    Command { command: String, message: String },

    #[error("Unexpected broker reply for {command}: {detail}")]
    Protocol { command: String, detail: String },

    #[error("Job payload error: {0}")]
    Payload(#[from] CodecError),
}

impl BrokerError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn command(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            message: message.into(),
        }
    }

    pub fn protocol(command: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Protocol {
            command: command.into(),
            detail: detail.into(),
        }
    }
}

impl From<redis::RedisError> for BrokerError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
            BrokerError::connection(err.to_string())
        } else {
            BrokerError::command("broker", err.to_string())
        }
    }
}

/// Result type alias for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;
