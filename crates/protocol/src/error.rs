//! Error types for the protocol crate.

use crate::BUFFER_SIZE;

/// A message that does not follow the command/reply grammar.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("`{verb}` expects {expected} tokens, got {got}")]
    Arity {
        verb: String,
        expected: usize,
        got: usize,
    },

    #[error("unknown verb: {0:?}")]
    UnknownVerb(String),

    #[error("{field} is not a base-10 integer: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("token cannot be sent on the wire: {0:?}")]
    InvalidToken(String),

    #[error("message is not valid UTF-8")]
    InvalidUtf8,

    #[error("unexpected reply: {0:?}")]
    UnexpectedReply(String),
}

/// Errors from a single read or write on the connection.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out")]
    Timeout,

    #[error("message too large: {0} bytes (max {BUFFER_SIZE})")]
    TooLarge(usize),
}
