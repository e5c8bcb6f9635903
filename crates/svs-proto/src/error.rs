//! Error types shared by the protocol crate.

use thiserror::Error;

/// Errors produced while parsing or framing wire data.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// The line had no verb after source extraction.
    #[error("empty line")]
    EmptyLine,

    /// The verb contained characters outside `[A-Za-z0-9]`.
    #[error("malformed verb at position {0}")]
    BadVerb(usize),

    /// A line exceeded the framing limit before a terminator was seen.
    #[error("line longer than {max} bytes")]
    LineTooLong {
        /// The framing limit that was exceeded.
        max: usize,
    },

    /// Input was not valid UTF-8.
    #[error("invalid utf-8 in line")]
    InvalidUtf8,

    /// Underlying transport error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
