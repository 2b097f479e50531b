//! Protocol error types

use thiserror::Error;

/// Errors that can occur during protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Stream is not speaking the frame protocol
    #[error("Bad frame magic: {0:#04x}")]
    BadMagic(u8),

    /// Unknown message type
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    /// Payload exceeds maximum size
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// A quote was opened but never closed
    #[error("Unterminated {0} quote in command line")]
    UnterminatedQuote(char),

    /// Command line contained no tokens
    #[error("Empty command line")]
    EmptyCommand,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
