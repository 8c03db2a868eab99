use thiserror::Error;

use crate::transport::TransportError;

/// Errors in the hybrid-message framing layer.
///
/// Unlike transport errors (which only mean a peer went away), a protocol
/// error means the byte stream itself cannot be trusted any more; the
/// connection it occurred on must be torn down.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Underlying transport failure while a frame was in flight
    #[error("Transport failure inside a frame: {0}")]
    Transport(#[from] TransportError),

    /// The peer closed the stream in the middle of a frame
    #[error("Frame truncated: expected {expected} more bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Declared frame length does not match the bytes actually read
    #[error("Incorrect hybrid message size read: {actual}/{expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// The header was not valid structured text
    #[error("Failed to parse message header: {0}")]
    HeaderParse(#[source] serde_json::Error),

    /// The header could not be serialized for the wire
    #[error("Failed to encode message header: {0}")]
    HeaderEncode(#[source] serde_json::Error),

    /// Top-level arrays are not valid hybrid message headers
    #[error("Array top level values are not supported for hybrid message headers")]
    ArrayHeader,
}
