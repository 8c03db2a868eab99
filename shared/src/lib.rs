//! # Limn Shared
//! Common functionality shared between the limn producer crate and limn
//! viewer implementations: the byte-stream transport, hybrid-message framing,
//! the connection registry, and the on-disk recording format.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

mod connection;
mod recording;
pub mod transport;

pub use connection::{
    framing::{receive_hybrid, send_hybrid},
    hybrid_message::HybridMessage,
    registry::{ConnectionId, ConnectionRegistry},
    ProtocolError,
};
pub use recording::{write_message_dir, RecordingError, RecordingWriter};
pub use transport::{
    TcpAcceptor, TcpTransport, Transport, TransportError, DEFAULT_PORT, MAX_RANDOM_PORT,
    MIN_RANDOM_PORT, POLL_INTERVAL,
};
