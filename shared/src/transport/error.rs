use thiserror::Error;

/// Errors raised by the byte-stream transport layer.
///
/// All of these are isolated to the affected connection; none of them should
/// ever bring down the producer process.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to resolve or connect to a peer
    #[error("Failed to connect to {host}:{port}: {source}")]
    ConnectFailed {
        host: String,
        port: u16,
        source: std::io::Error,
    },

    /// Failed to bind the listening socket
    #[error("Failed to bind listener on port {port}: {source}")]
    BindFailed { port: u16, source: std::io::Error },

    /// Failed to accept an incoming connection
    #[error("Failed to accept incoming connection: {0}")]
    AcceptFailed(std::io::Error),

    /// Write to the peer failed; the connection has been marked disconnected
    #[error("Failed to send {len} bytes: {source}")]
    SendFailed { len: usize, source: std::io::Error },

    /// Read from the peer failed; the connection has been marked disconnected
    #[error("Failed to receive: {0}")]
    ReceiveFailed(std::io::Error),

    /// Operation attempted on a transport that is no longer connected
    #[error("Transport is not connected")]
    NotConnected,
}
