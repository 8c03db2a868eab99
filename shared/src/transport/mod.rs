use std::time::Duration;

mod error;
mod tcp;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::TransportError;
pub use tcp::{TcpAcceptor, TcpTransport};

/// Conventional port a limn viewer listens on / a producer connects to.
pub const DEFAULT_PORT: u16 = 5533;

/// Lower bound of the range self-hosting modes draw ephemeral ports from.
pub const MIN_RANDOM_PORT: u16 = 49152;

/// Upper bound of the range self-hosting modes draw ephemeral ports from.
pub const MAX_RANDOM_PORT: u16 = 65535;

/// How long a blocking receive or accept waits before giving the caller a
/// chance to observe shutdown flags.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A bidirectional, reliable, ordered byte stream between a producer and a
/// viewer.
///
/// Methods take `&self` so a single connection can be shared between its
/// receive worker and its send worker; implementations are responsible for
/// whatever interior synchronization their half-duplex state needs.
pub trait Transport: Send + Sync {
    /// Whether the peer is still reachable. Send/receive failures flip this
    /// to false; it never becomes true again.
    fn is_connected(&self) -> bool;

    /// Write the entire buffer to the peer. A partial write is completed
    /// internally; an error marks the transport disconnected.
    fn send(&self, buf: &[u8]) -> Result<(), TransportError>;

    /// Read up to `max_len` bytes, blocking for at most [`POLL_INTERVAL`].
    /// An empty buffer means nothing arrived within the window.
    fn receive(&self, max_len: usize) -> Result<Vec<u8>, TransportError>;

    /// Close the stream. Idempotent. Unblocks any worker waiting in
    /// [`Transport::receive`].
    fn disconnect(&self);
}
