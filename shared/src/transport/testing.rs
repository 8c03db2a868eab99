//! In-memory [`Transport`] implementations for tests.
//!
//! Enabled with the `testing` feature (or within this crate's own unit
//! tests). None of this is part of the wire protocol.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use super::{Transport, TransportError};
use crate::connection::{framing::receive_hybrid, hybrid_message::HybridMessage};

struct Channel {
    buf: Mutex<VecDeque<u8>>,
    closed: AtomicBool,
}

impl Channel {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            buf: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        })
    }
}

/// One endpoint of an in-memory duplex byte pipe.
///
/// Models the TCP behaviors the framing layer depends on: reads drain
/// buffered bytes even after the peer hangs up, and end-of-stream is only
/// reported once the pipe is both closed and empty.
pub struct PipeTransport {
    rx: Arc<Channel>,
    tx: Arc<Channel>,
    connected: AtomicBool,
}

impl PipeTransport {
    pub fn pair() -> (PipeTransport, PipeTransport) {
        let ab = Channel::new();
        let ba = Channel::new();
        let a = PipeTransport {
            rx: ba.clone(),
            tx: ab.clone(),
            connected: AtomicBool::new(true),
        };
        let b = PipeTransport {
            rx: ab,
            tx: ba,
            connected: AtomicBool::new(true),
        };
        (a, b)
    }
}

impl Transport for PipeTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&self, buf: &[u8]) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if self.tx.closed.load(Ordering::SeqCst) {
            self.connected.store(false, Ordering::SeqCst);
            return Err(TransportError::SendFailed {
                len: buf.len(),
                source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer hung up"),
            });
        }
        let Ok(mut queue) = self.tx.buf.lock() else {
            panic!("PipeTransport queue poisoned");
        };
        queue.extend(buf.iter().copied());
        Ok(())
    }

    fn receive(&self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let Ok(mut queue) = self.rx.buf.lock() else {
            panic!("PipeTransport queue poisoned");
        };
        if queue.is_empty() {
            if self.rx.closed.load(Ordering::SeqCst) {
                // Peer closed and everything buffered has been drained.
                self.connected.store(false, Ordering::SeqCst);
            }
            return Ok(Vec::new());
        }
        let take = max_len.min(queue.len());
        Ok(queue.drain(..take).collect())
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.tx.closed.store(true, Ordering::SeqCst);
        self.rx.closed.store(true, Ordering::SeqCst);
    }
}

/// A connected transport whose sends never complete.
///
/// Used to pin a connection's send worker so outgoing-queue backpressure can
/// be observed deterministically. `disconnect` releases the stuck worker.
pub struct StalledTransport {
    connected: AtomicBool,
}

impl StalledTransport {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
        }
    }
}

impl Transport for StalledTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&self, _buf: &[u8]) -> Result<(), TransportError> {
        while self.is_connected() {
            thread::sleep(Duration::from_millis(5));
        }
        Err(TransportError::NotConnected)
    }

    fn receive(&self, _max_len: usize) -> Result<Vec<u8>, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        thread::sleep(Duration::from_millis(5));
        Ok(Vec::new())
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// A transport that accepts every send and records the raw bytes.
///
/// [`CollectingTransport::decode`] replays the captured stream through the
/// framing layer so tests can assert on whole messages.
pub struct CollectingTransport {
    sent: Mutex<Vec<u8>>,
    connected: AtomicBool,
}

impl CollectingTransport {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        }
    }

    /// Decode everything sent so far into complete hybrid messages.
    pub fn decode(&self) -> Vec<HybridMessage> {
        let Ok(sent) = self.sent.lock() else {
            panic!("CollectingTransport buffer poisoned");
        };
        decode_stream(sent.clone())
    }
}

impl Transport for CollectingTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&self, buf: &[u8]) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let Ok(mut sent) = self.sent.lock() else {
            panic!("CollectingTransport buffer poisoned");
        };
        sent.extend_from_slice(buf);
        Ok(())
    }

    fn receive(&self, _max_len: usize) -> Result<Vec<u8>, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        thread::sleep(Duration::from_millis(5));
        Ok(Vec::new())
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Decode a captured byte stream into the hybrid messages it frames.
pub fn decode_stream(bytes: Vec<u8>) -> Vec<HybridMessage> {
    let (writer, reader) = PipeTransport::pair();
    writer
        .send(&bytes)
        .expect("writing into an open pipe cannot fail");
    writer.disconnect();

    let mut messages = Vec::new();
    while let Ok(Some(msg)) = receive_hybrid(&reader) {
        messages.push(msg);
    }
    messages
}
