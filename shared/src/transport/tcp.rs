use std::{
    io::{ErrorKind, Read, Write},
    net::{Shutdown, TcpListener, TcpStream},
    sync::atomic::{AtomicBool, Ordering},
    thread,
};

use log::warn;

use super::{Transport, TransportError, POLL_INTERVAL};

/// Blocking TCP implementation of [`Transport`].
///
/// Reads use a short timeout ([`POLL_INTERVAL`]) so worker loops blocked in
/// `receive` stay responsive to shutdown flags, matching the select-with-
/// timeout pattern the wire protocol assumes.
pub struct TcpTransport {
    stream: TcpStream,
    connected: AtomicBool,
}

impl TcpTransport {
    /// Single connection attempt. Callers that want retry-until-connected
    /// semantics loop over this with a short sleep.
    pub fn connect(host: &str, port: u16) -> Result<Self, TransportError> {
        let stream = TcpStream::connect((host, port)).map_err(|source| {
            TransportError::ConnectFailed {
                host: host.to_string(),
                port,
                source,
            }
        })?;
        Self::from_stream(stream).map_err(|source| TransportError::ConnectFailed {
            host: host.to_string(),
            port,
            source,
        })
    }

    fn from_stream(stream: TcpStream) -> std::io::Result<Self> {
        stream.set_read_timeout(Some(POLL_INTERVAL))?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            connected: AtomicBool::new(true),
        })
    }

    fn mark_disconnected(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self.stream.shutdown(Shutdown::Both);
        }
    }
}

impl Transport for TcpTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&self, buf: &[u8]) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if let Err(source) = (&self.stream).write_all(buf) {
            self.mark_disconnected();
            return Err(TransportError::SendFailed {
                len: buf.len(),
                source,
            });
        }
        Ok(())
    }

    fn receive(&self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let mut buf = vec![0u8; max_len];
        match (&self.stream).read(&mut buf) {
            Ok(0) => {
                // Orderly shutdown from the peer.
                self.mark_disconnected();
                Ok(Vec::new())
            }
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Ok(Vec::new())
            }
            Err(err) => {
                self.mark_disconnected();
                Err(TransportError::ReceiveFailed(err))
            }
        }
    }

    fn disconnect(&self) {
        self.mark_disconnected();
    }
}

/// Listening-side counterpart of [`TcpTransport`].
///
/// The listener is non-blocking; `accept` sleeps [`POLL_INTERVAL`] when no
/// connection is pending so a background accept loop can watch a shutdown
/// flag between polls.
pub struct TcpAcceptor {
    listener: TcpListener,
    port: u16,
}

impl TcpAcceptor {
    pub fn bind(port: u16) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .map_err(|source| TransportError::BindFailed { port, source })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| TransportError::BindFailed { port, source })?;
        let port = listener
            .local_addr()
            .map_err(|source| TransportError::BindFailed { port, source })?
            .port();
        Ok(Self { listener, port })
    }

    /// The actual bound port; differs from the requested one when binding
    /// port 0.
    pub fn local_port(&self) -> u16 {
        self.port
    }

    /// Poll for one incoming connection, waiting at most [`POLL_INTERVAL`].
    pub fn accept(&self) -> Result<Option<TcpTransport>, TransportError> {
        match self.listener.accept() {
            Ok((stream, _addr)) => match TcpTransport::from_stream(stream) {
                Ok(transport) => Ok(Some(transport)),
                Err(err) => {
                    warn!("Accepted connection could not be configured: {err}");
                    Ok(None)
                }
            },
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                thread::sleep(POLL_INTERVAL);
                Ok(None)
            }
            Err(err) => Err(TransportError::AcceptFailed(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acceptor_reports_ephemeral_port() {
        let acceptor = TcpAcceptor::bind(0).expect("bind port 0");
        assert_ne!(acceptor.local_port(), 0);
    }

    #[test]
    fn loopback_send_receive() {
        let acceptor = TcpAcceptor::bind(0).expect("bind");
        let port = acceptor.local_port();

        let client = TcpTransport::connect("127.0.0.1", port).expect("connect");
        let server = loop {
            if let Some(t) = acceptor.accept().expect("accept") {
                break t;
            }
        };

        client.send(b"hello").expect("send");
        let mut got = Vec::new();
        while got.len() < 5 {
            got.extend(server.receive(5 - got.len()).expect("receive"));
        }
        assert_eq!(got, b"hello");

        client.disconnect();
        assert!(!client.is_connected());
    }
}
