//! Hybrid-message framing over a [`Transport`].
//!
//! Wire layout, all integers little-endian u64:
//!
//! ```text
//! total_length | payload_count | header block | payload block 0 | ...
//! ```
//!
//! where a block is `size | size bytes of content`, and `total_length` covers
//! everything after the two leading fields: header bytes, payload bytes, and
//! the `8 * (1 + payload_count)` per-block size prefixes.

use std::{thread, time::Duration};

use serde_json::Value;

use crate::{
    connection::{hybrid_message::HybridMessage, ProtocolError},
    transport::Transport,
};

const LEN_FIELD: usize = std::mem::size_of::<u64>();

/// Sleep between short reads while the rest of a frame is in flight.
const REASSEMBLY_PAUSE: Duration = Duration::from_millis(1);

/// Frame and send one hybrid message.
///
/// A message offered to an already-disconnected transport is dropped
/// silently; the caller's next connection sweep reaps the peer.
pub fn send_hybrid(
    transport: &dyn Transport,
    header: &Value,
    payloads: &[Vec<u8>],
) -> Result<(), ProtocolError> {
    if !transport.is_connected() {
        return Ok(());
    }

    let header_bytes = serde_json::to_vec(header).map_err(ProtocolError::HeaderEncode)?;

    let mut total_length = (LEN_FIELD * (1 + payloads.len())) as u64;
    total_length += header_bytes.len() as u64;
    for payload in payloads {
        total_length += payload.len() as u64;
    }

    transport.send(&total_length.to_le_bytes())?;
    transport.send(&(payloads.len() as u64).to_le_bytes())?;

    send_block(transport, &header_bytes)?;
    for payload in payloads {
        send_block(transport, payload)?;
    }

    Ok(())
}

fn send_block(transport: &dyn Transport, content: &[u8]) -> Result<(), ProtocolError> {
    transport.send(&(content.len() as u64).to_le_bytes())?;
    transport.send(content)?;
    Ok(())
}

/// Receive one hybrid message, or `None` when nothing arrived within the
/// transport's poll window.
///
/// The declared `total_length` is checked against the bytes actually read;
/// any mismatch, truncation, or array-shaped header is a [`ProtocolError`]
/// and the connection must be torn down by the caller.
pub fn receive_hybrid(transport: &dyn Transport) -> Result<Option<HybridMessage>, ProtocolError> {
    if !transport.is_connected() {
        return Ok(None);
    }

    let Some(total_buf) = receive_exact(transport, LEN_FIELD, true)? else {
        return Ok(None);
    };
    let total_length = read_u64(&total_buf);

    let count_buf = require(receive_exact(transport, LEN_FIELD, false)?)?;
    let payload_count = read_u64(&count_buf);

    let mut received = LEN_FIELD as u64 * (1 + payload_count);

    let header_bytes = receive_block(transport)?;
    received += header_bytes.len() as u64;

    let header: Value =
        serde_json::from_slice(&header_bytes).map_err(ProtocolError::HeaderParse)?;
    if header.is_array() {
        return Err(ProtocolError::ArrayHeader);
    }

    let mut payloads = Vec::new();
    for _ in 0..payload_count {
        let payload = receive_block(transport)?;
        received += payload.len() as u64;
        payloads.push(payload);
    }

    if received != total_length {
        return Err(ProtocolError::SizeMismatch {
            expected: total_length,
            actual: received,
        });
    }

    Ok(Some(HybridMessage::with_payloads(header, payloads)))
}

fn receive_block(transport: &dyn Transport) -> Result<Vec<u8>, ProtocolError> {
    let size_buf = require(receive_exact(transport, LEN_FIELD, false)?)?;
    let size = read_u64(&size_buf) as usize;
    require(receive_exact(transport, size, false)?)
}

/// Accumulate exactly `len` bytes. With `exit_on_empty`, an empty first read
/// means the peer is idle and `None` is returned; afterwards the frame is
/// committed and a connection loss mid-read is a truncation error.
fn receive_exact(
    transport: &dyn Transport,
    len: usize,
    exit_on_empty: bool,
) -> Result<Option<Vec<u8>>, ProtocolError> {
    let mut buf: Vec<u8> = Vec::new();
    let mut first = true;

    while buf.len() < len && transport.is_connected() {
        let chunk = transport.receive(len - buf.len())?;

        if chunk.is_empty() {
            if first && exit_on_empty {
                return Ok(None);
            }
            first = false;
            thread::sleep(REASSEMBLY_PAUSE);
            continue;
        }

        first = false;
        buf.extend_from_slice(&chunk);
    }

    if buf.len() < len {
        return Err(ProtocolError::Truncated {
            expected: len - buf.len(),
            actual: buf.len(),
        });
    }

    Ok(Some(buf))
}

fn require(block: Option<Vec<u8>>) -> Result<Vec<u8>, ProtocolError> {
    block.ok_or(ProtocolError::Truncated {
        expected: LEN_FIELD,
        actual: 0,
    })
}

fn read_u64(buf: &[u8]) -> u64 {
    let mut bytes = [0u8; LEN_FIELD];
    bytes.copy_from_slice(buf);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::transport::testing::PipeTransport;

    #[test]
    fn round_trip_header_and_payloads() {
        let (a, b) = PipeTransport::pair();

        let header = json!({"type": "scene", "data": {"objects": [{"id": 3}]}});
        let payloads = vec![vec![0u8, 1, 2, 255], Vec::new(), vec![42u8; 1000]];
        send_hybrid(&a, &header, &payloads).expect("send");

        let msg = receive_hybrid(&b).expect("receive").expect("message");
        assert_eq!(msg.header, header);
        assert_eq!(msg.payloads, payloads);
    }

    #[test]
    fn round_trip_no_payloads() {
        let (a, b) = PipeTransport::pair();

        let header = json!({"type": "heartbeat"});
        send_hybrid(&a, &header, &[]).expect("send");

        let msg = receive_hybrid(&b).expect("receive").expect("message");
        assert_eq!(msg.header, header);
        assert!(msg.payloads.is_empty());
    }

    #[test]
    fn idle_peer_is_not_an_error() {
        let (_a, b) = PipeTransport::pair();
        assert!(receive_hybrid(&b).expect("receive").is_none());
    }

    #[test]
    fn declared_length_mismatch_is_fatal() {
        let (a, b) = PipeTransport::pair();

        // Hand-framed message lying about its total length.
        let header_bytes = serde_json::to_vec(&json!({"type": "scene"})).unwrap();
        let bogus_total = (header_bytes.len() + LEN_FIELD) as u64 + 7;
        a.send(&bogus_total.to_le_bytes()).unwrap();
        a.send(&0u64.to_le_bytes()).unwrap();
        a.send(&(header_bytes.len() as u64).to_le_bytes()).unwrap();
        a.send(&header_bytes).unwrap();

        match receive_hybrid(&b) {
            Err(ProtocolError::SizeMismatch { expected, actual }) => {
                assert_eq!(expected, bogus_total);
                assert_eq!(actual, bogus_total - 7);
            }
            other => panic!("expected SizeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn truncated_stream_is_detected() {
        let (a, b) = PipeTransport::pair();

        // Start a frame, then drop the connection before the header block.
        a.send(&100u64.to_le_bytes()).unwrap();
        a.send(&0u64.to_le_bytes()).unwrap();
        a.disconnect();

        assert!(matches!(
            receive_hybrid(&b),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn array_header_is_rejected() {
        let (a, b) = PipeTransport::pair();

        let header_bytes = serde_json::to_vec(&json!([1, 2, 3])).unwrap();
        let total = (header_bytes.len() + LEN_FIELD) as u64;
        a.send(&total.to_le_bytes()).unwrap();
        a.send(&0u64.to_le_bytes()).unwrap();
        a.send(&(header_bytes.len() as u64).to_le_bytes()).unwrap();
        a.send(&header_bytes).unwrap();

        assert!(matches!(
            receive_hybrid(&b),
            Err(ProtocolError::ArrayHeader)
        ));
    }
}
