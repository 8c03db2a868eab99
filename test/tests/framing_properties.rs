//! Property tests for the hybrid-message framing layer.

use limn_shared::{receive_hybrid, send_hybrid, transport::testing::PipeTransport, Transport};
use proptest::prelude::*;
use serde_json::json;

proptest! {
    /// Arbitrary headers and 0..N arbitrary binary payloads survive
    /// encode-then-decode byte-identically.
    #[test]
    fn round_trip_is_lossless(
        type_name in "[a-z_]{1,16}",
        note in "[ -~]{0,64}",
        number in any::<i64>(),
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..512), 0..5),
    ) {
        let (producer, viewer) = PipeTransport::pair();
        let header = json!({ "type": type_name, "note": note, "number": number });

        send_hybrid(&producer, &header, &payloads).unwrap();
        let msg = receive_hybrid(&viewer).unwrap().expect("complete message");

        prop_assert_eq!(msg.header, header);
        prop_assert_eq!(msg.payloads, payloads);
    }

    /// Any strict prefix of a frame is detected as an error, never silently
    /// accepted as a message.
    #[test]
    fn truncated_frames_never_decode(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..64), 0..3),
        cut in 1usize..4096,
    ) {
        let (producer, capture) = PipeTransport::pair();
        send_hybrid(&producer, &json!({ "type": "scene" }), &payloads).unwrap();

        let mut frame = Vec::new();
        loop {
            let chunk = capture.receive(4096).unwrap();
            if chunk.is_empty() {
                break;
            }
            frame.extend(chunk);
        }

        let cut = cut.min(frame.len() - 1);
        let (writer, reader) = PipeTransport::pair();
        writer.send(&frame[..cut]).unwrap();
        writer.disconnect();

        prop_assert!(receive_hybrid(&reader).is_err());
    }
}
