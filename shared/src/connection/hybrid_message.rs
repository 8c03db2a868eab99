use serde_json::Value;

/// One framed unit on the wire: a structured header plus an ordered list of
/// opaque binary payload blocks.
///
/// The header always carries a `type` discriminator; for `scene` messages it
/// embeds a full-or-partial scene description whose vertex/texture records
/// refer to payload blocks by index.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridMessage {
    pub header: Value,
    pub payloads: Vec<Vec<u8>>,
}

impl HybridMessage {
    pub fn new(header: Value) -> Self {
        Self {
            header,
            payloads: Vec::new(),
        }
    }

    pub fn with_payloads(header: Value, payloads: Vec<Vec<u8>>) -> Self {
        Self { header, payloads }
    }

    /// Message `type` discriminator, if the header carries one.
    pub fn message_type(&self) -> Option<&str> {
        self.header.get("type").and_then(Value::as_str)
    }

    /// Total content size: header text plus every payload block.
    pub fn size(&self) -> usize {
        let header_len = self.header.to_string().len();
        header_len + self.payloads.iter().map(Vec::len).sum::<usize>()
    }
}
