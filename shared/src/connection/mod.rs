mod error;
pub mod framing;
pub mod hybrid_message;
pub mod registry;

pub use error::ProtocolError;
