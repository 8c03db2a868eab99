//! # Limn Producer
//! The producer half of limn: describe 3D/2D scenes in-process and keep any
//! number of viewers — live TCP peers, spawned companion processes, or
//! on-disk recordings — synchronized through incremental scene diffs.
//!
//! Rendering itself happens in the viewer; this crate owns the replication
//! protocol: per-connection dirty-state tracking, frame dispatch with
//! backpressure, asset hand-off, and the process-topology controller.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

mod assets;
mod config;
mod context;
mod error;
pub mod input;
mod paths;
mod process;
mod scene;
mod window;

/// Re-exports of the wire-level crate for viewers and custom transports.
pub mod shared {
    pub use limn_shared::{
        receive_hybrid, send_hybrid, write_message_dir, ConnectionId, ConnectionRegistry,
        HybridMessage, ProtocolError, RecordingError, RecordingWriter, TcpAcceptor, TcpTransport,
        Transport, TransportError, DEFAULT_PORT, MAX_RANDOM_PORT, MIN_RANDOM_PORT,
    };
}

pub use config::{ClientConfig, Flag, Metadata, RecordConfig, ServerConfig, WindowOptions};
pub use context::{SharedContext, TopologyMode};
pub use error::ProducerError;
pub use paths::ASSET_DIR_NAME;
pub use process::{CompanionProcess, VIEWER_EXECUTABLE};
pub use scene::{NodeIndex, ObjectId, Pose, Serializable, SyncStatus};
pub use window::{Window, WindowEvents, WindowId};
