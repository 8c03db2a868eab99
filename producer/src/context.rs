//! Shared producer state: topology mode, the connection registry, id
//! counters, asset-transfer ledger, inbound message routing and app
//! metadata.
//!
//! One context is created at the process entry point and injected into every
//! window at construction. Windows render from their own threads, so the
//! context travels as [`SharedContext`], a cloneable locked handle.

use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard},
    thread,
    time::Instant,
};

use limn_shared::{ConnectionId, ConnectionRegistry, MAX_RANDOM_PORT, MIN_RANDOM_PORT, POLL_INTERVAL};
use log::{info, warn};
use serde_json::Value;

use crate::{
    config::{ClientConfig, Metadata, RecordConfig, ServerConfig},
    error::ProducerError,
    paths::SessionPaths,
    process::{viewer_executable, CompanionProcess},
    scene::ObjectId,
    window::WindowId,
};

/// Process topology. Write-once: entered exactly once, before the first
/// frame is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyMode {
    /// Default: no network; a viewer is spawned on demand over a file
    /// hand-off.
    File,
    /// Scene is captured to disk only.
    Record,
    /// Producer listens for viewer connections the caller starts.
    Server,
    /// Producer listens, and spawns the connecting viewer itself.
    ServerByoc,
    /// Producer connects out to a viewer the caller started.
    Client,
    /// Producer spawns a listening viewer, then connects out to it.
    ClientByos,
}

pub(crate) struct RecordState {
    pub(crate) path: PathBuf,
    pub(crate) start: Instant,
}

pub struct Context {
    pub(crate) mode: TopologyMode,
    pub(crate) network_mode: bool,
    pub(crate) first_frame: bool,
    next_window_id: WindowId,
    next_object_id: ObjectId,
    pub(crate) net: ConnectionRegistry,
    transferred_assets: HashMap<ConnectionId, HashSet<PathBuf>>,
    window_messages: HashMap<WindowId, Vec<Value>>,
    pub(crate) metadata: Metadata,
    metadata_synced: HashMap<ConnectionId, bool>,
    pub(crate) record: Option<RecordState>,
    companion: Option<CompanionProcess>,
    pub(crate) session: SessionPaths,
}

impl Context {
    fn new() -> Self {
        Self {
            mode: TopologyMode::File,
            network_mode: false,
            first_frame: false,
            next_window_id: 0,
            next_object_id: 0,
            net: ConnectionRegistry::new(),
            transferred_assets: HashMap::new(),
            window_messages: HashMap::new(),
            metadata: Metadata::default(),
            metadata_synced: HashMap::new(),
            record: None,
            companion: None,
            session: SessionPaths::new(),
        }
    }

    pub(crate) fn alloc_window_id(&mut self) -> WindowId {
        let id = self.next_window_id;
        self.next_window_id += 1;
        id
    }

    pub(crate) fn alloc_object_id(&mut self) -> ObjectId {
        let id = self.next_object_id;
        self.next_object_id += 1;
        id
    }

    fn ensure_mode_unset(&self) {
        if self.mode != TopologyMode::File {
            panic!("Window mode already set");
        }
        if self.first_frame {
            panic!("Must set window mode before first render");
        }
    }

    fn enable_record(&mut self, record: Option<RecordConfig>) {
        let Some(config) = record else {
            return;
        };
        let path = match config.path {
            Some(path) => path,
            None => self.session.save_dir(),
        };
        self.record = Some(RecordState {
            path,
            start: Instant::now(),
        });
    }

    pub(crate) fn record_elapsed(&self) -> f32 {
        self.record
            .as_ref()
            .map(|state| state.start.elapsed().as_secs_f32())
            .unwrap_or(0.0)
    }

    pub(crate) fn set_record_mode(&mut self, config: RecordConfig) -> Result<(), ProducerError> {
        if self.mode == TopologyMode::Record {
            return Ok(());
        }
        self.ensure_mode_unset();

        let path = match config.path {
            Some(path) => {
                if path.exists() {
                    return Err(ProducerError::RecordDirectoryExists(path));
                }
                std::fs::create_dir_all(&path).map_err(|source| ProducerError::Io {
                    path: path.clone(),
                    source,
                })?;
                path
            }
            None => self.session.save_dir(),
        };
        self.record = Some(RecordState {
            path,
            start: Instant::now(),
        });
        self.mode = TopologyMode::Record;
        Ok(())
    }

    pub(crate) fn set_client_mode(&mut self, config: ClientConfig) -> Result<(), ProducerError> {
        if self.mode == TopologyMode::Client {
            return Ok(());
        }
        self.ensure_mode_unset();

        self.network_mode = true;
        info!("Connecting client...");
        self.net
            .connect_client(config.blocking, &config.host, config.port);
        self.enable_record(config.record);
        self.mode = TopologyMode::Client;
        Ok(())
    }

    pub(crate) fn set_server_mode(&mut self, config: ServerConfig) -> Result<(), ProducerError> {
        if self.mode == TopologyMode::Server {
            return Ok(());
        }
        self.ensure_mode_unset();

        self.network_mode = true;
        if !self.net.connect_server(config.blocking, config.port) {
            warn!(
                "Could not bind port {}; no viewer will be able to connect",
                config.port
            );
        }
        self.enable_record(config.record);
        self.metadata = config.metadata;
        self.mode = TopologyMode::Server;
        Ok(())
    }

    pub(crate) fn set_client_mode_byos(
        &mut self,
        record: Option<RecordConfig>,
    ) -> Result<(), ProducerError> {
        if self.mode == TopologyMode::ClientByos {
            return Ok(());
        }
        self.ensure_mode_unset();
        if self.companion.is_some() {
            panic!("Companion process already started");
        }

        let port = fastrand::u16(MIN_RANDOM_PORT..=MAX_RANDOM_PORT);
        info!("Using port: {port}");

        info!("Starting viewer process...");
        let exe = viewer_executable();
        let port_arg = port.to_string();
        let companion = CompanionProcess::spawn(
            &exe,
            ["-m", "server", "-o", "localhost", "-p", port_arg.as_str(), "-r"],
        )
        .map_err(|source| ProducerError::Spawn {
            path: exe.clone(),
            source,
        })?;
        self.companion = Some(companion);
        info!("Viewer process started.");

        self.network_mode = true;
        info!("Connecting client...");
        self.net.connect_client(true, "localhost", port);
        info!("Client connected.");

        self.enable_record(record);
        self.mode = TopologyMode::ClientByos;
        Ok(())
    }

    pub(crate) fn set_server_mode_byoc(
        &mut self,
        record: Option<RecordConfig>,
    ) -> Result<(), ProducerError> {
        if self.mode == TopologyMode::ServerByoc {
            return Ok(());
        }
        self.ensure_mode_unset();
        if self.companion.is_some() {
            panic!("Companion process already started");
        }

        let port = loop {
            let port = fastrand::u16(MIN_RANDOM_PORT..=MAX_RANDOM_PORT);
            info!("Using port: {port}");
            if self.net.connect_server(false, port) {
                break port;
            }
            info!("Bind failed, trying another port.");
        };

        info!("Starting viewer process...");
        let exe = viewer_executable();
        let port_arg = port.to_string();
        let companion = CompanionProcess::spawn(
            &exe,
            [
                "-m",
                "client",
                "-o",
                "localhost",
                "-p",
                port_arg.as_str(),
                "-r",
                "-d",
            ],
        )
        .map_err(|source| ProducerError::Spawn {
            path: exe.clone(),
            source,
        })?;
        self.companion = Some(companion);
        info!("Viewer process started.");

        self.network_mode = true;
        while self.net.connection_ids().is_empty() {
            thread::sleep(POLL_INTERVAL);
        }

        self.enable_record(record);
        self.mode = TopologyMode::ServerByoc;
        Ok(())
    }

    /// Send the app metadata record to any connection that has not seen the
    /// current version.
    pub(crate) fn update_metadata(&mut self) {
        if self.metadata.flags.is_empty() {
            return;
        }
        for conn_id in self.net.connection_ids() {
            let synced = *self.metadata_synced.get(&conn_id).unwrap_or(&false);
            if !synced {
                info!("Sending metadata.");
                if !self.net.send_to(conn_id, self.metadata.serialize(), Vec::new()) {
                    warn!("Failed to send metadata to connection {conn_id}");
                }
                self.metadata_synced.insert(conn_id, true);
            }
        }
    }

    /// Sort all inbound messages: flag updates are applied here, everything
    /// else is routed to its window's queue.
    pub(crate) fn check_incoming(&mut self) {
        for msg in self.net.drain_all_inboxes() {
            if msg.message_type() == Some("flags") {
                if let Some(flags) = msg.header.get("flags").and_then(Value::as_object) {
                    for (name, value) in flags {
                        let flag = self.metadata.flags.entry(name.clone()).or_default();
                        let value = value.as_bool().unwrap_or(false);
                        if flag.toggle {
                            flag.state = value;
                        } else if value {
                            flag.state = true;
                        }
                    }
                }
                continue;
            }

            let window_id = msg
                .header
                .get("window")
                .and_then(Value::as_i64)
                .unwrap_or(0) as WindowId;
            self.window_messages
                .entry(window_id)
                .or_default()
                .push(msg.header);
        }
    }

    pub(crate) fn take_window_messages(&mut self, window_id: WindowId) -> Vec<Value> {
        self.check_incoming();
        self.window_messages
            .get_mut(&window_id)
            .map(std::mem::take)
            .unwrap_or_default()
    }

    pub(crate) fn check_and_consume_flag(&mut self, name: &str) -> bool {
        if !self.network_mode {
            return false;
        }
        self.update_metadata();
        self.check_incoming();

        let Some(flag) = self.metadata.flags.get_mut(name) else {
            return false;
        };
        if flag.toggle {
            return flag.state;
        }
        let state = flag.state;
        flag.state = false;
        state
    }

    pub(crate) fn can_render(&mut self) -> bool {
        if matches!(self.mode, TopologyMode::Client | TopologyMode::Server) {
            return !self.net.connection_ids().is_empty();
        }
        true
    }

    pub(crate) fn transferred_mut(&mut self, conn_id: ConnectionId) -> &mut HashSet<PathBuf> {
        self.transferred_assets.entry(conn_id).or_default()
    }
}

/// Cloneable handle to the producer context. Constructed once at the process
/// entry point and handed to every window.
#[derive(Clone)]
pub struct SharedContext {
    inner: Arc<Mutex<Context>>,
}

impl SharedContext {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Context::new())),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Context> {
        let Ok(guard) = self.inner.lock() else {
            panic!("Producer context poisoned");
        };
        guard
    }

    /// Capture every frame to disk; no viewer is involved.
    pub fn set_record_mode(&self, config: RecordConfig) -> Result<(), ProducerError> {
        self.lock().set_record_mode(config)
    }

    /// Connect out to a viewer the caller is responsible for starting.
    pub fn set_client_mode(&self, config: ClientConfig) -> Result<(), ProducerError> {
        self.lock().set_client_mode(config)
    }

    /// Listen for viewer connections the caller is responsible for starting.
    pub fn set_server_mode(&self, config: ServerConfig) -> Result<(), ProducerError> {
        self.lock().set_server_mode(config)
    }

    /// Spawn a listening viewer on a random loopback port and connect to it.
    pub fn set_client_mode_byos(&self, record: Option<RecordConfig>) -> Result<(), ProducerError> {
        self.lock().set_client_mode_byos(record)
    }

    /// Listen on a random loopback port and spawn a viewer that connects to
    /// it.
    pub fn set_server_mode_byoc(&self, record: Option<RecordConfig>) -> Result<(), ProducerError> {
        self.lock().set_server_mode_byoc(record)
    }

    pub fn topology_mode(&self) -> TopologyMode {
        self.lock().mode
    }

    /// Read a viewer flag. Momentary flags are consumed by the read; toggle
    /// flags just report their mirrored state.
    pub fn check_and_consume_flag(&self, name: &str) -> bool {
        self.lock().check_and_consume_flag(name)
    }

    /// False only in plain Client/Server modes while no viewer is attached.
    pub fn can_render(&self) -> bool {
        self.lock().can_render()
    }

    /// Actual bound listener port in server topologies; useful when the
    /// configured port was 0 (bind-any).
    pub fn listen_port(&self) -> Option<u16> {
        self.lock().net.listen_port()
    }

    /// Directory renderables stage texture/mesh files into for replication.
    pub fn asset_staging_dir(&self) -> PathBuf {
        let mut ctx = self.lock();
        let dir = ctx.session.asset_dir();
        if !dir.exists() {
            if let Err(err) = std::fs::create_dir_all(&dir) {
                warn!("Could not create asset staging dir {}: {err}", dir.display());
            }
        }
        dir
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        thread,
        time::{Duration, Instant},
    };

    use limn_shared::{
        send_hybrid,
        transport::testing::{CollectingTransport, PipeTransport},
    };
    use serde_json::json;

    use super::*;
    use crate::config::Flag;

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("limn-context-{}-{name}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn setting_the_same_mode_twice_is_a_noop() {
        let root = scratch_dir("idempotent");
        let shared = SharedContext::new();
        shared
            .set_record_mode(RecordConfig::at(&root))
            .expect("first call");
        shared
            .set_record_mode(RecordConfig::at(&root))
            .expect("second call is a no-op");
        assert_eq!(shared.topology_mode(), TopologyMode::Record);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    #[should_panic(expected = "Window mode already set")]
    fn switching_modes_is_a_contract_error() {
        let root = scratch_dir("switch");
        let shared = SharedContext::new();
        shared
            .set_record_mode(RecordConfig::at(&root))
            .expect("record mode");
        let _ = std::fs::remove_dir_all(&root);
        let _ = shared.set_client_mode(ClientConfig::default());
    }

    #[test]
    #[should_panic(expected = "Must set window mode before first render")]
    fn setting_a_mode_after_the_first_frame_is_a_contract_error() {
        let root = scratch_dir("late");
        let shared = SharedContext::new();
        {
            let mut ctx = shared.lock();
            ctx.first_frame = true;
        }
        let _ = shared.set_record_mode(RecordConfig::at(&root));
    }

    #[test]
    fn existing_record_directory_is_refused() {
        let root = scratch_dir("exists");
        std::fs::create_dir_all(&root).expect("pre-create");
        let shared = SharedContext::new();
        let result = shared.set_record_mode(RecordConfig::at(&root));
        assert!(matches!(
            result,
            Err(ProducerError::RecordDirectoryExists(_))
        ));
        assert_eq!(shared.topology_mode(), TopologyMode::File);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn metadata_is_sent_once_per_connection() {
        let shared = SharedContext::new();
        let collecting = Arc::new(CollectingTransport::new());
        {
            let mut ctx = shared.lock();
            ctx.network_mode = true;
            ctx.metadata = Metadata::named("app").with_flag("snap", false);
            ctx.net.add_connection(collecting.clone());
            ctx.update_metadata();
            ctx.update_metadata();
        }

        assert!(wait_until(|| {
            let mut ctx = shared.lock();
            let ids = ctx.net.connection_ids();
            ids.iter().all(|id| ctx.net.outgoing_queue_len(*id) == 0)
        }));

        let metadata_msgs = collecting
            .decode()
            .iter()
            .filter(|msg| msg.message_type() == Some("metadata"))
            .count();
        assert_eq!(metadata_msgs, 1);
    }

    #[test]
    fn momentary_flags_latch_and_consume() {
        let shared = SharedContext::new();
        let (ours, theirs) = PipeTransport::pair();
        {
            let mut ctx = shared.lock();
            ctx.network_mode = true;
            ctx.metadata = Metadata::named("app").with_flag("snap", false);
            ctx.net.add_connection(Arc::new(ours));
        }

        send_hybrid(&theirs, &json!({ "type": "flags", "flags": { "snap": true } }), &[])
            .expect("send flags");

        assert!(wait_until(|| shared.check_and_consume_flag("snap")));
        // Consumed by the read above.
        assert!(!shared.check_and_consume_flag("snap"));
    }

    #[test]
    fn toggle_flags_mirror_the_viewer() {
        let shared = SharedContext::new();
        let (ours, theirs) = PipeTransport::pair();
        {
            let mut ctx = shared.lock();
            ctx.network_mode = true;
            let mut metadata = Metadata::named("app");
            metadata.flags.insert(
                "grid".to_string(),
                Flag {
                    toggle: true,
                    state: false,
                },
            );
            ctx.metadata = metadata;
            ctx.net.add_connection(Arc::new(ours));
        }

        send_hybrid(&theirs, &json!({ "type": "flags", "flags": { "grid": true } }), &[])
            .expect("send flags");
        assert!(wait_until(|| shared.check_and_consume_flag("grid")));
        // Toggle flags are not consumed by reads.
        assert!(shared.check_and_consume_flag("grid"));

        send_hybrid(&theirs, &json!({ "type": "flags", "flags": { "grid": false } }), &[])
            .expect("send flags");
        assert!(wait_until(|| !shared.check_and_consume_flag("grid")));
    }
}
