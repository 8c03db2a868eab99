use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use limn_shared::{ConnectionId, HybridMessage, RecordingWriter};
use log::{error, info, warn};
use serde_json::{json, Value};

use super::WindowId;
use crate::{
    assets,
    config::WindowOptions,
    context::{Context, SharedContext, TopologyMode},
    error::ProducerError,
    input::{KeyActionCallback, MouseClickActionCallback, KEY_ENTER, KEY_UNKNOWN},
    process::{viewer_executable, CompanionProcess},
    scene::{NodeIndex, ObjectId, Pose, SceneObject, Serializable, TransformArena},
};

/// Synthetic destination id for the single local/progressive sink used by
/// File and Record modes. Kept far away from real connection ids.
pub(crate) const PROGRESSIVE_CONN_ID: ConnectionId = ConnectionId::MAX - 1;

/// Events surfaced by one pass over a window's inbound messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowEvents {
    /// The viewer sent the continue key (Enter).
    pub key_event: bool,
    /// The viewer asked for this window to be hidden.
    pub hide_event: bool,
}

/// One logical view: an ordered list of live scene objects, a camera/UI
/// record, and the per-frame replication state machine.
pub struct Window {
    id: WindowId,
    context: SharedContext,

    width: f32,
    height: f32,
    x_position: f32,
    y_position: f32,
    perunit_layout: bool,
    title: String,
    fps: f32,
    opacity: f32,

    arena: TransformArena,
    objects: Vec<SceneObject>,

    camera_control: Value,
    camera_synced: HashMap<ConnectionId, bool>,

    frame_skip_limit: Option<usize>,
    frame_skips: HashMap<ConnectionId, u64>,

    window_top_right: NodeIndex,
    window_bottom_right: NodeIndex,
    window_top_left: NodeIndex,
    window_bottom_left: NodeIndex,

    key_press_callback: Option<KeyActionCallback>,
    mouse_click_callback: Option<MouseClickActionCallback>,

    shutdown: bool,
    buffered_frames: Vec<HybridMessage>,
    writers: HashMap<ConnectionId, RecordingWriter>,
    dead_sinks: HashSet<ConnectionId>,
    last_record_time: f32,
}

impl Window {
    pub fn new(context: &SharedContext, options: WindowOptions) -> Self {
        let id = context.lock().alloc_window_id();

        let mut arena = TransformArena::new();
        let window_top_right = arena.insert("window_top_right", Pose::identity());
        let window_bottom_right = arena.insert("window_bottom_right", Pose::identity());
        let window_top_left = arena.insert("window_top_left", Pose::identity());
        let window_bottom_left = arena.insert("window_bottom_left", Pose::identity());

        Self {
            id,
            context: context.clone(),
            width: options.width,
            height: options.height,
            x_position: options.x_position,
            y_position: options.y_position,
            perunit_layout: false,
            title: options.title,
            fps: 30.0,
            opacity: 1.0,
            arena,
            objects: Vec::new(),
            camera_control: json!({
                "type": "trackball",
                "to": [0.0, 0.0, 0.0],
                "from": [-15.0, 0.0, -15.0],
                "up": [0.0, 0.0, -1.0],
                "3d": false,
            }),
            camera_synced: HashMap::new(),
            frame_skip_limit: Some(3),
            frame_skips: HashMap::new(),
            window_top_right,
            window_bottom_right,
            window_top_left,
            window_bottom_left,
            key_press_callback: None,
            mouse_click_callback: None,
            shutdown: false,
            buffered_frames: Vec::new(),
            writers: HashMap::new(),
            dead_sinks: HashSet::new(),
            last_record_time: 0.0,
        }
    }

    pub fn id(&self) -> WindowId {
        self.id
    }

    // Scene construction

    /// Attach a renderable; returns the object's id, the handle every later
    /// mutation goes through.
    pub fn add(&mut self, renderable: impl Serializable + 'static, pose: Pose) -> ObjectId {
        self.add_with(renderable, pose, false, 0)
    }

    pub fn add_with(
        &mut self,
        renderable: impl Serializable + 'static,
        pose: Pose,
        on_overlay: bool,
        layer: i32,
    ) -> ObjectId {
        self.insert_object(Some(Box::new(renderable)), pose, on_overlay, layer)
    }

    /// Attach a bare transform node (serialized as a `null` object); useful
    /// purely as a pose parent.
    pub fn add_node(&mut self, pose: Pose) -> ObjectId {
        self.insert_object(None, pose, false, 0)
    }

    fn insert_object(
        &mut self,
        renderable: Option<Box<dyn Serializable>>,
        pose: Pose,
        on_overlay: bool,
        layer: i32,
    ) -> ObjectId {
        let id = self.context.lock().alloc_object_id();
        let node = self.arena.insert(id.to_string(), pose);
        self.objects
            .push(SceneObject::new(id, node, renderable, on_overlay, layer));
        id
    }

    fn object(&self, id: ObjectId) -> &SceneObject {
        self.objects
            .iter()
            .find(|obj| obj.id() == id)
            .unwrap_or_else(|| panic!("Unknown object id: {id}"))
    }

    fn object_mut(&mut self, id: ObjectId) -> &mut SceneObject {
        self.objects
            .iter_mut()
            .find(|obj| obj.id() == id)
            .unwrap_or_else(|| panic!("Unknown object id: {id}"))
    }

    // Object mutation

    pub fn set_pose(&mut self, id: ObjectId, pose: Pose) {
        let node = self.object(id).node();
        self.arena.set_local(node, pose);
        self.object_mut(id).mark_pose_dirty();
    }

    pub fn pose(&self, id: ObjectId) -> Pose {
        self.arena.local(self.object(id).node())
    }

    pub fn set_visible(&mut self, id: ObjectId, visible: bool) {
        self.object_mut(id).set_visible(visible);
    }

    pub fn visible(&self, id: ObjectId) -> bool {
        self.object(id).visible()
    }

    /// Request destruction. The object leaves the live list once every
    /// tracked destination has been told.
    pub fn destroy(&mut self, id: ObjectId) {
        self.object_mut(id).destroy();
    }

    pub fn is_destroyed(&self, id: ObjectId) -> bool {
        self.object(id).is_destroyed()
    }

    /// Pose `child` relative to `parent`. A node can be parented once.
    pub fn set_parent(&mut self, child: ObjectId, parent: ObjectId) {
        let child_node = self.object(child).node();
        let parent_node = self.object(parent).node();
        self.arena.set_parent(child_node, parent_node);
        self.object_mut(child).mark_identity_dirty();
    }

    /// Pose `child` relative to a raw node (usually a window corner anchor).
    pub fn set_parent_node(&mut self, child: ObjectId, parent: NodeIndex) {
        let child_node = self.object(child).node();
        self.arena.set_parent(child_node, parent);
        self.object_mut(child).mark_identity_dirty();
    }

    /// Request destruction of every live object.
    pub fn clear(&mut self) {
        for obj in &mut self.objects {
            obj.destroy();
        }
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    // Overlay anchor nodes, named so viewers can resolve `pose_parent`.

    pub fn top_right_node(&self) -> NodeIndex {
        self.window_top_right
    }

    pub fn bottom_right_node(&self) -> NodeIndex {
        self.window_bottom_right
    }

    pub fn top_left_node(&self) -> NodeIndex {
        self.window_top_left
    }

    pub fn bottom_left_node(&self) -> NodeIndex {
        self.window_bottom_left
    }

    // Window & camera record. Setters invalidate the per-connection
    // camera/window state so the change replicates on the next frame.

    pub fn layout_absolute(&mut self, width: f32, height: f32, x_position: f32, y_position: f32) {
        self.width = width;
        self.height = height;
        self.x_position = x_position;
        self.y_position = y_position;
        self.perunit_layout = false;
        self.invalidate_camera();
    }

    pub fn layout_per_unit(&mut self, width: f32, height: f32, x_position: f32, y_position: f32) {
        self.width = width;
        self.height = height;
        self.x_position = x_position;
        self.y_position = y_position;
        self.perunit_layout = true;
        self.invalidate_camera();
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        if self.camera_control.get("type").and_then(Value::as_str) == Some("plot") {
            self.camera_control["title"] = json!(self.title);
        }
        self.invalidate_camera();
    }

    pub fn set_frame_lock(&mut self, fps: f32) {
        self.fps = fps;
        self.invalidate_camera();
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = opacity;
        self.invalidate_camera();
    }

    /// Skip a frame for a connection whose outgoing backlog exceeds this
    /// many messages. `None` disables the check.
    pub fn set_frame_skip_limit(&mut self, limit: Option<usize>) {
        self.frame_skip_limit = limit;
    }

    pub fn set_static_camera_mode(&mut self, to: [f32; 3], from: [f32; 3], up: [f32; 3]) {
        self.camera_control = json!({
            "type": "static",
            "to": to,
            "from": from,
            "up": up,
        });
        self.invalidate_camera();
    }

    pub fn set_trackball_mode(&mut self, to: [f32; 3], from: [f32; 3], up: [f32; 3], use_3d: bool) {
        self.camera_control = json!({
            "type": "trackball",
            "to": to,
            "from": from,
            "up": up,
            "3d": use_3d,
        });
        self.invalidate_camera();
    }

    /// Trackball preset with a vision-style axis convention.
    pub fn set_trackball_mode_vision(&mut self) {
        self.set_trackball_mode([0.0; 3], [-1.0, -1.0, 0.0], [0.0, -1.0, 0.0], false);
    }

    pub fn set_plot_mode(&mut self, equal: bool) {
        self.camera_control = json!({
            "type": "plot",
            "equal": equal,
            "y_flip": false,
            "title": self.title,
        });
        self.invalidate_camera();
    }

    pub fn set_plot3d_mode(&mut self, to: [f32; 3], from: [f32; 3], up: [f32; 3]) {
        self.camera_control = json!({
            "type": "plot3d",
            "to": to,
            "from": from,
            "up": up,
        });
        self.invalidate_camera();
    }

    pub fn camera_control(&self) -> &Value {
        &self.camera_control
    }

    pub fn invalidate_camera(&mut self) {
        for synced in self.camera_synced.values_mut() {
            *synced = false;
        }
    }

    // Input routing

    pub fn set_key_press_callback(&mut self, callback: impl FnMut(i32) + Send + 'static) {
        self.key_press_callback = Some(Box::new(callback));
    }

    pub fn set_mouse_click_callback(
        &mut self,
        callback: impl FnMut(bool, bool, [f32; 2], [f32; 2]) + Send + 'static,
    ) {
        self.mouse_click_callback = Some(Box::new(callback));
    }

    /// Drain this window's routed inbound messages, firing callbacks and
    /// honoring `close`/`hide` control messages.
    pub fn process_events(&mut self) -> WindowEvents {
        let context = self.context.clone();
        let mut ctx = context.lock();
        self.process_events_with(&mut ctx)
    }

    fn process_events_with(&mut self, ctx: &mut Context) -> WindowEvents {
        let mut events = WindowEvents::default();
        if !ctx.network_mode {
            return events;
        }

        for msg in ctx.take_window_messages(self.id) {
            match msg.get("type").and_then(Value::as_str) {
                Some("key_press") => {
                    let key = msg
                        .get("key")
                        .and_then(Value::as_i64)
                        .unwrap_or(KEY_UNKNOWN as i64) as i32;
                    if let Some(callback) = &mut self.key_press_callback {
                        callback(key);
                    }
                    if key == KEY_ENTER {
                        info!("Continue key event received for window: {}", self.id);
                        events.key_event = true;
                    }
                }
                Some("mouse_click") => {
                    if let Some(callback) = &mut self.mouse_click_callback {
                        let left = msg.get("button").and_then(Value::as_str) == Some("left");
                        let down = msg.get("state").and_then(Value::as_str) == Some("down");
                        let pos = read_vec2(msg.get("pos"));
                        let window_size = read_vec2(msg.get("window_size"));
                        callback(left, down, pos, window_size);
                    }
                }
                Some("close") => {
                    info!("Close message received for window: {}", self.id);
                    self.shutdown = true;
                }
                Some("hide") => {
                    info!("Hide message received for window: {}", self.id);
                    events.hide_event = true;
                }
                _ => {}
            }
        }
        events
    }

    // Frame production

    /// Produce one frame. Returns false once the window has been closed.
    pub fn render(&mut self, wait_close: bool, wait_key: bool) -> bool {
        self.render_with_time(wait_close, wait_key, 0.0)
    }

    /// Like [`Window::render`], but stamping recorded frames with a fixed
    /// time step instead of wall-clock time.
    pub fn render_with_time(
        &mut self,
        wait_close: bool,
        wait_key: bool,
        time_increment_s: f32,
    ) -> bool {
        let context = self.context.clone();

        let mode = {
            let mut ctx = context.lock();
            ctx.first_frame = true;
            ctx.mode
        };
        if self.shutdown {
            return false;
        }

        let mut reset_progressive = false;
        match mode {
            TopologyMode::Record => {
                let mut ctx = context.lock();
                self.render_record(&mut ctx, time_increment_s);
            }
            TopologyMode::File => {
                let flush_dir = {
                    let mut ctx = context.lock();
                    self.buffer_file_frame();
                    if wait_close || wait_key {
                        Some(self.flush_file_frames(&mut ctx))
                    } else {
                        info!("Waiting to render until called with wait=true.");
                        None
                    }
                };
                // The viewer runs with no lock held; other windows keep
                // rendering while this one blocks.
                if let Some(dir) = flush_dir {
                    spawn_and_join_viewer(&dir);
                    // One-shot hand-off: the flushed sequence is consumed.
                    // The next flush starts a fresh sequence.
                    let _ = std::fs::remove_dir_all(&dir);
                    self.writers.remove(&PROGRESSIVE_CONN_ID);
                    reset_progressive = true;
                }
            }
            TopologyMode::Client
            | TopologyMode::Server
            | TopologyMode::ClientByos
            | TopologyMode::ServerByoc => {
                {
                    let mut ctx = context.lock();
                    self.dispatch_network_frame(&mut ctx, wait_close, wait_key);
                }
                self.wait_loop(&context, wait_close, wait_key);
            }
        }

        {
            let mut ctx = context.lock();
            let tracked: Vec<ConnectionId> = if ctx.network_mode {
                ctx.net.connection_ids()
            } else {
                vec![PROGRESSIVE_CONN_ID]
            };
            self.objects
                .retain(|obj| !(obj.is_destroyed() && obj.destruction_synced_for(&tracked)));
        }

        if reset_progressive {
            // Everything flushed so far went to a viewer that has exited;
            // the next flush must describe the scene from scratch.
            self.camera_synced.remove(&PROGRESSIVE_CONN_ID);
            for obj in &mut self.objects {
                obj.forget_connection(PROGRESSIVE_CONN_ID);
            }
        }

        !self.shutdown
    }

    fn render_record(&mut self, ctx: &mut Context, time_increment_s: f32) {
        let mut bufs = Vec::new();
        let scene = self.produce_scene(PROGRESSIVE_CONN_ID, &mut bufs);

        let record_time = if time_increment_s > 0.0 {
            self.last_record_time + time_increment_s
        } else {
            ctx.record_elapsed()
        };
        self.last_record_time = record_time;

        let header = json!({
            "type": "scene",
            "data": scene,
            "time": record_time,
        });

        let Some(record_root) = ctx.record.as_ref().map(|state| state.path.clone()) else {
            warn!("Record mode without a record root; dropping frame");
            return;
        };
        self.append_to_sink(PROGRESSIVE_CONN_ID, &record_root, &header, &bufs);

        let asset_dir = ctx.session.asset_dir();
        assets::mirror_assets(&asset_dir, &record_root);
    }

    fn buffer_file_frame(&mut self) {
        let mut bufs = Vec::new();
        let scene = self.produce_scene(PROGRESSIVE_CONN_ID, &mut bufs);
        let header = json!({ "type": "scene", "data": scene });
        self.buffered_frames
            .push(HybridMessage::with_payloads(header, bufs));
    }

    fn flush_file_frames(&mut self, ctx: &mut Context) -> PathBuf {
        let temp_dir = ctx.session.temp_dir();
        for frame in std::mem::take(&mut self.buffered_frames) {
            self.append_to_sink(PROGRESSIVE_CONN_ID, &temp_dir, &frame.header, &frame.payloads);
        }
        temp_dir
    }

    fn dispatch_network_frame(&mut self, ctx: &mut Context, wait_close: bool, wait_key: bool) {
        ctx.net.clean_conns();
        let asset_dir = ctx.session.asset_dir();

        for conn_id in ctx.net.connection_ids() {
            ctx.update_metadata();

            if let Some(limit) = self.frame_skip_limit {
                let backlog = ctx.net.outgoing_queue_len(conn_id);
                if backlog > limit {
                    let skips = self.frame_skips.entry(conn_id).or_insert(0);
                    if *skips % 100 == 0 {
                        info!(
                            "Skipping frame due to unsent outgoing messages - Window: {} Title: {} Conn: {} Queue size: {}",
                            self.id, self.title, conn_id, backlog
                        );
                    }
                    *skips += 1;
                    continue;
                }
            }

            let mut bufs = Vec::new();
            let scene = self.produce_scene(conn_id, &mut bufs);

            // Serialization stages asset files; ship them ahead of the scene
            // that references them.
            assets::replicate_assets(ctx, conn_id, &asset_dir);

            let header = json!({ "type": "scene", "data": scene });

            if let Some(record_root) = ctx.record.as_ref().map(|state| state.path.clone()) {
                ctx.net.send_to(conn_id, header.clone(), bufs.clone());

                // Record after sending so the timestamp stays out of the
                // network message.
                let mut header = header;
                header["time"] = json!(ctx.record_elapsed());
                let conn_root = record_root.join(format!("conn_{conn_id}"));
                self.append_to_sink(conn_id, &conn_root, &header, &bufs);
                assets::mirror_assets(&asset_dir, &conn_root);
            } else {
                ctx.net.send_to(conn_id, header, bufs);
            }

            if wait_close || wait_key {
                ctx.net.send_to(conn_id, json!({ "type": "wait" }), Vec::new());
            }
        }
    }

    fn wait_loop(&mut self, context: &SharedContext, wait_close: bool, wait_key: bool) {
        let mut keep_waiting = wait_close || wait_key;
        loop {
            let events = {
                let mut ctx = context.lock();
                self.process_events_with(&mut ctx)
            };

            if wait_key && events.key_event {
                keep_waiting = false;
            }
            if wait_close && events.hide_event {
                keep_waiting = false;
            }
            if !keep_waiting || self.shutdown {
                break;
            }

            thread::sleep(Duration::from_millis(100));

            let mut heartbeat = json!({ "type": "heartbeat" });
            if self.id > 0 {
                heartbeat["window_id"] = json!(self.id);
            }
            let any_alive = {
                let mut ctx = context.lock();
                ctx.net.send_to_all(&heartbeat, &[])
            };
            if !any_alive {
                break;
            }
        }
    }

    fn append_to_sink(
        &mut self,
        sink_id: ConnectionId,
        root: &Path,
        header: &Value,
        payloads: &[Vec<u8>],
    ) {
        if self.dead_sinks.contains(&sink_id) {
            return;
        }
        if !self.writers.contains_key(&sink_id) {
            match RecordingWriter::new(root) {
                Ok(writer) => {
                    self.writers.insert(sink_id, writer);
                }
                Err(err) => {
                    // Isolated to the sink: live delivery carries on.
                    warn!("Disabling recording sink {sink_id}: {err}");
                    self.dead_sinks.insert(sink_id);
                    return;
                }
            }
        }
        let Some(writer) = self.writers.get_mut(&sink_id) else {
            return;
        };
        if let Err(err) = writer.append(header, payloads) {
            warn!("Recording sink {sink_id} failed, disabling: {err}");
            self.writers.remove(&sink_id);
            self.dead_sinks.insert(sink_id);
        }
    }

    /// The minimal scene update bringing `conn_id` up to date.
    fn produce_scene(&mut self, conn_id: ConnectionId, bufs: &mut Vec<Vec<u8>>) -> Value {
        let mut scene = json!({});
        if self.id > 0 {
            scene["window_id"] = json!(self.id);
        }

        let camera_fresh = *self.camera_synced.get(&conn_id).unwrap_or(&false);
        if !camera_fresh {
            scene["window"] = json!({
                "width": self.width,
                "height": self.height,
                "x_position": self.x_position,
                "y_position": self.y_position,
                "perunit_layout": self.perunit_layout,
                "title": self.title,
                "fps": self.fps,
                "opacity": self.opacity,
            });
            scene["camera"] = json!({ "control": self.camera_control });
            self.camera_synced.insert(conn_id, true);
        }

        let mut objects = Vec::new();
        for obj in &mut self.objects {
            if let Some(datum) = obj.compute_diff(conn_id, &self.arena, bufs) {
                objects.push(datum);
            }
        }
        scene["objects"] = Value::Array(objects);

        scene
    }

    /// Full-detail description, independent of any connection's state.
    fn snapshot_scene(&self, bufs: &mut Vec<Vec<u8>>) -> Value {
        let mut scene = json!({});
        if self.id > 0 {
            scene["window_id"] = json!(self.id);
        }
        scene["window"] = json!({
            "width": self.width,
            "height": self.height,
            "x_position": self.x_position,
            "y_position": self.y_position,
            "perunit_layout": self.perunit_layout,
            "title": self.title,
            "fps": self.fps,
            "opacity": self.opacity,
        });
        scene["camera"] = json!({ "control": self.camera_control });

        let mut objects = Vec::new();
        for obj in &self.objects {
            if let Some(datum) = obj.snapshot(&self.arena, bufs) {
                objects.push(datum);
            }
        }
        scene["objects"] = Value::Array(objects);

        scene
    }

    /// Write a full-detail snapshot of the live scene to `path`, assets
    /// alongside. Leaves all replication state untouched.
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<(), ProducerError> {
        let path = path.as_ref();
        info!("Saving scene to {}", path.display());

        let context = self.context.clone();
        let mut ctx = context.lock();

        let mut bufs = Vec::new();
        let scene = self.snapshot_scene(&mut bufs);
        let header = json!({ "type": "scene", "data": scene });

        let mut writer = RecordingWriter::new(path)?;
        writer.append(&header, &bufs)?;

        let asset_dir = ctx.session.asset_dir();
        assets::mirror_assets(&asset_dir, path);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn frame_skip_count(&self, conn_id: ConnectionId) -> u64 {
        self.frame_skips.get(&conn_id).copied().unwrap_or(0)
    }

    #[cfg(test)]
    pub(crate) fn buffered_frame_count(&self) -> usize {
        self.buffered_frames.len()
    }
}

fn spawn_and_join_viewer(dir: &Path) {
    let exe = viewer_executable();
    info!("Calling show at path: {}", exe.display());

    let args: [&std::ffi::OsStr; 3] = ["-i".as_ref(), dir.as_os_str(), "-r".as_ref()];
    match CompanionProcess::spawn(&exe, args) {
        Ok(mut proc) => match proc.join() {
            Ok(0) => info!("Show exited with success."),
            Ok(code) => warn!("Show exited without success: {code}"),
            Err(err) => warn!("Could not join show process: {err}"),
        },
        Err(err) => error!("Could not start show process at {}: {err}", exe.display()),
    }
}

fn read_vec2(value: Option<&Value>) -> [f32; 2] {
    let Some(value) = value else {
        return [0.0, 0.0];
    };
    let x = value.get(0).and_then(Value::as_f64).unwrap_or(0.0) as f32;
    let y = value.get(1).and_then(Value::as_f64).unwrap_or(0.0) as f32;
    [x, y]
}
