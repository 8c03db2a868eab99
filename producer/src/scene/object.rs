use std::collections::HashMap;

use limn_shared::ConnectionId;
use serde_json::{json, Value};

use super::transform::{NodeIndex, TransformArena};

/// Identifies one scene object within a producer process. Assigned
/// monotonically by the owning context, never reused.
pub type ObjectId = i32;

/// Serialization contract every renderable scene-object variant implements.
///
/// `serialize` must return the object's complete identity/geometry record as
/// a JSON object; bulk binary data (vertex buffers, texture pixels) is pushed
/// onto `bufs` and referenced from the record by payload index.
pub trait Serializable: Send {
    fn serialize(&self, bufs: &mut Vec<Vec<u8>>) -> Value;
}

/// Per-connection freshness of one scene object. All bits start false when a
/// connection first learns about the object; a bit returns to true only once
/// a diff containing that field has been serialized for that connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncStatus {
    pub identity_synced: bool,
    pub pose_synced: bool,
    pub visibility_synced: bool,
    pub destruction_synced: bool,
}

impl SyncStatus {
    fn is_fully_synced(&self) -> bool {
        self.identity_synced && self.pose_synced && self.visibility_synced && self.destruction_synced
    }

    fn fully_synced() -> Self {
        Self {
            identity_synced: true,
            pose_synced: true,
            visibility_synced: true,
            destruction_synced: true,
        }
    }
}

/// One renderable (or bare transform) registered with a window, together
/// with its per-connection replication state.
pub struct SceneObject {
    id: ObjectId,
    node: NodeIndex,
    renderable: Option<Box<dyn Serializable>>,
    on_overlay: bool,
    layer: i32,
    visible: bool,
    destroyed: bool,
    status: HashMap<ConnectionId, SyncStatus>,
}

impl SceneObject {
    pub(crate) fn new(
        id: ObjectId,
        node: NodeIndex,
        renderable: Option<Box<dyn Serializable>>,
        on_overlay: bool,
        layer: i32,
    ) -> Self {
        Self {
            id,
            node,
            renderable,
            on_overlay,
            layer,
            visible: true,
            destroyed: false,
            status: HashMap::new(),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn node(&self) -> NodeIndex {
        self.node
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub(crate) fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
        for status in self.status.values_mut() {
            status.visibility_synced = false;
        }
    }

    /// Destruction is requested, not immediate: the object stays in the live
    /// list until every tracked connection has been told.
    pub(crate) fn destroy(&mut self) {
        self.destroyed = true;
        for status in self.status.values_mut() {
            status.destruction_synced = false;
        }
    }

    pub(crate) fn mark_pose_dirty(&mut self) {
        for status in self.status.values_mut() {
            status.pose_synced = false;
        }
    }

    pub(crate) fn mark_identity_dirty(&mut self) {
        for status in self.status.values_mut() {
            status.identity_synced = false;
        }
    }

    /// Drop all replication state for a destination that no longer exists.
    /// A future destination with the same id starts from scratch.
    pub(crate) fn forget_connection(&mut self, conn_id: ConnectionId) {
        self.status.remove(&conn_id);
    }

    #[cfg(test)]
    pub(crate) fn status_for(&self, conn_id: ConnectionId) -> Option<SyncStatus> {
        self.status.get(&conn_id).copied()
    }

    /// True when every listed connection has been told about the
    /// destruction. Connections this object has no record for have not been
    /// told anything yet.
    pub(crate) fn destruction_synced_for(&self, conn_ids: &[ConnectionId]) -> bool {
        conn_ids.iter().all(|conn_id| {
            self.status
                .get(conn_id)
                .map(|status| status.destruction_synced)
                .unwrap_or(false)
        })
    }

    /// Minimal merge-patch bringing `conn_id` up to date, or `None` when the
    /// connection already has everything.
    ///
    /// Emitting a patch re-synchronizes the whole status record for that
    /// destination: the receiver applies patches keyed by object id, so
    /// occasionally re-sending an already-fresh field is harmless and keeps
    /// the status model a plain boolean per field.
    pub(crate) fn compute_diff(
        &mut self,
        conn_id: ConnectionId,
        arena: &TransformArena,
        bufs: &mut Vec<Vec<u8>>,
    ) -> Option<Value> {
        let status = *self.status.entry(conn_id).or_default();
        if status.is_fully_synced() {
            return None;
        }

        let mut datum = if !status.identity_synced {
            let mut datum = match &self.renderable {
                Some(renderable) => renderable.serialize(bufs),
                None => json!({ "type": "null" }),
            };
            if let Some(parent) = arena.parent(self.node) {
                if !arena.name(parent).is_empty() {
                    datum["pose_parent"] = json!(arena.name(parent));
                }
            }
            datum["overlay"] = json!(self.on_overlay);
            datum["layer"] = json!(self.layer);
            datum
        } else {
            json!({})
        };

        if !status.pose_synced {
            datum["pose"] = pose_value(arena, self.node);
        }
        if !status.visibility_synced {
            datum["show"] = json!(self.visible);
        }
        if self.destroyed && !status.destruction_synced {
            datum["destroy"] = json!(true);
        }
        datum["id"] = json!(self.id);

        self.status.insert(conn_id, SyncStatus::fully_synced());
        Some(datum)
    }

    /// Full-detail description for absolute snapshots. Does not touch any
    /// per-connection state; destroyed objects have no snapshot.
    pub(crate) fn snapshot(&self, arena: &TransformArena, bufs: &mut Vec<Vec<u8>>) -> Option<Value> {
        if self.destroyed {
            return None;
        }
        let mut datum = match &self.renderable {
            Some(renderable) => renderable.serialize(bufs),
            None => json!({ "type": "null" }),
        };
        if let Some(parent) = arena.parent(self.node) {
            if !arena.name(parent).is_empty() {
                datum["pose_parent"] = json!(arena.name(parent));
            }
        }
        datum["id"] = json!(self.id);
        datum["pose"] = pose_value(arena, self.node);
        datum["show"] = json!(self.visible);
        datum["overlay"] = json!(self.on_overlay);
        datum["layer"] = json!(self.layer);
        Some(datum)
    }
}

fn pose_value(arena: &TransformArena, node: NodeIndex) -> Value {
    serde_json::to_value(arena.local(node))
        .unwrap_or_else(|err| panic!("Pose serialization cannot fail: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::transform::Pose;

    struct Marker;

    impl Serializable for Marker {
        fn serialize(&self, bufs: &mut Vec<Vec<u8>>) -> Value {
            bufs.push(vec![0xAB, 0xCD]);
            json!({ "type": "marker", "buf": bufs.len() - 1 })
        }
    }

    fn object_with_arena() -> (SceneObject, TransformArena) {
        let mut arena = TransformArena::new();
        let node = arena.insert("7", Pose::identity());
        (SceneObject::new(7, node, Some(Box::new(Marker)), false, 0), arena)
    }

    #[test]
    fn first_diff_carries_everything() {
        let (mut obj, arena) = object_with_arena();
        let mut bufs = Vec::new();

        let datum = obj.compute_diff(1, &arena, &mut bufs).expect("diff");
        assert_eq!(datum["id"], json!(7));
        assert_eq!(datum["type"], json!("marker"));
        assert_eq!(datum["show"], json!(true));
        assert!(datum.get("pose").is_some());
        assert!(datum.get("destroy").is_none());
        assert_eq!(bufs.len(), 1);
    }

    #[test]
    fn fully_synced_object_emits_nothing() {
        let (mut obj, arena) = object_with_arena();
        let mut bufs = Vec::new();
        obj.compute_diff(1, &arena, &mut bufs).expect("first diff");

        assert!(obj.compute_diff(1, &arena, &mut bufs).is_none());
    }

    #[test]
    fn pose_mutation_dirties_only_pose() {
        let (mut obj, mut arena) = object_with_arena();
        let mut bufs = Vec::new();
        obj.compute_diff(1, &arena, &mut bufs).expect("first diff");
        obj.compute_diff(2, &arena, &mut bufs).expect("first diff other conn");

        arena.set_local(obj.node(), Pose::from_pos([4.0, 0.0, 0.0]));
        obj.mark_pose_dirty();

        for conn_id in [1, 2] {
            let status = obj.status_for(conn_id).unwrap();
            assert!(!status.pose_synced);
            assert!(status.identity_synced);
            assert!(status.visibility_synced);
            assert!(status.destruction_synced);
        }

        let datum = obj.compute_diff(1, &arena, &mut bufs).expect("pose diff");
        assert!(datum.get("pose").is_some());
        assert!(datum.get("type").is_none());
        assert!(datum.get("show").is_none());
        assert_eq!(datum["pose"]["pos"], json!([4.0, 0.0, 0.0]));
    }

    #[test]
    fn destruction_is_gated_on_every_tracked_connection() {
        let (mut obj, arena) = object_with_arena();
        let mut bufs = Vec::new();
        obj.compute_diff(1, &arena, &mut bufs).expect("diff");
        obj.compute_diff(2, &arena, &mut bufs).expect("diff");

        obj.destroy();
        assert!(!obj.destruction_synced_for(&[1, 2]));

        let datum = obj.compute_diff(1, &arena, &mut bufs).expect("destroy diff");
        assert_eq!(datum["destroy"], json!(true));
        assert!(!obj.destruction_synced_for(&[1, 2]));

        obj.compute_diff(2, &arena, &mut bufs).expect("destroy diff");
        assert!(obj.destruction_synced_for(&[1, 2]));
    }

    #[test]
    fn unknown_connection_blocks_destruction() {
        let (mut obj, arena) = object_with_arena();
        let mut bufs = Vec::new();
        obj.compute_diff(1, &arena, &mut bufs).expect("diff");
        obj.destroy();
        obj.compute_diff(1, &arena, &mut bufs).expect("destroy diff");

        // A connection that has never seen the object still gates removal.
        assert!(obj.destruction_synced_for(&[1]));
        assert!(!obj.destruction_synced_for(&[1, 9]));
    }

    #[test]
    fn snapshot_skips_destroyed_and_keeps_status() {
        let (mut obj, arena) = object_with_arena();
        let mut bufs = Vec::new();

        let snap = obj.snapshot(&arena, &mut bufs).expect("snapshot");
        assert_eq!(snap["id"], json!(7));
        assert!(obj.status_for(99).is_none());

        obj.destroy();
        assert!(obj.snapshot(&arena, &mut bufs).is_none());
    }
}
