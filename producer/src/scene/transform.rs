//! Minimal transform layer the replication protocol consumes.
//!
//! The full math library (rotations, rigid transforms, projections) lives in
//! a collaborating crate; what replication needs is a posed node per scene
//! object, optional parenting for relative poses, and a name the viewer can
//! resolve `pose_parent` references against.
//!
//! Nodes live in an arena and refer to each other by index, so the hierarchy
//! carries no ownership cycles and teardown order does not matter.

use serde::Serialize;

/// Position / orientation (rotation vector) / uniform scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Pose {
    pub pos: [f32; 3],
    pub rot: [f32; 3],
    pub scale: f32,
}

impl Pose {
    pub const fn identity() -> Self {
        Self {
            pos: [0.0; 3],
            rot: [0.0; 3],
            scale: 1.0,
        }
    }

    pub fn from_pos(pos: [f32; 3]) -> Self {
        Self {
            pos,
            ..Self::identity()
        }
    }

    pub fn new(pos: [f32; 3], rot: [f32; 3], scale: f32) -> Self {
        Self { pos, rot, scale }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

/// Handle to one node in a [`TransformArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeIndex(usize);

struct TransformNode {
    name: String,
    local: Pose,
    parent: Option<NodeIndex>,
    children: Vec<NodeIndex>,
}

/// Index-addressed transform hierarchy.
pub struct TransformArena {
    nodes: Vec<TransformNode>,
}

impl TransformArena {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn insert(&mut self, name: impl Into<String>, local: Pose) -> NodeIndex {
        let index = NodeIndex(self.nodes.len());
        self.nodes.push(TransformNode {
            name: name.into(),
            local,
            parent: None,
            children: Vec::new(),
        });
        index
    }

    pub fn local(&self, node: NodeIndex) -> Pose {
        self.nodes[node.0].local
    }

    pub fn set_local(&mut self, node: NodeIndex, pose: Pose) {
        self.nodes[node.0].local = pose;
    }

    pub fn name(&self, node: NodeIndex) -> &str {
        &self.nodes[node.0].name
    }

    pub fn parent(&self, node: NodeIndex) -> Option<NodeIndex> {
        self.nodes[node.0].parent
    }

    /// Attach `child` under `parent`. A node can be parented at most once;
    /// re-parenting is a caller bug.
    pub fn set_parent(&mut self, child: NodeIndex, parent: NodeIndex) {
        if child == parent {
            panic!("Node cannot be its own parent");
        }
        if self.nodes[child.0].parent.is_some() {
            panic!("Node already has a parent");
        }
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    pub fn children(&self, node: NodeIndex) -> &[NodeIndex] {
        &self.nodes[node.0].children
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parenting_links_both_directions() {
        let mut arena = TransformArena::new();
        let parent = arena.insert("root", Pose::identity());
        let child = arena.insert("leaf", Pose::from_pos([1.0, 0.0, 0.0]));

        arena.set_parent(child, parent);

        assert_eq!(arena.parent(child), Some(parent));
        assert_eq!(arena.children(parent), &[child]);
        assert_eq!(arena.parent(parent), None);
    }

    #[test]
    #[should_panic(expected = "already has a parent")]
    fn double_parenting_is_a_contract_error() {
        let mut arena = TransformArena::new();
        let a = arena.insert("a", Pose::identity());
        let b = arena.insert("b", Pose::identity());
        let child = arena.insert("c", Pose::identity());

        arena.set_parent(child, a);
        arena.set_parent(child, b);
    }

    #[test]
    fn pose_serializes_with_named_fields() {
        let pose = Pose::new([1.0, 2.0, 3.0], [0.0, 0.0, 0.5], 2.0);
        let value = serde_json::to_value(pose).unwrap();
        assert_eq!(value["pos"], serde_json::json!([1.0, 2.0, 3.0]));
        assert_eq!(value["scale"], serde_json::json!(2.0));
    }
}
