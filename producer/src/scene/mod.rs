mod object;
mod transform;

pub use object::{ObjectId, SceneObject, Serializable, SyncStatus};
pub use transform::{NodeIndex, Pose, TransformArena};
