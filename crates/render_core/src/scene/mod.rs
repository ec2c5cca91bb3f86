//! Scene graph
//!
//! A tree of named nodes. Each node carries a local transform and may carry
//! a mesh and a material; on traversal the renderer turns those nodes into
//! render queue items.

mod scene_tree;

pub use scene_tree::{SceneTree, SceneNode, NodeId, SceneError};
