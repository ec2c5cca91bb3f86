//! Arena-backed scene tree

use std::rc::Rc;

use slotmap::SlotMap;

use crate::foundation::math::{Mat4, Transform};
use crate::render::resources::{Material, Mesh};

slotmap::new_key_type! {
    /// Handle to a node inside a [`SceneTree`]
    pub struct NodeId;
}

/// Scene tree misuse
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    /// A sibling already carries the name
    #[error("Node '{parent}' already has a child named '{name}'")]
    DuplicateName {
        /// Parent node name
        parent: String,
        /// Conflicting child name
        name: String,
    },

    /// The handle does not refer to a live node
    #[error("Scene node not found")]
    NodeNotFound,

    /// The root node can not be removed
    #[error("The root node can not be removed")]
    CannotRemoveRoot,
}

/// One node of the scene tree
#[derive(Debug, Clone)]
pub struct SceneNode {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    /// Transform relative to the parent
    pub transform: Transform,
    /// Geometry drawn for this node
    pub mesh: Option<Rc<Mesh>>,
    /// Surface used to draw the geometry
    pub material: Option<Rc<Material>>,
}

impl SceneNode {
    fn new(name: String, parent: Option<NodeId>) -> Self {
        Self {
            name,
            parent,
            children: Vec::new(),
            transform: Transform::identity(),
            mesh: None,
            material: None,
        }
    }

    /// Name, unique among siblings
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent node; `None` for the root
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in insertion order
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Whether the node contributes a draw
    pub fn is_drawable(&self) -> bool {
        self.mesh.is_some() || self.material.is_some()
    }
}

/// Hierarchical scene description
///
/// Nodes live in a generation-checked arena; removed handles stay invalid
/// forever. The auto-naming counter belongs to the tree.
#[derive(Debug, Clone)]
pub struct SceneTree {
    nodes: SlotMap<NodeId, SceneNode>,
    root: NodeId,
    next_auto_name: u64,
}

impl SceneTree {
    /// Tree holding only a root node named `Root`
    pub fn new() -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(SceneNode::new("Root".to_string(), None));
        Self { nodes, root, next_auto_name: 0 }
    }

    /// Root node
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of nodes including the root
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether only the root exists
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Node by handle
    pub fn node(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(id)
    }

    /// Mutable node by handle
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        self.nodes.get_mut(id)
    }

    /// Create a node under `parent`
    ///
    /// Without a name the node is called `NewNode<N>`, skipping numbers a
    /// sibling already uses.
    pub fn create_node(&mut self, parent: NodeId, name: Option<&str>) -> Result<NodeId, SceneError> {
        let parent_node = self.nodes.get(parent).ok_or(SceneError::NodeNotFound)?;

        let name = match name {
            Some(name) => {
                if self.find_child(parent, name).is_some() {
                    return Err(SceneError::DuplicateName {
                        parent: parent_node.name.clone(),
                        name: name.to_string(),
                    });
                }
                name.to_string()
            }
            None => loop {
                let candidate = format!("NewNode{}", self.next_auto_name);
                self.next_auto_name += 1;
                if self.find_child(parent, &candidate).is_none() {
                    break candidate;
                }
            },
        };

        let id = self.nodes.insert(SceneNode::new(name, Some(parent)));
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.children.push(id);
        }
        Ok(id)
    }

    /// Child of `parent` with the given name
    pub fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.nodes
            .get(parent)?
            .children
            .iter()
            .copied()
            .find(|child| self.nodes.get(*child).is_some_and(|n| n.name == name))
    }

    /// Remove a node and its whole subtree; returns the number removed
    pub fn remove_node(&mut self, id: NodeId) -> Result<usize, SceneError> {
        if id == self.root {
            return Err(SceneError::CannotRemoveRoot);
        }
        let parent = self.nodes.get(id).ok_or(SceneError::NodeNotFound)?.parent;

        if let Some(parent_node) = parent.and_then(|p| self.nodes.get_mut(p)) {
            parent_node.children.retain(|child| *child != id);
        }

        let mut removed = 0;
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(current) {
                stack.extend(node.children);
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Product of the local transforms from the root down to `id`
    pub fn world_transform(&self, id: NodeId) -> Option<Mat4> {
        let mut node = self.nodes.get(id)?;
        let mut world = node.transform.to_matrix();
        while let Some(parent) = node.parent {
            node = self.nodes.get(parent)?;
            world = node.transform.to_matrix() * world;
        }
        Some(world)
    }

    /// Depth-first pre-order walk in child insertion order
    ///
    /// The visitor receives each node with its world transform.
    pub fn traverse<F>(&self, mut visit: F)
    where
        F: FnMut(NodeId, &SceneNode, &Mat4),
    {
        let Some(root) = self.nodes.get(self.root) else {
            return;
        };
        let mut stack = vec![(self.root, root.transform.to_matrix())];

        while let Some((id, world)) = stack.pop() {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            visit(id, node, &world);

            // Reverse so the first child is visited first
            for child in node.children.iter().rev() {
                if let Some(child_node) = self.nodes.get(*child) {
                    stack.push((*child, world * child_node.transform.to_matrix()));
                }
            }
        }
    }
}

impl Default for SceneTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Point3, Vec3};
    use approx::assert_relative_eq;

    #[test]
    fn test_auto_names_come_from_tree_counter() {
        let mut tree = SceneTree::new();
        let root = tree.root();
        let a = tree.create_node(root, None).unwrap();
        let b = tree.create_node(root, None).unwrap();

        assert_eq!(tree.node(a).unwrap().name(), "NewNode0");
        assert_eq!(tree.node(b).unwrap().name(), "NewNode1");

        let other = SceneTree::new();
        assert_eq!(other.len(), 1, "each tree counts independently");
    }

    #[test]
    fn test_auto_name_skips_taken_sibling_name() {
        let mut tree = SceneTree::new();
        let root = tree.root();
        tree.create_node(root, Some("NewNode0")).unwrap();
        let auto = tree.create_node(root, None).unwrap();

        assert_eq!(tree.node(auto).unwrap().name(), "NewNode1");
    }

    #[test]
    fn test_duplicate_sibling_name_rejected() {
        let mut tree = SceneTree::new();
        let root = tree.root();
        tree.create_node(root, Some("ship")).unwrap();

        let err = tree.create_node(root, Some("ship")).unwrap_err();
        assert!(matches!(err, SceneError::DuplicateName { .. }));
    }

    #[test]
    fn test_remove_subtree_invalidates_handles() {
        let mut tree = SceneTree::new();
        let root = tree.root();
        let ship = tree.create_node(root, Some("ship")).unwrap();
        let turret = tree.create_node(ship, Some("turret")).unwrap();
        tree.create_node(turret, Some("barrel")).unwrap();

        assert_eq!(tree.remove_node(ship), Ok(3));
        assert!(tree.node(turret).is_none());
        assert!(tree.find_child(root, "ship").is_none());
        assert_eq!(tree.remove_node(root), Err(SceneError::CannotRemoveRoot));
        assert_eq!(tree.remove_node(ship), Err(SceneError::NodeNotFound));
    }

    #[test]
    fn test_world_transform_chains_parents() {
        let mut tree = SceneTree::new();
        let root = tree.root();
        let parent = tree.create_node(root, Some("parent")).unwrap();
        let child = tree.create_node(parent, Some("child")).unwrap();
        tree.node_mut(parent).unwrap().transform = Transform::from_position(Vec3::new(10.0, 0.0, 0.0));
        tree.node_mut(child).unwrap().transform = Transform::from_position(Vec3::new(0.0, 2.0, 0.0));

        let p = tree.world_transform(child).unwrap().transform_point(&Point3::origin());
        assert_relative_eq!(p.x, 10.0, epsilon = 1e-6);
        assert_relative_eq!(p.y, 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_traverse_is_preorder_in_insertion_order() {
        let mut tree = SceneTree::new();
        let root = tree.root();
        let a = tree.create_node(root, Some("a")).unwrap();
        tree.create_node(a, Some("a1")).unwrap();
        tree.create_node(a, Some("a2")).unwrap();
        tree.create_node(root, Some("b")).unwrap();

        let mut names = Vec::new();
        tree.traverse(|_, node, _| names.push(node.name().to_string()));
        assert_eq!(names, vec!["Root", "a", "a1", "a2", "b"]);
    }
}
