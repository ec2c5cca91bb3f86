//! Render queue for ordered draw submission
//!
//! Collects the draws of one frame into two buckets and emits them in a
//! fixed order:
//!
//! - **Opaque**: grouped by shader, then front-to-back inside each group so
//!   early depth rejection discards hidden fragments
//! - **Transparent**: back-to-front for correct blending, no grouping
//!
//! Both sorts are stable, so equal keys keep insertion order. The queue keeps
//! nothing across frames: [`RenderQueue::flush`] empties both buckets even
//! when submission fails.

use std::cmp::Ordering;
use std::rc::Rc;

use crate::foundation::math::{Mat4, Point3};
use crate::render::resources::{Material, Mesh};
use crate::render::RenderResult;

/// Which bucket an item was emitted from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueBucket {
    /// Depth-written, unblended
    Opaque,
    /// Alpha-blended, depth read-only
    Transparent,
}

/// One draw request, alive for a single frame
#[derive(Debug, Clone)]
pub struct RenderQueueItem {
    /// Geometry
    pub mesh: Rc<Mesh>,
    /// Surface description
    pub material: Rc<Material>,
    /// Object to world transform
    pub world: Mat4,
    /// Distance in front of the camera (positive = in front)
    pub depth: f32,
}

impl RenderQueueItem {
    /// Build an item, measuring depth at the mesh bounds center
    pub fn new(mesh: Rc<Mesh>, material: Rc<Material>, world: Mat4, view: &Mat4) -> Self {
        let center = Point3::from(mesh.bounds().center());
        let in_view = (view * world).transform_point(&center);
        Self {
            mesh,
            material,
            world,
            depth: -in_view.z,
        }
    }
}

/// Two-bucket per-frame draw queue
#[derive(Debug, Default)]
pub struct RenderQueue {
    opaque: Vec<RenderQueueItem>,
    transparent: Vec<RenderQueueItem>,
}

impl RenderQueue {
    /// Create an empty render queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a draw for a scene node
    ///
    /// Nodes without a mesh or a material are skipped with a warning.
    /// Returns whether the item was queued.
    pub fn add_item(
        &mut self,
        name: &str,
        mesh: Option<&Rc<Mesh>>,
        material: Option<&Rc<Material>>,
        world: Mat4,
        view: &Mat4,
    ) -> bool {
        let (Some(mesh), Some(material)) = (mesh, material) else {
            log::warn!(
                "Skipping node '{name}': missing {}",
                if mesh.is_none() { "mesh" } else { "material" }
            );
            return false;
        };

        self.push(RenderQueueItem::new(Rc::clone(mesh), Rc::clone(material), world, view));
        true
    }

    /// Insert a prepared item into the bucket its material selects
    pub fn push(&mut self, item: RenderQueueItem) {
        if item.material.is_transparent() {
            self.transparent.push(item);
        } else {
            self.opaque.push(item);
        }
    }

    /// Items in the opaque bucket
    pub fn opaque_len(&self) -> usize {
        self.opaque.len()
    }

    /// Items in the transparent bucket
    pub fn transparent_len(&self) -> usize {
        self.transparent.len()
    }

    /// Total queued items
    pub fn len(&self) -> usize {
        self.opaque.len() + self.transparent.len()
    }

    /// Whether both buckets are empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every queued item without submitting
    pub fn clear(&mut self) {
        self.opaque.clear();
        self.transparent.clear();
    }

    /// Sort both buckets and hand every item to `submit`, opaque first
    ///
    /// Stops at the first submission error. Both buckets are empty
    /// afterwards either way. Returns the number of items submitted.
    pub fn flush<F>(&mut self, mut submit: F) -> RenderResult<usize>
    where
        F: FnMut(QueueBucket, &RenderQueueItem) -> RenderResult<()>,
    {
        let mut opaque = std::mem::take(&mut self.opaque);
        let mut transparent = std::mem::take(&mut self.transparent);

        opaque.sort_by(opaque_order);
        transparent.sort_by(transparent_order);

        let mut submitted = 0;
        for item in &opaque {
            submit(QueueBucket::Opaque, item)?;
            submitted += 1;
        }
        for item in &transparent {
            submit(QueueBucket::Transparent, item)?;
            submitted += 1;
        }

        // Hand the allocations back for the next frame
        opaque.clear();
        transparent.clear();
        self.opaque = opaque;
        self.transparent = transparent;

        Ok(submitted)
    }
}

fn opaque_order(a: &RenderQueueItem, b: &RenderQueueItem) -> Ordering {
    a.material
        .shader()
        .token()
        .cmp(&b.material.shader().token())
        .then_with(|| a.depth.total_cmp(&b.depth))
}

fn transparent_order(a: &RenderQueueItem, b: &RenderQueueItem) -> Ordering {
    b.depth.total_cmp(&a.depth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendKind, RenderParameters};
    use crate::foundation::math::Vec3;
    use crate::render::api::RenderBackend;
    use crate::render::backends::headless::HeadlessBackend;
    use crate::render::primitives::Aabb;
    use crate::render::resources::{BufferDescriptor, Shader, ShaderDescriptor, VertexFormat};
    use crate::render::RenderError;

    struct Fixture {
        backend: HeadlessBackend,
    }

    impl Fixture {
        fn new() -> Self {
            let mut backend = HeadlessBackend::new();
            backend
                .initialize(&RenderParameters::new(BackendKind::Headless))
                .expect("headless init");
            Self { backend }
        }

        fn shader(&mut self, name: &str) -> Rc<Shader> {
            self.backend
                .resource_creator()
                .create_shader(&ShaderDescriptor { name, vertex_code: b"v", fragment_code: b"f" })
                .expect("shader")
        }

        fn mesh(&mut self, name: &str) -> Rc<Mesh> {
            let vertices = self
                .backend
                .resource_creator()
                .create_vertex_buffer(&BufferDescriptor::dynamic(36), VertexFormat::Position)
                .expect("vertex buffer");
            let bounds = Aabb::from_center_extents(Vec3::zeros(), Vec3::new(0.5, 0.5, 0.5));
            Rc::new(Mesh::new(name, vertices, None, bounds).expect("mesh"))
        }
    }

    fn item_at(mesh: Rc<Mesh>, material: Rc<Material>, depth: f32) -> RenderQueueItem {
        let world = Mat4::new_translation(&Vec3::new(0.0, 0.0, -depth));
        RenderQueueItem::new(mesh, material, world, &Mat4::identity())
    }

    fn drain(queue: &mut RenderQueue) -> Vec<(QueueBucket, String, f32)> {
        let mut out = Vec::new();
        queue
            .flush(|bucket, item| {
                out.push((bucket, item.mesh.name().to_string(), item.depth));
                Ok(())
            })
            .expect("flush");
        out
    }

    #[test]
    fn test_depth_is_distance_in_front_of_camera() {
        let mut fx = Fixture::new();
        let material = Rc::new(Material::new("m", fx.shader("s")));
        let item = item_at(fx.mesh("cube"), material, 7.5);
        assert!((item.depth - 7.5).abs() < 1e-5);
    }

    #[test]
    fn test_opaque_grouped_by_shader_in_insertion_order() {
        let mut fx = Fixture::new();
        let shader_a = fx.shader("a");
        let shader_b = fx.shader("b");
        let mat_a = Rc::new(Material::new("a", shader_a));
        let mat_b = Rc::new(Material::new("b", shader_b));

        let mut queue = RenderQueue::new();
        for (name, material) in [("b1", &mat_b), ("a1", &mat_a), ("b2", &mat_b), ("a2", &mat_a)] {
            queue.push(item_at(fx.mesh(name), Rc::clone(material), 5.0));
        }

        let order: Vec<String> = drain(&mut queue).into_iter().map(|(_, name, _)| name).collect();
        assert_eq!(order, vec!["a1", "a2", "b1", "b2"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_opaque_front_to_back_within_shader() {
        let mut fx = Fixture::new();
        let material = Rc::new(Material::new("m", fx.shader("s")));

        let mut queue = RenderQueue::new();
        for (name, depth) in [("far", 30.0), ("near", 2.0), ("mid", 10.0)] {
            queue.push(item_at(fx.mesh(name), Rc::clone(&material), depth));
        }

        let order: Vec<String> = drain(&mut queue).into_iter().map(|(_, name, _)| name).collect();
        assert_eq!(order, vec!["near", "mid", "far"]);
    }

    #[test]
    fn test_transparent_back_to_front() {
        let mut fx = Fixture::new();
        let glass = Rc::new(Material::new("glass", fx.shader("s")).with_transparency(true));

        let mut queue = RenderQueue::new();
        for depth in [1.0, 5.0, 3.0] {
            queue.push(item_at(fx.mesh("pane"), Rc::clone(&glass), depth));
        }

        let depths: Vec<f32> = drain(&mut queue).into_iter().map(|(_, _, d)| d.round()).collect();
        assert_eq!(depths, vec![5.0, 3.0, 1.0]);
    }

    #[test]
    fn test_opaque_flushed_before_transparent() {
        let mut fx = Fixture::new();
        let shader = fx.shader("s");
        let glass = Rc::new(Material::new("glass", Rc::clone(&shader)).with_transparency(true));
        let solid = Rc::new(Material::new("solid", shader));

        let mut queue = RenderQueue::new();
        queue.push(item_at(fx.mesh("window"), glass, 1.0));
        queue.push(item_at(fx.mesh("wall"), solid, 9.0));
        assert_eq!((queue.opaque_len(), queue.transparent_len()), (1, 1));

        let buckets: Vec<QueueBucket> = drain(&mut queue).into_iter().map(|(b, _, _)| b).collect();
        assert_eq!(buckets, vec![QueueBucket::Opaque, QueueBucket::Transparent]);
    }

    #[test]
    fn test_missing_material_is_skipped() {
        let mut fx = Fixture::new();
        let mesh = fx.mesh("orphan");

        let mut queue = RenderQueue::new();
        let queued = queue.add_item("orphan", Some(&mesh), None, Mat4::identity(), &Mat4::identity());

        assert!(!queued);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_failed_flush_still_clears_buckets() {
        let mut fx = Fixture::new();
        let material = Rc::new(Material::new("m", fx.shader("s")));

        let mut queue = RenderQueue::new();
        queue.push(item_at(fx.mesh("x"), Rc::clone(&material), 1.0));
        queue.push(item_at(fx.mesh("y"), material, 2.0));

        let result = queue.flush(|_, _| Err(RenderError::Backend("device lost".to_string())));
        assert!(result.is_err());
        assert!(queue.is_empty());
    }
}
