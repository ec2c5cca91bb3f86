//! Drawable geometry and surface description
//!
//! A [`Mesh`] is GPU geometry plus its object-space bounds. A [`Material`]
//! is the shader, textures and blending class used to draw it. Both are
//! shared between scene nodes through `Rc`.

use std::rc::Rc;

use super::{Buffer, Shader, Texture2D};
use crate::render::primitives::Aabb;
use crate::render::{RenderError, RenderResult};

/// GPU geometry with object-space bounds
#[derive(Debug, Clone)]
pub struct Mesh {
    name: String,
    vertex_buffer: Rc<Buffer>,
    index_buffer: Option<Rc<Buffer>>,
    bounds: Aabb,
}

impl Mesh {
    /// Create a mesh from a vertex buffer and optional index buffer
    pub fn new(
        name: impl Into<String>,
        vertex_buffer: Rc<Buffer>,
        index_buffer: Option<Rc<Buffer>>,
        bounds: Aabb,
    ) -> RenderResult<Self> {
        let name = name.into();
        if vertex_buffer.vertex_format().is_none() {
            return Err(RenderError::ResourceCreation {
                operation: "assemble",
                resource: format!("mesh '{name}'"),
                reason: "vertex slot holds a non-vertex buffer".to_string(),
            });
        }
        if let Some(indices) = &index_buffer {
            if !matches!(indices.kind(), super::BufferKind::Index { .. }) {
                return Err(RenderError::ResourceCreation {
                    operation: "assemble",
                    resource: format!("mesh '{name}'"),
                    reason: "index slot holds a non-index buffer".to_string(),
                });
            }
        }
        Ok(Self { name, vertex_buffer, index_buffer, bounds })
    }

    /// Debug name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Vertex buffer
    pub fn vertex_buffer(&self) -> &Rc<Buffer> {
        &self.vertex_buffer
    }

    /// Index buffer, if the mesh is indexed
    pub fn index_buffer(&self) -> Option<&Rc<Buffer>> {
        self.index_buffer.as_ref()
    }

    /// Object-space bounding box
    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    /// Vertices (or indices, when indexed) submitted per draw
    pub fn element_count(&self) -> usize {
        self.index_buffer
            .as_ref()
            .map_or_else(|| self.vertex_buffer.element_count(), |ib| ib.element_count())
    }
}

/// Shader, textures and blending class for a draw
#[derive(Debug, Clone)]
pub struct Material {
    name: String,
    shader: Rc<Shader>,
    textures: Vec<Rc<Texture2D>>,
    color: [f32; 4],
    transparent: bool,
}

impl Material {
    /// Opaque material with no textures
    pub fn new(name: impl Into<String>, shader: Rc<Shader>) -> Self {
        Self {
            name: name.into(),
            shader,
            textures: Vec::new(),
            color: [1.0, 1.0, 1.0, 1.0],
            transparent: false,
        }
    }

    /// Add a texture; shaders index textures in the order they were added
    pub fn with_texture(mut self, texture: Rc<Texture2D>) -> Self {
        self.textures.push(texture);
        self
    }

    /// Set the tint color [R, G, B, A]
    pub fn with_color(mut self, color: [f32; 4]) -> Self {
        self.color = color;
        self
    }

    /// Route the material to the alpha-blended bucket
    pub fn with_transparency(mut self, transparent: bool) -> Self {
        self.transparent = transparent;
        self
    }

    /// Debug name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shader program
    pub fn shader(&self) -> &Rc<Shader> {
        &self.shader
    }

    /// Textures in shader slot order
    pub fn textures(&self) -> &[Rc<Texture2D>] {
        &self.textures
    }

    /// Tint color
    pub fn color(&self) -> [f32; 4] {
        self.color
    }

    /// Whether the material is alpha blended
    pub fn is_transparent(&self) -> bool {
        self.transparent
    }
}
