//! Renderer facade
//!
//! The single entry point client code talks to. Owns the active backend,
//! the camera state, the render queue and both driver caches, and enforces
//! the frame sequence:
//!
//! ```text
//! Uninitialized --initialize--> Ready --start_render--> InFrame
//!       ^                         ^                        |
//!       |                         |                    end_render
//!    shutdown                present_frame                 v
//!       |                         +---------------- FramePending
//! ```
//!
//! Out-of-sequence calls fail with [`RenderError::State`] before anything is
//! sent to the driver.

use std::fmt;
use std::rc::Rc;

use crate::config::{BackendKind, RenderParameters};
use crate::foundation::math::{utils, DMat4, DVec4, Mat4, Mat4Ext, Vec2, Vec3};
use crate::render::api::{
    BlendEquation, BlendFactor, ClearFlags, CullMethod, DepthFunc, DeviceCapabilities, DrawCall,
    DriverStats, FillMode, PipelineState, RenderBackend, StateCategory, Viewport, WindowTarget,
};
use crate::render::backends::create_backend;
use crate::render::cache::{PipelineStateCache, TextureBindingCache, TextureCacheStats};
use crate::render::primitives::{ClipDepth, Frustum};
use crate::render::queue::{QueueBucket, RenderQueue, RenderQueueItem};
use crate::render::resources::{Buffer, ResourceCreator, ResourceToken, Shader, Texture2D};
use crate::render::{RenderError, RenderResult};
use crate::scene::SceneTree;

const DEFAULT_FOV_DEGREES: f32 = 60.0;
const DEFAULT_NEAR: f32 = 1.0;
const DEFAULT_FAR: f32 = 1000.0;

// States the text pass overrides, paired with the value restored afterwards
// when the client never committed one
const TEXT_PASS_STATES: [(PipelineState, PipelineState); 3] = [
    (PipelineState::DepthTest(false), PipelineState::DepthTest(true)),
    (PipelineState::Blending(true), PipelineState::Blending(false)),
    (
        PipelineState::BlendFactor { src: BlendFactor::SrcAlpha, dst: BlendFactor::OneMinusSrcAlpha },
        PipelineState::BlendFactor { src: BlendFactor::One, dst: BlendFactor::Zero },
    ),
];

/// Position in the frame sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// No backend yet
    Uninitialized,
    /// Between frames
    Ready,
    /// Between `start_render` and `end_render`
    InFrame,
    /// Frame recorded, waiting for `present_frame`
    FramePending,
}

impl fmt::Display for FrameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Ready => "ready",
            Self::InFrame => "in frame",
            Self::FramePending => "waiting for present",
        };
        f.write_str(name)
    }
}

/// Counters for the current frame, reset at `start_render`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Items inserted into the render queue
    pub items_queued: u32,
    /// Nodes rejected by frustum culling
    pub items_culled: u32,
    /// Nodes skipped for a missing mesh or material
    pub items_skipped: u32,
    /// Draws submitted to the backend
    pub draw_calls: u32,
}

#[derive(Debug, Clone)]
struct ViewState {
    view: DMat4,
    projection: DMat4,
    view_projection: DMat4,
    frustum: Option<Frustum>,
    near: f32,
    far: f32,
}

impl ViewState {
    fn new() -> Self {
        Self {
            view: DMat4::identity(),
            projection: DMat4::identity(),
            view_projection: DMat4::identity(),
            frustum: None,
            near: DEFAULT_NEAR,
            far: DEFAULT_FAR,
        }
    }

    fn set_view(&mut self, view: &Mat4) {
        self.view = view.cast();
        self.refresh();
    }

    fn set_projection(&mut self, projection: DMat4, near: f32, far: f32) {
        self.projection = projection;
        self.near = near;
        self.far = far;
        self.refresh();
    }

    fn refresh(&mut self) {
        self.view_projection = self.projection * self.view;
        self.frustum = None;
    }
}

/// Backend-agnostic renderer
///
/// Constructed once by the host application and passed to whatever needs to
/// draw. The backend is chosen at [`Renderer::initialize`] and fixed until
/// [`Renderer::shutdown`].
pub struct Renderer {
    state: FrameState,
    backend: Option<Box<dyn RenderBackend>>,
    parameters: RenderParameters,
    capabilities: Option<DeviceCapabilities>,
    view: ViewState,
    queue: RenderQueue,
    state_cache: PipelineStateCache,
    texture_cache: TextureBindingCache,
    bound_shader: Option<ResourceToken>,
    frustum_culling: bool,
    frame_stats: FrameStats,
    frame_count: u64,
}

impl fmt::Debug for Renderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Renderer")
            .field("state", &self.state)
            .field("backend", &self.backend.as_ref().map(|b| b.kind()))
            .field("parameters", &self.parameters)
            .field("frame_count", &self.frame_count)
            .finish_non_exhaustive()
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    /// Create an uninitialized renderer
    pub fn new() -> Self {
        Self {
            state: FrameState::Uninitialized,
            backend: None,
            parameters: RenderParameters::default(),
            capabilities: None,
            view: ViewState::new(),
            queue: RenderQueue::new(),
            state_cache: PipelineStateCache::new(),
            texture_cache: TextureBindingCache::new(0),
            bound_shader: None,
            frustum_culling: true,
            frame_stats: FrameStats::default(),
            frame_count: 0,
        }
    }

    /// Create and initialize the backend
    ///
    /// `backend_kind` wins over `parameters.backend`. The back buffer uses
    /// the size in `parameters`. On failure the renderer stays
    /// uninitialized.
    pub fn initialize(
        &mut self,
        backend_kind: BackendKind,
        window: &WindowTarget,
        parameters: RenderParameters,
    ) -> RenderResult<()> {
        if self.state != FrameState::Uninitialized {
            return Err(self.state_error("initialize"));
        }
        let backend = create_backend(backend_kind).map_err(|e| {
            log::error!("Cannot create the {backend_kind} backend: {e}");
            e
        })?;
        self.initialize_with_backend(backend, window, parameters)
    }

    /// Initialize with an already constructed, uninitialized backend
    pub fn initialize_with_backend(
        &mut self,
        mut backend: Box<dyn RenderBackend>,
        window: &WindowTarget,
        mut parameters: RenderParameters,
    ) -> RenderResult<()> {
        if self.state != FrameState::Uninitialized {
            return Err(self.state_error("initialize"));
        }

        let backend_kind = backend.kind();
        if parameters.backend != backend_kind {
            log::warn!(
                "Render parameters name the {} backend but {backend_kind} was requested; using {backend_kind}",
                parameters.backend
            );
            parameters.backend = backend_kind;
        }
        if (window.width, window.height) != (parameters.width, parameters.height) {
            log::debug!(
                "Back buffer {}x{} differs from window surface {}x{}",
                parameters.width, parameters.height, window.width, window.height
            );
        }
        parameters.windowed = window.windowed;

        parameters.validate().map_err(|e| {
            log::error!("Invalid render parameters: {e}");
            RenderError::from(e)
        })?;

        backend.initialize(&parameters).map_err(|e| {
            log::error!("{backend_kind} backend failed to initialize: {e}");
            RenderError::Configuration(format!("{backend_kind} backend failed to initialize: {e}"))
        })?;

        let capabilities = backend.capabilities();
        let aspect = parameters.width as f32 / parameters.height as f32;
        let (left, right, bottom, top) = frustum_extents(DEFAULT_FOV_DEGREES, aspect, DEFAULT_NEAR);
        let projection = backend.perspective_projection(
            left, right, bottom, top,
            f64::from(DEFAULT_NEAR), f64::from(DEFAULT_FAR),
        );

        self.texture_cache = TextureBindingCache::new(capabilities.max_active_textures);
        self.state_cache = PipelineStateCache::new();
        self.view = ViewState::new();
        self.view.set_projection(projection, DEFAULT_NEAR, DEFAULT_FAR);
        self.queue.clear();
        self.bound_shader = None;
        self.capabilities = Some(capabilities);
        self.parameters = parameters;
        self.backend = Some(backend);
        self.state = FrameState::Ready;

        log::info!(
            "Renderer initialized: {backend_kind} {}x{} ({}), {} texture units, {} render targets",
            self.parameters.width,
            self.parameters.height,
            if self.parameters.windowed { "windowed" } else { "fullscreen" },
            capabilities.max_active_textures,
            capabilities.max_render_targets,
        );
        Ok(())
    }

    /// Destroy the backend and return to `Uninitialized`
    pub fn shutdown(&mut self) {
        self.queue.clear();
        if let Some(mut backend) = self.backend.take() {
            backend.shutdown();
            log::info!("Renderer shut down after {} frames", self.frame_count);
        }
        self.capabilities = None;
        self.bound_shader = None;
        self.texture_cache.reset();
        self.state_cache.invalidate();
        self.state = FrameState::Uninitialized;
    }

    // ---- state checks ---------------------------------------------------

    fn state_error(&self, operation: &'static str) -> RenderError {
        let err = RenderError::State {
            operation,
            reason: format!("renderer is {}", self.state),
        };
        log::error!("{err}");
        err
    }

    fn expect_state(&self, operation: &'static str, expected: FrameState) -> RenderResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.state_error(operation))
        }
    }

    fn backend_mut(&mut self, operation: &'static str) -> RenderResult<&mut dyn RenderBackend> {
        match self.backend.as_deref_mut() {
            Some(backend) => Ok(backend),
            None => Err(RenderError::State {
                operation,
                reason: "renderer is uninitialized".to_string(),
            }),
        }
    }

    fn backend_ref(&self, operation: &'static str) -> RenderResult<&dyn RenderBackend> {
        match self.backend.as_deref() {
            Some(backend) => Ok(backend),
            None => Err(RenderError::State {
                operation,
                reason: "renderer is uninitialized".to_string(),
            }),
        }
    }

    // ---- queries --------------------------------------------------------

    /// Current frame state
    pub fn frame_state(&self) -> FrameState {
        self.state
    }

    /// Whether a backend is active
    pub fn is_initialized(&self) -> bool {
        self.state != FrameState::Uninitialized
    }

    /// Active backend kind
    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.backend.as_ref().map(|b| b.kind())
    }

    /// Back buffer width
    pub fn width(&self) -> u32 {
        self.parameters.width
    }

    /// Back buffer height
    pub fn height(&self) -> u32 {
        self.parameters.height
    }

    /// Parameters the backend was initialized with
    pub fn parameters(&self) -> &RenderParameters {
        &self.parameters
    }

    /// Device limits, once initialized
    pub fn device_capabilities(&self) -> Option<DeviceCapabilities> {
        self.capabilities
    }

    /// Current projection matrix
    pub fn projection_matrix(&self) -> &DMat4 {
        &self.view.projection
    }

    /// Current view matrix
    pub fn view_matrix(&self) -> &DMat4 {
        &self.view.view
    }

    /// Projection times view
    pub fn view_projection_matrix(&self) -> &DMat4 {
        &self.view.view_projection
    }

    /// Near plane distance of the current projection
    pub fn near_frustum_distance(&self) -> f32 {
        self.view.near
    }

    /// Far plane distance of the current projection
    pub fn far_frustum_distance(&self) -> f32 {
        self.view.far
    }

    /// Counters for the current (or last) frame
    pub fn frame_stats(&self) -> FrameStats {
        self.frame_stats
    }

    /// Frames presented since initialization
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Driver call counters of the active backend
    pub fn driver_stats(&self) -> Option<DriverStats> {
        self.backend.as_ref().map(|b| *b.stats())
    }

    /// Texture binding cache counters
    pub fn texture_cache_stats(&self) -> TextureCacheStats {
        self.texture_cache.stats()
    }

    /// Active backend, for backend-specific inspection
    pub fn backend(&self) -> Option<&dyn RenderBackend> {
        self.backend.as_deref()
    }

    /// Resource factory of the active backend
    pub fn resource_creator(&mut self) -> RenderResult<&mut dyn ResourceCreator> {
        Ok(self.backend_mut("resource_creator")?.resource_creator())
    }

    // ---- frame sequence -------------------------------------------------

    /// Begin a frame: `Ready -> InFrame`
    pub fn start_render(&mut self) -> RenderResult<()> {
        self.expect_state("start_render", FrameState::Ready)?;
        self.backend_mut("start_render")?.start_render()?;
        self.frame_stats = FrameStats::default();
        self.state = FrameState::InFrame;
        log::trace!("Begin frame {}", self.frame_count);
        Ok(())
    }

    /// Finish recording: `InFrame -> FramePending`
    pub fn end_render(&mut self) -> RenderResult<()> {
        self.expect_state("end_render", FrameState::InFrame)?;
        self.backend_mut("end_render")?.end_render()?;
        self.state = FrameState::FramePending;
        Ok(())
    }

    /// Present the finished frame: `FramePending -> Ready`
    pub fn present_frame(&mut self) -> RenderResult<()> {
        self.expect_state("present_frame", FrameState::FramePending)?;
        self.backend_mut("present_frame")?.present_frame()?;
        self.state = FrameState::Ready;
        self.frame_count += 1;
        Ok(())
    }

    /// Set the color used by [`Renderer::clear`]
    pub fn set_clear_color(&mut self, color: [f32; 4]) -> RenderResult<()> {
        self.backend_mut("set_clear_color")?.set_clear_color(color);
        Ok(())
    }

    /// Clear the selected buffers; only inside a frame
    pub fn clear(&mut self, flags: ClearFlags) -> RenderResult<()> {
        self.expect_state("clear", FrameState::InFrame)?;
        self.backend_mut("clear")?.clear(flags)
    }

    /// Set the pixel rectangle draws land in
    pub fn set_viewport(&mut self, x: u32, y: u32, width: u32, height: u32) -> RenderResult<()> {
        self.backend_mut("set_viewport")?
            .set_viewport(Viewport { x, y, width, height })
    }

    // ---- camera ---------------------------------------------------------

    /// Replace the projection with an off-center orthographic one
    pub fn orthographic_projection(&mut self, left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> RenderResult<()> {
        let projection = self
            .backend_ref("orthographic_projection")?
            .orthographic_projection(
                f64::from(left), f64::from(right), f64::from(bottom), f64::from(top),
                f64::from(near), f64::from(far),
            );
        self.view.set_projection(projection, near, far);
        Ok(())
    }

    /// Replace the projection with an off-center perspective one
    pub fn perspective_projection(&mut self, left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> RenderResult<()> {
        let projection = self
            .backend_ref("perspective_projection")?
            .perspective_projection(
                f64::from(left), f64::from(right), f64::from(bottom), f64::from(top),
                f64::from(near), f64::from(far),
            );
        self.view.set_projection(projection, near, far);
        Ok(())
    }

    /// Symmetric perspective from a vertical field of view in degrees
    pub fn perspective(&mut self, fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> RenderResult<()> {
        let (left, right, bottom, top) = frustum_extents(fov_y_degrees, aspect, near);
        let projection = self
            .backend_ref("perspective")?
            .perspective_projection(left, right, bottom, top, f64::from(near), f64::from(far));
        self.view.set_projection(projection, near, far);
        Ok(())
    }

    /// Point the camera from `position` at `target`
    pub fn camera_look_at(&mut self, position: Vec3, target: Vec3, up: Vec3) {
        self.view.set_view(&Mat4::look_at(position, target, up));
    }

    /// Build the view from an orthonormal camera basis
    pub fn camera_from_basis(&mut self, right: Vec3, up: Vec3, look: Vec3, position: Vec3) {
        self.view.set_view(&Mat4::from_camera_basis(right, up, look, position));
    }

    /// Replace the view matrix
    pub fn set_view_matrix(&mut self, view: Mat4) {
        self.view.set_view(&view);
    }

    /// Six normalized planes of the current view-projection matrix
    ///
    /// Recomputed only after the camera or projection changed.
    pub fn extract_view_frustum_planes(&mut self) -> RenderResult<Frustum> {
        if let Some(frustum) = &self.view.frustum {
            return Ok(frustum.clone());
        }
        let frustum = self
            .backend_ref("extract_view_frustum_planes")?
            .extract_view_frustum_planes(&self.view.view_projection);
        self.view.frustum = Some(frustum.clone());
        Ok(frustum)
    }

    /// Map a pixel position to world space on the near plane
    pub fn screen_to_world_point(&self, point: Vec2) -> RenderResult<Vec3> {
        let backend = self.backend_ref("screen_to_world_point")?;
        let inverse = self.view.view_projection.try_inverse().ok_or_else(|| RenderError::State {
            operation: "screen_to_world_point",
            reason: "view-projection matrix is not invertible".to_string(),
        })?;

        let convention = backend.clip_convention();
        let ndc_y = 1.0 - 2.0 * f64::from(point.y) / f64::from(self.parameters.height);
        let ndc = DVec4::new(
            2.0 * f64::from(point.x) / f64::from(self.parameters.width) - 1.0,
            if convention.y_down { -ndc_y } else { ndc_y },
            match convention.depth {
                ClipDepth::NegativeOneToOne => -1.0,
                ClipDepth::ZeroToOne => 0.0,
            },
            1.0,
        );
        let world = inverse * ndc;
        let point = nalgebra::Point3::from_homogeneous(world).map_or_else(|| world.xyz(), |p| p.coords);
        Ok(point.cast())
    }

    // ---- binding --------------------------------------------------------

    /// Make a texture resident and return its unit
    pub fn bind_texture(&mut self, texture: &Texture2D) -> RenderResult<usize> {
        let backend = self.backend.as_deref_mut().ok_or_else(|| RenderError::State {
            operation: "bind_texture",
            reason: "renderer is uninitialized".to_string(),
        })?;
        self.texture_cache.bind(backend, texture)
    }

    /// Bind a shader program; `None` unbinds
    pub fn bind_shader(&mut self, shader: Option<&Shader>) -> RenderResult<()> {
        self.backend_mut("bind_shader")?.bind_shader(shader)?;
        self.bound_shader = shader.map(Shader::token);
        Ok(())
    }

    fn ensure_shader(&mut self, shader: &Shader) -> RenderResult<()> {
        if self.bound_shader != Some(shader.token()) {
            self.bind_shader(Some(shader))?;
        }
        Ok(())
    }

    // ---- pipeline state -------------------------------------------------

    fn set_state(&mut self, state: PipelineState) -> RenderResult<()> {
        let backend = self.backend.as_deref_mut().ok_or_else(|| RenderError::State {
            operation: "set_state",
            reason: "renderer is uninitialized".to_string(),
        })?;
        self.state_cache.set(backend, state).map(|_| ())
    }

    /// Enable or disable depth testing
    pub fn enable_depth_test(&mut self, enabled: bool) -> RenderResult<()> {
        self.set_state(PipelineState::DepthTest(enabled))
    }

    /// Enable or disable depth buffer writes
    pub fn enable_depth_write(&mut self, enabled: bool) -> RenderResult<()> {
        self.set_state(PipelineState::DepthWrite(enabled))
    }

    /// Enable or disable color buffer writes
    pub fn enable_color_write(&mut self, enabled: bool) -> RenderResult<()> {
        self.set_state(PipelineState::ColorWrite(enabled))
    }

    /// Set the depth comparison function
    pub fn set_depth_comparison_func(&mut self, func: DepthFunc) -> RenderResult<()> {
        self.set_state(PipelineState::DepthFunc(func))
    }

    /// Set which faces are culled
    pub fn set_culling_method(&mut self, method: CullMethod) -> RenderResult<()> {
        self.set_state(PipelineState::CullMethod(method))
    }

    /// Set the polygon fill mode
    pub fn set_render_fill_mode(&mut self, mode: FillMode) -> RenderResult<()> {
        self.set_state(PipelineState::FillMode(mode))
    }

    /// Enable or disable alpha blending
    pub fn enable_blending(&mut self, enabled: bool) -> RenderResult<()> {
        self.set_state(PipelineState::Blending(enabled))
    }

    /// Set the blend equation
    pub fn set_blending_equation(&mut self, equation: BlendEquation) -> RenderResult<()> {
        self.set_state(PipelineState::BlendEquation(equation))
    }

    /// Set source and destination blend factors
    pub fn set_blending_factor(&mut self, src: BlendFactor, dst: BlendFactor) -> RenderResult<()> {
        self.set_state(PipelineState::BlendFactor { src, dst })
    }

    /// Value last committed to the driver for a state category
    pub fn pipeline_state(&self, category: StateCategory) -> Option<PipelineState> {
        self.state_cache.current(category)
    }

    /// Turn frustum culling of scene nodes on or off
    pub fn set_frustum_culling(&mut self, enabled: bool) {
        self.frustum_culling = enabled;
    }

    /// Whether scene nodes are frustum culled
    pub fn frustum_culling(&self) -> bool {
        self.frustum_culling
    }

    // ---- submission -----------------------------------------------------

    /// Draw a scene: traverse, cull, queue, sort, flush
    ///
    /// Only valid inside a frame. Both queue buckets are empty afterwards,
    /// even when a draw fails.
    pub fn render(&mut self, scene: &SceneTree) -> RenderResult<()> {
        self.expect_state("render", FrameState::InFrame)?;

        let frustum = if self.frustum_culling {
            Some(self.extract_view_frustum_planes()?)
        } else {
            None
        };

        let mut queue = std::mem::take(&mut self.queue);
        let view: Mat4 = self.view.view.cast();
        let mut stats = self.frame_stats;

        scene.traverse(|_, node, world| {
            if !node.is_drawable() {
                return;
            }
            if let (Some(frustum), Some(mesh)) = (&frustum, &node.mesh) {
                if !frustum.intersects_aabb(&mesh.bounds().transformed(world)) {
                    stats.items_culled += 1;
                    return;
                }
            }
            if queue.add_item(node.name(), node.mesh.as_ref(), node.material.as_ref(), *world, &view) {
                stats.items_queued += 1;
            } else {
                stats.items_skipped += 1;
            }
        });

        self.frame_stats = stats;
        let result = queue.flush(|bucket, item| self.submit(bucket, item));
        self.queue = queue;

        let submitted = result?;
        log::trace!(
            "Rendered {submitted} items ({} culled, {} skipped)",
            stats.items_culled, stats.items_skipped
        );
        Ok(())
    }

    fn submit(&mut self, bucket: QueueBucket, item: &RenderQueueItem) -> RenderResult<()> {
        match bucket {
            QueueBucket::Opaque => {
                self.set_state(PipelineState::Blending(false))?;
                self.set_state(PipelineState::DepthWrite(true))?;
            }
            QueueBucket::Transparent => {
                self.set_state(PipelineState::Blending(true))?;
                self.set_state(PipelineState::BlendFactor {
                    src: BlendFactor::SrcAlpha,
                    dst: BlendFactor::OneMinusSrcAlpha,
                })?;
                self.set_state(PipelineState::DepthWrite(false))?;
            }
        }

        let material = &item.material;
        self.ensure_shader(material.shader())?;

        let capacity = self.texture_cache.capacity();
        if material.textures().len() > capacity {
            return Err(RenderError::State {
                operation: "render",
                reason: format!(
                    "material '{}' uses {} textures but the device has {capacity} units",
                    material.name(),
                    material.textures().len()
                ),
            });
        }
        let mut units = Vec::with_capacity(material.textures().len());
        for texture in material.textures() {
            units.push(self.bind_texture(texture)?);
        }

        let call = DrawCall {
            vertex_buffer: item.mesh.vertex_buffer(),
            index_buffer: item.mesh.index_buffer().map(Rc::as_ref),
            model_view_projection: (self.view.view_projection * item.world.cast::<f64>()).cast(),
            texture_units: &units,
            color: material.color(),
        };
        self.backend_mut("render")?.draw(&call)?;
        self.frame_stats.draw_calls += 1;
        Ok(())
    }

    /// Draw a screen-space text vertex buffer with the built-in text shader
    ///
    /// Vertices are in pixels with the origin at the top-left corner. The
    /// font atlas is sampled as coverage and tinted with `color`.
    pub fn draw_text_buffer(&mut self, vertex_buffer: &Buffer, font_atlas: &Texture2D, color: Vec3) -> RenderResult<()> {
        self.expect_state("draw_text_buffer", FrameState::InFrame)?;

        let backend = self.backend_ref("draw_text_buffer")?;
        let shader = backend.text_shader().ok_or_else(|| RenderError::State {
            operation: "draw_text_buffer",
            reason: format!("the {} backend has no text shader", backend.kind()),
        })?;
        let (width, height) = (f64::from(self.parameters.width), f64::from(self.parameters.height));
        let screen: Mat4 = backend.orthographic_projection(0.0, width, height, 0.0, -1.0, 1.0).cast();

        self.ensure_shader(&shader)?;
        let unit = self.bind_texture(font_atlas)?;

        let restore = TEXT_PASS_STATES.map(|(_, fallback)| {
            self.state_cache.current(fallback.category()).unwrap_or(fallback)
        });
        for (state, _) in TEXT_PASS_STATES {
            self.set_state(state)?;
        }

        let call = DrawCall {
            vertex_buffer,
            index_buffer: None,
            model_view_projection: screen,
            texture_units: &[unit],
            color: [color.x, color.y, color.z, 1.0],
        };
        let drawn = self.backend_mut("draw_text_buffer")?.draw(&call);
        for state in restore {
            self.set_state(state)?;
        }
        drawn?;
        self.frame_stats.draw_calls += 1;
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if self.backend.is_some() {
            self.shutdown();
        }
    }
}

// Near-plane extents of a symmetric frustum
fn frustum_extents(fov_y_degrees: f32, aspect: f32, near: f32) -> (f64, f64, f64, f64) {
    let top = f64::from(near) * (f64::from(utils::deg_to_rad(fov_y_degrees)) * 0.5).tan();
    let right = top * f64::from(aspect);
    (-right, right, -top, top)
}
