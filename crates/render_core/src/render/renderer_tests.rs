//! Renderer facade tests
//!
//! Every scenario runs on the headless driver, whose shared call log lets a
//! test see exactly what reached the "GPU" after both caches filtered it.

use std::rc::Rc;

use approx::assert_relative_eq;

use super::*;
use crate::config::{BackendKind, RenderParameters};
use crate::foundation::math::{Transform, Vec2, Vec3};
use crate::render::backends::headless::{CallLog, DriverCall, HeadlessBackend};
use crate::render::primitives::FrustumSide;
use crate::render::resources::{
    BufferDescriptor, Shader, ShaderDescriptor, Texture2D, TextureDescriptor, TextureFormat,
    VertexFormat,
};
use crate::scene::SceneTree;

const WIDTH: u32 = 800;
const HEIGHT: u32 = 600;

fn parameters() -> RenderParameters {
    RenderParameters::new(BackendKind::Headless).with_size(WIDTH, HEIGHT)
}

/// Renderer on a fresh headless driver plus a handle to its call log
fn headless_renderer_with(backend: HeadlessBackend) -> (Renderer, CallLog) {
    let log = backend.call_log();
    let mut renderer = Renderer::new();
    renderer
        .initialize_with_backend(Box::new(backend), &WindowTarget::windowed(WIDTH, HEIGHT), parameters())
        .expect("headless renderer");
    (renderer, log)
}

fn headless_renderer() -> (Renderer, CallLog) {
    headless_renderer_with(HeadlessBackend::new())
}

fn shader(renderer: &mut Renderer, name: &str) -> Rc<Shader> {
    renderer
        .resource_creator()
        .unwrap()
        .create_shader(&ShaderDescriptor { name, vertex_code: b"v", fragment_code: b"f" })
        .unwrap()
}

fn texture(renderer: &mut Renderer) -> Rc<Texture2D> {
    renderer
        .resource_creator()
        .unwrap()
        .create_texture_2d(&TextureDescriptor::immutable(2, 2, TextureFormat::Rgba8, &[255; 16]))
        .unwrap()
}

fn cube(renderer: &mut Renderer, name: &str) -> Rc<Mesh> {
    let vertices = renderer
        .resource_creator()
        .unwrap()
        .create_vertex_buffer(&BufferDescriptor::dynamic(36), VertexFormat::Position)
        .unwrap();
    let bounds = Aabb::from_center_extents(Vec3::zeros(), Vec3::new(0.5, 0.5, 0.5));
    Rc::new(Mesh::new(name, vertices, None, bounds).unwrap())
}

/// Place a node at `position` under the root
fn place(scene: &mut SceneTree, name: &str, position: Vec3, mesh: Option<Rc<Mesh>>, material: Option<Rc<Material>>) {
    let root = scene.root();
    let id = scene.create_node(root, Some(name)).unwrap();
    let node = scene.node_mut(id).unwrap();
    node.transform = Transform::from_position(position);
    node.mesh = mesh;
    node.material = material;
}

fn applied_states(log: &CallLog) -> Vec<PipelineState> {
    log.snapshot()
        .into_iter()
        .filter_map(|call| match call {
            DriverCall::ApplyState(state) => Some(state),
            _ => None,
        })
        .collect()
}

fn drawn_vertex_buffers(log: &CallLog) -> Vec<ResourceToken> {
    log.draws()
        .into_iter()
        .filter_map(|call| match call {
            DriverCall::Draw { vertex_buffer, .. } => Some(vertex_buffer),
            _ => None,
        })
        .collect()
}

#[test]
fn test_initialize_uses_parameter_size() {
    let mut renderer = Renderer::new();
    renderer
        .initialize(BackendKind::Headless, &WindowTarget::windowed(WIDTH, HEIGHT), parameters())
        .unwrap();

    assert_eq!(renderer.frame_state(), FrameState::Ready);
    assert_eq!((renderer.width(), renderer.height()), (800, 600));
    assert_eq!(renderer.backend_kind(), Some(BackendKind::Headless));
    assert_eq!(renderer.device_capabilities().unwrap().max_active_textures, 16);
}

#[test]
fn test_explicit_backend_kind_wins_over_parameters() {
    let mut renderer = Renderer::new();
    let params = RenderParameters::new(BackendKind::Vulkan).with_size(WIDTH, HEIGHT);
    renderer
        .initialize(BackendKind::Headless, &WindowTarget::windowed(WIDTH, HEIGHT), params)
        .unwrap();

    assert_eq!(renderer.parameters().backend, BackendKind::Headless);
}

#[test]
fn test_invalid_parameters_leave_renderer_uninitialized() {
    let mut renderer = Renderer::new();
    let params = RenderParameters::new(BackendKind::Headless).with_size(0, 600);

    let err = renderer
        .initialize(BackendKind::Headless, &WindowTarget::windowed(WIDTH, HEIGHT), params)
        .unwrap_err();
    assert!(matches!(err, RenderError::Configuration(_)));
    assert_eq!(renderer.frame_state(), FrameState::Uninitialized);
    assert!(renderer.backend().is_none());
}

#[cfg(not(feature = "vulkan"))]
#[test]
fn test_vulkan_unavailable_without_feature() {
    let mut renderer = Renderer::new();
    let err = renderer
        .initialize(BackendKind::Vulkan, &WindowTarget::windowed(WIDTH, HEIGHT), parameters())
        .unwrap_err();
    assert!(matches!(err, RenderError::Configuration(_)));
    assert!(!renderer.is_initialized());
}

#[test]
fn test_double_initialize_rejected() {
    let (mut renderer, _) = headless_renderer();
    let err = renderer
        .initialize(BackendKind::Headless, &WindowTarget::windowed(WIDTH, HEIGHT), parameters())
        .unwrap_err();
    assert!(matches!(err, RenderError::State { operation: "initialize", .. }));
}

#[test]
fn test_render_before_initialize_touches_nothing() {
    let mut renderer = Renderer::new();
    let err = renderer.render(&SceneTree::new()).unwrap_err();

    assert!(matches!(err, RenderError::State { operation: "render", .. }));
    assert!(renderer.driver_stats().is_none());
}

#[test]
fn test_render_outside_frame_rejected_before_driver() {
    let (mut renderer, log) = headless_renderer();
    let before = log.len();

    let err = renderer.render(&SceneTree::new()).unwrap_err();
    assert!(matches!(err, RenderError::State { operation: "render", .. }));
    assert_eq!(log.len(), before);
}

#[test]
fn test_frame_sequence_is_enforced() {
    let (mut renderer, _) = headless_renderer();

    renderer.start_render().unwrap();
    assert!(renderer.start_render().is_err(), "nested frame");
    assert!(renderer.present_frame().is_err(), "present before end");

    renderer.end_render().unwrap();
    assert_eq!(renderer.frame_state(), FrameState::FramePending);
    assert!(renderer.clear(ClearFlags::COLOR).is_err(), "clear outside frame");

    renderer.present_frame().unwrap();
    assert_eq!(renderer.frame_state(), FrameState::Ready);
    assert_eq!(renderer.frame_count(), 1);
}

#[test]
fn test_clear_reaches_driver_inside_frame() {
    let (mut renderer, log) = headless_renderer();
    renderer.set_clear_color([0.1, 0.2, 0.3, 1.0]).unwrap();

    renderer.start_render().unwrap();
    renderer.clear(ClearFlags::COLOR | ClearFlags::DEPTH).unwrap();

    assert_eq!(
        log.snapshot().last(),
        Some(&DriverCall::Clear(ClearFlags::COLOR | ClearFlags::DEPTH))
    );
}

/// Scene: three opaque cubes on two shaders, one glass pane, one cube
/// behind the camera and one node without a material.
#[test]
fn test_scene_draw_order_and_state_filtering() {
    let (mut renderer, log) = headless_renderer();
    let shader_a = shader(&mut renderer, "a");
    let shader_b = shader(&mut renderer, "b");
    let solid_a = Rc::new(Material::new("solid_a", Rc::clone(&shader_a)));
    let solid_b = Rc::new(Material::new("solid_b", shader_b));
    let glass = Rc::new(Material::new("glass", shader_a).with_transparency(true));

    let wall_a = cube(&mut renderer, "wall_a");
    let wall_b = cube(&mut renderer, "wall_b");
    let crate_a = cube(&mut renderer, "crate_a");
    let pane = cube(&mut renderer, "pane");

    let mut scene = SceneTree::new();
    place(&mut scene, "wall_a", Vec3::new(0.0, 0.0, -10.0), Some(Rc::clone(&wall_a)), Some(Rc::clone(&solid_a)));
    place(&mut scene, "wall_b", Vec3::new(0.0, 0.0, -5.0), Some(Rc::clone(&wall_b)), Some(solid_b));
    place(&mut scene, "crate_a", Vec3::new(0.0, 0.0, -3.0), Some(Rc::clone(&crate_a)), Some(Rc::clone(&solid_a)));
    place(&mut scene, "pane", Vec3::new(0.0, 0.0, -4.0), Some(Rc::clone(&pane)), Some(glass));
    place(&mut scene, "behind", Vec3::new(0.0, 0.0, 10.0), Some(cube(&mut renderer, "behind")), Some(solid_a));
    place(&mut scene, "orphan", Vec3::new(0.0, 0.0, -6.0), Some(cube(&mut renderer, "orphan")), None);

    renderer.start_render().unwrap();
    renderer.render(&scene).unwrap();

    let expected: Vec<ResourceToken> = [&crate_a, &wall_a, &wall_b, &pane]
        .iter()
        .map(|mesh| mesh.vertex_buffer().token())
        .collect();
    assert_eq!(drawn_vertex_buffers(&log), expected);

    assert_eq!(
        applied_states(&log),
        vec![
            PipelineState::Blending(false),
            PipelineState::DepthWrite(true),
            PipelineState::Blending(true),
            PipelineState::BlendFactor { src: BlendFactor::SrcAlpha, dst: BlendFactor::OneMinusSrcAlpha },
            PipelineState::DepthWrite(false),
        ]
    );

    let stats = renderer.frame_stats();
    assert_eq!(stats.items_queued, 4);
    assert_eq!(stats.items_culled, 1);
    assert_eq!(stats.items_skipped, 1);
    assert_eq!(stats.draw_calls, 4);
    // a, b, then a again for the transparent pane
    assert_eq!(renderer.driver_stats().unwrap().shader_binds, 3);
}

#[test]
fn test_culling_can_be_disabled() {
    let (mut renderer, _) = headless_renderer();
    let material = Rc::new(Material::new("m", shader(&mut renderer, "s")));
    let mut scene = SceneTree::new();
    place(&mut scene, "behind", Vec3::new(0.0, 0.0, 10.0), Some(cube(&mut renderer, "behind")), Some(material));

    renderer.set_frustum_culling(false);
    renderer.start_render().unwrap();
    renderer.render(&scene).unwrap();

    assert_eq!(renderer.frame_stats().items_culled, 0);
    assert_eq!(renderer.frame_stats().draw_calls, 1);
}

#[test]
fn test_second_frame_reuses_state_and_texture_units() {
    let (mut renderer, log) = headless_renderer();
    let material = Rc::new(
        Material::new("textured", shader(&mut renderer, "s")).with_texture(texture(&mut renderer)),
    );
    let mut scene = SceneTree::new();
    place(&mut scene, "crate", Vec3::new(0.0, 0.0, -5.0), Some(cube(&mut renderer, "crate")), Some(material));

    for _ in 0..2 {
        renderer.start_render().unwrap();
        renderer.render(&scene).unwrap();
        renderer.end_render().unwrap();
        renderer.present_frame().unwrap();
    }

    let stats = renderer.driver_stats().unwrap();
    assert_eq!(stats.draw_calls, 2);
    assert_eq!(stats.texture_binds, 1);
    assert_eq!(stats.state_changes, 2);
    assert_eq!(stats.shader_binds, 1);
    assert_eq!(renderer.texture_cache_stats().hits, 1);
    assert_eq!(log.draws().len(), 2);
}

#[test]
fn test_material_with_more_textures_than_units_fails() {
    let (mut renderer, _) = headless_renderer_with(HeadlessBackend::with_capabilities(DeviceCapabilities {
        max_active_textures: 1,
        max_render_targets: 1,
    }));
    let material = Rc::new(
        Material::new("busy", shader(&mut renderer, "s"))
            .with_texture(texture(&mut renderer))
            .with_texture(texture(&mut renderer)),
    );
    let mut scene = SceneTree::new();
    place(&mut scene, "busy", Vec3::new(0.0, 0.0, -5.0), Some(cube(&mut renderer, "busy")), Some(material));

    renderer.start_render().unwrap();
    let err = renderer.render(&scene).unwrap_err();

    assert!(matches!(err, RenderError::State { operation: "render", .. }));
    assert_eq!(renderer.frame_stats().draw_calls, 0);
}

#[test]
fn test_bind_texture_hit_skips_driver() {
    let (mut renderer, _) = headless_renderer();
    let atlas = texture(&mut renderer);

    let first = renderer.bind_texture(&atlas).unwrap();
    let second = renderer.bind_texture(&atlas).unwrap();

    assert_eq!(first, second);
    assert_eq!(renderer.driver_stats().unwrap().texture_binds, 1);
}

#[test]
fn test_repeated_state_reaches_driver_once() {
    let (mut renderer, _) = headless_renderer();
    renderer.enable_depth_test(true).unwrap();
    renderer.enable_depth_test(true).unwrap();
    renderer.set_culling_method(CullMethod::Back).unwrap();

    assert_eq!(renderer.driver_stats().unwrap().state_changes, 2);
}

#[test]
fn test_draw_text_buffer_uses_text_shader() {
    let (mut renderer, log) = headless_renderer();
    let text_shader = renderer.backend().unwrap().text_shader().unwrap();
    let atlas = renderer
        .resource_creator()
        .unwrap()
        .create_texture_2d(&TextureDescriptor::immutable(4, 4, TextureFormat::R8, &[255; 16]))
        .unwrap();
    let glyphs = renderer
        .resource_creator()
        .unwrap()
        .create_vertex_buffer(&BufferDescriptor::dynamic(120), VertexFormat::PositionTexcoord)
        .unwrap();

    renderer.start_render().unwrap();
    renderer.draw_text_buffer(&glyphs, &atlas, Vec3::new(1.0, 1.0, 0.0)).unwrap();

    assert_eq!(
        log.draws(),
        vec![DriverCall::Draw {
            shader: text_shader.token(),
            vertex_buffer: glyphs.token(),
            index_buffer: None,
            element_count: 6,
        }]
    );
    let states = applied_states(&log);
    assert!(states.contains(&PipelineState::Blending(true)));
    assert!(states.contains(&PipelineState::DepthTest(false)));
}

#[test]
fn test_text_pass_restores_client_depth_and_blend_state() {
    let (mut renderer, log) = headless_renderer();
    let atlas = texture(&mut renderer);
    let glyphs = renderer
        .resource_creator()
        .unwrap()
        .create_vertex_buffer(&BufferDescriptor::dynamic(120), VertexFormat::PositionTexcoord)
        .unwrap();
    let material = Rc::new(Material::new("solid", shader(&mut renderer, "s")));
    let mut scene = SceneTree::new();
    place(&mut scene, "box", Vec3::new(0.0, 0.0, -10.0), Some(cube(&mut renderer, "box")), Some(material));

    renderer.enable_depth_test(true).unwrap();
    renderer.start_render().unwrap();
    renderer.render(&scene).unwrap();
    renderer.draw_text_buffer(&glyphs, &atlas, Vec3::new(1.0, 1.0, 1.0)).unwrap();
    renderer.end_render().unwrap();
    renderer.present_frame().unwrap();

    let last_depth_test = applied_states(&log)
        .into_iter()
        .filter(|s| matches!(s, PipelineState::DepthTest(_)))
        .last();
    assert_eq!(last_depth_test, Some(PipelineState::DepthTest(true)));

    // Next frame's scene draw runs with the client's depth test still on
    let before = log.len();
    renderer.start_render().unwrap();
    renderer.render(&scene).unwrap();
    let frame_two: Vec<DriverCall> = log.snapshot().into_iter().skip(before).collect();
    assert!(!frame_two.contains(&DriverCall::ApplyState(PipelineState::DepthTest(false))));
    assert_eq!(
        renderer.pipeline_state(StateCategory::DepthTest),
        Some(PipelineState::DepthTest(true))
    );
    assert_eq!(
        renderer.pipeline_state(StateCategory::Blending),
        Some(PipelineState::Blending(false))
    );
}

#[test]
fn test_draw_text_buffer_outside_frame_rejected() {
    let (mut renderer, log) = headless_renderer();
    let atlas = texture(&mut renderer);
    let glyphs = renderer
        .resource_creator()
        .unwrap()
        .create_vertex_buffer(&BufferDescriptor::dynamic(120), VertexFormat::PositionTexcoord)
        .unwrap();

    let err = renderer.draw_text_buffer(&glyphs, &atlas, Vec3::zeros()).unwrap_err();
    assert!(matches!(err, RenderError::State { operation: "draw_text_buffer", .. }));
    assert!(log.draws().is_empty());
}

#[test]
fn test_frustum_planes_follow_projection() {
    let (mut renderer, _) = headless_renderer();
    renderer.perspective(90.0, 1.0, 0.5, 100.0).unwrap();

    let frustum = renderer.extract_view_frustum_planes().unwrap();
    assert_relative_eq!(frustum.plane(FrustumSide::Near).distance.abs(), 0.5, epsilon = 1e-4);
    assert_relative_eq!(frustum.plane(FrustumSide::Far).distance.abs(), 100.0, epsilon = 1e-4);
    assert_relative_eq!(renderer.near_frustum_distance(), 0.5);
    assert_relative_eq!(renderer.far_frustum_distance(), 100.0);
}

#[test]
fn test_camera_move_refreshes_frustum() {
    let (mut renderer, _) = headless_renderer();
    let before = renderer.extract_view_frustum_planes().unwrap();
    assert!(before.contains_point(Vec3::new(0.0, 0.0, -10.0)));

    // Turn around: the same point is now behind the camera
    renderer.camera_look_at(Vec3::zeros(), Vec3::new(0.0, 0.0, 1.0), Vec3::new(0.0, 1.0, 0.0));
    let after = renderer.extract_view_frustum_planes().unwrap();

    assert_ne!(before, after);
    assert!(!after.contains_point(Vec3::new(0.0, 0.0, -10.0)));
    assert!(after.contains_point(Vec3::new(0.0, 0.0, 10.0)));
}

#[test]
fn test_screen_to_world_point_with_pixel_orthographic() {
    let (mut renderer, _) = headless_renderer();
    renderer.orthographic_projection(0.0, 800.0, 0.0, 600.0, -1.0, 1.0).unwrap();

    let center = renderer.screen_to_world_point(Vec2::new(400.0, 300.0)).unwrap();
    assert_relative_eq!(center.x, 400.0, epsilon = 1e-3);
    assert_relative_eq!(center.y, 300.0, epsilon = 1e-3);

    // Pixel rows grow downwards, world Y grows upwards
    let top_left = renderer.screen_to_world_point(Vec2::new(0.0, 0.0)).unwrap();
    assert_relative_eq!(top_left.x, 0.0, epsilon = 1e-3);
    assert_relative_eq!(top_left.y, 600.0, epsilon = 1e-3);
}

#[test]
fn test_shutdown_then_reinitialize() {
    let (mut renderer, _) = headless_renderer();
    renderer.start_render().unwrap();
    renderer.shutdown();

    assert_eq!(renderer.frame_state(), FrameState::Uninitialized);
    assert!(renderer.start_render().is_err());

    renderer
        .initialize(BackendKind::Headless, &WindowTarget::windowed(640, 480), parameters().with_size(640, 480))
        .unwrap();
    assert_eq!((renderer.width(), renderer.height()), (640, 480));
    renderer.start_render().unwrap();
}

#[test]
fn test_released_resources_freed_at_present() {
    let (mut renderer, _) = headless_renderer();
    let live_before = renderer.resource_creator().unwrap().live_resources();

    let atlas = texture(&mut renderer);
    assert_eq!(renderer.resource_creator().unwrap().live_resources(), live_before + 1);
    drop(atlas);
    assert_eq!(
        renderer.resource_creator().unwrap().live_resources(),
        live_before + 1,
        "release waits for the frame boundary"
    );

    renderer.start_render().unwrap();
    renderer.end_render().unwrap();
    renderer.present_frame().unwrap();
    assert_eq!(renderer.resource_creator().unwrap().live_resources(), live_before);
}
