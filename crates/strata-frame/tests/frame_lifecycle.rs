// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! End-to-end frame lifecycle against the mock backend.

use approx::assert_relative_eq;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use strata_core::math::{Mat4, Ray, Vec3};
use strata_core::renderer::{
    DescriptorHeapKind, DescriptorIndex, GraphicsBackend, IndexFormat, QueueKind,
};
use strata_core::testing::{CompletionMode, MockBackend, MockConfig, RecordedCommand};
use strata_frame::accel::TlasAction;
use strata_frame::config::HeapBudget;
use strata_frame::frame::{
    CameraView, DebugView, EditorOverlay, MeshDescriptor, MeshHandle, MeshSubset, SubsetMask,
    VisibleInstance,
};
use strata_frame::{FrameConfig, FrameDescription, FrameError, FrameOrchestrator};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Unit right triangle in the XY plane, offset along X.
fn triangle_vertices(offset_x: f32) -> Vec<u8> {
    let positions = [
        offset_x, 0.0, 0.0, //
        offset_x + 1.0, 0.0, 0.0, //
        offset_x, 1.0, 0.0,
    ];
    bytemuck::cast_slice(&positions).to_vec()
}

fn triangle_indices() -> Vec<u8> {
    bytemuck::cast_slice(&[0u32, 1, 2]).to_vec()
}

const SUBSETS: [MeshSubset; 1] = [MeshSubset {
    indices: 0..3,
    opaque: true,
}];

fn register_triangle(frames: &mut FrameOrchestrator, deformable: bool) -> MeshHandle {
    let vertices = triangle_vertices(0.0);
    let indices = triangle_indices();
    frames
        .register_mesh(&MeshDescriptor {
            label: "Triangle",
            vertices: &vertices,
            vertex_stride: 12,
            indices: &indices,
            index_format: IndexFormat::Uint32,
            subsets: &SUBSETS,
            deformable,
        })
        .expect("register triangle")
}

/// Looks down -Z from z = 5.
fn camera() -> CameraView {
    let position = Vec3::new(0.0, 0.0, 5.0);
    CameraView {
        view: Mat4::look_at_rh(position, Vec3::ZERO, Vec3::Y).expect("view"),
        projection: Mat4::perspective_rh_zo(60f32.to_radians(), 16.0 / 9.0, 0.1, 100.0),
        position,
        jitter: [0.0; 2],
    }
}

fn instance(id: u32, mesh: MeshHandle, at: Vec3) -> VisibleInstance {
    VisibleInstance {
        id,
        mesh,
        subsets: SubsetMask::ALL,
        transform: Mat4::from_translation(at),
        material_index: 0,
        translucent: false,
    }
}

fn scene(instances: Vec<VisibleInstance>) -> FrameDescription {
    FrameDescription {
        instances,
        camera: camera(),
        ..Default::default()
    }
}

fn small_config() -> FrameConfig {
    FrameConfig {
        width: 64,
        height: 64,
        ..FrameConfig::default()
    }
}

fn orchestrator(mock: &MockBackend, config: FrameConfig) -> FrameOrchestrator {
    let backend: Arc<dyn GraphicsBackend> = Arc::new(mock.clone());
    FrameOrchestrator::new(backend, config).expect("orchestrator")
}

fn ray_down(x: f32, y: f32) -> Ray {
    Ray::new(Vec3::new(x, y, 5.0), Vec3::new(0.0, 0.0, -1.0))
}

#[test]
fn test_frame_waits_for_oldest_slot() {
    init_logging();
    let mock = MockBackend::with_config(MockConfig {
        completion: CompletionMode::Manual,
        ray_tracing: false,
        timestamps: false,
    });
    let mut frames = orchestrator(
        &mock,
        FrameConfig {
            max_frame_latency: 2,
            ..small_config()
        },
    );

    let empty = FrameDescription::default();
    let mut tickets = Vec::new();
    for _ in 0..3 {
        let output = frames.render_frame(&empty).expect("frame");
        assert!(!output.stats.waited_for_slot);
        tickets.push(output.ticket);
    }

    let completer = mock.clone();
    let first = tickets[0];
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        completer.complete_up_to(QueueKind::Graphics, first);
    });

    let started = Instant::now();
    let output = frames.render_frame(&empty).expect("fourth frame");
    assert!(started.elapsed() >= Duration::from_millis(80));
    assert!(output.stats.waited_for_slot);
    handle.join().expect("completer thread");

    mock.complete_all();
    frames.shutdown();
}

#[test]
fn test_tlas_rebuild_skip_refit_sequence() {
    init_logging();
    let mock = MockBackend::new();
    let mut frames = orchestrator(&mock, small_config());
    let mesh = register_triangle(&mut frames, false);

    let first = frames
        .render_frame(&scene(vec![instance(1, mesh, Vec3::ZERO)]))
        .expect("frame 0");
    assert_eq!(first.stats.tlas, Some(TlasAction::Rebuilt));
    assert_eq!(first.stats.blas_builds, 1);

    let second = frames
        .render_frame(&scene(vec![instance(1, mesh, Vec3::ZERO)]))
        .expect("frame 1");
    assert_eq!(second.stats.tlas, Some(TlasAction::Skipped));
    assert_eq!(second.stats.blas_builds, 0);

    let third = frames
        .render_frame(&scene(vec![instance(1, mesh, Vec3::new(0.5, 0.0, 0.0))]))
        .expect("frame 2");
    assert_eq!(third.stats.tlas, Some(TlasAction::Refitted));

    let counters = mock.counters();
    assert_eq!(counters.tlas_builds, 1);
    assert_eq!(counters.tlas_updates, 1);
    assert_eq!(counters.blas_builds, 1);

    let stats = frames.accel_stats();
    assert_eq!(stats.tlas_rebuilds, 1);
    assert_eq!(stats.tlas_skips, 1);
    assert_eq!(stats.tlas_refits, 1);
}

#[test]
fn test_adding_an_instance_rebuilds_tlas() {
    let mock = MockBackend::new();
    let mut frames = orchestrator(&mock, small_config());
    let mesh = register_triangle(&mut frames, false);

    frames
        .render_frame(&scene(vec![instance(1, mesh, Vec3::ZERO)]))
        .expect("frame 0");
    let output = frames
        .render_frame(&scene(vec![
            instance(1, mesh, Vec3::ZERO),
            instance(2, mesh, Vec3::new(-2.0, 0.0, 0.0)),
        ]))
        .expect("frame 1");
    // Both instances share one bottom-level structure.
    assert_eq!(output.stats.blas_builds, 0);
    assert_eq!(output.stats.tlas, Some(TlasAction::Rebuilt));
}

#[test]
fn test_picking_reports_instance_id() {
    let mock = MockBackend::new();
    let mut frames = orchestrator(&mock, small_config());
    let mesh = register_triangle(&mut frames, false);
    assert_eq!(frames.pick(&ray_down(0.2, 0.2)), None);

    frames
        .render_frame(&scene(vec![
            instance(10, mesh, Vec3::ZERO),
            instance(20, mesh, Vec3::new(-3.0, 0.0, 0.0)),
        ]))
        .expect("frame");

    let hit = frames.pick(&ray_down(0.2, 0.2)).expect("hit first");
    assert_eq!(hit.instance_id, 10);
    assert_relative_eq!(hit.distance, 5.0, epsilon = 1e-4);
    assert_eq!(frames.pick(&ray_down(-2.8, 0.2)).map(|h| h.instance_id), Some(20));
    assert_eq!(frames.pick(&ray_down(5.0, 5.0)), None);
}

#[test]
fn test_deformed_mesh_is_refit_in_place() {
    init_logging();
    let mock = MockBackend::new();
    let mut frames = orchestrator(&mock, small_config());
    let mesh = register_triangle(&mut frames, true);
    let description = scene(vec![instance(7, mesh, Vec3::ZERO)]);

    frames.render_frame(&description).expect("frame 0");
    assert_eq!(frames.pick(&ray_down(0.2, 0.2)).map(|h| h.instance_id), Some(7));

    frames
        .update_mesh_vertices(mesh, &triangle_vertices(2.0))
        .expect("update");
    let output = frames.render_frame(&description).expect("frame 1");
    assert_eq!(output.stats.blas_builds, 0);
    assert_eq!(output.stats.blas_refits, 1);
    assert_eq!(output.stats.tlas, Some(TlasAction::Refitted));
    assert_eq!(mock.counters().blas_updates, 1);

    assert_eq!(frames.pick(&ray_down(0.2, 0.2)), None);
    assert_eq!(frames.pick(&ray_down(2.2, 0.2)).map(|h| h.instance_id), Some(7));

    // Nothing pending: no copy, no refit.
    let output = frames.render_frame(&description).expect("frame 2");
    assert_eq!(output.stats.blas_refits, 0);
    assert_eq!(output.stats.tlas, Some(TlasAction::Skipped));
}

#[test]
fn test_static_mesh_rejects_vertex_updates() {
    let mock = MockBackend::new();
    let mut frames = orchestrator(&mock, small_config());
    let mesh = register_triangle(&mut frames, false);
    assert!(matches!(
        frames.update_mesh_vertices(mesh, &triangle_vertices(1.0)),
        Err(FrameError::InvalidMesh(_))
    ));

    let deformable = register_triangle(&mut frames, true);
    assert!(matches!(
        frames.update_mesh_vertices(deformable, &[0u8; 12]),
        Err(FrameError::InvalidMesh(_))
    ));
}

#[test]
fn test_translucent_draws_are_sorted_back_to_front() {
    let mock = MockBackend::new();
    let mut frames = orchestrator(&mock, small_config());
    let mesh = register_triangle(&mut frames, false);

    let translucent = |id, z| VisibleInstance {
        translucent: true,
        ..instance(id, mesh, Vec3::new(0.0, 0.0, z))
    };
    frames
        .render_frame(&scene(vec![
            translucent(1, -1.0),
            translucent(2, -5.0),
            translucent(3, 2.0),
            instance(4, mesh, Vec3::ZERO),
        ]))
        .expect("frame");

    let submission = mock.last_submission(QueueKind::Graphics).expect("submission");
    let order: Vec<u32> = submission
        .draws_in_pass("Translucent")
        .iter()
        .map(|draw| draw.first_instance)
        .collect();
    assert_eq!(order, vec![1, 0, 2]);

    let opaque: Vec<u32> = submission
        .draws_in_pass("Opaque Lighting")
        .iter()
        .map(|draw| draw.first_instance)
        .collect();
    assert_eq!(opaque, vec![3]);
}

#[test]
fn test_culled_instances_are_not_drawn() {
    let mock = MockBackend::new();
    let mut frames = orchestrator(&mock, small_config());
    let mesh = register_triangle(&mut frames, false);

    let output = frames
        .render_frame(&scene(vec![
            instance(1, mesh, Vec3::ZERO),
            instance(2, mesh, Vec3::new(1000.0, 0.0, 0.0)),
            instance(3, mesh, Vec3::new(0.0, 0.0, 50.0)),
        ]))
        .expect("frame");
    assert_eq!(output.stats.instances, 3);
    assert_eq!(output.stats.culled, 2);

    let submission = mock.last_submission(QueueKind::Graphics).expect("submission");
    assert_eq!(submission.draws_in_pass("Depth Prepass").len(), 1);
    assert_eq!(submission.draws_in_pass("Opaque Lighting").len(), 1);
    // Culled instances stay pickable.
    assert_eq!(
        frames.pick(&ray_down(1000.2, 0.2)).map(|h| h.instance_id),
        Some(2)
    );
}

#[test]
fn test_pass_sequence_follows_features() {
    let mock = MockBackend::new();
    let mut frames = orchestrator(&mock, small_config());
    let mesh = register_triangle(&mut frames, false);

    frames
        .render_frame(&scene(vec![instance(1, mesh, Vec3::ZERO)]))
        .expect("frame");
    let submission = mock.last_submission(QueueKind::Graphics).expect("submission");
    assert_eq!(
        submission.render_pass_labels(),
        vec!["Depth Prepass", "Opaque Lighting", "Translucent", "Post Process"]
    );

    let mut overlay = scene(vec![instance(1, mesh, Vec3::ZERO)]);
    overlay.overlay = EditorOverlay {
        selected: vec![1],
        debug_view: DebugView::Normals,
    };
    frames.render_frame(&overlay).expect("frame");
    let submission = mock.last_submission(QueueKind::Graphics).expect("submission");
    assert_eq!(submission.render_pass_labels().last(), Some(&"Editor Overlay"));
    assert_eq!(submission.draws_in_pass("Editor Overlay").len(), 1);
}

#[test]
fn test_history_textures_alternate() {
    let mock = MockBackend::new();
    let mut frames = orchestrator(&mock, small_config());
    let empty = FrameDescription::default();

    let depths: Vec<_> = (0..3)
        .map(|_| frames.render_frame(&empty).expect("frame").depth)
        .collect();
    assert_ne!(depths[0], depths[1]);
    assert_eq!(depths[0], depths[2]);
}

#[test]
fn test_upload_buffers_are_reused_between_registrations() {
    let mock = MockBackend::new();
    let mut frames = orchestrator(&mock, small_config());
    register_triangle(&mut frames, false);
    // The sweep at frame start returns the completed upload to the pool.
    frames.render_frame(&FrameDescription::default()).expect("frame");

    let before = mock.counters().buffers_created;
    register_triangle(&mut frames, false);
    assert_eq!(mock.counters().buffers_created - before, 2);
    assert_eq!(frames.mesh_count(), 2);
}

#[test]
fn test_unknown_mesh_records_nothing() {
    let mock = MockBackend::new();
    let mut frames = orchestrator(&mock, small_config());
    let submits = mock.counters().submits;
    let result = frames.render_frame(&scene(vec![instance(1, MeshHandle(99), Vec3::ZERO)]));
    assert!(matches!(result, Err(FrameError::UnknownMesh(99))));
    assert_eq!(mock.counters().submits, submits);
    assert_eq!(frames.frame_index(), 0);
}

#[test]
fn test_unregistered_mesh_is_released_after_its_last_frame() {
    let mock = MockBackend::new();
    let mut frames = orchestrator(&mock, small_config());
    let baseline_buffers = mock.live_buffers();
    let mesh = register_triangle(&mut frames, false);
    frames
        .render_frame(&scene(vec![instance(1, mesh, Vec3::ZERO)]))
        .expect("frame");
    let accel_with_mesh = mock.live_accel_structs();

    frames.unregister_mesh(mesh).expect("unregister");
    assert!(!frames.contains_mesh(mesh));
    assert_eq!(frames.pick(&ray_down(0.2, 0.2)), None);
    assert!(matches!(
        frames.unregister_mesh(mesh),
        Err(FrameError::UnknownMesh(_))
    ));

    let output = frames.render_frame(&FrameDescription::default()).expect("frame");
    assert_eq!(output.stats.tlas, None);
    assert!(output.stats.swept.released > 0);
    assert_eq!(mock.live_accel_structs(), accel_with_mesh - 1);
    // The pooled upload buffer and scratch remain.
    assert!(mock.live_buffers() <= baseline_buffers + 2);
}

#[test]
fn test_descriptor_exhaustion_fails_the_frame() {
    init_logging();
    let mock = MockBackend::new();
    let mut config = small_config();
    config.descriptors.shader_resource = HeapBudget::new(14, 11);
    let mut frames = orchestrator(&mock, config);
    let mesh = register_triangle(&mut frames, false);

    let result = frames.render_frame(&scene(vec![instance(1, mesh, Vec3::ZERO)]));
    assert!(matches!(
        result,
        Err(FrameError::DescriptorExhausted {
            heap: DescriptorHeapKind::ShaderResource,
            capacity: 14
        })
    ));
    // Reserved bindings are untouched by the dynamic region running dry.
    assert!(mock
        .descriptor(DescriptorHeapKind::ShaderResource, DescriptorIndex(8))
        .is_some());
    assert!(frames
        .descriptor_heaps()
        .get(DescriptorHeapKind::ShaderResource)
        .is_occupied(1));
}

#[test]
fn test_failed_submit_drops_the_frame_and_recovers() {
    let mock = MockBackend::new();
    let mut frames = orchestrator(&mock, small_config());
    let mesh = register_triangle(&mut frames, false);
    let description = scene(vec![instance(1, mesh, Vec3::ZERO)]);

    mock.fail_next_submit();
    assert!(matches!(
        frames.render_frame(&description),
        Err(FrameError::Resource(_))
    ));
    assert_eq!(frames.frame_index(), 0);

    let output = frames.render_frame(&description).expect("retry");
    assert_eq!(output.frame_index, 0);
    assert_eq!(output.stats.blas_builds, 1);
    assert_eq!(output.stats.tlas, Some(TlasAction::Rebuilt));
    assert_eq!(frames.pick(&ray_down(0.2, 0.2)).map(|h| h.instance_id), Some(1));
}

#[test]
fn test_gpu_timings_arrive_after_completion() {
    let mock = MockBackend::new();
    let mut frames = orchestrator(&mock, small_config());
    let empty = FrameDescription::default();

    let first = frames.render_frame(&empty).expect("frame 0");
    assert_eq!(first.timings.frame_ms, 0.0);
    let second = frames.render_frame(&empty).expect("frame 1");
    assert!(second.timings.frame_ms > 0.0);
    assert!(second.timings.main_pass_ms > 0.0);
    assert!(second.timings.main_pass_ms < second.timings.frame_ms);
}

#[test]
fn test_ray_tracing_disabled_without_support() {
    let mock = MockBackend::with_config(MockConfig {
        ray_tracing: false,
        ..MockConfig::default()
    });
    let mut frames = orchestrator(&mock, small_config());
    assert!(!frames.ray_tracing_enabled());
    let mesh = register_triangle(&mut frames, false);

    let output = frames
        .render_frame(&scene(vec![instance(1, mesh, Vec3::ZERO)]))
        .expect("frame");
    assert_eq!(output.stats.tlas, None);
    assert_eq!(mock.counters().accel_structs_created, 0);
    assert_eq!(frames.pick(&ray_down(0.2, 0.2)), None);
}

#[test]
fn test_resize_recreates_targets() {
    let mock = MockBackend::new();
    let mut frames = orchestrator(&mock, small_config());
    let empty = FrameDescription::default();
    let before = frames.render_frame(&empty).expect("frame");
    let textures = mock.live_textures();

    frames.resize(128, 32).expect("resize");
    assert_eq!(frames.config().width, 128);
    assert_eq!(mock.live_textures(), textures);
    let after = frames.render_frame(&empty).expect("frame");
    assert_ne!(before.color, after.color);

    assert!(matches!(frames.resize(0, 32), Err(FrameError::Config(_))));
}

#[test]
fn test_failed_resize_frees_reserved_history_slots() {
    init_logging();
    let mock = MockBackend::new();
    let mut frames = orchestrator(&mock, small_config());
    let empty = FrameDescription::default();
    frames.render_frame(&empty).expect("frame");
    let textures = mock.live_textures();

    // Depth pair and the first lighting texture succeed, the second one fails.
    mock.fail_texture_creation_after(3);
    assert!(matches!(frames.resize(128, 32), Err(FrameError::Resource(_))));
    assert_eq!(mock.live_textures(), 0);
    let sr = frames.descriptor_heaps().get(DescriptorHeapKind::ShaderResource);
    assert!((1..=6).all(|slot| !sr.is_occupied(slot)));

    // The next frame claims the same fixed slots without a collision.
    frames.render_frame(&empty).expect("frame after failed resize");
    assert_eq!(mock.live_textures(), textures);
    let sr = frames.descriptor_heaps().get(DescriptorHeapKind::ShaderResource);
    assert!((1..=6).all(|slot| sr.is_occupied(slot)));
}

#[test]
fn test_temporal_upscaling_dispatches_at_output_resolution() {
    let mock = MockBackend::new();
    let mut frames = orchestrator(
        &mock,
        FrameConfig {
            temporal_upscaling: true,
            render_scale: 0.5,
            ..small_config()
        },
    );
    frames.render_frame(&FrameDescription::default()).expect("frame");
    let submission = mock.last_submission(QueueKind::Graphics).expect("submission");
    let dispatches: Vec<[u32; 3]> = submission
        .commands
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::Dispatch(groups) => Some(*groups),
            _ => None,
        })
        .collect();
    // GI at 32x32, upscale at 64x64, in groups of 8.
    assert_eq!(dispatches, vec![[4, 4, 1], [8, 8, 1]]);
}

#[test]
fn test_shutdown_releases_everything() {
    init_logging();
    let mock = MockBackend::new();
    let mut frames = orchestrator(&mock, small_config());
    let mesh = register_triangle(&mut frames, true);
    frames
        .render_frame(&scene(vec![instance(1, mesh, Vec3::ZERO)]))
        .expect("frame");
    frames
        .update_mesh_vertices(mesh, &triangle_vertices(1.0))
        .expect("update");

    frames.shutdown();
    assert!(frames.is_shut_down());
    assert_eq!(mock.live_buffers(), 0);
    assert_eq!(mock.live_textures(), 0);
    assert_eq!(mock.live_accel_structs(), 0);
    assert_eq!(mock.live_allocators(), 0);

    assert!(matches!(
        frames.render_frame(&FrameDescription::default()),
        Err(FrameError::ShutDown)
    ));
    assert!(matches!(
        frames.unregister_mesh(mesh),
        Err(FrameError::ShutDown)
    ));
    frames.shutdown();
}
