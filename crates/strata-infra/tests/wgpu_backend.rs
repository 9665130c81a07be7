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

//! Backend contract checks against a real adapter. Every test returns early when the
//! machine has no usable adapter.

use std::sync::Arc;
use std::time::Duration;
use strata_core::math::{Mat4, Ray, Vec3};
use strata_core::renderer::*;
use strata_frame::frame::{CameraView, MeshDescriptor, MeshSubset, SubsetMask, VisibleInstance};
use strata_frame::{FrameConfig, FrameDescription, FrameOrchestrator};
use strata_infra::telemetry::init_test_logging;
use strata_infra::{WgpuBackend, WgpuBackendOptions};

fn backend() -> Option<WgpuBackend> {
    init_test_logging();
    match WgpuBackend::new(WgpuBackendOptions {
        power_preference: wgpu::PowerPreference::LowPower,
        ..Default::default()
    }) {
        Ok(backend) => Some(backend),
        Err(e) => {
            println!("Skipping wgpu test: {e}");
            None
        }
    }
}

fn triangle() -> (Vec<u8>, Vec<u8>) {
    let positions = [0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    (
        bytemuck::cast_slice(&positions).to_vec(),
        bytemuck::cast_slice(&[0u16, 1, 2]).to_vec(),
    )
}

fn list(backend: &WgpuBackend, queue: QueueKind) -> (AllocatorId, Box<dyn CommandList>) {
    let allocator = backend.create_command_allocator(queue).expect("allocator");
    let list = backend
        .begin_command_list(queue, allocator, Some("Test List"))
        .expect("list");
    (allocator, list)
}

#[test]
fn test_tickets_complete_in_order() {
    let Some(backend) = backend() else { return };
    let (_, first) = list(&backend, QueueKind::Graphics);
    let (_, second) = list(&backend, QueueKind::Graphics);
    let first = first.finish().expect("finish");
    let second = second.finish().expect("finish");

    backend.submit(QueueKind::Graphics, &[first], Ticket(1)).expect("submit");
    backend.submit(QueueKind::Graphics, &[second], Ticket(2)).expect("submit");
    assert!(backend.wait_for_ticket(QueueKind::Graphics, Ticket(2), Duration::from_secs(5)));
    assert!(backend.completed_ticket(QueueKind::Graphics) >= Ticket(2));
    assert_eq!(backend.completed_ticket(QueueKind::Copy), Ticket::NONE);
}

#[test]
fn test_stale_ticket_is_rejected() {
    let Some(backend) = backend() else { return };
    backend.submit(QueueKind::Copy, &[], Ticket(3)).expect("submit");
    assert!(matches!(
        backend.submit(QueueKind::Copy, &[], Ticket(3)),
        Err(ResourceError::InvalidOperation(_))
    ));
}

#[test]
fn test_rejected_submission_consumes_nothing() {
    let Some(backend) = backend() else { return };
    let (_, good) = list(&backend, QueueKind::Graphics);
    let good = good.finish().expect("finish");
    let (_, copy) = list(&backend, QueueKind::Copy);
    let copy = copy.finish().expect("finish");

    assert_eq!(
        backend.submit(QueueKind::Graphics, &[good, CommandListId(u64::MAX)], Ticket(1)),
        Err(ResourceError::InvalidHandle)
    );
    assert!(matches!(
        backend.submit(QueueKind::Graphics, &[good, copy], Ticket(1)),
        Err(ResourceError::InvalidOperation(_))
    ));
    assert!(matches!(
        backend.submit(QueueKind::Graphics, &[good, good], Ticket(1)),
        Err(ResourceError::InvalidOperation(_))
    ));

    backend.submit(QueueKind::Graphics, &[good], Ticket(1)).expect("submit");
    backend.submit(QueueKind::Copy, &[copy], Ticket(1)).expect("submit");
    assert!(backend.wait_for_ticket(QueueKind::Graphics, Ticket(1), Duration::from_secs(5)));
}

#[test]
fn test_allocator_is_bound_to_its_queue() {
    let Some(backend) = backend() else { return };
    let allocator = backend.create_command_allocator(QueueKind::Copy).expect("allocator");
    assert!(backend
        .begin_command_list(QueueKind::Graphics, allocator, None)
        .is_err());
    backend.reset_command_allocator(allocator).expect("reset");
    backend.destroy_command_allocator(allocator).expect("destroy");
    assert_eq!(
        backend.reset_command_allocator(allocator),
        Err(ResourceError::InvalidHandle)
    );
}

#[test]
fn test_out_of_bounds_write_is_rejected() {
    let Some(backend) = backend() else { return };
    let buffer = backend
        .create_buffer(&BufferDescriptor {
            label: Some("Small".into()),
            size: 8,
            usage: BufferUsage::UPLOAD,
        })
        .expect("buffer");
    assert!(matches!(
        backend.write_buffer(buffer, 4, &[0; 8]),
        Err(ResourceError::OutOfBounds { capacity: 8, .. })
    ));
    backend.destroy_buffer(buffer).expect("destroy");
    assert!(backend.destroy_buffer(buffer).is_err());
}

#[test]
fn test_copied_geometry_builds_traceable_structures() {
    let Some(backend) = backend() else { return };
    let (vertices, indices) = triangle();

    let upload = |bytes: &[u8]| {
        let id = backend
            .create_buffer(&BufferDescriptor {
                label: Some("Upload".into()),
                size: bytes.len() as u64,
                usage: BufferUsage::UPLOAD | BufferUsage::COPY_SRC,
            })
            .expect("upload");
        backend.write_buffer(id, 0, bytes).expect("write");
        id
    };
    let geometry = |bytes: &[u8], usage: BufferUsage| {
        backend
            .create_buffer(&BufferDescriptor {
                label: Some("Geometry".into()),
                size: bytes.len() as u64,
                usage: usage | BufferUsage::COPY_DST | BufferUsage::ACCEL_INPUT,
            })
            .expect("geometry")
    };
    let (vertex_upload, index_upload) = (upload(&vertices), upload(&indices));
    let vertex_buffer = geometry(&vertices, BufferUsage::VERTEX);
    let index_buffer = geometry(&indices, BufferUsage::INDEX);

    let blas_geometry = [BlasGeometry {
        vertex_buffer,
        vertex_stride: 12,
        vertex_count: 3,
        index_buffer,
        index_format: IndexFormat::Uint16,
        indices: 0..3,
        opaque: true,
    }];
    let flags = AccelBuildFlags::PREFER_FAST_TRACE;
    let blas_sizes = backend.accel_struct_sizes(&AccelStructInputs::BottomLevel {
        geometry: &blas_geometry,
        flags,
    });
    let tlas_sizes = backend.accel_struct_sizes(&AccelStructInputs::TopLevel {
        instance_count: 1,
        flags,
    });
    let blas = backend
        .create_accel_struct(AccelStructKind::BottomLevel, blas_sizes.result_bytes)
        .expect("blas");
    let tlas = backend
        .create_accel_struct(AccelStructKind::TopLevel, tlas_sizes.result_bytes)
        .expect("tlas");
    let scratch = backend
        .create_buffer(&BufferDescriptor {
            label: Some("Scratch".into()),
            size: blas_sizes.scratch_bytes().max(tlas_sizes.scratch_bytes()),
            usage: BufferUsage::STORAGE | BufferUsage::ACCEL_SCRATCH,
        })
        .expect("scratch");

    let (_, mut commands) = list(&backend, QueueKind::Graphics);
    commands.copy_buffer_to_buffer(vertex_upload, 0, vertex_buffer, 0, vertices.len() as u64);
    commands.copy_buffer_to_buffer(index_upload, 0, index_buffer, 0, indices.len() as u64);
    commands.build_blas(&BlasBuild {
        dst: blas,
        geometry: &blas_geometry,
        flags,
        mode: AccelBuildMode::Build,
        scratch,
    });
    commands.build_tlas(&TlasBuild {
        dst: tlas,
        instances: &[TlasInstance {
            blas,
            transform: Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0)),
            instance_id: 42,
            mask: 0xFF,
        }],
        flags,
        mode: AccelBuildMode::Build,
        scratch,
    });
    let id = commands.finish().expect("finish");
    backend.submit(QueueKind::Graphics, &[id], Ticket(1)).expect("submit");

    let hit = backend
        .trace_ray(
            tlas,
            &Ray::new(Vec3::new(2.25, 0.25, 5.0), Vec3::new(0.0, 0.0, -1.0)),
            f32::MAX,
        )
        .expect("hit");
    assert_eq!(hit.instance_id, 42);
    assert!((hit.distance - 5.0).abs() < 1e-4);

    backend
        .write_descriptor(&DescriptorWrite {
            heap: DescriptorHeapKind::ShaderResource,
            index: DescriptorIndex(9),
            resource: ResourceHandle::AccelStruct(tlas),
            view: ViewKind::ShaderRead,
        })
        .expect("descriptor");
    assert!(backend
        .descriptor(DescriptorHeapKind::ShaderResource, DescriptorIndex(9))
        .is_some());
    backend.wait_idle();
}

#[test]
fn test_descriptor_view_must_match_usage() {
    let Some(backend) = backend() else { return };
    let texture = backend
        .create_texture(&TextureDescriptor {
            label: Some("Sampled".into()),
            width: 4,
            height: 4,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::SHADER_READ,
        })
        .expect("texture");
    let write = |heap, view| DescriptorWrite {
        heap,
        index: DescriptorIndex(0),
        resource: ResourceHandle::Texture(texture),
        view,
    };
    assert!(backend
        .write_descriptor(&write(DescriptorHeapKind::ShaderResource, ViewKind::ShaderRead))
        .is_ok());
    assert!(matches!(
        backend.write_descriptor(&write(DescriptorHeapKind::RenderTarget, ViewKind::RenderTarget)),
        Err(ResourceError::InvalidOperation(_))
    ));
    assert!(matches!(
        backend.write_descriptor(&write(DescriptorHeapKind::RenderTarget, ViewKind::ShaderRead)),
        Err(ResourceError::InvalidOperation(_))
    ));
    backend.clear_descriptor(DescriptorHeapKind::ShaderResource, DescriptorIndex(0));
    assert!(backend
        .descriptor(DescriptorHeapKind::ShaderResource, DescriptorIndex(0))
        .is_none());
}

#[test]
fn test_timestamps_read_back_when_supported() {
    let Some(backend) = backend() else { return };
    let capabilities = backend.capabilities();
    if !capabilities.timestamp_queries {
        println!("Skipping timestamp test: not supported by the adapter.");
        assert_eq!(backend.read_timestamps(0, 2), None);
        return;
    }

    let (_, mut commands) = list(&backend, QueueKind::Graphics);
    commands.write_timestamp(4);
    commands.write_timestamp(5);
    commands.resolve_timestamps(4, 2);
    let id = commands.finish().expect("finish");
    backend.submit(QueueKind::Graphics, &[id], Ticket(1)).expect("submit");
    assert!(backend.wait_for_ticket(QueueKind::Graphics, Ticket(1), Duration::from_secs(5)));

    let values = backend.read_timestamps(4, 2).expect("timestamps");
    assert_eq!(values.len(), 2);
    assert!(values[1] >= values[0]);
    assert_eq!(backend.read_timestamps(capabilities.timestamp_capacity, 1), None);
}

#[test]
fn test_frames_render_on_a_real_device() {
    let Some(backend) = backend() else { return };
    let shared: Arc<dyn GraphicsBackend> = Arc::new(backend.clone());
    let mut frames = FrameOrchestrator::new(
        shared,
        FrameConfig {
            width: 64,
            height: 64,
            ..FrameConfig::default()
        },
    )
    .expect("orchestrator");

    let (vertices, indices) = triangle();
    let mesh = frames
        .register_mesh(&MeshDescriptor {
            label: "Triangle",
            vertices: &vertices,
            vertex_stride: 12,
            indices: &indices,
            index_format: IndexFormat::Uint16,
            subsets: &[MeshSubset {
                indices: 0..3,
                opaque: true,
            }],
            deformable: false,
        })
        .expect("mesh");

    let eye = Vec3::new(0.0, 0.0, 5.0);
    let description = FrameDescription {
        instances: vec![VisibleInstance {
            id: 7,
            mesh,
            subsets: SubsetMask::ALL,
            transform: Mat4::IDENTITY,
            material_index: 0,
            translucent: false,
        }],
        camera: CameraView {
            view: Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y).expect("view"),
            projection: Mat4::perspective_rh_zo(60f32.to_radians(), 1.0, 0.1, 100.0),
            position: eye,
            jitter: [0.0; 2],
        },
        ..Default::default()
    };

    let mut last = None;
    for _ in 0..5 {
        last = Some(frames.render_frame(&description).expect("frame"));
    }
    let output = last.expect("output");
    assert_eq!(output.frame_index, 4);
    assert!(backend.wait_for_ticket(QueueKind::Graphics, output.ticket, Duration::from_secs(5)));

    let hit = frames
        .pick(&Ray::new(Vec3::new(0.25, 0.25, 5.0), Vec3::new(0.0, 0.0, -1.0)))
        .expect("pick");
    assert_eq!(hit.instance_id, 7);
    frames.shutdown();
}
