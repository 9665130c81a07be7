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

//! The per-frame driver.
//!
//! [`FrameOrchestrator`] owns every subsystem of the crate and runs them in a fixed
//! order once per frame:
//!
//! 1. Throttle on the frame slot's previous ticket, read back timestamps, sweep.
//! 2. Cull instances against the view frustum.
//! 3. Write instance and light records into the upload ring.
//! 4. Copy pending vertex updates, build new bottom-level structures, refit deformed
//!    ones and rebuild, refit or skip the top-level structure.
//! 5. Record the pass sequence.
//! 6. Submit, retire what the frame replaced against its ticket, swap history.

use super::cull::cull_instances;
use super::description::{DebugView, FrameDescription, FrameOutput, FrameStats, GpuTimings, VisibleInstance};
use super::history::TemporalHistory;
use super::mesh::{position_bounds, MeshDescriptor, MeshHandle, MeshRecord, MeshRegistry};
use super::passes::{pass_sequence, sort_back_to_front, DrawItem, PassKind};
use super::profiler::GpuScopeProfiler;
use super::records::{
    debug_view_code, FrameParams, InstanceParams, LightRecord, INSTANCE_SELECTED,
    INSTANCE_TRANSLUCENT,
};
use crate::accel::{AccelStats, AccelStructCache, Blas, BlasKey, TlasAction};
use crate::config::FrameConfig;
use crate::descriptor::{reserved, DescriptorHeaps, SlotRequest};
use crate::error::FrameError;
use crate::resource::{BarrierBatch, GpuResource, Retired, StagingPool, UploadRing};
use crate::sync::{CommandAllocatorPool, QueueSet};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use strata_core::math::{Mat4, Ray};
use strata_core::renderer::{
    BackendCapabilities, BufferDescriptor, BufferUsage, ColorAttachment, CommandList,
    DepthAttachment, DrawIndexed, GraphicsBackend, LoadOp, PassDescriptor, QueueKind,
    RayTracingTier, ResourceKind, ResourceState, TextureDescriptor, TextureFormat, TextureId,
    TextureUsage, Ticket, TlasInstance, ViewKind,
};

/// Compute work-group edge used by the GI and upscale dispatches.
const GROUP_SIZE: u32 = 8;

/// The closest instance under a picking ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PickHit {
    /// Id of the hit instance, as given in the frame description.
    pub instance_id: u32,
    /// Distance along the ray.
    pub distance: f32,
    /// Triangle index within the hit subset.
    pub primitive_index: u32,
    /// Barycentric coordinates of the hit.
    pub barycentrics: [f32; 2],
}

/// Render targets that depend on the output resolution.
#[derive(Debug)]
struct FrameTargets {
    history: TemporalHistory,
    /// Post-processed color at render resolution; only present when upscaling.
    post: Option<GpuResource>,
    output: GpuResource,
}

impl FrameTargets {
    fn new(
        backend: &dyn GraphicsBackend,
        heaps: &DescriptorHeaps,
        config: &FrameConfig,
    ) -> Result<Self, FrameError> {
        let (width, height) = config.render_extent();
        let history = TemporalHistory::new(backend, heaps, width, height)?;
        let color = |label: &'static str, width: u32, height: u32, write_view: ViewKind| {
            GpuResource::create_texture_with_views(
                backend,
                heaps,
                &TextureDescriptor {
                    label: Some(Cow::Borrowed(label)),
                    width,
                    height,
                    format: TextureFormat::Rgba8Unorm,
                    usage: TextureUsage::RENDER_TARGET
                        | TextureUsage::UNORDERED_ACCESS
                        | TextureUsage::SHADER_READ
                        | TextureUsage::COPY_SRC,
                },
                ResourceState::COMMON,
                &[(ViewKind::ShaderRead, SlotRequest::Auto), (write_view, SlotRequest::Auto)],
            )
        };
        let targets = if config.temporal_upscaling {
            color("Post Color", width, height, ViewKind::RenderTarget).and_then(|post| {
                match color("Output Color", config.width, config.height, ViewKind::UnorderedAccess) {
                    Ok(output) => Ok((Some(post), output)),
                    Err(e) => {
                        post.destroy(backend, heaps);
                        Err(e)
                    }
                }
            })
        } else {
            color("Output Color", width, height, ViewKind::RenderTarget).map(|output| (None, output))
        };
        let (post, output) = match targets {
            Ok(targets) => targets,
            Err(e) => {
                history.destroy(backend, heaps);
                return Err(e);
            }
        };
        Ok(Self {
            history,
            post,
            output,
        })
    }

    fn release(self, staging: &mut StagingPool, ticket: Ticket) {
        self.history.release(staging, QueueKind::Graphics, ticket);
        if let Some(post) = self.post {
            post.release(staging, QueueKind::Graphics, ticket);
        }
        self.output.release(staging, QueueKind::Graphics, ticket);
    }
}

/// Where this frame's records landed in the upload ring.
#[derive(Debug, Clone, Copy)]
struct RingOffsets {
    instances: u32,
    lights: u32,
    light_count: u32,
}

/// What a successfully recorded frame hands to the submission step.
struct RecordedFrame {
    color: TextureId,
    depth: TextureId,
    tlas: Option<TlasAction>,
}

/// Owns the GPU-side lifetime of everything a frame touches.
///
/// Not thread-safe by itself: frames are recorded on one thread. Exactly
/// `max_frame_latency` frames may be in flight; the next one blocks on the oldest.
#[derive(Debug)]
pub struct FrameOrchestrator {
    backend: Arc<dyn GraphicsBackend>,
    config: FrameConfig,
    capabilities: BackendCapabilities,
    ray_tracing: bool,

    queues: QueueSet,
    graphics_allocators: CommandAllocatorPool,
    copy_allocators: CommandAllocatorPool,
    heaps: DescriptorHeaps,
    staging: StagingPool,
    ring: UploadRing,
    /// One constant buffer per frame slot, bound at a reserved slot.
    frame_params: Vec<GpuResource>,
    /// Ticket of the last frame recorded into each slot.
    slot_tickets: Vec<Ticket>,

    meshes: MeshRegistry,
    accel: AccelStructCache,
    targets: Option<FrameTargets>,
    profiler: GpuScopeProfiler,

    prev_transforms: HashMap<u32, Mat4>,
    prev_view_proj: Option<Mat4>,
    /// Instance ids of the last traced frame, indexed by top-level instance id.
    pick_ids: Vec<u32>,
    tlas_live: bool,
    frame_index: u64,
    shut_down: bool,
}

impl FrameOrchestrator {
    /// Creates every subsystem on `backend`.
    ///
    /// # Errors
    ///
    /// `FrameError::Config` for an invalid configuration, or the first backend failure
    /// while allocating targets and per-slot buffers.
    pub fn new(backend: Arc<dyn GraphicsBackend>, config: FrameConfig) -> Result<Self, FrameError> {
        config.validate()?;
        let info = backend.adapter_info();
        let capabilities = backend.capabilities();
        log::info!(
            "Frame orchestrator on '{}' ({:?}, {:?}), {} frame slot(s)",
            info.name,
            info.backend_type,
            info.device_type,
            config.frame_slots()
        );

        let ray_tracing = config.ray_tracing && capabilities.ray_tracing != RayTracingTier::None;
        if config.ray_tracing && !ray_tracing {
            log::warn!("Ray tracing requested but not supported; the GI pass is disabled");
        }

        let slots = config.frame_slots();
        let queues = QueueSet::new(&backend, config.wait_timeout());
        let heaps = DescriptorHeaps::new(&backend, &config.descriptors);
        let ring = UploadRing::new(
            backend.as_ref(),
            slots,
            config.upload_bytes_per_frame,
            config.max_upload_bytes_per_frame,
            "Frame Upload Ring",
        )?;

        let mut frame_params = Vec::with_capacity(slots);
        for slot in 0..slots {
            let mut buffer = GpuResource::create_buffer(
                backend.as_ref(),
                &BufferDescriptor {
                    label: Some(Cow::Owned(format!("Frame Params {slot}"))),
                    size: FrameParams::SIZE,
                    usage: BufferUsage::UPLOAD | BufferUsage::CONSTANT,
                },
                ResourceKind::Constant,
                ResourceState::COMMON,
            )?;
            buffer.attach_descriptor(
                &heaps,
                ViewKind::ShaderRead,
                SlotRequest::Fixed(reserved::frame_params(slot)),
            )?;
            frame_params.push(buffer);
        }

        let targets = FrameTargets::new(backend.as_ref(), &heaps, &config)?;
        let profiler = GpuScopeProfiler::new(&capabilities, slots, config.timestamps);

        Ok(Self {
            graphics_allocators: CommandAllocatorPool::new(backend.clone(), QueueKind::Graphics),
            copy_allocators: CommandAllocatorPool::new(backend.clone(), QueueKind::Copy),
            staging: StagingPool::new(backend.clone()),
            accel: AccelStructCache::new(backend.clone()),
            backend,
            capabilities,
            ray_tracing,
            queues,
            heaps,
            ring,
            frame_params,
            slot_tickets: vec![Ticket::NONE; slots],
            meshes: MeshRegistry::default(),
            targets: Some(targets),
            profiler,
            prev_transforms: HashMap::new(),
            prev_view_proj: None,
            pick_ids: Vec::new(),
            tlas_live: false,
            frame_index: 0,
            shut_down: false,
            config,
        })
    }

    /// Uploads a mesh through the copy queue and registers it.
    ///
    /// The graphics queue is made to wait on the upload on the GPU, so the mesh may be
    /// drawn by the very next frame without blocking the CPU.
    pub fn register_mesh(&mut self, mesh: &MeshDescriptor<'_>) -> Result<MeshHandle, FrameError> {
        self.ensure_running()?;
        mesh.validate()?;

        let backend = self.backend.as_ref();
        let vertex_bytes = mesh.vertices.len() as u64;
        let index_bytes = mesh.indices.len() as u64;
        let mut vertices = GpuResource::create_buffer(
            backend,
            &BufferDescriptor {
                label: Some(Cow::Owned(format!("{} Vertices", mesh.label))),
                size: vertex_bytes,
                usage: BufferUsage::VERTEX | BufferUsage::COPY_DST | BufferUsage::ACCEL_INPUT,
            },
            ResourceKind::Vertex,
            ResourceState::COMMON,
        )?;
        let mut indices = GpuResource::create_buffer(
            backend,
            &BufferDescriptor {
                label: Some(Cow::Owned(format!("{} Indices", mesh.label))),
                size: index_bytes,
                usage: BufferUsage::INDEX | BufferUsage::COPY_DST | BufferUsage::ACCEL_INPUT,
            },
            ResourceKind::Index,
            ResourceState::COMMON,
        )?;

        let copy = self.queues.get(QueueKind::Copy);
        let uploaded = stage_upload(&mut self.staging, backend, vertex_bytes + index_bytes, mesh.label)
            .and_then(|upload| {
                let fill = backend
                    .write_buffer(upload.buffer_id(), 0, mesh.vertices)
                    .and_then(|()| backend.write_buffer(upload.buffer_id(), vertex_bytes, mesh.indices));
                match fill {
                    Ok(()) => Ok(upload),
                    Err(e) => {
                        upload.release(&mut self.staging, QueueKind::Copy, Ticket::NONE);
                        Err(e.into())
                    }
                }
            });
        let upload = match uploaded {
            Ok(upload) => upload,
            Err(e) => {
                vertices.release(&mut self.staging, QueueKind::Copy, Ticket::NONE);
                indices.release(&mut self.staging, QueueKind::Copy, Ticket::NONE);
                return Err(e);
            }
        };

        let allocator = match self.copy_allocators.request_allocator(copy.last_completed()) {
            Ok(allocator) => allocator,
            Err(e) => {
                for resource in [upload, vertices, indices] {
                    resource.release(&mut self.staging, QueueKind::Copy, Ticket::NONE);
                }
                return Err(e.into());
            }
        };
        let submitted = backend
            .begin_command_list(QueueKind::Copy, allocator, Some(mesh.label))
            .and_then(|mut list| {
                let mut batch = BarrierBatch::new();
                batch.transition(&mut vertices, ResourceState::COPY_DEST);
                batch.transition(&mut indices, ResourceState::COPY_DEST);
                batch.flush(list.as_mut());
                list.copy_buffer_to_buffer(upload.buffer_id(), 0, vertices.buffer_id(), 0, vertex_bytes);
                list.copy_buffer_to_buffer(
                    upload.buffer_id(),
                    vertex_bytes,
                    indices.buffer_id(),
                    0,
                    index_bytes,
                );
                // Copy queues cannot enter graphics read states; the first frame does.
                batch.transition(&mut vertices, ResourceState::COMMON);
                batch.transition(&mut indices, ResourceState::COMMON);
                batch.flush(list.as_mut());
                list.finish()
            })
            .and_then(|id| copy.submit(&[id]));

        let ticket = match submitted {
            Ok(ticket) => ticket,
            Err(e) => {
                let issued = copy.last_issued();
                self.copy_allocators.discard_allocator(issued, allocator);
                for resource in [upload, vertices, indices] {
                    resource.release(&mut self.staging, QueueKind::Copy, issued);
                }
                return Err(e.into());
            }
        };
        self.copy_allocators.discard_allocator(ticket, allocator);
        upload.release(&mut self.staging, QueueKind::Copy, ticket);

        if let Err(e) = backend.queue_wait(QueueKind::Graphics, QueueKind::Copy, ticket) {
            vertices.release(&mut self.staging, QueueKind::Copy, ticket);
            indices.release(&mut self.staging, QueueKind::Copy, ticket);
            return Err(e.into());
        }

        let record = MeshRecord {
            label: mesh.label.to_string(),
            vertices,
            indices,
            vertex_stride: mesh.vertex_stride,
            vertex_count: mesh.vertex_count(),
            index_format: mesh.index_format,
            subsets: mesh.subsets.to_vec(),
            deformable: mesh.deformable,
            bounds: mesh.bounds(),
            upload_ticket: ticket,
            registered_after: self.queues.get(QueueKind::Graphics).last_issued(),
            pending_vertices: None,
        };
        let handle = self.meshes.insert(record);
        log::info!(
            "Registered {handle} '{}' ({} vertices, {} subset(s)) with copy {ticket}",
            mesh.label,
            mesh.vertex_count(),
            mesh.subsets.len()
        );
        Ok(handle)
    }

    /// Replaces the vertex data of a deformable mesh. The next frame copies it and refits
    /// the mesh's bottom-level structures in place.
    ///
    /// # Errors
    ///
    /// `FrameError::InvalidMesh` for a static mesh or a different byte length.
    pub fn update_mesh_vertices(&mut self, handle: MeshHandle, vertices: &[u8]) -> Result<(), FrameError> {
        self.ensure_running()?;
        let (label, size) = {
            let mesh = self.meshes.get(handle)?;
            if !mesh.deformable {
                return Err(FrameError::InvalidMesh(format!(
                    "{}: static meshes cannot be updated",
                    mesh.label
                )));
            }
            if vertices.len() as u64 != mesh.vertices.size() {
                return Err(FrameError::InvalidMesh(format!(
                    "{}: update holds {} bytes, mesh has {}",
                    mesh.label,
                    vertices.len(),
                    mesh.vertices.size()
                )));
            }
            (mesh.label.clone(), mesh.vertices.size())
        };

        let upload = stage_upload(&mut self.staging, self.backend.as_ref(), size, &label)?;
        if let Err(e) = self.backend.write_buffer(upload.buffer_id(), 0, vertices) {
            upload.release(&mut self.staging, QueueKind::Graphics, Ticket::NONE);
            return Err(e.into());
        }
        let mesh = self.meshes.get_mut(handle)?;
        mesh.bounds = position_bounds(vertices, mesh.vertex_stride);
        if let Some(superseded) = mesh.pending_vertices.replace(upload) {
            // Never referenced by a submitted list.
            superseded.release(&mut self.staging, QueueKind::Graphics, Ticket::NONE);
        }
        log::trace!("Staged vertex update for {handle}");
        Ok(())
    }

    /// Unregisters a mesh. Its buffers and structures are destroyed once the last frame
    /// that could have used them completes.
    pub fn unregister_mesh(&mut self, handle: MeshHandle) -> Result<(), FrameError> {
        self.ensure_running()?;
        let mesh = self.meshes.remove(handle)?;
        let graphics = self.queues.get(QueueKind::Graphics).last_issued();
        let (queue, ticket) = if graphics > mesh.registered_after {
            (QueueKind::Graphics, graphics)
        } else {
            (QueueKind::Copy, mesh.upload_ticket)
        };
        if self.accel.remove_mesh(handle) > 0 {
            self.tlas_live = false;
        }
        for blas in self.accel.take_retired() {
            blas.release(&mut self.staging, QueueKind::Graphics, graphics);
        }
        mesh.vertices.release(&mut self.staging, queue, ticket);
        mesh.indices.release(&mut self.staging, queue, ticket);
        if let Some(pending) = mesh.pending_vertices {
            pending.release(&mut self.staging, QueueKind::Graphics, Ticket::NONE);
        }
        log::info!("Unregistered {handle} '{}'", mesh.label);
        Ok(())
    }

    /// Renders one frame.
    ///
    /// Blocks while the frame slot's previous frame is still executing.
    ///
    /// # Errors
    ///
    /// `FrameError::UnknownMesh` for an unregistered handle (nothing is recorded),
    /// exhaustion errors and backend failures. A frame that fails after recording began
    /// is dropped; resources it replaced are retired conservatively.
    pub fn render_frame(&mut self, frame: &FrameDescription) -> Result<FrameOutput, FrameError> {
        self.ensure_running()?;
        for instance in &frame.instances {
            self.meshes.get(instance.mesh)?;
        }
        if self.targets.is_none() {
            self.targets = Some(FrameTargets::new(self.backend.as_ref(), &self.heaps, &self.config)?);
        }

        let slot = (self.frame_index % self.slot_tickets.len() as u64) as usize;
        let mut stats = FrameStats {
            instances: frame.instances.len(),
            ..Default::default()
        };

        let graphics = self.queues.get(QueueKind::Graphics);
        let previous = self.slot_tickets[slot];
        if !graphics.is_complete(previous) {
            log::trace!("Frame {} waits for slot {slot} ({previous})", self.frame_index);
            stats.waited_for_slot = true;
            graphics.wait_for(previous);
        }
        self.profiler.collect(self.backend.as_ref(), graphics);
        stats.swept = self.staging.sweep(&self.queues, &self.heaps);
        self.accel.begin_frame();

        let frustum = frame.camera.frustum();
        let meshes = &self.meshes;
        let visible = cull_instances(&frame.instances, &frustum, |instance| {
            meshes.get(instance.mesh).ok().map(|mesh| mesh.bounds)
        });
        stats.culled = frame.instances.len() - visible.len();

        let offsets = self.upload_records(frame, slot, previous, &mut stats)?;

        let allocator = self
            .graphics_allocators
            .request_allocator(self.queues.get(QueueKind::Graphics).last_completed())?;
        let recorded = self
            .backend
            .begin_command_list(QueueKind::Graphics, allocator, Some("Frame"))
            .map_err(FrameError::from)
            .and_then(|mut list| {
                let recorded = self.record_frame(
                    list.as_mut(),
                    frame,
                    slot,
                    &visible,
                    offsets,
                    &mut stats,
                )?;
                let id = list.finish()?;
                let ticket = self.queues.get(QueueKind::Graphics).submit(&[id])?;
                Ok((recorded, ticket))
            });

        let (recorded, ticket) = match recorded {
            Ok(done) => done,
            Err(e) => {
                let issued = self.queues.get(QueueKind::Graphics).last_issued();
                self.graphics_allocators.discard_allocator(issued, allocator);
                // Builds recorded into the dropped list never ran.
                for resource in self.accel.release_all() {
                    resource.release(&mut self.staging, QueueKind::Graphics, issued);
                }
                self.tlas_live = false;
                log::error!("Frame {} dropped: {e}", self.frame_index);
                return Err(e);
            }
        };

        self.graphics_allocators.discard_allocator(ticket, allocator);
        for resource in self.accel.take_retired() {
            resource.release(&mut self.staging, QueueKind::Graphics, ticket);
        }
        for (_, mesh) in self.meshes.iter_mut() {
            if let Some(upload) = mesh.pending_vertices.take() {
                upload.release(&mut self.staging, QueueKind::Graphics, ticket);
            }
        }
        self.profiler.mark_submitted(ticket);
        self.slot_tickets[slot] = ticket;

        if let Some(targets) = &mut self.targets {
            targets.history.mark_valid();
            targets.history.swap_all();
        }
        self.prev_transforms = frame
            .instances
            .iter()
            .map(|instance| (instance.id, instance.transform))
            .collect();
        self.prev_view_proj = Some(frame.camera.view_projection());
        self.tlas_live = recorded.tlas.is_some();
        if self.tlas_live {
            self.pick_ids = frame.instances.iter().map(|instance| instance.id).collect();
        }

        let swept = self.staging.sweep(&self.queues, &self.heaps);
        stats.swept.released += swept.released;
        stats.swept.pooled += swept.pooled;
        stats.tlas = recorded.tlas;

        let output = FrameOutput {
            color: recorded.color,
            depth: recorded.depth,
            ticket,
            frame_index: self.frame_index,
            stats,
            timings: self.profiler.timings(),
        };
        log::trace!(
            "Frame {} submitted as {ticket}: {} draw(s), {} culled",
            self.frame_index,
            stats.draw_calls,
            stats.culled
        );
        self.frame_index += 1;
        Ok(output)
    }

    /// Changes the output resolution. Waits for the device to go idle, recreates every
    /// resolution-dependent target and invalidates history.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), FrameError> {
        self.ensure_running()?;
        if (width, height) == (self.config.width, self.config.height) {
            return Ok(());
        }
        let mut config = self.config.clone();
        config.width = width;
        config.height = height;
        config.validate()?;

        self.queues.wait_idle_all();
        if let Some(old) = self.targets.take() {
            old.release(&mut self.staging, Ticket::NONE);
        }
        // Frees the reserved history slots before the new pairs claim them.
        self.staging.sweep(&self.queues, &self.heaps);
        self.config = config;
        self.targets = Some(FrameTargets::new(self.backend.as_ref(), &self.heaps, &self.config)?);
        log::info!("Resized frame targets to {width}x{height}");
        Ok(())
    }

    /// Closest instance hit by `ray` in the last traced frame.
    pub fn pick(&self, ray: &Ray) -> Option<PickHit> {
        if self.shut_down || !self.tlas_live {
            return None;
        }
        let tlas = self.accel.tlas()?;
        let hit = self.backend.trace_ray(tlas.id(), ray, f32::INFINITY)?;
        let instance_id = *self.pick_ids.get(hit.instance_id as usize)?;
        Some(PickHit {
            instance_id,
            distance: hit.distance,
            primitive_index: hit.primitive_index,
            barycentrics: hit.barycentrics,
        })
    }

    /// Smoothed GPU timings of completed frames.
    pub fn gpu_timings(&self) -> GpuTimings {
        self.profiler.timings()
    }

    /// Cumulative acceleration-structure counters.
    pub fn accel_stats(&self) -> AccelStats {
        self.accel.stats()
    }

    /// Number of frames rendered so far.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Active configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Whether the GI pass and acceleration structures are active.
    pub fn ray_tracing_enabled(&self) -> bool {
        self.ray_tracing
    }

    /// Capabilities reported by the backend at creation.
    pub fn capabilities(&self) -> &BackendCapabilities {
        &self.capabilities
    }

    /// Number of registered meshes.
    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    /// Whether `handle` is registered.
    pub fn contains_mesh(&self, handle: MeshHandle) -> bool {
        self.meshes.contains(handle)
    }

    /// The descriptor heaps, for binding outside the frame loop.
    pub fn descriptor_heaps(&self) -> &DescriptorHeaps {
        &self.heaps
    }

    /// Items waiting in the staging pool.
    pub fn pending_releases(&self) -> usize {
        self.staging.pending_len()
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Refuses further work, waits for every queue to go idle and destroys everything.
    /// Idempotent; also run on drop.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        log::info!("Shutting down frame orchestrator after {} frame(s)", self.frame_index);
        self.queues.wait_idle_all();

        for mesh in self.meshes.drain() {
            mesh.vertices.release(&mut self.staging, QueueKind::Graphics, Ticket::NONE);
            mesh.indices.release(&mut self.staging, QueueKind::Graphics, Ticket::NONE);
            if let Some(pending) = mesh.pending_vertices {
                pending.release(&mut self.staging, QueueKind::Graphics, Ticket::NONE);
            }
        }
        for resource in self.accel.release_all() {
            resource.release(&mut self.staging, QueueKind::Graphics, Ticket::NONE);
        }
        if let Some(targets) = self.targets.take() {
            targets.release(&mut self.staging, Ticket::NONE);
        }
        for buffer in self.frame_params.drain(..) {
            buffer.release(&mut self.staging, QueueKind::Graphics, Ticket::NONE);
        }
        self.ring.destroy(self.backend.as_ref());
        self.staging.drain(&self.heaps);
        self.graphics_allocators.destroy_all();
        self.copy_allocators.destroy_all();
        self.tlas_live = false;
        log::debug!("Frame orchestrator released all GPU resources");
    }

    fn ensure_running(&self) -> Result<(), FrameError> {
        if self.shut_down {
            Err(FrameError::ShutDown)
        } else {
            Ok(())
        }
    }

    /// Writes instance and light records into the slot's ring buffer.
    fn upload_records(
        &mut self,
        frame: &FrameDescription,
        slot: usize,
        previous: Ticket,
        stats: &mut FrameStats,
    ) -> Result<RingOffsets, FrameError> {
        let params: Vec<InstanceParams> = frame
            .instances
            .iter()
            .map(|instance| {
                let mut flags = 0;
                if instance.translucent {
                    flags |= INSTANCE_TRANSLUCENT;
                }
                if frame.overlay.selected.contains(&instance.id) {
                    flags |= INSTANCE_SELECTED;
                }
                InstanceParams::new(
                    &instance.transform,
                    self.prev_transforms.get(&instance.id),
                    instance.material_index,
                    instance.id,
                    flags,
                )
            })
            .collect();
        let lights: Vec<LightRecord> = frame.lights.iter().map(LightRecord::from).collect();

        let backend = self.backend.as_ref();
        self.ring.begin_frame(slot);
        let required = UploadRing::required_bytes(&[
            std::mem::size_of_val(params.as_slice()) as u64,
            std::mem::size_of_val(lights.as_slice()) as u64,
        ]);
        if let Some((old, size)) = self.ring.ensure_capacity(backend, required)? {
            // Last read by the slot's previous frame, already waited on.
            self.staging.retire(
                QueueKind::Graphics,
                previous,
                Retired::Buffer {
                    id: old,
                    size,
                    reusable: false,
                },
            );
        }
        let instance_range = self.ring.push(backend, &params)?;
        let light_range = self.ring.push(backend, &lights)?;
        stats.upload_bytes =
            (instance_range.end - instance_range.start) + (light_range.end - light_range.start);
        Ok(RingOffsets {
            instances: instance_range.start as u32,
            lights: light_range.start as u32,
            light_count: lights.len() as u32,
        })
    }

    fn record_frame(
        &mut self,
        list: &mut dyn CommandList,
        frame: &FrameDescription,
        slot: usize,
        visible: &[usize],
        offsets: RingOffsets,
        stats: &mut FrameStats,
    ) -> Result<RecordedFrame, FrameError> {
        self.profiler.begin_frame(list, slot);

        self.prepare_geometry(list, stats)?;
        let tlas = if self.ray_tracing {
            self.update_acceleration_structures(list, frame, stats)?
        } else {
            None
        };

        let targets = self.targets.as_mut().ok_or(FrameError::ShutDown)?;
        let extent = targets.history.extent();
        let [history_depth, history_lighting, history_gi] = targets.history.previous_slots();
        let tlas_slot = match tlas {
            Some(_) => self
                .accel
                .tlas()
                .and_then(|t| t.resource.descriptor(ViewKind::ShaderRead))
                .map_or(reserved::NULL, |d| d.index.0),
            None => reserved::NULL,
        };
        let camera = &frame.camera;
        let params = FrameParams {
            view_proj: camera.view_projection().to_cols_array_2d(),
            prev_view_proj: self
                .prev_view_proj
                .unwrap_or_else(|| camera.view_projection())
                .to_cols_array_2d(),
            camera_position: [camera.position.x, camera.position.y, camera.position.z, 1.0],
            jitter: camera.jitter,
            render_extent: [extent.0, extent.1],
            frame_index: self.frame_index as u32,
            light_count: offsets.light_count,
            instance_count: frame.instances.len() as u32,
            debug_view: debug_view_code(frame.overlay.debug_view),
            history_depth,
            history_lighting,
            history_gi,
            tlas: tlas_slot,
            instance_offset: offsets.instances,
            light_offset: offsets.lights,
            history_valid: targets.history.is_valid() as u32,
            _pad: 0,
        };
        self.backend
            .write_buffer(self.frame_params[slot].buffer_id(), 0, bytemuck::bytes_of(&params))?;

        let draws = DrawLists::build(&self.meshes, frame, visible);
        let passes = pass_sequence(
            self.ray_tracing,
            frame.overlay.is_active(),
            self.config.temporal_upscaling,
        );
        let output_extent = (self.config.width, self.config.height);
        let mut main_pass_open = false;
        for pass in passes {
            if matches!(pass, PassKind::RayTracedGi | PassKind::OpaqueLighting) && !main_pass_open {
                self.profiler.main_pass_begin(list);
                main_pass_open = true;
            }
            list.push_debug_group(pass.label());
            stats.draw_calls += record_pass(pass, list, targets, &draws, extent, output_extent);
            list.pop_debug_group();
            if pass == PassKind::OpaqueLighting {
                self.profiler.main_pass_end(list);
            }
        }

        targets.output.transition_to(list, ResourceState::ALL_SHADER_READ);
        self.profiler.end_frame(list);

        Ok(RecordedFrame {
            color: targets.output.texture_id(),
            depth: targets.history.depth().current().texture_id(),
            tlas,
        })
    }

    /// Copies staged vertex updates, refits the structures of deformed meshes and moves
    /// every mesh buffer into the geometry-read state.
    fn prepare_geometry(&mut self, list: &mut dyn CommandList, stats: &mut FrameStats) -> Result<(), FrameError> {
        let mut batch = BarrierBatch::new();
        for (_, mesh) in self.meshes.iter_mut() {
            if mesh.pending_vertices.is_some() {
                batch.transition(&mut mesh.vertices, ResourceState::COPY_DEST);
            }
        }
        batch.flush(list);
        for (_, mesh) in self.meshes.iter_mut() {
            if let Some(upload) = &mesh.pending_vertices {
                list.copy_buffer_to_buffer(upload.buffer_id(), 0, mesh.vertices.buffer_id(), 0, upload.size());
            }
            batch.transition(&mut mesh.vertices, ResourceState::GEOMETRY_READ);
            batch.transition(&mut mesh.indices, ResourceState::GEOMETRY_READ);
        }
        batch.flush(list);

        if !self.ray_tracing {
            return Ok(());
        }
        for (handle, mesh) in self.meshes.iter_mut() {
            if mesh.pending_vertices.is_none() {
                continue;
            }
            for subset in 0..mesh.subsets.len() as u32 {
                let key = BlasKey { mesh: handle, subset };
                if self.accel.contains(key) {
                    self.accel.refit_blas(list, key, mesh.vertices.buffer_id())?;
                    stats.blas_refits += 1;
                }
            }
        }
        Ok(())
    }

    /// Builds missing bottom-level structures and brings the top-level structure up to
    /// date with every described instance. Returns `None` for an empty scene.
    fn update_acceleration_structures(
        &mut self,
        list: &mut dyn CommandList,
        frame: &FrameDescription,
        stats: &mut FrameStats,
    ) -> Result<Option<TlasAction>, FrameError> {
        let mut instances = Vec::new();
        for (param_index, instance) in frame.instances.iter().enumerate() {
            let mesh = self.meshes.get(instance.mesh)?;
            for (subset, part) in mesh.subsets.iter().enumerate() {
                if !instance.subsets.contains(subset as u32) || part.indices.is_empty() {
                    continue;
                }
                let key = BlasKey {
                    mesh: instance.mesh,
                    subset: subset as u32,
                };
                let blas = match self.accel.blas(key).map(Blas::id) {
                    Some(id) => id,
                    None => {
                        stats.blas_builds += 1;
                        self.accel
                            .build_blas(list, key, mesh.geometry(subset), mesh.deformable, mesh.deformable)?
                            .id()
                    }
                };
                instances.push(TlasInstance {
                    blas,
                    transform: instance.transform,
                    instance_id: param_index as u32,
                    mask: 0xFF,
                });
            }
        }
        if instances.is_empty() {
            return Ok(None);
        }

        let prior = self.accel.classify_instances(&instances);
        let action = self.accel.build_or_refit_tlas(list, &instances, prior)?;
        if let Some(tlas) = self.accel.tlas_mut() {
            let resource = tlas.resource_mut();
            if resource.descriptor(ViewKind::ShaderRead).is_none() {
                resource.attach_descriptor(&self.heaps, ViewKind::ShaderRead, SlotRequest::Auto)?;
            }
        }
        Ok(Some(action))
    }
}

impl Drop for FrameOrchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A host-writable buffer of exactly `size` bytes, reused from the staging pool when
/// one is available.
fn stage_upload(
    staging: &mut StagingPool,
    backend: &dyn GraphicsBackend,
    size: u64,
    label: &str,
) -> Result<GpuResource, FrameError> {
    if let Some(id) = staging.acquire_upload(size) {
        log::trace!("Reusing upload buffer {id:?} ({size} bytes) for '{label}'");
        return Ok(GpuResource::reused_upload(id, size));
    }
    GpuResource::create_buffer(
        backend,
        &BufferDescriptor {
            label: Some(Cow::Owned(format!("{label} Upload"))),
            size,
            usage: BufferUsage::UPLOAD | BufferUsage::COPY_SRC,
        },
        ResourceKind::Upload,
        ResourceState::COPY_SOURCE,
    )
}

/// Indexed draws of the visible instances, split by pass.
#[derive(Debug, Default)]
struct DrawLists {
    opaque: Vec<DrawIndexed>,
    /// Farthest first.
    translucent: Vec<DrawIndexed>,
    selected: Vec<DrawIndexed>,
    /// Whether the overlay draws a fullscreen debug view.
    debug_view: bool,
}

impl DrawLists {
    fn build(meshes: &MeshRegistry, frame: &FrameDescription, visible: &[usize]) -> Self {
        let mut lists = DrawLists {
            debug_view: frame.overlay.debug_view != DebugView::None,
            ..Default::default()
        };
        let mut translucent = Vec::new();
        for &index in visible {
            let instance = &frame.instances[index];
            let Ok(mesh) = meshes.get(instance.mesh) else {
                continue;
            };
            let draws = instance_draws(mesh, instance, index as u32);
            if frame.overlay.selected.contains(&instance.id) {
                lists.selected.extend(draws.iter().cloned());
            }
            if instance.translucent {
                let center = if mesh.bounds.is_valid() {
                    mesh.bounds.transform(&instance.transform).center()
                } else {
                    instance.transform.translation()
                };
                translucent.push((
                    DrawItem {
                        param_index: index as u32,
                        distance_sq: center.distance_squared(frame.camera.position),
                    },
                    draws,
                ));
            } else {
                lists.opaque.extend(draws);
            }
        }

        let mut order: Vec<DrawItem> = translucent.iter().map(|(item, _)| *item).collect();
        sort_back_to_front(&mut order);
        let mut by_index: HashMap<u32, Vec<DrawIndexed>> = translucent
            .into_iter()
            .map(|(item, draws)| (item.param_index, draws))
            .collect();
        for item in order {
            if let Some(draws) = by_index.remove(&item.param_index) {
                lists.translucent.extend(draws);
            }
        }
        lists
    }
}

fn instance_draws(mesh: &MeshRecord, instance: &VisibleInstance, param_index: u32) -> Vec<DrawIndexed> {
    mesh.subsets
        .iter()
        .enumerate()
        .filter(|(i, subset)| instance.subsets.contains(*i as u32) && !subset.indices.is_empty())
        .map(|(_, subset)| DrawIndexed {
            vertex_buffer: mesh.vertices.buffer_id(),
            index_buffer: mesh.indices.buffer_id(),
            index_format: mesh.index_format,
            indices: subset.indices.clone(),
            base_vertex: 0,
            first_instance: param_index,
        })
        .collect()
}

fn read_only_depth(texture: TextureId) -> DepthAttachment {
    DepthAttachment {
        texture,
        load: LoadOp::Load,
        store: false,
        read_only: true,
    }
}

#[inline]
fn dispatch_groups((width, height): (u32, u32)) -> [u32; 3] {
    [width.div_ceil(GROUP_SIZE), height.div_ceil(GROUP_SIZE), 1]
}

fn raster_pass(
    list: &mut dyn CommandList,
    pass: PassKind,
    colors: &[ColorAttachment],
    depth: Option<DepthAttachment>,
    draws: &[DrawIndexed],
) -> u32 {
    list.begin_render_pass(&PassDescriptor {
        label: pass.label(),
        colors,
        depth,
    });
    list.set_pipeline(pass.pipeline());
    for draw in draws {
        list.draw_indexed(draw);
    }
    list.end_render_pass();
    draws.len() as u32
}

/// Records one pass with the transitions it needs. Returns the indexed draws recorded.
fn record_pass(
    pass: PassKind,
    list: &mut dyn CommandList,
    targets: &mut FrameTargets,
    draws: &DrawLists,
    render_extent: (u32, u32),
    output_extent: (u32, u32),
) -> u32 {
    let history = &mut targets.history;
    match pass {
        PassKind::DepthPrepass => {
            let depth = history.depth_mut().current_mut();
            depth.transition_to(list, ResourceState::DEPTH_WRITE);
            raster_pass(
                list,
                pass,
                &[],
                Some(DepthAttachment {
                    texture: depth.texture_id(),
                    load: LoadOp::Clear(1.0),
                    store: true,
                    read_only: false,
                }),
                &draws.opaque,
            )
        }
        PassKind::RayTracedGi => {
            let mut batch = BarrierBatch::new();
            batch.transition(
                history.depth_mut().current_mut(),
                ResourceState::DEPTH_READ | ResourceState::NON_PIXEL_SHADER_READ,
            );
            let (current, previous) = history.gi_mut().both_mut();
            batch.transition(current, ResourceState::UNORDERED_ACCESS);
            batch.transition(previous, ResourceState::NON_PIXEL_SHADER_READ);
            batch.flush(list);
            list.set_pipeline(pass.pipeline());
            list.dispatch(dispatch_groups(render_extent));
            0
        }
        PassKind::OpaqueLighting => {
            let mut batch = BarrierBatch::new();
            let (lighting, lighting_previous) = history.lighting_mut().both_mut();
            batch.transition(lighting, ResourceState::RENDER_TARGET);
            batch.transition(lighting_previous, ResourceState::PIXEL_SHADER_READ);
            let lighting_id = lighting.texture_id();
            batch.transition(history.gi_mut().current_mut(), ResourceState::PIXEL_SHADER_READ);
            batch.transition(history.depth_mut().previous_mut(), ResourceState::PIXEL_SHADER_READ);
            let depth = history.depth_mut().current_mut();
            batch.transition(depth, ResourceState::DEPTH_READ | ResourceState::ALL_SHADER_READ);
            batch.flush(list);
            raster_pass(
                list,
                pass,
                &[ColorAttachment {
                    texture: lighting_id,
                    load: LoadOp::Clear([0.0, 0.0, 0.0, 1.0]),
                    store: true,
                }],
                Some(read_only_depth(depth.texture_id())),
                &draws.opaque,
            )
        }
        PassKind::Translucent => {
            let lighting = history.lighting().current().texture_id();
            let depth = history.depth().current().texture_id();
            raster_pass(
                list,
                pass,
                &[ColorAttachment {
                    texture: lighting,
                    load: LoadOp::Load,
                    store: true,
                }],
                Some(read_only_depth(depth)),
                &draws.translucent,
            )
        }
        PassKind::PostProcess => {
            history
                .lighting_mut()
                .current_mut()
                .transition_to(list, ResourceState::PIXEL_SHADER_READ);
            let target = targets.post.as_mut().unwrap_or(&mut targets.output);
            target.transition_to(list, ResourceState::RENDER_TARGET);
            list.begin_render_pass(&PassDescriptor {
                label: pass.label(),
                colors: &[ColorAttachment {
                    texture: target.texture_id(),
                    load: LoadOp::Clear([0.0; 4]),
                    store: true,
                }],
                depth: None,
            });
            list.set_pipeline(pass.pipeline());
            list.draw(0..3, 0..1);
            list.end_render_pass();
            0
        }
        PassKind::EditorOverlay => {
            let depth = history.depth().current().texture_id();
            let target = targets.post.as_ref().unwrap_or(&targets.output).texture_id();
            list.begin_render_pass(&PassDescriptor {
                label: pass.label(),
                colors: &[ColorAttachment {
                    texture: target,
                    load: LoadOp::Load,
                    store: true,
                }],
                depth: Some(read_only_depth(depth)),
            });
            list.set_pipeline(pass.pipeline());
            if draws.debug_view {
                list.draw(0..3, 0..1);
            }
            for draw in &draws.selected {
                list.draw_indexed(draw);
            }
            list.end_render_pass();
            draws.selected.len() as u32
        }
        PassKind::TemporalUpscale => {
            let mut batch = BarrierBatch::new();
            if let Some(post) = targets.post.as_mut() {
                batch.transition(post, ResourceState::NON_PIXEL_SHADER_READ);
            }
            batch.transition(
                history.depth_mut().current_mut(),
                ResourceState::DEPTH_READ | ResourceState::NON_PIXEL_SHADER_READ,
            );
            batch.transition(
                history.lighting_mut().previous_mut(),
                ResourceState::NON_PIXEL_SHADER_READ,
            );
            batch.transition(&mut targets.output, ResourceState::UNORDERED_ACCESS);
            batch.flush(list);
            list.set_pipeline(pass.pipeline());
            list.dispatch(dispatch_groups(output_extent));
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::renderer::DescriptorHeapKind;
    use strata_core::testing::MockBackend;

    fn orchestrator(mock: &MockBackend) -> FrameOrchestrator {
        let config = FrameConfig {
            width: 20,
            height: 12,
            ..FrameConfig::default()
        };
        FrameOrchestrator::new(Arc::new(mock.clone()), config).expect("orchestrator")
    }

    #[test]
    fn test_dispatch_groups_round_up() {
        assert_eq!(dispatch_groups((20, 12)), [3, 2, 1]);
        assert_eq!(dispatch_groups((16, 8)), [2, 1, 1]);
    }

    #[test]
    fn test_frame_params_bound_at_reserved_slots() {
        let mock = MockBackend::new();
        let frames = orchestrator(&mock);
        let heap = frames.descriptor_heaps().get(DescriptorHeapKind::ShaderResource);
        for slot in 0..frames.config().frame_slots() {
            assert!(heap.is_occupied(reserved::frame_params(slot)));
        }
        assert!(!heap.is_occupied(reserved::NULL));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mock = MockBackend::new();
        let config = FrameConfig {
            max_frame_latency: 0,
            ..FrameConfig::default()
        };
        assert!(matches!(
            FrameOrchestrator::new(Arc::new(mock), config),
            Err(FrameError::Config(_))
        ));
    }

    #[test]
    fn test_drop_shuts_down() {
        let mock = MockBackend::new();
        drop(orchestrator(&mock));
        assert_eq!(mock.live_buffers(), 0);
        assert_eq!(mock.live_textures(), 0);
    }
}
