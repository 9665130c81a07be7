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

use super::command::WgpuCommandList;
use super::context::WgpuContext;
use super::conversions::{from_wgpu_backend, from_wgpu_device_type, IntoWgpu};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use strata_core::math::Ray;
use strata_core::renderer::raytrace::HostAccelStore;
use strata_core::renderer::*;

/// Bytes per resolved timestamp.
const TIMESTAMP_BYTES: u64 = 8;

/// Construction options for [`WgpuBackend`].
#[derive(Debug, Clone, Copy)]
pub struct WgpuBackendOptions {
    /// Which adapter to favor.
    pub power_preference: wgpu::PowerPreference,
    /// Only accept a software adapter.
    pub force_fallback_adapter: bool,
    /// Build and trace acceleration structures on the host.
    pub host_ray_tracing: bool,
    /// Timestamp slots; ignored when the device cannot write timestamps.
    pub timestamp_capacity: u32,
    /// Sleep between device polls while waiting.
    pub poll_interval: Duration,
    /// Upper bound on a timestamp readback.
    pub readback_timeout: Duration,
}

impl Default for WgpuBackendOptions {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            host_ray_tracing: true,
            timestamp_capacity: 64,
            poll_interval: Duration::from_micros(200),
            readback_timeout: Duration::from_secs(2),
        }
    }
}

/// A pipeline callers build against [`WgpuBackend::device`] and register under a
/// [`PipelineKey`]. Bind groups are set in order whenever the pipeline is bound.
#[derive(Debug)]
pub enum RegisteredPipeline {
    /// Used by draws inside render passes.
    Render {
        /// The pipeline.
        pipeline: wgpu::RenderPipeline,
        /// Bind groups `0..n`.
        bind_groups: Vec<wgpu::BindGroup>,
    },
    /// Used by dispatches.
    Compute {
        /// The pipeline.
        pipeline: wgpu::ComputePipeline,
        /// Bind groups `0..n`.
        bind_groups: Vec<wgpu::BindGroup>,
    },
}

#[derive(Debug)]
pub(crate) struct BufferEntry {
    pub(crate) buffer: wgpu::Buffer,
    /// Requested size; the native buffer is padded to the copy alignment.
    pub(crate) size: u64,
    /// Host copy of upload and acceleration-structure input buffers.
    pub(crate) mirror: Option<Vec<u8>>,
}

#[derive(Debug)]
pub(crate) struct TextureEntry {
    pub(crate) texture: wgpu::Texture,
    pub(crate) view: wgpu::TextureView,
    pub(crate) usage: TextureUsage,
}

/// Work replayed on the host when a list is submitted.
#[derive(Debug)]
pub(crate) enum HostWork {
    Copy {
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    },
    Blas(BlasBuildRecord),
    Tlas(TlasBuildRecord),
}

#[derive(Debug)]
pub(crate) struct FinishedList {
    pub(crate) queue: QueueKind,
    pub(crate) label: Option<String>,
    pub(crate) commands: wgpu::CommandBuffer,
    pub(crate) host: Vec<HostWork>,
}

#[derive(Debug, Default)]
pub(crate) struct BackendState {
    pub(crate) buffers: HashMap<BufferId, BufferEntry>,
    pub(crate) textures: HashMap<TextureId, TextureEntry>,
    pub(crate) descriptors: HashMap<(DescriptorHeapKind, DescriptorIndex), DescriptorWrite>,
    pub(crate) allocators: HashMap<AllocatorId, QueueKind>,
    pub(crate) finished: HashMap<CommandListId, FinishedList>,
    pub(crate) pipelines: HashMap<PipelineKey, RegisteredPipeline>,
    pub(crate) accel: HostAccelStore,
    pub(crate) signaled: [Ticket; QueueKind::COUNT],
    next_id: u64,
}

impl BackendState {
    pub(crate) fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Query set and buffers backing [`CommandList::write_timestamp`].
#[derive(Debug)]
pub(crate) struct TimestampQueries {
    pub(crate) query_set: wgpu::QuerySet,
    /// Resolve target; every resolve lands at offset zero and is copied on.
    pub(crate) resolve: wgpu::Buffer,
    /// One `u64` per slot, mapped by [`GraphicsBackend::read_timestamps`].
    pub(crate) readback: wgpu::Buffer,
    pub(crate) capacity: u32,
    period_ns: f32,
    map_lock: Mutex<()>,
}

impl TimestampQueries {
    fn new(device: &wgpu::Device, capacity: u32, period_ns: f32) -> Self {
        let bytes = capacity as u64 * TIMESTAMP_BYTES;
        Self {
            query_set: device.create_query_set(&wgpu::QuerySetDescriptor {
                label: Some("Strata Timestamp QuerySet"),
                ty: wgpu::QueryType::Timestamp,
                count: capacity,
            }),
            resolve: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Strata Timestamp Resolve Buffer"),
                size: bytes,
                usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            }),
            readback: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Strata Timestamp Readback Buffer"),
                size: bytes,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            capacity,
            period_ns,
            map_lock: Mutex::new(()),
        }
    }
}

/// State shared between the backend and the command lists it hands out.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) context: WgpuContext,
    pub(crate) state: Mutex<BackendState>,
    /// Highest completed ticket per queue kind, advanced by submitted-work callbacks.
    pub(crate) completed: Arc<[AtomicU64; QueueKind::COUNT]>,
    pub(crate) timestamps: Option<TimestampQueries>,
    pub(crate) options: WgpuBackendOptions,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().expect("wgpu backend state poisoned")
    }

    /// Processes finished work without blocking, running completion callbacks.
    fn poll(&self) {
        if let Err(e) = self.context.device.poll(wgpu::PollType::Poll) {
            log::error!("Failed to poll wgpu device: {e:?}");
        }
    }

    fn completed(&self, queue: QueueKind) -> Ticket {
        Ticket(self.completed[queue.index()].load(Ordering::Acquire))
    }
}

/// A headless [`GraphicsBackend`] running on wgpu.
#[derive(Debug, Clone)]
pub struct WgpuBackend {
    shared: Arc<Shared>,
}

impl WgpuBackend {
    /// Opens a device and sets up timestamp queries when the adapter can write them.
    ///
    /// ## Errors
    /// When no adapter matches `options` or the device cannot be created.
    pub fn new(options: WgpuBackendOptions) -> anyhow::Result<Self> {
        let context = pollster::block_on(WgpuContext::new_headless(
            options.power_preference,
            options.force_fallback_adapter,
        ))?;
        Ok(Self::from_context(context, options))
    }

    /// Wraps an existing context.
    pub fn from_context(context: WgpuContext, options: WgpuBackendOptions) -> Self {
        let timestamps = (context.timestamps_supported() && options.timestamp_capacity > 0).then(|| {
            let period = context.queue.get_timestamp_period();
            log::info!(
                "GPU timestamps enabled: {} slots, {period:.3} ns per tick.",
                options.timestamp_capacity
            );
            TimestampQueries::new(&context.device, options.timestamp_capacity, period)
        });
        if timestamps.is_none() {
            log::info!("GPU timestamps unavailable on this device.");
        }

        Self {
            shared: Arc::new(Shared {
                context,
                state: Mutex::new(BackendState::default()),
                completed: Arc::new([AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)]),
                timestamps,
                options,
            }),
        }
    }

    /// The device, for building pipelines and bind groups.
    pub fn device(&self) -> &wgpu::Device {
        &self.shared.context.device
    }

    /// The queue every queue kind submits to.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.shared.context.queue
    }

    /// Makes `pipeline` available to lists that bind `key`. Replaces any previous
    /// registration.
    pub fn register_pipeline(&self, key: PipelineKey, pipeline: RegisteredPipeline) {
        log::debug!("Registered pipeline '{}'", key.0);
        self.shared.lock().pipelines.insert(key, pipeline);
    }

    /// The native buffer behind `id`.
    pub fn wgpu_buffer(&self, id: BufferId) -> Option<wgpu::Buffer> {
        self.shared.lock().buffers.get(&id).map(|b| b.buffer.clone())
    }

    /// The default view of the texture behind `id`.
    pub fn wgpu_texture_view(&self, id: TextureId) -> Option<wgpu::TextureView> {
        self.shared.lock().textures.get(&id).map(|t| t.view.clone())
    }

    /// The descriptor currently written at a slot.
    pub fn descriptor(&self, heap: DescriptorHeapKind, index: DescriptorIndex) -> Option<DescriptorWrite> {
        self.shared.lock().descriptors.get(&(heap, index)).copied()
    }

    /// Blocks until the device has finished everything submitted so far.
    pub fn wait_idle(&self) {
        for queue in QueueKind::ALL {
            let signaled = self.shared.lock().signaled[queue.index()];
            if !self.wait_for_ticket(queue, signaled, Duration::from_secs(10)) {
                log::warn!("{queue:?} did not reach {signaled} while waiting for idle");
            }
        }
    }

    fn run_host_work(state: &mut BackendState, work: &[HostWork]) -> Result<(), ResourceError> {
        for item in work {
            match item {
                HostWork::Copy {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => {
                    let bytes = {
                        let source = state
                            .buffers
                            .get(src)
                            .ok_or(ResourceError::NotFound(ResourceHandle::Buffer(*src)))?;
                        match &source.mirror {
                            Some(mirror) => slice_checked(mirror, *src_offset, *size)?.to_vec(),
                            None => {
                                log::warn!(
                                    "Copy into mirrored {dst:?} from unmirrored {src:?}; host copy is zeroed"
                                );
                                vec![0; *size as usize]
                            }
                        }
                    };
                    if let Some(mirror) = state.buffers.get_mut(dst).and_then(|b| b.mirror.as_mut()) {
                        let capacity = mirror.len() as u64;
                        if dst_offset + size > capacity {
                            return Err(ResourceError::OutOfBounds {
                                offset: *dst_offset,
                                len: *size,
                                capacity,
                            });
                        }
                        let start = *dst_offset as usize;
                        mirror[start..start + bytes.len()].copy_from_slice(&bytes);
                    }
                }
                HostWork::Blas(build) => {
                    let BackendState { accel, buffers, .. } = state;
                    let buffers = &*buffers;
                    accel.execute_blas(build, |id| buffers.get(&id).and_then(|b| b.mirror.as_deref()))?;
                }
                HostWork::Tlas(build) => state.accel.execute_tlas(build)?,
            }
        }
        Ok(())
    }
}

fn slice_checked(data: &[u8], offset: u64, len: u64) -> Result<&[u8], ResourceError> {
    let capacity = data.len() as u64;
    if offset + len > capacity {
        return Err(ResourceError::OutOfBounds { offset, len, capacity });
    }
    Ok(&data[offset as usize..(offset + len) as usize])
}

#[inline]
pub(crate) fn align_to_copy(value: u64) -> u64 {
    value.div_ceil(wgpu::COPY_BUFFER_ALIGNMENT) * wgpu::COPY_BUFFER_ALIGNMENT
}

impl GraphicsBackend for WgpuBackend {
    fn adapter_info(&self) -> GraphicsAdapterInfo {
        let info = &self.shared.context.adapter_info;
        GraphicsAdapterInfo {
            name: info.name.clone(),
            backend_type: from_wgpu_backend(info.backend),
            device_type: from_wgpu_device_type(info.device_type),
        }
    }

    fn capabilities(&self) -> BackendCapabilities {
        let timestamps = self.shared.timestamps.as_ref();
        BackendCapabilities {
            ray_tracing: if self.shared.options.host_ray_tracing {
                RayTracingTier::Host
            } else {
                RayTracingTier::None
            },
            timestamp_queries: timestamps.is_some(),
            timestamp_period_ns: timestamps.map_or(1.0, |t| t.period_ns),
            timestamp_capacity: timestamps.map_or(0, |t| t.capacity),
        }
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError> {
        let padded = align_to_copy(descriptor.size.max(1));
        let buffer = self.shared.context.device.create_buffer(&wgpu::BufferDescriptor {
            label: descriptor.label.as_deref(),
            size: padded,
            usage: descriptor.usage.into_wgpu(),
            mapped_at_creation: false,
        });
        let mirror = descriptor
            .usage
            .intersects(BufferUsage::UPLOAD | BufferUsage::ACCEL_INPUT)
            .then(|| vec![0; descriptor.size as usize]);

        let mut state = self.shared.lock();
        let id = BufferId(state.next_id());
        state.buffers.insert(
            id,
            BufferEntry {
                buffer,
                size: descriptor.size,
                mirror,
            },
        );
        log::trace!(
            "WgpuBackend: Created buffer '{}' {id:?}, {} bytes",
            descriptor.label.as_deref().unwrap_or_default(),
            descriptor.size
        );
        Ok(id)
    }

    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError> {
        let entry = self
            .shared
            .lock()
            .buffers
            .remove(&id)
            .ok_or(ResourceError::NotFound(ResourceHandle::Buffer(id)))?;
        entry.buffer.destroy();
        Ok(())
    }

    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(ResourceError::InvalidOperation(format!(
                "buffer write offset {offset} is not {}-byte aligned",
                wgpu::COPY_BUFFER_ALIGNMENT
            )));
        }
        let mut state = self.shared.lock();
        let entry = state
            .buffers
            .get_mut(&id)
            .ok_or(ResourceError::NotFound(ResourceHandle::Buffer(id)))?;
        let len = data.len() as u64;
        if offset + len > entry.size {
            return Err(ResourceError::OutOfBounds {
                offset,
                len,
                capacity: entry.size,
            });
        }
        if data.is_empty() {
            return Ok(());
        }
        if let Some(mirror) = entry.mirror.as_mut() {
            mirror[offset as usize..(offset + len) as usize].copy_from_slice(data);
        }

        let queue = &self.shared.context.queue;
        if len % wgpu::COPY_BUFFER_ALIGNMENT == 0 {
            queue.write_buffer(&entry.buffer, offset, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(align_to_copy(len) as usize, 0);
            queue.write_buffer(&entry.buffer, offset, &padded);
        }
        Ok(())
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<TextureId, ResourceError> {
        if descriptor.width == 0 || descriptor.height == 0 {
            return Err(ResourceError::InvalidOperation(format!(
                "texture extent {}x{} is empty",
                descriptor.width, descriptor.height
            )));
        }
        let texture = self.shared.context.device.create_texture(&wgpu::TextureDescriptor {
            label: descriptor.label.as_deref(),
            size: wgpu::Extent3d {
                width: descriptor.width,
                height: descriptor.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: descriptor.format.into_wgpu(),
            usage: descriptor.usage.into_wgpu(),
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut state = self.shared.lock();
        let id = TextureId(state.next_id());
        state.textures.insert(
            id,
            TextureEntry {
                texture,
                view,
                usage: descriptor.usage,
            },
        );
        log::trace!(
            "WgpuBackend: Created texture '{}' {id:?}, {}x{} {:?}",
            descriptor.label.as_deref().unwrap_or_default(),
            descriptor.width,
            descriptor.height,
            descriptor.format
        );
        Ok(id)
    }

    fn destroy_texture(&self, id: TextureId) -> Result<(), ResourceError> {
        let entry = self
            .shared
            .lock()
            .textures
            .remove(&id)
            .ok_or(ResourceError::NotFound(ResourceHandle::Texture(id)))?;
        entry.texture.destroy();
        Ok(())
    }

    fn write_descriptor(&self, write: &DescriptorWrite) -> Result<(), ResourceError> {
        if DescriptorHeapKind::for_view(write.view) != write.heap {
            return Err(ResourceError::InvalidOperation(format!(
                "{:?} view written into the {:?} heap",
                write.view, write.heap
            )));
        }
        let mut state = self.shared.lock();
        match write.resource {
            ResourceHandle::Buffer(id) if !state.buffers.contains_key(&id) => {
                return Err(ResourceError::NotFound(write.resource));
            }
            ResourceHandle::Texture(id) => {
                let texture = state
                    .textures
                    .get(&id)
                    .ok_or(ResourceError::NotFound(write.resource))?;
                let required = match write.view {
                    ViewKind::ShaderRead => TextureUsage::SHADER_READ,
                    ViewKind::RenderTarget => TextureUsage::RENDER_TARGET,
                    ViewKind::Depth => TextureUsage::DEPTH_STENCIL,
                    ViewKind::UnorderedAccess => TextureUsage::UNORDERED_ACCESS,
                };
                if !texture.usage.contains(required) {
                    return Err(ResourceError::InvalidOperation(format!(
                        "{id:?} lacks {required:?} usage for a {:?} view",
                        write.view
                    )));
                }
            }
            ResourceHandle::AccelStruct(id) if !state.accel.contains(id) => {
                return Err(ResourceError::NotFound(write.resource));
            }
            _ => {}
        }
        state.descriptors.insert((write.heap, write.index), *write);
        Ok(())
    }

    fn clear_descriptor(&self, heap: DescriptorHeapKind, index: DescriptorIndex) {
        self.shared.lock().descriptors.remove(&(heap, index));
    }

    fn create_command_allocator(&self, queue: QueueKind) -> Result<AllocatorId, ResourceError> {
        let mut state = self.shared.lock();
        let id = AllocatorId(state.next_id());
        state.allocators.insert(id, queue);
        Ok(id)
    }

    fn reset_command_allocator(&self, allocator: AllocatorId) -> Result<(), ResourceError> {
        // wgpu encoders own their memory; the allocator only pins the queue kind.
        match self.shared.lock().allocators.contains_key(&allocator) {
            true => Ok(()),
            false => Err(ResourceError::InvalidHandle),
        }
    }

    fn destroy_command_allocator(&self, allocator: AllocatorId) -> Result<(), ResourceError> {
        self.shared
            .lock()
            .allocators
            .remove(&allocator)
            .map(|_| ())
            .ok_or(ResourceError::InvalidHandle)
    }

    fn begin_command_list(
        &self,
        queue: QueueKind,
        allocator: AllocatorId,
        label: Option<&str>,
    ) -> Result<Box<dyn CommandList>, ResourceError> {
        match self.shared.lock().allocators.get(&allocator) {
            Some(kind) if *kind == queue => {}
            Some(kind) => {
                return Err(ResourceError::InvalidOperation(format!(
                    "allocator {allocator:?} belongs to {kind:?}, not {queue:?}"
                )))
            }
            None => return Err(ResourceError::InvalidHandle),
        }
        Ok(Box::new(WgpuCommandList::new(
            Arc::clone(&self.shared),
            queue,
            label.map(str::to_owned),
        )))
    }

    fn submit(
        &self,
        queue: QueueKind,
        lists: &[CommandListId],
        signal: Ticket,
    ) -> Result<(), ResourceError> {
        let mut state = self.shared.lock();
        let i = queue.index();
        if signal <= state.signaled[i] {
            return Err(ResourceError::InvalidOperation(format!(
                "ticket {signal} does not advance {queue:?} past {}",
                state.signaled[i]
            )));
        }

        // Nothing is consumed unless every list can be submitted.
        for (n, id) in lists.iter().enumerate() {
            let list = state.finished.get(id).ok_or(ResourceError::InvalidHandle)?;
            if list.queue != queue {
                return Err(ResourceError::InvalidOperation(format!(
                    "list recorded for {:?} submitted to {queue:?}",
                    list.queue
                )));
            }
            if lists[..n].contains(id) {
                return Err(ResourceError::InvalidOperation(format!("{id:?} submitted twice")));
            }
        }

        let mut command_buffers = Vec::with_capacity(lists.len());
        for id in lists {
            let list = state.finished.remove(id).ok_or(ResourceError::InvalidHandle)?;
            Self::run_host_work(&mut state, &list.host)?;
            log::trace!(
                "Submitting '{}' to {queue:?} as {signal}",
                list.label.as_deref().unwrap_or_default()
            );
            command_buffers.push(list.commands);
        }

        let wgpu_queue = &self.shared.context.queue;
        wgpu_queue.submit(command_buffers);
        let completed = Arc::clone(&self.shared.completed);
        wgpu_queue.on_submitted_work_done(move || {
            completed[i].fetch_max(signal.value(), Ordering::AcqRel);
        });
        state.signaled[i] = signal;
        Ok(())
    }

    fn queue_wait(
        &self,
        waiting: QueueKind,
        signaled: QueueKind,
        ticket: Ticket,
    ) -> Result<(), ResourceError> {
        // Every queue kind shares the one wgpu queue, which executes in submission order.
        log::trace!("{waiting:?} waits for {signaled:?} {ticket} (implicit)");
        Ok(())
    }

    fn completed_ticket(&self, queue: QueueKind) -> Ticket {
        self.shared.poll();
        self.shared.completed(queue)
    }

    fn wait_for_ticket(&self, queue: QueueKind, ticket: Ticket, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.shared.poll();
            if self.shared.completed(queue) >= ticket {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(self.shared.options.poll_interval);
        }
    }

    fn accel_struct_sizes(&self, inputs: &AccelStructInputs<'_>) -> AccelStructSizes {
        HostAccelStore::prebuild_sizes(inputs)
    }

    fn create_accel_struct(
        &self,
        kind: AccelStructKind,
        size: u64,
    ) -> Result<AccelStructId, ResourceError> {
        if !self.shared.options.host_ray_tracing {
            return Err(ResourceError::Unsupported("acceleration structures".into()));
        }
        Ok(self.shared.lock().accel.create(kind, size))
    }

    fn destroy_accel_struct(&self, id: AccelStructId) -> Result<(), ResourceError> {
        self.shared.lock().accel.destroy(id)
    }

    fn trace_ray(&self, tlas: AccelStructId, ray: &Ray, max_distance: f32) -> Option<RayHit> {
        self.shared.lock().accel.trace(tlas, ray, max_distance)
    }

    fn read_timestamps(&self, first: u32, count: u32) -> Option<Vec<u64>> {
        let timestamps = self.shared.timestamps.as_ref()?;
        if first.checked_add(count)? > timestamps.capacity {
            return None;
        }
        if count == 0 {
            return Some(Vec::new());
        }
        let _guard = timestamps.map_lock.lock().expect("timestamp readback poisoned");

        let start = first as u64 * TIMESTAMP_BYTES;
        let slice = timestamps
            .readback
            .slice(start..start + count as u64 * TIMESTAMP_BYTES);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });

        let deadline = Instant::now() + self.shared.options.readback_timeout;
        let mapped = loop {
            self.shared.poll();
            match receiver.try_recv() {
                Ok(result) => break result.is_ok(),
                Err(TryRecvError::Empty) if Instant::now() < deadline => {
                    std::thread::sleep(self.shared.options.poll_interval);
                }
                Err(_) => break false,
            }
        };
        if !mapped {
            log::warn!("Timestamp readback of slots {first}..{} failed", first + count);
            timestamps.readback.unmap();
            return None;
        }

        let values = {
            let data = slice.get_mapped_range();
            bytemuck::pod_collect_to_vec::<u8, u64>(&data)
        };
        timestamps.readback.unmap();
        Some(values)
    }
}
