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

//! An in-process [`GraphicsBackend`] for tests.
//!
//! [`MockBackend`] keeps buffers in host memory, records every command, executes
//! copies and acceleration-structure builds at submission, and lets the test decide
//! when a queue's tickets complete. Call counters expose what the code under test
//! asked of the device.

use crate::math::Ray;
use crate::renderer::api::*;
use crate::renderer::error::ResourceError;
use crate::renderer::raytrace::HostAccelStore;
use crate::renderer::traits::{CommandList, GraphicsBackend};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// When submitted work is considered complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    /// Every submission completes as soon as it is submitted.
    Immediate,
    /// Tickets complete only through [`MockBackend::complete_up_to`].
    Manual,
}

/// Construction options for [`MockBackend`].
#[derive(Debug, Clone, Copy)]
pub struct MockConfig {
    /// Completion behaviour.
    pub completion: CompletionMode,
    /// Whether acceleration structures are supported.
    pub ray_tracing: bool,
    /// Whether timestamps are supported.
    pub timestamps: bool,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            completion: CompletionMode::Immediate,
            ray_tracing: true,
            timestamps: true,
        }
    }
}

/// A command captured by a mock command list.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    /// `resource_barriers`, one entry per barrier.
    Barrier(ResourceBarrier),
    /// `copy_buffer_to_buffer`.
    CopyBuffer {
        /// Source buffer.
        src: BufferId,
        /// Source offset.
        src_offset: u64,
        /// Destination buffer.
        dst: BufferId,
        /// Destination offset.
        dst_offset: u64,
        /// Byte count.
        size: u64,
    },
    /// `begin_render_pass`.
    BeginRenderPass {
        /// Pass label.
        label: String,
        /// Color attachments.
        colors: Vec<ColorAttachment>,
        /// Depth attachment.
        depth: Option<DepthAttachment>,
    },
    /// `set_pipeline`.
    SetPipeline(PipelineKey),
    /// `draw_indexed`.
    DrawIndexed(DrawIndexed),
    /// `draw`.
    Draw {
        /// Vertex range.
        vertices: Range<u32>,
        /// Instance range.
        instances: Range<u32>,
    },
    /// `end_render_pass`.
    EndRenderPass,
    /// `dispatch`.
    Dispatch([u32; 3]),
    /// `build_blas`.
    BuildBlas(BlasBuildRecord),
    /// `build_tlas`.
    BuildTlas(TlasBuildRecord),
    /// `write_timestamp`.
    WriteTimestamp(u32),
    /// `resolve_timestamps`.
    ResolveTimestamps {
        /// First slot.
        first: u32,
        /// Slot count.
        count: u32,
    },
    /// `push_debug_group`.
    PushDebugGroup(String),
    /// `pop_debug_group`.
    PopDebugGroup,
}

/// One submitted command list.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Queue it was submitted to.
    pub queue: QueueKind,
    /// Ticket signaled after it.
    pub ticket: Ticket,
    /// Debug label of the list.
    pub label: Option<String>,
    /// Recorded commands, in order.
    pub commands: Vec<RecordedCommand>,
}

impl Submission {
    /// Labels of the render passes, in recording order.
    pub fn render_pass_labels(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::BeginRenderPass { label, .. } => Some(label.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Indexed draws recorded inside the render pass labelled `label`.
    pub fn draws_in_pass(&self, label: &str) -> Vec<DrawIndexed> {
        let mut inside = false;
        let mut draws = Vec::new();
        for command in &self.commands {
            match command {
                RecordedCommand::BeginRenderPass { label: l, .. } => inside = l == label,
                RecordedCommand::EndRenderPass => inside = false,
                RecordedCommand::DrawIndexed(draw) if inside => draws.push(draw.clone()),
                _ => {}
            }
        }
        draws
    }

    /// Transition barriers recorded for `resource`.
    pub fn transitions_of(&self, resource: ResourceHandle) -> Vec<(ResourceState, ResourceState)> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::Barrier(ResourceBarrier::Transition {
                    resource: r,
                    before,
                    after,
                }) if *r == resource => Some((*before, *after)),
                _ => None,
            })
            .collect()
    }
}

/// Calls observed by the mock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockCounters {
    /// `create_buffer` calls.
    pub buffers_created: usize,
    /// `destroy_buffer` calls.
    pub buffers_destroyed: usize,
    /// `create_texture` calls.
    pub textures_created: usize,
    /// `destroy_texture` calls.
    pub textures_destroyed: usize,
    /// `create_command_allocator` calls.
    pub allocators_created: usize,
    /// `reset_command_allocator` calls.
    pub allocator_resets: usize,
    /// `completed_ticket` calls.
    pub completion_queries: usize,
    /// Successful `submit` calls.
    pub submits: usize,
    /// Transition barriers executed.
    pub transition_barriers: usize,
    /// Bottom-level full builds executed.
    pub blas_builds: usize,
    /// Bottom-level updates executed.
    pub blas_updates: usize,
    /// Top-level full builds executed.
    pub tlas_builds: usize,
    /// Top-level updates executed.
    pub tlas_updates: usize,
    /// `create_accel_struct` calls.
    pub accel_structs_created: usize,
    /// `destroy_accel_struct` calls.
    pub accel_structs_destroyed: usize,
    /// `write_descriptor` calls.
    pub descriptor_writes: usize,
    /// `clear_descriptor` calls.
    pub descriptor_clears: usize,
    /// `queue_wait` calls.
    pub queue_waits: usize,
}

#[derive(Debug)]
struct MockBuffer {
    data: Vec<u8>,
}

#[derive(Debug)]
struct MockState {
    next_id: u64,
    buffers: HashMap<BufferId, MockBuffer>,
    textures: HashMap<TextureId, (u32, u32, TextureFormat)>,
    allocators: HashMap<AllocatorId, QueueKind>,
    descriptors: HashMap<(DescriptorHeapKind, DescriptorIndex), DescriptorWrite>,
    finished: HashMap<CommandListId, (QueueKind, Option<String>, Vec<RecordedCommand>)>,
    signaled: [Ticket; QueueKind::COUNT],
    completed: [Ticket; QueueKind::COUNT],
    accel: HostAccelStore,
    clock: u64,
    resolved_timestamps: HashMap<u32, u64>,
    counters: MockCounters,
    submissions: Vec<Submission>,
    fail_next_submit: bool,
    /// Texture creations that still succeed before one fails.
    textures_before_failure: Option<usize>,
    fail_next_allocator_reset: bool,
}

impl MockState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug)]
struct Shared {
    config: MockConfig,
    state: Mutex<MockState>,
    completion_changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock backend state poisoned")
    }
}

/// The mock backend. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct MockBackend {
    shared: Arc<Shared>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::with_config(MockConfig::default())
    }
}

impl MockBackend {
    /// A mock whose submissions complete immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock whose tickets complete only when the test says so.
    pub fn with_manual_completion() -> Self {
        Self::with_config(MockConfig {
            completion: CompletionMode::Manual,
            ..MockConfig::default()
        })
    }

    /// A mock with explicit options.
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(MockState {
                    next_id: 0,
                    buffers: HashMap::new(),
                    textures: HashMap::new(),
                    allocators: HashMap::new(),
                    descriptors: HashMap::new(),
                    finished: HashMap::new(),
                    signaled: [Ticket::NONE; QueueKind::COUNT],
                    completed: [Ticket::NONE; QueueKind::COUNT],
                    accel: HostAccelStore::new(),
                    clock: 0,
                    resolved_timestamps: HashMap::new(),
                    counters: MockCounters::default(),
                    submissions: Vec::new(),
                    fail_next_submit: false,
                    textures_before_failure: None,
                    fail_next_allocator_reset: false,
                }),
                completion_changed: Condvar::new(),
            }),
        }
    }

    /// Marks every signaled ticket up to `ticket` on `queue` as complete.
    pub fn complete_up_to(&self, queue: QueueKind, ticket: Ticket) {
        let mut state = self.shared.lock();
        let i = queue.index();
        let target = ticket.min(state.signaled[i]);
        if target > state.completed[i] {
            state.completed[i] = target;
        }
        drop(state);
        self.shared.completion_changed.notify_all();
    }

    /// Completes everything submitted so far on every queue.
    pub fn complete_all(&self) {
        for queue in QueueKind::ALL {
            self.complete_up_to(queue, Ticket(u64::MAX));
        }
    }

    /// Makes the next `submit` fail with a backend error.
    pub fn fail_next_submit(&self) {
        self.shared.lock().fail_next_submit = true;
    }

    /// Lets `successes` more textures be created, then fails the next creation.
    pub fn fail_texture_creation_after(&self, successes: usize) {
        self.shared.lock().textures_before_failure = Some(successes);
    }

    /// Makes the next `reset_command_allocator` fail.
    pub fn fail_next_allocator_reset(&self) {
        self.shared.lock().fail_next_allocator_reset = true;
    }

    /// Snapshot of the call counters.
    pub fn counters(&self) -> MockCounters {
        self.shared.lock().counters.clone()
    }

    /// Every submission so far.
    pub fn submissions(&self) -> Vec<Submission> {
        self.shared.lock().submissions.clone()
    }

    /// The last submission made to `queue`.
    pub fn last_submission(&self, queue: QueueKind) -> Option<Submission> {
        self.shared
            .lock()
            .submissions
            .iter()
            .rev()
            .find(|s| s.queue == queue)
            .cloned()
    }

    /// Highest ticket signaled on `queue`.
    pub fn signaled(&self, queue: QueueKind) -> Ticket {
        self.shared.lock().signaled[queue.index()]
    }

    /// Current contents of a buffer.
    pub fn buffer_data(&self, id: BufferId) -> Option<Vec<u8>> {
        self.shared.lock().buffers.get(&id).map(|b| b.data.clone())
    }

    /// Number of live buffers.
    pub fn live_buffers(&self) -> usize {
        self.shared.lock().buffers.len()
    }

    /// Number of live textures.
    pub fn live_textures(&self) -> usize {
        self.shared.lock().textures.len()
    }

    /// Number of live acceleration structures.
    pub fn live_accel_structs(&self) -> usize {
        self.shared.lock().accel.len()
    }

    /// Number of live command allocators.
    pub fn live_allocators(&self) -> usize {
        self.shared.lock().allocators.len()
    }

    /// The descriptor currently written at a slot.
    pub fn descriptor(&self, heap: DescriptorHeapKind, index: DescriptorIndex) -> Option<DescriptorWrite> {
        self.shared.lock().descriptors.get(&(heap, index)).copied()
    }

    fn execute(state: &mut MockState, commands: &[RecordedCommand]) -> Result<(), ResourceError> {
        for command in commands {
            match command {
                RecordedCommand::Barrier(ResourceBarrier::Transition { .. }) => {
                    state.counters.transition_barriers += 1;
                }
                RecordedCommand::CopyBuffer {
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
                        slice_checked(&source.data, *src_offset, *size)?.to_vec()
                    };
                    let target = state
                        .buffers
                        .get_mut(dst)
                        .ok_or(ResourceError::NotFound(ResourceHandle::Buffer(*dst)))?;
                    let capacity = target.data.len() as u64;
                    if dst_offset + size > capacity {
                        return Err(ResourceError::OutOfBounds {
                            offset: *dst_offset,
                            len: *size,
                            capacity,
                        });
                    }
                    let start = *dst_offset as usize;
                    target.data[start..start + bytes.len()].copy_from_slice(&bytes);
                }
                RecordedCommand::BuildBlas(build) => {
                    let MockState {
                        accel,
                        buffers,
                        counters,
                        ..
                    } = state;
                    let buffers = &*buffers;
                    accel.execute_blas(build, |id| buffers.get(&id).map(|b| b.data.as_slice()))?;
                    match build.mode {
                        AccelBuildMode::Build => counters.blas_builds += 1,
                        AccelBuildMode::Update => counters.blas_updates += 1,
                    }
                }
                RecordedCommand::BuildTlas(build) => {
                    state.accel.execute_tlas(build)?;
                    match build.mode {
                        AccelBuildMode::Build => state.counters.tlas_builds += 1,
                        AccelBuildMode::Update => state.counters.tlas_updates += 1,
                    }
                }
                RecordedCommand::WriteTimestamp(slot) => {
                    state.clock += 1_000;
                    let now = state.clock;
                    state.resolved_timestamps.insert(*slot | PENDING_BIT, now);
                }
                RecordedCommand::ResolveTimestamps { first, count } => {
                    for slot in *first..first + count {
                        if let Some(value) = state.resolved_timestamps.remove(&(slot | PENDING_BIT)) {
                            state.resolved_timestamps.insert(slot, value);
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Marks written-but-unresolved timestamp slots.
const PENDING_BIT: u32 = 1 << 31;

fn slice_checked(data: &[u8], offset: u64, len: u64) -> Result<&[u8], ResourceError> {
    let capacity = data.len() as u64;
    if offset + len > capacity {
        return Err(ResourceError::OutOfBounds {
            offset,
            len,
            capacity,
        });
    }
    Ok(&data[offset as usize..(offset + len) as usize])
}

impl GraphicsBackend for MockBackend {
    fn adapter_info(&self) -> GraphicsAdapterInfo {
        GraphicsAdapterInfo {
            name: "Strata Mock Adapter".to_string(),
            backend_type: GraphicsBackendType::Software,
            device_type: RendererDeviceType::Cpu,
        }
    }

    fn capabilities(&self) -> BackendCapabilities {
        let config = self.shared.config;
        BackendCapabilities {
            ray_tracing: if config.ray_tracing {
                RayTracingTier::Host
            } else {
                RayTracingTier::None
            },
            timestamp_queries: config.timestamps,
            timestamp_period_ns: 1.0,
            timestamp_capacity: if config.timestamps { 64 } else { 0 },
        }
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError> {
        let mut state = self.shared.lock();
        let id = BufferId(state.next_id());
        state.buffers.insert(
            id,
            MockBuffer {
                data: vec![0; descriptor.size as usize],
            },
        );
        state.counters.buffers_created += 1;
        Ok(id)
    }

    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError> {
        let mut state = self.shared.lock();
        state
            .buffers
            .remove(&id)
            .ok_or(ResourceError::NotFound(ResourceHandle::Buffer(id)))?;
        state.counters.buffers_destroyed += 1;
        Ok(())
    }

    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        let mut state = self.shared.lock();
        let buffer = state
            .buffers
            .get_mut(&id)
            .ok_or(ResourceError::NotFound(ResourceHandle::Buffer(id)))?;
        let capacity = buffer.data.len() as u64;
        if offset + data.len() as u64 > capacity {
            return Err(ResourceError::OutOfBounds {
                offset,
                len: data.len() as u64,
                capacity,
            });
        }
        buffer.data[offset as usize..offset as usize + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<TextureId, ResourceError> {
        let mut state = self.shared.lock();
        if let Some(remaining) = state.textures_before_failure {
            state.textures_before_failure = remaining.checked_sub(1);
            if remaining == 0 {
                log::debug!("Mock: failing creation of texture {:?}", descriptor.label);
                return Err(ResourceError::BackendError("injected texture failure".into()));
            }
        }
        let id = TextureId(state.next_id());
        state.textures.insert(
            id,
            (descriptor.width, descriptor.height, descriptor.format),
        );
        state.counters.textures_created += 1;
        Ok(id)
    }

    fn destroy_texture(&self, id: TextureId) -> Result<(), ResourceError> {
        let mut state = self.shared.lock();
        state
            .textures
            .remove(&id)
            .ok_or(ResourceError::NotFound(ResourceHandle::Texture(id)))?;
        state.counters.textures_destroyed += 1;
        Ok(())
    }

    fn write_descriptor(&self, write: &DescriptorWrite) -> Result<(), ResourceError> {
        let mut state = self.shared.lock();
        state.descriptors.insert((write.heap, write.index), *write);
        state.counters.descriptor_writes += 1;
        Ok(())
    }

    fn clear_descriptor(&self, heap: DescriptorHeapKind, index: DescriptorIndex) {
        let mut state = self.shared.lock();
        state.descriptors.remove(&(heap, index));
        state.counters.descriptor_clears += 1;
    }

    fn create_command_allocator(&self, queue: QueueKind) -> Result<AllocatorId, ResourceError> {
        let mut state = self.shared.lock();
        let id = AllocatorId(state.next_id());
        state.allocators.insert(id, queue);
        state.counters.allocators_created += 1;
        Ok(id)
    }

    fn reset_command_allocator(&self, allocator: AllocatorId) -> Result<(), ResourceError> {
        let mut state = self.shared.lock();
        if !state.allocators.contains_key(&allocator) {
            return Err(ResourceError::InvalidHandle);
        }
        if std::mem::take(&mut state.fail_next_allocator_reset) {
            log::debug!("Mock: failing reset of {allocator:?}");
            return Err(ResourceError::BackendError("injected reset failure".into()));
        }
        state.counters.allocator_resets += 1;
        Ok(())
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
        Ok(Box::new(MockCommandList {
            shared: Arc::clone(&self.shared),
            queue,
            label: label.map(str::to_owned),
            commands: Vec::new(),
        }))
    }

    fn submit(
        &self,
        queue: QueueKind,
        lists: &[CommandListId],
        signal: Ticket,
    ) -> Result<(), ResourceError> {
        let mut state = self.shared.lock();
        if std::mem::take(&mut state.fail_next_submit) {
            log::debug!("Mock: failing submit of {signal} on {queue:?}");
            return Err(ResourceError::BackendError("injected submit failure".into()));
        }
        let i = queue.index();
        if signal <= state.signaled[i] {
            return Err(ResourceError::InvalidOperation(format!(
                "ticket {signal} does not advance {queue:?} past {}",
                state.signaled[i]
            )));
        }
        for id in lists {
            match state.finished.get(id) {
                Some((list_queue, ..)) if *list_queue != queue => {
                    return Err(ResourceError::InvalidOperation(format!(
                        "list recorded for {list_queue:?} submitted to {queue:?}"
                    )))
                }
                Some(_) => {}
                None => return Err(ResourceError::InvalidHandle),
            }
        }

        log::trace!("Mock: executing {} list(s) on {queue:?} as {signal}", lists.len());
        for id in lists {
            let (_, label, commands) = state.finished.remove(id).ok_or(ResourceError::InvalidHandle)?;
            Self::execute(&mut state, &commands)?;
            state.submissions.push(Submission {
                queue,
                ticket: signal,
                label,
                commands,
            });
        }

        state.signaled[i] = signal;
        if self.shared.config.completion == CompletionMode::Immediate {
            state.completed[i] = signal;
        }
        state.counters.submits += 1;
        drop(state);
        self.shared.completion_changed.notify_all();
        Ok(())
    }

    fn queue_wait(
        &self,
        _waiting: QueueKind,
        _signaled: QueueKind,
        _ticket: Ticket,
    ) -> Result<(), ResourceError> {
        // Submissions execute in call order, so the dependency is already honored.
        self.shared.lock().counters.queue_waits += 1;
        Ok(())
    }

    fn completed_ticket(&self, queue: QueueKind) -> Ticket {
        let mut state = self.shared.lock();
        state.counters.completion_queries += 1;
        state.completed[queue.index()]
    }

    fn wait_for_ticket(&self, queue: QueueKind, ticket: Ticket, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        while state.completed[queue.index()] < ticket {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .shared
                .completion_changed
                .wait_timeout(state, deadline - now)
                .expect("mock backend state poisoned")
                .0;
        }
        true
    }

    fn accel_struct_sizes(&self, inputs: &AccelStructInputs<'_>) -> AccelStructSizes {
        HostAccelStore::prebuild_sizes(inputs)
    }

    fn create_accel_struct(
        &self,
        kind: AccelStructKind,
        size: u64,
    ) -> Result<AccelStructId, ResourceError> {
        if !self.shared.config.ray_tracing {
            return Err(ResourceError::Unsupported("acceleration structures".into()));
        }
        let mut state = self.shared.lock();
        state.counters.accel_structs_created += 1;
        Ok(state.accel.create(kind, size))
    }

    fn destroy_accel_struct(&self, id: AccelStructId) -> Result<(), ResourceError> {
        let mut state = self.shared.lock();
        state.accel.destroy(id)?;
        state.counters.accel_structs_destroyed += 1;
        Ok(())
    }

    fn trace_ray(&self, tlas: AccelStructId, ray: &Ray, max_distance: f32) -> Option<RayHit> {
        self.shared.lock().accel.trace(tlas, ray, max_distance)
    }

    fn read_timestamps(&self, first: u32, count: u32) -> Option<Vec<u64>> {
        let state = self.shared.lock();
        (first..first + count)
            .map(|slot| state.resolved_timestamps.get(&slot).copied())
            .collect()
    }
}

struct MockCommandList {
    shared: Arc<Shared>,
    queue: QueueKind,
    label: Option<String>,
    commands: Vec<RecordedCommand>,
}

impl CommandList for MockCommandList {
    fn queue(&self) -> QueueKind {
        self.queue
    }

    fn resource_barriers(&mut self, barriers: &[ResourceBarrier]) {
        self.commands
            .extend(barriers.iter().copied().map(RecordedCommand::Barrier));
    }

    fn copy_buffer_to_buffer(
        &mut self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    ) {
        self.commands.push(RecordedCommand::CopyBuffer {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        });
    }

    fn begin_render_pass(&mut self, descriptor: &PassDescriptor<'_>) {
        self.commands.push(RecordedCommand::BeginRenderPass {
            label: descriptor.label.to_owned(),
            colors: descriptor.colors.to_vec(),
            depth: descriptor.depth,
        });
    }

    fn set_pipeline(&mut self, pipeline: PipelineKey) {
        self.commands.push(RecordedCommand::SetPipeline(pipeline));
    }

    fn draw_indexed(&mut self, draw: &DrawIndexed) {
        self.commands.push(RecordedCommand::DrawIndexed(draw.clone()));
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        self.commands
            .push(RecordedCommand::Draw { vertices, instances });
    }

    fn end_render_pass(&mut self) {
        self.commands.push(RecordedCommand::EndRenderPass);
    }

    fn dispatch(&mut self, groups: [u32; 3]) {
        self.commands.push(RecordedCommand::Dispatch(groups));
    }

    fn build_blas(&mut self, build: &BlasBuild<'_>) {
        self.commands
            .push(RecordedCommand::BuildBlas(BlasBuildRecord::from(build)));
    }

    fn build_tlas(&mut self, build: &TlasBuild<'_>) {
        self.commands
            .push(RecordedCommand::BuildTlas(TlasBuildRecord::from(build)));
    }

    fn write_timestamp(&mut self, slot: u32) {
        self.commands.push(RecordedCommand::WriteTimestamp(slot));
    }

    fn resolve_timestamps(&mut self, first: u32, count: u32) {
        self.commands
            .push(RecordedCommand::ResolveTimestamps { first, count });
    }

    fn push_debug_group(&mut self, label: &str) {
        self.commands
            .push(RecordedCommand::PushDebugGroup(label.to_owned()));
    }

    fn pop_debug_group(&mut self) {
        self.commands.push(RecordedCommand::PopDebugGroup);
    }

    fn finish(self: Box<Self>) -> Result<CommandListId, ResourceError> {
        let this = *self;
        let mut state = this.shared.lock();
        let id = CommandListId(state.next_id());
        state
            .finished
            .insert(id, (this.queue, this.label, this.commands));
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_manual_completion_gates_waits() {
        let mock = MockBackend::with_manual_completion();
        let allocator = mock
            .create_command_allocator(QueueKind::Graphics)
            .expect("allocator");
        let list = mock
            .begin_command_list(QueueKind::Graphics, allocator, None)
            .expect("list")
            .finish()
            .expect("finish");
        mock.submit(QueueKind::Graphics, &[list], Ticket(1))
            .expect("submit");

        assert_eq!(mock.completed_ticket(QueueKind::Graphics), Ticket::NONE);
        assert!(!mock.wait_for_ticket(QueueKind::Graphics, Ticket(1), Duration::from_millis(10)));

        let completer = mock.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completer.complete_up_to(QueueKind::Graphics, Ticket(1));
        });
        assert!(mock.wait_for_ticket(QueueKind::Graphics, Ticket(1), Duration::from_secs(5)));
        handle.join().expect("completer thread");
    }

    #[test]
    fn test_submit_rejects_non_increasing_tickets() {
        let mock = MockBackend::new();
        mock.submit(QueueKind::Copy, &[], Ticket(3)).expect("first submit");
        assert!(mock.submit(QueueKind::Copy, &[], Ticket(3)).is_err());
    }

    #[test]
    fn test_copy_executes_at_submit() {
        let mock = MockBackend::new();
        let desc = |size| BufferDescriptor {
            label: None,
            size,
            usage: BufferUsage::COPY_DST | BufferUsage::COPY_SRC,
        };
        let src = mock.create_buffer(&desc(8)).expect("src");
        let dst = mock.create_buffer(&desc(8)).expect("dst");
        mock.write_buffer(src, 0, &[1, 2, 3, 4]).expect("write");

        let allocator = mock.create_command_allocator(QueueKind::Copy).expect("allocator");
        let mut list = mock
            .begin_command_list(QueueKind::Copy, allocator, Some("upload"))
            .expect("list");
        list.copy_buffer_to_buffer(src, 0, dst, 4, 4);
        let id = list.finish().expect("finish");
        assert_eq!(mock.buffer_data(dst), Some(vec![0; 8]));

        mock.submit(QueueKind::Copy, &[id], Ticket(1)).expect("submit");
        assert_eq!(mock.buffer_data(dst), Some(vec![0, 0, 0, 0, 1, 2, 3, 4]));
    }

    #[test]
    fn test_rejected_submission_keeps_every_list() {
        let mock = MockBackend::new();
        let allocator = mock.create_command_allocator(QueueKind::Graphics).expect("allocator");
        let list = mock
            .begin_command_list(QueueKind::Graphics, allocator, None)
            .expect("list")
            .finish()
            .expect("finish");

        assert_eq!(
            mock.submit(QueueKind::Graphics, &[list, CommandListId(u64::MAX)], Ticket(1)),
            Err(ResourceError::InvalidHandle)
        );
        assert!(mock.submissions().is_empty());
        mock.submit(QueueKind::Graphics, &[list], Ticket(1)).expect("submit");
        assert_eq!(mock.submissions().len(), 1);
    }

    #[test]
    fn test_texture_failure_after_countdown() {
        let mock = MockBackend::new();
        let desc = TextureDescriptor {
            label: None,
            width: 4,
            height: 4,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::SHADER_READ,
        };
        mock.fail_texture_creation_after(1);
        assert!(mock.create_texture(&desc).is_ok());
        assert!(mock.create_texture(&desc).is_err());
        assert!(mock.create_texture(&desc).is_ok());
        assert_eq!(mock.live_textures(), 2);
    }
}
