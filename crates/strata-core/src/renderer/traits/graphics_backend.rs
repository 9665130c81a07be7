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

use crate::math::Ray;
use crate::renderer::api::*;
use crate::renderer::error::ResourceError;
use crate::renderer::traits::CommandList;
use std::fmt::Debug;
use std::time::Duration;

/// The seam between the frame manager and a concrete graphics API.
///
/// Implementations own every native object and hand out opaque IDs. All methods take
/// `&self`; implementations synchronize internally so an asset thread may create
/// resources while the frame loop records.
pub trait GraphicsBackend: Send + Sync + Debug + 'static {
    /// Returns information about the adapter the backend runs on.
    fn adapter_info(&self) -> GraphicsAdapterInfo;

    /// Returns the optional capabilities of the backend.
    fn capabilities(&self) -> BackendCapabilities;

    /// Creates a new GPU buffer.
    /// ## Arguments
    /// * `descriptor` - Size and usage of the buffer.
    /// ## Returns
    /// The ID of the created buffer.
    /// ## Errors
    /// * `ResourceError` - If the allocation fails.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError>;

    /// Destroys a buffer. The caller guarantees the GPU no longer uses it.
    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError>;

    /// Writes `data` into a buffer at `offset`. The write is ordered before any
    /// command list submitted afterwards.
    /// ## Errors
    /// * `ResourceError::OutOfBounds` - If the write does not fit the buffer.
    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError>;

    /// Creates a new 2D texture.
    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<TextureId, ResourceError>;

    /// Destroys a texture. The caller guarantees the GPU no longer uses it.
    fn destroy_texture(&self, id: TextureId) -> Result<(), ResourceError>;

    /// Writes a descriptor into a heap slot, replacing whatever it held.
    fn write_descriptor(&self, write: &DescriptorWrite) -> Result<(), ResourceError>;

    /// Clears a heap slot. Never fails; clearing an empty slot is a no-op.
    fn clear_descriptor(&self, heap: DescriptorHeapKind, index: DescriptorIndex);

    /// Creates a command allocator for the given queue kind.
    fn create_command_allocator(&self, queue: QueueKind) -> Result<AllocatorId, ResourceError>;

    /// Resets an allocator, reclaiming the memory of every list recorded from it.
    /// The caller guarantees none of those lists is still executing.
    fn reset_command_allocator(&self, allocator: AllocatorId) -> Result<(), ResourceError>;

    /// Destroys an allocator.
    fn destroy_command_allocator(&self, allocator: AllocatorId) -> Result<(), ResourceError>;

    /// Opens a command list recording into `allocator`.
    /// ## Arguments
    /// * `queue` - The queue kind the list will be submitted to.
    /// * `allocator` - An allocator created for the same queue kind.
    /// * `label` - Optional debug label.
    fn begin_command_list(
        &self,
        queue: QueueKind,
        allocator: AllocatorId,
        label: Option<&str>,
    ) -> Result<Box<dyn CommandList>, ResourceError>;

    /// Submits finished lists to a queue and signals `signal` once they retire.
    ///
    /// Tickets passed for one queue are strictly increasing.
    fn submit(
        &self,
        queue: QueueKind,
        lists: &[CommandListId],
        signal: Ticket,
    ) -> Result<(), ResourceError>;

    /// Makes subsequent work on `waiting` wait on the GPU until `signaled` reaches
    /// `ticket`. Does not block the calling thread.
    fn queue_wait(
        &self,
        waiting: QueueKind,
        signaled: QueueKind,
        ticket: Ticket,
    ) -> Result<(), ResourceError>;

    /// The highest ticket the queue has completed.
    fn completed_ticket(&self, queue: QueueKind) -> Ticket;

    /// Blocks until the queue completes `ticket` or `timeout` elapses.
    /// ## Returns
    /// `true` if the ticket completed.
    fn wait_for_ticket(&self, queue: QueueKind, ticket: Ticket, timeout: Duration) -> bool;

    /// Prebuild query: memory needed to build the described structure.
    fn accel_struct_sizes(&self, inputs: &AccelStructInputs<'_>) -> AccelStructSizes;

    /// Creates an (empty) acceleration structure of `size` bytes.
    fn create_accel_struct(
        &self,
        kind: AccelStructKind,
        size: u64,
    ) -> Result<AccelStructId, ResourceError>;

    /// Destroys an acceleration structure.
    fn destroy_accel_struct(&self, id: AccelStructId) -> Result<(), ResourceError>;

    /// Host-side closest-hit query against a built top-level structure, used for
    /// editor picking. Returns `None` on a miss or when unsupported.
    fn trace_ray(&self, tlas: AccelStructId, ray: &Ray, max_distance: f32) -> Option<RayHit>;

    /// Reads resolved timestamps `first..first + count`. Only meaningful once the
    /// list that resolved them has completed.
    fn read_timestamps(&self, first: u32, count: u32) -> Option<Vec<u64>>;
}
