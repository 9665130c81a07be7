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

//! GPU resources that remember their access state.

use super::staging::{Retired, StagingPool};
use crate::descriptor::{Descriptor, DescriptorHeaps, SlotRequest};
use crate::error::FrameError;
use strata_core::renderer::{
    AccelStructId, BufferDescriptor, BufferId, BufferUsage, CommandList, GraphicsBackend,
    QueueKind, ResourceBarrier, ResourceHandle, ResourceKind, ResourceState, TextureDescriptor,
    TextureId, Ticket, ViewKind,
};

/// A buffer, texture or acceleration structure together with its tracked access state
/// and the descriptors that point at it.
///
/// The tracked state always equals the `after` state of the last transition recorded
/// for the resource. At most one descriptor exists per [`ViewKind`].
#[derive(Debug)]
pub struct GpuResource {
    handle: ResourceHandle,
    kind: ResourceKind,
    state: ResourceState,
    size: u64,
    reusable: bool,
    descriptors: [Option<Descriptor>; ViewKind::COUNT],
}

impl GpuResource {
    /// Wraps an existing handle.
    pub fn new(handle: ResourceHandle, kind: ResourceKind, state: ResourceState) -> Self {
        Self {
            handle,
            kind,
            state,
            size: 0,
            reusable: false,
            descriptors: [None; ViewKind::COUNT],
        }
    }

    /// Creates a buffer in `state`.
    pub fn create_buffer(
        backend: &dyn GraphicsBackend,
        descriptor: &BufferDescriptor,
        kind: ResourceKind,
        state: ResourceState,
    ) -> Result<Self, FrameError> {
        let id = backend.create_buffer(descriptor)?;
        let mut resource = Self::new(ResourceHandle::Buffer(id), kind, state);
        resource.size = descriptor.size;
        // Host-written upload buffers go back to the size-keyed pool on release.
        resource.reusable = kind == ResourceKind::Upload && descriptor.usage.contains(BufferUsage::UPLOAD);
        Ok(resource)
    }

    /// Wraps a buffer taken from the staging pool's upload reuse list.
    pub fn reused_upload(id: BufferId, size: u64) -> Self {
        let mut resource = Self::new(
            ResourceHandle::Buffer(id),
            ResourceKind::Upload,
            ResourceState::COPY_SOURCE,
        );
        resource.size = size;
        resource.reusable = true;
        resource
    }

    /// Creates a texture in `state`.
    pub fn create_texture(
        backend: &dyn GraphicsBackend,
        descriptor: &TextureDescriptor,
        state: ResourceState,
    ) -> Result<Self, FrameError> {
        let id = backend.create_texture(descriptor)?;
        Ok(Self::new(ResourceHandle::Texture(id), ResourceKind::Texture, state))
    }

    /// Creates a texture and attaches one descriptor per entry of `views`. If any
    /// request fails the texture is destroyed and its slots freed before returning.
    pub fn create_texture_with_views(
        backend: &dyn GraphicsBackend,
        heaps: &DescriptorHeaps,
        descriptor: &TextureDescriptor,
        state: ResourceState,
        views: &[(ViewKind, SlotRequest)],
    ) -> Result<Self, FrameError> {
        let mut texture = Self::create_texture(backend, descriptor, state)?;
        for &(view, request) in views {
            if let Err(e) = texture.attach_descriptor(heaps, view, request) {
                texture.destroy(backend, heaps);
                return Err(e);
            }
        }
        Ok(texture)
    }

    /// The backend handle.
    #[inline]
    pub fn handle(&self) -> ResourceHandle {
        self.handle
    }

    /// Logical kind.
    #[inline]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Byte size for buffers, zero otherwise.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The buffer id.
    ///
    /// # Panics
    ///
    /// If the resource is not a buffer.
    pub fn buffer_id(&self) -> BufferId {
        match self.handle {
            ResourceHandle::Buffer(id) => id,
            other => panic!("{other:?} is not a buffer"),
        }
    }

    /// The texture id.
    ///
    /// # Panics
    ///
    /// If the resource is not a texture.
    pub fn texture_id(&self) -> TextureId {
        match self.handle {
            ResourceHandle::Texture(id) => id,
            other => panic!("{other:?} is not a texture"),
        }
    }

    /// The acceleration-structure id.
    ///
    /// # Panics
    ///
    /// If the resource is not an acceleration structure.
    pub fn accel_struct_id(&self) -> AccelStructId {
        match self.handle {
            ResourceHandle::AccelStruct(id) => id,
            other => panic!("{other:?} is not an acceleration structure"),
        }
    }

    /// The state the last recorded transition left the resource in.
    #[inline]
    pub fn current_state(&self) -> ResourceState {
        self.state
    }

    /// Records a transition to `new_state` unless the resource is already there.
    /// Returns whether a barrier was recorded.
    pub fn transition_to(&mut self, list: &mut dyn CommandList, new_state: ResourceState) -> bool {
        match self.take_transition(new_state) {
            Some(barrier) => {
                list.resource_barriers(&[barrier]);
                true
            }
            None => false,
        }
    }

    fn take_transition(&mut self, new_state: ResourceState) -> Option<ResourceBarrier> {
        if self.state == new_state {
            return None;
        }
        let barrier = ResourceBarrier::Transition {
            resource: self.handle,
            before: self.state,
            after: new_state,
        };
        self.state = new_state;
        Some(barrier)
    }

    /// The descriptor of one view kind, if attached.
    #[inline]
    pub fn descriptor(&self, view: ViewKind) -> Option<Descriptor> {
        self.descriptors[view.index()]
    }

    /// Writes a `view` descriptor for this resource.
    ///
    /// # Panics
    ///
    /// If a descriptor of the same view kind is already attached.
    pub fn attach_descriptor(
        &mut self,
        heaps: &DescriptorHeaps,
        view: ViewKind,
        request: SlotRequest,
    ) -> Result<Descriptor, FrameError> {
        let slot = &mut self.descriptors[view.index()];
        assert!(
            slot.is_none(),
            "{:?} already has a {view:?} descriptor",
            self.handle
        );
        let descriptor = heaps.request(request, self.handle, view)?;
        *slot = Some(descriptor);
        Ok(descriptor)
    }

    /// Hands the resource and its descriptors to the staging pool; they are released
    /// once `ticket` completes on `queue`.
    pub fn release(self, staging: &mut StagingPool, queue: QueueKind, ticket: Ticket) {
        for descriptor in self.descriptors.into_iter().flatten() {
            staging.retire(queue, ticket, Retired::Descriptor(descriptor));
        }
        let retired = match self.handle {
            ResourceHandle::Buffer(id) => Retired::Buffer {
                id,
                size: self.size,
                reusable: self.reusable,
            },
            ResourceHandle::Texture(id) => Retired::Texture(id),
            ResourceHandle::AccelStruct(id) => Retired::AccelStruct(id),
        };
        staging.retire(queue, ticket, retired);
    }

    /// Frees the descriptors and destroys the resource right away. Only for resources
    /// no submitted command list has referenced, such as half-built targets.
    pub fn destroy(self, backend: &dyn GraphicsBackend, heaps: &DescriptorHeaps) {
        for descriptor in self.descriptors.into_iter().flatten() {
            heaps.free(descriptor);
        }
        let destroyed = match self.handle {
            ResourceHandle::Buffer(id) => backend.destroy_buffer(id),
            ResourceHandle::Texture(id) => backend.destroy_texture(id),
            ResourceHandle::AccelStruct(id) => backend.destroy_accel_struct(id),
        };
        if let Err(e) = destroyed {
            log::warn!("Failed to destroy {:?}: {e}", self.handle);
        }
    }
}

/// Transitions gathered for several resources, flushed in one barrier call.
#[derive(Debug, Default)]
pub struct BarrierBatch {
    barriers: Vec<ResourceBarrier>,
}

impl BarrierBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a transition of `resource` unless it is already in `new_state`.
    pub fn transition(&mut self, resource: &mut GpuResource, new_state: ResourceState) -> bool {
        match resource.take_transition(new_state) {
            Some(barrier) => {
                self.barriers.push(barrier);
                true
            }
            None => false,
        }
    }

    /// Queues an unordered-access barrier between two writes of `resource`.
    pub fn unordered_access(&mut self, resource: ResourceHandle) {
        self.barriers.push(ResourceBarrier::UnorderedAccess { resource });
    }

    /// Number of queued barriers.
    pub fn len(&self) -> usize {
        self.barriers.len()
    }

    /// `true` when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }

    /// Records every queued barrier and empties the batch.
    pub fn flush(&mut self, list: &mut dyn CommandList) -> usize {
        let count = self.barriers.len();
        if count > 0 {
            list.resource_barriers(&self.barriers);
            self.barriers.clear();
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strata_core::testing::{MockBackend, RecordedCommand};

    fn list(mock: &MockBackend) -> Box<dyn CommandList> {
        let allocator = mock
            .create_command_allocator(QueueKind::Graphics)
            .expect("allocator");
        mock.begin_command_list(QueueKind::Graphics, allocator, None)
            .expect("list")
    }

    fn submit(mock: &MockBackend, list: Box<dyn CommandList>) -> Vec<RecordedCommand> {
        let id = list.finish().expect("finish");
        let ticket = mock.signaled(QueueKind::Graphics).next();
        mock.submit(QueueKind::Graphics, &[id], ticket).expect("submit");
        mock.last_submission(QueueKind::Graphics)
            .expect("submitted")
            .commands
    }

    fn texture() -> GpuResource {
        GpuResource::new(
            ResourceHandle::Texture(TextureId(1)),
            ResourceKind::Texture,
            ResourceState::COMMON,
        )
    }

    #[test]
    fn test_repeated_transition_emits_one_barrier() {
        let mock = MockBackend::new();
        let mut list = list(&mock);
        let mut resource = texture();
        assert!(resource.transition_to(list.as_mut(), ResourceState::RENDER_TARGET));
        assert!(!resource.transition_to(list.as_mut(), ResourceState::RENDER_TARGET));
        assert_eq!(resource.current_state(), ResourceState::RENDER_TARGET);

        let commands = submit(&mock, list);
        assert_eq!(
            commands,
            vec![RecordedCommand::Barrier(ResourceBarrier::Transition {
                resource: resource.handle(),
                before: ResourceState::COMMON,
                after: ResourceState::RENDER_TARGET,
            })]
        );
    }

    #[test]
    fn test_batch_skips_unchanged_resources() {
        let mock = MockBackend::new();
        let mut list = list(&mock);
        let mut a = texture();
        let mut b = GpuResource::new(
            ResourceHandle::Texture(TextureId(2)),
            ResourceKind::Texture,
            ResourceState::PIXEL_SHADER_READ,
        );
        let mut batch = BarrierBatch::new();
        batch.transition(&mut a, ResourceState::PIXEL_SHADER_READ);
        batch.transition(&mut b, ResourceState::PIXEL_SHADER_READ);
        assert_eq!(batch.flush(list.as_mut()), 1);
        assert!(batch.is_empty());
        assert_eq!(submit(&mock, list).len(), 1);
    }

    #[test]
    #[should_panic(expected = "already has a ShaderRead descriptor")]
    fn test_second_descriptor_of_one_view_panics() {
        let mock = MockBackend::new();
        let backend: Arc<dyn GraphicsBackend> = Arc::new(mock);
        let heaps = DescriptorHeaps::new(&backend, &Default::default());
        let mut resource = texture();
        resource
            .attach_descriptor(&heaps, ViewKind::ShaderRead, SlotRequest::Auto)
            .expect("first descriptor");
        let _ = resource.attach_descriptor(&heaps, ViewKind::ShaderRead, SlotRequest::Auto);
    }

    #[test]
    fn test_descriptors_of_different_views_coexist() {
        let mock = MockBackend::new();
        let backend: Arc<dyn GraphicsBackend> = Arc::new(mock);
        let heaps = DescriptorHeaps::new(&backend, &Default::default());
        let mut resource = texture();
        resource
            .attach_descriptor(&heaps, ViewKind::ShaderRead, SlotRequest::Auto)
            .expect("srv");
        resource
            .attach_descriptor(&heaps, ViewKind::RenderTarget, SlotRequest::Auto)
            .expect("rtv");
        assert!(resource.descriptor(ViewKind::ShaderRead).is_some());
        assert!(resource.descriptor(ViewKind::Depth).is_none());
    }
}
