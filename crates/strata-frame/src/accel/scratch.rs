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

//! Scratch memory shared by the builds of a frame.

use crate::error::FrameError;
use crate::resource::GpuResource;
use strata_core::renderer::{
    BufferDescriptor, BufferId, BufferUsage, CommandList, GraphicsBackend, ResourceBarrier,
    ResourceKind, ResourceState,
};

/// A single scratch buffer that only ever grows.
///
/// Builds recorded back to back reuse it, so every build after the first in a frame is
/// preceded by an unordered-access barrier on the buffer.
#[derive(Debug, Default)]
pub struct ScratchBuffer {
    buffer: Option<GpuResource>,
    used_since_reset: bool,
}

impl ScratchBuffer {
    /// Creates an empty scratch slot; memory is allocated on first use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.buffer.as_ref().map_or(0, GpuResource::size)
    }

    /// Starts a new frame; the first build of the frame needs no barrier.
    pub fn begin_frame(&mut self) {
        self.used_since_reset = false;
    }

    /// Makes sure the buffer holds `bytes`. A replaced buffer is pushed onto `retiring`
    /// because builds already recorded this frame may still use it.
    pub fn reserve(
        &mut self,
        backend: &dyn GraphicsBackend,
        bytes: u64,
        retiring: &mut Vec<GpuResource>,
    ) -> Result<BufferId, FrameError> {
        if let Some(buffer) = &self.buffer {
            if buffer.size() >= bytes {
                return Ok(buffer.buffer_id());
            }
        }

        let capacity = bytes.next_power_of_two().max(self.capacity());
        let buffer = GpuResource::create_buffer(
            backend,
            &BufferDescriptor {
                label: Some("Acceleration Structure Scratch".into()),
                size: capacity,
                usage: BufferUsage::STORAGE | BufferUsage::ACCEL_SCRATCH,
            },
            ResourceKind::Scratch,
            ResourceState::UNORDERED_ACCESS,
        )?;
        log::debug!("Scratch buffer grew {} -> {capacity} bytes", self.capacity());
        let id = buffer.buffer_id();
        if let Some(old) = self.buffer.replace(buffer) {
            retiring.push(old);
        }
        self.used_since_reset = false;
        Ok(id)
    }

    /// Records the barrier separating this build from the previous one.
    pub fn before_build(&mut self, list: &mut dyn CommandList) {
        if let Some(buffer) = &self.buffer {
            if self.used_since_reset {
                list.resource_barriers(&[ResourceBarrier::UnorderedAccess {
                    resource: buffer.handle(),
                }]);
            }
            self.used_since_reset = true;
        }
    }

    /// Gives up the buffer, if any.
    pub fn take(&mut self) -> Option<GpuResource> {
        self.used_since_reset = false;
        self.buffer.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::testing::MockBackend;

    #[test]
    fn test_scratch_grows_monotonically() {
        let mock = MockBackend::new();
        let mut scratch = ScratchBuffer::new();
        let mut retiring = Vec::new();

        let first = scratch.reserve(&mock, 1000, &mut retiring).expect("scratch");
        assert_eq!(scratch.capacity(), 1024);
        assert_eq!(scratch.reserve(&mock, 10, &mut retiring).expect("fits"), first);
        assert_eq!(scratch.capacity(), 1024);

        let second = scratch.reserve(&mock, 3000, &mut retiring).expect("grow");
        assert_ne!(second, first);
        assert_eq!(scratch.capacity(), 4096);
        assert_eq!(retiring.len(), 1);
        assert_eq!(retiring[0].buffer_id(), first);
    }
}
