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

//! Per-frame upload ring for instance and light records.
//!
//! One buffer per frame slot. A slot is only rewritten after the frame that last used
//! it has completed, so the CPU never writes memory the device is reading:
//!
//! ```text
//! Frame N:     [Slot 0: device reads]
//! Frame N+1:   [Slot 1: CPU writes]
//! Frame N+3:   [Slot 0: CPU writes]   frame N's ticket waited on first
//! ```
//!
//! Records are packed at [`UploadRing::ALIGNMENT`] boundaries. A slot that is too small
//! grows to the next power of two, up to a configured limit; the replaced buffer is
//! handed back to the caller for deferred destruction.

use crate::error::FrameError;
use bytemuck::Pod;
use std::borrow::Cow;
use std::ops::Range;
use strata_core::renderer::{BufferDescriptor, BufferId, BufferUsage, GraphicsBackend};

#[derive(Debug)]
struct RingSlot {
    buffer: BufferId,
    capacity: u64,
}

/// A ring of host-written buffers, one per frame slot.
#[derive(Debug)]
pub struct UploadRing {
    slots: Vec<RingSlot>,
    current: usize,
    cursor: u64,
    limit: u64,
    label: &'static str,
}

impl UploadRing {
    /// Offset alignment of every pushed block.
    pub const ALIGNMENT: u64 = 256;

    /// Allocates `slot_count` buffers of `capacity` bytes.
    pub fn new(
        backend: &dyn GraphicsBackend,
        slot_count: usize,
        capacity: u64,
        limit: u64,
        label: &'static str,
    ) -> Result<Self, FrameError> {
        let slots = (0..slot_count)
            .map(|i| {
                Ok(RingSlot {
                    buffer: create_slot_buffer(backend, label, i, capacity)?,
                    capacity,
                })
            })
            .collect::<Result<Vec<_>, FrameError>>()?;
        Ok(Self {
            slots,
            current: 0,
            cursor: 0,
            limit,
            label,
        })
    }

    /// Selects the slot of the frame being recorded and rewinds it.
    pub fn begin_frame(&mut self, slot: usize) {
        self.current = slot % self.slots.len();
        self.cursor = 0;
    }

    /// Bytes `block_sizes` will occupy once aligned.
    pub fn required_bytes(block_sizes: &[u64]) -> u64 {
        block_sizes.iter().map(|&s| align_up(s, Self::ALIGNMENT)).sum()
    }

    /// Grows the current slot so it holds at least `bytes`. Returns the replaced buffer,
    /// which the device may still reference.
    ///
    /// # Errors
    ///
    /// `FrameError::UploadRingFull` when `bytes` exceeds the limit.
    pub fn ensure_capacity(
        &mut self,
        backend: &dyn GraphicsBackend,
        bytes: u64,
    ) -> Result<Option<(BufferId, u64)>, FrameError> {
        let slot = &self.slots[self.current];
        if bytes <= slot.capacity {
            return Ok(None);
        }
        if bytes > self.limit {
            return Err(FrameError::UploadRingFull {
                requested: bytes,
                limit: self.limit,
            });
        }
        let capacity = bytes.next_power_of_two().min(self.limit);
        let buffer = create_slot_buffer(backend, self.label, self.current, capacity)?;
        log::debug!(
            "UploadRing({}) slot {} grew {} -> {} bytes",
            self.label,
            self.current,
            slot.capacity,
            capacity
        );
        let old = std::mem::replace(&mut self.slots[self.current], RingSlot { buffer, capacity });
        Ok(Some((old.buffer, old.capacity)))
    }

    /// Copies `records` into the current slot and returns their byte range.
    pub fn push<T: Pod>(
        &mut self,
        backend: &dyn GraphicsBackend,
        records: &[T],
    ) -> Result<Range<u64>, FrameError> {
        let bytes: &[u8] = bytemuck::cast_slice(records);
        let start = self.cursor;
        let end = start + bytes.len() as u64;
        let slot = &self.slots[self.current];
        if end > slot.capacity {
            return Err(FrameError::UploadRingFull {
                requested: end,
                limit: slot.capacity,
            });
        }
        if !bytes.is_empty() {
            backend.write_buffer(slot.buffer, start, bytes)?;
        }
        self.cursor = align_up(end, Self::ALIGNMENT);
        Ok(start..end)
    }

    /// The buffer of the current slot.
    pub fn current_buffer(&self) -> BufferId {
        self.slots[self.current].buffer
    }

    /// Capacity of the current slot.
    pub fn current_capacity(&self) -> u64 {
        self.slots[self.current].capacity
    }

    /// Number of slots.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Destroys every slot buffer. The device must be idle.
    pub fn destroy(&self, backend: &dyn GraphicsBackend) {
        for slot in &self.slots {
            if let Err(e) = backend.destroy_buffer(slot.buffer) {
                log::warn!("UploadRing({}): failed to destroy buffer: {e}", self.label);
            }
        }
    }
}

fn create_slot_buffer(
    backend: &dyn GraphicsBackend,
    label: &'static str,
    slot: usize,
    capacity: u64,
) -> Result<BufferId, FrameError> {
    let label = match slot {
        0 => Cow::Borrowed(label),
        _ => Cow::Owned(format!("{label} [slot {slot}]")),
    };
    Ok(backend.create_buffer(&BufferDescriptor {
        label: Some(label),
        size: capacity,
        usage: BufferUsage::UPLOAD | BufferUsage::STORAGE,
    })?)
}

#[inline]
fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}
