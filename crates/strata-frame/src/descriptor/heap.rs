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

//! Fixed-capacity descriptor heaps with a reserved low region and a free list above it.

use crate::config::{DescriptorBudgets, HeapBudget};
use crate::error::FrameError;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use strata_core::renderer::{
    DescriptorHeapKind, DescriptorIndex, DescriptorWrite, GraphicsBackend, ResourceHandle,
    ViewKind,
};

/// How a slot is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRequest {
    /// This exact index, which must be free.
    Fixed(u32),
    /// The lowest free index of the dynamic region.
    Auto,
}

/// A written descriptor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor {
    /// Heap the slot lives in.
    pub heap: DescriptorHeapKind,
    /// Slot index.
    pub index: DescriptorIndex,
    /// View written into the slot.
    pub view: ViewKind,
}

#[derive(Debug)]
struct Slots {
    occupied: Vec<bool>,
    /// Free indices of the dynamic region.
    free: BTreeSet<u32>,
}

/// One descriptor heap.
#[derive(Debug)]
pub struct DescriptorHeap {
    backend: Arc<dyn GraphicsBackend>,
    kind: DescriptorHeapKind,
    capacity: u32,
    reserved: u32,
    slots: Mutex<Slots>,
}

impl DescriptorHeap {
    /// Creates a heap. Indices below `budget.reserved` are only handed out on request.
    pub fn new(
        backend: Arc<dyn GraphicsBackend>,
        kind: DescriptorHeapKind,
        budget: HeapBudget,
    ) -> Self {
        assert!(
            budget.reserved <= budget.capacity,
            "{kind:?} heap reserves more slots than it has"
        );
        Self {
            backend,
            kind,
            capacity: budget.capacity,
            reserved: budget.reserved,
            slots: Mutex::new(Slots {
                occupied: vec![false; budget.capacity as usize],
                free: (budget.reserved..budget.capacity).collect(),
            }),
        }
    }

    /// Which heap this is.
    pub fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    /// Total slots.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Free slots left in the dynamic region.
    pub fn available(&self) -> usize {
        self.slots.lock().expect("descriptor heap poisoned").free.len()
    }

    /// Whether `index` is currently written.
    pub fn is_occupied(&self, index: u32) -> bool {
        self.slots
            .lock()
            .expect("descriptor heap poisoned")
            .occupied
            .get(index as usize)
            .copied()
            .unwrap_or(false)
    }

    /// Claims a slot and writes `view` of `resource` into it.
    ///
    /// A fixed index that is already in use is a caller bug: debug builds panic, release
    /// builds log it and rewrite the slot in place.
    ///
    /// # Errors
    ///
    /// `FrameError::DescriptorExhausted` when an auto request finds no free slot. Reserved
    /// slots are never used to satisfy auto requests.
    pub fn request_slot(
        &self,
        request: SlotRequest,
        resource: ResourceHandle,
        view: ViewKind,
    ) -> Result<Descriptor, FrameError> {
        let index = {
            let mut slots = self.slots.lock().expect("descriptor heap poisoned");
            match request {
                SlotRequest::Fixed(index) => {
                    assert!(
                        index < self.capacity,
                        "{:?} slot {index} out of range ({} slots)",
                        self.kind,
                        self.capacity
                    );
                    let occupied = slots.occupied[index as usize];
                    debug_assert!(!occupied, "{:?} slot {index} is already in use", self.kind);
                    if occupied {
                        log::error!(
                            "{:?} slot {index} is already in use; rewriting it for {resource:?}",
                            self.kind
                        );
                    }
                    slots.free.remove(&index);
                    slots.occupied[index as usize] = true;
                    index
                }
                SlotRequest::Auto => {
                    let index = slots.free.pop_first().ok_or(FrameError::DescriptorExhausted {
                        heap: self.kind,
                        capacity: self.capacity,
                    })?;
                    slots.occupied[index as usize] = true;
                    index
                }
            }
        };

        let descriptor = Descriptor {
            heap: self.kind,
            index: DescriptorIndex(index),
            view,
        };
        let write = DescriptorWrite {
            heap: self.kind,
            index: descriptor.index,
            resource,
            view,
        };
        if let Err(e) = self.backend.write_descriptor(&write) {
            self.release_index(index);
            return Err(e.into());
        }
        Ok(descriptor)
    }

    /// Returns a slot to the heap. The caller guarantees the device no longer reads it.
    pub fn free_slot(&self, index: DescriptorIndex) {
        if self.release_index(index.0) {
            self.backend.clear_descriptor(self.kind, index);
        } else {
            log::warn!("{:?} slot {} freed twice", self.kind, index.0);
        }
    }

    fn release_index(&self, index: u32) -> bool {
        let mut slots = self.slots.lock().expect("descriptor heap poisoned");
        let Some(occupied) = slots.occupied.get_mut(index as usize) else {
            return false;
        };
        if !std::mem::replace(occupied, false) {
            return false;
        }
        if index >= self.reserved {
            slots.free.insert(index);
        }
        true
    }
}

/// The shader-resource, render-target and depth-stencil heaps.
#[derive(Debug)]
pub struct DescriptorHeaps {
    heaps: [DescriptorHeap; 3],
}

impl DescriptorHeaps {
    /// Creates the three heaps with the given budgets.
    pub fn new(backend: &Arc<dyn GraphicsBackend>, budgets: &DescriptorBudgets) -> Self {
        let heap = |kind, budget| DescriptorHeap::new(Arc::clone(backend), kind, budget);
        Self {
            heaps: [
                heap(DescriptorHeapKind::ShaderResource, budgets.shader_resource),
                heap(DescriptorHeapKind::RenderTarget, budgets.render_target),
                heap(DescriptorHeapKind::DepthStencil, budgets.depth_stencil),
            ],
        }
    }

    /// One heap by kind.
    pub fn get(&self, kind: DescriptorHeapKind) -> &DescriptorHeap {
        match kind {
            DescriptorHeapKind::ShaderResource => &self.heaps[0],
            DescriptorHeapKind::RenderTarget => &self.heaps[1],
            DescriptorHeapKind::DepthStencil => &self.heaps[2],
        }
    }

    /// Claims a slot in the heap that holds `view` descriptors.
    pub fn request(
        &self,
        request: SlotRequest,
        resource: ResourceHandle,
        view: ViewKind,
    ) -> Result<Descriptor, FrameError> {
        self.get(DescriptorHeapKind::for_view(view))
            .request_slot(request, resource, view)
    }

    /// Returns a descriptor's slot to its heap.
    pub fn free(&self, descriptor: Descriptor) {
        self.get(descriptor.heap).free_slot(descriptor.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::renderer::TextureId;
    use strata_core::testing::MockBackend;

    const TEX: ResourceHandle = ResourceHandle::Texture(TextureId(7));

    fn heap(mock: &MockBackend, capacity: u32, reserved: u32) -> DescriptorHeap {
        DescriptorHeap::new(
            Arc::new(mock.clone()),
            DescriptorHeapKind::ShaderResource,
            HeapBudget::new(capacity, reserved),
        )
    }

    #[test]
    fn test_auto_takes_lowest_free_dynamic_index() {
        let mock = MockBackend::new();
        let heap = heap(&mock, 8, 4);
        let a = heap.request_slot(SlotRequest::Auto, TEX, ViewKind::ShaderRead).expect("slot");
        let b = heap.request_slot(SlotRequest::Auto, TEX, ViewKind::ShaderRead).expect("slot");
        assert_eq!((a.index, b.index), (DescriptorIndex(4), DescriptorIndex(5)));

        heap.free_slot(a.index);
        let c = heap.request_slot(SlotRequest::Auto, TEX, ViewKind::ShaderRead).expect("slot");
        assert_eq!(c.index, DescriptorIndex(4));
    }

    #[test]
    fn test_exhaustion_leaves_reserved_slots_alone() {
        let mock = MockBackend::new();
        let heap = heap(&mock, 6, 4);
        for _ in 0..2 {
            heap.request_slot(SlotRequest::Auto, TEX, ViewKind::ShaderRead)
                .expect("dynamic slot");
        }
        let err = heap
            .request_slot(SlotRequest::Auto, TEX, ViewKind::ShaderRead)
            .expect_err("heap is full");
        assert!(matches!(err, FrameError::DescriptorExhausted { capacity: 6, .. }));
        assert!((0..4).all(|i| !heap.is_occupied(i)));
    }

    #[test]
    fn test_fixed_slot_is_written_and_freed() {
        let mock = MockBackend::new();
        let heap = heap(&mock, 8, 4);
        let d = heap
            .request_slot(SlotRequest::Fixed(2), TEX, ViewKind::ShaderRead)
            .expect("fixed slot");
        assert!(heap.is_occupied(2));
        assert_eq!(
            mock.descriptor(DescriptorHeapKind::ShaderResource, d.index).map(|w| w.resource),
            Some(TEX)
        );
        heap.free_slot(d.index);
        assert!(!heap.is_occupied(2));
        assert_eq!(heap.available(), 4);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "already in use")]
    fn test_fixed_collision_panics_in_debug() {
        let mock = MockBackend::new();
        let heap = heap(&mock, 8, 4);
        let _ = heap.request_slot(SlotRequest::Fixed(1), TEX, ViewKind::ShaderRead);
        let _ = heap.request_slot(SlotRequest::Fixed(1), TEX, ViewKind::ShaderRead);
    }

    #[test]
    fn test_views_route_to_their_heap() {
        let mock = MockBackend::new();
        let backend: Arc<dyn GraphicsBackend> = Arc::new(mock.clone());
        let heaps = DescriptorHeaps::new(&backend, &DescriptorBudgets::default());
        let rt = heaps
            .request(SlotRequest::Auto, TEX, ViewKind::RenderTarget)
            .expect("rt slot");
        let ds = heaps.request(SlotRequest::Auto, TEX, ViewKind::Depth).expect("ds slot");
        assert_eq!(rt.heap, DescriptorHeapKind::RenderTarget);
        assert_eq!(rt.index, DescriptorIndex(8));
        assert_eq!(ds.heap, DescriptorHeapKind::DepthStencil);
        assert_eq!(ds.index, DescriptorIndex(4));
        heaps.free(rt);
        assert_eq!(mock.counters().descriptor_clears, 1);
    }
}
