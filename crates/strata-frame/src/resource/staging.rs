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

//! Deferred destruction of resources the device may still be using.

use crate::descriptor::{Descriptor, DescriptorHeaps};
use crate::sync::QueueSet;
use std::collections::BTreeMap;
use std::sync::Arc;
use strata_core::renderer::{AccelStructId, BufferId, GraphicsBackend, QueueKind, TextureId, Ticket};

/// Upload buffers kept per byte size.
const MAX_POOLED_PER_SIZE: usize = 4;

/// Something waiting for its last use to complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retired {
    /// A buffer; reusable upload buffers return to the size-keyed pool.
    Buffer {
        /// The buffer.
        id: BufferId,
        /// Its size in bytes.
        size: u64,
        /// Whether it may be handed out again by [`StagingPool::acquire_upload`].
        reusable: bool,
    },
    /// A texture.
    Texture(TextureId),
    /// An acceleration structure.
    AccelStruct(AccelStructId),
    /// A descriptor slot.
    Descriptor(Descriptor),
}

/// What one sweep released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Items destroyed or freed.
    pub released: usize,
    /// Upload buffers returned to the reuse pool.
    pub pooled: usize,
}

/// Holds retired resources keyed by (queue, ticket) until the ticket completes.
#[derive(Debug)]
pub struct StagingPool {
    backend: Arc<dyn GraphicsBackend>,
    pending: Vec<(QueueKind, Ticket, Retired)>,
    uploads: BTreeMap<u64, Vec<BufferId>>,
}

impl StagingPool {
    /// Creates an empty pool.
    pub fn new(backend: Arc<dyn GraphicsBackend>) -> Self {
        Self {
            backend,
            pending: Vec::new(),
            uploads: BTreeMap::new(),
        }
    }

    /// Holds `item` until `ticket` completes on `queue`.
    pub fn retire(&mut self, queue: QueueKind, ticket: Ticket, item: Retired) {
        log::trace!("Retiring {item:?} until {queue:?} {ticket}");
        self.pending.push((queue, ticket, item));
    }

    /// Number of items still waiting.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of upload buffers ready for reuse.
    pub fn pooled_uploads(&self) -> usize {
        self.uploads.values().map(Vec::len).sum()
    }

    /// Takes a pooled upload buffer of exactly `size` bytes.
    pub fn acquire_upload(&mut self, size: u64) -> Option<BufferId> {
        let buffers = self.uploads.get_mut(&size)?;
        let id = buffers.pop();
        if buffers.is_empty() {
            self.uploads.remove(&size);
        }
        id
    }

    /// Releases every item whose ticket has completed.
    pub fn sweep(&mut self, queues: &QueueSet, heaps: &DescriptorHeaps) -> SweepStats {
        let (done, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|(queue, ticket, _)| queues.get(*queue).is_complete(*ticket));
        self.pending = waiting;

        let mut stats = SweepStats::default();
        for (_, _, item) in done {
            if self.release(item, heaps) {
                stats.pooled += 1;
            } else {
                stats.released += 1;
            }
        }
        if stats != SweepStats::default() {
            log::debug!(
                "Staging sweep released {} item(s), pooled {} upload buffer(s), {} pending",
                stats.released,
                stats.pooled,
                self.pending.len()
            );
        }
        stats
    }

    /// Releases everything immediately, pooled uploads included. Call only once every
    /// queue is idle.
    pub fn drain(&mut self, heaps: &DescriptorHeaps) {
        for (_, _, item) in std::mem::take(&mut self.pending) {
            let item = match item {
                Retired::Buffer { id, size, .. } => Retired::Buffer {
                    id,
                    size,
                    reusable: false,
                },
                other => other,
            };
            self.release(item, heaps);
        }
        for id in std::mem::take(&mut self.uploads).into_values().flatten() {
            self.destroy_buffer(id);
        }
    }

    /// Returns `true` when the item went back to the upload pool.
    fn release(&mut self, item: Retired, heaps: &DescriptorHeaps) -> bool {
        match item {
            Retired::Buffer {
                id,
                size,
                reusable: true,
            } => {
                let pooled = self.uploads.entry(size).or_default();
                if pooled.len() < MAX_POOLED_PER_SIZE {
                    pooled.push(id);
                    return true;
                }
                self.destroy_buffer(id);
            }
            Retired::Buffer { id, .. } => self.destroy_buffer(id),
            Retired::Texture(id) => {
                if let Err(e) = self.backend.destroy_texture(id) {
                    log::warn!("Failed to destroy texture {id:?}: {e}");
                }
            }
            Retired::AccelStruct(id) => {
                if let Err(e) = self.backend.destroy_accel_struct(id) {
                    log::warn!("Failed to destroy acceleration structure {id:?}: {e}");
                }
            }
            Retired::Descriptor(descriptor) => heaps.free(descriptor),
        }
        false
    }

    fn destroy_buffer(&self, id: BufferId) {
        if let Err(e) = self.backend.destroy_buffer(id) {
            log::warn!("Failed to destroy buffer {id:?}: {e}");
        }
    }
}
