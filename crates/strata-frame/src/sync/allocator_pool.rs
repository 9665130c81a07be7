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

//! Fence-gated recycling of command allocators.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use strata_core::renderer::{AllocatorId, GraphicsBackend, QueueKind, ResourceError, Ticket};

/// Command allocators of one queue kind, recycled once their last submission is
/// known complete.
///
/// Retired allocators wait in a FIFO ordered by ticket, so only the front entry ever
/// needs checking. The mutex covers the FIFO alone; backend calls happen outside it.
#[derive(Debug)]
pub struct CommandAllocatorPool {
    backend: Arc<dyn GraphicsBackend>,
    queue: QueueKind,
    retired: Mutex<VecDeque<(Ticket, AllocatorId)>>,
}

impl CommandAllocatorPool {
    /// Creates an empty pool for `queue`.
    pub fn new(backend: Arc<dyn GraphicsBackend>, queue: QueueKind) -> Self {
        Self {
            backend,
            queue,
            retired: Mutex::new(VecDeque::new()),
        }
    }

    /// Returns a reset allocator, reusing the oldest retired one if `last_completed`
    /// covers its ticket and creating a new one otherwise.
    pub fn request_allocator(&self, last_completed: Ticket) -> Result<AllocatorId, ResourceError> {
        let reusable = {
            let mut retired = self.retired.lock().expect("allocator pool poisoned");
            match retired.front() {
                Some(&(ticket, _)) if ticket <= last_completed => retired.pop_front(),
                _ => None,
            }
        };

        if let Some((ticket, allocator)) = reusable {
            if let Err(e) = self.backend.reset_command_allocator(allocator) {
                // A failed reset leaves the allocator unusable.
                if let Err(destroy) = self.backend.destroy_command_allocator(allocator) {
                    log::warn!("Failed to destroy {:?} allocator {allocator:?}: {destroy}", self.queue);
                }
                return Err(e);
            }
            log::trace!("{:?} allocator {allocator:?} reused after {ticket}", self.queue);
            return Ok(allocator);
        }

        let allocator = self.backend.create_command_allocator(self.queue)?;
        log::debug!("{:?} pool created allocator {allocator:?}", self.queue);
        Ok(allocator)
    }

    /// Hands back an allocator whose last submission signals `ticket`.
    ///
    /// # Panics
    ///
    /// If `ticket` is older than the last discarded ticket.
    pub fn discard_allocator(&self, ticket: Ticket, allocator: AllocatorId) {
        let mut retired = self.retired.lock().expect("allocator pool poisoned");
        if let Some(&(newest, _)) = retired.back() {
            assert!(
                ticket >= newest,
                "allocators must be discarded in ticket order: {ticket} after {newest}"
            );
        }
        retired.push_back((ticket, allocator));
    }

    /// Number of allocators waiting for reuse.
    pub fn retired_len(&self) -> usize {
        self.retired.lock().expect("allocator pool poisoned").len()
    }

    /// Destroys every retired allocator. Call only once the queue is idle.
    pub fn destroy_all(&self) {
        let drained: Vec<_> = self
            .retired
            .lock()
            .expect("allocator pool poisoned")
            .drain(..)
            .collect();
        for (_, allocator) in drained {
            if let Err(e) = self.backend.destroy_command_allocator(allocator) {
                log::warn!("Failed to destroy {:?} allocator {allocator:?}: {e}", self.queue);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::testing::MockBackend;

    fn pool(mock: &MockBackend) -> CommandAllocatorPool {
        CommandAllocatorPool::new(Arc::new(mock.clone()), QueueKind::Graphics)
    }

    #[test]
    fn test_allocator_not_reused_before_completion() {
        let mock = MockBackend::new();
        let pool = pool(&mock);
        let first = pool.request_allocator(Ticket::NONE).expect("create");
        pool.discard_allocator(Ticket(4), first);

        let second = pool.request_allocator(Ticket(3)).expect("create");
        assert_ne!(second, first);
        assert_eq!(mock.counters().allocators_created, 2);

        let third = pool.request_allocator(Ticket(4)).expect("reuse");
        assert_eq!(third, first);
        assert_eq!(mock.counters().allocator_resets, 1);
    }

    #[test]
    fn test_oldest_allocator_is_reused_first() {
        let mock = MockBackend::new();
        let pool = pool(&mock);
        let a = pool.request_allocator(Ticket::NONE).expect("create");
        let b = pool.request_allocator(Ticket::NONE).expect("create");
        pool.discard_allocator(Ticket(1), a);
        pool.discard_allocator(Ticket(2), b);
        assert_eq!(pool.request_allocator(Ticket(10)).expect("reuse"), a);
        assert_eq!(pool.request_allocator(Ticket(10)).expect("reuse"), b);
    }

    #[test]
    #[should_panic(expected = "ticket order")]
    fn test_out_of_order_discard_panics() {
        let mock = MockBackend::new();
        let pool = pool(&mock);
        let a = pool.request_allocator(Ticket::NONE).expect("create");
        let b = pool.request_allocator(Ticket::NONE).expect("create");
        pool.discard_allocator(Ticket(5), a);
        pool.discard_allocator(Ticket(3), b);
    }

    #[test]
    fn test_failed_reset_destroys_the_allocator() {
        let mock = MockBackend::new();
        let pool = pool(&mock);
        let a = pool.request_allocator(Ticket::NONE).expect("create");
        pool.discard_allocator(Ticket(1), a);

        mock.fail_next_allocator_reset();
        assert!(pool.request_allocator(Ticket(1)).is_err());
        assert_eq!(pool.retired_len(), 0);
        assert_eq!(mock.live_allocators(), 0);

        let b = pool.request_allocator(Ticket(1)).expect("create");
        assert_ne!(b, a);
    }

    #[test]
    fn test_destroy_all_empties_the_pool() {
        let mock = MockBackend::new();
        let pool = pool(&mock);
        let a = pool.request_allocator(Ticket::NONE).expect("create");
        pool.discard_allocator(Ticket(1), a);
        pool.destroy_all();
        assert_eq!(pool.retired_len(), 0);
        assert_eq!(mock.live_allocators(), 0);
    }
}
