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

//! Monotonic completion tickets per queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use strata_core::renderer::{CommandListId, GraphicsBackend, QueueKind, ResourceError, Ticket};

/// One device queue with its completion counter.
///
/// The counter starts at 1. `submit` signals the current value and returns it, so the
/// first submission yields `Ticket(1)` and `Ticket::NONE` is always complete.
#[derive(Debug)]
pub struct FenceQueue {
    backend: Arc<dyn GraphicsBackend>,
    kind: QueueKind,
    /// Value the next submission will signal. Held across the backend call so tickets
    /// reach the device in submission order.
    next_value: Mutex<u64>,
    /// Cached last completed value; only ever grows.
    last_completed: AtomicU64,
    timeout: Duration,
}

impl FenceQueue {
    /// Creates the tracker for `kind`. Waits longer than `timeout` are reported.
    pub fn new(backend: Arc<dyn GraphicsBackend>, kind: QueueKind, timeout: Duration) -> Self {
        Self {
            backend,
            kind,
            next_value: Mutex::new(1),
            last_completed: AtomicU64::new(0),
            timeout,
        }
    }

    /// The queue this tracker submits to.
    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    /// Submits finished command lists and returns the ticket they signal.
    ///
    /// A failed submission does not consume a ticket.
    pub fn submit(&self, lists: &[CommandListId]) -> Result<Ticket, ResourceError> {
        let mut next = self.next_value.lock().expect("fence counter poisoned");
        let ticket = Ticket(*next);
        self.backend.submit(self.kind, lists, ticket)?;
        *next += 1;
        log::trace!("{:?} queue submitted {} list(s) as {ticket}", self.kind, lists.len());
        Ok(ticket)
    }

    /// The most recently issued ticket, or `Ticket::NONE` before any submission.
    pub fn last_issued(&self) -> Ticket {
        Ticket(*self.next_value.lock().expect("fence counter poisoned") - 1)
    }

    /// Queries the device and returns the last completed ticket.
    pub fn last_completed(&self) -> Ticket {
        let reported = self.backend.completed_ticket(self.kind).value();
        let previous = self.last_completed.fetch_max(reported, Ordering::AcqRel);
        Ticket(previous.max(reported))
    }

    /// Whether `ticket` has completed. Only queries the device when the cached value
    /// is older than `ticket`.
    pub fn is_complete(&self, ticket: Ticket) -> bool {
        if ticket.value() <= self.last_completed.load(Ordering::Acquire) {
            return true;
        }
        self.last_completed() >= ticket
    }

    /// Blocks until `ticket` completes.
    ///
    /// # Panics
    ///
    /// If `ticket` was never issued on this queue.
    pub fn wait_for(&self, ticket: Ticket) {
        let issued = self.last_issued();
        assert!(
            ticket <= issued,
            "waiting on {ticket} but {:?} queue has only issued up to {issued}",
            self.kind
        );
        while !self.is_complete(ticket) {
            if !self.backend.wait_for_ticket(self.kind, ticket, self.timeout) {
                log::warn!(
                    "{:?} queue: {ticket} still pending after {:?} (last completed {})",
                    self.kind,
                    self.timeout,
                    self.last_completed()
                );
            }
        }
    }

    /// Blocks until every issued ticket has completed.
    pub fn wait_idle(&self) {
        let issued = self.last_issued();
        if issued != Ticket::NONE {
            self.wait_for(issued);
        }
    }
}

/// The graphics, compute and copy queues of one device.
#[derive(Debug)]
pub struct QueueSet {
    queues: [FenceQueue; QueueKind::COUNT],
}

impl QueueSet {
    /// Creates trackers for all three queue kinds.
    pub fn new(backend: &Arc<dyn GraphicsBackend>, timeout: Duration) -> Self {
        Self {
            queues: QueueKind::ALL.map(|kind| FenceQueue::new(Arc::clone(backend), kind, timeout)),
        }
    }

    /// The tracker of one queue.
    #[inline]
    pub fn get(&self, kind: QueueKind) -> &FenceQueue {
        &self.queues[kind.index()]
    }

    /// Blocks until all queues are idle.
    pub fn wait_idle_all(&self) {
        for queue in &self.queues {
            queue.wait_idle();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::testing::MockBackend;

    fn queue(mock: &MockBackend) -> FenceQueue {
        FenceQueue::new(
            Arc::new(mock.clone()),
            QueueKind::Graphics,
            Duration::from_millis(50),
        )
    }

    #[test]
    fn test_tickets_start_at_one_and_increase() {
        let mock = MockBackend::new();
        let queue = queue(&mock);
        assert_eq!(queue.last_issued(), Ticket::NONE);
        assert_eq!(queue.submit(&[]).expect("submit"), Ticket(1));
        assert_eq!(queue.submit(&[]).expect("submit"), Ticket(2));
        assert_eq!(queue.last_issued(), Ticket(2));
    }

    #[test]
    fn test_none_is_always_complete() {
        let mock = MockBackend::with_manual_completion();
        let queue = queue(&mock);
        assert!(queue.is_complete(Ticket::NONE));
    }

    #[test]
    fn test_failed_submit_keeps_the_ticket() {
        let mock = MockBackend::new();
        let queue = queue(&mock);
        mock.fail_next_submit();
        assert!(queue.submit(&[]).is_err());
        assert_eq!(queue.submit(&[]).expect("submit"), Ticket(1));
    }

    #[test]
    fn test_cached_completion_skips_the_device() {
        let mock = MockBackend::new();
        let queue = queue(&mock);
        let ticket = queue.submit(&[]).expect("submit");
        assert!(queue.is_complete(ticket));
        let queries = mock.counters().completion_queries;
        assert!(queue.is_complete(ticket));
        assert!(queue.is_complete(Ticket::NONE));
        assert_eq!(mock.counters().completion_queries, queries);
    }

    #[test]
    fn test_completion_follows_submission_order() {
        let mock = MockBackend::with_manual_completion();
        let queue = queue(&mock);
        let t1 = queue.submit(&[]).expect("submit");
        let t2 = queue.submit(&[]).expect("submit");
        assert!(!queue.is_complete(t1));
        mock.complete_up_to(QueueKind::Graphics, t2);
        assert!(queue.is_complete(t2));
        assert!(queue.is_complete(t1));
    }

    #[test]
    #[should_panic(expected = "only issued up to")]
    fn test_waiting_on_unissued_ticket_panics() {
        let mock = MockBackend::new();
        queue(&mock).wait_for(Ticket(5));
    }

    #[test]
    fn test_wait_survives_timeouts() {
        let mock = MockBackend::with_manual_completion();
        let queue = queue(&mock);
        let ticket = queue.submit(&[]).expect("submit");
        let completer = mock.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(120));
            completer.complete_up_to(QueueKind::Graphics, ticket);
        });
        queue.wait_for(ticket);
        assert!(queue.is_complete(ticket));
        handle.join().expect("completer thread");
    }
}
