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

use super::description::GpuTimings;
use crate::sync::FenceQueue;
use strata_core::renderer::{BackendCapabilities, CommandList, GraphicsBackend, Ticket};

const QUERIES_PER_FRAME: u32 = 4;
const FRAME_START: u32 = 0;
const MAIN_BEGIN: u32 = 1;
const MAIN_END: u32 = 2;
const FRAME_END: u32 = 3;

/// GpuScopeProfiler brackets each frame and its main lighting pass with timestamps.
///
/// Each frame slot owns four consecutive query slots:
///   `slot * 4 + 0` frame start, `+ 1` main pass begin, `+ 2` main pass end, `+ 3` frame end.
/// Queries are resolved at frame end and read back once the frame's ticket completes,
/// which is at the latest when the slot comes around again.
/// Durations derived:
///   main_pass = main_end - main_begin
///   frame_total = frame_end - frame_start
#[derive(Debug)]
pub struct GpuScopeProfiler {
    enabled: bool,
    period_ns: f32,
    current_slot: usize,
    /// Ticket of the frame whose queries each slot holds, until read back.
    in_flight: Vec<Option<Ticket>>,
    smooth_main_pass_ms: f32,
    smooth_frame_total_ms: f32,
    ema_alpha: f32,
    last_raw: Option<[u64; 4]>,
}

impl GpuScopeProfiler {
    /// Creates a profiler for `slot_count` frame slots. It stays disabled when not
    /// `requested`, when the backend lacks timestamps or when its query capacity is
    /// too small.
    pub fn new(capabilities: &BackendCapabilities, slot_count: usize, requested: bool) -> Self {
        let needed = slot_count as u32 * QUERIES_PER_FRAME;
        let enabled = requested
            && capabilities.timestamp_queries
            && capabilities.timestamp_capacity >= needed;
        if requested && !enabled {
            log::warn!(
                "GPU timestamps unavailable (supported: {}, capacity {} < {needed}); profiling disabled",
                capabilities.timestamp_queries,
                capabilities.timestamp_capacity
            );
        } else if enabled {
            log::info!(
                "GPU timestamp profiler enabled, period {:.3} ns",
                capabilities.timestamp_period_ns
            );
        }
        Self {
            enabled,
            period_ns: capabilities.timestamp_period_ns,
            current_slot: 0,
            in_flight: vec![None; slot_count],
            smooth_main_pass_ms: 0.0,
            smooth_frame_total_ms: 0.0,
            ema_alpha: 0.2,
            last_raw: None,
        }
    }

    /// Whether timestamps are recorded.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Writes the frame-start timestamp of `slot`.
    pub fn begin_frame(&mut self, list: &mut dyn CommandList, slot: usize) {
        self.current_slot = slot;
        self.write(list, FRAME_START);
    }

    /// Marks the start of the main lighting pass.
    pub fn main_pass_begin(&self, list: &mut dyn CommandList) {
        self.write(list, MAIN_BEGIN);
    }

    /// Marks the end of the main lighting pass.
    pub fn main_pass_end(&self, list: &mut dyn CommandList) {
        self.write(list, MAIN_END);
    }

    /// Writes the frame-end timestamp and resolves the slot's four queries.
    pub fn end_frame(&self, list: &mut dyn CommandList) {
        if self.enabled {
            self.write(list, FRAME_END);
            list.resolve_timestamps(self.base(), QUERIES_PER_FRAME);
        }
    }

    /// Records the ticket the current slot's queries complete with.
    pub fn mark_submitted(&mut self, ticket: Ticket) {
        if self.enabled {
            self.in_flight[self.current_slot] = Some(ticket);
        }
    }

    /// Reads back every slot whose frame has completed on `queue` and folds the
    /// durations into the smoothed timings.
    pub fn collect(&mut self, backend: &dyn GraphicsBackend, queue: &FenceQueue) {
        if !self.enabled {
            return;
        }
        for slot in 0..self.in_flight.len() {
            let Some(ticket) = self.in_flight[slot] else {
                continue;
            };
            if !queue.is_complete(ticket) {
                continue;
            }
            self.in_flight[slot] = None;
            let base = slot as u32 * QUERIES_PER_FRAME;
            match backend.read_timestamps(base, QUERIES_PER_FRAME) {
                Some(values) if values.len() == QUERIES_PER_FRAME as usize => {
                    self.accumulate([values[0], values[1], values[2], values[3]]);
                }
                _ => log::warn!("GPU timestamps of frame slot {slot} were not resolved"),
            }
        }
    }

    /// Smoothed timings; zero until the first readback.
    pub fn timings(&self) -> GpuTimings {
        GpuTimings {
            frame_ms: self.smooth_frame_total_ms,
            main_pass_ms: self.smooth_main_pass_ms,
        }
    }

    /// The last raw timestamps read back.
    pub fn last_raw(&self) -> Option<[u64; 4]> {
        self.last_raw
    }

    fn accumulate(&mut self, timestamps: [u64; 4]) {
        self.last_raw = Some(timestamps);
        let [frame_start, main_begin, main_end, frame_end] = timestamps;
        if main_end < main_begin || frame_end <= frame_start {
            return;
        }
        let to_ms = |ticks: u64| ticks as f32 * self.period_ns / 1_000_000.0;
        let raw_main_pass_ms = to_ms(main_end - main_begin);
        let raw_frame_total_ms = to_ms(frame_end - frame_start);

        let a = self.ema_alpha;
        self.smooth_main_pass_ms = if self.smooth_main_pass_ms == 0.0 {
            raw_main_pass_ms
        } else {
            a * raw_main_pass_ms + (1.0 - a) * self.smooth_main_pass_ms
        };
        self.smooth_frame_total_ms = if self.smooth_frame_total_ms == 0.0 {
            raw_frame_total_ms
        } else {
            a * raw_frame_total_ms + (1.0 - a) * self.smooth_frame_total_ms
        };
    }

    #[inline]
    fn base(&self) -> u32 {
        self.current_slot as u32 * QUERIES_PER_FRAME
    }

    fn write(&self, list: &mut dyn CommandList, query: u32) {
        if self.enabled {
            list.write_timestamp(self.base() + query);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::sync::Arc;
    use std::time::Duration;
    use strata_core::renderer::QueueKind;
    use strata_core::testing::{MockBackend, MockConfig};

    #[test]
    fn test_disabled_without_timestamp_support() {
        let mock = MockBackend::with_config(MockConfig {
            timestamps: false,
            ..Default::default()
        });
        let profiler = GpuScopeProfiler::new(&mock.capabilities(), 3, true);
        assert!(!profiler.is_enabled());
    }

    #[test]
    fn test_timings_follow_completed_frames() {
        let mock = MockBackend::with_manual_completion();
        let backend: Arc<dyn GraphicsBackend> = Arc::new(mock.clone());
        let queue = FenceQueue::new(backend.clone(), QueueKind::Graphics, Duration::from_millis(50));
        let mut profiler = GpuScopeProfiler::new(&backend.capabilities(), 3, true);
        assert!(profiler.is_enabled());

        let allocator = backend
            .create_command_allocator(QueueKind::Graphics)
            .expect("allocator");
        let mut list = backend
            .begin_command_list(QueueKind::Graphics, allocator, None)
            .expect("list");
        profiler.begin_frame(list.as_mut(), 1);
        profiler.main_pass_begin(list.as_mut());
        profiler.main_pass_end(list.as_mut());
        profiler.end_frame(list.as_mut());
        let id = list.finish().expect("finish");
        let ticket = queue.submit(&[id]).expect("submit");
        profiler.mark_submitted(ticket);

        profiler.collect(backend.as_ref(), &queue);
        assert_eq!(profiler.timings(), GpuTimings::default());

        mock.complete_up_to(QueueKind::Graphics, ticket);
        profiler.collect(backend.as_ref(), &queue);
        // The mock clock advances 1000 ns per timestamp.
        assert_relative_eq!(profiler.timings().frame_ms, 0.003, epsilon = 1e-6);
        assert_relative_eq!(profiler.timings().main_pass_ms, 0.001, epsilon = 1e-6);
    }

    #[test]
    fn test_ema_smoothing() {
        let mock = MockBackend::new();
        let mut profiler = GpuScopeProfiler::new(&mock.capabilities(), 1, true);
        profiler.accumulate([0, 0, 1_000_000, 10_000_000]);
        profiler.accumulate([0, 0, 1_000_000, 20_000_000]);
        assert_relative_eq!(profiler.timings().frame_ms, 0.2 * 20.0 + 0.8 * 10.0);
        assert_relative_eq!(profiler.timings().main_pass_ms, 1.0);
    }
}
