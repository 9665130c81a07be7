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

use crate::renderer::api::*;
use crate::renderer::error::ResourceError;

/// Records GPU work for one queue.
///
/// A list is owned by exactly one in-flight frame; it is consumed by
/// [`finish`](CommandList::finish) and becomes a [`CommandListId`] for submission.
pub trait CommandList: Send {
    /// The queue kind this list records for.
    fn queue(&self) -> QueueKind;

    /// Records barriers, in order.
    fn resource_barriers(&mut self, barriers: &[ResourceBarrier]);

    /// Copies `size` bytes between buffers.
    fn copy_buffer_to_buffer(
        &mut self,
        src: BufferId,
        src_offset: u64,
        dst: BufferId,
        dst_offset: u64,
        size: u64,
    );

    /// Begins a render pass. Must be paired with [`end_render_pass`](CommandList::end_render_pass).
    fn begin_render_pass(&mut self, descriptor: &PassDescriptor<'_>);

    /// Binds the pipeline used by subsequent draws or dispatches.
    fn set_pipeline(&mut self, pipeline: PipelineKey);

    /// Draws indexed geometry.
    fn draw_indexed(&mut self, draw: &DrawIndexed);

    /// Draws non-indexed vertices (e.g. a fullscreen triangle).
    fn draw(&mut self, vertices: std::ops::Range<u32>, instances: std::ops::Range<u32>);

    /// Ends the current render pass.
    fn end_render_pass(&mut self);

    /// Dispatches compute work groups with the bound pipeline.
    fn dispatch(&mut self, groups: [u32; 3]);

    /// Builds or refits a bottom-level structure.
    fn build_blas(&mut self, build: &BlasBuild<'_>);

    /// Builds or refits a top-level structure.
    fn build_tlas(&mut self, build: &TlasBuild<'_>);

    /// Writes a GPU timestamp into query slot `slot`.
    fn write_timestamp(&mut self, slot: u32);

    /// Resolves query slots `first..first + count` so they can be read back.
    fn resolve_timestamps(&mut self, first: u32, count: u32);

    /// Opens a named debug region.
    fn push_debug_group(&mut self, label: &str);

    /// Closes the innermost debug region.
    fn pop_debug_group(&mut self);

    /// Closes the list.
    fn finish(self: Box<Self>) -> Result<CommandListId, ResourceError>;
}
