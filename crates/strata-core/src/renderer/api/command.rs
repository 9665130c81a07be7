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

//! Types describing recorded GPU work: allocators, command lists, passes and draws.

use super::resource::{BufferId, TextureId};
use std::ops::Range;

/// Backing memory for command lists of one queue kind. Must not be reset while any
/// list recorded from it may still be executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AllocatorId(pub u64);

/// A finished command list, ready for submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandListId(pub u64);

/// Names a pipeline registered with the backend. Backends that know nothing about
/// a key skip the work that needs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineKey(pub &'static str);

/// What happens to an attachment's contents at the start of a pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOp<V> {
    /// Clear to the given value.
    Clear(V),
    /// Keep the previous contents.
    Load,
}

/// A color attachment of a render pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorAttachment {
    /// Target texture.
    pub texture: TextureId,
    /// Load behaviour.
    pub load: LoadOp<[f32; 4]>,
    /// Whether results are kept after the pass.
    pub store: bool,
}

/// The depth attachment of a render pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthAttachment {
    /// Target texture.
    pub texture: TextureId,
    /// Load behaviour.
    pub load: LoadOp<f32>,
    /// Whether results are kept after the pass.
    pub store: bool,
    /// Depth is tested but never written.
    pub read_only: bool,
}

/// Describes a render pass.
#[derive(Debug, Clone, Copy)]
pub struct PassDescriptor<'a> {
    /// Debug label.
    pub label: &'a str,
    /// Color attachments, in slot order.
    pub colors: &'a [ColorAttachment],
    /// Optional depth attachment.
    pub depth: Option<DepthAttachment>,
}

/// Index element width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    /// 16-bit indices.
    Uint16,
    /// 32-bit indices.
    Uint32,
}

impl IndexFormat {
    /// Size of one index in bytes.
    pub const fn size(self) -> u64 {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }
}

/// An indexed draw of one mesh subset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawIndexed {
    /// Vertex input.
    pub vertex_buffer: BufferId,
    /// Index input.
    pub index_buffer: BufferId,
    /// Index width.
    pub index_format: IndexFormat,
    /// Range of indices to draw.
    pub indices: Range<u32>,
    /// Value added to every index.
    pub base_vertex: i32,
    /// First instance; selects the per-instance parameter record.
    pub first_instance: u32,
}
