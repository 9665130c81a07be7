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

//! Defines GPU resource handles, creation descriptors and access states.

use super::accel::AccelStructId;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// An opaque handle to a GPU buffer.
///
/// Returned by [`GraphicsBackend::create_buffer`](crate::renderer::traits::GraphicsBackend::create_buffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

/// An opaque handle to a GPU texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

/// Any object whose access state can be tracked and transitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceHandle {
    /// A buffer resource.
    Buffer(BufferId),
    /// A texture resource.
    Texture(TextureId),
    /// An acceleration structure.
    AccelStruct(AccelStructId),
}

bitflags! {
    /// Allowed usages of a buffer. The backend picks the memory heap from these.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// CPU-writable staging memory.
        const UPLOAD = 1 << 0;
        /// CPU-readable readback memory.
        const READBACK = 1 << 1;
        /// Source of a copy.
        const COPY_SRC = 1 << 2;
        /// Destination of a copy.
        const COPY_DST = 1 << 3;
        /// Bound as vertex input.
        const VERTEX = 1 << 4;
        /// Bound as index input.
        const INDEX = 1 << 5;
        /// Bound as constants.
        const CONSTANT = 1 << 6;
        /// Read/write structured storage.
        const STORAGE = 1 << 7;
        /// Indirect arguments.
        const INDIRECT = 1 << 8;
        /// Geometry input of an acceleration-structure build. Backends keep these
        /// readable for host-side builds.
        const ACCEL_INPUT = 1 << 9;
        /// Scratch memory for acceleration-structure builds.
        const ACCEL_SCRATCH = 1 << 10;
        /// Destination of resolved queries.
        const QUERY_RESOLVE = 1 << 11;
    }
}

bitflags! {
    /// Allowed usages of a texture.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Sampled from shaders.
        const SHADER_READ = 1 << 0;
        /// Bound as a color attachment.
        const RENDER_TARGET = 1 << 1;
        /// Bound as a depth attachment.
        const DEPTH_STENCIL = 1 << 2;
        /// Read/write storage image.
        const UNORDERED_ACCESS = 1 << 3;
        /// Source of a copy.
        const COPY_SRC = 1 << 4;
        /// Destination of a copy.
        const COPY_DST = 1 << 5;
    }
}

/// Texel formats used by the frame manager's targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureFormat {
    /// 8-bit normalized RGBA.
    Rgba8Unorm,
    /// 8-bit normalized RGBA, sRGB encoded.
    Rgba8UnormSrgb,
    /// 16-bit float RGBA; used for HDR lighting.
    Rgba16Float,
    /// 32-bit float RGBA.
    Rgba32Float,
    /// 32-bit float single channel.
    R32Float,
    /// 32-bit float depth.
    Depth32Float,
}

impl TextureFormat {
    /// Size of one texel in bytes.
    pub const fn bytes_per_texel(self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
            TextureFormat::R32Float | TextureFormat::Depth32Float => 4,
        }
    }

    /// `true` for depth formats.
    pub const fn is_depth(self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }
}

/// A descriptor used to create a [`BufferId`].
#[derive(Debug, Clone)]
pub struct BufferDescriptor<'a> {
    /// An optional debug label for the buffer.
    pub label: Option<Cow<'a, str>>,
    /// The total size of the buffer in bytes.
    pub size: u64,
    /// How the buffer will be used.
    pub usage: BufferUsage,
}

/// A descriptor used to create a 2D [`TextureId`].
#[derive(Debug, Clone)]
pub struct TextureDescriptor<'a> {
    /// An optional debug label for the texture.
    pub label: Option<Cow<'a, str>>,
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Texel format.
    pub format: TextureFormat,
    /// How the texture will be used.
    pub usage: TextureUsage,
}

/// Logical role of a tracked resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Vertex data.
    Vertex,
    /// Index data.
    Index,
    /// Shader constants.
    Constant,
    /// A sampled or attached texture.
    Texture,
    /// CPU-visible staging memory.
    Upload,
    /// Acceleration-structure build scratch.
    Scratch,
    /// Read/write structured storage.
    Storage,
    /// An acceleration structure.
    AccelStruct,
}

bitflags! {
    /// The access state a resource is in. Transitions between two different states
    /// require a barrier; read states may be combined.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceState: u32 {
        /// Read as vertex input or constants.
        const VERTEX_AND_CONSTANT = 1 << 0;
        /// Read as index input.
        const INDEX = 1 << 1;
        /// Written as a color attachment.
        const RENDER_TARGET = 1 << 2;
        /// Read/written as storage.
        const UNORDERED_ACCESS = 1 << 3;
        /// Written as a depth attachment.
        const DEPTH_WRITE = 1 << 4;
        /// Read-only depth attachment or depth sampling.
        const DEPTH_READ = 1 << 5;
        /// Read by non-pixel shader stages.
        const NON_PIXEL_SHADER_READ = 1 << 6;
        /// Read by pixel shaders.
        const PIXEL_SHADER_READ = 1 << 7;
        /// Destination of a copy.
        const COPY_DEST = 1 << 8;
        /// Source of a copy.
        const COPY_SOURCE = 1 << 9;
        /// Acceleration-structure storage, readable by ray queries.
        const ACCEL_STRUCT = 1 << 10;
        /// Handed to presentation.
        const PRESENT = 1 << 11;

        /// Any shader stage may read.
        const ALL_SHADER_READ = Self::NON_PIXEL_SHADER_READ.bits() | Self::PIXEL_SHADER_READ.bits();
        /// Mesh geometry consumed by draws and acceleration-structure builds.
        const GEOMETRY_READ = Self::VERTEX_AND_CONSTANT.bits()
            | Self::INDEX.bits()
            | Self::NON_PIXEL_SHADER_READ.bits();
    }
}

impl ResourceState {
    /// The state every resource starts in unless created otherwise.
    pub const COMMON: ResourceState = ResourceState::empty();
}

/// The kind of view a descriptor exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    /// Sampled texture or read-only buffer.
    ShaderRead,
    /// Color attachment.
    RenderTarget,
    /// Depth attachment.
    Depth,
    /// Storage image or read/write buffer.
    UnorderedAccess,
}

impl ViewKind {
    /// Number of view kinds.
    pub const COUNT: usize = 4;
    /// All view kinds, in index order.
    pub const ALL: [ViewKind; Self::COUNT] = [
        ViewKind::ShaderRead,
        ViewKind::RenderTarget,
        ViewKind::Depth,
        ViewKind::UnorderedAccess,
    ];

    /// Dense index usable for per-view arrays.
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            ViewKind::ShaderRead => 0,
            ViewKind::RenderTarget => 1,
            ViewKind::Depth => 2,
            ViewKind::UnorderedAccess => 3,
        }
    }
}

/// A synchronization point recorded into a command list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceBarrier {
    /// Moves a resource from one access state to another.
    Transition {
        /// The resource being transitioned.
        resource: ResourceHandle,
        /// State before the barrier.
        before: ResourceState,
        /// State after the barrier.
        after: ResourceState,
    },
    /// Orders two read/write accesses to a resource that stays in the same state
    /// (e.g. successive builds sharing one scratch buffer).
    UnorderedAccess {
        /// The resource being synchronized.
        resource: ResourceHandle,
    },
}
