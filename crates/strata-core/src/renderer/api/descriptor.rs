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

//! Descriptor heap identifiers and descriptor writes.

use super::resource::{ResourceHandle, ViewKind};

/// The heap a descriptor lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapKind {
    /// Shader-visible table of shader-read and unordered-access views.
    ShaderResource,
    /// Color attachment views.
    RenderTarget,
    /// Depth attachment views.
    DepthStencil,
}

impl DescriptorHeapKind {
    /// The heap that holds views of the given kind.
    pub const fn for_view(view: ViewKind) -> Self {
        match view {
            ViewKind::ShaderRead | ViewKind::UnorderedAccess => DescriptorHeapKind::ShaderResource,
            ViewKind::RenderTarget => DescriptorHeapKind::RenderTarget,
            ViewKind::Depth => DescriptorHeapKind::DepthStencil,
        }
    }
}

/// An index into a descriptor heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorIndex(pub u32);

/// Instructs the backend to (re)write one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorWrite {
    /// Target heap.
    pub heap: DescriptorHeapKind,
    /// Target slot.
    pub index: DescriptorIndex,
    /// The resource the descriptor points at.
    pub resource: ResourceHandle,
    /// How the resource is viewed.
    pub view: ViewKind,
}
