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

//! Double-buffered history textures for temporal effects.
//!
//! Each pair keeps the texture written this frame ("current") and the one written the
//! frame before ("previous"). Swapping at the end of a frame only flips which is which;
//! textures and their fixed shader-resource slots stay put.

use crate::descriptor::{reserved, DescriptorHeaps, SlotRequest};
use crate::error::FrameError;
use crate::resource::{GpuResource, StagingPool};
use std::borrow::Cow;
use strata_core::renderer::{
    GraphicsBackend, QueueKind, ResourceState, TextureDescriptor, TextureFormat, TextureUsage,
    Ticket, ViewKind,
};

/// Two values, one of which is current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingPong<T> {
    items: [T; 2],
    current: usize,
}

impl<T> PingPong<T> {
    /// `first` starts as current.
    pub fn new(first: T, second: T) -> Self {
        Self {
            items: [first, second],
            current: 0,
        }
    }

    /// The value written this frame.
    #[inline]
    pub fn current(&self) -> &T {
        &self.items[self.current]
    }

    /// Mutable access to the value written this frame.
    #[inline]
    pub fn current_mut(&mut self) -> &mut T {
        &mut self.items[self.current]
    }

    /// The value written the frame before.
    #[inline]
    pub fn previous(&self) -> &T {
        &self.items[self.current ^ 1]
    }

    /// Mutable access to the value written the frame before.
    #[inline]
    pub fn previous_mut(&mut self) -> &mut T {
        &mut self.items[self.current ^ 1]
    }

    /// Both values at once, current first.
    pub fn both_mut(&mut self) -> (&mut T, &mut T) {
        let [a, b] = &mut self.items;
        if self.current == 0 {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// Exchanges current and previous.
    #[inline]
    pub fn swap(&mut self) {
        self.current ^= 1;
    }

    /// Consumes the pair.
    pub fn into_items(self) -> [T; 2] {
        self.items
    }
}

/// Depth, lit color and GI reservoir history at one resolution.
#[derive(Debug)]
pub struct TemporalHistory {
    depth: PingPong<GpuResource>,
    lighting: PingPong<GpuResource>,
    gi: PingPong<GpuResource>,
    extent: (u32, u32),
    valid: bool,
}

struct PairSpec {
    label: &'static str,
    format: TextureFormat,
    usage: TextureUsage,
    slots: [u32; 2],
    write_view: ViewKind,
}

impl TemporalHistory {
    /// Creates the three pairs and binds them to their reserved slots. History starts
    /// invalid.
    pub fn new(
        backend: &dyn GraphicsBackend,
        heaps: &DescriptorHeaps,
        width: u32,
        height: u32,
    ) -> Result<Self, FrameError> {
        let [depth, lighting, gi] = [
            PairSpec {
                label: "History Depth",
                format: TextureFormat::Depth32Float,
                usage: TextureUsage::DEPTH_STENCIL | TextureUsage::SHADER_READ,
                slots: reserved::HISTORY_DEPTH,
                write_view: ViewKind::Depth,
            },
            PairSpec {
                label: "History Lighting",
                format: TextureFormat::Rgba16Float,
                usage: TextureUsage::RENDER_TARGET | TextureUsage::SHADER_READ,
                slots: reserved::HISTORY_LIGHTING,
                write_view: ViewKind::RenderTarget,
            },
            PairSpec {
                label: "History GI",
                format: TextureFormat::Rgba32Float,
                usage: TextureUsage::UNORDERED_ACCESS | TextureUsage::SHADER_READ,
                slots: reserved::HISTORY_GI,
                write_view: ViewKind::UnorderedAccess,
            },
        ];
        let pair = |spec| create_pair(backend, heaps, width, height, spec);
        let depth = pair(depth)?;
        let lighting = match pair(lighting) {
            Ok(lighting) => lighting,
            Err(e) => {
                destroy_pairs(backend, heaps, [depth]);
                return Err(e);
            }
        };
        let gi = match pair(gi) {
            Ok(gi) => gi,
            Err(e) => {
                destroy_pairs(backend, heaps, [depth, lighting]);
                return Err(e);
            }
        };
        let history = Self {
            depth,
            lighting,
            gi,
            extent: (width, height),
            valid: false,
        };
        log::debug!("Created temporal history at {width}x{height}");
        Ok(history)
    }

    /// Depth pair.
    pub fn depth(&self) -> &PingPong<GpuResource> {
        &self.depth
    }

    /// Mutable depth pair.
    pub fn depth_mut(&mut self) -> &mut PingPong<GpuResource> {
        &mut self.depth
    }

    /// Lit color pair.
    pub fn lighting(&self) -> &PingPong<GpuResource> {
        &self.lighting
    }

    /// Mutable lit color pair.
    pub fn lighting_mut(&mut self) -> &mut PingPong<GpuResource> {
        &mut self.lighting
    }

    /// GI reservoir pair.
    pub fn gi(&self) -> &PingPong<GpuResource> {
        &self.gi
    }

    /// Mutable GI reservoir pair.
    pub fn gi_mut(&mut self) -> &mut PingPong<GpuResource> {
        &mut self.gi
    }

    /// Resolution of every texture.
    pub fn extent(&self) -> (u32, u32) {
        self.extent
    }

    /// Shader-resource slots of the previous depth, lighting and GI textures.
    pub fn previous_slots(&self) -> [u32; 3] {
        [&self.depth, &self.lighting, &self.gi].map(|pair| {
            pair.previous()
                .descriptor(ViewKind::ShaderRead)
                .map_or(reserved::NULL, |d| d.index.0)
        })
    }

    /// Whether the previous textures hold a rendered frame.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Marks the current textures as holding a complete frame.
    pub fn mark_valid(&mut self) {
        self.valid = true;
    }

    /// Discards history, e.g. after a camera cut or resize.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Swaps every pair.
    pub fn swap_all(&mut self) {
        self.depth.swap();
        self.lighting.swap();
        self.gi.swap();
    }

    /// Releases all six textures and their descriptors once `ticket` completes.
    pub fn release(self, staging: &mut StagingPool, queue: QueueKind, ticket: Ticket) {
        for texture in [self.depth, self.lighting, self.gi]
            .into_iter()
            .flat_map(PingPong::into_items)
        {
            texture.release(staging, queue, ticket);
        }
    }

    /// Destroys all six textures immediately. The device must not reference them.
    pub fn destroy(self, backend: &dyn GraphicsBackend, heaps: &DescriptorHeaps) {
        destroy_pairs(backend, heaps, [self.depth, self.lighting, self.gi]);
    }
}

fn destroy_pairs<const N: usize>(
    backend: &dyn GraphicsBackend,
    heaps: &DescriptorHeaps,
    pairs: [PingPong<GpuResource>; N],
) {
    for texture in pairs.into_iter().flat_map(PingPong::into_items) {
        texture.destroy(backend, heaps);
    }
}

fn create_pair(
    backend: &dyn GraphicsBackend,
    heaps: &DescriptorHeaps,
    width: u32,
    height: u32,
    spec: PairSpec,
) -> Result<PingPong<GpuResource>, FrameError> {
    let create = |i: usize| {
        GpuResource::create_texture_with_views(
            backend,
            heaps,
            &TextureDescriptor {
                label: Some(Cow::Owned(format!("{} {i}", spec.label))),
                width,
                height,
                format: spec.format,
                usage: spec.usage,
            },
            ResourceState::COMMON,
            &[
                (ViewKind::ShaderRead, SlotRequest::Fixed(spec.slots[i])),
                (spec.write_view, SlotRequest::Auto),
            ],
        )
    };
    let first = create(0)?;
    match create(1) {
        Ok(second) => Ok(PingPong::new(first, second)),
        Err(e) => {
            first.destroy(backend, heaps);
            Err(e)
        }
    }
}
