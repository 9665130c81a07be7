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

//! Acceleration-structure handles, build inputs and query results.

use super::command::IndexFormat;
use super::resource::BufferId;
use crate::math::Mat4;
use bitflags::bitflags;
use std::ops::Range;

/// An opaque handle to a bottom- or top-level acceleration structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccelStructId(pub u64);

/// Level of an acceleration structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccelStructKind {
    /// Triangles of one mesh subset.
    BottomLevel,
    /// Transformed instances of bottom-level structures.
    TopLevel,
}

bitflags! {
    /// Build options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccelBuildFlags: u32 {
        /// The structure may later be updated in place.
        const ALLOW_UPDATE = 1 << 0;
        /// Favor build speed over trace speed.
        const PREFER_FAST_BUILD = 1 << 1;
        /// Favor trace speed over build speed.
        const PREFER_FAST_TRACE = 1 << 2;
    }
}

/// Triangle geometry of one mesh subset. Positions are three little-endian `f32`
/// at the start of every vertex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlasGeometry {
    /// Vertex data.
    pub vertex_buffer: BufferId,
    /// Distance between consecutive vertices in bytes.
    pub vertex_stride: u64,
    /// Number of vertices in `vertex_buffer`.
    pub vertex_count: u32,
    /// Index data.
    pub index_buffer: BufferId,
    /// Index width.
    pub index_format: IndexFormat,
    /// Range of indices (in elements) forming the subset's triangle list.
    pub indices: Range<u32>,
    /// Skip any-hit evaluation.
    pub opaque: bool,
}

impl BlasGeometry {
    /// Number of triangles described by the index range.
    pub fn triangle_count(&self) -> u32 {
        self.indices.len() as u32 / 3
    }
}

/// Inputs of a prebuild size query.
#[derive(Debug, Clone, Copy)]
pub enum AccelStructInputs<'a> {
    /// A bottom-level build over the given geometry.
    BottomLevel {
        /// Geometry descriptions.
        geometry: &'a [BlasGeometry],
        /// Build options.
        flags: AccelBuildFlags,
    },
    /// A top-level build over `instance_count` instances.
    TopLevel {
        /// Number of instances.
        instance_count: u32,
        /// Build options.
        flags: AccelBuildFlags,
    },
}

/// Memory requirements reported by a prebuild query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccelStructSizes {
    /// Size of the structure itself.
    pub result_bytes: u64,
    /// Scratch needed by a full build.
    pub build_scratch_bytes: u64,
    /// Scratch needed by an in-place update.
    pub update_scratch_bytes: u64,
}

impl AccelStructSizes {
    /// Scratch large enough for both a build and an update.
    #[inline]
    pub fn scratch_bytes(&self) -> u64 {
        self.build_scratch_bytes.max(self.update_scratch_bytes)
    }
}

/// One instance of a top-level structure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TlasInstance {
    /// The bottom-level structure being instanced.
    pub blas: AccelStructId,
    /// Object-to-world transform.
    pub transform: Mat4,
    /// Value reported back by hits on this instance.
    pub instance_id: u32,
    /// Visibility mask, ANDed with the ray mask.
    pub mask: u8,
}

/// Whether a build starts from scratch or updates an existing structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccelBuildMode {
    /// Full build.
    Build,
    /// In-place update (refit); topology must match the original build.
    Update,
}

/// A bottom-level build or refit recorded into a command list.
#[derive(Debug, Clone, Copy)]
pub struct BlasBuild<'a> {
    /// Destination structure.
    pub dst: AccelStructId,
    /// Geometry descriptions.
    pub geometry: &'a [BlasGeometry],
    /// Build options; must include `ALLOW_UPDATE` for later updates.
    pub flags: AccelBuildFlags,
    /// Build or update.
    pub mode: AccelBuildMode,
    /// Scratch memory.
    pub scratch: BufferId,
}

/// A top-level build or refit recorded into a command list.
#[derive(Debug, Clone, Copy)]
pub struct TlasBuild<'a> {
    /// Destination structure.
    pub dst: AccelStructId,
    /// Instances.
    pub instances: &'a [TlasInstance],
    /// Build options.
    pub flags: AccelBuildFlags,
    /// Build or update.
    pub mode: AccelBuildMode,
    /// Scratch memory.
    pub scratch: BufferId,
}

/// Owned copy of a [`BlasBuild`], kept by command lists until execution.
#[derive(Debug, Clone, PartialEq)]
pub struct BlasBuildRecord {
    /// Destination structure.
    pub dst: AccelStructId,
    /// Geometry descriptions.
    pub geometry: Vec<BlasGeometry>,
    /// Build options.
    pub flags: AccelBuildFlags,
    /// Build or update.
    pub mode: AccelBuildMode,
    /// Scratch memory.
    pub scratch: BufferId,
}

impl From<&BlasBuild<'_>> for BlasBuildRecord {
    fn from(build: &BlasBuild<'_>) -> Self {
        Self {
            dst: build.dst,
            geometry: build.geometry.to_vec(),
            flags: build.flags,
            mode: build.mode,
            scratch: build.scratch,
        }
    }
}

/// Owned copy of a [`TlasBuild`].
#[derive(Debug, Clone, PartialEq)]
pub struct TlasBuildRecord {
    /// Destination structure.
    pub dst: AccelStructId,
    /// Instances.
    pub instances: Vec<TlasInstance>,
    /// Build options.
    pub flags: AccelBuildFlags,
    /// Build or update.
    pub mode: AccelBuildMode,
    /// Scratch memory.
    pub scratch: BufferId,
}

impl From<&TlasBuild<'_>> for TlasBuildRecord {
    fn from(build: &TlasBuild<'_>) -> Self {
        Self {
            dst: build.dst,
            instances: build.instances.to_vec(),
            flags: build.flags,
            mode: build.mode,
            scratch: build.scratch,
        }
    }
}

/// Closest hit found by a ray query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    /// Hit parameter along the query ray (in multiples of its direction).
    pub distance: f32,
    /// `instance_id` of the instance that was hit.
    pub instance_id: u32,
    /// Triangle index within the subset's index range.
    pub primitive_index: u32,
    /// Barycentric coordinates (u, v) of the hit on the triangle.
    pub barycentrics: [f32; 2],
}
