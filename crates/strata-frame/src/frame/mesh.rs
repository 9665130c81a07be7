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

//! Registered meshes and their GPU buffers.

use crate::error::FrameError;
use crate::resource::GpuResource;
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use strata_core::math::{Aabb, Vec3};
use strata_core::renderer::{BlasGeometry, IndexFormat, Ticket};

/// Subsets a mesh may have; one bit each in a [`SubsetMask`](super::SubsetMask).
pub const MAX_SUBSETS: usize = 64;

/// Opaque handle to a registered mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshHandle(pub u32);

impl fmt::Display for MeshHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mesh#{}", self.0)
    }
}

/// A contiguous range of triangles drawn with one material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshSubset {
    /// Index range, in elements.
    pub indices: Range<u32>,
    /// Whether rays may skip any-hit evaluation.
    pub opaque: bool,
}

/// Everything needed to register a mesh.
///
/// Vertices start with three `f32` positions; `vertex_stride` covers any attributes that
/// follow.
#[derive(Debug, Clone)]
pub struct MeshDescriptor<'a> {
    /// Debug label.
    pub label: &'a str,
    /// Interleaved vertex bytes.
    pub vertices: &'a [u8],
    /// Bytes per vertex.
    pub vertex_stride: u32,
    /// Index bytes.
    pub indices: &'a [u8],
    /// Index width.
    pub index_format: IndexFormat,
    /// Subsets; at most [`MAX_SUBSETS`].
    pub subsets: &'a [MeshSubset],
    /// Whether vertex positions will be updated after registration.
    pub deformable: bool,
}

impl MeshDescriptor<'_> {
    /// Number of vertices.
    pub fn vertex_count(&self) -> u32 {
        match self.vertex_stride {
            0 => 0,
            stride => self.vertices.len() as u32 / stride,
        }
    }

    /// Number of indices.
    pub fn index_count(&self) -> u32 {
        (self.indices.len() as u64 / self.index_format.size()) as u32
    }

    /// Checks buffer sizes, subset ranges and index values.
    pub fn validate(&self) -> Result<(), FrameError> {
        let invalid = |msg: String| Err(FrameError::InvalidMesh(format!("{}: {msg}", self.label)));
        if self.vertex_stride < 12 || self.vertex_stride % 4 != 0 {
            return invalid(format!("vertex stride {} is not a multiple of 4 of at least 12", self.vertex_stride));
        }
        if self.vertices.is_empty() || self.vertices.len() % self.vertex_stride as usize != 0 {
            return invalid(format!(
                "{} vertex bytes do not hold whole vertices of {} bytes",
                self.vertices.len(),
                self.vertex_stride
            ));
        }
        if self.indices.is_empty() || self.indices.len() as u64 % self.index_format.size() != 0 {
            return invalid("index bytes do not hold whole indices".into());
        }
        if self.subsets.is_empty() || self.subsets.len() > MAX_SUBSETS {
            return invalid(format!("{} subsets (expected 1..={MAX_SUBSETS})", self.subsets.len()));
        }
        let index_count = self.index_count();
        for (i, subset) in self.subsets.iter().enumerate() {
            let range = &subset.indices;
            if range.start > range.end || range.end > index_count || range.len() % 3 != 0 {
                return invalid(format!("subset {i} range {range:?} is not a triangle list within {index_count} indices"));
            }
        }
        let vertex_count = self.vertex_count();
        if let Some(bad) = read_indices(self.indices, self.index_format).find(|&i| i >= vertex_count) {
            return invalid(format!("index {bad} exceeds vertex count {vertex_count}"));
        }
        Ok(())
    }

    /// Object-space bounds of the vertex positions.
    pub fn bounds(&self) -> Aabb {
        position_bounds(self.vertices, self.vertex_stride)
    }
}

fn read_indices(bytes: &[u8], format: IndexFormat) -> Box<dyn Iterator<Item = u32> + '_> {
    match format {
        IndexFormat::Uint16 => Box::new(
            bytes
                .chunks_exact(2)
                .map(|c| bytemuck::pod_read_unaligned::<u16>(c) as u32),
        ),
        IndexFormat::Uint32 => Box::new(bytes.chunks_exact(4).map(bytemuck::pod_read_unaligned::<u32>)),
    }
}

/// Bounds of the leading `f32` triple of every vertex.
pub(crate) fn position_bounds(vertices: &[u8], stride: u32) -> Aabb {
    vertices
        .chunks_exact(stride as usize)
        .map(|v| Vec3::from_array(bytemuck::pod_read_unaligned::<[f32; 3]>(&v[..12])))
        .fold(Aabb::INVALID, |acc, p| acc.merged_with_point(p))
}

/// GPU state of a registered mesh.
#[derive(Debug)]
pub(crate) struct MeshRecord {
    pub label: String,
    pub vertices: GpuResource,
    pub indices: GpuResource,
    pub vertex_stride: u32,
    pub vertex_count: u32,
    pub index_format: IndexFormat,
    pub subsets: Vec<MeshSubset>,
    pub deformable: bool,
    pub bounds: Aabb,
    /// Copy-queue ticket of the initial upload.
    pub upload_ticket: Ticket,
    /// Last graphics ticket issued before registration.
    pub registered_after: Ticket,
    /// New vertex data waiting to be copied by the next frame.
    pub pending_vertices: Option<GpuResource>,
}

impl MeshRecord {
    /// Ray-tracing geometry of one subset.
    pub fn geometry(&self, subset: usize) -> BlasGeometry {
        let s = &self.subsets[subset];
        BlasGeometry {
            vertex_buffer: self.vertices.buffer_id(),
            vertex_stride: self.vertex_stride as u64,
            vertex_count: self.vertex_count,
            index_buffer: self.indices.buffer_id(),
            index_format: self.index_format,
            indices: s.indices.clone(),
            opaque: s.opaque,
        }
    }
}

/// Arena of registered meshes.
#[derive(Debug, Default)]
pub(crate) struct MeshRegistry {
    meshes: HashMap<MeshHandle, MeshRecord>,
    next: u32,
}

impl MeshRegistry {
    pub fn insert(&mut self, record: MeshRecord) -> MeshHandle {
        self.next += 1;
        let handle = MeshHandle(self.next);
        self.meshes.insert(handle, record);
        handle
    }

    pub fn get(&self, handle: MeshHandle) -> Result<&MeshRecord, FrameError> {
        self.meshes.get(&handle).ok_or(FrameError::UnknownMesh(handle.0))
    }

    pub fn get_mut(&mut self, handle: MeshHandle) -> Result<&mut MeshRecord, FrameError> {
        self.meshes
            .get_mut(&handle)
            .ok_or(FrameError::UnknownMesh(handle.0))
    }

    pub fn contains(&self, handle: MeshHandle) -> bool {
        self.meshes.contains_key(&handle)
    }

    pub fn remove(&mut self, handle: MeshHandle) -> Result<MeshRecord, FrameError> {
        self.meshes
            .remove(&handle)
            .ok_or(FrameError::UnknownMesh(handle.0))
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (MeshHandle, &mut MeshRecord)> {
        self.meshes.iter_mut().map(|(h, r)| (*h, r))
    }

    pub fn drain(&mut self) -> impl Iterator<Item = MeshRecord> + '_ {
        self.meshes.drain().map(|(_, r)| r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle_bytes() -> Vec<u8> {
        bytemuck::cast_slice(&[0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 2.0, 0.0]).to_vec()
    }

    fn descriptor<'a>(vertices: &'a [u8], indices: &'a [u8], subsets: &'a [MeshSubset]) -> MeshDescriptor<'a> {
        MeshDescriptor {
            label: "tri",
            vertices,
            vertex_stride: 12,
            indices,
            index_format: IndexFormat::Uint16,
            subsets,
            deformable: false,
        }
    }

    #[test]
    fn test_valid_mesh_passes() {
        let vertices = triangle_bytes();
        let indices: Vec<u8> = bytemuck::cast_slice(&[0u16, 1, 2]).to_vec();
        let subsets = [MeshSubset { indices: 0..3, opaque: true }];
        let desc = descriptor(&vertices, &indices, &subsets);
        assert!(desc.validate().is_ok());
        assert_eq!(desc.vertex_count(), 3);
        assert_eq!(desc.bounds().max, Vec3::new(1.0, 2.0, 0.0));
    }

    #[test]
    fn test_out_of_range_index_is_rejected() {
        let vertices = triangle_bytes();
        let indices: Vec<u8> = bytemuck::cast_slice(&[0u16, 1, 3]).to_vec();
        let subsets = [MeshSubset { indices: 0..3, opaque: true }];
        assert!(matches!(
            descriptor(&vertices, &indices, &subsets).validate(),
            Err(FrameError::InvalidMesh(_))
        ));
    }

    #[test]
    fn test_partial_triangle_subset_is_rejected() {
        let vertices = triangle_bytes();
        let indices: Vec<u8> = bytemuck::cast_slice(&[0u16, 1, 2]).to_vec();
        let subsets = [MeshSubset { indices: 0..2, opaque: true }];
        assert!(descriptor(&vertices, &indices, &subsets).validate().is_err());
    }
}
