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

//! Bottom-level structure: a BVH over the triangles of one mesh subset.

use super::bvh::Bvh;
use crate::math::{Aabb, Ray, Vec3};
use crate::renderer::api::{BlasGeometry, BufferId, IndexFormat, ResourceHandle};
use crate::renderer::error::ResourceError;

/// A triangle hit in object space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleHit {
    /// Ray parameter of the hit.
    pub t: f32,
    /// Index of the triangle in build order.
    pub primitive: u32,
    /// Barycentric `u`.
    pub u: f32,
    /// Barycentric `v`.
    pub v: f32,
}

/// Host-side bottom-level acceleration structure.
#[derive(Debug, Clone, PartialEq)]
pub struct TriangleBvh {
    positions: Vec<Vec3>,
    triangles: Vec<[u32; 3]>,
    bvh: Bvh,
    allow_update: bool,
}

impl TriangleBvh {
    /// Builds the hierarchy.
    ///
    /// # Errors
    ///
    /// `ResourceError::InvalidOperation` if an index points past `positions`.
    pub fn build(
        positions: Vec<Vec3>,
        triangles: Vec<[u32; 3]>,
        allow_update: bool,
    ) -> Result<Self, ResourceError> {
        if let Some(bad) = triangles
            .iter()
            .flatten()
            .find(|&&i| i as usize >= positions.len())
        {
            return Err(ResourceError::InvalidOperation(format!(
                "index {bad} exceeds vertex count {}",
                positions.len()
            )));
        }
        let bounds = triangle_bounds(&positions, &triangles);
        Ok(Self {
            bvh: Bvh::build(&bounds),
            positions,
            triangles,
            allow_update,
        })
    }

    /// Refits the hierarchy to moved vertices. Topology stays as built.
    ///
    /// # Errors
    ///
    /// `ResourceError::InvalidOperation` if the structure was built without update
    /// support or the triangle list differs from the original build.
    pub fn refit(
        &mut self,
        positions: Vec<Vec3>,
        triangles: &[[u32; 3]],
    ) -> Result<(), ResourceError> {
        if !self.allow_update {
            return Err(ResourceError::InvalidOperation(
                "bottom-level structure was built without update support".into(),
            ));
        }
        if positions.len() != self.positions.len() || triangles != self.triangles.as_slice() {
            return Err(ResourceError::InvalidOperation(
                "update topology differs from the original build".into(),
            ));
        }
        self.positions = positions;
        let bounds = triangle_bounds(&self.positions, &self.triangles);
        self.bvh.refit(&bounds);
        Ok(())
    }

    /// Object-space bounds of all triangles.
    pub fn bounds(&self) -> Aabb {
        self.bvh.root_bounds()
    }

    /// Number of triangles.
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Whether the structure supports in-place updates.
    pub fn allows_update(&self) -> bool {
        self.allow_update
    }

    /// Closest triangle hit along `ray` within `t_max`.
    pub fn intersect(&self, ray: &Ray, t_max: f32) -> Option<TriangleHit> {
        self.bvh
            .closest_hit(ray, t_max, |primitive, _| {
                let [a, b, c] = self.triangles[primitive as usize];
                intersect_triangle(
                    ray,
                    self.positions[a as usize],
                    self.positions[b as usize],
                    self.positions[c as usize],
                )
                .map(|(t, u, v)| {
                    (
                        t,
                        TriangleHit {
                            t,
                            primitive,
                            u,
                            v,
                        },
                    )
                })
            })
            .map(|(_, hit)| hit)
    }
}

fn triangle_bounds(positions: &[Vec3], triangles: &[[u32; 3]]) -> Vec<Aabb> {
    triangles
        .iter()
        .map(|tri| {
            Aabb::from_min_max(positions[tri[0] as usize], positions[tri[1] as usize])
                .merged_with_point(positions[tri[2] as usize])
        })
        .collect()
}

/// Moller-Trumbore, two-sided. Returns `(t, u, v)` for hits with `t >= 0`.
fn intersect_triangle(ray: &Ray, p0: Vec3, p1: Vec3, p2: Vec3) -> Option<(f32, f32, f32)> {
    const PARALLEL_EPSILON: f32 = 1e-8;

    let e1 = p1 - p0;
    let e2 = p2 - p0;
    let pvec = ray.direction.cross(e2);
    let det = e1.dot(pvec);
    if det.abs() < PARALLEL_EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;
    let tvec = ray.origin - p0;
    let u = tvec.dot(pvec) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let qvec = tvec.cross(e1);
    let v = ray.direction.dot(qvec) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(qvec) * inv_det;
    (t >= 0.0).then_some((t, u, v))
}

/// Decodes the positions and triangle list of one geometry description.
///
/// # Errors
///
/// `ResourceError::OutOfBounds` when the description reaches past either buffer.
pub fn read_geometry(
    geometry: &BlasGeometry,
    vertices: &[u8],
    indices: &[u8],
) -> Result<(Vec<Vec3>, Vec<[u32; 3]>), ResourceError> {
    let stride = geometry.vertex_stride as usize;
    let needed = match geometry.vertex_count {
        0 => 0,
        n => (n as usize - 1) * stride + 12,
    };
    if needed > vertices.len() {
        return Err(ResourceError::OutOfBounds {
            offset: 0,
            len: needed as u64,
            capacity: vertices.len() as u64,
        });
    }
    let positions = (0..geometry.vertex_count as usize)
        .map(|v| {
            let at = v * stride;
            Vec3::from_array(bytemuck::pod_read_unaligned::<[f32; 3]>(
                &vertices[at..at + 12],
            ))
        })
        .collect();

    let index_size = geometry.index_format.size() as usize;
    let start = geometry.indices.start as usize * index_size;
    let end = geometry.indices.end as usize * index_size;
    if end > indices.len() {
        return Err(ResourceError::OutOfBounds {
            offset: start as u64,
            len: (end - start) as u64,
            capacity: indices.len() as u64,
        });
    }
    let raw = &indices[start..end];
    let flat: Vec<u32> = match geometry.index_format {
        IndexFormat::Uint16 => raw
            .chunks_exact(2)
            .map(|c| bytemuck::pod_read_unaligned::<u16>(c) as u32)
            .collect(),
        IndexFormat::Uint32 => raw
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned::<u32>)
            .collect(),
    };
    let triangles = flat.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect();
    Ok((positions, triangles))
}

/// Gathers every geometry of a build into one position and triangle list.
pub(crate) fn gather_geometry<'a>(
    geometry: &[BlasGeometry],
    read: impl Fn(BufferId) -> Option<&'a [u8]>,
) -> Result<(Vec<Vec3>, Vec<[u32; 3]>), ResourceError> {
    let mut positions = Vec::new();
    let mut triangles = Vec::new();
    for geo in geometry {
        let vertices = read(geo.vertex_buffer)
            .ok_or(ResourceError::NotFound(ResourceHandle::Buffer(geo.vertex_buffer)))?;
        let indices = read(geo.index_buffer)
            .ok_or(ResourceError::NotFound(ResourceHandle::Buffer(geo.index_buffer)))?;
        let (p, t) = read_geometry(geo, vertices, indices)?;
        let base = positions.len() as u32;
        positions.extend(p);
        triangles.extend(t.into_iter().map(|[a, b, c]| [a + base, b + base, c + base]));
    }
    Ok((positions, triangles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn quad() -> (Vec<Vec3>, Vec<[u32; 3]>) {
        (
            vec![
                Vec3::new(-1.0, -1.0, 0.0),
                Vec3::new(1.0, -1.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(-1.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        )
    }

    #[test]
    fn test_ray_hits_quad_center() {
        let (p, t) = quad();
        let blas = TriangleBvh::build(p, t, false).expect("valid quad");
        let hit = blas
            .intersect(&Ray::new(Vec3::new(0.5, -0.5, 3.0), -Vec3::Z), f32::INFINITY)
            .expect("ray should hit the quad");
        assert_relative_eq!(hit.t, 3.0);
        assert_eq!(hit.primitive, 0);
    }

    #[test]
    fn test_refit_requires_update_support() {
        let (p, t) = quad();
        let mut blas = TriangleBvh::build(p.clone(), t.clone(), false).expect("valid quad");
        assert!(matches!(
            blas.refit(p, &t),
            Err(ResourceError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_refit_moves_hits() {
        let (p, t) = quad();
        let mut blas = TriangleBvh::build(p.clone(), t.clone(), true).expect("valid quad");
        let moved: Vec<Vec3> = p.iter().map(|v| *v + Vec3::new(0.0, 0.0, 1.0)).collect();
        blas.refit(moved, &t).expect("same topology");
        let hit = blas
            .intersect(&Ray::new(Vec3::new(0.0, 0.0, 3.0), -Vec3::Z), f32::INFINITY)
            .expect("ray should hit the moved quad");
        assert_relative_eq!(hit.t, 2.0);
    }

    #[test]
    fn test_out_of_range_index_is_rejected() {
        let (p, _) = quad();
        assert!(TriangleBvh::build(p, vec![[0, 1, 9]], false).is_err());
    }

    #[test]
    fn test_read_geometry_decodes_strided_vertices() {
        // Two floats of padding after each position.
        let mut vertices = Vec::new();
        for v in [[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]] {
            vertices.extend_from_slice(bytemuck::cast_slice(&v));
            vertices.extend_from_slice(bytemuck::cast_slice(&[9.0f32, 9.0]));
        }
        let indices: Vec<u8> = bytemuck::cast_slice(&[0u16, 1, 2]).to_vec();
        let geometry = BlasGeometry {
            vertex_buffer: BufferId(1),
            vertex_stride: 20,
            vertex_count: 3,
            index_buffer: BufferId(2),
            index_format: IndexFormat::Uint16,
            indices: 0..3,
            opaque: true,
        };
        let (positions, triangles) =
            read_geometry(&geometry, &vertices, &indices).expect("buffers are large enough");
        assert_eq!(positions[1], Vec3::X);
        assert_eq!(positions[2], Vec3::Y);
        assert_eq!(triangles, vec![[0, 1, 2]]);
    }
}
