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

//! Geometric primitives used for culling and ray queries.

use super::{Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    /// The minimum corner of the box.
    pub min: Vec3,
    /// The maximum corner of the box.
    pub max: Vec3,
}

impl Aabb {
    /// An inverted box that acts as the identity for [`Aabb::merge`].
    pub const INVALID: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// Creates a box from two corners, sorting components so `min <= max`.
    #[inline]
    pub fn from_min_max(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Creates a box from a center and half extents.
    #[inline]
    pub fn from_center_half_extents(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Smallest box enclosing all points, or `None` for an empty slice.
    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        Some(
            points
                .iter()
                .fold(Self::INVALID, |acc, p| acc.merged_with_point(*p)),
        )
    }

    /// Returns the center point of the box.
    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Returns half the size of the box along each axis.
    #[inline]
    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// `true` when `min <= max` on every axis.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
    }

    /// Returns the smallest box enclosing both boxes.
    #[inline]
    pub fn merge(&self, other: &Aabb) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Returns the smallest box enclosing this box and a point.
    #[inline]
    pub fn merged_with_point(&self, point: Vec3) -> Self {
        Self {
            min: self.min.min(point),
            max: self.max.max(point),
        }
    }

    /// Half the surface area; proportional to the hit probability of a random ray.
    #[inline]
    pub fn half_area(&self) -> f32 {
        if !self.is_valid() {
            return 0.0;
        }
        let d = self.max - self.min;
        d.x * d.y + d.y * d.z + d.z * d.x
    }

    /// Bounding box of this box after an affine transformation.
    pub fn transform(&self, matrix: &Mat4) -> Self {
        let center = matrix.transform_point(self.center());
        let h = self.half_extents();
        let abs_col = |i: usize| {
            let c = matrix.cols[i];
            Vec3::new(c.x.abs(), c.y.abs(), c.z.abs())
        };
        let extents = abs_col(0) * h.x + abs_col(1) * h.y + abs_col(2) * h.z;
        Self::from_center_half_extents(center, extents)
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::INVALID
    }
}

/// A plane `normal . p + d = 0`; points with a positive distance are in front.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Plane normal (not necessarily unit length).
    pub normal: Vec3,
    /// Plane offset.
    pub d: f32,
}

impl Plane {
    fn from_vec4(v: Vec4) -> Self {
        let normal = v.truncate();
        let len = normal.length();
        if len > 0.0 {
            Self {
                normal: normal / len,
                d: v.w / len,
            }
        } else {
            Self { normal, d: v.w }
        }
    }

    /// Signed distance from the plane to `p`.
    #[inline]
    pub fn distance(&self, p: Vec3) -> f32 {
        self.normal.dot(p) + self.d
    }
}

/// Six clip planes extracted from a view-projection matrix (depth range [0, 1]).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    /// Left, right, bottom, top, near, far.
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Extracts the clip planes of `view_projection`.
    pub fn from_view_projection(view_projection: &Mat4) -> Self {
        let r0 = view_projection.get_row(0);
        let r1 = view_projection.get_row(1);
        let r2 = view_projection.get_row(2);
        let r3 = view_projection.get_row(3);
        Self {
            planes: [
                Plane::from_vec4(r3 + r0),
                Plane::from_vec4(r3 - r0),
                Plane::from_vec4(r3 + r1),
                Plane::from_vec4(r3 - r1),
                Plane::from_vec4(r2),
                Plane::from_vec4(r3 - r2),
            ],
        }
    }

    /// Conservative box test: `false` only when the box lies fully outside one plane.
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.planes.iter().all(|plane| {
            let n = plane.normal;
            let positive = Vec3::new(
                if n.x >= 0.0 { aabb.max.x } else { aabb.min.x },
                if n.y >= 0.0 { aabb.max.y } else { aabb.min.y },
                if n.z >= 0.0 { aabb.max.z } else { aabb.min.z },
            );
            plane.distance(positive) >= 0.0
        })
    }
}

/// A ray with an origin and a (not necessarily normalized) direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ray {
    /// Ray origin.
    pub origin: Vec3,
    /// Ray direction. Hit distances are expressed in multiples of this vector.
    pub direction: Vec3,
}

impl Ray {
    /// Creates a new ray.
    #[inline]
    pub const fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction }
    }

    /// Point at parameter `t`.
    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Re-expresses the ray in another space. Distances stay comparable since the
    /// direction is not renormalized.
    #[inline]
    pub fn transformed(&self, matrix: &Mat4) -> Self {
        Self {
            origin: matrix.transform_point(self.origin),
            direction: matrix.transform_vector(self.direction),
        }
    }

    /// Slab test. Returns the entry distance when the box is hit within `[0, t_max]`.
    pub fn intersect_aabb(&self, aabb: &Aabb, inv_direction: Vec3, t_max: f32) -> Option<f32> {
        let mut t_near = 0.0f32;
        let mut t_far = t_max;
        for axis in 0..3 {
            let t0 = (aabb.min[axis] - self.origin[axis]) * inv_direction[axis];
            let t1 = (aabb.max[axis] - self.origin[axis]) * inv_direction[axis];
            let (lo, hi) = if t0 <= t1 { (t0, t1) } else { (t1, t0) };
            // NaN from 0 * inf leaves the bounds untouched.
            if lo > t_near {
                t_near = lo;
            }
            if hi < t_far {
                t_far = hi;
            }
            if t_near > t_far {
                return None;
            }
        }
        Some(t_near)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn camera_vp() -> Mat4 {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y)
            .expect("valid camera");
        let proj = Mat4::perspective_rh_zo(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 100.0);
        proj * view
    }

    #[test]
    fn test_frustum_keeps_box_in_front_of_camera() {
        let frustum = Frustum::from_view_projection(&camera_vp());
        let unit = Aabb::from_center_half_extents(Vec3::ZERO, Vec3::splat(0.5));
        assert!(frustum.intersects_aabb(&unit));
    }

    #[test]
    fn test_frustum_rejects_box_behind_camera() {
        let frustum = Frustum::from_view_projection(&camera_vp());
        let behind = Aabb::from_center_half_extents(Vec3::new(0.0, 0.0, 20.0), Vec3::splat(0.5));
        assert!(!frustum.intersects_aabb(&behind));
        let far_left = Aabb::from_center_half_extents(Vec3::new(-50.0, 0.0, 0.0), Vec3::ONE);
        assert!(!frustum.intersects_aabb(&far_left));
    }

    #[test]
    fn test_transform_of_box_covers_rotated_corners() {
        let b = Aabb::from_min_max(Vec3::splat(-1.0), Vec3::ONE);
        let rotated = b.transform(&Mat4::from_rotation_y(std::f32::consts::FRAC_PI_4));
        assert_relative_eq!(rotated.max.x, std::f32::consts::SQRT_2, epsilon = 1e-4);
        assert_relative_eq!(rotated.max.y, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_ray_slab_entry_distance() {
        let ray = Ray::new(Vec3::new(0.0, 0.0, -5.0), Vec3::Z);
        let b = Aabb::from_min_max(Vec3::splat(-1.0), Vec3::ONE);
        let t = ray.intersect_aabb(&b, ray.direction.recip(), f32::INFINITY);
        assert_relative_eq!(t.expect("ray should hit the box"), 4.0);
        assert!(ray.intersect_aabb(&b, ray.direction.recip(), 3.0).is_none());
    }
}
