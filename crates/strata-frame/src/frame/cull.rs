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

//! View-frustum culling of described instances.

use super::description::VisibleInstance;
use strata_core::math::{Aabb, Frustum};

/// Indices of the instances whose world bounds intersect `frustum`, in input order.
///
/// `bounds` returns the object-space bounds of an instance's mesh; instances it has no
/// bounds for are kept.
pub fn cull_instances(
    instances: &[VisibleInstance],
    frustum: &Frustum,
    bounds: impl Fn(&VisibleInstance) -> Option<Aabb>,
) -> Vec<usize> {
    instances
        .iter()
        .enumerate()
        .filter(|(_, instance)| match bounds(instance) {
            Some(local) if local.is_valid() => {
                frustum.intersects_aabb(&local.transform(&instance.transform))
            }
            _ => true,
        })
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{MeshHandle, SubsetMask};
    use strata_core::math::{Mat4, Vec3};

    fn instance_at(id: u32, position: Vec3) -> VisibleInstance {
        VisibleInstance {
            id,
            mesh: MeshHandle(1),
            subsets: SubsetMask::ALL,
            transform: Mat4::from_translation(position),
            material_index: 0,
            translucent: false,
        }
    }

    #[test]
    fn test_instances_behind_camera_are_culled() {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y)
            .expect("valid camera basis");
        let projection = Mat4::perspective_rh_zo(1.0, 1.0, 0.1, 100.0);
        let frustum = Frustum::from_view_projection(&(projection * view));
        let instances = [
            instance_at(1, Vec3::ZERO),
            instance_at(2, Vec3::new(0.0, 0.0, 20.0)),
            instance_at(3, Vec3::new(0.0, 0.0, -50.0)),
        ];
        let unit = Aabb::from_center_half_extents(Vec3::ZERO, Vec3::splat(0.5));
        let visible = cull_instances(&instances, &frustum, |_| Some(unit));
        assert_eq!(visible, vec![0, 2]);
    }
}
