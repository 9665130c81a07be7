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

//! Top-level structure: a BVH over the world bounds of transformed instances.

use super::bvh::Bvh;
use super::triangles::TriangleBvh;
use crate::math::{Aabb, Mat4, Ray};
use crate::renderer::api::{AccelStructId, RayHit, ResourceHandle, TlasInstance};
use crate::renderer::error::ResourceError;

#[derive(Debug, Clone, PartialEq)]
struct PlacedInstance {
    blas: AccelStructId,
    world_to_object: Mat4,
    instance_id: u32,
    mask: u8,
    world_bounds: Aabb,
}

/// Host-side top-level acceleration structure.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceBvh {
    instances: Vec<PlacedInstance>,
    bvh: Bvh,
}

impl InstanceBvh {
    /// Builds the hierarchy. `blas_bounds` resolves the object-space bounds of each
    /// referenced bottom-level structure.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown bottom-level structure, `InvalidOperation` for a
    /// singular transform.
    pub fn build(
        instances: &[TlasInstance],
        blas_bounds: impl Fn(AccelStructId) -> Option<Aabb>,
    ) -> Result<Self, ResourceError> {
        let placed = place_instances(instances, &blas_bounds)?;
        let bounds: Vec<Aabb> = placed.iter().map(|p| p.world_bounds).collect();
        Ok(Self {
            bvh: Bvh::build(&bounds),
            instances: placed,
        })
    }

    /// Refits to new transforms (and refitted bottom-level bounds). The instance list
    /// must reference the same structures in the same order as the original build.
    pub fn refit(
        &mut self,
        instances: &[TlasInstance],
        blas_bounds: impl Fn(AccelStructId) -> Option<Aabb>,
    ) -> Result<(), ResourceError> {
        let same_set = instances.len() == self.instances.len()
            && instances
                .iter()
                .zip(&self.instances)
                .all(|(new, old)| new.blas == old.blas);
        if !same_set {
            return Err(ResourceError::InvalidOperation(
                "top-level update must keep the instance set".into(),
            ));
        }
        self.instances = place_instances(instances, &blas_bounds)?;
        let bounds: Vec<Aabb> = self.instances.iter().map(|p| p.world_bounds).collect();
        self.bvh.refit(&bounds);
        Ok(())
    }

    /// Number of instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// `true` when the structure holds no instance.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Closest hit among instances whose mask overlaps `ray_mask`.
    pub fn intersect<'a>(
        &self,
        ray: &Ray,
        t_max: f32,
        ray_mask: u8,
        lookup: impl Fn(AccelStructId) -> Option<&'a TriangleBvh>,
    ) -> Option<RayHit> {
        self.bvh
            .closest_hit(ray, t_max, |index, closest| {
                let instance = &self.instances[index as usize];
                if instance.mask & ray_mask == 0 {
                    return None;
                }
                let blas = lookup(instance.blas)?;
                let local = ray.transformed(&instance.world_to_object);
                blas.intersect(&local, closest).map(|hit| {
                    (
                        hit.t,
                        RayHit {
                            distance: hit.t,
                            instance_id: instance.instance_id,
                            primitive_index: hit.primitive,
                            barycentrics: [hit.u, hit.v],
                        },
                    )
                })
            })
            .map(|(_, hit)| hit)
    }
}

fn place_instances(
    instances: &[TlasInstance],
    blas_bounds: &impl Fn(AccelStructId) -> Option<Aabb>,
) -> Result<Vec<PlacedInstance>, ResourceError> {
    instances
        .iter()
        .map(|instance| {
            let local_bounds = blas_bounds(instance.blas)
                .ok_or(ResourceError::NotFound(ResourceHandle::AccelStruct(instance.blas)))?;
            let world_to_object = instance.transform.affine_inverse().ok_or_else(|| {
                ResourceError::InvalidOperation(format!(
                    "instance {} has a singular transform",
                    instance.instance_id
                ))
            })?;
            Ok(PlacedInstance {
                blas: instance.blas,
                world_to_object,
                instance_id: instance.instance_id,
                mask: instance.mask,
                world_bounds: local_bounds.transform(&instance.transform),
            })
        })
        .collect()
}
