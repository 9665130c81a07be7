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

//! Registry of host-side acceleration structures, shared by backends that build
//! and trace on the CPU.

use super::instances::InstanceBvh;
use super::triangles::{gather_geometry, TriangleBvh};
use crate::math::Ray;
use crate::renderer::api::*;
use crate::renderer::error::ResourceError;
use std::collections::HashMap;

const NODE_BYTES: u64 = 32;
const TRIANGLE_BYTES: u64 = 12;
const POSITION_BYTES: u64 = 12;
const INSTANCE_BYTES: u64 = 64;

#[derive(Debug, Clone)]
enum Content {
    Unbuilt,
    Bottom(TriangleBvh),
    Top(InstanceBvh),
}

#[derive(Debug, Clone)]
struct Entry {
    kind: AccelStructKind,
    size: u64,
    content: Content,
}

/// Owns every acceleration structure of a host-side backend.
#[derive(Debug, Default)]
pub struct HostAccelStore {
    entries: HashMap<AccelStructId, Entry>,
    next_id: u64,
}

impl HostAccelStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Memory requirements of a build; zero for inputs with no primitive.
    pub fn prebuild_sizes(inputs: &AccelStructInputs<'_>) -> AccelStructSizes {
        match *inputs {
            AccelStructInputs::BottomLevel { geometry, .. } => {
                let triangles: u64 = geometry.iter().map(|g| g.triangle_count() as u64).sum();
                if triangles == 0 {
                    return AccelStructSizes::default();
                }
                let vertices: u64 = geometry.iter().map(|g| g.vertex_count as u64).sum();
                let nodes = triangles * 2;
                AccelStructSizes {
                    result_bytes: nodes * NODE_BYTES
                        + triangles * TRIANGLE_BYTES
                        + vertices * POSITION_BYTES,
                    build_scratch_bytes: triangles * (NODE_BYTES + 4),
                    update_scratch_bytes: nodes * 8,
                }
            }
            AccelStructInputs::TopLevel { instance_count, .. } => {
                let n = instance_count as u64;
                if n == 0 {
                    return AccelStructSizes::default();
                }
                AccelStructSizes {
                    result_bytes: n * INSTANCE_BYTES + 2 * n * NODE_BYTES,
                    build_scratch_bytes: n * NODE_BYTES,
                    update_scratch_bytes: n * 8,
                }
            }
        }
    }

    /// Allocates an unbuilt structure.
    pub fn create(&mut self, kind: AccelStructKind, size: u64) -> AccelStructId {
        self.next_id += 1;
        let id = AccelStructId(self.next_id);
        self.entries.insert(
            id,
            Entry {
                kind,
                size,
                content: Content::Unbuilt,
            },
        );
        id
    }

    /// Releases a structure.
    pub fn destroy(&mut self, id: AccelStructId) -> Result<(), ResourceError> {
        self.entries
            .remove(&id)
            .map(|_| ())
            .ok_or(ResourceError::NotFound(ResourceHandle::AccelStruct(id)))
    }

    /// Whether `id` names a live structure.
    pub fn contains(&self, id: AccelStructId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of live structures.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when no structure is alive.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Executes a recorded bottom-level build or update.
    ///
    /// `read` resolves the current contents of geometry buffers.
    pub fn execute_blas<'a>(
        &mut self,
        build: &BlasBuildRecord,
        read: impl Fn(BufferId) -> Option<&'a [u8]>,
    ) -> Result<(), ResourceError> {
        let entry = self.entry_mut(build.dst, AccelStructKind::BottomLevel)?;
        let (positions, triangles) = gather_geometry(&build.geometry, read)?;

        let required = Self::prebuild_sizes(&AccelStructInputs::BottomLevel {
            geometry: &build.geometry,
            flags: build.flags,
        })
        .result_bytes;
        if required > entry.size {
            return Err(ResourceError::OutOfBounds {
                offset: 0,
                len: required,
                capacity: entry.size,
            });
        }

        log::trace!(
            "Host {:?} of {:?}: {} triangle(s)",
            build.mode,
            build.dst,
            triangles.len()
        );
        match (build.mode, &mut entry.content) {
            (AccelBuildMode::Build, content) => {
                let allow_update = build.flags.contains(AccelBuildFlags::ALLOW_UPDATE);
                *content = Content::Bottom(TriangleBvh::build(positions, triangles, allow_update)?);
                Ok(())
            }
            (AccelBuildMode::Update, Content::Bottom(blas)) => blas.refit(positions, &triangles),
            (AccelBuildMode::Update, _) => Err(ResourceError::InvalidOperation(format!(
                "update of {:?} before any build",
                build.dst
            ))),
        }
    }

    /// Executes a recorded top-level build or update.
    pub fn execute_tlas(&mut self, build: &TlasBuildRecord) -> Result<(), ResourceError> {
        let entries = &self.entries;
        let blas_bounds = |id: AccelStructId| match entries.get(&id).map(|e| &e.content) {
            Some(Content::Bottom(blas)) => Some(blas.bounds()),
            _ => None,
        };

        let content = match build.mode {
            AccelBuildMode::Build => Content::Top(InstanceBvh::build(&build.instances, blas_bounds)?),
            AccelBuildMode::Update => match entries.get(&build.dst).map(|e| &e.content) {
                Some(Content::Top(existing)) => {
                    if !build.flags.contains(AccelBuildFlags::ALLOW_UPDATE) {
                        return Err(ResourceError::InvalidOperation(
                            "top-level update without ALLOW_UPDATE".into(),
                        ));
                    }
                    let mut updated = existing.clone();
                    updated.refit(&build.instances, blas_bounds)?;
                    Content::Top(updated)
                }
                _ => {
                    return Err(ResourceError::InvalidOperation(format!(
                        "update of {:?} before any build",
                        build.dst
                    )))
                }
            },
        };

        let entry = self.entry_mut(build.dst, AccelStructKind::TopLevel)?;
        entry.content = content;
        log::trace!(
            "Host {:?} of {:?}: {} instance(s)",
            build.mode,
            build.dst,
            build.instances.len()
        );
        Ok(())
    }

    /// Closest-hit query against a built top-level structure.
    pub fn trace(&self, tlas: AccelStructId, ray: &Ray, max_distance: f32) -> Option<RayHit> {
        let Some(Entry {
            content: Content::Top(top),
            ..
        }) = self.entries.get(&tlas)
        else {
            return None;
        };
        top.intersect(ray, max_distance, u8::MAX, |id| {
            match self.entries.get(&id).map(|e| &e.content) {
                Some(Content::Bottom(blas)) => Some(blas),
                _ => None,
            }
        })
    }

    fn entry_mut(
        &mut self,
        id: AccelStructId,
        kind: AccelStructKind,
    ) -> Result<&mut Entry, ResourceError> {
        match self.entries.get_mut(&id) {
            Some(entry) if entry.kind == kind => Ok(entry),
            Some(entry) => Err(ResourceError::InvalidOperation(format!(
                "{id:?} is a {:?} structure, expected {kind:?}",
                entry.kind
            ))),
            None => Err(ResourceError::NotFound(ResourceHandle::AccelStruct(id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{Mat4, Vec3};
    use approx::assert_relative_eq;

    const VB: BufferId = BufferId(1);
    const IB: BufferId = BufferId(2);
    const SCRATCH: BufferId = BufferId(3);

    fn triangle_buffers() -> (Vec<u8>, Vec<u8>) {
        let positions = [-1.0f32, -1.0, 0.0, 1.0, -1.0, 0.0, 0.0, 1.0, 0.0];
        (
            bytemuck::cast_slice(&positions).to_vec(),
            bytemuck::cast_slice(&[0u32, 1, 2]).to_vec(),
        )
    }

    fn geometry() -> Vec<BlasGeometry> {
        vec![BlasGeometry {
            vertex_buffer: VB,
            vertex_stride: 12,
            vertex_count: 3,
            index_buffer: IB,
            index_format: IndexFormat::Uint32,
            indices: 0..3,
            opaque: true,
        }]
    }

    fn build_scene(store: &mut HostAccelStore, transform: Mat4) -> (AccelStructId, AccelStructId) {
        let (vertices, indices) = triangle_buffers();
        let geometry = geometry();
        let flags = AccelBuildFlags::ALLOW_UPDATE;
        let sizes = HostAccelStore::prebuild_sizes(&AccelStructInputs::BottomLevel {
            geometry: &geometry,
            flags,
        });
        let blas = store.create(AccelStructKind::BottomLevel, sizes.result_bytes);
        store
            .execute_blas(
                &BlasBuildRecord {
                    dst: blas,
                    geometry,
                    flags,
                    mode: AccelBuildMode::Build,
                    scratch: SCRATCH,
                },
                |id| match id {
                    VB => Some(vertices.as_slice()),
                    IB => Some(indices.as_slice()),
                    _ => None,
                },
            )
            .expect("blas build");

        let tlas = store.create(AccelStructKind::TopLevel, 1024);
        store
            .execute_tlas(&TlasBuildRecord {
                dst: tlas,
                instances: vec![TlasInstance {
                    blas,
                    transform,
                    instance_id: 42,
                    mask: 0xFF,
                }],
                flags,
                mode: AccelBuildMode::Build,
                scratch: SCRATCH,
            })
            .expect("tlas build");
        (blas, tlas)
    }

    #[test]
    fn test_trace_through_translated_instance() {
        let mut store = HostAccelStore::new();
        let (_, tlas) = build_scene(&mut store, Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0)));
        let hit = store
            .trace(tlas, &Ray::new(Vec3::ZERO, -Vec3::Z), f32::INFINITY)
            .expect("ray should hit the instance");
        assert_eq!(hit.instance_id, 42);
        assert_relative_eq!(hit.distance, 5.0, epsilon = 1e-5);
    }

    #[test]
    fn test_tlas_update_follows_new_transform() {
        let mut store = HostAccelStore::new();
        let (blas, tlas) = build_scene(&mut store, Mat4::IDENTITY);
        store
            .execute_tlas(&TlasBuildRecord {
                dst: tlas,
                instances: vec![TlasInstance {
                    blas,
                    transform: Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0)),
                    instance_id: 42,
                    mask: 0xFF,
                }],
                flags: AccelBuildFlags::ALLOW_UPDATE,
                mode: AccelBuildMode::Update,
                scratch: SCRATCH,
            })
            .expect("tlas update");
        let ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), -Vec3::Z);
        assert!(store.trace(tlas, &ray, f32::INFINITY).is_none());
        let moved = Ray::new(Vec3::new(10.0, 0.0, 5.0), -Vec3::Z);
        assert!(store.trace(tlas, &moved, f32::INFINITY).is_some());
    }

    #[test]
    fn test_empty_inputs_report_zero_sizes() {
        let sizes = HostAccelStore::prebuild_sizes(&AccelStructInputs::TopLevel {
            instance_count: 0,
            flags: AccelBuildFlags::empty(),
        });
        assert_eq!(sizes, AccelStructSizes::default());
    }

    #[test]
    fn test_update_before_build_is_rejected() {
        let mut store = HostAccelStore::new();
        let blas = store.create(AccelStructKind::BottomLevel, 4096);
        let (vertices, indices) = triangle_buffers();
        let result = store.execute_blas(
            &BlasBuildRecord {
                dst: blas,
                geometry: geometry(),
                flags: AccelBuildFlags::ALLOW_UPDATE,
                mode: AccelBuildMode::Update,
                scratch: SCRATCH,
            },
            |id| match id {
                VB => Some(vertices.as_slice()),
                IB => Some(indices.as_slice()),
                _ => None,
            },
        );
        assert!(matches!(result, Err(ResourceError::InvalidOperation(_))));
    }
}
