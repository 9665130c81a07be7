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

//! Cache of bottom-level structures and the scene's top-level structure.

use super::blas::{Blas, BlasKey};
use super::scratch::ScratchBuffer;
use super::tlas::{Tlas, TlasAction, TlasState};
use crate::error::FrameError;
use crate::frame::MeshHandle;
use crate::resource::{BarrierBatch, GpuResource};
use std::collections::HashMap;
use std::sync::Arc;
use strata_core::renderer::{
    AccelBuildFlags, AccelBuildMode, AccelStructId, AccelStructInputs, AccelStructKind,
    BlasBuild, BlasGeometry, BufferId, CommandList, GraphicsBackend, ResourceHandle,
    ResourceKind, ResourceState, TlasBuild, TlasInstance,
};

/// Build counters, cumulative since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccelStats {
    /// Bottom-level full builds.
    pub blas_builds: u64,
    /// Bottom-level refits.
    pub blas_refits: u64,
    /// Top-level full builds.
    pub tlas_rebuilds: u64,
    /// Top-level refits.
    pub tlas_refits: u64,
    /// Frames whose top-level structure was reused untouched.
    pub tlas_skips: u64,
    /// Top-level reallocations.
    pub tlas_reallocations: u64,
}

/// Owns every acceleration structure of the scene.
///
/// Mutated only from the frame loop. Structures and scratch buffers replaced during a
/// frame collect in a retire list the orchestrator releases against the frame's ticket.
#[derive(Debug)]
pub struct AccelStructCache {
    backend: Arc<dyn GraphicsBackend>,
    blases: HashMap<BlasKey, Blas>,
    tlas: Option<Tlas>,
    scratch: ScratchBuffer,
    /// Bottom-level structures written this frame; the top-level build must wait on them.
    written: Vec<AccelStructId>,
    retiring: Vec<GpuResource>,
    stats: AccelStats,
}

impl AccelStructCache {
    /// Creates an empty cache.
    pub fn new(backend: Arc<dyn GraphicsBackend>) -> Self {
        Self {
            backend,
            blases: HashMap::new(),
            tlas: None,
            scratch: ScratchBuffer::new(),
            written: Vec::new(),
            retiring: Vec::new(),
            stats: AccelStats::default(),
        }
    }

    /// Resets per-frame bookkeeping.
    pub fn begin_frame(&mut self) {
        self.scratch.begin_frame();
        self.written.clear();
    }

    /// The structure of one subset.
    pub fn blas(&self, key: BlasKey) -> Option<&Blas> {
        self.blases.get(&key)
    }

    /// Whether a subset has a structure.
    pub fn contains(&self, key: BlasKey) -> bool {
        self.blases.contains_key(&key)
    }

    /// Number of bottom-level structures.
    pub fn blas_count(&self) -> usize {
        self.blases.len()
    }

    /// The top-level structure, once built.
    pub fn tlas(&self) -> Option<&Tlas> {
        self.tlas.as_ref()
    }

    /// Mutable access to the top-level structure.
    pub fn tlas_mut(&mut self) -> Option<&mut Tlas> {
        self.tlas.as_mut()
    }

    /// Cumulative counters.
    pub fn stats(&self) -> AccelStats {
        self.stats
    }

    /// Current scratch capacity.
    pub fn scratch_capacity(&self) -> u64 {
        self.scratch.capacity()
    }

    /// Records a full build of the subset `key`, replacing any previous structure.
    ///
    /// # Errors
    ///
    /// `FrameError::EmptyAccelStruct` if `geometry` holds no triangle.
    pub fn build_blas(
        &mut self,
        list: &mut dyn CommandList,
        key: BlasKey,
        geometry: BlasGeometry,
        allow_update: bool,
        fast_build: bool,
    ) -> Result<&Blas, FrameError> {
        let mut flags = if fast_build {
            AccelBuildFlags::PREFER_FAST_BUILD
        } else {
            AccelBuildFlags::PREFER_FAST_TRACE
        };
        flags.set(AccelBuildFlags::ALLOW_UPDATE, allow_update);

        let sizes = self
            .backend
            .accel_struct_sizes(&AccelStructInputs::BottomLevel {
                geometry: std::slice::from_ref(&geometry),
                flags,
            });
        if sizes.result_bytes == 0 {
            return Err(FrameError::EmptyAccelStruct {
                what: key.to_string(),
            });
        }

        let resource = self.create_accel_struct(AccelStructKind::BottomLevel, sizes.result_bytes)?;
        let scratch = self.scratch_for(list, sizes.scratch_bytes())?;
        let dst = resource.accel_struct_id();
        list.build_blas(&BlasBuild {
            dst,
            geometry: std::slice::from_ref(&geometry),
            flags,
            mode: AccelBuildMode::Build,
            scratch,
        });
        self.written.push(dst);
        self.stats.blas_builds += 1;
        log::debug!("Built BLAS for {key} ({} triangles)", geometry.triangle_count());

        let blas = Blas {
            resource,
            geometry,
            flags,
            sizes,
        };
        if let Some(previous) = self.blases.insert(key, blas) {
            self.retiring.push(previous.resource);
        }
        Ok(&self.blases[&key])
    }

    /// Records an in-place refit of `key` against new vertex positions.
    ///
    /// # Panics
    ///
    /// If the structure was built without update support.
    ///
    /// # Errors
    ///
    /// `FrameError::UnknownMesh` if `key` has no structure.
    pub fn refit_blas(
        &mut self,
        list: &mut dyn CommandList,
        key: BlasKey,
        vertex_buffer: BufferId,
    ) -> Result<(), FrameError> {
        let (bytes, allows_update) = match self.blases.get(&key) {
            Some(blas) => (blas.sizes.scratch_bytes(), blas.allows_update()),
            None => return Err(FrameError::UnknownMesh(key.mesh.0)),
        };
        assert!(allows_update, "BLAS for {key} was built without update support");

        let scratch = self.scratch_for(list, bytes)?;
        let blas = self
            .blases
            .get_mut(&key)
            .ok_or(FrameError::UnknownMesh(key.mesh.0))?;
        blas.geometry.vertex_buffer = vertex_buffer;
        let dst = blas.id();
        list.build_blas(&BlasBuild {
            dst,
            geometry: std::slice::from_ref(&blas.geometry),
            flags: blas.flags,
            mode: AccelBuildMode::Update,
            scratch,
        });
        self.written.push(dst);
        self.stats.blas_refits += 1;
        Ok(())
    }

    /// Derives how the top-level structure must change to hold `instances`.
    pub fn classify_instances(&self, instances: &[TlasInstance]) -> TlasState {
        let Some(tlas) = &self.tlas else {
            return TlasState::ElementsModified;
        };
        let same_elements = tlas.instances.len() == instances.len()
            && tlas
                .instances
                .iter()
                .zip(instances)
                .all(|(old, new)| old.blas == new.blas);
        if !same_elements {
            return TlasState::ElementsModified;
        }
        let moved = tlas.instances.as_slice() != instances;
        let geometry_changed = instances.iter().any(|i| self.written.contains(&i.blas));
        if moved || geometry_changed {
            TlasState::TrianglesModified
        } else {
            TlasState::Ready
        }
    }

    /// Rebuilds, refits or skips the top-level structure according to `prior`.
    ///
    /// # Errors
    ///
    /// `FrameError::EmptyAccelStruct` for an empty instance list.
    pub fn build_or_refit_tlas(
        &mut self,
        list: &mut dyn CommandList,
        instances: &[TlasInstance],
        prior: TlasState,
    ) -> Result<TlasAction, FrameError> {
        let count = instances.len() as u32;
        let flags = AccelBuildFlags::ALLOW_UPDATE | AccelBuildFlags::PREFER_FAST_TRACE;
        let sizes = self.backend.accel_struct_sizes(&AccelStructInputs::TopLevel {
            instance_count: count,
            flags,
        });
        if sizes.result_bytes == 0 {
            return Err(FrameError::EmptyAccelStruct {
                what: "scene".to_string(),
            });
        }

        let refittable = self
            .tlas
            .as_ref()
            .is_some_and(|t| t.instances.len() == instances.len());
        let action = match prior {
            TlasState::Ready if self.tlas.is_some() => {
                self.stats.tlas_skips += 1;
                return Ok(TlasAction::Skipped);
            }
            TlasState::TrianglesModified if refittable => TlasAction::Refitted,
            _ => TlasAction::Rebuilt,
        };

        if action == TlasAction::Rebuilt {
            self.ensure_tlas_capacity(count)?;
        }

        let mut batch = BarrierBatch::new();
        for &blas in &self.written {
            batch.unordered_access(ResourceHandle::AccelStruct(blas));
        }
        batch.flush(list);

        let full_sizes = self.backend.accel_struct_sizes(&AccelStructInputs::TopLevel {
            instance_count: self.tlas.as_ref().map_or(count, |t| t.capacity),
            flags,
        });
        let scratch = self.scratch_for(list, full_sizes.scratch_bytes().max(sizes.scratch_bytes()))?;
        let Some(tlas) = self.tlas.as_mut() else {
            unreachable!("top-level structure allocated above or refittable");
        };
        list.build_tlas(&TlasBuild {
            dst: tlas.id(),
            instances,
            flags,
            mode: match action {
                TlasAction::Refitted => AccelBuildMode::Update,
                _ => AccelBuildMode::Build,
            },
            scratch,
        });
        tlas.instances.clear();
        tlas.instances.extend_from_slice(instances);

        match action {
            TlasAction::Refitted => self.stats.tlas_refits += 1,
            _ => self.stats.tlas_rebuilds += 1,
        }
        log::trace!("TLAS {action:?} with {count} instance(s)");
        Ok(action)
    }

    /// Drops every structure of `mesh`. Returns how many were removed.
    pub fn remove_mesh(&mut self, mesh: MeshHandle) -> usize {
        let keys: Vec<BlasKey> = self
            .blases
            .keys()
            .filter(|key| key.mesh == mesh)
            .copied()
            .collect();
        for key in &keys {
            if let Some(blas) = self.blases.remove(key) {
                self.retiring.push(blas.resource);
            }
        }
        keys.len()
    }

    /// Resources replaced since the last call; release them against the ticket of the
    /// frame that recorded their last use.
    pub fn take_retired(&mut self) -> Vec<GpuResource> {
        std::mem::take(&mut self.retiring)
    }

    /// Gives up every structure and the scratch buffer.
    pub fn release_all(&mut self) -> Vec<GpuResource> {
        let mut all = self.take_retired();
        all.extend(self.blases.drain().map(|(_, blas)| blas.resource));
        all.extend(self.tlas.take().map(|tlas| tlas.resource));
        all.extend(self.scratch.take());
        self.written.clear();
        all
    }

    fn create_accel_struct(&self, kind: AccelStructKind, size: u64) -> Result<GpuResource, FrameError> {
        let id = self.backend.create_accel_struct(kind, size)?;
        Ok(GpuResource::new(
            ResourceHandle::AccelStruct(id),
            ResourceKind::AccelStruct,
            ResourceState::ACCEL_STRUCT,
        ))
    }

    fn scratch_for(&mut self, list: &mut dyn CommandList, bytes: u64) -> Result<BufferId, FrameError> {
        let id = self
            .scratch
            .reserve(self.backend.as_ref(), bytes, &mut self.retiring)?;
        self.scratch.before_build(list);
        Ok(id)
    }

    /// Reallocates the top-level structure when it cannot hold `count` instances.
    fn ensure_tlas_capacity(&mut self, count: u32) -> Result<(), FrameError> {
        if self.tlas.as_ref().is_some_and(|t| t.capacity >= count) {
            return Ok(());
        }
        let capacity = count.next_power_of_two();
        let sizes = self.backend.accel_struct_sizes(&AccelStructInputs::TopLevel {
            instance_count: capacity,
            flags: AccelBuildFlags::ALLOW_UPDATE | AccelBuildFlags::PREFER_FAST_TRACE,
        });
        let resource = self.create_accel_struct(AccelStructKind::TopLevel, sizes.result_bytes)?;
        let replaced = self.tlas.replace(Tlas {
            resource,
            capacity,
            instances: Vec::new(),
        });
        if let Some(old) = replaced {
            self.retiring.push(old.resource);
        }
        self.stats.tlas_reallocations += 1;
        log::debug!("TLAS reallocated for {capacity} instance(s)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::math::{Mat4, Ray, Vec3};
    use strata_core::renderer::{
        BufferDescriptor, BufferUsage, IndexFormat, QueueKind, RayHit, Ticket,
    };
    use strata_core::testing::MockBackend;

    struct Scene {
        mock: MockBackend,
        cache: AccelStructCache,
        geometry: BlasGeometry,
    }

    fn scene() -> Scene {
        let mock = MockBackend::new();
        let positions: [f32; 9] = [-1.0, -1.0, 0.0, 1.0, -1.0, 0.0, 0.0, 1.0, 0.0];
        let buffer = |bytes: &[u8]| {
            let id = mock
                .create_buffer(&BufferDescriptor {
                    label: None,
                    size: bytes.len() as u64,
                    usage: BufferUsage::ACCEL_INPUT,
                })
                .expect("buffer");
            mock.write_buffer(id, 0, bytes).expect("write");
            id
        };
        let geometry = BlasGeometry {
            vertex_buffer: buffer(bytemuck::cast_slice(&positions)),
            vertex_stride: 12,
            vertex_count: 3,
            index_buffer: buffer(bytemuck::cast_slice(&[0u32, 1, 2])),
            index_format: IndexFormat::Uint32,
            indices: 0..3,
            opaque: true,
        };
        Scene {
            cache: AccelStructCache::new(Arc::new(mock.clone())),
            mock,
            geometry,
        }
    }

    fn key(mesh: u32) -> BlasKey {
        BlasKey {
            mesh: MeshHandle(mesh),
            subset: 0,
        }
    }

    fn record(mock: &MockBackend, f: impl FnOnce(&mut dyn CommandList)) {
        let allocator = mock
            .create_command_allocator(QueueKind::Graphics)
            .expect("allocator");
        let mut list = mock
            .begin_command_list(QueueKind::Graphics, allocator, None)
            .expect("list");
        f(list.as_mut());
        let id = list.finish().expect("finish");
        let ticket: Ticket = mock.signaled(QueueKind::Graphics).next();
        mock.submit(QueueKind::Graphics, &[id], ticket).expect("submit");
    }

    fn instance(blas: AccelStructId, x: f32) -> TlasInstance {
        TlasInstance {
            blas,
            transform: Mat4::from_translation(Vec3::new(x, 0.0, 0.0)),
            instance_id: 0,
            mask: 0xFF,
        }
    }

    #[test]
    fn test_transform_change_takes_refit_path() {
        let mut s = scene();
        let mut blas = AccelStructId(0);
        record(&s.mock, |list| {
            blas = s
                .cache
                .build_blas(list, key(1), s.geometry.clone(), false, false)
                .expect("blas")
                .id();
            let instances = [instance(blas, 0.0)];
            let prior = s.cache.classify_instances(&instances);
            assert_eq!(prior, TlasState::ElementsModified);
            let action = s.cache.build_or_refit_tlas(list, &instances, prior).expect("tlas");
            assert_eq!(action, TlasAction::Rebuilt);
        });

        s.cache.begin_frame();
        record(&s.mock, |list| {
            let instances = [instance(blas, 5.0)];
            let prior = s.cache.classify_instances(&instances);
            assert_eq!(prior, TlasState::TrianglesModified);
            let action = s.cache.build_or_refit_tlas(list, &instances, prior).expect("tlas");
            assert_eq!(action, TlasAction::Refitted);
        });

        let counters = s.mock.counters();
        assert_eq!(counters.tlas_builds, 1);
        assert_eq!(counters.tlas_updates, 1);
    }

    #[test]
    fn test_unchanged_scene_skips_the_tlas() {
        let mut s = scene();
        let mut instances = Vec::new();
        record(&s.mock, |list| {
            let blas = s
                .cache
                .build_blas(list, key(1), s.geometry.clone(), false, false)
                .expect("blas")
                .id();
            instances.push(instance(blas, 0.0));
            s.cache
                .build_or_refit_tlas(list, &instances, TlasState::ElementsModified)
                .expect("tlas");
        });
        s.cache.begin_frame();
        assert_eq!(s.cache.classify_instances(&instances), TlasState::Ready);
        record(&s.mock, |list| {
            let action = s
                .cache
                .build_or_refit_tlas(list, &instances, TlasState::Ready)
                .expect("tlas");
            assert_eq!(action, TlasAction::Skipped);
        });
        assert_eq!(s.cache.stats().tlas_skips, 1);
    }

    #[test]
    fn test_added_instance_forces_rebuild() {
        let mut s = scene();
        record(&s.mock, |list| {
            let blas = s
                .cache
                .build_blas(list, key(1), s.geometry.clone(), false, false)
                .expect("blas")
                .id();
            let one = [instance(blas, 0.0)];
            s.cache
                .build_or_refit_tlas(list, &one, TlasState::ElementsModified)
                .expect("tlas");
            let two = [instance(blas, 0.0), instance(blas, 3.0)];
            assert_eq!(s.cache.classify_instances(&two), TlasState::ElementsModified);
            let action = s
                .cache
                .build_or_refit_tlas(list, &two, TlasState::ElementsModified)
                .expect("tlas");
            assert_eq!(action, TlasAction::Rebuilt);
        });
        let tlas = s.cache.tlas().expect("tlas");
        assert_eq!(tlas.capacity(), 2);
        assert_eq!(s.cache.stats().tlas_reallocations, 2);
        assert_eq!(s.cache.take_retired().len(), 1);
    }

    #[test]
    fn test_empty_geometry_is_an_error() {
        let mut s = scene();
        let mut empty = s.geometry.clone();
        empty.indices = 0..0;
        record(&s.mock, |list| {
            let err = s
                .cache
                .build_blas(list, key(1), empty, false, false)
                .expect_err("no triangles");
            assert!(matches!(err, FrameError::EmptyAccelStruct { .. }));
            let err = s
                .cache
                .build_or_refit_tlas(list, &[], TlasState::ElementsModified)
                .expect_err("no instances");
            assert!(matches!(err, FrameError::EmptyAccelStruct { .. }));
        });
    }

    #[test]
    #[should_panic(expected = "without update support")]
    fn test_refit_of_static_blas_panics() {
        let mut s = scene();
        let vertices = s.geometry.vertex_buffer;
        record(&s.mock, |list| {
            s.cache
                .build_blas(list, key(1), s.geometry.clone(), false, false)
                .expect("blas");
            let _ = s.cache.refit_blas(list, key(1), vertices);
        });
    }

    fn trace_grid(mock: &MockBackend, tlas: AccelStructId) -> Vec<Option<RayHit>> {
        let steps = 13;
        let coord = |i: u32| -1.5 + 3.0 * i as f32 / (steps - 1) as f32;
        (0..steps * steps)
            .map(|i| {
                let origin = Vec3::new(coord(i % steps), coord(i / steps), 5.0);
                let ray = Ray::new(origin, Vec3::new(0.0, 0.0, -1.0));
                mock.trace_ray(tlas, &ray, f32::INFINITY)
            })
            .collect()
    }

    #[test]
    fn test_refit_with_same_vertices_keeps_hits() {
        let mut s = scene();
        let vertices = s.geometry.vertex_buffer;
        let mut instances = Vec::new();
        record(&s.mock, |list| {
            let blas = s
                .cache
                .build_blas(list, key(1), s.geometry.clone(), true, false)
                .expect("blas")
                .id();
            instances.push(instance(blas, 0.0));
            s.cache
                .build_or_refit_tlas(list, &instances, TlasState::ElementsModified)
                .expect("tlas");
        });
        let tlas = s.cache.tlas().expect("tlas").id();
        let before = trace_grid(&s.mock, tlas);
        assert!(before.iter().any(Option::is_some));
        assert!(before.iter().any(Option::is_none));

        s.cache.begin_frame();
        record(&s.mock, |list| {
            s.cache.refit_blas(list, key(1), vertices).expect("refit");
            let prior = s.cache.classify_instances(&instances);
            assert_eq!(prior, TlasState::TrianglesModified);
            let action = s.cache.build_or_refit_tlas(list, &instances, prior).expect("tlas");
            assert_eq!(action, TlasAction::Refitted);
        });
        assert_eq!(s.mock.counters().blas_updates, 1);
        assert_eq!(trace_grid(&s.mock, tlas), before);
    }

    #[test]
    fn test_successive_builds_are_separated_by_barriers() {
        let mut s = scene();
        record(&s.mock, |list| {
            for mesh in 1..=3 {
                s.cache
                    .build_blas(list, key(mesh), s.geometry.clone(), true, true)
                    .expect("blas");
            }
        });
        let submission = s.mock.last_submission(QueueKind::Graphics).expect("submitted");
        let scratch_barriers = submission
            .commands
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    strata_core::testing::RecordedCommand::Barrier(
                        strata_core::renderer::ResourceBarrier::UnorderedAccess { .. }
                    )
                )
            })
            .count();
        assert_eq!(scratch_barriers, 2);
        assert_eq!(s.mock.counters().blas_builds, 3);
    }

    #[test]
    fn test_remove_mesh_retires_its_structures() {
        let mut s = scene();
        record(&s.mock, |list| {
            for subset in 0..2 {
                let key = BlasKey {
                    mesh: MeshHandle(4),
                    subset,
                };
                s.cache
                    .build_blas(list, key, s.geometry.clone(), false, false)
                    .expect("blas");
            }
        });
        assert_eq!(s.cache.remove_mesh(MeshHandle(4)), 2);
        assert_eq!(s.cache.blas_count(), 0);
        assert_eq!(s.cache.take_retired().len(), 2);
    }
}
