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

//! Bottom-level structures.

use crate::frame::MeshHandle;
use crate::resource::GpuResource;
use std::fmt;
use strata_core::renderer::{AccelBuildFlags, AccelStructId, AccelStructSizes, BlasGeometry};

/// Identifies the bottom-level structure of one mesh subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlasKey {
    /// Owning mesh.
    pub mesh: MeshHandle,
    /// Subset index within the mesh.
    pub subset: u32,
}

impl fmt::Display for BlasKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} subset {}", self.mesh, self.subset)
    }
}

/// A built bottom-level structure.
#[derive(Debug)]
pub struct Blas {
    pub(crate) resource: GpuResource,
    pub(crate) geometry: BlasGeometry,
    pub(crate) flags: AccelBuildFlags,
    pub(crate) sizes: AccelStructSizes,
}

impl Blas {
    /// The structure's handle.
    pub fn id(&self) -> AccelStructId {
        self.resource.accel_struct_id()
    }

    /// Whether it was built with update support.
    pub fn allows_update(&self) -> bool {
        self.flags.contains(AccelBuildFlags::ALLOW_UPDATE)
    }

    /// Geometry of the last build or refit.
    pub fn geometry(&self) -> &BlasGeometry {
        &self.geometry
    }

    /// Memory requirements reported at build time.
    pub fn sizes(&self) -> AccelStructSizes {
        self.sizes
    }
}
