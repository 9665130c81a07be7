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

//! The scene's top-level structure and its update policy.

use crate::resource::GpuResource;
use strata_core::renderer::{AccelStructId, TlasInstance};

/// How much of the top-level structure changed since its last build.
///
/// Ordered by severity so several observations combine with `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TlasState {
    /// Nothing changed; the structure is reused as is.
    #[default]
    Ready,
    /// Same instances, but transforms or referenced geometry moved: refit in place.
    TrianglesModified,
    /// Instances were added, removed or re-pointed: full rebuild.
    ElementsModified,
}

impl TlasState {
    /// The more severe of two states.
    #[inline]
    pub fn merge(self, other: TlasState) -> TlasState {
        self.max(other)
    }
}

/// What a top-level update did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlasAction {
    /// Built from scratch.
    Rebuilt,
    /// Updated in place.
    Refitted,
    /// Left untouched.
    Skipped,
}

/// The scene's top-level structure.
#[derive(Debug)]
pub struct Tlas {
    pub(crate) resource: GpuResource,
    /// Instance count the allocation was sized for.
    pub(crate) capacity: u32,
    /// Instances of the last build or refit.
    pub(crate) instances: Vec<TlasInstance>,
}

impl Tlas {
    /// The structure's handle.
    pub fn id(&self) -> AccelStructId {
        self.resource.accel_struct_id()
    }

    /// Instances the allocation can hold without reallocation.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Instances of the last build or refit.
    pub fn instances(&self) -> &[TlasInstance] {
        &self.instances
    }

    /// The tracked resource, for attaching descriptors.
    pub fn resource_mut(&mut self) -> &mut GpuResource {
        &mut self.resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_most_severe_state() {
        assert_eq!(
            TlasState::Ready.merge(TlasState::TrianglesModified),
            TlasState::TrianglesModified
        );
        assert_eq!(
            TlasState::ElementsModified.merge(TlasState::TrianglesModified),
            TlasState::ElementsModified
        );
        assert_eq!(TlasState::default(), TlasState::Ready);
    }
}
