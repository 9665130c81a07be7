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

//! Per-frame input and output.

use super::mesh::MeshHandle;
use crate::accel::TlasAction;
use crate::resource::SweepStats;
use serde::{Deserialize, Serialize};
use strata_core::math::{Frustum, Mat4, Vec3};
use strata_core::renderer::{TextureId, Ticket};

/// Which subsets of a mesh an instance draws; bit `i` selects subset `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubsetMask(pub u64);

impl SubsetMask {
    /// Every subset.
    pub const ALL: SubsetMask = SubsetMask(u64::MAX);

    /// Only `subset`. Subsets past bit 63 cannot be selected and give an empty mask.
    #[inline]
    pub const fn single(subset: u32) -> Self {
        match 1u64.checked_shl(subset) {
            Some(bit) => SubsetMask(bit),
            None => SubsetMask(0),
        }
    }

    /// Whether `subset` is selected.
    #[inline]
    pub const fn contains(self, subset: u32) -> bool {
        subset < 64 && self.0 & (1 << subset) != 0
    }
}

/// One mesh instance the scene wants rendered this frame.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleInstance {
    /// Caller-chosen identifier, stable across frames; reported back by picking.
    pub id: u32,
    /// The mesh drawn.
    pub mesh: MeshHandle,
    /// Subsets drawn.
    pub subsets: SubsetMask,
    /// Object-to-world transform.
    pub transform: Mat4,
    /// Material table index.
    pub material_index: u32,
    /// Drawn in the back-to-front translucent pass instead of the opaque passes.
    pub translucent: bool,
}

/// Camera matrices for the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraView {
    /// World-to-view transform.
    pub view: Mat4,
    /// View-to-clip transform.
    pub projection: Mat4,
    /// World-space eye position.
    pub position: Vec3,
    /// Sub-pixel jitter in pixels, applied when upscaling temporally.
    pub jitter: [f32; 2],
}

impl CameraView {
    /// World-to-clip transform.
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }

    /// Clip planes of the view.
    pub fn frustum(&self) -> Frustum {
        Frustum::from_view_projection(&self.view_projection())
    }
}

impl Default for CameraView {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            position: Vec3::ZERO,
            jitter: [0.0; 2],
        }
    }
}

/// Shape of a light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    /// Infinitely distant light shining along `direction`.
    Directional {
        /// Direction the light travels.
        direction: Vec3,
    },
    /// Omnidirectional light.
    Point {
        /// World position.
        position: Vec3,
        /// Distance at which the light fades out.
        range: f32,
    },
    /// Cone light.
    Spot {
        /// World position.
        position: Vec3,
        /// Cone axis.
        direction: Vec3,
        /// Distance at which the light fades out.
        range: f32,
        /// Half-angle of the cone, in radians.
        outer_angle: f32,
    },
}

/// A light of the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    /// Shape and placement.
    pub kind: LightKind,
    /// Linear color.
    pub color: Vec3,
    /// Intensity multiplier.
    pub intensity: f32,
}

/// Debug visualisations drawn by the editor overlay pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DebugView {
    /// Regular output.
    #[default]
    None,
    /// World normals.
    Normals,
    /// Linearised depth.
    Depth,
    /// Indirect lighting only.
    GlobalIllumination,
}

/// Editor state that affects rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditorOverlay {
    /// Instance ids drawn with a selection outline.
    pub selected: Vec<u32>,
    /// Active debug visualisation.
    pub debug_view: DebugView,
}

impl EditorOverlay {
    /// Whether the overlay pass has anything to draw.
    pub fn is_active(&self) -> bool {
        !self.selected.is_empty() || self.debug_view != DebugView::None
    }
}

/// Everything the frame manager needs to render one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameDescription {
    /// Instances in the scene.
    pub instances: Vec<VisibleInstance>,
    /// Camera.
    pub camera: CameraView,
    /// Lights.
    pub lights: Vec<Light>,
    /// Editor overlay.
    pub overlay: EditorOverlay,
}

/// Counters describing one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Instances in the description.
    pub instances: usize,
    /// Instances rejected by frustum culling.
    pub culled: usize,
    /// Indexed draws recorded across all passes.
    pub draw_calls: u32,
    /// Bottom-level builds recorded.
    pub blas_builds: u32,
    /// Bottom-level refits recorded.
    pub blas_refits: u32,
    /// What happened to the top-level structure, if ray tracing ran.
    pub tlas: Option<TlasAction>,
    /// Bytes written to the upload ring.
    pub upload_bytes: u64,
    /// Whether the CPU had to block on the frame slot's previous ticket.
    pub waited_for_slot: bool,
    /// Released by the staging sweeps of this frame.
    pub swept: SweepStats,
}

/// Smoothed GPU durations in milliseconds; zero until the first readback.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GpuTimings {
    /// Whole frame.
    pub frame_ms: f32,
    /// Main lighting pass, GI dispatch included.
    pub main_pass_ms: f32,
}

/// What a rendered frame hands back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameOutput {
    /// Final color, left shader-readable.
    pub color: TextureId,
    /// Scene depth of the frame.
    pub depth: TextureId,
    /// Graphics ticket the frame signals.
    pub ticket: Ticket,
    /// Zero-based frame counter.
    pub frame_index: u64,
    /// Counters.
    pub stats: FrameStats,
    /// Latest smoothed GPU timings.
    pub timings: GpuTimings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subset_mask_bits() {
        let mask = SubsetMask(0b101);
        assert!(mask.contains(0));
        assert!(!mask.contains(1));
        assert!(mask.contains(2));
        assert!(!SubsetMask::ALL.contains(64));
        assert_eq!(SubsetMask::single(3), SubsetMask(8));
    }

    #[test]
    fn test_single_subset_out_of_range_is_empty() {
        assert_eq!(SubsetMask::single(63), SubsetMask(1 << 63));
        for subset in [64, 65, 200, u32::MAX] {
            let mask = SubsetMask::single(subset);
            assert_eq!(mask, SubsetMask(0));
            assert!(!mask.contains(subset));
        }
    }

    #[test]
    fn test_overlay_activity() {
        assert!(!EditorOverlay::default().is_active());
        let overlay = EditorOverlay {
            selected: vec![1],
            ..Default::default()
        };
        assert!(overlay.is_active());
    }
}
