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

//! The ordered pass sequence of a frame.

use strata_core::renderer::PipelineKey;

/// One step of the frame's pass sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    /// Opaque geometry into the depth buffer.
    DepthPrepass,
    /// Ray-traced global illumination dispatch, writing the GI reservoirs.
    RayTracedGi,
    /// Opaque geometry shaded against the depth pre-pass.
    OpaqueLighting,
    /// Translucent geometry, back to front.
    Translucent,
    /// Fullscreen post-processing into the output target.
    PostProcess,
    /// Selection outlines and debug views.
    EditorOverlay,
    /// Temporal upscale from the render resolution to the output resolution.
    TemporalUpscale,
}

impl PassKind {
    /// Label used for render passes and debug groups.
    pub const fn label(self) -> &'static str {
        match self {
            PassKind::DepthPrepass => "Depth Prepass",
            PassKind::RayTracedGi => "Ray Traced GI",
            PassKind::OpaqueLighting => "Opaque Lighting",
            PassKind::Translucent => "Translucent",
            PassKind::PostProcess => "Post Process",
            PassKind::EditorOverlay => "Editor Overlay",
            PassKind::TemporalUpscale => "Temporal Upscale",
        }
    }

    /// Pipeline the pass binds.
    pub const fn pipeline(self) -> PipelineKey {
        PipelineKey(match self {
            PassKind::DepthPrepass => "depth_prepass",
            PassKind::RayTracedGi => "rt_gi",
            PassKind::OpaqueLighting => "opaque_lit",
            PassKind::Translucent => "translucent_lit",
            PassKind::PostProcess => "post_process",
            PassKind::EditorOverlay => "editor_overlay",
            PassKind::TemporalUpscale => "temporal_upscale",
        })
    }

    /// Whether the pass is a compute dispatch rather than a render pass.
    pub const fn is_compute(self) -> bool {
        matches!(self, PassKind::RayTracedGi | PassKind::TemporalUpscale)
    }
}

/// The passes of one frame, in execution order.
pub fn pass_sequence(ray_tracing: bool, overlay: bool, upscaling: bool) -> Vec<PassKind> {
    let mut passes = vec![PassKind::DepthPrepass];
    if ray_tracing {
        passes.push(PassKind::RayTracedGi);
    }
    passes.extend([
        PassKind::OpaqueLighting,
        PassKind::Translucent,
        PassKind::PostProcess,
    ]);
    if overlay {
        passes.push(PassKind::EditorOverlay);
    }
    if upscaling {
        passes.push(PassKind::TemporalUpscale);
    }
    passes
}

/// A translucent draw and its squared distance to the camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawItem {
    /// Index of the instance's parameter record.
    pub param_index: u32,
    /// Squared distance from the camera to the instance's world bounds center.
    pub distance_sq: f32,
}

/// Sorts farthest first. Equal distances keep no particular order.
pub fn sort_back_to_front(items: &mut [DrawItem]) {
    items.sort_unstable_by(|a, b| b.distance_sq.total_cmp(&a.distance_sq));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_order() {
        assert_eq!(
            pass_sequence(true, true, true),
            vec![
                PassKind::DepthPrepass,
                PassKind::RayTracedGi,
                PassKind::OpaqueLighting,
                PassKind::Translucent,
                PassKind::PostProcess,
                PassKind::EditorOverlay,
                PassKind::TemporalUpscale,
            ]
        );
        let minimal = pass_sequence(false, false, false);
        assert!(!minimal.contains(&PassKind::RayTracedGi));
        assert_eq!(minimal.last(), Some(&PassKind::PostProcess));
    }

    #[test]
    fn test_back_to_front() {
        let mut items = [1.0, 9.0, 4.0].map(|d| DrawItem {
            param_index: d as u32,
            distance_sq: d,
        });
        sort_back_to_front(&mut items);
        let order: Vec<u32> = items.iter().map(|i| i.param_index).collect();
        assert_eq!(order, vec![9, 4, 1]);
    }
}
