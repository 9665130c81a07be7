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

//! Records written into the upload ring and read by shaders.
//!
//! Every record is `#[repr(C)]` and [`Pod`] so a slice of them can be copied into a
//! mapped buffer as-is. Layouts are mirrored by the shader-side declarations.

use super::description::{DebugView, Light, LightKind};
use bytemuck::{Pod, Zeroable};
use strata_core::math::Mat4;

/// Instance is drawn in the translucent pass.
pub const INSTANCE_TRANSLUCENT: u32 = 1 << 0;
/// Instance is selected in the editor.
pub const INSTANCE_SELECTED: u32 = 1 << 1;
/// Instance had no transform last frame; `prev_world` repeats `world`.
pub const INSTANCE_NO_HISTORY: u32 = 1 << 2;

/// Per-instance parameters, indexed by `first_instance` in draws and by the
/// top-level instance id in ray queries.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceParams {
    /// Object-to-world transform.
    pub world: [[f32; 4]; 4],
    /// Object-to-world transform of the previous frame, for motion vectors.
    pub prev_world: [[f32; 4]; 4],
    /// Material table index.
    pub material_index: u32,
    /// Caller-chosen instance id.
    pub instance_id: u32,
    /// `INSTANCE_*` bits.
    pub flags: u32,
    /// Padding to a 16-byte multiple.
    pub _pad: u32,
}

impl InstanceParams {
    /// Builds a record; a missing previous transform repeats the current one.
    pub fn new(
        world: &Mat4,
        prev_world: Option<&Mat4>,
        material_index: u32,
        instance_id: u32,
        mut flags: u32,
    ) -> Self {
        if prev_world.is_none() {
            flags |= INSTANCE_NO_HISTORY;
        }
        Self {
            world: world.to_cols_array_2d(),
            prev_world: prev_world.unwrap_or(world).to_cols_array_2d(),
            material_index,
            instance_id,
            flags,
            _pad: 0,
        }
    }
}

const LIGHT_DIRECTIONAL: u32 = 0;
const LIGHT_POINT: u32 = 1;
const LIGHT_SPOT: u32 = 2;

/// One light, flattened.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightRecord {
    /// xyz position, w range. Zero for directional lights.
    pub position_range: [f32; 4],
    /// xyz direction, w cosine of the outer cone angle.
    pub direction_cone: [f32; 4],
    /// xyz linear color, w intensity.
    pub color_intensity: [f32; 4],
    /// 0 directional, 1 point, 2 spot.
    pub kind: u32,
    /// Padding to a 16-byte multiple.
    pub _pad: [u32; 3],
}

impl From<&Light> for LightRecord {
    fn from(light: &Light) -> Self {
        let (kind, position_range, direction_cone) = match light.kind {
            LightKind::Directional { direction } => {
                let d = direction.normalize();
                (LIGHT_DIRECTIONAL, [0.0; 4], [d.x, d.y, d.z, -1.0])
            }
            LightKind::Point { position, range } => (
                LIGHT_POINT,
                [position.x, position.y, position.z, range],
                [0.0, 0.0, 0.0, -1.0],
            ),
            LightKind::Spot {
                position,
                direction,
                range,
                outer_angle,
            } => {
                let d = direction.normalize();
                (
                    LIGHT_SPOT,
                    [position.x, position.y, position.z, range],
                    [d.x, d.y, d.z, outer_angle.cos()],
                )
            }
        };
        Self {
            position_range,
            direction_cone,
            color_intensity: [light.color.x, light.color.y, light.color.z, light.intensity],
            kind,
            _pad: [0; 3],
        }
    }
}

/// Frame-wide constants, one buffer per frame slot.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameParams {
    /// World-to-clip transform.
    pub view_proj: [[f32; 4]; 4],
    /// World-to-clip transform of the previous frame.
    pub prev_view_proj: [[f32; 4]; 4],
    /// Camera position, w unused.
    pub camera_position: [f32; 4],
    /// Sub-pixel jitter in pixels.
    pub jitter: [f32; 2],
    /// Internal render resolution.
    pub render_extent: [u32; 2],
    /// Low 32 bits of the frame counter.
    pub frame_index: u32,
    /// Number of [`LightRecord`]s in the ring.
    pub light_count: u32,
    /// Number of [`InstanceParams`] in the ring.
    pub instance_count: u32,
    /// Active [`DebugView`], as an integer.
    pub debug_view: u32,
    /// Shader-resource slot of the previous frame's depth.
    pub history_depth: u32,
    /// Shader-resource slot of the previous frame's lit color.
    pub history_lighting: u32,
    /// Shader-resource slot of the previous frame's GI reservoirs.
    pub history_gi: u32,
    /// Shader-resource slot of the top-level structure, or 0 without ray tracing.
    pub tlas: u32,
    /// Byte offset of the instance records in the ring buffer.
    pub instance_offset: u32,
    /// Byte offset of the light records in the ring buffer.
    pub light_offset: u32,
    /// 1 when the history textures hold a valid previous frame.
    pub history_valid: u32,
    /// Padding to a 16-byte multiple.
    pub _pad: u32,
}

impl FrameParams {
    /// Byte size of one record.
    pub const SIZE: u64 = std::mem::size_of::<FrameParams>() as u64;
}

/// Integer code of a debug view.
pub fn debug_view_code(view: DebugView) -> u32 {
    match view {
        DebugView::None => 0,
        DebugView::Normals => 1,
        DebugView::Depth => 2,
        DebugView::GlobalIllumination => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use strata_core::math::Vec3;

    #[test]
    fn test_record_sizes_are_16_byte_multiples() {
        assert_eq!(std::mem::size_of::<InstanceParams>() % 16, 0);
        assert_eq!(std::mem::size_of::<LightRecord>() % 16, 0);
        assert_eq!(FrameParams::SIZE % 16, 0);
        assert!(FrameParams::SIZE <= 256);
    }

    #[test]
    fn test_missing_history_repeats_world() {
        let world = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let params = InstanceParams::new(&world, None, 4, 9, INSTANCE_SELECTED);
        assert_eq!(params.prev_world, params.world);
        assert_eq!(params.flags, INSTANCE_SELECTED | INSTANCE_NO_HISTORY);
    }

    #[test]
    fn test_spot_light_stores_cone_cosine() {
        let light = Light {
            kind: LightKind::Spot {
                position: Vec3::ZERO,
                direction: Vec3::new(0.0, -2.0, 0.0),
                range: 10.0,
                outer_angle: std::f32::consts::FRAC_PI_3,
            },
            color: Vec3::ONE,
            intensity: 3.0,
        };
        let record = LightRecord::from(&light);
        assert_eq!(record.kind, LIGHT_SPOT);
        assert_relative_eq!(record.direction_cone[1], -1.0);
        assert_relative_eq!(record.direction_cone[3], 0.5, epsilon = 1e-6);
        assert_relative_eq!(record.color_intensity[3], 3.0);
    }
}
