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

//! Frame-manager configuration, loadable from RON.

use crate::descriptor::reserved;
use crate::error::FrameError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Size of one descriptor heap and of its reserved low region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapBudget {
    /// Total number of slots.
    pub capacity: u32,
    /// Slots `0..reserved` are fixed engine bindings; auto allocation starts above.
    pub reserved: u32,
}

impl HeapBudget {
    /// Creates a budget.
    pub const fn new(capacity: u32, reserved: u32) -> Self {
        Self { capacity, reserved }
    }
}

/// Budgets of the three descriptor heaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorBudgets {
    /// Shader-resource heap.
    pub shader_resource: HeapBudget,
    /// Render-target heap.
    pub render_target: HeapBudget,
    /// Depth-stencil heap.
    pub depth_stencil: HeapBudget,
}

impl Default for DescriptorBudgets {
    fn default() -> Self {
        Self {
            shader_resource: HeapBudget::new(4096, 256),
            render_target: HeapBudget::new(64, 8),
            depth_stencil: HeapBudget::new(16, 4),
        }
    }
}

/// Configuration of a [`FrameOrchestrator`](crate::FrameOrchestrator).
///
/// Every field has a default, so a RON file only needs the values it changes:
///
/// ```ron
/// (
///     max_frame_latency: 3,
///     ray_tracing: false,
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// How many frames the CPU may record ahead of the device.
    pub max_frame_latency: u32,
    /// Descriptor heap sizes.
    pub descriptors: DescriptorBudgets,
    /// Initial upload-ring capacity per frame slot, in bytes.
    pub upload_bytes_per_frame: u64,
    /// Upper bound the upload ring may grow to, per frame slot.
    pub max_upload_bytes_per_frame: u64,
    /// Blocking waits longer than this are reported.
    pub wait_timeout_ms: u64,
    /// Build acceleration structures and dispatch ray-traced GI when supported.
    pub ray_tracing: bool,
    /// Record GPU timestamps when supported.
    pub timestamps: bool,
    /// Render at a reduced resolution and upscale temporally.
    pub temporal_upscaling: bool,
    /// Render-resolution scale applied when upscaling.
    pub render_scale: f32,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_latency: 2,
            descriptors: DescriptorBudgets::default(),
            upload_bytes_per_frame: 1 << 20,
            max_upload_bytes_per_frame: 64 << 20,
            wait_timeout_ms: 2000,
            ray_tracing: true,
            timestamps: true,
            temporal_upscaling: false,
            render_scale: 0.67,
            width: 1280,
            height: 720,
        }
    }
}

impl FrameConfig {
    /// Parses a configuration from RON text.
    pub fn from_ron_str(text: &str) -> Result<Self, FrameError> {
        ron::from_str(text).map_err(|e| FrameError::Config(e.to_string()))
    }

    /// Reads and parses a RON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FrameError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| FrameError::Config(format!("{}: {e}", path.display())))?;
        let config = Self::from_ron_str(&text)?;
        log::info!("Loaded frame configuration from {}", path.display());
        Ok(config)
    }

    /// Serializes the configuration as pretty RON.
    pub fn to_ron_string(&self) -> Result<String, FrameError> {
        let pretty = ron::ser::PrettyConfig::default().indentor("  ".to_string());
        ron::ser::to_string_pretty(self, pretty).map_err(|e| FrameError::Config(e.to_string()))
    }

    /// Number of frame slots in the look-ahead ring.
    #[inline]
    pub fn frame_slots(&self) -> usize {
        self.max_frame_latency as usize + 1
    }

    /// Wait timeout as a [`Duration`].
    #[inline]
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// Resolution passes render at, before upscaling.
    pub fn render_extent(&self) -> (u32, u32) {
        if self.temporal_upscaling {
            let scale = |v: u32| ((v as f32 * self.render_scale).round() as u32).max(1);
            (scale(self.width), scale(self.height))
        } else {
            (self.width, self.height)
        }
    }

    /// Checks the configuration for values the frame manager cannot work with.
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.max_frame_latency == 0 {
            return Err(FrameError::Config("max_frame_latency must be at least 1".into()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(FrameError::Config(format!(
                "resolution {}x{} has a zero extent",
                self.width, self.height
            )));
        }
        if self.upload_bytes_per_frame == 0
            || self.upload_bytes_per_frame > self.max_upload_bytes_per_frame
        {
            return Err(FrameError::Config(format!(
                "upload_bytes_per_frame must be in 1..={}",
                self.max_upload_bytes_per_frame
            )));
        }
        if !(self.render_scale > 0.0 && self.render_scale <= 1.0) {
            return Err(FrameError::Config("render_scale must be in (0, 1]".into()));
        }

        let required = reserved::shader_resource_slots_required(self.frame_slots());
        let budgets = [
            ("shader_resource", self.descriptors.shader_resource, required),
            ("render_target", self.descriptors.render_target, 0),
            ("depth_stencil", self.descriptors.depth_stencil, 0),
        ];
        for (name, budget, min_reserved) in budgets {
            if budget.reserved < min_reserved {
                return Err(FrameError::Config(format!(
                    "{name} heap reserves {} slots but fixed bindings need {min_reserved}",
                    budget.reserved
                )));
            }
            if budget.capacity <= budget.reserved {
                return Err(FrameError::Config(format!(
                    "{name} heap has no dynamic region ({} of {} reserved)",
                    budget.reserved, budget.capacity
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = FrameConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frame_slots(), 3);
        assert_eq!(config.render_extent(), (1280, 720));
    }

    #[test]
    fn test_partial_ron_keeps_defaults() {
        let config = FrameConfig::from_ron_str("(max_frame_latency: 3, ray_tracing: false)")
            .expect("valid RON");
        assert_eq!(config.max_frame_latency, 3);
        assert!(!config.ray_tracing);
        assert_eq!(config.width, 1280);
        assert_eq!(config.descriptors, DescriptorBudgets::default());
    }

    #[test]
    fn test_ron_text_survives_a_round_trip() {
        let mut config = FrameConfig::default();
        config.temporal_upscaling = true;
        let text = config.to_ron_string().expect("serializable");
        assert_eq!(FrameConfig::from_ron_str(&text).expect("parsable"), config);
    }

    #[test]
    fn test_zero_latency_is_rejected() {
        let config = FrameConfig {
            max_frame_latency: 0,
            ..FrameConfig::default()
        };
        assert!(matches!(config.validate(), Err(FrameError::Config(_))));
    }

    #[test]
    fn test_reserved_region_must_hold_fixed_bindings() {
        let mut config = FrameConfig::default();
        config.descriptors.shader_resource = HeapBudget::new(4096, 4);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_upscaling_shrinks_render_extent() {
        let config = FrameConfig {
            temporal_upscaling: true,
            render_scale: 0.5,
            ..FrameConfig::default()
        };
        assert_eq!(config.render_extent(), (640, 360));
    }
}
