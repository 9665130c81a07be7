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

//! The per-frame driver and the types it exchanges with the scene.

pub mod cull;
pub mod description;
pub mod history;
pub mod mesh;
pub mod orchestrator;
pub mod passes;
pub mod profiler;
pub mod records;

pub use description::{
    CameraView, DebugView, EditorOverlay, FrameDescription, FrameOutput, FrameStats,
    GpuTimings, Light, LightKind, SubsetMask, VisibleInstance,
};
pub use history::{PingPong, TemporalHistory};
pub use mesh::{MeshDescriptor, MeshHandle, MeshSubset};
pub use orchestrator::{FrameOrchestrator, PickHit};
pub use passes::{DrawItem, PassKind};
pub use profiler::GpuScopeProfiler;
