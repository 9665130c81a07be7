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

//! Information about the adapter behind a backend.

/// The native API a backend runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphicsBackendType {
    /// Vulkan.
    Vulkan,
    /// Metal.
    Metal,
    /// Direct3D 12.
    Dx12,
    /// OpenGL / GLES.
    OpenGl,
    /// WebGPU in a browser.
    WebGpu,
    /// An in-process implementation with no device behind it.
    Software,
    /// Anything else.
    Unknown,
}

/// The physical type of the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RendererDeviceType {
    /// A GPU integrated with the CPU.
    IntegratedGpu,
    /// A dedicated GPU.
    DiscreteGpu,
    /// A virtualized GPU.
    VirtualGpu,
    /// A CPU rasterizer.
    Cpu,
    /// Unknown.
    Unknown,
}

/// Describes the adapter a backend was created on.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphicsAdapterInfo {
    /// Human-readable adapter name.
    pub name: String,
    /// Native API.
    pub backend_type: GraphicsBackendType,
    /// Physical device type.
    pub device_type: RendererDeviceType,
}

/// Where acceleration structures are built and traversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RayTracingTier {
    /// No acceleration-structure support.
    None,
    /// Structures are built and traversed on the host from mirrored geometry.
    Host,
    /// Structures are built and traversed by the device.
    Device,
}

/// Optional capabilities of a backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackendCapabilities {
    /// Acceleration-structure support.
    pub ray_tracing: RayTracingTier,
    /// Whether timestamps can be written into command lists.
    pub timestamp_queries: bool,
    /// Nanoseconds per timestamp tick.
    pub timestamp_period_ns: f32,
    /// Number of timestamp slots available to [`CommandList::write_timestamp`](crate::renderer::traits::CommandList::write_timestamp).
    pub timestamp_capacity: u32,
}
