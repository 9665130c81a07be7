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

//! A [`GraphicsBackend`](strata_core::renderer::GraphicsBackend) on top of wgpu.
//!
//! wgpu exposes a single queue and tracks resource states itself, so every
//! [`QueueKind`](strata_core::renderer::QueueKind) maps onto that queue, barriers are
//! accepted and dropped, and tickets complete through submitted-work callbacks.
//! Acceleration structures are built and traced on the host from mirrored copies of
//! the geometry buffers.

mod backend;
mod command;
mod context;
mod conversions;

pub use self::backend::{RegisteredPipeline, WgpuBackend, WgpuBackendOptions};
pub use self::context::WgpuContext;
