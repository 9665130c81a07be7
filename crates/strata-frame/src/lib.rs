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

//! # Strata Frame
//!
//! Decides when GPU objects are created, reused, transitioned and destroyed while the
//! CPU records several frames ahead of the device.
//!
//! The crate is layered leaf to root:
//!
//! - [`sync`]: per-queue completion tickets and fence-gated command allocator pools.
//! - [`descriptor`]: fixed-capacity binding slot heaps with reserved engine slots.
//! - [`resource`]: state-tracked GPU resources, the staging pool that retires them
//!   and the per-frame upload ring.
//! - [`accel`]: the bottom/top-level acceleration-structure cache.
//! - [`frame`]: the [`FrameOrchestrator`] that ties everything together once per frame.

#![warn(missing_docs)]

pub mod accel;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod frame;
pub mod resource;
pub mod sync;

pub use config::FrameConfig;
pub use error::FrameError;
pub use frame::{FrameDescription, FrameOrchestrator, FrameOutput};
