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

//! Errors surfaced by the frame manager.
//!
//! Contract violations are panics; only exhaustion and backend failures come back
//! through [`FrameError`].

use strata_core::renderer::{DescriptorHeapKind, ResourceError};
use thiserror::Error;

/// Recoverable failures of frame-manager operations.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Every dynamic slot of a descriptor heap is checked out.
    #[error("descriptor heap {heap:?} exhausted ({capacity} slots)")]
    DescriptorExhausted {
        /// The exhausted heap.
        heap: DescriptorHeapKind,
        /// Total slot count of the heap.
        capacity: u32,
    },

    /// A prebuild size query returned zero; the inputs hold no primitive.
    #[error("acceleration structure for {what} has no primitive")]
    EmptyAccelStruct {
        /// Which structure was being built.
        what: String,
    },

    /// The mesh handle is not registered.
    #[error("unknown mesh handle {0}")]
    UnknownMesh(u32),

    /// The mesh description is malformed.
    #[error("invalid mesh: {0}")]
    InvalidMesh(String),

    /// The per-frame upload ring cannot hold the frame's records.
    #[error("upload ring cannot grow to {requested} bytes (limit {limit})")]
    UploadRingFull {
        /// Bytes the frame needed.
        requested: u64,
        /// Configured ceiling.
        limit: u64,
    },

    /// The orchestrator has been shut down.
    #[error("frame orchestrator is shut down")]
    ShutDown,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A backend call failed.
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhaustion_message_names_heap() {
        let err = FrameError::DescriptorExhausted {
            heap: DescriptorHeapKind::RenderTarget,
            capacity: 64,
        };
        assert_eq!(
            err.to_string(),
            "descriptor heap RenderTarget exhausted (64 slots)"
        );
    }

    #[test]
    fn test_resource_errors_convert() {
        let err: FrameError = ResourceError::DeviceLost.into();
        assert!(matches!(err, FrameError::Resource(ResourceError::DeviceLost)));
    }
}
