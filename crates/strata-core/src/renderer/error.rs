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

//! Defines the error types reported by graphics backends.

use crate::renderer::api::ResourceHandle;
use std::fmt;

/// An error related to the creation or use of a GPU object (buffers, textures,
/// allocators, acceleration structures).
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceError {
    /// The referenced resource does not exist (never created or already destroyed).
    NotFound(ResourceHandle),
    /// The handle or ID used to reference a backend object is invalid.
    InvalidHandle,
    /// An access fell outside the resource's bounds.
    OutOfBounds {
        /// Byte offset of the access.
        offset: u64,
        /// Byte length of the access.
        len: u64,
        /// Size of the resource in bytes.
        capacity: u64,
    },
    /// The backend or device does not support the requested operation.
    Unsupported(String),
    /// The operation is not valid for the resource in its current shape
    /// (e.g. an in-place update whose topology differs from the original build).
    InvalidOperation(String),
    /// An error originating from the specific graphics backend implementation.
    BackendError(String),
    /// The device was lost; every further call will fail.
    DeviceLost,
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::NotFound(handle) => write!(f, "Resource not found: {handle:?}"),
            ResourceError::InvalidHandle => write!(f, "Invalid resource handle or ID."),
            ResourceError::OutOfBounds {
                offset,
                len,
                capacity,
            } => write!(
                f,
                "Resource access out of bounds: {len} bytes at offset {offset} exceeds {capacity} bytes."
            ),
            ResourceError::Unsupported(msg) => write!(f, "Operation not supported: {msg}"),
            ResourceError::InvalidOperation(msg) => write!(f, "Invalid operation: {msg}"),
            ResourceError::BackendError(msg) => {
                write!(f, "Backend-specific resource error: {msg}")
            }
            ResourceError::DeviceLost => write!(f, "The graphics device was lost."),
        }
    }
}

impl std::error::Error for ResourceError {}

/// A high-level error raised while bringing up or driving a graphics backend.
#[derive(Debug)]
pub enum RenderError {
    /// A failure occurred during the initialization of the graphics backend.
    InitializationFailed(String),
    /// An error occurred while managing a GPU resource.
    ResourceError(ResourceError),
    /// The graphics device was lost (e.g., GPU driver crashed or was updated).
    /// This is a catastrophic error that typically requires reinitialization.
    DeviceLost,
    /// An unexpected or internal error occurred.
    Internal(String),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::InitializationFailed(msg) => {
                write!(f, "Failed to initialize graphics backend: {msg}")
            }
            RenderError::ResourceError(err) => {
                write!(f, "Graphics resource operation failed: {err}")
            }
            RenderError::DeviceLost => write!(
                f,
                "The graphics device was lost and needs to be reinitialized."
            ),
            RenderError::Internal(msg) => {
                write!(f, "An internal or unexpected error occurred: {msg}")
            }
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RenderError::ResourceError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ResourceError> for RenderError {
    fn from(err: ResourceError) -> Self {
        match err {
            ResourceError::DeviceLost => RenderError::DeviceLost,
            other => RenderError::ResourceError(other),
        }
    }
}
