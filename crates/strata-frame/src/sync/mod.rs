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

//! Queue submission and fence-gated reuse.
//!
//! Every submission to a queue signals a [`Ticket`]. Anything the submission touched
//! may be reused once the queue reports that ticket complete.
//!
//! [`Ticket`]: strata_core::renderer::Ticket

pub mod allocator_pool;
pub mod fence;

pub use allocator_pool::CommandAllocatorPool;
pub use fence::{FenceQueue, QueueSet};
