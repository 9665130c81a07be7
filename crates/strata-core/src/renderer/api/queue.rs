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

//! Queue kinds and the completion tickets they issue.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The hardware queue a command list is submitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QueueKind {
    /// Draws, dispatches, copies and acceleration-structure builds.
    Graphics,
    /// Dispatches and copies only.
    Compute,
    /// Copies only; used for asset uploads.
    Copy,
}

impl QueueKind {
    /// Number of queue kinds.
    pub const COUNT: usize = 3;
    /// Every queue kind, in index order.
    pub const ALL: [QueueKind; Self::COUNT] = [QueueKind::Graphics, QueueKind::Compute, QueueKind::Copy];

    /// Dense index usable for per-queue arrays.
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            QueueKind::Graphics => 0,
            QueueKind::Compute => 1,
            QueueKind::Copy => 2,
        }
    }
}

/// A completion ticket: the fence value a queue signals once a submission retires.
///
/// Tickets of one queue are strictly increasing in submission order. `Ticket::NONE`
/// stands for "never submitted" and is complete from the start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Ticket(pub u64);

impl Ticket {
    /// The ticket that is always complete.
    pub const NONE: Ticket = Ticket(0);

    /// Raw fence value.
    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The ticket issued right after this one.
    #[inline]
    pub const fn next(self) -> Ticket {
        Ticket(self.0 + 1)
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
