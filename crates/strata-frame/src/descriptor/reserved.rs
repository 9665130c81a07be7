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

//! Fixed shader-resource slots shared with shaders.
//!
//! Index 0 is never written so an unbound index reads as null. History pairs keep one
//! slot per texture for their whole lifetime; swapping a pair only changes which of the
//! two indices a frame reads as "previous".

/// Never handed out.
pub const NULL: u32 = 0;
/// Depth history pair.
pub const HISTORY_DEPTH: [u32; 2] = [1, 2];
/// Lit color history pair.
pub const HISTORY_LIGHTING: [u32; 2] = [3, 4];
/// GI reservoir history pair.
pub const HISTORY_GI: [u32; 2] = [5, 6];
/// First per-frame-slot parameter buffer.
pub const FRAME_PARAMS_BASE: u32 = 8;

/// Slot of the parameter buffer owned by frame slot `slot`.
#[inline]
pub const fn frame_params(slot: usize) -> u32 {
    FRAME_PARAMS_BASE + slot as u32
}

/// Size the reserved shader-resource region needs for `frame_slots` frame slots.
#[inline]
pub const fn shader_resource_slots_required(frame_slots: usize) -> u32 {
    frame_params(frame_slots)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_slots_do_not_overlap() {
        let mut all: Vec<u32> = [NULL]
            .into_iter()
            .chain(HISTORY_DEPTH)
            .chain(HISTORY_LIGHTING)
            .chain(HISTORY_GI)
            .chain((0..3).map(frame_params))
            .collect();
        let len = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), len);
        assert!(all.iter().all(|&i| i < shader_resource_slots_required(3)));
    }
}
