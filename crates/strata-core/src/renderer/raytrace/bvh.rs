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

//! Bounding volume hierarchy over arbitrary boxed items.
//!
//! Nodes are stored in a flat array. An interior node's children sit at `first` and
//! `first + 1`, always after their parent, so a reverse sweep visits children before
//! parents; that is all a refit needs.

use crate::math::{Aabb, Ray, Vec3};

const MAX_LEAF_ITEMS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct BvhNode {
    pub bounds: Aabb,
    /// Leaf: first entry in `order`. Interior: index of the left child.
    pub first: u32,
    /// Number of items in a leaf; zero for interior nodes.
    pub count: u32,
}

impl BvhNode {
    #[inline]
    fn is_leaf(&self) -> bool {
        self.count > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Bvh {
    nodes: Vec<BvhNode>,
    /// Item indices, permuted so every leaf owns a contiguous range.
    order: Vec<u32>,
}

impl Bvh {
    /// Builds a hierarchy with median splits along the widest centroid axis.
    pub fn build(bounds: &[Aabb]) -> Self {
        if bounds.is_empty() {
            return Self::default();
        }

        let centroids: Vec<Vec3> = bounds.iter().map(Aabb::center).collect();
        let mut order: Vec<u32> = (0..bounds.len() as u32).collect();
        let mut nodes = Vec::with_capacity(bounds.len() * 2);
        nodes.push(BvhNode {
            bounds: Aabb::INVALID,
            first: 0,
            count: bounds.len() as u32,
        });

        let mut stack = vec![0usize];
        while let Some(node_index) = stack.pop() {
            let first = nodes[node_index].first as usize;
            let count = nodes[node_index].count as usize;
            let items = &mut order[first..first + count];

            nodes[node_index].bounds = items
                .iter()
                .fold(Aabb::INVALID, |acc, &i| acc.merge(&bounds[i as usize]));
            if count <= MAX_LEAF_ITEMS {
                continue;
            }

            let centroid_bounds = items.iter().fold(Aabb::INVALID, |acc, &i| {
                acc.merged_with_point(centroids[i as usize])
            });
            let extent = centroid_bounds.max - centroid_bounds.min;
            let axis = extent.max_axis();
            if extent[axis] <= 0.0 {
                // Coincident centroids cannot be separated; keep a fat leaf.
                continue;
            }

            let mid = count / 2;
            items.select_nth_unstable_by(mid, |&a, &b| {
                centroids[a as usize][axis].total_cmp(&centroids[b as usize][axis])
            });

            let left = nodes.len();
            nodes.push(BvhNode {
                bounds: Aabb::INVALID,
                first: first as u32,
                count: mid as u32,
            });
            nodes.push(BvhNode {
                bounds: Aabb::INVALID,
                first: (first + mid) as u32,
                count: (count - mid) as u32,
            });
            nodes[node_index].first = left as u32;
            nodes[node_index].count = 0;
            stack.push(left);
            stack.push(left + 1);
        }

        Self { nodes, order }
    }

    /// Recomputes node bounds for new item bounds, keeping the topology.
    pub fn refit(&mut self, bounds: &[Aabb]) {
        debug_assert_eq!(bounds.len(), self.order.len());
        for i in (0..self.nodes.len()).rev() {
            let node = self.nodes[i];
            let first = node.first as usize;
            self.nodes[i].bounds = if node.is_leaf() {
                self.order[first..first + node.count as usize]
                    .iter()
                    .fold(Aabb::INVALID, |acc, &item| acc.merge(&bounds[item as usize]))
            } else {
                self.nodes[first].bounds.merge(&self.nodes[first + 1].bounds)
            };
        }
    }

    /// Bounds of the whole hierarchy.
    pub fn root_bounds(&self) -> Aabb {
        self.nodes.first().map_or(Aabb::INVALID, |n| n.bounds)
    }

    /// Closest-hit traversal. `test` is called with an item and the current closest
    /// distance and returns a closer hit, if any.
    pub fn closest_hit<H>(
        &self,
        ray: &Ray,
        t_max: f32,
        mut test: impl FnMut(u32, f32) -> Option<(f32, H)>,
    ) -> Option<(f32, H)> {
        if self.nodes.is_empty() {
            return None;
        }

        let inv_direction = ray.direction.recip();
        let mut closest = t_max;
        let mut best = None;
        let mut stack = Vec::with_capacity(64);
        stack.push(0u32);

        while let Some(node_index) = stack.pop() {
            let node = &self.nodes[node_index as usize];
            if ray
                .intersect_aabb(&node.bounds, inv_direction, closest)
                .is_none()
            {
                continue;
            }
            if node.is_leaf() {
                let first = node.first as usize;
                for &item in &self.order[first..first + node.count as usize] {
                    if let Some((t, hit)) = test(item, closest) {
                        if t < closest {
                            closest = t;
                            best = Some((t, hit));
                        }
                    }
                }
            } else {
                stack.push(node.first);
                stack.push(node.first + 1);
            }
        }

        best
    }

    #[cfg(test)]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box_at(x: f32) -> Aabb {
        Aabb::from_center_half_extents(Vec3::new(x, 0.0, 0.0), Vec3::splat(0.25))
    }

    #[test]
    fn test_build_splits_large_sets() {
        let boxes: Vec<Aabb> = (0..32).map(|i| unit_box_at(i as f32)).collect();
        let bvh = Bvh::build(&boxes);
        assert!(bvh.node_count() > 1);
        let root = bvh.root_bounds();
        assert_eq!(root.min.x, -0.25);
        assert_eq!(root.max.x, 31.25);
    }

    #[test]
    fn test_closest_hit_prefers_nearest_item() {
        let boxes: Vec<Aabb> = (0..16).map(|i| unit_box_at(i as f32)).collect();
        let bvh = Bvh::build(&boxes);
        let ray = Ray::new(Vec3::new(20.0, 0.0, 0.0), -Vec3::X);
        let inv = ray.direction.recip();
        let hit = bvh.closest_hit(&ray, f32::INFINITY, |item, limit| {
            ray.intersect_aabb(&boxes[item as usize], inv, limit)
                .map(|t| (t, item))
        });
        assert_eq!(hit.map(|(_, item)| item), Some(15));
    }

    #[test]
    fn test_refit_follows_moved_items() {
        let mut boxes: Vec<Aabb> = (0..8).map(|i| unit_box_at(i as f32)).collect();
        let mut bvh = Bvh::build(&boxes);
        boxes[3] = unit_box_at(100.0);
        bvh.refit(&boxes);
        assert_eq!(bvh.root_bounds().max.x, 100.25);
    }

    #[test]
    fn test_empty_hierarchy_never_hits() {
        let bvh = Bvh::build(&[]);
        let ray = Ray::new(Vec3::ZERO, Vec3::X);
        assert!(bvh
            .closest_hit::<()>(&ray, f32::INFINITY, |_, _| None)
            .is_none());
    }
}
