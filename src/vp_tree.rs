/*
* Licensed to Elasticsearch B.V. under one or more contributor
* license agreements. See the NOTICE file distributed with
* this work for additional information regarding copyright
* ownership. Elasticsearch B.V. licenses this file to you under
* the Apache License, Version 2.0 (the "License"); you may
* not use this file except in compliance with the License.
* You may obtain a copy of the License at
*
*  http://www.apache.org/licenses/LICENSE-2.0
*
* Unless required by applicable law or agreed to in writing,
* software distributed under the License is distributed on an
* "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
* KIND, either express or implied.  See the License for the
* specific language governing permissions and limitations
* under the License.
*/

//! Vantage-Point Tree family: plain VP-Tree, the min-variance split
//! variant (VPMV), and the incrementally-insertable SVP variant, all
//! sharing the same node layout and search routine.

use crate::dual_tree::DualTreeNode;
use crate::error::{VantageError, VantageResult};
use crate::metric::Metric;
use crate::point_cloud::VectorStore;
use crate::utils::{seeded_rng, KnnHeap};
use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;
use rayon::join;
use smallvec::SmallVec;
use std::time::Instant;

/// Below this subset size, forking sibling recursion onto the worker pool
/// costs more in task overhead than it saves.
const PARALLEL_THRESHOLD: usize = 2048;

/// How the vantage point is chosen at each branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VantagePointSelection {
    /// A uniformly random point from the subset.
    Random,
    /// Sample `sample_size` candidates, rank each by the spread of its
    /// distances to a second sample, and keep the highest-spread one.
    Sampling,
}

impl Default for VantagePointSelection {
    fn default() -> Self {
        VantagePointSelection::Random
    }
}

/// How the split distance is chosen once a vantage point is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitPolicy {
    /// The median distance to the vantage point.
    Median,
    /// Scan candidate split positions, picking the one minimizing the
    /// weighted sum of the two halves' variances (VPMV).
    MinVariance,
}

impl Default for SplitPolicy {
    fn default() -> Self {
        SplitPolicy::Median
    }
}

#[derive(Debug, Clone)]
pub struct VpTreeConfig {
    pub max_leaf_size: usize,
    pub vp_selection: VantagePointSelection,
    pub split_policy: SplitPolicy,
    pub sample_size: usize,
    pub seed: Option<u64>,
    /// Authorizes forking sibling subtree construction onto rayon's
    /// worker pool once a subset is larger than [`PARALLEL_THRESHOLD`].
    pub parallel: bool,
}

impl Default for VpTreeConfig {
    fn default() -> Self {
        VpTreeConfig {
            max_leaf_size: 10,
            vp_selection: VantagePointSelection::Random,
            split_policy: SplitPolicy::Median,
            sample_size: 8,
            seed: None,
            parallel: false,
        }
    }
}

impl VpTreeConfig {
    pub fn max_leaf_size(mut self, size: usize) -> VantageResult<Self> {
        if size < 5 {
            return Err(VantageError::InvalidArgument(
                "max_leaf_size must be at least 5".to_string(),
            ));
        }
        self.max_leaf_size = size;
        Ok(self)
    }

    pub fn vp_selection(mut self, selection: VantagePointSelection) -> Self {
        self.vp_selection = selection;
        self
    }

    pub fn split_policy(mut self, policy: SplitPolicy) -> Self {
        self.split_policy = policy;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

#[derive(Debug)]
enum Node {
    Branch {
        vp: usize,
        left_low: f64,
        left_high: f64,
        right_low: f64,
        right_high: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        /// `(point id, distance to this leaf's incoming vantage point)`.
        /// Inline up to 16 entries: leaves are capped near `max_leaf_size`
        /// (default 10), so most never spill onto the heap.
        owned: SmallVec<[(usize, f64); 16]>,
    },
}

/// A Vantage-Point Tree. `allow_incremental_insert` selects the SVP
/// variant's leaf-expansion-on-overflow behavior for [`VpTree::insert`].
pub struct VpTree<M: Metric> {
    points: VectorStore,
    metric: M,
    config: VpTreeConfig,
    arena: Vec<Node>,
    root: Option<usize>,
}

impl<M: Metric> VpTree<M> {
    pub fn new(vectors: Vec<Vec<f64>>, metric: M, config: VpTreeConfig) -> VantageResult<Self> {
        if !metric.is_valid_metric() {
            return Err(VantageError::InvalidMetric(
                "VpTree requires a metric satisfying the triangle inequality".to_string(),
            ));
        }
        let points = VectorStore::new(vectors)?;
        let start = Instant::now();
        let mut tree = VpTree {
            points,
            metric,
            config,
            arena: Vec::new(),
            root: None,
        };
        let ids: Vec<usize> = tree.points.reference_indexes().collect();
        if !ids.is_empty() {
            let mut rng = seeded_rng(tree.config.seed, 0);
            let arena = build(&tree.points, &tree.metric, &tree.config, ids, &mut rng, 0);
            tree.root = Some(arena.len() - 1);
            tree.arena = arena;
        }
        debug!(
            "VpTree built: {} points, {} nodes, {:?}",
            tree.points.len(),
            tree.arena.len(),
            start.elapsed()
        );
        Ok(tree)
    }

    /// Incrementally adds `v`, descending the same way `Branch` search
    /// does (by which bound interval currently contains the distance to
    /// the vantage point, extending it if necessary) and, at the target
    /// leaf, appending the new point. A leaf that overflows past
    /// `max_leaf_size` squared is rebuilt in place as its own small
    /// subtree — the SVP variant's leaf-expansion rule.
    pub fn insert(&mut self, v: Vec<f64>) -> VantageResult<usize> {
        let id = self.points.push(v)?;
        match self.root {
            None => {
                let mut rng = seeded_rng(self.config.seed, 0);
                let local = build(&self.points, &self.metric, &self.config, vec![id], &mut rng, 0);
                self.root = Some(self.splice_subtree(local));
            }
            Some(root) => {
                self.insert_at(root, id, 0);
            }
        }
        Ok(id)
    }

    /// Appends an already-built, self-contained local arena (as returned
    /// by [`build`]) onto `self.arena`, rewriting its internal `Branch`
    /// indices by the insertion offset. Returns the spliced subtree's new
    /// root index into `self.arena`.
    fn splice_subtree(&mut self, mut local: Vec<Node>) -> usize {
        let offset = self.arena.len();
        for node in local.iter_mut() {
            if let Node::Branch { left, right, .. } = node {
                *left += offset;
                *right += offset;
            }
        }
        let root_local = local.len() - 1;
        self.arena.append(&mut local);
        offset + root_local
    }

    fn insert_at(&mut self, node: usize, id: usize, depth: usize) {
        enum Action {
            Overflowed(Vec<usize>),
            Descend {
                go_left: bool,
                left: usize,
                right: usize,
            },
            Done,
        }

        let action = match &mut self.arena[node] {
            Node::Leaf { owned } => {
                owned.push((id, 0.0));
                let overflow = self.config.max_leaf_size * self.config.max_leaf_size;
                if owned.len() > overflow {
                    Action::Overflowed(owned.iter().map(|(id, _)| *id).collect())
                } else {
                    Action::Done
                }
            }
            Node::Branch {
                vp,
                left_low,
                left_high,
                right_low,
                right_high,
                left,
                right,
            } => {
                let x = self.metric.dist(self.points.point(*vp), self.points.point(id));
                let left_fits = x >= *left_low && x <= *left_high;
                let right_fits = x >= *right_low && x <= *right_high;
                let go_left = if left_fits {
                    true
                } else if right_fits {
                    false
                } else {
                    // Falls in the gap between the two intervals: extend
                    // whichever interval's nearer edge is closer.
                    (x - *left_high).abs() <= (x - *right_low).abs()
                };
                if go_left {
                    *left_low = left_low.min(x);
                    *left_high = left_high.max(x);
                } else {
                    *right_low = right_low.min(x);
                    *right_high = right_high.max(x);
                }
                Action::Descend {
                    go_left,
                    left: *left,
                    right: *right,
                }
            }
        };

        match action {
            Action::Done => {}
            Action::Descend { go_left, left, right } => {
                if go_left {
                    self.insert_at(left, id, depth + 1);
                } else {
                    self.insert_at(right, id, depth + 1);
                }
            }
            Action::Overflowed(ids) => {
                let mut rng = seeded_rng(self.config.seed, (node as u64) ^ (depth as u64));
                let local = build(&self.points, &self.metric, &self.config, ids, &mut rng, depth);
                let rebuilt = self.splice_subtree(local);
                let replacement =
                    std::mem::replace(&mut self.arena[rebuilt], Node::Leaf { owned: SmallVec::new() });
                self.arena[node] = replacement;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn search_knn_node(&self, node: usize, query: &[f64], heap: &mut KnnHeap) {
        match &self.arena[node] {
            Node::Leaf { owned } => {
                for &(id, _parent_dist) in owned {
                    let d = self.metric.dist(self.points.point(id), query);
                    heap.push(id, d);
                }
            }
            Node::Branch {
                vp,
                left_low,
                left_high,
                right_low,
                right_high,
                left,
                right,
            } => {
                let x = self.metric.dist(self.points.point(*vp), query);
                heap.push(*vp, x);

                let intersects = |lo: f64, hi: f64| -> bool {
                    let tau = heap.worst();
                    !heap.is_full() || (x - tau <= hi && x + tau >= lo)
                };

                let middle = (left_high + right_low) / 2.0;
                let (near, far) = if x <= middle {
                    (*left, *right)
                } else {
                    (*right, *left)
                };
                let (near_lo, near_hi, far_lo, far_hi) = if x <= middle {
                    (*left_low, *left_high, *right_low, *right_high)
                } else {
                    (*right_low, *right_high, *left_low, *left_high)
                };

                if intersects(near_lo, near_hi) {
                    self.search_knn_node(near, query, heap);
                }
                if intersects(far_lo, far_hi) {
                    self.search_knn_node(far, query, heap);
                }
            }
        }
    }

    pub fn search_knn(&self, query: &[f64], k: usize) -> VantageResult<Vec<(usize, f64)>> {
        if k == 0 {
            return Err(VantageError::InvalidArgument("k must be positive".to_string()));
        }
        let mut heap = KnnHeap::new(k);
        if let Some(root) = self.root {
            self.search_knn_node(root, query, &mut heap);
        }
        Ok(heap.into_sorted_vec())
    }

    fn search_radius_node(&self, node: usize, query: &[f64], range: f64, out: &mut Vec<(usize, f64)>) {
        match &self.arena[node] {
            Node::Leaf { owned } => {
                for &(id, _) in owned {
                    let d = self.metric.dist(self.points.point(id), query);
                    if d <= range {
                        out.push((id, d));
                    }
                }
            }
            Node::Branch {
                vp,
                left_low,
                left_high,
                right_low,
                right_high,
                left,
                right,
            } => {
                let x = self.metric.dist(self.points.point(*vp), query);
                if x <= range {
                    out.push((*vp, x));
                }
                if x - range <= *left_high && x + range >= *left_low {
                    self.search_radius_node(*left, query, range, out);
                }
                if x - range <= *right_high && x + range >= *right_low {
                    self.search_radius_node(*right, query, range, out);
                }
            }
        }
    }

    pub fn search_radius(&self, query: &[f64], range: f64) -> VantageResult<Vec<(usize, f64)>> {
        if range < 0.0 {
            return Err(VantageError::InvalidArgument("range must be nonnegative".to_string()));
        }
        let mut out = Vec::new();
        if let Some(root) = self.root {
            self.search_radius_node(root, query, range, &mut out);
        }
        out.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        Ok(out)
    }
}

/// A handle into a [`VpTree`]'s arena implementing the dual-tree node
/// contract. A `Branch` owns its vantage point directly (excluded from
/// both children's id sets by construction) rather than through a leaf,
/// so — like Cover Tree's own-point nodes — a non-virtual handle reports
/// `num_points() == 0` and instead exposes the vantage point as a
/// trailing virtual-leaf child, so it still takes part in child-pair
/// enumeration instead of being visible only at the node's own base case.
pub struct VpTreeNode<'a, M: Metric> {
    arena: &'a [Node],
    metric: &'a M,
    points: &'a [Vec<f64>],
    index: usize,
    virtual_leaf: bool,
}

impl<'a, M: Metric> Clone for VpTreeNode<'a, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, M: Metric> Copy for VpTreeNode<'a, M> {}

impl<'a, M: Metric> VpTreeNode<'a, M> {
    pub fn root(tree: &'a VpTree<M>) -> Option<Self> {
        tree.root.map(|index| VpTreeNode {
            arena: &tree.arena,
            metric: &tree.metric,
            points: tree.points.as_slice(),
            index,
            virtual_leaf: false,
        })
    }
}

impl<'a, M: Metric> DualTreeNode for VpTreeNode<'a, M> {
    fn id(&self) -> usize {
        (self.index << 1) | (self.virtual_leaf as usize)
    }

    fn pivot(&self) -> &[f64] {
        if self.virtual_leaf {
            return match &self.arena[self.index] {
                Node::Branch { vp, .. } => &self.points[*vp],
                Node::Leaf { .. } => unreachable!(),
            };
        }
        match &self.arena[self.index] {
            Node::Leaf { owned } => &self.points[owned[0].0],
            Node::Branch { vp, .. } => &self.points[*vp],
        }
    }

    fn radius(&self) -> f64 {
        if self.virtual_leaf {
            return 0.0;
        }
        match &self.arena[self.index] {
            Node::Leaf { owned } => {
                let pivot = &self.points[owned[0].0];
                owned
                    .iter()
                    .map(|&(id, _)| self.metric.dist(pivot, &self.points[id]))
                    .fold(0.0_f64, f64::max)
            }
            Node::Branch { left_high, right_high, .. } => left_high.max(*right_high),
        }
    }

    fn num_points(&self) -> usize {
        if self.virtual_leaf {
            return 1;
        }
        match &self.arena[self.index] {
            Node::Leaf { owned } => owned.len(),
            Node::Branch { .. } => 0,
        }
    }

    fn point_id(&self, k: usize) -> usize {
        if self.virtual_leaf {
            return match &self.arena[self.index] {
                Node::Branch { vp, .. } => *vp,
                Node::Leaf { .. } => unreachable!(),
            };
        }
        match &self.arena[self.index] {
            Node::Leaf { owned } => owned[k].0,
            Node::Branch { .. } => unreachable!(),
        }
    }

    fn num_children(&self) -> usize {
        if self.virtual_leaf {
            return 0;
        }
        match &self.arena[self.index] {
            Node::Leaf { .. } => 0,
            Node::Branch { .. } => 3,
        }
    }

    fn child(&self, k: usize) -> Self {
        match &self.arena[self.index] {
            Node::Leaf { .. } => unreachable!(),
            Node::Branch { left, right, .. } => {
                let (index, virtual_leaf) = match k {
                    0 => (*left, false),
                    1 => (*right, false),
                    2 => (self.index, true),
                    _ => unreachable!(),
                };
                VpTreeNode {
                    arena: self.arena,
                    metric: self.metric,
                    points: self.points,
                    index,
                    virtual_leaf,
                }
            }
        }
    }
}

fn choose_vantage_point<M: Metric>(
    points: &VectorStore,
    metric: &M,
    config: &VpTreeConfig,
    ids: &[usize],
    rng: &mut impl Rng,
) -> usize {
    match config.vp_selection {
        VantagePointSelection::Random => *ids.choose(rng).unwrap(),
        VantagePointSelection::Sampling => {
            let sample_size = config.sample_size.min(ids.len());
            let candidates: Vec<usize> = ids.choose_multiple(rng, sample_size).cloned().collect();
            let second: Vec<usize> = ids.choose_multiple(rng, sample_size).cloned().collect();
            let mut best = candidates[0];
            let mut best_spread = f64::NEG_INFINITY;
            for &cand in &candidates {
                let mut dists: Vec<f64> = second
                    .iter()
                    .map(|&s| metric.dist(points.point(cand), points.point(s)))
                    .collect();
                dists.sort_by(|a, b| a.partial_cmp(b).unwrap());
                let median = dists[dists.len() / 2];
                let spread: f64 = dists.iter().map(|d| (d - median).abs()).sum();
                if spread > best_spread {
                    best_spread = spread;
                    best = cand;
                }
            }
            best
        }
    }
}

fn choose_split(config: &VpTreeConfig, dists: &[f64]) -> usize {
    match config.split_policy {
        SplitPolicy::Median => dists.len() / 2,
        SplitPolicy::MinVariance => {
            let leaf = config.max_leaf_size;
            let lo = leaf.min(dists.len().saturating_sub(1));
            let hi = dists.len().saturating_sub(leaf).max(lo + 1).min(dists.len());
            let mut best = dists.len() / 2;
            let mut best_cost = f64::INFINITY;
            for split in lo..hi {
                if split == 0 || split >= dists.len() {
                    continue;
                }
                let (left, right) = dists.split_at(split);
                let cost = variance(left) * left.len() as f64 + variance(right) * right.len() as f64;
                if cost < best_cost {
                    best_cost = cost;
                    best = split;
                }
            }
            best
        }
    }
}

/// Builds a self-contained local arena for `ids`, forking sibling
/// recursion onto rayon's worker pool when `config.parallel` is set and
/// the subset is large enough. The root is always the arena's last
/// element; callers splice it into a larger arena (see
/// [`VpTree::splice_subtree`]).
fn build<M: Metric>(
    points: &VectorStore,
    metric: &M,
    config: &VpTreeConfig,
    ids: Vec<usize>,
    rng: &mut impl Rng,
    depth: usize,
) -> Vec<Node> {
    if ids.len() <= config.max_leaf_size {
        // Leaves below the root have no incoming vp distance yet;
        // callers (search) only use the stored distance once a parent vp
        // exists, so the root-level leaf case stores 0.0.
        let owned: SmallVec<[(usize, f64); 16]> = ids.into_iter().map(|id| (id, 0.0)).collect();
        return vec![Node::Leaf { owned }];
    }
    let vp = choose_vantage_point(points, metric, config, &ids, rng);
    let mut rest: Vec<(usize, f64)> = ids
        .iter()
        .filter(|&&id| id != vp)
        .map(|&id| (id, metric.dist(points.point(vp), points.point(id))))
        .collect();
    rest.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
    let dists: Vec<f64> = rest.iter().map(|(_, d)| *d).collect();
    let split = choose_split(config, &dists).max(1).min(rest.len() - 1);

    let right_part = rest.split_off(split);
    let left_part = rest;

    let left_low = left_part.first().map(|(_, d)| *d).unwrap_or(0.0);
    let left_high = left_part.last().map(|(_, d)| *d).unwrap_or(0.0);
    let right_low = right_part.first().map(|(_, d)| *d).unwrap_or(0.0);
    let right_high = right_part.last().map(|(_, d)| *d).unwrap_or(0.0);

    let left_ids: Vec<usize> = left_part.iter().map(|(id, _)| *id).collect();
    let right_ids: Vec<usize> = right_part.iter().map(|(id, _)| *id).collect();

    let mut left_rng = seeded_rng(config.seed, (depth as u64) << 1 | 1);
    let mut right_rng = seeded_rng(config.seed, (depth as u64) << 1);

    let (mut left_arena, mut right_arena) = if config.parallel
        && left_ids.len() + right_ids.len() > PARALLEL_THRESHOLD
    {
        join(
            || build_with_leaf_dists(points, metric, config, left_ids, left_part, &mut left_rng, depth + 1),
            || build_with_leaf_dists(points, metric, config, right_ids, right_part, &mut right_rng, depth + 1),
        )
    } else {
        (
            build_with_leaf_dists(points, metric, config, left_ids, left_part, &mut left_rng, depth + 1),
            build_with_leaf_dists(points, metric, config, right_ids, right_part, &mut right_rng, depth + 1),
        )
    };

    let left_root = left_arena.len() - 1;
    let offset = left_arena.len();
    let right_root = offset + (right_arena.len() - 1);
    for node in right_arena.iter_mut() {
        if let Node::Branch { left, right, .. } = node {
            *left += offset;
            *right += offset;
        }
    }
    left_arena.append(&mut right_arena);
    left_arena.push(Node::Branch {
        vp,
        left_low,
        left_high,
        right_low,
        right_high,
        left: left_root,
        right: right_root,
    });
    left_arena
}

/// Like [`build`] but, if the result is a leaf, stashes each point's
/// already-computed distance to the parent vantage point instead of
/// recomputing it.
fn build_with_leaf_dists<M: Metric>(
    points: &VectorStore,
    metric: &M,
    config: &VpTreeConfig,
    ids: Vec<usize>,
    dists: Vec<(usize, f64)>,
    rng: &mut impl Rng,
    depth: usize,
) -> Vec<Node> {
    if ids.len() <= config.max_leaf_size {
        let owned: SmallVec<[(usize, f64); 16]> = dists.into_iter().collect();
        return vec![Node::Leaf { owned }];
    }
    build(points, metric, config, ids, rng, depth)
}

fn variance(dists: &[f64]) -> f64 {
    if dists.is_empty() {
        return 0.0;
    }
    let mean = dists.iter().sum::<f64>() / dists.len() as f64;
    dists.iter().map(|d| (d - mean) * (d - mean)).sum::<f64>() / dists.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::EuclideanMetric;
    use crate::vector_array::VectorArray;

    fn grid() -> Vec<Vec<f64>> {
        let mut v = Vec::new();
        for x in 0..5 {
            for y in 0..5 {
                v.push(vec![x as f64, y as f64]);
            }
        }
        v
    }

    #[test]
    fn grid_knn_matches_exhaustive() {
        let config = VpTreeConfig::default().seed(7);
        let tree = VpTree::new(grid(), EuclideanMetric::new(), config).unwrap();
        let oracle = VectorArray::new(grid(), EuclideanMetric::new()).unwrap();
        let query = [2.1, 2.0];
        let expect = oracle.search_knn(&query, 4);
        let got = tree.search_knn(&query, 4).unwrap();
        assert_eq!(expect.len(), got.len());
        for ((_, d1), (_, d2)) in expect.iter().zip(got.iter()) {
            assert_approx_eq!(d1, d2, 1e-9);
        }
    }

    #[test]
    fn min_variance_split_matches_exhaustive() {
        let config = VpTreeConfig::default()
            .seed(3)
            .split_policy(SplitPolicy::MinVariance)
            .vp_selection(VantagePointSelection::Sampling);
        let tree = VpTree::new(grid(), EuclideanMetric::new(), config).unwrap();
        let oracle = VectorArray::new(grid(), EuclideanMetric::new()).unwrap();
        let query = [0.0, 0.0];
        let expect = oracle.search_knn(&query, 5);
        let got = tree.search_knn(&query, 5).unwrap();
        for ((_, d1), (_, d2)) in expect.iter().zip(got.iter()) {
            assert_approx_eq!(d1, d2, 1e-9);
        }
    }

    #[test]
    fn rejects_non_subadditive_metric() {
        struct Fake;
        impl Metric for Fake {
            fn dist(&self, a: &[f64], b: &[f64]) -> f64 {
                a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
            }
            fn is_subadditive(&self) -> bool {
                false
            }
        }
        let res = VpTree::new(grid(), Fake, VpTreeConfig::default());
        assert!(res.is_err());
    }

    #[test]
    fn incremental_insert_matches_bulk_build() {
        let pts = grid();
        let config = VpTreeConfig::default().seed(11);
        let mut tree = VpTree::new(vec![pts[0].clone()], EuclideanMetric::new(), config).unwrap();
        for p in &pts[1..] {
            tree.insert(p.clone()).unwrap();
        }
        let oracle = VectorArray::new(pts, EuclideanMetric::new()).unwrap();
        let query = [2.1, 2.0];
        let expect = oracle.search_knn(&query, 4);
        let got = tree.search_knn(&query, 4).unwrap();
        assert_eq!(expect.len(), got.len());
        for ((_, d1), (_, d2)) in expect.iter().zip(got.iter()) {
            assert_approx_eq!(d1, d2, 1e-9);
        }
    }

    #[test]
    fn max_leaf_size_floor_enforced() {
        let res = VpTreeConfig::default().max_leaf_size(2);
        assert!(res.is_err());
    }

    #[test]
    fn parallel_build_matches_sequential() {
        let config = VpTreeConfig::default().seed(7).max_leaf_size(5).unwrap().parallel(true);
        let tree = VpTree::new(grid(), EuclideanMetric::new(), config).unwrap();
        let oracle = VectorArray::new(grid(), EuclideanMetric::new()).unwrap();
        let query = [2.1, 2.0];
        let expect = oracle.search_knn(&query, 4);
        let got = tree.search_knn(&query, 4).unwrap();
        assert_eq!(expect.len(), got.len());
        for ((_, d1), (_, d2)) in expect.iter().zip(got.iter()) {
            assert_approx_eq!(d1, d2, 1e-9);
        }
    }
}
