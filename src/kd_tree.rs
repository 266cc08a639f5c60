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

//! Axis-aligned KD-Tree. Restricted to p-norm-family metrics since
//! pruning compares a query against a single split coordinate.

use crate::dual_tree::DualTreeNode;
use crate::error::{VantageError, VantageResult};
use crate::metric::Metric;
use crate::point_cloud::VectorStore;
use crate::utils::KnnHeap;
use log::debug;
use rayon::join;
use std::time::Instant;

/// Below this subset size, forking sibling recursion onto the worker pool
/// costs more in task overhead than it saves.
const PARALLEL_THRESHOLD: usize = 2048;

/// How the split axis is chosen at each branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisSelection {
    /// `axis = depth mod dim`. Cheap, no per-node scan.
    Incremental,
    /// `axis = argmax` of per-axis variance over the subset.
    Variance,
}

impl Default for AxisSelection {
    fn default() -> Self {
        AxisSelection::Variance
    }
}

/// Build-time configuration, mirroring the builder-config idiom used
/// across this crate's families.
#[derive(Debug, Clone)]
pub struct KdTreeConfig {
    pub leaf_node_size: usize,
    pub axis_selection: AxisSelection,
    /// Authorizes forking sibling subtree construction onto rayon's
    /// worker pool once a subset is larger than [`PARALLEL_THRESHOLD`].
    pub parallel: bool,
}

impl Default for KdTreeConfig {
    fn default() -> Self {
        KdTreeConfig {
            leaf_node_size: 15,
            axis_selection: AxisSelection::Variance,
            parallel: false,
        }
    }
}

impl KdTreeConfig {
    pub fn leaf_node_size(mut self, size: usize) -> Self {
        self.leaf_node_size = size;
        self
    }

    pub fn axis_selection(mut self, selection: AxisSelection) -> Self {
        self.axis_selection = selection;
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
        axis: usize,
        split: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        ids: Vec<usize>,
    },
}

/// A KD-Tree over a dense vector collection.
pub struct KdTree<M: Metric> {
    points: VectorStore,
    metric: M,
    config: KdTreeConfig,
    arena: Vec<Node>,
    root: Option<usize>,
    /// Per-node `(pivot point id, covering radius)`, indexed by arena
    /// index, used only by the dual-tree adapter: a KD-Tree branch splits
    /// a hyperrectangle and owns no point of its own, so its bounding ball
    /// is built bottom-up from its children's rather than stored at build
    /// time the way Ball Tree's or VP-Tree's nodes are.
    bounds: Vec<(usize, f64)>,
}

impl<M: Metric> KdTree<M> {
    pub fn new(vectors: Vec<Vec<f64>>, metric: M, config: KdTreeConfig) -> VantageResult<Self> {
        if !metric.is_p_norm() {
            return Err(VantageError::InvalidMetric(
                "KdTree requires a p-norm-family metric".to_string(),
            ));
        }
        let points = VectorStore::new(vectors)?;
        let start = Instant::now();
        let mut tree = KdTree {
            points,
            metric,
            config,
            arena: Vec::new(),
            root: None,
            bounds: Vec::new(),
        };
        let ids: Vec<usize> = tree.points.reference_indexes().collect();
        if !ids.is_empty() {
            let arena = build_subtree(&tree.points, &tree.metric, &tree.config, ids, 0);
            tree.bounds = bounding_balls(&tree.points, &tree.metric, &arena);
            tree.root = Some(arena.len() - 1);
            tree.arena = arena;
        }
        debug!(
            "KdTree built: {} points, {} nodes, {:?}",
            tree.points.len(),
            tree.arena.len(),
            start.elapsed()
        );
        Ok(tree)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn search_knn_node(&self, node: usize, query: &[f64], heap: &mut KnnHeap) {
        match &self.arena[node] {
            Node::Leaf { ids } => {
                for &id in ids {
                    let d = self.metric.dist(self.points.point(id), query);
                    heap.push(id, d);
                }
            }
            Node::Branch {
                axis,
                split,
                left,
                right,
            } => {
                let diff = query[*axis] - split;
                let (near, far) = if diff <= 0.0 {
                    (*left, *right)
                } else {
                    (*right, *left)
                };
                self.search_knn_node(near, query, heap);
                if heap.worst() > diff.abs() {
                    self.search_knn_node(far, query, heap);
                }
            }
        }
    }

    /// The `k` nearest points to `query`, ascending by distance.
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
            Node::Leaf { ids } => {
                for &id in ids {
                    let d = self.metric.dist(self.points.point(id), query);
                    if d <= range {
                        out.push((id, d));
                    }
                }
            }
            Node::Branch {
                axis,
                split,
                left,
                right,
            } => {
                let diff = query[*axis] - split;
                let (near, far) = if diff <= 0.0 { (*left, *right) } else { (*right, *left) };
                self.search_radius_node(near, query, range, out);
                if range > diff.abs() {
                    self.search_radius_node(far, query, range, out);
                }
            }
        }
    }

    /// All points within `range` of `query`, ascending by distance.
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

/// Builds each node's `(pivot point id, covering radius)` bottom-up: a
/// leaf's ball is centered on one of its own points; a branch's ball is
/// centered on its left child's pivot and sized to also cover the right
/// child's ball, which is a valid (if not minimal) bound by the triangle
/// inequality. Relies on `build_subtree`'s invariant that every branch's
/// `left`/`right` index is less than its own, so a single forward pass
/// over the arena always has both children's bounds ready.
fn bounding_balls<M: Metric>(points: &VectorStore, metric: &M, arena: &[Node]) -> Vec<(usize, f64)> {
    let mut bounds = Vec::with_capacity(arena.len());
    for node in arena {
        let bound = match node {
            Node::Leaf { ids } => {
                let pivot_id = ids[0];
                let pivot = points.point(pivot_id);
                let radius = ids
                    .iter()
                    .map(|&id| metric.dist(pivot, points.point(id)))
                    .fold(0.0_f64, f64::max);
                (pivot_id, radius)
            }
            Node::Branch { left, right, .. } => {
                let (left_pivot, left_radius) = bounds[*left];
                let (right_pivot, right_radius) = bounds[*right];
                let d = metric.dist(points.point(left_pivot), points.point(right_pivot));
                (left_pivot, left_radius.max(d + right_radius))
            }
        };
        bounds.push(bound);
    }
    bounds
}

/// A handle into a [`KdTree`]'s arena implementing the dual-tree node
/// contract. A branch splits a hyperrectangle and owns no point of its
/// own, so it carries no virtual self-leaf (unlike Cover Tree/VP-Tree
/// branches) — every point lives in exactly one leaf.
#[derive(Clone, Copy)]
pub struct KdTreeNode<'a> {
    arena: &'a [Node],
    bounds: &'a [(usize, f64)],
    points: &'a [Vec<f64>],
    index: usize,
}

impl<'a> KdTreeNode<'a> {
    pub fn root<M: Metric>(tree: &'a KdTree<M>) -> Option<Self> {
        tree.root.map(|index| KdTreeNode {
            arena: &tree.arena,
            bounds: &tree.bounds,
            points: tree.points.as_slice(),
            index,
        })
    }
}

impl<'a> DualTreeNode for KdTreeNode<'a> {
    fn id(&self) -> usize {
        self.index
    }

    fn pivot(&self) -> &[f64] {
        &self.points[self.bounds[self.index].0]
    }

    fn radius(&self) -> f64 {
        self.bounds[self.index].1
    }

    fn num_points(&self) -> usize {
        match &self.arena[self.index] {
            Node::Leaf { ids } => ids.len(),
            Node::Branch { .. } => 0,
        }
    }

    fn point_id(&self, k: usize) -> usize {
        match &self.arena[self.index] {
            Node::Leaf { ids } => ids[k],
            Node::Branch { .. } => unreachable!(),
        }
    }

    fn num_children(&self) -> usize {
        match &self.arena[self.index] {
            Node::Leaf { .. } => 0,
            Node::Branch { .. } => 2,
        }
    }

    fn child(&self, k: usize) -> Self {
        match &self.arena[self.index] {
            Node::Leaf { .. } => unreachable!(),
            Node::Branch { left, right, .. } => KdTreeNode {
                arena: self.arena,
                bounds: self.bounds,
                points: self.points,
                index: if k == 0 { *left } else { *right },
            },
        }
    }
}

fn choose_axis(points: &VectorStore, config: &KdTreeConfig, ids: &[usize], depth: usize) -> usize {
    let dim = points.dim();
    match config.axis_selection {
        AxisSelection::Incremental => depth % dim,
        AxisSelection::Variance => {
            let mut best_axis = depth % dim;
            let mut best_var = f64::NEG_INFINITY;
            for axis in 0..dim {
                let mean: f64 =
                    ids.iter().map(|&i| points.point(i)[axis]).sum::<f64>() / ids.len() as f64;
                let var: f64 = ids
                    .iter()
                    .map(|&i| {
                        let d = points.point(i)[axis] - mean;
                        d * d
                    })
                    .sum::<f64>()
                    / ids.len() as f64;
                if var.is_finite() && var > best_var {
                    best_var = var;
                    best_axis = axis;
                }
            }
            best_axis
        }
    }
}

/// Builds a self-contained arena for `ids`, forking sibling recursion onto
/// rayon's worker pool when `config.parallel` is set and the subset is
/// large enough to make the fork worthwhile. The returned `Vec<Node>`'s
/// root is always its last element; callers splice it into a larger arena
/// by extending and rewriting child indices by the extension's offset.
fn build_subtree<M: Metric>(
    points: &VectorStore,
    metric: &M,
    config: &KdTreeConfig,
    mut ids: Vec<usize>,
    depth: usize,
) -> Vec<Node> {
    if ids.len() <= config.leaf_node_size {
        return vec![Node::Leaf { ids }];
    }
    let axis = choose_axis(points, config, &ids, depth);
    ids.sort_by(|&a, &b| {
        points.point(a)[axis]
            .partial_cmp(&points.point(b)[axis])
            .unwrap()
    });
    let mut median = ids.len() / 2;
    while median + 1 < ids.len()
        && (points.point(ids[median])[axis] - points.point(ids[median + 1])[axis]).abs() < 1e-12
    {
        median += 1;
    }
    if median == ids.len() - 1 {
        return vec![Node::Leaf { ids }];
    }
    let split = points.point(ids[median])[axis];
    let right_ids = ids.split_off(median + 1);
    let left_ids = ids;

    let (mut left_arena, mut right_arena) = if config.parallel && left_ids.len() + right_ids.len() > PARALLEL_THRESHOLD
    {
        join(
            || build_subtree(points, metric, config, left_ids, depth + 1),
            || build_subtree(points, metric, config, right_ids, depth + 1),
        )
    } else {
        (
            build_subtree(points, metric, config, left_ids, depth + 1),
            build_subtree(points, metric, config, right_ids, depth + 1),
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
        axis,
        split,
        left: left_root,
        right: right_root,
    });
    left_arena
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::EuclideanMetric;

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
        use crate::vector_array::VectorArray;
        let tree = KdTree::new(grid(), EuclideanMetric::new(), KdTreeConfig::default()).unwrap();
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
    fn radius_search_far_query_is_empty() {
        let tree = KdTree::new(grid(), EuclideanMetric::new(), KdTreeConfig::default()).unwrap();
        assert!(tree.search_radius(&[10.0, 10.0], 0.5).unwrap().is_empty());
    }

    #[test]
    fn rejects_non_p_norm_metric() {
        struct Fake;
        impl Metric for Fake {
            fn dist(&self, a: &[f64], b: &[f64]) -> f64 {
                a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
            }
            fn is_p_norm(&self) -> bool {
                false
            }
        }
        let res = KdTree::new(grid(), Fake, KdTreeConfig::default());
        assert!(res.is_err());
    }

    #[test]
    fn all_identical_points_build_a_leaf() {
        let vecs = vec![vec![1.0, 1.0]; 20];
        let tree = KdTree::new(vecs, EuclideanMetric::new(), KdTreeConfig::default()).unwrap();
        let result = tree.search_knn(&[1.0, 1.0], 3).unwrap();
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn parallel_build_matches_sequential() {
        use crate::vector_array::VectorArray;
        let config = KdTreeConfig::default().leaf_node_size(1).parallel(true);
        let tree = KdTree::new(grid(), EuclideanMetric::new(), config).unwrap();
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
