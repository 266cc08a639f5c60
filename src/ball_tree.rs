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

//! Ball Tree: every node is a ball (pivot + radius); three construction
//! modes (top-down farthest-first, KD-style spread splitting, and a
//! middle-out anchors hierarchy) and four pivot-selection policies are
//! supported, selected at build time rather than via subclassing.

use crate::dual_tree::DualTreeNode;
use crate::error::{VantageError, VantageResult};
use crate::metric::Metric;
use crate::point_cloud::VectorStore;
use crate::utils::{seeded_rng, KnnHeap};
use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;
use std::collections::BinaryHeap;
use std::time::Instant;

const PARALLEL_THRESHOLD: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PivotSelection {
    Centroid,
    Medoid,
    /// Exact medoid below `exact_medoid_threshold` points, else the first
    /// point in the subset (a cheap stand-in for an approximate medoid
    /// sketch — the precise approximation algorithm is a collaborator's
    /// concern).
    ApproxMedoid,
    Random,
}

impl Default for PivotSelection {
    fn default() -> Self {
        PivotSelection::Centroid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstructionMethod {
    TopDownFarthest,
    KdStyle,
    AnchorsHierarchy,
}

impl Default for ConstructionMethod {
    fn default() -> Self {
        ConstructionMethod::TopDownFarthest
    }
}

#[derive(Debug, Clone)]
pub struct BallTreeConfig {
    pub leaf_size: usize,
    pub construction_method: ConstructionMethod,
    pub pivot_selection: PivotSelection,
    pub exact_medoid_threshold: usize,
    pub seed: Option<u64>,
    pub parallel: bool,
}

impl Default for BallTreeConfig {
    fn default() -> Self {
        BallTreeConfig {
            leaf_size: 40,
            construction_method: ConstructionMethod::TopDownFarthest,
            pivot_selection: PivotSelection::Centroid,
            exact_medoid_threshold: 1000,
            seed: None,
            parallel: false,
        }
    }
}

impl BallTreeConfig {
    pub fn leaf_size(mut self, size: usize) -> VantageResult<Self> {
        if size < 2 {
            return Err(VantageError::InvalidArgument(
                "leaf_size must be at least 2".to_string(),
            ));
        }
        self.leaf_size = size;
        Ok(self)
    }

    pub fn construction_method(mut self, method: ConstructionMethod) -> Self {
        self.construction_method = method;
        self
    }

    pub fn pivot_selection(mut self, selection: PivotSelection) -> Self {
        self.pivot_selection = selection;
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

#[derive(Debug, Clone)]
enum Node {
    Branch {
        pivot: Vec<f64>,
        radius: f64,
        parent: Option<usize>,
        left: usize,
        right: usize,
    },
    Leaf {
        pivot: Vec<f64>,
        radius: f64,
        parent: Option<usize>,
        ids: Vec<usize>,
    },
}

impl Node {
    fn pivot(&self) -> &[f64] {
        match self {
            Node::Branch { pivot, .. } => pivot,
            Node::Leaf { pivot, .. } => pivot,
        }
    }

    fn radius(&self) -> f64 {
        match self {
            Node::Branch { radius, .. } => *radius,
            Node::Leaf { radius, .. } => *radius,
        }
    }

    fn set_parent(&mut self, p: Option<usize>) {
        match self {
            Node::Branch { parent, .. } => *parent = p,
            Node::Leaf { parent, .. } => *parent = p,
        }
    }
}

/// A Ball Tree over a dense vector collection.
pub struct BallTree<M: Metric> {
    points: VectorStore,
    metric: M,
    config: BallTreeConfig,
    arena: Vec<Node>,
    root: Option<usize>,
}

impl<M: Metric> BallTree<M> {
    pub fn new(vectors: Vec<Vec<f64>>, metric: M, config: BallTreeConfig) -> VantageResult<Self> {
        if !metric.is_valid_metric() {
            return Err(VantageError::InvalidMetric(
                "BallTree requires a metric satisfying the triangle inequality".to_string(),
            ));
        }
        let points = VectorStore::new(vectors)?;
        let start = Instant::now();
        let mut tree = BallTree {
            points,
            metric,
            config,
            arena: Vec::new(),
            root: None,
        };
        let ids: Vec<usize> = tree.points.reference_indexes().collect();
        if !ids.is_empty() {
            let mut rng = seeded_rng(tree.config.seed, 0);
            tree.root = Some(tree.build(ids, None, &mut rng));
        }
        debug!(
            "BallTree built: {} points, {} nodes, {:?}",
            tree.points.len(),
            tree.arena.len(),
            start.elapsed()
        );
        Ok(tree)
    }

    fn pivot_vector(&self, ids: &[usize], rng: &mut impl Rng) -> Vec<f64> {
        let dim = self.points.dim();
        match self.config.pivot_selection {
            PivotSelection::Centroid => {
                let mut centroid = vec![0.0; dim];
                for &id in ids {
                    for (c, v) in centroid.iter_mut().zip(self.points.point(id)) {
                        *c += v;
                    }
                }
                for c in centroid.iter_mut() {
                    *c /= ids.len() as f64;
                }
                centroid
            }
            PivotSelection::Medoid => self.points.point(self.exact_medoid(ids)).to_vec(),
            PivotSelection::ApproxMedoid => {
                if ids.len() <= self.config.exact_medoid_threshold {
                    self.points.point(self.exact_medoid(ids)).to_vec()
                } else {
                    self.points.point(ids[0]).to_vec()
                }
            }
            PivotSelection::Random => self.points.point(*ids.choose(rng).unwrap()).to_vec(),
        }
    }

    fn exact_medoid(&self, ids: &[usize]) -> usize {
        let cost_of = |cand: usize| -> f64 {
            ids.iter()
                .map(|&other| self.metric.dist(self.points.point(cand), self.points.point(other)))
                .sum()
        };
        if self.config.parallel && ids.len() > PARALLEL_THRESHOLD {
            ids.par_iter()
                .map(|&cand| (cand, cost_of(cand)))
                .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
                .map(|(id, _)| id)
                .unwrap_or(ids[0])
        } else {
            let mut best = ids[0];
            let mut best_cost = f64::INFINITY;
            for &cand in ids {
                let cost = cost_of(cand);
                if cost < best_cost {
                    best_cost = cost;
                    best = cand;
                }
            }
            best
        }
    }

    fn radius_of(&self, pivot: &[f64], ids: &[usize]) -> f64 {
        if self.config.parallel && ids.len() > PARALLEL_THRESHOLD {
            ids.par_iter()
                .map(|&id| self.metric.dist(pivot, self.points.point(id)))
                .reduce(|| 0.0_f64, f64::max)
        } else {
            ids.iter()
                .map(|&id| self.metric.dist(pivot, self.points.point(id)))
                .fold(0.0_f64, f64::max)
        }
    }

    fn make_leaf(&mut self, ids: Vec<usize>, parent: Option<usize>, rng: &mut impl Rng) -> usize {
        let pivot = self.pivot_vector(&ids, rng);
        let radius = self.radius_of(&pivot, &ids);
        self.arena.push(Node::Leaf {
            pivot,
            radius,
            parent,
            ids,
        });
        self.arena.len() - 1
    }

    fn build(&mut self, ids: Vec<usize>, parent: Option<usize>, rng: &mut impl Rng) -> usize {
        if ids.len() <= self.config.leaf_size {
            return self.make_leaf(ids, parent, rng);
        }
        match self.config.construction_method {
            ConstructionMethod::TopDownFarthest => self.build_farthest(ids, parent, rng),
            ConstructionMethod::KdStyle => self.build_kd_style(ids, parent, rng),
            ConstructionMethod::AnchorsHierarchy => self.build_anchors(ids, parent, rng),
        }
    }

    fn build_farthest(&mut self, ids: Vec<usize>, parent: Option<usize>, rng: &mut impl Rng) -> usize {
        let pivot = self.pivot_vector(&ids, rng);
        let f1 = *ids
            .iter()
            .max_by(|&&a, &&b| {
                self.metric
                    .dist(&pivot, self.points.point(a))
                    .partial_cmp(&self.metric.dist(&pivot, self.points.point(b)))
                    .unwrap()
            })
            .unwrap();
        let f2 = *ids
            .iter()
            .max_by(|&&a, &&b| {
                self.metric
                    .dist(self.points.point(f1), self.points.point(a))
                    .partial_cmp(&self.metric.dist(self.points.point(f1), self.points.point(b)))
                    .unwrap()
            })
            .unwrap();

        if self.metric.dist(self.points.point(f1), self.points.point(f2)) < 1e-12 {
            // Degenerate: every point is equidistant from every anchor.
            return self.make_leaf(ids, parent, rng);
        }

        let mut left_ids = Vec::new();
        let mut right_ids = Vec::new();
        for id in ids {
            let d1 = self.metric.dist(self.points.point(f1), self.points.point(id));
            let d2 = self.metric.dist(self.points.point(f2), self.points.point(id));
            if d1 <= d2 {
                left_ids.push(id);
            } else {
                right_ids.push(id);
            }
        }
        if left_ids.is_empty() || right_ids.is_empty() {
            return self.make_leaf(
                left_ids.into_iter().chain(right_ids).collect(),
                parent,
                rng,
            );
        }

        let radius = self.radius_of(&pivot, &{
            let mut all = left_ids.clone();
            all.extend(right_ids.iter().cloned());
            all
        });
        self.finish_branch(pivot, radius, left_ids, right_ids, parent, rng)
    }

    fn build_kd_style(&mut self, ids: Vec<usize>, parent: Option<usize>, rng: &mut impl Rng) -> usize {
        let dim = self.points.dim();
        let spread_of = |axis: usize| -> f64 {
            let lo = ids
                .iter()
                .map(|&id| self.points.point(id)[axis])
                .fold(f64::INFINITY, f64::min);
            let hi = ids
                .iter()
                .map(|&id| self.points.point(id)[axis])
                .fold(f64::NEG_INFINITY, f64::max);
            hi - lo
        };
        let (best_axis, best_spread) = if self.config.parallel && ids.len() * dim > PARALLEL_THRESHOLD {
            (0..dim)
                .into_par_iter()
                .map(|axis| (axis, spread_of(axis)))
                .reduce(
                    || (0, -1.0),
                    |a, b| if b.1 > a.1 { b } else { a },
                )
        } else {
            let mut best_axis = 0;
            let mut best_spread = -1.0;
            for axis in 0..dim {
                let spread = spread_of(axis);
                if spread > best_spread {
                    best_spread = spread;
                    best_axis = axis;
                }
            }
            (best_axis, best_spread)
        };
        if best_spread <= 1e-12 {
            return self.make_leaf(ids, parent, rng);
        }

        let mut sorted = ids.clone();
        sorted.sort_by(|&a, &b| {
            self.points.point(a)[best_axis]
                .partial_cmp(&self.points.point(b)[best_axis])
                .unwrap()
        });
        let mut median = sorted.len() / 2;
        while median > 0
            && (self.points.point(sorted[median - 1])[best_axis]
                - self.points.point(sorted[median])[best_axis])
                .abs()
                < 1e-12
        {
            median -= 1;
        }
        if median == 0 {
            median = sorted.len() / 2;
        }
        let right_ids = sorted.split_off(median);
        let left_ids = sorted;

        let pivot = self.pivot_vector(&ids, rng);
        let radius = self.radius_of(&pivot, &ids);
        self.finish_branch(pivot, radius, left_ids, right_ids, parent, rng)
    }

    fn finish_branch(
        &mut self,
        pivot: Vec<f64>,
        radius: f64,
        left_ids: Vec<usize>,
        right_ids: Vec<usize>,
        parent: Option<usize>,
        rng: &mut impl Rng,
    ) -> usize {
        let me = self.arena.len();
        self.arena.push(Node::Branch {
            pivot,
            radius,
            parent,
            left: 0,
            right: 0,
        });
        let left = self.build(left_ids, Some(me), rng);
        let right = self.build(right_ids, Some(me), rng);
        if let Node::Branch { left: l, right: r, .. } = &mut self.arena[me] {
            *l = left;
            *r = right;
        }
        me
    }

    /// Moore's-anchors middle-out construction: pick ⌈√n⌉ anchors,
    /// distribute ownership by nearest anchor (with a triangle-
    /// inequality shortcut to stop re-scanning points once they can no
    /// longer switch owners), build a subtree per anchor, then
    /// agglomerate the subtrees pairwise by cheapest merged radius.
    fn build_anchors(&mut self, ids: Vec<usize>, parent: Option<usize>, rng: &mut impl Rng) -> usize {
        let k = (ids.len() as f64).sqrt().ceil() as usize;
        let k = k.max(2).min(ids.len());

        let mut anchors: Vec<usize> = Vec::with_capacity(k);
        let mut remaining: Vec<usize> = ids.clone();
        let first = *remaining.choose(rng).unwrap();
        anchors.push(first);
        remaining.retain(|&id| id != first);

        // Ownership: for each point, nearest anchor id and distance.
        let mut owner: Vec<usize> = vec![first; ids.len()];
        let dist_to_first = |&id: &usize| self.metric.dist(self.points.point(first), self.points.point(id));
        let mut owner_dist: Vec<f64> = if self.config.parallel && ids.len() > PARALLEL_THRESHOLD {
            ids.par_iter().map(dist_to_first).collect()
        } else {
            ids.iter().map(dist_to_first).collect()
        };
        while anchors.len() < k && !remaining.is_empty() {
            // Next anchor: the farthest-owned point of the anchor with
            // the largest current radius (largest max owned distance).
            let mut anchor_radius: std::collections::HashMap<usize, f64> = std::collections::HashMap::new();
            for (i, &id) in ids.iter().enumerate() {
                let r = anchor_radius.entry(owner[i]).or_insert(0.0);
                if owner_dist[i] > *r {
                    *r = owner_dist[i];
                }
            }
            let worst_anchor = *anchor_radius
                .iter()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
                .map(|(a, _)| a)
                .unwrap();
            let next = *ids
                .iter()
                .enumerate()
                .filter(|(i, _)| owner[*i] == worst_anchor)
                .max_by(|(i, _), (j, _)| owner_dist[*i].partial_cmp(&owner_dist[*j]).unwrap())
                .map(|(_, id)| id)
                .unwrap();
            anchors.push(next);
            remaining.retain(|&id| id != next);

            // Rebalance: any point closer to the new anchor switches.
            if self.config.parallel && ids.len() > PARALLEL_THRESHOLD {
                owner
                    .par_iter_mut()
                    .zip(owner_dist.par_iter_mut())
                    .zip(ids.par_iter())
                    .for_each(|((owner, owner_dist), &id)| {
                        let d_new = self.metric.dist(self.points.point(next), self.points.point(id));
                        if d_new < *owner_dist {
                            *owner_dist = d_new;
                            *owner = next;
                        }
                    });
            } else {
                for (i, &id) in ids.iter().enumerate() {
                    let d_new = self.metric.dist(self.points.point(next), self.points.point(id));
                    if d_new < owner_dist[i] {
                        owner_dist[i] = d_new;
                        owner[i] = next;
                    }
                }
            }
        }

        let mut groups: std::collections::HashMap<usize, Vec<usize>> = std::collections::HashMap::new();
        for (i, &id) in ids.iter().enumerate() {
            groups.entry(owner[i]).or_insert_with(Vec::new).push(id);
        }

        // Build a subtree per anchor group.
        let mut subtrees: Vec<usize> = Vec::new();
        for (_, members) in groups {
            let mut child_rng = seeded_rng(self.config.seed, members.len() as u64);
            let root = self.build(members, None, &mut child_rng);
            subtrees.push(root);
        }

        if subtrees.len() == 1 {
            let only = subtrees[0];
            self.arena[only].set_parent(parent);
            return only;
        }

        // Greedy pairwise agglomeration, driven by a priority queue of
        // merge costs. Stale entries (referring to an already-merged
        // subtree) are detected via a live-set check and skipped.
        #[derive(PartialEq)]
        struct MergeCandidate {
            cost: f64,
            a: usize,
            b: usize,
        }
        impl Eq for MergeCandidate {}
        impl PartialOrd for MergeCandidate {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }
        impl Ord for MergeCandidate {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                other.cost.partial_cmp(&self.cost).unwrap()
            }
        }

        let merge_cost = |this: &Self, a: usize, b: usize| -> (Vec<f64>, f64) {
            let dim = this.points.dim();
            let mut pivot = vec![0.0; dim];
            let mut count = 0usize;
            for &root in &[a, b] {
                for id in this.subtree_point_ids(root) {
                    for (c, v) in pivot.iter_mut().zip(this.points.point(id)) {
                        *c += v;
                    }
                    count += 1;
                }
            }
            for c in pivot.iter_mut() {
                *c /= count as f64;
            }
            let mut radius = 0.0_f64;
            for &root in &[a, b] {
                for id in this.subtree_point_ids(root) {
                    let d = this.metric.dist(&pivot, this.points.point(id));
                    if d > radius {
                        radius = d;
                    }
                }
            }
            (pivot, radius)
        };

        let mut live: std::collections::HashSet<usize> = subtrees.iter().cloned().collect();
        let mut heap: BinaryHeap<MergeCandidate> = BinaryHeap::new();
        for i in 0..subtrees.len() {
            for j in (i + 1)..subtrees.len() {
                let (_, radius) = merge_cost(self, subtrees[i], subtrees[j]);
                heap.push(MergeCandidate {
                    cost: radius,
                    a: subtrees[i],
                    b: subtrees[j],
                });
            }
        }

        while live.len() > 1 {
            let cand = match heap.pop() {
                Some(c) => c,
                None => break,
            };
            if !live.contains(&cand.a) || !live.contains(&cand.b) {
                continue;
            }
            let (pivot, radius) = merge_cost(self, cand.a, cand.b);
            let me = self.arena.len();
            self.arena.push(Node::Branch {
                pivot,
                radius,
                parent: None,
                left: cand.a,
                right: cand.b,
            });
            self.arena[cand.a].set_parent(Some(me));
            self.arena[cand.b].set_parent(Some(me));
            live.remove(&cand.a);
            live.remove(&cand.b);
            live.insert(me);
            for &other in &live {
                if other == me {
                    continue;
                }
                let (_, radius) = merge_cost(self, me, other);
                heap.push(MergeCandidate {
                    cost: radius,
                    a: me,
                    b: other,
                });
            }
        }

        let root = *live.iter().next().unwrap();
        self.arena[root].set_parent(parent);
        root
    }

    fn subtree_point_ids(&self, node: usize) -> Vec<usize> {
        match &self.arena[node] {
            Node::Leaf { ids, .. } => ids.clone(),
            Node::Branch { left, right, .. } => {
                let mut out = self.subtree_point_ids(*left);
                out.extend(self.subtree_point_ids(*right));
                out
            }
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The raw vectors backing this tree, indexed by id.
    pub fn points(&self) -> &[Vec<f64>] {
        self.points.as_slice()
    }

    fn search_knn_node(&self, node: usize, query: &[f64], heap: &mut KnnHeap) {
        let n = &self.arena[node];
        let d = self.metric.dist(n.pivot(), query);
        if heap.is_full() && d - n.radius() >= heap.worst() {
            return;
        }
        match n {
            Node::Leaf { ids, .. } => {
                for &id in ids {
                    let dd = self.metric.dist(self.points.point(id), query);
                    heap.push(id, dd);
                }
            }
            Node::Branch { left, right, .. } => {
                let (left, right) = (*left, *right);
                let dl = self.metric.dist(self.arena[left].pivot(), query);
                let dr = self.metric.dist(self.arena[right].pivot(), query);
                if dl <= dr {
                    self.search_knn_node(left, query, heap);
                    self.search_knn_node(right, query, heap);
                } else {
                    self.search_knn_node(right, query, heap);
                    self.search_knn_node(left, query, heap);
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
        let n = &self.arena[node];
        let d = self.metric.dist(n.pivot(), query);
        if d - n.radius() >= range {
            return;
        }
        match n {
            Node::Leaf { ids, .. } => {
                for &id in ids {
                    let dd = self.metric.dist(self.points.point(id), query);
                    if dd <= range {
                        out.push((id, dd));
                    }
                }
            }
            Node::Branch { left, right, .. } => {
                self.search_radius_node(*left, query, range, out);
                self.search_radius_node(*right, query, range, out);
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

    /// Descends to the leaf closest to `v` by pivot distance, expanding
    /// every visited node's radius to cover the new point, then appends
    /// `v`'s id there. If the leaf now exceeds `leaf_size` it is rebuilt
    /// as a subtree and spliced back into its parent.
    pub fn insert(&mut self, v: Vec<f64>) -> VantageResult<usize> {
        let id = self.points.push(v)?;
        match self.root {
            None => {
                let mut rng = seeded_rng(self.config.seed, 0);
                self.root = Some(self.make_leaf(vec![id], None, &mut rng));
            }
            Some(root) => {
                let mut rng = seeded_rng(self.config.seed, id as u64);
                self.insert_at(root, id, &mut rng);
            }
        }
        Ok(id)
    }

    fn insert_at(&mut self, node: usize, id: usize, rng: &mut impl Rng) {
        let point = self.points.point(id).to_vec();
        let d = self.metric.dist(self.arena[node].pivot(), &point);
        if d > self.arena[node].radius() {
            match &mut self.arena[node] {
                Node::Branch { radius, .. } => *radius = d,
                Node::Leaf { radius, .. } => *radius = d,
            }
        }
        let overflowed = match &mut self.arena[node] {
            Node::Leaf { ids, .. } => {
                ids.push(id);
                ids.len() > self.config.leaf_size
            }
            Node::Branch { .. } => false,
        };
        if overflowed {
            let (ids, parent) = match &self.arena[node] {
                Node::Leaf { ids, parent, .. } => (ids.clone(), *parent),
                _ => unreachable!(),
            };
            let rebuilt = self.build(ids, parent, rng);
            let replacement = std::mem::replace(
                &mut self.arena[rebuilt],
                Node::Leaf {
                    pivot: Vec::new(),
                    radius: 0.0,
                    parent: None,
                    ids: Vec::new(),
                },
            );
            self.arena[node] = replacement;
            if let Node::Branch { left, right, .. } = &self.arena[node] {
                let (left, right) = (*left, *right);
                self.arena[left].set_parent(Some(node));
                self.arena[right].set_parent(Some(node));
            }
            return;
        }
        if let Node::Branch { left, right, .. } = &self.arena[node] {
            let (left, right) = (*left, *right);
            let dl = self.metric.dist(self.arena[left].pivot(), &point);
            let dr = self.metric.dist(self.arena[right].pivot(), &point);
            if dl <= dr {
                self.insert_at(left, id, rng);
            } else {
                self.insert_at(right, id, rng);
            }
        }
    }
}

/// A handle into a [`BallTree`]'s arena, implementing the dual-tree node
/// contract. Carries a raw pointer-free borrow via an index plus a
/// reference to the owning arena, which is enough since queries never
/// mutate the tree.
#[derive(Clone, Copy)]
pub struct BallTreeNode<'a> {
    arena: &'a [Node],
    index: usize,
}

impl<'a> BallTreeNode<'a> {
    pub fn root<M: Metric>(tree: &'a BallTree<M>) -> Option<Self> {
        tree.root.map(|index| BallTreeNode {
            arena: &tree.arena,
            index,
        })
    }
}

impl<'a> DualTreeNode for BallTreeNode<'a> {
    fn id(&self) -> usize {
        self.index
    }

    fn pivot(&self) -> &[f64] {
        self.arena[self.index].pivot()
    }

    fn radius(&self) -> f64 {
        self.arena[self.index].radius()
    }

    fn num_points(&self) -> usize {
        match &self.arena[self.index] {
            Node::Leaf { ids, .. } => ids.len(),
            Node::Branch { .. } => 0,
        }
    }

    fn point_id(&self, k: usize) -> usize {
        match &self.arena[self.index] {
            Node::Leaf { ids, .. } => ids[k],
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
            Node::Branch { left, right, .. } => BallTreeNode {
                arena: self.arena,
                index: if k == 0 { *left } else { *right },
            },
            Node::Leaf { .. } => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dual_tree::{dual_tree_knn, dual_tree_range};
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
    fn grid_knn_matches_exhaustive_top_down_farthest() {
        let tree = BallTree::new(grid(), EuclideanMetric::new(), BallTreeConfig::default()).unwrap();
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
    fn grid_knn_matches_exhaustive_kd_style() {
        let config = BallTreeConfig::default().construction_method(ConstructionMethod::KdStyle);
        let tree = BallTree::new(grid(), EuclideanMetric::new(), config).unwrap();
        let oracle = VectorArray::new(grid(), EuclideanMetric::new()).unwrap();
        let query = [0.0, 0.0];
        let expect = oracle.search_knn(&query, 5);
        let got = tree.search_knn(&query, 5).unwrap();
        for ((_, d1), (_, d2)) in expect.iter().zip(got.iter()) {
            assert_approx_eq!(d1, d2, 1e-9);
        }
    }

    #[test]
    fn grid_knn_matches_exhaustive_anchors_hierarchy() {
        let config = BallTreeConfig::default()
            .construction_method(ConstructionMethod::AnchorsHierarchy)
            .leaf_size(3)
            .unwrap()
            .seed(42);
        let tree = BallTree::new(grid(), EuclideanMetric::new(), config).unwrap();
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
    fn parallel_build_matches_sequential() {
        let config = BallTreeConfig::default()
            .construction_method(ConstructionMethod::AnchorsHierarchy)
            .leaf_size(3)
            .unwrap()
            .seed(42)
            .parallel(true);
        let tree = BallTree::new(grid(), EuclideanMetric::new(), config).unwrap();
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
    fn anchor_degeneracy_all_equal_points() {
        let vecs = vec![vec![5.0, 5.0]; 9];
        let config = BallTreeConfig::default().leaf_size(3).unwrap();
        let tree = BallTree::new(vecs, EuclideanMetric::new(), config).unwrap();
        let result = tree.search_knn(&[5.0, 5.0], 3).unwrap();
        assert_eq!(result.len(), 3);
        for (_, d) in result {
            assert_approx_eq!(d, 0.0, 1e-9);
        }
    }

    #[test]
    fn incremental_insert_matches_bulk_build() {
        let pts = grid();
        let mut tree =
            BallTree::new(vec![pts[0].clone()], EuclideanMetric::new(), BallTreeConfig::default())
                .unwrap();
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
    fn dual_tree_matches_single_tree() {
        let r_vecs = grid();
        let q_vecs: Vec<Vec<f64>> = vec![
            vec![0.3, 0.3],
            vec![4.0, 4.2],
            vec![2.5, 2.5],
            vec![1.1, 3.9],
        ];
        let metric = EuclideanMetric::new();
        let r_tree = BallTree::new(r_vecs.clone(), metric, BallTreeConfig::default()).unwrap();
        let q_tree = BallTree::new(q_vecs.clone(), metric, BallTreeConfig::default()).unwrap();

        let r_root = BallTreeNode::root(&r_tree).unwrap();
        let q_root = BallTreeNode::root(&q_tree).unwrap();
        let dual = dual_tree_knn(&metric, r_root, q_root, r_tree.points.as_slice(), q_tree.points.as_slice(), 3);

        for (qid, qv) in q_vecs.iter().enumerate() {
            let single = r_tree.search_knn(qv, 3).unwrap();
            let mut dual_result = dual.get(&qid).cloned().unwrap_or_default();
            dual_result.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
            assert_eq!(single.len(), dual_result.len());
            for ((_, d1), (_, d2)) in single.iter().zip(dual_result.iter()) {
                assert_approx_eq!(d1, d2, 1e-9);
            }
        }
    }

    #[test]
    fn dual_tree_range_matches_single_tree() {
        let r_vecs = grid();
        let q_vecs: Vec<Vec<f64>> = vec![vec![2.0, 2.0], vec![0.3, 0.3], vec![4.0, 4.2]];
        let metric = EuclideanMetric::new();
        let r_tree = BallTree::new(r_vecs.clone(), metric, BallTreeConfig::default()).unwrap();
        let q_tree = BallTree::new(q_vecs.clone(), metric, BallTreeConfig::default()).unwrap();

        let r_root = BallTreeNode::root(&r_tree).unwrap();
        let q_root = BallTreeNode::root(&q_tree).unwrap();
        let dual = dual_tree_range(
            &metric,
            r_root,
            q_root,
            r_tree.points.as_slice(),
            q_tree.points.as_slice(),
            0.5,
            2.0,
        );

        for (qid, qv) in q_vecs.iter().enumerate() {
            let mut single: Vec<(usize, f64)> = r_tree
                .search_radius(qv, 2.0)
                .unwrap()
                .into_iter()
                .filter(|(_, d)| *d >= 0.5)
                .collect();
            single.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
            let mut dual_result = dual.get(&qid).cloned().unwrap_or_default();
            dual_result.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
            assert_eq!(single.len(), dual_result.len());
            for ((_, d1), (_, d2)) in single.iter().zip(dual_result.iter()) {
                assert_approx_eq!(d1, d2, 1e-9);
            }
        }
    }
}
