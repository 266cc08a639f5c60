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

//! The node abstraction every family exposes for dual-tree queries, and
//! the generic depth-first traversal that answers a whole reference-vs-
//! query tree pair in one pass instead of one single-tree search per
//! query point.
//!
//! Every family's node carries a bounding ball (pivot + radius) even when
//! its native split is not ball-shaped (a KD-Tree's hyperrectangle, for
//! instance): `min_node_distance`/`max_node_distance` are derived from
//! that ball. This keeps the traversal in this module family-agnostic at
//! the cost of looser pruning for the non-ball families, which is the
//! same trade their single-tree searches already make when falling back
//! to a node's outer radius for the coarse prune.

use crate::metric::Metric;
use crate::utils::KnnHeap;
use hashbrown::HashMap;

/// A node in a family's tree, as seen by the dual-tree traversal. `Copy`
/// because nodes here are lightweight arena handles, not owning data.
pub trait DualTreeNode: Copy {
    /// A key unique within one tree, used to key the traversal's caches.
    /// Implementations use the node's arena index.
    fn id(&self) -> usize;
    fn pivot(&self) -> &[f64];
    fn radius(&self) -> f64;
    fn num_points(&self) -> usize;
    fn point_id(&self, k: usize) -> usize;
    fn num_children(&self) -> usize;
    fn child(&self, k: usize) -> Self;
}

fn min_node_distance<M: Metric, N: DualTreeNode>(metric: &M, a: N, b: N) -> f64 {
    (metric.dist(a.pivot(), b.pivot()) - a.radius() - b.radius()).max(0.0)
}

fn max_node_distance<M: Metric, N: DualTreeNode>(metric: &M, a: N, b: N) -> f64 {
    metric.dist(a.pivot(), b.pivot()) + a.radius() + b.radius()
}

/// All point ids transitively owned by `node`, memoized per node id so a
/// node enqueued multiple times during the traversal only pays the
/// recursive walk once.
fn subtree_point_ids<N: DualTreeNode>(node: N, cache: &mut HashMap<usize, Vec<usize>>) -> Vec<usize> {
    if let Some(ids) = cache.get(&node.id()) {
        return ids.clone();
    }
    let mut ids: Vec<usize> = (0..node.num_points()).map(|k| node.point_id(k)).collect();
    for c in 0..node.num_children() {
        ids.extend(subtree_point_ids(node.child(c), cache));
    }
    cache.insert(node.id(), ids.clone());
    ids
}

/// An upper bound on how far any of `qnode`'s owned query points might
/// still need to search: the largest current k-NN worst-distance among
/// them, or infinity if any of them has not yet accumulated k candidates.
/// This is the direct (un-cached-across-levels) reading of the bound; it
/// is looser than the fully memoized four-term recursive bound but is
/// always correct, which is all the traversal needs to prune safely.
fn b_bound<N: DualTreeNode>(
    qnode: N,
    heaps: &HashMap<usize, KnnHeap>,
    ids_cache: &mut HashMap<usize, Vec<usize>>,
) -> f64 {
    subtree_point_ids(qnode, ids_cache)
        .iter()
        .map(|qid| heaps.get(qid).map(|h| h.worst()).unwrap_or(f64::INFINITY))
        .fold(0.0_f64, f64::max)
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ScoredPair {
    score: f64,
    r_id: usize,
    q_id: usize,
}

/// Answers k-NN for every point owned by the `query_root` tree against the
/// points in the `reference_root` tree, in one joint traversal. `r_vectors`
/// / `q_vectors` are the raw vector stores each tree's point ids index
/// into (they may be the same collection for a self-join).
pub fn dual_tree_knn<M: Metric, N: DualTreeNode>(
    metric: &M,
    reference_root: N,
    query_root: N,
    r_vectors: &[Vec<f64>],
    q_vectors: &[Vec<f64>],
    k: usize,
) -> HashMap<usize, Vec<(usize, f64)>> {
    let mut heaps: HashMap<usize, KnnHeap> = HashMap::new();
    let mut ids_cache: HashMap<usize, Vec<usize>> = HashMap::new();

    let mut work: Vec<(N, N)> = vec![(reference_root, query_root)];

    while let Some((r, q)) = work.pop() {
        let bound = b_bound(q, &heaps, &mut ids_cache);
        if min_node_distance(metric, r, q) > bound {
            continue;
        }

        // Base cases: every owned point pair.
        for qi in 0..q.num_points() {
            let qid = q.point_id(qi);
            let qv = &q_vectors[qid];
            let heap = heaps.entry(qid).or_insert_with(|| KnnHeap::new(k));
            for ri in 0..r.num_points() {
                let rid = r.point_id(ri);
                let d = metric.dist(&r_vectors[rid], qv);
                heap.push(rid, d);
            }
        }

        // Enumerate child pairs and score them.
        let r_children: Vec<N> = (0..r.num_children()).map(|i| r.child(i)).collect();
        let q_children: Vec<N> = (0..q.num_children()).map(|i| q.child(i)).collect();

        let mut scored: Vec<ScoredPair> = Vec::new();
        let mut pair_nodes: HashMap<(usize, usize), (N, N)> = HashMap::new();

        match (r_children.is_empty(), q_children.is_empty()) {
            (true, true) => {}
            (false, true) => {
                for rc in &r_children {
                    let s = min_node_distance(metric, *rc, q);
                    if s.is_finite() {
                        scored.push(ScoredPair {
                            score: s,
                            r_id: rc.id(),
                            q_id: q.id(),
                        });
                        pair_nodes.insert((rc.id(), q.id()), (*rc, q));
                    }
                }
            }
            (true, false) => {
                for qc in &q_children {
                    let s = min_node_distance(metric, r, *qc);
                    if s.is_finite() {
                        scored.push(ScoredPair {
                            score: s,
                            r_id: r.id(),
                            q_id: qc.id(),
                        });
                        pair_nodes.insert((r.id(), qc.id()), (r, *qc));
                    }
                }
            }
            (false, false) => {
                for rc in &r_children {
                    for qc in &q_children {
                        let s = min_node_distance(metric, *rc, *qc);
                        if s.is_finite() {
                            scored.push(ScoredPair {
                                score: s,
                                r_id: rc.id(),
                                q_id: qc.id(),
                            });
                            pair_nodes.insert((rc.id(), qc.id()), (*rc, *qc));
                        }
                    }
                }
            }
        }

        scored.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap());
        for sp in scored {
            let b = b_bound(
                *pair_nodes.get(&(sp.r_id, sp.q_id)).map(|(_, q)| q).unwrap(),
                &heaps,
                &mut ids_cache,
            );
            if sp.score > b {
                continue;
            }
            let (rn, qn) = pair_nodes[&(sp.r_id, sp.q_id)];
            work.push((rn, qn));
        }
    }

    heaps
        .into_iter()
        .map(|(qid, heap)| (qid, heap.into_sorted_vec()))
        .collect()
}

/// Answers a range (annulus) query for every point owned by `query_root`
/// against `reference_root` in one joint traversal: for each query point,
/// every reference point at distance within `[r_min, r_max]`. Unlike the
/// k-NN traversal this needs no adaptive per-query bound — a node pair is
/// pruned outright once `d_min > r_max` or `d_max < r_min`, since neither
/// can hold a qualifying pair.
pub fn dual_tree_range<M: Metric, N: DualTreeNode>(
    metric: &M,
    reference_root: N,
    query_root: N,
    r_vectors: &[Vec<f64>],
    q_vectors: &[Vec<f64>],
    r_min: f64,
    r_max: f64,
) -> HashMap<usize, Vec<(usize, f64)>> {
    let mut out: HashMap<usize, Vec<(usize, f64)>> = HashMap::new();
    let mut work: Vec<(N, N)> = vec![(reference_root, query_root)];

    while let Some((r, q)) = work.pop() {
        let d_min = min_node_distance(metric, r, q);
        let d_max = max_node_distance(metric, r, q);
        if d_min > r_max || d_max < r_min {
            continue;
        }

        for qi in 0..q.num_points() {
            let qid = q.point_id(qi);
            let qv = &q_vectors[qid];
            for ri in 0..r.num_points() {
                let rid = r.point_id(ri);
                let d = metric.dist(&r_vectors[rid], qv);
                if d >= r_min && d <= r_max {
                    out.entry(qid).or_insert_with(Vec::new).push((rid, d));
                }
            }
        }

        let r_children: Vec<N> = (0..r.num_children()).map(|i| r.child(i)).collect();
        let q_children: Vec<N> = (0..q.num_children()).map(|i| q.child(i)).collect();

        let prune = |a: N, b: N| {
            let d_min = min_node_distance(metric, a, b);
            let d_max = max_node_distance(metric, a, b);
            d_min > r_max || d_max < r_min
        };

        match (r_children.is_empty(), q_children.is_empty()) {
            (true, true) => {}
            (false, true) => {
                for &rc in &r_children {
                    if !prune(rc, q) {
                        work.push((rc, q));
                    }
                }
            }
            (true, false) => {
                for &qc in &q_children {
                    if !prune(r, qc) {
                        work.push((r, qc));
                    }
                }
            }
            (false, false) => {
                for &rc in &r_children {
                    for &qc in &q_children {
                        if !prune(rc, qc) {
                            work.push((rc, qc));
                        }
                    }
                }
            }
        }
    }

    for v in out.values_mut() {
        v.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
    }
    out
}
