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

//! Random Ball Cover: a flat, two-level structure over `R = ceil(sqrt(n))`
//! randomly chosen representatives. `Rbc` is exact (every representative
//! owns its nearest points, no overlap); `RbcOneShot` trades exactness for
//! query speed by letting every representative independently claim its
//! `s` nearest points, without exclusivity.

use crate::dual_tree::DualTreeNode;
use crate::error::{VantageError, VantageResult};
use crate::metric::Metric;
use crate::point_cloud::VectorStore;
use crate::utils::{seeded_rng, KnnHeap};
use log::debug;
use rand::seq::SliceRandom;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct RbcConfig {
    pub seed: Option<u64>,
}

impl Default for RbcConfig {
    fn default() -> Self {
        RbcConfig { seed: None }
    }
}

impl RbcConfig {
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

struct Representative {
    id: usize,
    /// `(owned point id, distance to this representative)`, ascending
    /// would be nice but is not required for correctness.
    owned: Vec<(usize, f64)>,
    /// The farthest owned point's distance — the bound used to prune
    /// representatives that cannot contain anything within `range`/`τ`.
    rep_radius: f64,
}

/// The exact Random Ball Cover.
pub struct Rbc<M: Metric> {
    points: VectorStore,
    metric: M,
    reps: Vec<Representative>,
}

impl<M: Metric> Rbc<M> {
    pub fn new(vectors: Vec<Vec<f64>>, metric: M, config: RbcConfig) -> VantageResult<Self> {
        if !metric.is_valid_metric() {
            return Err(VantageError::InvalidMetric(
                "Rbc requires a metric satisfying the triangle inequality".to_string(),
            ));
        }
        let points = VectorStore::new(vectors)?;
        let start = Instant::now();
        let n = points.len();
        let mut reps = Vec::new();
        if n > 0 {
            let r = (n as f64).sqrt().ceil() as usize;
            let r = r.max(1).min(n);
            let mut rng = seeded_rng(config.seed, 0);
            let mut all_ids: Vec<usize> = points.reference_indexes().collect();
            all_ids.shuffle(&mut rng);
            let rep_ids: Vec<usize> = all_ids[..r].to_vec();

            for &rid in &rep_ids {
                reps.push(Representative {
                    id: rid,
                    owned: Vec::new(),
                    rep_radius: 0.0,
                });
            }

            for id in points.reference_indexes() {
                let mut best_rep = 0usize;
                let mut best_dist = f64::INFINITY;
                for (i, rep) in reps.iter().enumerate() {
                    let d = metric.dist(points.point(rep.id), points.point(id));
                    if d < best_dist {
                        best_dist = d;
                        best_rep = i;
                    }
                }
                reps[best_rep].owned.push((id, best_dist));
                if best_dist > reps[best_rep].rep_radius {
                    reps[best_rep].rep_radius = best_dist;
                }
            }
        }
        debug!(
            "Rbc built: {} points, {} representatives, {:?}",
            points.len(),
            reps.len(),
            start.elapsed()
        );
        Ok(Rbc { points, metric, reps })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// `dist(q, rep_i)` for every representative.
    fn query_rep_dists(&self, query: &[f64]) -> Vec<f64> {
        self.reps
            .iter()
            .map(|rep| self.metric.dist(self.points.point(rep.id), query))
            .collect()
    }

    pub fn search_knn(&self, query: &[f64], k: usize) -> VantageResult<Vec<(usize, f64)>> {
        if k == 0 {
            return Err(VantageError::InvalidArgument("k must be positive".to_string()));
        }
        if self.reps.is_empty() {
            return Ok(Vec::new());
        }
        let query_rep_dists = self.query_rep_dists(query);

        // argmin over query_rep_dists: the correct "less than current
        // best" comparison, never comparing an entry against itself.
        let mut best_rep = 0usize;
        for i in 1..query_rep_dists.len() {
            if query_rep_dists[i] < query_rep_dists[best_rep] {
                best_rep = i;
            }
        }

        let mut heap = KnnHeap::new(k);
        let best_rep_dist = query_rep_dists[best_rep];
        heap.push(self.reps[best_rep].id, best_rep_dist);
        for &(pid, _) in &self.reps[best_rep].owned {
            let d = self.metric.dist(self.points.point(pid), query);
            heap.push(pid, d);
        }

        for (i, rep) in self.reps.iter().enumerate() {
            if i == best_rep {
                continue;
            }
            let qrep = query_rep_dists[i];
            let tau = heap.worst();
            if qrep > tau + rep.rep_radius {
                continue;
            }
            if qrep > 3.0 * best_rep_dist {
                continue;
            }
            heap.push(rep.id, qrep);
            for &(pid, rd) in &rep.owned {
                if qrep > heap.worst() + rd {
                    continue;
                }
                let d = self.metric.dist(self.points.point(pid), query);
                heap.push(pid, d);
            }
        }

        Ok(heap.into_sorted_vec())
    }

    pub fn search_radius(&self, query: &[f64], range: f64) -> VantageResult<Vec<(usize, f64)>> {
        if range < 0.0 {
            return Err(VantageError::InvalidArgument("range must be nonnegative".to_string()));
        }
        let mut out = Vec::new();
        for rep in &self.reps {
            let qrep = self.metric.dist(self.points.point(rep.id), query);
            if qrep <= range {
                out.push((rep.id, qrep));
            }
            if qrep > range + rep.rep_radius {
                continue;
            }
            for &(pid, rd) in &rep.owned {
                if qrep > range + rd {
                    continue;
                }
                let d = self.metric.dist(self.points.point(pid), query);
                if d <= range {
                    out.push((pid, d));
                }
            }
        }
        out.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        Ok(out)
    }
}

/// A dual-tree node view over an exact [`Rbc`]. The structure is flat —
/// a virtual root owning no point of its own, with every representative
/// as a direct child — rather than the recursive arenas the other
/// families use. Each representative is a leaf: its `owned` list already
/// includes its own id (every point, the representative included, is
/// assigned to its nearest representative, and a representative is
/// always its own nearest one), so unlike Cover Tree or VP-Tree no
/// virtual-leaf trick is needed here.
pub struct RbcNode<'a, M: Metric> {
    rbc: &'a Rbc<M>,
    rep: Option<usize>,
}

impl<'a, M: Metric> Clone for RbcNode<'a, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, M: Metric> Copy for RbcNode<'a, M> {}

impl<'a, M: Metric> RbcNode<'a, M> {
    pub fn root(rbc: &'a Rbc<M>) -> Option<Self> {
        if rbc.reps.is_empty() {
            return None;
        }
        Some(RbcNode { rbc, rep: None })
    }
}

impl<'a, M: Metric> DualTreeNode for RbcNode<'a, M> {
    fn id(&self) -> usize {
        match self.rep {
            None => usize::MAX,
            Some(i) => i,
        }
    }

    fn pivot(&self) -> &[f64] {
        let rid = match self.rep {
            None => self.rbc.reps[0].id,
            Some(i) => self.rbc.reps[i].id,
        };
        self.rbc.points.point(rid)
    }

    fn radius(&self) -> f64 {
        match self.rep {
            None => {
                let pivot = self.pivot();
                self.rbc
                    .reps
                    .iter()
                    .map(|r| self.rbc.metric.dist(pivot, self.rbc.points.point(r.id)) + r.rep_radius)
                    .fold(0.0_f64, f64::max)
            }
            Some(i) => self.rbc.reps[i].rep_radius,
        }
    }

    fn num_points(&self) -> usize {
        match self.rep {
            None => 0,
            Some(i) => self.rbc.reps[i].owned.len(),
        }
    }

    fn point_id(&self, k: usize) -> usize {
        match self.rep {
            None => unreachable!("root node owns no points"),
            Some(i) => self.rbc.reps[i].owned[k].0,
        }
    }

    fn num_children(&self) -> usize {
        match self.rep {
            None => self.rbc.reps.len(),
            Some(_) => 0,
        }
    }

    fn child(&self, k: usize) -> Self {
        match self.rep {
            None => RbcNode { rbc: self.rbc, rep: Some(k) },
            Some(_) => unreachable!("representative nodes have no children"),
        }
    }
}

/// The one-shot Random Ball Cover: each representative independently
/// claims its `s` nearest points (no exclusivity), so membership can
/// overlap and a query only ever consults its single closest
/// representative. Faster, approximate.
pub struct RbcOneShot<M: Metric> {
    points: VectorStore,
    metric: M,
    reps: Vec<Representative>,
}

impl<M: Metric> RbcOneShot<M> {
    pub fn new(vectors: Vec<Vec<f64>>, metric: M, config: RbcConfig) -> VantageResult<Self> {
        if !metric.is_valid_metric() {
            return Err(VantageError::InvalidMetric(
                "RbcOneShot requires a metric satisfying the triangle inequality".to_string(),
            ));
        }
        let points = VectorStore::new(vectors)?;
        let n = points.len();
        let mut reps = Vec::new();
        if n > 0 {
            let r = (n as f64).sqrt().ceil() as usize;
            let s = r.max(1);
            let r = r.max(1).min(n);
            let mut rng = seeded_rng(config.seed, 1);
            let mut all_ids: Vec<usize> = points.reference_indexes().collect();
            all_ids.shuffle(&mut rng);
            let rep_ids: Vec<usize> = all_ids[..r].to_vec();

            for &rid in &rep_ids {
                let mut dists: Vec<(usize, f64)> = points
                    .reference_indexes()
                    .map(|id| (id, metric.dist(points.point(rid), points.point(id))))
                    .collect();
                dists.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
                dists.truncate(s);
                let rep_radius = dists.last().map(|(_, d)| *d).unwrap_or(0.0);
                reps.push(Representative {
                    id: rid,
                    owned: dists,
                    rep_radius,
                });
            }
        }
        Ok(RbcOneShot { points, metric, reps })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns the closest representative's owned points, sorted by
    /// distance to `query` — an approximate k-NN.
    pub fn search_knn(&self, query: &[f64], k: usize) -> VantageResult<Vec<(usize, f64)>> {
        if k == 0 {
            return Err(VantageError::InvalidArgument("k must be positive".to_string()));
        }
        if self.reps.is_empty() {
            return Ok(Vec::new());
        }
        let mut best_rep = 0usize;
        let mut best_dist = f64::INFINITY;
        for (i, rep) in self.reps.iter().enumerate() {
            let d = self.metric.dist(self.points.point(rep.id), query);
            if d < best_dist {
                best_dist = d;
                best_rep = i;
            }
        }
        let mut heap = KnnHeap::new(k);
        for &(pid, _) in &self.reps[best_rep].owned {
            let d = self.metric.dist(self.points.point(pid), query);
            heap.push(pid, d);
        }
        Ok(heap.into_sorted_vec())
    }
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
    fn exact_knn_matches_exhaustive() {
        let config = RbcConfig::default().seed(4);
        let rbc = Rbc::new(grid(), EuclideanMetric::new(), config).unwrap();
        let oracle = VectorArray::new(grid(), EuclideanMetric::new()).unwrap();
        let query = [2.1, 2.0];
        let expect = oracle.search_knn(&query, 4);
        let got = rbc.search_knn(&query, 4).unwrap();
        assert_eq!(expect.len(), got.len());
        for ((_, d1), (_, d2)) in expect.iter().zip(got.iter()) {
            assert_approx_eq!(d1, d2, 1e-9);
        }
    }

    #[test]
    fn exact_radius_matches_exhaustive() {
        let config = RbcConfig::default().seed(4);
        let rbc = Rbc::new(grid(), EuclideanMetric::new(), config).unwrap();
        let oracle = VectorArray::new(grid(), EuclideanMetric::new()).unwrap();
        let query = [2.0, 2.0];
        let mut expect = oracle.search_radius(&query, 1.5);
        let mut got = rbc.search_radius(&query, 1.5).unwrap();
        expect.sort_by(|a, b| a.0.cmp(&b.0));
        got.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(expect, got);
    }

    #[test]
    fn one_shot_returns_plausible_neighbors() {
        let config = RbcConfig::default().seed(4);
        let rbc = RbcOneShot::new(grid(), EuclideanMetric::new(), config).unwrap();
        let result = rbc.search_knn(&[2.0, 2.0], 3).unwrap();
        assert!(!result.is_empty());
        assert!(result.len() <= 3);
    }
}
