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

//! Dynamic Continuous Index: `L` composite indices, each made of `m`
//! simple indices over 1-D projections onto random unit directions. A
//! point only becomes a candidate within a composite index once it has
//! been visited by all `m` of that composite's simple-index walks; the
//! final candidate set for k-NN is the union across composites, doubling
//! the per-composite search budget until every composite has at least
//! `k` candidates. Valid only for Euclidean distance: the pruning relies
//! on a projection onto a unit vector being a valid lower bound on the
//! true L2 distance, a property this crate's other metrics do not share.

use crate::error::{VantageError, VantageResult};
use crate::metric::{EuclideanMetric, Metric};
use crate::point_cloud::VectorStore;
use crate::utils::seeded_rng;
use hashbrown::{HashMap, HashSet};
use log::debug;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;
use std::time::Instant;

const PARALLEL_THRESHOLD: usize = 2048;

#[derive(Debug, Clone)]
pub struct DciConfig {
    pub m: usize,
    pub l: usize,
    pub seed: Option<u64>,
    pub parallel: bool,
}

impl Default for DciConfig {
    fn default() -> Self {
        DciConfig {
            m: 15,
            l: 3,
            seed: None,
            parallel: false,
        }
    }
}

impl DciConfig {
    pub fn m(mut self, m: usize) -> VantageResult<Self> {
        if m == 0 {
            return Err(VantageError::InvalidArgument("m must be positive".to_string()));
        }
        self.m = m;
        Ok(self)
    }

    pub fn l(mut self, l: usize) -> VantageResult<Self> {
        if l == 0 {
            return Err(VantageError::InvalidArgument("l must be positive".to_string()));
        }
        self.l = l;
        Ok(self)
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

/// One (composite, simple) projection: a unit direction and the sorted
/// `(projection, point id)` array every query walks outward from.
struct SimpleIndex {
    direction: Vec<f64>,
    sorted: Vec<(f64, usize)>,
}

impl SimpleIndex {
    fn project(&self, v: &[f64]) -> f64 {
        self.direction.iter().zip(v.iter()).map(|(a, b)| a * b).sum()
    }

    /// A two-sided walk outward from `target`, yielding `(index, id)`
    /// pairs in order of increasing `|key - target|`.
    fn walk(&self, target: f64) -> TwoSidedWalk<'_> {
        let start = match self
            .sorted
            .binary_search_by(|(key, _)| key.partial_cmp(&target).unwrap())
        {
            Ok(i) => i,
            Err(i) => i,
        };
        TwoSidedWalk {
            sorted: &self.sorted,
            target,
            left: start as isize - 1,
            right: start as isize,
        }
    }
}

struct TwoSidedWalk<'a> {
    sorted: &'a [(f64, usize)],
    target: f64,
    left: isize,
    right: isize,
}

impl<'a> Iterator for TwoSidedWalk<'a> {
    /// `(gap, point id)` where `gap = |key - target|`.
    type Item = (f64, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let left_gap = if self.left >= 0 {
            Some((self.target - self.sorted[self.left as usize].0).abs())
        } else {
            None
        };
        let right_gap = if (self.right as usize) < self.sorted.len() {
            Some((self.sorted[self.right as usize].0 - self.target).abs())
        } else {
            None
        };
        match (left_gap, right_gap) {
            (None, None) => None,
            (Some(g), None) => {
                let id = self.sorted[self.left as usize].1;
                self.left -= 1;
                Some((g, id))
            }
            (None, Some(g)) => {
                let id = self.sorted[self.right as usize].1;
                self.right += 1;
                Some((g, id))
            }
            (Some(gl), Some(gr)) => {
                if gl <= gr {
                    let id = self.sorted[self.left as usize].1;
                    self.left -= 1;
                    Some((gl, id))
                } else {
                    let id = self.sorted[self.right as usize].1;
                    self.right += 1;
                    Some((gr, id))
                }
            }
        }
    }
}

fn build_simple_index(points: &VectorStore, dim: usize, seed: Option<u64>, l: usize, j: usize) -> SimpleIndex {
    let mut local_rng = seeded_rng(seed, (l as u64) << 16 | j as u64);
    let direction = random_unit_direction(dim, &mut local_rng);
    let mut sorted: Vec<(f64, usize)> = points
        .reference_indexes()
        .map(|id| {
            let proj = direction
                .iter()
                .zip(points.point(id))
                .map(|(a, b)| a * b)
                .sum();
            (proj, id)
        })
        .collect();
    sorted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
    SimpleIndex { direction, sorted }
}

fn random_unit_direction(dim: usize, rng: &mut impl Rng) -> Vec<f64> {
    let mut v: Vec<f64> = (0..dim).map(|_| StandardNormal.sample(rng)).collect();
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 1e-12 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

/// The Dynamic Continuous Index. Euclidean-only by construction — there
/// is no `Metric` type parameter because a non-Euclidean metric's
/// projections would not lower-bound its true distance.
pub struct Dci {
    points: VectorStore,
    metric: EuclideanMetric,
    config: DciConfig,
    /// `composites[l][j]` is the `j`-th simple index of composite `l`.
    composites: Vec<Vec<SimpleIndex>>,
}

impl Dci {
    pub fn new(vectors: Vec<Vec<f64>>, config: DciConfig) -> VantageResult<Self> {
        let points = VectorStore::new(vectors)?;
        let metric = EuclideanMetric::new();
        let start = Instant::now();
        let dim = points.dim();

        let pairs: Vec<(usize, usize)> = (0..config.l)
            .flat_map(|l| (0..config.m).map(move |j| (l, j)))
            .collect();
        let flat: Vec<SimpleIndex> = if config.parallel && pairs.len() * points.len() > PARALLEL_THRESHOLD {
            pairs
                .par_iter()
                .map(|&(l, j)| build_simple_index(&points, dim, config.seed, l, j))
                .collect()
        } else {
            pairs
                .iter()
                .map(|&(l, j)| build_simple_index(&points, dim, config.seed, l, j))
                .collect()
        };
        let mut composites: Vec<Vec<SimpleIndex>> = Vec::with_capacity(config.l);
        let mut flat = flat.into_iter();
        for _ in 0..config.l {
            composites.push((&mut flat).take(config.m).collect());
        }

        debug!(
            "Dci built: {} points, m={}, L={}, {:?}",
            points.len(),
            config.m,
            config.l,
            start.elapsed()
        );
        Ok(Dci {
            points,
            metric,
            config,
            composites,
        })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn true_dist(&self, id: usize, query: &[f64]) -> f64 {
        self.metric.dist(self.points.point(id), query)
    }

    /// k nearest neighbors by true Euclidean distance among candidates
    /// admitted by every composite index's `m`-vote process.
    pub fn search_knn(&self, query: &[f64], k: usize) -> VantageResult<Vec<(usize, f64)>> {
        if k == 0 {
            return Err(VantageError::InvalidArgument("k must be positive".to_string()));
        }
        let n = self.points.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        let k = k.min(n);
        let mut budget = ((self.config.m as f64) * (k as f64) * ((n as f64 / k as f64).ln().max(1.0)))
            .ceil() as usize;
        budget = budget.max(self.config.m);

        loop {
            let mut candidate_union: HashSet<usize> = HashSet::new();
            let mut exhausted_all = true;
            for simples in &self.composites {
                let mut votes: HashMap<usize, usize> = HashMap::new();
                let mut walks: Vec<TwoSidedWalk> = simples
                    .iter()
                    .map(|s| s.walk(s.project(query)))
                    .collect();
                let mut candidates: HashSet<usize> = HashSet::new();
                let mut rounds = 0usize;
                'outer: while rounds < budget {
                    let mut any_progress = false;
                    for w in walks.iter_mut() {
                        if let Some((_, id)) = w.next() {
                            any_progress = true;
                            let v = votes.entry(id).or_insert(0);
                            *v += 1;
                            if *v == simples.len() {
                                candidates.insert(id);
                            }
                            rounds += 1;
                            if rounds >= budget {
                                break 'outer;
                            }
                        }
                    }
                    if !any_progress {
                        break;
                    }
                }
                if candidates.len() < k {
                    exhausted_all = false;
                }
                candidate_union.extend(candidates);
            }

            if candidate_union.len() >= k || exhausted_all || budget >= n * self.config.m {
                let mut scored: Vec<(usize, f64)> = candidate_union
                    .into_iter()
                    .map(|id| (id, self.true_dist(id, query)))
                    .collect();
                scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
                scored.truncate(k);
                return Ok(scored);
            }
            budget *= 2;
        }
    }

    /// All points within `range` of `query`, found by walking every
    /// simple index outward until the one-sided projection gap exceeds
    /// `range` (a valid lower bound on the true distance since every
    /// direction is a unit vector), then intersecting the per-composite
    /// candidate sets and filtering by true distance.
    pub fn search_radius(&self, query: &[f64], range: f64) -> VantageResult<Vec<(usize, f64)>> {
        if range < 0.0 {
            return Err(VantageError::InvalidArgument("range must be nonnegative".to_string()));
        }
        let mut composite_sets: Vec<HashSet<usize>> = Vec::with_capacity(self.composites.len());
        for simples in &self.composites {
            let mut per_simple_sets: Vec<HashSet<usize>> = Vec::with_capacity(simples.len());
            for s in simples {
                let target = s.project(query);
                let mut set = HashSet::new();
                for (gap, id) in s.walk(target) {
                    if gap > range {
                        break;
                    }
                    set.insert(id);
                }
                per_simple_sets.push(set);
            }
            let mut intersection = per_simple_sets[0].clone();
            for set in &per_simple_sets[1..] {
                intersection = intersection.intersection(set).cloned().collect();
            }
            composite_sets.push(intersection);
        }
        let mut union: HashSet<usize> = HashSet::new();
        for set in composite_sets {
            union.extend(set);
        }
        let mut out: Vec<(usize, f64)> = union
            .into_iter()
            .map(|id| (id, self.true_dist(id, query)))
            .filter(|(_, d)| *d <= range)
            .collect();
        out.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn radius_search_matches_exhaustive() {
        let config = DciConfig::default().seed(3);
        let dci = Dci::new(grid(), config).unwrap();
        let oracle = VectorArray::new(grid(), EuclideanMetric::new()).unwrap();
        let query = [2.0, 2.0];
        let mut expect = oracle.search_radius(&query, 1.5);
        let mut got = dci.search_radius(&query, 1.5).unwrap();
        expect.sort_by(|a, b| a.0.cmp(&b.0));
        got.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(expect, got);
    }

    #[test]
    fn knn_returns_k_results() {
        let config = DciConfig::default().seed(3);
        let dci = Dci::new(grid(), config).unwrap();
        let got = dci.search_knn(&[2.1, 2.0], 4).unwrap();
        assert_eq!(got.len(), 4);
    }

    #[test]
    fn parallel_build_matches_sequential() {
        let config = DciConfig::default().seed(3).parallel(true);
        let dci = Dci::new(grid(), config).unwrap();
        let oracle = VectorArray::new(grid(), EuclideanMetric::new()).unwrap();
        let query = [2.1, 2.0];
        let expect = oracle.search_knn(&query, 4);
        let got = dci.search_knn(&query, 4).unwrap();
        assert_eq!(expect.len(), got.len());
    }

    #[test]
    fn rejects_zero_m_or_l() {
        assert!(DciConfig::default().m(0).is_err());
        assert!(DciConfig::default().l(0).is_err());
    }
}
