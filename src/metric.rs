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

//! The distance metric contract every index family builds against, plus
//! the small set of concrete metrics this crate needs to exercise itself.
//! Richer metrics (Mahalanobis, cosine, learned metrics, ...) are a
//! collaborator's concern and are not implemented here.

/// Opaque per-collection state a metric may derive once from the full
/// vector set and reuse on every subsequent distance call (e.g. a
/// precomputed squared norm per vector).
#[derive(Debug, Clone, Default)]
pub struct AccelerationCache {
    per_point: Vec<f64>,
}

impl AccelerationCache {
    fn new(per_point: Vec<f64>) -> Self {
        AccelerationCache { per_point }
    }

    fn get(&self, i: usize) -> f64 {
        self.per_point[i]
    }
}

/// Opaque per-query state, the query-side analog of [`AccelerationCache`].
#[derive(Debug, Clone, Default)]
pub struct QueryInfo {
    value: f64,
}

/// A distance function between dense `f64` vectors, together with the
/// advertised algebraic properties that index families rely on to prune
/// safely.
///
/// Implementors that cannot offer a property (e.g. the triangle
/// inequality) must answer `false` truthfully; collections that require
/// it reject the metric at build time rather than silently producing
/// wrong answers.
pub trait Metric: Send + Sync {
    /// Distance between two raw vectors. Must be nonnegative.
    fn dist(&self, a: &[f64], b: &[f64]) -> f64;

    /// `dist(x, x) == 0` for every `x`.
    fn is_indiscernible(&self) -> bool {
        true
    }

    /// `dist(a, b) == dist(b, a)` for every `a, b`.
    fn is_symmetric(&self) -> bool {
        true
    }

    /// `dist(a, c) <= dist(a, b) + dist(b, c)` for every `a, b, c`. Ball
    /// Tree, VP-Tree, Cover Tree, and RBC require this to prune correctly.
    fn is_subadditive(&self) -> bool {
        true
    }

    /// Shorthand for the conjunction most collections actually check.
    fn is_valid_metric(&self) -> bool {
        self.is_indiscernible() && self.is_symmetric() && self.is_subadditive()
    }

    /// Whether this metric is a member of the p-norm family over raw
    /// coordinates, the property `KdTree` requires (its pruning relies on
    /// per-axis coordinate comparisons, which only a coordinate-wise norm
    /// respects).
    fn is_p_norm(&self) -> bool {
        false
    }

    /// Whether this is exactly Euclidean (L2) distance, the property
    /// `Dci` requires (its pruning relies on projections onto random unit
    /// directions being valid lower bounds, which holds only for L2).
    fn is_euclidean(&self) -> bool {
        false
    }

    /// Whether [`Metric::build_acceleration_cache`] returns anything
    /// useful for this metric.
    fn supports_acceleration(&self) -> bool {
        false
    }

    /// Precompute one opaque value per vector, reused by every
    /// `dist_cached` call against that vector.
    fn build_acceleration_cache(&self, _vectors: &[Vec<f64>]) -> AccelerationCache {
        AccelerationCache::default()
    }

    /// Precompute the query-side analog of [`AccelerationCache`].
    fn build_query_info(&self, _query: &[f64]) -> QueryInfo {
        QueryInfo::default()
    }

    /// Cache-assisted distance between two indexed vectors. The default
    /// implementation ignores the cache and falls back to [`Metric::dist`];
    /// metrics that advertise `supports_acceleration() == true` should
    /// override this to use it.
    fn dist_cached(
        &self,
        i: usize,
        j: usize,
        vectors: &[Vec<f64>],
        _cache: &AccelerationCache,
    ) -> f64 {
        self.dist(&vectors[i], &vectors[j])
    }

    /// Cache-assisted distance between an indexed vector and a query.
    fn dist_to_query_cached(
        &self,
        i: usize,
        query: &[f64],
        _query_info: &QueryInfo,
        vectors: &[Vec<f64>],
        _cache: &AccelerationCache,
    ) -> f64 {
        self.dist(&vectors[i], query)
    }
}

/// Ordinary Euclidean (L2) distance. Supports an acceleration cache of
/// the precomputed squared norm, turning `dist_cached` into a single
/// dot-product plus two cache lookups.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMetric;

impl EuclideanMetric {
    pub fn new() -> Self {
        EuclideanMetric
    }

    fn squared_norm(v: &[f64]) -> f64 {
        v.iter().map(|x| x * x).sum()
    }

    fn dot(a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
    }
}

impl Metric for EuclideanMetric {
    fn dist(&self, a: &[f64], b: &[f64]) -> f64 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f64>()
            .sqrt()
    }

    fn is_p_norm(&self) -> bool {
        true
    }

    fn is_euclidean(&self) -> bool {
        true
    }

    fn supports_acceleration(&self) -> bool {
        true
    }

    fn build_acceleration_cache(&self, vectors: &[Vec<f64>]) -> AccelerationCache {
        AccelerationCache::new(vectors.iter().map(|v| Self::squared_norm(v)).collect())
    }

    fn build_query_info(&self, query: &[f64]) -> QueryInfo {
        QueryInfo {
            value: Self::squared_norm(query),
        }
    }

    fn dist_cached(
        &self,
        i: usize,
        j: usize,
        vectors: &[Vec<f64>],
        cache: &AccelerationCache,
    ) -> f64 {
        let sq = (cache.get(i) + cache.get(j) - 2.0 * Self::dot(&vectors[i], &vectors[j])).max(0.0);
        sq.sqrt()
    }

    fn dist_to_query_cached(
        &self,
        i: usize,
        query: &[f64],
        query_info: &QueryInfo,
        vectors: &[Vec<f64>],
        cache: &AccelerationCache,
    ) -> f64 {
        let sq = (cache.get(i) + query_info.value - 2.0 * Self::dot(&vectors[i], query)).max(0.0);
        sq.sqrt()
    }
}

/// Squared Euclidean distance. Not a true metric (it fails the triangle
/// inequality, e.g. on the real line with `0, 1, 2`), so it is never
/// accepted by a collection's `Metric` slot. `Dci` uses it internally to
/// re-rank candidates without the cost of a square root.
#[derive(Debug, Clone, Copy, Default)]
pub struct SquaredEuclideanMetric;

impl SquaredEuclideanMetric {
    pub fn dist(a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
    }
}

/// Manhattan (L1) distance. Included alongside [`EuclideanMetric`] so
/// `KdTree`'s p-norm-family restriction has more than one metric to
/// validate against.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManhattanMetric;

impl ManhattanMetric {
    pub fn new() -> Self {
        ManhattanMetric
    }
}

impl Metric for ManhattanMetric {
    fn dist(&self, a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum()
    }

    fn is_p_norm(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn euclidean_cached_matches_uncached() {
        let metric = EuclideanMetric::new();
        let vectors = vec![vec![0.0, 0.0], vec![3.0, 4.0], vec![1.0, 1.0]];
        let cache = metric.build_acceleration_cache(&vectors);
        for i in 0..vectors.len() {
            for j in 0..vectors.len() {
                let direct = metric.dist(&vectors[i], &vectors[j]);
                let cached = metric.dist_cached(i, j, &vectors, &cache);
                assert_approx_eq!(direct, cached, 1e-9);
            }
        }
    }

    #[test]
    fn euclidean_is_valid_metric() {
        let metric = EuclideanMetric::new();
        assert!(metric.is_valid_metric());
        assert!(metric.is_p_norm());
        assert!(metric.is_euclidean());
    }

    #[test]
    fn manhattan_distance() {
        let metric = ManhattanMetric::new();
        assert_eq!(metric.dist(&[0.0, 0.0], &[3.0, 4.0]), 7.0);
    }

    #[test]
    fn squared_euclidean_violates_triangle_inequality() {
        let a = [0.0];
        let b = [1.0];
        let c = [2.0];
        let ac = SquaredEuclideanMetric::dist(&a, &c);
        let ab = SquaredEuclideanMetric::dist(&a, &b);
        let bc = SquaredEuclideanMetric::dist(&b, &c);
        assert!(ac > ab + bc);
    }
}
