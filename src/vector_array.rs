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

//! The exhaustive, no-acceleration-structure baseline. Every other family
//! is tested against this as ground truth.

use crate::error::VantageResult;
use crate::metric::Metric;
use crate::point_cloud::VectorStore;
use crate::utils::KnnHeap;

/// A flat collection that answers every query by a linear scan. No
/// construction cost, O(n) query cost; used both as a fallback for tiny
/// collections and as the oracle in this crate's own tests.
pub struct VectorArray<M: Metric> {
    points: VectorStore,
    metric: M,
}

impl<M: Metric> VectorArray<M> {
    pub fn new(vectors: Vec<Vec<f64>>, metric: M) -> VantageResult<Self> {
        let points = VectorStore::new(vectors)?;
        Ok(VectorArray { points, metric })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, i: usize) -> &[f64] {
        self.points.point(i)
    }

    pub fn metric(&self) -> &M {
        &self.metric
    }

    /// All points within `range` of `query`, ascending by distance.
    pub fn search_radius(&self, query: &[f64], range: f64) -> Vec<(usize, f64)> {
        let mut hits: Vec<(usize, f64)> = self
            .points
            .reference_indexes()
            .filter_map(|i| {
                let d = self.metric.dist(self.points.point(i), query);
                if d <= range {
                    Some((i, d))
                } else {
                    None
                }
            })
            .collect();
        hits.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        hits
    }

    /// The `k` nearest points to `query`, ascending by distance. Returns
    /// fewer than `k` entries if the collection has fewer points.
    pub fn search_knn(&self, query: &[f64], k: usize) -> Vec<(usize, f64)> {
        let mut heap = KnnHeap::new(k);
        for i in self.points.reference_indexes() {
            let d = self.metric.dist(self.points.point(i), query);
            heap.push(i, d);
        }
        heap.into_sorted_vec()
    }
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
    fn grid_knn_matches_scenario() {
        let arr = VectorArray::new(grid(), EuclideanMetric::new()).unwrap();
        let result = arr.search_knn(&[2.1, 2.0], 4);
        let dists: Vec<f64> = result.iter().map(|(_, d)| *d).collect();
        for w in dists.windows(2) {
            assert!(w[0] <= w[1]);
        }
        assert_approx_eq!(dists[0], 0.1, 1e-9);
    }

    #[test]
    fn radius_search_far_query_is_empty() {
        let arr = VectorArray::new(grid(), EuclideanMetric::new()).unwrap();
        assert!(arr.search_radius(&[10.0, 10.0], 0.5).is_empty());
    }

    #[test]
    fn duplicated_points_return_distinct_ids() {
        let vecs = vec![vec![1.0, 1.0, 1.0, 1.0]; 10];
        let arr = VectorArray::new(vecs, EuclideanMetric::new()).unwrap();
        let result = arr.search_knn(&[1.0, 1.0, 1.0, 1.0], 3);
        assert_eq!(result.len(), 3);
        let ids: std::collections::HashSet<usize> = result.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids.len(), 3);
        for (_, d) in &result {
            assert_approx_eq!(*d, 0.0, 1e-9);
        }
    }

    #[test]
    fn k_larger_than_n_returns_n() {
        let arr = VectorArray::new(vec![vec![0.0], vec![1.0]], EuclideanMetric::new()).unwrap();
        assert_eq!(arr.search_knn(&[0.0], 10).len(), 2);
    }
}
