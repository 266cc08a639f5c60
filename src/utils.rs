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

//! Small shared helpers used across every index family: the bounded k-NN
//! heap, seeded RNG construction, and a `f64` wrapper with a total order.
//! We hand-roll the ordered-float wrapper rather than pulling in a crate
//! for it, matching the rest of this crate's own `Ord`-wrapper heap items.

use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A total order over `f64`, used only for values that are guaranteed to
/// never be `NaN` (distances out of a correctly-implemented `Metric`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct OrderedDist(pub f64);

impl Eq for OrderedDist {}

impl PartialOrd for OrderedDist {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedDist {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(Ordering::Equal)
    }
}

/// One candidate in a bounded k-NN result: a point id at a distance from
/// the query. Ordered by distance so a max-heap evicts the farthest
/// candidate first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub dist: f64,
    pub id: usize,
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        OrderedDist(self.dist).cmp(&OrderedDist(other.dist))
    }
}

/// A max-heap of at most `k` candidates, the bounded-result structure
/// every exact k-NN search (VectorArray, KdTree, VpTree, BallTree,
/// CoverTree, Rbc) maintains while scanning.
#[derive(Debug, Clone)]
pub struct KnnHeap {
    k: usize,
    heap: BinaryHeap<Candidate>,
}

impl KnnHeap {
    pub fn new(k: usize) -> Self {
        KnnHeap {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.k
    }

    /// The current k-th best distance, or `f64::INFINITY` while the heap
    /// has not yet accumulated `k` candidates (any point is worth
    /// considering until then).
    pub fn worst(&self) -> f64 {
        if self.is_full() {
            self.heap.peek().map(|c| c.dist).unwrap_or(f64::INFINITY)
        } else {
            f64::INFINITY
        }
    }

    /// Offers a candidate; keeps the heap at size at most `k`, discarding
    /// the current worst entry if it is now full.
    pub fn push(&mut self, id: usize, dist: f64) {
        if self.k == 0 {
            return;
        }
        if self.heap.len() < self.k {
            self.heap.push(Candidate { dist, id });
        } else if dist < self.worst() {
            self.heap.pop();
            self.heap.push(Candidate { dist, id });
        }
    }

    /// Drains the heap into an ascending-distance vector.
    pub fn into_sorted_vec(self) -> Vec<(usize, f64)> {
        let mut v: Vec<Candidate> = self.heap.into_vec();
        v.sort_by(|a, b| OrderedDist(a.dist).cmp(&OrderedDist(b.dist)));
        v.into_iter().map(|c| (c.id, c.dist)).collect()
    }
}

/// Builds a deterministic-when-seeded RNG, xoring a node-local salt into
/// the caller's seed the way a cover tree derives an independent stream
/// per split without needing a shared mutable generator.
pub(crate) fn seeded_rng(seed: Option<u64>, salt: u64) -> SmallRng {
    match seed {
        Some(s) => SmallRng::seed_from_u64(s ^ salt),
        None => SmallRng::from_entropy(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn knn_heap_keeps_k_smallest() {
        let mut heap = KnnHeap::new(3);
        for (id, d) in [(0, 5.0), (1, 1.0), (2, 3.0), (3, 2.0), (4, 9.0)] {
            heap.push(id, d);
        }
        let result = heap.into_sorted_vec();
        assert_eq!(result.len(), 3);
        let dists: Vec<f64> = result.iter().map(|(_, d)| *d).collect();
        assert_eq!(dists, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn knn_heap_k_larger_than_input() {
        let mut heap = KnnHeap::new(10);
        heap.push(0, 1.0);
        heap.push(1, 2.0);
        assert_eq!(heap.into_sorted_vec().len(), 2);
    }
}
