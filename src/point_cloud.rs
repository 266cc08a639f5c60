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

//! The dense in-memory vector store every index family builds over. Loaders,
//! labels, and named-column metadata are a downstream concern and are not
//! implemented here; this is the minimal `reference_indexes`/`point`/`dim`
//! surface the trees need.

use crate::error::{VantageError, VantageResult};

/// A fixed set of dense `f64` vectors, addressed by a stable `usize` id.
/// Vectors are immutable once stored; a collection that needs to grow its
/// point set (incremental insert) appends to its own copy via
/// [`VectorStore::push`].
#[derive(Debug, Clone)]
pub struct VectorStore {
    dim: usize,
    vectors: Vec<Vec<f64>>,
}

impl VectorStore {
    /// Builds a store from a non-empty list of equal-length vectors.
    pub fn new(vectors: Vec<Vec<f64>>) -> VantageResult<Self> {
        let dim = match vectors.first() {
            Some(v) => v.len(),
            None => 0,
        };
        if vectors.iter().any(|v| v.len() != dim) {
            return Err(VantageError::InvalidArgument(
                "all vectors must share the same dimension".to_string(),
            ));
        }
        Ok(VectorStore { dim, vectors })
    }

    /// An empty store of the given dimension, ready for incremental insert.
    pub fn empty(dim: usize) -> Self {
        VectorStore {
            dim,
            vectors: Vec::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn point(&self, i: usize) -> &[f64] {
        &self.vectors[i]
    }

    pub fn as_slice(&self) -> &[Vec<f64>] {
        &self.vectors
    }

    pub fn reference_indexes(&self) -> std::ops::Range<usize> {
        0..self.vectors.len()
    }

    /// Appends `v` and returns its freshly assigned id.
    pub fn push(&mut self, v: Vec<f64>) -> VantageResult<usize> {
        if !self.vectors.is_empty() && v.len() != self.dim {
            return Err(VantageError::InvalidArgument(format!(
                "expected dimension {}, got {}",
                self.dim,
                v.len()
            )));
        }
        if self.vectors.is_empty() {
            self.dim = v.len();
        }
        self.vectors.push(v);
        Ok(self.vectors.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_ragged_input() {
        let res = VectorStore::new(vec![vec![0.0, 0.0], vec![1.0]]);
        assert!(res.is_err());
    }

    #[test]
    fn push_assigns_sequential_ids() {
        let mut store = VectorStore::empty(2);
        assert_eq!(store.push(vec![0.0, 0.0]).unwrap(), 0);
        assert_eq!(store.push(vec![1.0, 1.0]).unwrap(), 1);
        assert_eq!(store.len(), 2);
    }
}
