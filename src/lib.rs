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

#![allow(dead_code)]

//! # Vantage
//! A library of spatial indices for accelerated nearest-neighbor and
//! radius search over generic metric spaces. Every index is built
//! against a [`Metric`](metric::Metric) trait object rather than a
//! fixed distance function, and against a plain [`VectorStore`]
//! (point_cloud) rather than any particular vector type, so new
//! distances and new point representations slot in without touching
//! the index code.
//!
//! ## Parameter Guide
//! Each family ships its own `*Config` builder with sane defaults; the
//! knobs that matter most in practice are:
//!
//! - [`kd_tree::KdTreeConfig::leaf_node_size`] and
//!   [`vp_tree::VpTreeConfig::max_leaf_size`] control the point-count at
//!   which a branch becomes a leaf. Smaller leaves mean faster descents
//!   but more branch overhead; the VP-Tree floor of 5 keeps incremental
//!   inserts from thrashing leaves that are nearly empty.
//! - [`ball_tree::BallTreeConfig::construction_method`] trades build
//!   cost for tree balance: `TopDownFarthest` is cheap and usually good
//!   enough, `KdStyle` gives the most balanced tree on grid-like data,
//!   `AnchorsHierarchy` amortizes better over very large point sets.
//! - [`cover_tree::CoverTreeConfig::base`] controls the branching factor
//!   implicitly: values close to 1.0 produce deep, thin trees; values
//!   approaching 2.0 produce wide, shallow ones. 1.3 is a reasonable
//!   default for most metric data.
//! - [`dci::DciConfig::m`] and [`dci::DciConfig::l`] trade index size and
//!   query cost for recall: more simple indices per composite (`m`)
//!   tighten the candidate set; more composites (`l`) reduce the chance
//!   that an unlucky set of random directions misses a true neighbor.
//!
//! See each module's own documentation for the construction and query
//! algorithms, their invariants, and their edge-case behavior.

#[cfg(test)]
#[macro_use]
extern crate assert_approx_eq;

pub mod error;
pub mod metric;
pub mod point_cloud;
pub mod utils;

pub mod vector_array;
pub use vector_array::VectorArray;

pub mod dual_tree;
pub use dual_tree::{dual_tree_knn, dual_tree_range, DualTreeNode};

pub mod kd_tree;
pub use kd_tree::KdTree;

pub mod vp_tree;
pub use vp_tree::VpTree;

pub mod ball_tree;
pub use ball_tree::BallTree;

pub mod cover_tree;
pub use cover_tree::CoverTree;

pub mod rbc;
pub use rbc::{Rbc, RbcOneShot};

pub mod dci;
pub use dci::Dci;

pub use error::{VantageError, VantageResult};
pub use metric::{EuclideanMetric, ManhattanMetric, Metric};
pub use point_cloud::VectorStore;
