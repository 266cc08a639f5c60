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

#[macro_use]
extern crate assert_approx_eq;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use vantage::ball_tree::{BallTree, BallTreeConfig, BallTreeNode};
use vantage::cover_tree::{CoverTree, CoverTreeConfig, CoverTreeNode};
use vantage::dual_tree_knn;
use vantage::kd_tree::{KdTree, KdTreeConfig, KdTreeNode};
use vantage::metric::EuclideanMetric;
use vantage::rbc::{Rbc, RbcConfig, RbcNode};
use vantage::vector_array::VectorArray;
use vantage::vp_tree::{VpTree, VpTreeConfig, VpTreeNode};

fn grid() -> Vec<Vec<f64>> {
    let mut pts = Vec::with_capacity(25);
    for x in 0..5 {
        for y in 0..5 {
            pts.push(vec![x as f64, y as f64]);
        }
    }
    pts
}

/// S1. Grid k-NN (Euclidean): query (2.1, 2.0), k = 4 must return, in
/// ascending-distance order, (2,2), (3,2), (2,1), (1,2) at distances
/// 0.1, 0.9, sqrt(1.01), 1.1.
#[test]
fn s1_grid_knn() {
    let metric = EuclideanMetric::new();
    let tree = BallTree::new(grid(), metric, BallTreeConfig::default()).unwrap();
    let result = tree.search_knn(&[2.1, 2.0], 4).unwrap();

    let expected_order = [(2.0, 2.0), (3.0, 2.0), (2.0, 1.0), (1.0, 2.0)];
    assert_eq!(result.len(), 4);
    let points = grid();
    for ((id, _), expected) in result.iter().zip(expected_order.iter()) {
        assert_eq!((points[*id][0], points[*id][1]), *expected);
    }

    let dists: Vec<f64> = result.iter().map(|(_, d)| *d).collect();
    let expected_dists = [0.1, 0.9, 1.01_f64.sqrt(), 1.1];
    for (d, e) in dists.iter().zip(expected_dists.iter()) {
        assert_approx_eq!(d, e, 1e-9);
    }
}

/// S2. Radius search far outside the grid returns nothing.
#[test]
fn s2_radius_search_empty() {
    let metric = EuclideanMetric::new();
    let tree = BallTree::new(grid(), metric, BallTreeConfig::default()).unwrap();
    let result = tree.search_radius(&[10.0, 10.0], 0.5).unwrap();
    assert!(result.is_empty());
}

/// S3. Ten duplicated points: k = 3 returns 3 distinct ids, all at the
/// query's exact distance from the shared vector.
#[test]
fn s3_duplicated_points() {
    let metric = EuclideanMetric::new();
    let pts: Vec<Vec<f64>> = (0..10).map(|_| vec![1.0, 1.0, 1.0, 1.0]).collect();
    let tree = BallTree::new(pts, metric, BallTreeConfig::default()).unwrap();
    let q = vec![2.0, 1.0, 1.0, 1.0];
    let result = tree.search_knn(&q, 3).unwrap();
    assert_eq!(result.len(), 3);
    let mut ids: Vec<usize> = result.iter().map(|(id, _)| *id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 3);
    for (_, d) in &result {
        assert_approx_eq!(d, 1.0_f64, 1e-9);
    }
}

/// S4. Cover Tree level invariant: after inserting a line of points,
/// every parent-child pair satisfies dist(p, c) <= base^level(p).
#[test]
fn s4_cover_tree_level_invariant() {
    let metric = EuclideanMetric::new();
    let pts = vec![
        vec![0.0, 0.0],
        vec![1.0, 0.0],
        vec![3.0, 0.0],
        vec![7.0, 0.0],
        vec![15.0, 0.0],
    ];
    let tree = CoverTree::new(pts, metric, CoverTreeConfig::default()).unwrap();
    assert!(tree.check_covering_invariant());
}

/// S5. Ball Tree anchor degeneracy: all points coincide, top-down
/// farthest construction with leaf_size = 3 collapses to one
/// zero-radius leaf owning every id.
#[test]
fn s5_ball_tree_anchor_degeneracy() {
    let metric = EuclideanMetric::new();
    let pts: Vec<Vec<f64>> = (0..7).map(|_| vec![5.0, 5.0]).collect();
    let n = pts.len();
    let config = BallTreeConfig::default()
        .construction_method(vantage::ball_tree::ConstructionMethod::TopDownFarthest)
        .leaf_size(3)
        .unwrap();
    let tree = BallTree::new(pts, metric, config).unwrap();
    assert_eq!(tree.len(), n);
    let result = tree.search_radius(&[5.0, 5.0], 0.0).unwrap();
    assert_eq!(result.len(), n);
    for (_, d) in &result {
        assert_approx_eq!(d, 0.0_f64, 1e-12);
    }
}

/// S6. Dual-tree correctness: 100 random reference vectors and 50 random
/// query vectors in R^5, k = 3. Dual-tree k-NN must equal 50 independent
/// single-tree k-NN calls, row by row.
#[test]
fn s6_dual_tree_matches_single_tree_at_scale() {
    let mut rng = SmallRng::seed_from_u64(2026);
    let r_vecs: Vec<Vec<f64>> = (0..100)
        .map(|_| (0..5).map(|_| rng.gen_range(-10.0, 10.0)).collect())
        .collect();
    let q_vecs: Vec<Vec<f64>> = (0..50)
        .map(|_| (0..5).map(|_| rng.gen_range(-10.0, 10.0)).collect())
        .collect();

    let metric = EuclideanMetric::new();
    let r_tree = BallTree::new(r_vecs.clone(), metric, BallTreeConfig::default()).unwrap();
    let q_tree = BallTree::new(q_vecs.clone(), metric, BallTreeConfig::default()).unwrap();

    let r_root = BallTreeNode::root(&r_tree).unwrap();
    let q_root = BallTreeNode::root(&q_tree).unwrap();
    let dual = dual_tree_knn(
        &metric,
        r_root,
        q_root,
        r_tree.points(),
        q_tree.points(),
        3,
    );

    let oracle = VectorArray::new(r_vecs, metric).unwrap();
    for (qid, qv) in q_vecs.iter().enumerate() {
        let single = oracle.search_knn(qv, 3);
        let mut dual_result = dual.get(&qid).cloned().unwrap_or_default();
        dual_result.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        assert_eq!(single.len(), dual_result.len());
        for ((_, d1), (_, d2)) in single.iter().zip(dual_result.iter()) {
            assert_approx_eq!(d1, d2, 1e-9);
        }
    }
}

/// S7. Same dual-tree-vs-single-tree check as S6, but over the KD-Tree and
/// VP-Tree adapters, which don't own points on their branch nodes the way
/// Ball Tree does.
#[test]
fn s7_kd_and_vp_dual_tree_match_single_tree() {
    let _ = env_logger::try_init();
    let mut rng = SmallRng::seed_from_u64(77);
    let r_vecs: Vec<Vec<f64>> = (0..80)
        .map(|_| (0..4).map(|_| rng.gen_range(-10.0, 10.0)).collect())
        .collect();
    let q_vecs: Vec<Vec<f64>> = (0..30)
        .map(|_| (0..4).map(|_| rng.gen_range(-10.0, 10.0)).collect())
        .collect();
    let metric = EuclideanMetric::new();
    let oracle = VectorArray::new(r_vecs.clone(), metric).unwrap();

    let r_tree = KdTree::new(r_vecs.clone(), metric, KdTreeConfig::default()).unwrap();
    let q_tree = KdTree::new(q_vecs.clone(), metric, KdTreeConfig::default()).unwrap();
    let r_root = KdTreeNode::root(&r_tree).unwrap();
    let q_root = KdTreeNode::root(&q_tree).unwrap();
    let dual = dual_tree_knn(&metric, r_root, q_root, &r_vecs, &q_vecs, 3);
    for (qid, qv) in q_vecs.iter().enumerate() {
        let single = oracle.search_knn(qv, 3);
        let mut dual_result = dual.get(&qid).cloned().unwrap_or_default();
        dual_result.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        assert_eq!(single.len(), dual_result.len());
        for ((_, d1), (_, d2)) in single.iter().zip(dual_result.iter()) {
            assert_approx_eq!(d1, d2, 1e-9);
        }
    }

    let r_tree = VpTree::new(r_vecs.clone(), metric, VpTreeConfig::default()).unwrap();
    let q_tree = VpTree::new(q_vecs.clone(), metric, VpTreeConfig::default()).unwrap();
    let r_root = VpTreeNode::root(&r_tree).unwrap();
    let q_root = VpTreeNode::root(&q_tree).unwrap();
    let dual = dual_tree_knn(&metric, r_root, q_root, &r_vecs, &q_vecs, 3);
    for (qid, qv) in q_vecs.iter().enumerate() {
        let single = oracle.search_knn(qv, 3);
        let mut dual_result = dual.get(&qid).cloned().unwrap_or_default();
        dual_result.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        assert_eq!(single.len(), dual_result.len());
        for ((_, d1), (_, d2)) in single.iter().zip(dual_result.iter()) {
            assert_approx_eq!(d1, d2, 1e-9);
        }
    }
}

/// S8. Cover Tree with a non-default `base`: regression coverage for the
/// node radius actually tracking `config.base` instead of a hardcoded
/// constant, and for each node's own point taking part in dual-tree child
/// pairing via its virtual leaf.
#[test]
fn s8_cover_tree_dual_tree_nondefault_base() {
    let _ = env_logger::try_init();
    let mut rng = SmallRng::seed_from_u64(88);
    let r_vecs: Vec<Vec<f64>> = (0..60)
        .map(|_| (0..3).map(|_| rng.gen_range(-10.0, 10.0)).collect())
        .collect();
    let q_vecs: Vec<Vec<f64>> = (0..20)
        .map(|_| (0..3).map(|_| rng.gen_range(-10.0, 10.0)).collect())
        .collect();
    let metric = EuclideanMetric::new();
    let config = CoverTreeConfig::default().base(2.0).unwrap();

    let r_tree = CoverTree::new(r_vecs.clone(), metric, config.clone()).unwrap();
    let q_tree = CoverTree::new(q_vecs.clone(), metric, config).unwrap();
    let r_root = CoverTreeNode::root(&r_tree).unwrap();
    let q_root = CoverTreeNode::root(&q_tree).unwrap();
    let dual = dual_tree_knn(&metric, r_root, q_root, &r_vecs, &q_vecs, 3);

    let oracle = VectorArray::new(r_vecs, metric).unwrap();
    for (qid, qv) in q_vecs.iter().enumerate() {
        let single = oracle.search_knn(qv, 3);
        let mut dual_result = dual.get(&qid).cloned().unwrap_or_default();
        dual_result.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        assert_eq!(single.len(), dual_result.len());
        for ((_, d1), (_, d2)) in single.iter().zip(dual_result.iter()) {
            assert_approx_eq!(d1, d2, 1e-9);
        }
    }
}

/// S9. The exact Random Ball Cover's flat representative structure through
/// the dual-tree adapter.
#[test]
fn s9_rbc_dual_tree_matches_single_tree() {
    let _ = env_logger::try_init();
    let mut rng = SmallRng::seed_from_u64(99);
    let r_vecs: Vec<Vec<f64>> = (0..90)
        .map(|_| (0..4).map(|_| rng.gen_range(-10.0, 10.0)).collect())
        .collect();
    let q_vecs: Vec<Vec<f64>> = (0..25)
        .map(|_| (0..4).map(|_| rng.gen_range(-10.0, 10.0)).collect())
        .collect();
    let metric = EuclideanMetric::new();

    let r_rbc = Rbc::new(r_vecs.clone(), metric, RbcConfig::default().seed(99)).unwrap();
    let q_rbc = Rbc::new(q_vecs.clone(), metric, RbcConfig::default().seed(99)).unwrap();
    let r_root = RbcNode::root(&r_rbc).unwrap();
    let q_root = RbcNode::root(&q_rbc).unwrap();
    let dual = dual_tree_knn(&metric, r_root, q_root, &r_vecs, &q_vecs, 3);

    let oracle = VectorArray::new(r_vecs, metric).unwrap();
    for (qid, qv) in q_vecs.iter().enumerate() {
        let single = oracle.search_knn(qv, 3);
        let mut dual_result = dual.get(&qid).cloned().unwrap_or_default();
        dual_result.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        assert_eq!(single.len(), dual_result.len());
        for ((_, d1), (_, d2)) in single.iter().zip(dual_result.iter()) {
            assert_approx_eq!(d1, d2, 1e-9);
        }
    }
}
