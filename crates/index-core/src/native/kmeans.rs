//! Lloyd's k-means under squared L2.
//!
//! Initial centroids are drawn from the distinct training points first, so a
//! set with at most `k` distinct points converges to exactly those points.
//! Empty clusters keep their previous centroid.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::distance::squared_l2_distance;
use crate::error::{NativeError, NativeResult};

/// K-means clustering settings.
#[derive(Debug, Clone, Copy)]
pub struct KMeans {
    pub k: usize,
    pub iterations: usize,
    pub seed: u64,
}

impl KMeans {
    pub fn new(k: usize, iterations: usize, seed: u64) -> Self {
        Self { k, iterations, seed }
    }

    /// Cluster `points` (all of width `dim`) into `k` centroids.
    pub fn train(&self, points: &[&[f32]], dim: usize) -> NativeResult<Vec<Vec<f32>>> {
        if self.k == 0 {
            return Err(NativeError::IndexError("number of clusters must be positive".to_string()));
        }
        if points.len() < self.k {
            return Err(NativeError::InsufficientTrainingData {
                need: self.k,
                got: points.len(),
            });
        }

        let mut centroids = self.initial_centroids(points);

        for _ in 0..self.iterations {
            let assignments: Vec<usize> = points.par_iter().map(|p| nearest(&centroids, p)).collect();

            let mut sums = vec![vec![0.0f32; dim]; self.k];
            let mut counts = vec![0usize; self.k];

            for (point, &cluster) in points.iter().zip(&assignments) {
                counts[cluster] += 1;
                for (s, &v) in sums[cluster].iter_mut().zip(point.iter()) {
                    *s += v;
                }
            }

            let mut moved = false;
            for (i, sum) in sums.into_iter().enumerate() {
                if counts[i] == 0 {
                    continue;
                }
                let mean: Vec<f32> = sum.into_iter().map(|s| s / counts[i] as f32).collect();
                if mean != centroids[i] {
                    moved = true;
                    centroids[i] = mean;
                }
            }

            if !moved {
                break;
            }
        }

        Ok(centroids)
    }

    fn initial_centroids(&self, points: &[&[f32]]) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(self.seed);

        let mut seen = HashSet::new();
        let mut distinct: Vec<usize> = Vec::new();
        let mut duplicates: Vec<usize> = Vec::new();
        for (i, p) in points.iter().enumerate() {
            let key: Vec<u32> = p.iter().map(|x| x.to_bits()).collect();
            if seen.insert(key) {
                distinct.push(i);
            } else {
                duplicates.push(i);
            }
        }

        distinct.shuffle(&mut rng);
        duplicates.shuffle(&mut rng);

        distinct
            .into_iter()
            .chain(duplicates)
            .take(self.k)
            .map(|i| points[i].to_vec())
            .collect()
    }
}

/// Index of the centroid nearest to `point`.
pub fn nearest(centroids: &[Vec<f32>], point: &[f32]) -> usize {
    centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, squared_l2_distance(point, c)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
        .unwrap_or(0)
}
