//! Coarse quantizers that route vectors to inverted lists.

use serde::{Deserialize, Serialize};

use crate::descriptor::{MetricType, TrainParams};
use crate::distance::{binarize, distance_fn, hamming_distance, unpack_bits};
use crate::error::NativeResult;

use super::kmeans::KMeans;
use super::{inconsistent, LiveToken};

/// Index of the centroid nearest to `vector` under `metric`.
pub fn nearest_centroid(centroids: &[Vec<f32>], metric: MetricType, vector: &[f32]) -> usize {
    let dist = distance_fn(metric);
    centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, dist(vector, c)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Float centroids searched exhaustively.
#[derive(Debug, Serialize, Deserialize)]
pub struct FlatQuantizer {
    dim: usize,
    metric: MetricType,
    centroids: Vec<Vec<f32>>,
    #[serde(skip)]
    _live: LiveToken,
}

impl FlatQuantizer {
    pub fn new(dim: usize, metric: MetricType) -> Self {
        Self {
            dim,
            metric,
            centroids: Vec::new(),
            _live: LiveToken::default(),
        }
    }

    pub fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    pub fn nlist(&self) -> usize {
        self.centroids.len()
    }

    pub fn centroid(&self, list: usize) -> &[f32] {
        &self.centroids[list]
    }

    /// Compute `nlist` centroids. Returns them without installing them.
    pub fn fit(&self, points: &[&[f32]], nlist: usize, params: TrainParams) -> NativeResult<Vec<Vec<f32>>> {
        KMeans::new(nlist, params.iterations, params.seed).train(points, self.dim)
    }

    pub fn install(&mut self, centroids: Vec<Vec<f32>>) {
        self.centroids = centroids;
    }

    /// Check a deserialized quantizer against its owning index.
    pub fn validate(&self, dim: usize, nlist: usize) -> NativeResult<()> {
        if self.dim != dim {
            return Err(inconsistent(format!("quantizer width {} differs from index width {dim}", self.dim)));
        }
        if self.is_trained() && (self.centroids.len() != nlist || self.centroids.iter().any(|c| c.len() != dim)) {
            return Err(inconsistent(format!("expected {nlist} centroids of width {dim}")));
        }
        Ok(())
    }

    /// List nearest to `vector` under the quantizer metric.
    pub fn assign(&self, vector: &[f32]) -> usize {
        nearest_centroid(&self.centroids, self.metric, vector)
    }

    /// The `nprobe` nearest lists with their centroid distances, nearest first.
    pub fn probe(&self, vector: &[f32], nprobe: usize) -> Vec<(usize, f32)> {
        let dist = distance_fn(self.metric);
        let mut lists: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, dist(vector, c)))
            .collect();
        lists.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        lists.truncate(nprobe);
        lists
    }
}

/// Binary centroids compared by Hamming distance.
#[derive(Debug, Serialize, Deserialize)]
pub struct BinaryQuantizer {
    bits: usize,
    centroids: Vec<Vec<u8>>,
    #[serde(skip)]
    _live: LiveToken,
}

impl BinaryQuantizer {
    pub fn new(bits: usize) -> Self {
        Self {
            bits,
            centroids: Vec::new(),
            _live: LiveToken::default(),
        }
    }

    pub fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    pub fn nlist(&self) -> usize {
        self.centroids.len()
    }

    /// Cluster the unpacked bits in float space, then threshold each
    /// centroid component at one half.
    pub fn fit(&self, codes: &[Vec<u8>], nlist: usize, params: TrainParams) -> NativeResult<Vec<Vec<u8>>> {
        let unpacked: Vec<Vec<f32>> = codes.iter().map(|c| unpack_bits(c, self.bits)).collect();
        let points: Vec<&[f32]> = unpacked.iter().map(|v| v.as_slice()).collect();

        let centroids = KMeans::new(nlist, params.iterations, params.seed).train(&points, self.bits)?;
        Ok(centroids
            .iter()
            .map(|c| {
                let shifted: Vec<f32> = c.iter().map(|x| x - 0.5).collect();
                binarize(&shifted)
            })
            .collect())
    }

    pub fn install(&mut self, centroids: Vec<Vec<u8>>) {
        self.centroids = centroids;
    }

    pub fn validate(&self, bits: usize, nlist: usize) -> NativeResult<()> {
        if self.bits != bits {
            return Err(inconsistent(format!("quantizer width {} differs from index width {bits}", self.bits)));
        }
        let code_size = bits / 8;
        if self.is_trained() && (self.centroids.len() != nlist || self.centroids.iter().any(|c| c.len() != code_size)) {
            return Err(inconsistent(format!("expected {nlist} binary centroids of {code_size} bytes")));
        }
        Ok(())
    }

    pub fn assign(&self, code: &[u8]) -> usize {
        self.probe(code, 1).first().map(|&(list, _)| list).unwrap_or(0)
    }

    pub fn probe(&self, code: &[u8], nprobe: usize) -> Vec<(usize, u32)> {
        let mut lists: Vec<(usize, u32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, hamming_distance(code, c)))
            .collect();
        lists.sort_by_key(|&(i, d)| (d, i));
        lists.truncate(nprobe);
        lists
    }
}
