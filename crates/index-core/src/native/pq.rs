//! Product quantization.
//!
//! Splits each vector into `m` subvectors and learns `2^nbits` centroids per
//! subspace. A vector is stored as `m` one-byte codes; query distances use
//! asymmetric distance computation (ADC) against a per-query lookup table.
//!
//! References:
//! - "Product Quantization for Nearest Neighbor Search" (Jégou et al.)

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::descriptor::{MetricType, TrainParams};
use crate::distance::{inner_product, squared_l2_distance};
use crate::error::{NativeError, NativeResult};

use super::inconsistent;
use super::kmeans::{nearest, KMeans};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductQuantizer {
    dim: usize,
    m: usize,
    nbits: usize,
    /// Shape: [m][ksub][dsub]
    codebooks: Vec<Vec<Vec<f32>>>,
}

impl ProductQuantizer {
    pub fn new(dim: usize, m: usize, nbits: usize) -> NativeResult<Self> {
        if m == 0 || dim % m != 0 {
            return Err(NativeError::IndexError(format!(
                "dim ({dim}) must be divisible by number of subvectors ({m})"
            )));
        }
        if nbits == 0 || nbits > 8 {
            return Err(NativeError::IndexError(format!("nbits must be in 1..=8, got {nbits}")));
        }
        Ok(Self {
            dim,
            m,
            nbits,
            codebooks: Vec::new(),
        })
    }

    /// Centroids per subspace.
    pub fn ksub(&self) -> usize {
        1 << self.nbits
    }

    /// Width of each subvector.
    pub fn dsub(&self) -> usize {
        self.dim / self.m
    }

    /// Bytes per encoded vector.
    pub fn code_size(&self) -> usize {
        self.m
    }

    pub fn is_trained(&self) -> bool {
        !self.codebooks.is_empty()
    }

    /// Learn the codebooks, returning a trained copy.
    pub fn fit(&self, points: &[&[f32]], params: TrainParams) -> NativeResult<Self> {
        let dsub = self.dsub();
        let ksub = self.ksub();

        let codebooks = (0..self.m)
            .into_par_iter()
            .map(|sub| {
                let start = sub * dsub;
                let slices: Vec<&[f32]> = points.iter().map(|p| &p[start..start + dsub]).collect();
                let seed = params.seed.wrapping_add(sub as u64);
                KMeans::new(ksub, params.iterations, seed).train(&slices, dsub)
            })
            .collect::<NativeResult<Vec<_>>>()?;

        Ok(Self {
            codebooks,
            ..self.clone()
        })
    }

    /// Encode one vector into `m` codes.
    pub fn encode(&self, vector: &[f32]) -> Vec<u8> {
        let dsub = self.dsub();
        self.codebooks
            .iter()
            .enumerate()
            .map(|(sub, codebook)| {
                let start = sub * dsub;
                nearest(codebook, &vector[start..start + dsub]) as u8
            })
            .collect()
    }

    /// Reconstruct a vector from its codes.
    pub fn decode(&self, codes: &[u8]) -> Vec<f32> {
        codes
            .iter()
            .zip(&self.codebooks)
            .flat_map(|(&code, codebook)| codebook[code as usize].iter().copied())
            .collect()
    }

    /// Per-query lookup table, flattened as `[m * ksub]`.
    ///
    /// For L2 each entry is a squared subspace distance; for inner product it
    /// is the negated subspace dot product. Summing the entries selected by a
    /// code yields the ADC distance.
    pub fn distance_table(&self, query: &[f32], metric: MetricType) -> Vec<f32> {
        let dsub = self.dsub();
        let mut table = Vec::with_capacity(self.m * self.ksub());
        for (sub, codebook) in self.codebooks.iter().enumerate() {
            let q = &query[sub * dsub..(sub + 1) * dsub];
            table.extend(codebook.iter().map(|c| match metric {
                MetricType::L2 => squared_l2_distance(q, c),
                MetricType::InnerProduct => -inner_product(q, c),
            }));
        }
        table
    }

    /// ADC distance of one encoded vector.
    #[inline]
    pub fn table_distance(&self, table: &[f32], codes: &[u8]) -> f32 {
        let ksub = self.ksub();
        codes
            .iter()
            .enumerate()
            .map(|(sub, &code)| table[sub * ksub + code as usize])
            .sum()
    }

    /// Check a deserialized quantizer for an index of width `dim`.
    ///
    /// Shape is checked before `dsub`/`ksub` are derived from it.
    pub fn validate(&self, dim: usize) -> NativeResult<()> {
        if self.dim != dim || self.m == 0 || dim % self.m != 0 || self.nbits == 0 || self.nbits > 8 {
            return Err(inconsistent(format!(
                "product quantizer shape (dim {}, m {}, nbits {}) does not fit width {dim}",
                self.dim, self.m, self.nbits
            )));
        }
        if !self.is_trained() {
            return Ok(());
        }
        let (ksub, dsub) = (self.ksub(), self.dsub());
        let well_formed = self.codebooks.len() == self.m
            && self
                .codebooks
                .iter()
                .all(|book| book.len() == ksub && book.iter().all(|c| c.len() == dsub));
        if !well_formed {
            return Err(inconsistent(format!("expected {} codebooks of {ksub} x {dsub}", self.m)));
        }
        Ok(())
    }

    /// Check that every code byte names a codebook entry.
    pub fn validate_codes(&self, codes: &[u8]) -> NativeResult<()> {
        let ksub = self.ksub();
        match codes.iter().find(|&&c| c as usize >= ksub) {
            Some(c) => Err(inconsistent(format!("code {c} out of range for {ksub} centroids"))),
            None => Ok(()),
        }
    }

    /// Memory reduction relative to raw f32 storage.
    pub fn compression_ratio(&self) -> f32 {
        (self.dim * 4) as f32 / self.code_size() as f32
    }
}
