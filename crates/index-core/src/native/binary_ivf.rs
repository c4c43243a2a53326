//! Binary IVF: inverted file over packed bit codes.
//!
//! Mirrors FAISS `IndexBinaryIVF`: `dimension` counts bits, codes take
//! `dimension / 8` bytes and distances are integer Hamming counts. Input
//! vectors arrive as floats, one component per bit, and are packed with
//! `x > 0` as the set bit.
//!
//! Duplicate ids are stored as separate entries.

use std::collections::HashSet;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::descriptor::{IndexDescriptor, TrainParams, MIN_POINTS_PER_CENTROID};
use crate::distance::{binarize, hamming_distance, unpack_bits};
use crate::error::{NativeError, NativeResult};
use crate::{Neighbor, VectorBatch, VectorId};

use super::quantizer::BinaryQuantizer;
use super::{check_add, check_code_len, check_width, empty_lists, inconsistent, top_k, LiveToken, NativeIndex};

/// Default number of lists probed per query.
pub const DEFAULT_NPROBE: usize = 1;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct BinaryList {
    ids: Vec<VectorId>,
    codes: Vec<u8>,
}

/// Inverted file over binary codes.
#[derive(Debug, Serialize, Deserialize)]
pub struct BinaryIvfIndex {
    bits: usize,
    nlist: usize,
    train_params: TrainParams,
    quantizer: BinaryQuantizer,
    /// One list per centroid, created by `train`.
    lists: Vec<BinaryList>,
    ntotal: usize,
    #[serde(skip)]
    _live: LiveToken,
}

impl BinaryIvfIndex {
    pub fn new(descriptor: &IndexDescriptor) -> NativeResult<Self> {
        if descriptor.dimension == 0 || descriptor.dimension % 8 != 0 {
            return Err(NativeError::IndexError(format!(
                "binary dimension ({}) must be a positive multiple of 8",
                descriptor.dimension
            )));
        }
        Ok(Self {
            bits: descriptor.dimension,
            nlist: descriptor.partitions,
            train_params: descriptor.train,
            quantizer: BinaryQuantizer::new(descriptor.dimension),
            lists: Vec::new(),
            ntotal: 0,
            _live: LiveToken::default(),
        })
    }

    /// Bytes per code.
    pub fn code_size(&self) -> usize {
        self.bits / 8
    }

    pub fn nlist(&self) -> usize {
        self.nlist
    }

    pub fn train(&mut self, vectors: VectorBatch<'_>) -> NativeResult<()> {
        check_width(self.bits, &vectors)?;
        if self.ntotal > 0 {
            return Err(NativeError::IndexError(
                "cannot retrain an index that already holds vectors".to_string(),
            ));
        }
        let wanted = self.nlist.saturating_mul(MIN_POINTS_PER_CENTROID);
        if vectors.len() < wanted {
            tracing::warn!(
                "clustering {} points to {} centroids: please provide at least {} training points",
                vectors.len(),
                self.nlist,
                wanted
            );
        }

        let codes: Vec<Vec<u8>> = vectors.rows().map(binarize).collect();
        let centroids = self.quantizer.fit(&codes, self.nlist, self.train_params)?;
        self.lists = empty_lists(centroids.len())?;
        self.quantizer.install(centroids);
        Ok(())
    }

    fn search_one(&self, query: &[u8], k: usize, nprobe: usize) -> Vec<Neighbor<u32>> {
        let code_size = self.code_size();
        let mut hits = Vec::new();
        for (list, _) in self.quantizer.probe(query, nprobe) {
            let entries = &self.lists[list];
            for (id, code) in entries.ids.iter().zip(entries.codes.chunks_exact(code_size)) {
                hits.push(Neighbor::new(*id, hamming_distance(query, code)));
            }
        }
        top_k(hits, k)
    }
}

impl NativeIndex for BinaryIvfIndex {
    type Distance = u32;

    fn dimension(&self) -> usize {
        self.bits
    }

    fn ntotal(&self) -> usize {
        self.ntotal
    }

    fn is_trained(&self) -> bool {
        self.quantizer.is_trained()
    }

    fn add_with_ids(&mut self, vectors: VectorBatch<'_>, ids: &[VectorId]) -> NativeResult<usize> {
        check_add(self.bits, &vectors, ids)?;
        if !self.is_trained() {
            return Err(NativeError::NotTrained);
        }

        let encoded: Vec<(usize, Vec<u8>)> = vectors
            .rows()
            .collect::<Vec<_>>()
            .par_iter()
            .map(|v| {
                let code = binarize(v);
                (self.quantizer.assign(&code), code)
            })
            .collect();

        for ((list, code), &id) in encoded.into_iter().zip(ids) {
            self.lists[list].ids.push(id);
            self.lists[list].codes.extend_from_slice(&code);
        }
        self.ntotal += ids.len();
        Ok(self.ntotal)
    }

    fn remove_ids(&mut self, ids: &[VectorId]) -> NativeResult<usize> {
        let targets: HashSet<VectorId> = ids.iter().copied().collect();
        let code_size = self.code_size();
        let mut removed = 0;

        for list in &mut self.lists {
            let before = list.ids.len();
            let mut kept = BinaryList::default();
            for (id, code) in list.ids.iter().zip(list.codes.chunks_exact(code_size)) {
                if !targets.contains(id) {
                    kept.ids.push(*id);
                    kept.codes.extend_from_slice(code);
                }
            }
            removed += before - kept.ids.len();
            *list = kept;
        }

        self.ntotal -= removed;
        Ok(removed)
    }

    fn search(
        &self,
        queries: VectorBatch<'_>,
        k: usize,
        breadth: Option<usize>,
    ) -> NativeResult<Vec<Vec<Neighbor<u32>>>> {
        check_width(self.bits, &queries)?;
        if !self.is_trained() {
            return Err(NativeError::NotTrained);
        }
        let nprobe = breadth.unwrap_or(DEFAULT_NPROBE).clamp(1, self.nlist);

        Ok(queries
            .rows()
            .collect::<Vec<_>>()
            .par_iter()
            .map(|q| self.search_one(&binarize(q), k, nprobe))
            .collect())
    }

    /// Unpacked bits of the stored code, as `0.0` / `1.0`.
    fn reconstruct(&self, id: VectorId) -> NativeResult<Vec<f32>> {
        let code_size = self.code_size();
        self.lists
            .iter()
            .find_map(|list| {
                let pos = list.ids.iter().position(|&stored| stored == id)?;
                Some(unpack_bits(&list.codes[pos * code_size..(pos + 1) * code_size], self.bits))
            })
            .ok_or(NativeError::IdNotFound(id))
    }

    fn validate(&self) -> NativeResult<()> {
        if self.bits == 0 || self.bits % 8 != 0 || self.nlist == 0 {
            return Err(inconsistent(format!("{} bits over {} partitions", self.bits, self.nlist)));
        }
        self.quantizer.validate(self.bits, self.nlist)?;

        let expected_lists = if self.is_trained() { self.nlist } else { 0 };
        if self.lists.len() != expected_lists {
            return Err(inconsistent(format!(
                "{} inverted lists for {} trained partitions",
                self.lists.len(),
                expected_lists
            )));
        }

        let mut stored = 0usize;
        for list in &self.lists {
            check_code_len("inverted list", &list.codes, list.ids.len(), self.code_size())?;
            stored += list.ids.len();
        }
        if stored != self.ntotal {
            return Err(inconsistent(format!("lists hold {stored} entries, ntotal is {}", self.ntotal)));
        }
        Ok(())
    }
}
