//! IVF-PQ: inverted file with product-quantized residuals.
//!
//! Based on the FAISS `IndexIVFPQ` layout:
//! - A flat coarse quantizer routes every vector to one of `nlist` lists
//! - Each list stores ids and PQ codes of the residual `x - centroid`
//! - Search probes the `nprobe` nearest lists and ranks codes with ADC
//!
//! Duplicate ids are stored as separate entries; `remove_ids` drops all of
//! them.

use std::borrow::Cow;
use std::collections::HashSet;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::descriptor::{IndexDescriptor, MetricType, TrainParams, MIN_POINTS_PER_CENTROID};
use crate::distance::inner_product;
use crate::error::{NativeError, NativeResult};
use crate::simd::sub_simd;
use crate::{Neighbor, VectorBatch, VectorId};

use super::pq::ProductQuantizer;
use super::quantizer::{nearest_centroid, FlatQuantizer};
use super::{check_add, check_code_len, check_width, empty_lists, inconsistent, top_k, LiveToken, NativeIndex};

/// Default number of lists probed per query.
pub const DEFAULT_NPROBE: usize = 1;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct InvertedList {
    ids: Vec<VectorId>,
    /// `code_size` bytes per entry.
    codes: Vec<u8>,
}

/// Inverted file over product-quantized residuals.
#[derive(Debug, Serialize, Deserialize)]
pub struct IvfPqIndex {
    dim: usize,
    nlist: usize,
    metric: MetricType,
    train_params: TrainParams,
    quantizer: FlatQuantizer,
    pq: ProductQuantizer,
    /// One list per centroid, created by `train`.
    lists: Vec<InvertedList>,
    ntotal: usize,
    #[serde(skip)]
    _live: LiveToken,
}

impl IvfPqIndex {
    pub fn new(descriptor: &IndexDescriptor) -> NativeResult<Self> {
        let pq = ProductQuantizer::new(descriptor.dimension, descriptor.subvectors, descriptor.bits_per_code)?;
        Ok(Self {
            dim: descriptor.dimension,
            nlist: descriptor.partitions,
            metric: descriptor.metric,
            train_params: descriptor.train,
            quantizer: FlatQuantizer::new(descriptor.dimension, descriptor.metric),
            pq,
            lists: Vec::new(),
            ntotal: 0,
            _live: LiveToken::default(),
        })
    }

    pub fn nlist(&self) -> usize {
        self.nlist
    }

    pub fn metric(&self) -> MetricType {
        self.metric
    }

    /// Train the coarse quantizer, then the PQ codebooks on the residuals.
    pub fn train(&mut self, vectors: VectorBatch<'_>) -> NativeResult<()> {
        check_width(self.dim, &vectors)?;
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

        let points: Vec<&[f32]> = vectors.rows().collect();
        let centroids = self.quantizer.fit(&points, self.nlist, self.train_params)?;

        let residuals: Vec<Vec<f32>> = points
            .par_iter()
            .map(|p| {
                let list = nearest_centroid(&centroids, self.metric, p);
                residual(p, &centroids[list])
            })
            .collect();
        let residual_refs: Vec<&[f32]> = residuals.iter().map(|r| r.as_slice()).collect();
        let pq = self.pq.fit(&residual_refs, self.train_params)?;
        let lists = empty_lists(centroids.len())?;

        self.quantizer.install(centroids);
        self.pq = pq;
        self.lists = lists;
        Ok(())
    }

    fn encode_entry(&self, vector: &[f32]) -> (usize, Vec<u8>) {
        let list = self.quantizer.assign(vector);
        let codes = self.pq.encode(&residual(vector, self.quantizer.centroid(list)));
        (list, codes)
    }

    fn search_one(&self, query: &[f32], k: usize, nprobe: usize) -> Vec<Neighbor<f32>> {
        let code_size = self.pq.code_size();
        let mut hits = Vec::new();

        // Inner product tables do not depend on the probed list.
        let shared_table = match self.metric {
            MetricType::InnerProduct => Some(self.pq.distance_table(query, MetricType::InnerProduct)),
            MetricType::L2 => None,
        };

        for (list, _) in self.quantizer.probe(query, nprobe) {
            let entries = &self.lists[list];
            if entries.ids.is_empty() {
                continue;
            }
            let centroid = self.quantizer.centroid(list);

            let (table, offset) = match &shared_table {
                Some(table) => (Cow::Borrowed(table.as_slice()), -inner_product(query, centroid)),
                None => (
                    Cow::Owned(self.pq.distance_table(&residual(query, centroid), MetricType::L2)),
                    0.0,
                ),
            };

            for (id, codes) in entries.ids.iter().zip(entries.codes.chunks_exact(code_size)) {
                hits.push(Neighbor::new(*id, offset + self.pq.table_distance(&table, codes)));
            }
        }

        top_k(hits, k)
    }
}

fn residual(vector: &[f32], centroid: &[f32]) -> Vec<f32> {
    let mut out = vec![0.0; vector.len()];
    sub_simd(vector, centroid, &mut out);
    out
}

impl NativeIndex for IvfPqIndex {
    type Distance = f32;

    fn dimension(&self) -> usize {
        self.dim
    }

    fn ntotal(&self) -> usize {
        self.ntotal
    }

    fn is_trained(&self) -> bool {
        self.quantizer.is_trained() && self.pq.is_trained()
    }

    fn add_with_ids(&mut self, vectors: VectorBatch<'_>, ids: &[VectorId]) -> NativeResult<usize> {
        check_add(self.dim, &vectors, ids)?;
        if !self.is_trained() {
            return Err(NativeError::NotTrained);
        }

        let encoded: Vec<(usize, Vec<u8>)> = vectors
            .rows()
            .collect::<Vec<_>>()
            .par_iter()
            .map(|v| self.encode_entry(v))
            .collect();

        for ((list, codes), &id) in encoded.into_iter().zip(ids) {
            self.lists[list].ids.push(id);
            self.lists[list].codes.extend_from_slice(&codes);
        }
        self.ntotal += ids.len();
        Ok(self.ntotal)
    }

    fn remove_ids(&mut self, ids: &[VectorId]) -> NativeResult<usize> {
        let targets: HashSet<VectorId> = ids.iter().copied().collect();
        let code_size = self.pq.code_size();
        let mut removed = 0;

        for list in &mut self.lists {
            if !list.ids.iter().any(|id| targets.contains(id)) {
                continue;
            }
            let mut kept = InvertedList::default();
            for (id, codes) in list.ids.iter().zip(list.codes.chunks_exact(code_size)) {
                if targets.contains(id) {
                    removed += 1;
                } else {
                    kept.ids.push(*id);
                    kept.codes.extend_from_slice(codes);
                }
            }
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
    ) -> NativeResult<Vec<Vec<Neighbor<f32>>>> {
        check_width(self.dim, &queries)?;
        if !self.is_trained() {
            return Err(NativeError::NotTrained);
        }
        let nprobe = breadth.unwrap_or(DEFAULT_NPROBE).clamp(1, self.nlist);

        Ok(queries
            .rows()
            .collect::<Vec<_>>()
            .par_iter()
            .map(|q| self.search_one(q, k, nprobe))
            .collect())
    }

    fn reconstruct(&self, id: VectorId) -> NativeResult<Vec<f32>> {
        if !self.is_trained() {
            return Err(NativeError::NotTrained);
        }
        let code_size = self.pq.code_size();
        for (list, entries) in self.lists.iter().enumerate() {
            if let Some(pos) = entries.ids.iter().position(|&stored| stored == id) {
                let codes = &entries.codes[pos * code_size..(pos + 1) * code_size];
                let mut vector = self.pq.decode(codes);
                for (x, c) in vector.iter_mut().zip(self.quantizer.centroid(list)) {
                    *x += c;
                }
                return Ok(vector);
            }
        }
        Err(NativeError::IdNotFound(id))
    }

    fn validate(&self) -> NativeResult<()> {
        if self.nlist == 0 {
            return Err(inconsistent("index has no partitions"));
        }
        self.quantizer.validate(self.dim, self.nlist)?;
        self.pq.validate(self.dim)?;

        let expected_lists = if self.is_trained() { self.nlist } else { 0 };
        if self.quantizer.is_trained() != self.pq.is_trained() || self.lists.len() != expected_lists {
            return Err(inconsistent(format!(
                "{} inverted lists for {} trained partitions",
                self.lists.len(),
                expected_lists
            )));
        }

        let code_size = self.pq.code_size();
        let mut stored = 0usize;
        for list in &self.lists {
            check_code_len("inverted list", &list.codes, list.ids.len(), code_size)?;
            self.pq.validate_codes(&list.codes)?;
            stored += list.ids.len();
        }
        if stored != self.ntotal {
            return Err(inconsistent(format!("lists hold {stored} entries, ntotal is {}", self.ntotal)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clustered(n_per_cluster: usize, dim: usize) -> Vec<f32> {
        let mut data = Vec::new();
        for cluster in 0..4 {
            for i in 0..n_per_cluster {
                for d in 0..dim {
                    let base = if d % 4 == cluster { 10.0 } else { 0.0 };
                    data.push(base + (i % 7) as f32 * 0.05 + d as f32 * 0.01);
                }
            }
        }
        data
    }

    fn descriptor(metric: MetricType) -> IndexDescriptor {
        IndexDescriptor::quantized_ivf(8, 4, 4, 4, metric)
    }

    #[test]
    fn test_add_before_train_is_rejected() {
        let mut index = IvfPqIndex::new(&descriptor(MetricType::L2)).unwrap();
        let data = clustered(10, 8);
        let batch = VectorBatch::new(&data, 8).unwrap();
        let ids: Vec<VectorId> = (0..batch.len() as i64).collect();
        assert_eq!(index.add_with_ids(batch, &ids), Err(NativeError::NotTrained));
        assert_eq!(index.ntotal(), 0);
    }

    #[test]
    fn test_train_add_search() {
        let mut index = IvfPqIndex::new(&descriptor(MetricType::L2)).unwrap();
        let data = clustered(50, 8);
        let batch = VectorBatch::new(&data, 8).unwrap();
        index.train(batch).unwrap();
        assert!(index.is_trained());

        let ids: Vec<VectorId> = (0..batch.len() as i64).collect();
        assert_eq!(index.add_with_ids(batch, &ids).unwrap(), 200);

        // First vector of cluster 2.
        let query = batch.row(100).to_vec();
        let results = index.search(VectorBatch::new(&query, 8).unwrap(), 5, Some(2)).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].len(), 5);
        for n in &results[0] {
            assert!((100..150).contains(&n.id), "expected cluster 2, got {}", n.id);
        }
        for pair in results[0].windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[test]
    fn test_inner_product_ranks_aligned_vectors_first() {
        let mut index = IvfPqIndex::new(&descriptor(MetricType::InnerProduct)).unwrap();
        let data = clustered(50, 8);
        let batch = VectorBatch::new(&data, 8).unwrap();
        index.train(batch).unwrap();
        let ids: Vec<VectorId> = (0..batch.len() as i64).collect();
        index.add_with_ids(batch, &ids).unwrap();

        let mut query = vec![0.0; 8];
        query[1] = 1.0;
        query[5] = 1.0;
        let results = index.search(VectorBatch::new(&query, 8).unwrap(), 3, Some(4)).unwrap();
        for n in &results[0] {
            assert!((50..100).contains(&n.id));
            assert!(n.distance < 0.0);
        }
    }

    #[test]
    fn test_remove_ids() {
        let mut index = IvfPqIndex::new(&descriptor(MetricType::L2)).unwrap();
        let data = clustered(50, 8);
        let batch = VectorBatch::new(&data, 8).unwrap();
        index.train(batch).unwrap();
        let ids: Vec<VectorId> = (0..batch.len() as i64).collect();
        index.add_with_ids(batch, &ids).unwrap();

        let removed = index.remove_ids(&[0, 1, 2, 9999]).unwrap();
        assert_eq!(removed, 3);
        assert_eq!(index.ntotal(), 197);

        let query = batch.row(0).to_vec();
        let results = index.search(VectorBatch::new(&query, 8).unwrap(), 10, Some(4)).unwrap();
        assert!(results[0].iter().all(|n| n.id > 2));
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut index = IvfPqIndex::new(&descriptor(MetricType::L2)).unwrap();
        let data = vec![0.0; 12];
        let batch = VectorBatch::new(&data, 4).unwrap();
        assert!(matches!(index.train(batch), Err(NativeError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_huge_partition_count_allocates_nothing_up_front() {
        let mut index = IvfPqIndex::new(&IndexDescriptor::quantized_ivf(8, 1 << 30, 4, 4, MetricType::L2)).unwrap();
        assert!(index.lists.is_empty());

        let data = clustered(10, 8);
        let err = index.train(VectorBatch::new(&data, 8).unwrap()).unwrap_err();
        assert!(matches!(err, NativeError::InsufficientTrainingData { .. }));
        assert!(!index.is_trained());
    }

    #[test]
    fn test_reconstruct_adds_centroid_back() {
        // Four distinct points per dimension pair decode exactly with 4-bit codes.
        let data: Vec<f32> = (0..64).flat_map(|i| [(i % 4) as f32, (i / 16) as f32]).collect();
        let mut index = IvfPqIndex::new(&IndexDescriptor::quantized_ivf(2, 1, 2, 4, MetricType::L2)).unwrap();
        let batch = VectorBatch::new(&data, 2).unwrap();
        index.train(batch).unwrap();
        let ids: Vec<VectorId> = (0..64).collect();
        index.add_with_ids(batch, &ids).unwrap();

        let vector = index.reconstruct(37).unwrap();
        assert!((vector[0] - 1.0).abs() < 1e-4 && (vector[1] - 2.0).abs() < 1e-4, "{vector:?}");
        assert_eq!(index.reconstruct(640), Err(NativeError::IdNotFound(640)));
    }

    #[test]
    fn test_validate_detects_corrupt_lists() {
        let mut index = IvfPqIndex::new(&descriptor(MetricType::L2)).unwrap();
        assert!(index.validate().is_ok());

        let data = clustered(50, 8);
        let batch = VectorBatch::new(&data, 8).unwrap();
        index.train(batch).unwrap();
        let ids: Vec<VectorId> = (0..batch.len() as i64).collect();
        index.add_with_ids(batch, &ids).unwrap();
        assert!(index.validate().is_ok());

        let list = index.lists.iter().position(|l| !l.ids.is_empty()).unwrap();
        index.lists[list].codes.pop();
        assert!(matches!(index.validate(), Err(NativeError::Inconsistent(_))));
        index.lists.pop();
        assert!(index.validate().is_err());
    }

    #[test]
    fn test_retrain_after_add_is_rejected() {
        let mut index = IvfPqIndex::new(&descriptor(MetricType::L2)).unwrap();
        let data = clustered(50, 8);
        let batch = VectorBatch::new(&data, 8).unwrap();
        index.train(batch).unwrap();
        index.add_with_ids(VectorBatch::new(batch.row(0), 8).unwrap(), &[7]).unwrap();
        assert!(index.train(batch).is_err());
        assert_eq!(index.ntotal(), 1);
    }
}
