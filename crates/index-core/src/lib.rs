//! # Index Core
//!
//! Owned, tag-checked handles over quantized approximate-nearest-neighbor
//! index engines.
//!
//! Every index lives behind an [`IndexHandle`] that records which method
//! family built it. Operations are routed by that tag; calling an operation
//! with the wrong tag is rejected with [`HandleError::TypeMismatch`] instead
//! of reinterpreting the index. Engine failures, including panics, are
//! translated into [`HandleError`] values at every entry point.
//!
//! ## Index Methods
//!
//! - **QuantizedIVF**: k-means coarse quantizer + product-quantized residuals
//! - **BinaryIVF**: Hamming-space coarse quantizer over packed bit codes
//! - **QuantizedGraph**: append objects, build a neighbor graph over PQ codes
//!
//! ## Example
//!
//! ```rust,ignore
//! use index_core::facade;
//!
//! // QuantizedIVF (0), L2 (1)
//! let mut handle = facade::create_index(3, 1, 3, 4, 0, 1)?;
//! facade::train(&mut handle, &training, 0)?;
//! facade::add(&mut handle, &training, &ids, 0)?;
//!
//! let hits = facade::search(&handle, 5, Some(1), &[1.0, 2.0, 3.0], 0)?;
//! println!("{:?} {:?}", hits.ids, hits.distances);
//!
//! facade::release(handle);
//! ```

pub mod descriptor;
pub mod dispatch;
pub mod distance;
pub mod error;
pub mod facade;
pub mod handle;
pub mod native;
pub mod persist;
pub mod simd;

pub use descriptor::{GraphParams, IndexDescriptor, MethodType, MetricType, TrainParams};
pub use dispatch::{HandleRef, HandleRegistry};
pub use error::{HandleError, NativeError, Result};
pub use handle::{HandleOrigin, HandleState, IndexHandle};

use std::ops::Deref;

/// Caller-assigned vector identifier.
pub type VectorId = i64;

/// Id written into result slots no neighbor could fill.
pub const EMPTY_ID: VectorId = -1;

/// Distance written into result slots no neighbor could fill.
pub const EMPTY_DISTANCE: f32 = f32::MAX;

/// A borrowed batch of row-major vectors of equal width.
#[derive(Debug, Clone, Copy)]
pub struct VectorBatch<'a> {
    data: &'a [f32],
    dim: usize,
}

impl<'a> VectorBatch<'a> {
    /// Wrap `data` as rows of `dim` components.
    pub fn new(data: &'a [f32], dim: usize) -> std::result::Result<Self, NativeError> {
        if dim == 0 {
            return Err(NativeError::IndexError("vector width must be positive".to_string()));
        }
        if data.len() % dim != 0 {
            return Err(NativeError::IndexError(format!(
                "{} values do not split into rows of {dim}",
                data.len()
            )));
        }
        Ok(Self { data, dim })
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.data.len() / self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Width of each row.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn row(&self, i: usize) -> &'a [f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    pub fn rows(&self) -> std::slice::ChunksExact<'a, f32> {
        self.data.chunks_exact(self.dim)
    }
}

impl Deref for VectorBatch<'_> {
    type Target = [f32];

    fn deref(&self) -> &Self::Target {
        self.data
    }
}

/// One neighbor as reported by an engine, in the engine's distance type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor<D> {
    pub id: VectorId,
    pub distance: D,
}

impl<D> Neighbor<D> {
    pub fn new(id: VectorId, distance: D) -> Self {
        Self { id, distance }
    }
}

/// Search output for a batch of queries.
///
/// `ids` and `distances` hold `nq * k` entries, query-major: query 0's `k`
/// neighbors first, nearest first, then query 1's. Slots without a neighbor
/// hold [`EMPTY_ID`] and [`EMPTY_DISTANCE`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchBatch {
    pub k: usize,
    pub ids: Vec<VectorId>,
    pub distances: Vec<f32>,
}

impl SearchBatch {
    /// A batch with every slot empty.
    pub fn empty(nq: usize, k: usize) -> Self {
        Self {
            k,
            ids: vec![EMPTY_ID; nq * k],
            distances: vec![EMPTY_DISTANCE; nq * k],
        }
    }

    /// Number of queries.
    pub fn nq(&self) -> usize {
        if self.k == 0 {
            0
        } else {
            self.ids.len() / self.k
        }
    }

    /// Results of one query.
    pub fn query(&self, q: usize) -> (&[VectorId], &[f32]) {
        let range = q * self.k..(q + 1) * self.k;
        (&self.ids[range.clone()], &self.distances[range])
    }

    /// Filled slots of one query.
    pub fn hits(&self, q: usize) -> impl Iterator<Item = (VectorId, f32)> + '_ {
        let (ids, distances) = self.query(q);
        ids.iter()
            .copied()
            .zip(distances.iter().copied())
            .filter(|(id, _)| *id != EMPTY_ID)
    }
}
