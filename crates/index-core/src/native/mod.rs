//! Native index engines wrapped by the handle layer.
//!
//! Each engine owns its data and exposes the [`NativeIndex`] operations plus
//! whatever lifecycle steps its family needs (`train` for the IVF engines,
//! `build` for the graph). Engines validate their inputs before touching
//! state, so a returned error leaves them unchanged.
//!
//! - `ivfpq`: inverted file over product-quantized residuals
//! - `binary_ivf`: inverted file over packed binary codes
//! - `graph`: neighbor graph over product-quantized objects
//! - `quantizer`: coarse quantizers shared by the IVF engines
//! - `pq`: product quantizer
//! - `kmeans`: Lloyd's k-means used by every trainer

pub mod binary_ivf;
pub mod graph;
pub mod ivfpq;
pub mod kmeans;
pub mod pq;
pub mod quantizer;

pub use binary_ivf::BinaryIvfIndex;
pub use graph::QuantizedGraphIndex;
pub use ivfpq::IvfPqIndex;

use std::cmp::Ordering;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use crate::error::{NativeError, NativeResult};
use crate::{Neighbor, VectorBatch, VectorId};

static LIVE_OBJECTS: AtomicUsize = AtomicUsize::new(0);

/// Number of engine and quantizer objects currently alive in the process.
pub fn live_objects() -> usize {
    LIVE_OBJECTS.load(AtomicOrdering::SeqCst)
}

/// Counts one live native object from construction until drop.
///
/// Engines and quantizers embed one; `Default` registers a new object, so a
/// `#[serde(skip)]` token is re-registered when an engine is deserialized.
#[derive(Debug)]
pub struct LiveToken(());

impl Default for LiveToken {
    fn default() -> Self {
        LIVE_OBJECTS.fetch_add(1, AtomicOrdering::SeqCst);
        Self(())
    }
}

impl Drop for LiveToken {
    fn drop(&mut self) {
        LIVE_OBJECTS.fetch_sub(1, AtomicOrdering::SeqCst);
    }
}

/// Operations every engine supports.
pub trait NativeIndex: Send {
    /// Distance representation produced by `search`.
    type Distance: Copy + PartialOrd + Send;

    /// Width of each input vector.
    fn dimension(&self) -> usize;

    /// Number of stored vectors.
    fn ntotal(&self) -> usize;

    /// Whether the engine is ready to accept vectors or answer searches.
    fn is_trained(&self) -> bool;

    /// Store `vectors` under `ids`, returning the new total.
    fn add_with_ids(&mut self, vectors: VectorBatch<'_>, ids: &[VectorId]) -> NativeResult<usize>;

    /// Drop every vector whose id is in `ids`, returning how many were removed.
    fn remove_ids(&mut self, ids: &[VectorId]) -> NativeResult<usize>;

    /// Up to `k` nearest neighbors per query, nearest first.
    ///
    /// `breadth` is the family's search-width knob (`nprobe` or beam width);
    /// `None` selects the engine default.
    fn search(
        &self,
        queries: VectorBatch<'_>,
        k: usize,
        breadth: Option<usize>,
    ) -> NativeResult<Vec<Vec<Neighbor<Self::Distance>>>>;

    /// The vector stored under `id`, as the engine reconstructs it.
    ///
    /// Lossy engines return their decoded approximation. With duplicate ids
    /// the earliest stored entry wins.
    fn reconstruct(&self, id: VectorId) -> NativeResult<Vec<f32>>;

    /// Check the internal invariants of a deserialized engine, so that a
    /// corrupt file is rejected on load instead of panicking on first use.
    fn validate(&self) -> NativeResult<()>;
}

/// Shared input checks for `add_with_ids`.
pub(crate) fn check_add(dimension: usize, vectors: &VectorBatch<'_>, ids: &[VectorId]) -> NativeResult<()> {
    check_width(dimension, vectors)?;
    if vectors.len() != ids.len() {
        return Err(NativeError::IndexError(format!(
            "got {} vectors but {} ids",
            vectors.len(),
            ids.len()
        )));
    }
    Ok(())
}

pub(crate) fn check_width(dimension: usize, vectors: &VectorBatch<'_>) -> NativeResult<()> {
    if vectors.dim() != dimension {
        return Err(NativeError::DimensionMismatch {
            expected: dimension,
            got: vectors.dim(),
        });
    }
    Ok(())
}

/// Empty inverted lists, one per centroid, without aborting on a failed
/// allocation.
pub(crate) fn empty_lists<T: Default>(nlist: usize) -> NativeResult<Vec<T>> {
    let mut lists = Vec::new();
    lists
        .try_reserve_exact(nlist)
        .map_err(|e| NativeError::IndexError(format!("cannot allocate {nlist} inverted lists: {e}")))?;
    lists.resize_with(nlist, T::default);
    Ok(lists)
}

pub(crate) fn inconsistent(message: impl Into<String>) -> NativeError {
    NativeError::Inconsistent(message.into())
}

/// Check that a flat code buffer holds `entries` codes of `code_size` bytes.
pub(crate) fn check_code_len(what: &str, codes: &[u8], entries: usize, code_size: usize) -> NativeResult<()> {
    if Some(codes.len()) != entries.checked_mul(code_size) {
        return Err(inconsistent(format!(
            "{what} holds {} code bytes for {entries} entries of {code_size} bytes",
            codes.len()
        )));
    }
    Ok(())
}

/// Keep the `k` nearest, sorted ascending by distance then id.
pub(crate) fn top_k<D: PartialOrd + Copy>(mut hits: Vec<Neighbor<D>>, k: usize) -> Vec<Neighbor<D>> {
    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    hits.truncate(k);
    hits
}
