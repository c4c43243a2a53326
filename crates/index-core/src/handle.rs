//! Owned handle over one native index.
//!
//! An [`IndexHandle`] pairs a native engine with the method tag it was built
//! with. The tag is fixed for the handle's lifetime. Every entry point runs
//! the engine inside [`catch_native`], so engine panics surface as
//! [`HandleError`] values; a panic during a mutating call leaves the engine
//! in an unknown state, and the handle refuses further work with
//! [`HandleError::HandleFailed`].

use std::fmt;
use std::path::Path;

use crate::descriptor::{IndexDescriptor, MethodType};
use crate::error::{catch_native, HandleError, NativeResult, Result};
use crate::native::{BinaryIvfIndex, IvfPqIndex, NativeIndex, QuantizedGraphIndex};
use crate::persist;
use crate::{Neighbor, SearchBatch, VectorBatch, VectorId};

/// The engine behind a handle, one variant per method family.
#[derive(Debug)]
pub enum NativeKind {
    QuantizedIvf(Box<IvfPqIndex>),
    BinaryIvf(Box<BinaryIvfIndex>),
    QuantizedGraph(Box<QuantizedGraphIndex>),
}

impl NativeKind {
    /// Construct the engine `descriptor` selects.
    pub fn allocate(descriptor: &IndexDescriptor) -> NativeResult<Self> {
        Ok(match descriptor.method {
            MethodType::QuantizedIvf => NativeKind::QuantizedIvf(Box::new(IvfPqIndex::new(descriptor)?)),
            MethodType::BinaryIvf => NativeKind::BinaryIvf(Box::new(BinaryIvfIndex::new(descriptor)?)),
            MethodType::QuantizedGraph => NativeKind::QuantizedGraph(Box::new(QuantizedGraphIndex::new(descriptor)?)),
        })
    }

    pub fn method(&self) -> MethodType {
        match self {
            NativeKind::QuantizedIvf(_) => MethodType::QuantizedIvf,
            NativeKind::BinaryIvf(_) => MethodType::BinaryIvf,
            NativeKind::QuantizedGraph(_) => MethodType::QuantizedGraph,
        }
    }

    pub fn dimension(&self) -> usize {
        match self {
            NativeKind::QuantizedIvf(index) => index.dimension(),
            NativeKind::BinaryIvf(index) => index.dimension(),
            NativeKind::QuantizedGraph(index) => index.dimension(),
        }
    }

    pub fn ntotal(&self) -> usize {
        match self {
            NativeKind::QuantizedIvf(index) => index.ntotal(),
            NativeKind::BinaryIvf(index) => index.ntotal(),
            NativeKind::QuantizedGraph(index) => index.ntotal(),
        }
    }

    pub fn is_trained(&self) -> bool {
        match self {
            NativeKind::QuantizedIvf(index) => index.is_trained(),
            NativeKind::BinaryIvf(index) => index.is_trained(),
            NativeKind::QuantizedGraph(index) => index.is_trained(),
        }
    }
}

/// How a handle came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOrigin {
    /// Built from a descriptor; the handle allocated the quantizer itself.
    Created,
    /// Deserialized from a file; the quantizer came with the stored index.
    Loaded,
}

/// Whether a handle still accepts operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleState {
    Ready,
    /// A native call panicked mid-mutation. Holds the panic message.
    Failed(String),
}

/// One native index and its method tag.
pub struct IndexHandle {
    method: MethodType,
    origin: HandleOrigin,
    state: HandleState,
    native: NativeKind,
}

impl fmt::Debug for IndexHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexHandle")
            .field("method", &self.method)
            .field("origin", &self.origin)
            .field("state", &self.state)
            .field("dimension", &self.native.dimension())
            .field("ntotal", &self.native.ntotal())
            .finish()
    }
}

impl IndexHandle {
    /// Validate `descriptor`, then allocate its engine.
    ///
    /// Nothing is allocated when validation fails. Engine construction
    /// errors and panics are reported as [`HandleError::AllocationFailure`].
    pub fn create(descriptor: IndexDescriptor) -> Result<Self> {
        descriptor.validate()?;
        let method = descriptor.method;

        let native = match catch_native(|| NativeKind::allocate(&descriptor)) {
            Ok(Ok(native)) => native,
            Ok(Err(err)) => {
                return Err(HandleError::AllocationFailure {
                    method,
                    message: err.to_string(),
                })
            }
            Err(message) => return Err(HandleError::AllocationFailure { method, message }),
        };

        tracing::debug!(
            %method,
            dimension = descriptor.dimension,
            partitions = descriptor.partitions,
            metric = %descriptor.metric,
            "created index"
        );
        Ok(Self {
            method,
            origin: HandleOrigin::Created,
            state: HandleState::Ready,
            native,
        })
    }

    /// Read a `method` index written by [`IndexHandle::write`].
    pub fn load(path: impl AsRef<Path>, method: MethodType) -> Result<Self> {
        let path = path.as_ref();
        let native = catch_native(|| persist::read_index(path, method)).map_err(|message| {
            HandleError::FormatMismatch {
                path: path.to_path_buf(),
                message,
            }
        })??;

        Ok(Self {
            method,
            origin: HandleOrigin::Loaded,
            state: HandleState::Ready,
            native,
        })
    }

    /// Persist the index to `path`.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        self.ensure_ready()?;
        let path = path.as_ref();
        catch_native(|| persist::write_index(path, &self.native)).map_err(HandleError::NativeFailure)?
    }

    pub fn method(&self) -> MethodType {
        self.method
    }

    pub fn origin(&self) -> HandleOrigin {
        self.origin
    }

    pub fn state(&self) -> &HandleState {
        &self.state
    }

    pub fn dimension(&self) -> usize {
        self.native.dimension()
    }

    pub fn ntotal(&self) -> usize {
        self.native.ntotal()
    }

    pub fn is_trained(&self) -> bool {
        self.native.is_trained()
    }

    /// Train the coarse quantizer (and codebooks) of an IVF index.
    pub fn train(&mut self, vectors: &[f32]) -> Result<()> {
        let batch = self.batch(vectors)?;
        self.mutate("train", |native| match native {
            NativeKind::QuantizedIvf(index) => Ok(index.train(batch)?),
            NativeKind::BinaryIvf(index) => Ok(index.train(batch)?),
            NativeKind::QuantizedGraph(_) => Err(HandleError::NotSupportedByVariant {
                method: MethodType::QuantizedGraph,
                operation: "train",
            }),
        })?;
        tracing::debug!(method = %self.method, points = batch.len(), "trained index");
        Ok(())
    }

    /// Store `vectors` under `ids`, returning the new total.
    pub fn add(&mut self, vectors: &[f32], ids: &[VectorId]) -> Result<usize> {
        let batch = self.batch(vectors)?;
        if batch.len() != ids.len() {
            return Err(HandleError::InvalidConfiguration(format!(
                "got {} vectors but {} ids",
                batch.len(),
                ids.len()
            )));
        }
        let total = self.mutate("add", |native| {
            Ok(match native {
                NativeKind::QuantizedIvf(index) => index.add_with_ids(batch, ids)?,
                NativeKind::BinaryIvf(index) => index.add_with_ids(batch, ids)?,
                NativeKind::QuantizedGraph(index) => index.add_with_ids(batch, ids)?,
            })
        })?;
        tracing::debug!(method = %self.method, added = ids.len(), total, "added vectors");
        Ok(total)
    }

    /// Drop every vector stored under one of `ids`, returning the new total.
    /// Unknown ids are ignored.
    pub fn remove(&mut self, ids: &[VectorId]) -> Result<usize> {
        let removed = self.mutate("remove", |native| {
            Ok(match native {
                NativeKind::QuantizedIvf(index) => index.remove_ids(ids)?,
                NativeKind::BinaryIvf(index) => index.remove_ids(ids)?,
                NativeKind::QuantizedGraph(index) => index.remove_ids(ids)?,
            })
        })?;
        let total = self.ntotal();
        tracing::debug!(method = %self.method, requested = ids.len(), removed, total, "removed vectors");
        Ok(total)
    }

    /// Build the neighbor graph of a quantized graph index.
    pub fn build(&mut self) -> Result<()> {
        let method = self.method;
        self.mutate("build", |native| match native {
            NativeKind::QuantizedGraph(index) => Ok(index.build()?),
            _ => Err(HandleError::NotSupportedByVariant {
                method,
                operation: "build",
            }),
        })
    }

    /// Up to `k` neighbors for each query in `queries`.
    ///
    /// `breadth` is `nprobe` for the IVF indexes and the beam width for the
    /// graph; `None` uses the engine default.
    pub fn search(&self, queries: &[f32], k: usize, breadth: Option<usize>) -> Result<SearchBatch> {
        self.ensure_ready()?;
        if k == 0 {
            return Err(HandleError::InvalidConfiguration("k must be positive".to_string()));
        }
        let batch = self.batch(queries)?;
        if batch.is_empty() {
            return Err(HandleError::InvalidConfiguration("no queries given".to_string()));
        }

        let results = catch_native(|| -> Result<SearchBatch> {
            Ok(match &self.native {
                NativeKind::QuantizedIvf(index) => fill(index.search(batch, k, breadth)?, batch.len(), k, |d| d),
                NativeKind::BinaryIvf(index) => fill(index.search(batch, k, breadth)?, batch.len(), k, |d| d as f32),
                NativeKind::QuantizedGraph(index) => fill(index.search(batch, k, breadth)?, batch.len(), k, |d| d),
            })
        })
        .map_err(HandleError::NativeFailure)?;

        if let Err(err) = &results {
            tracing::warn!(method = %self.method, error = %err, "search failed");
        }
        results
    }

    /// The vector stored under `id`.
    ///
    /// The graph returns the raw object, the quantized IVF its decoded
    /// approximation and the binary IVF its bits as `0.0` / `1.0`.
    pub fn get_object(&self, id: VectorId) -> Result<Vec<f32>> {
        self.ensure_ready()?;
        catch_native(|| match &self.native {
            NativeKind::QuantizedIvf(index) => index.reconstruct(id),
            NativeKind::BinaryIvf(index) => index.reconstruct(id),
            NativeKind::QuantizedGraph(index) => index.reconstruct(id),
        })
        .map_err(HandleError::NativeFailure)?
        .map_err(HandleError::from)
    }

    /// Drop the handle and its engine.
    pub fn release(self) {
        tracing::debug!(method = %self.method, origin = ?self.origin, "released index");
    }

    fn ensure_ready(&self) -> Result<()> {
        match &self.state {
            HandleState::Ready => Ok(()),
            HandleState::Failed(message) => Err(HandleError::HandleFailed(message.clone())),
        }
    }

    fn batch<'a>(&self, data: &'a [f32]) -> Result<VectorBatch<'a>> {
        VectorBatch::new(data, self.dimension()).map_err(|_| {
            HandleError::InvalidConfiguration(format!(
                "{} values do not form vectors of dimension {}",
                data.len(),
                self.dimension()
            ))
        })
    }

    /// Run a mutating engine call, marking the handle failed if it panics.
    fn mutate<T, F>(&mut self, operation: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&mut NativeKind) -> Result<T>,
    {
        self.ensure_ready()?;
        match catch_native(|| f(&mut self.native)) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                tracing::warn!(method = %self.method, operation, error = %err, "operation failed");
                Err(err)
            }
            Err(message) => {
                tracing::error!(method = %self.method, operation, %message, "native panic, handle disabled");
                self.state = HandleState::Failed(message.clone());
                Err(HandleError::NativeFailure(message))
            }
        }
    }
}

/// Lay per-query neighbor lists out query-major, padding with sentinels.
fn fill<D: Copy>(results: Vec<Vec<Neighbor<D>>>, nq: usize, k: usize, to_f32: impl Fn(D) -> f32) -> SearchBatch {
    let mut batch = SearchBatch::empty(nq, k);
    for (q, neighbors) in results.into_iter().enumerate() {
        for (rank, n) in neighbors.into_iter().take(k).enumerate() {
            batch.ids[q * k + rank] = n.id;
            batch.distances[q * k + rank] = to_f32(n.distance);
        }
    }
    batch
}
