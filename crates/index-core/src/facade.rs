//! Lifecycle operations keyed by raw method and metric tags.
//!
//! These mirror the boundary surface one-to-one: every call that touches an
//! existing handle names the method tag the caller believes the handle has,
//! and is rejected with [`HandleError::TypeMismatch`] before any engine work
//! if it is wrong. An unknown tag is [`HandleError::UnsupportedMethod`].
//!
//! Vectors are flat row-major `f32` slices whose width is the handle's
//! dimension. Binary indexes take one float per bit, set when positive.

use std::path::Path;

use crate::descriptor::IndexDescriptor;
use crate::dispatch::{ensure_method, resolve_method};
use crate::error::Result;
use crate::handle::IndexHandle;
use crate::{SearchBatch, VectorId};

/// Validate the raw parameters and allocate a new index.
///
/// Method is checked before metric, and both before the numeric
/// parameters, so an unknown enum value is always reported as such.
pub fn create_index(
    dimension: i64,
    partitions: i64,
    subvectors: i64,
    bits_per_code: i64,
    method_type: i32,
    metric_type: i32,
) -> Result<IndexHandle> {
    let descriptor = IndexDescriptor::from_raw(
        dimension,
        partitions,
        subvectors,
        bits_per_code,
        method_type,
        metric_type,
    )?;
    IndexHandle::create(descriptor)
}

pub fn load_index(path: impl AsRef<Path>, method_type: i32) -> Result<IndexHandle> {
    let method = resolve_method(method_type)?;
    IndexHandle::load(path, method)
}

pub fn write_index(handle: &IndexHandle, path: impl AsRef<Path>, method_type: i32) -> Result<()> {
    ensure_method(handle, method_type)?;
    handle.write(path)
}

pub fn train(handle: &mut IndexHandle, vectors: &[f32], method_type: i32) -> Result<()> {
    ensure_method(handle, method_type)?;
    handle.train(vectors)
}

/// Returns the number of stored vectors after the add.
pub fn add(handle: &mut IndexHandle, vectors: &[f32], ids: &[VectorId], method_type: i32) -> Result<usize> {
    ensure_method(handle, method_type)?;
    handle.add(vectors, ids)
}

pub fn search(
    handle: &IndexHandle,
    k: usize,
    breadth: Option<usize>,
    queries: &[f32],
    method_type: i32,
) -> Result<SearchBatch> {
    ensure_method(handle, method_type)?;
    handle.search(queries, k, breadth)
}

/// Returns the number of stored vectors after the removal.
pub fn remove(handle: &mut IndexHandle, ids: &[VectorId], method_type: i32) -> Result<usize> {
    ensure_method(handle, method_type)?;
    handle.remove(ids)
}

pub fn build(handle: &mut IndexHandle, method_type: i32) -> Result<()> {
    ensure_method(handle, method_type)?;
    handle.build()
}

pub fn ntotal(handle: &IndexHandle, method_type: i32) -> Result<usize> {
    ensure_method(handle, method_type)?;
    Ok(handle.ntotal())
}

pub fn dimension(handle: &IndexHandle, method_type: i32) -> Result<usize> {
    ensure_method(handle, method_type)?;
    Ok(handle.dimension())
}

/// The vector stored under `id`, `dimension` values long.
pub fn get_object(handle: &IndexHandle, id: VectorId, method_type: i32) -> Result<Vec<f32>> {
    ensure_method(handle, method_type)?;
    handle.get_object(id)
}

pub fn is_trained(handle: &IndexHandle, method_type: i32) -> Result<bool> {
    ensure_method(handle, method_type)?;
    Ok(handle.is_trained())
}

pub fn release(handle: IndexHandle) {
    handle.release();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandleError;

    #[test]
    fn test_create_reports_enum_errors_first() {
        assert_eq!(create_index(0, 0, 0, 0, 9, 9).unwrap_err(), HandleError::InvalidMethod(9));
        assert_eq!(create_index(0, 0, 0, 0, 0, 9).unwrap_err(), HandleError::InvalidMetric(9));
        assert!(matches!(
            create_index(0, 1, 1, 8, 0, 1).unwrap_err(),
            HandleError::InvalidConfiguration(_)
        ));
    }

    #[test]
    fn test_partition_count_is_bounded_and_lazy() {
        assert!(matches!(
            create_index(8, 1 << 40, 4, 4, 0, 1).unwrap_err(),
            HandleError::InvalidConfiguration(_)
        ));
        assert!(matches!(
            create_index(16, 1 << 40, 0, 0, 1, 1).unwrap_err(),
            HandleError::InvalidConfiguration(_)
        ));

        // Lists are created by training, so a large but legal count is cheap.
        let mut handle = create_index(8, 1 << 30, 4, 4, 0, 1).unwrap();
        let err = train(&mut handle, &[1.0; 8 * 16], 0).unwrap_err();
        assert!(matches!(err, HandleError::NativeFailure(_)));
        assert!(!is_trained(&handle, 0).unwrap());
        release(handle);
    }

    #[test]
    fn test_load_with_unknown_method() {
        assert_eq!(load_index("/nonexistent", 5).unwrap_err(), HandleError::UnsupportedMethod(5));
    }

    #[test]
    fn test_mismatched_tag_is_rejected_before_engine_work() {
        let mut handle = create_index(16, 2, 0, 0, 1, 1).unwrap();
        let err = train(&mut handle, &[1.0; 16], 0).unwrap_err();
        assert!(matches!(err, HandleError::TypeMismatch { .. }));
        assert!(!handle.is_trained());
        assert_eq!(ntotal(&handle, 1).unwrap(), 0);
        assert_eq!(is_trained(&handle, 7).unwrap_err(), HandleError::UnsupportedMethod(7));
        release(handle);
    }
}
