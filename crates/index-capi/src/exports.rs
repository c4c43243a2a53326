//! Exported functions.
//!
//! Vector arguments are row-major `f32` buffers of `count * dimension`
//! values, where `dimension` is the handle's (bits, for binary indexes).
//! Every function that takes a handle also takes the method tag the caller
//! expects; a different tag fails with a type-mismatch error.

use std::ffi::{c_char, c_int, CStr};
use std::path::PathBuf;

use index_core::{facade, HandleError, HandleRef, HandleRegistry, Result};

use crate::boundary::{self, call, elements, non_negative, slice, slice_mut};
use crate::config::RuntimeConfig;

fn registry() -> &'static HandleRegistry {
    HandleRegistry::global()
}

unsafe fn path_arg(path: *const c_char) -> Result<PathBuf> {
    if path.is_null() {
        return Err(HandleError::InvalidConfiguration("path pointer is null".to_string()));
    }
    let path = CStr::from_ptr(path)
        .to_str()
        .map_err(|_| HandleError::InvalidConfiguration("path is not valid UTF-8".to_string()))?;
    Ok(PathBuf::from(path))
}

fn total(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Create an index. Returns its handle, or `0` on failure.
#[no_mangle]
pub extern "C" fn ihm_create_index(
    dimension: i64,
    partitions: i64,
    subvectors: i64,
    bits_per_code: i64,
    method_type: c_int,
    metric_type: c_int,
) -> HandleRef {
    call(0, || {
        let handle = facade::create_index(dimension, partitions, subvectors, bits_per_code, method_type, metric_type)?;
        Ok(registry().insert(handle))
    })
}

/// Load an index written by [`ihm_write_index`]. Returns `0` on failure.
///
/// # Safety
///
/// `path` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn ihm_load_index(path: *const c_char, method_type: c_int) -> HandleRef {
    call(0, || {
        let handle = facade::load_index(path_arg(path)?, method_type)?;
        Ok(registry().insert(handle))
    })
}

/// # Safety
///
/// `path` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn ihm_write_index(handle: HandleRef, path: *const c_char, method_type: c_int) -> bool {
    call(false, || {
        let path = path_arg(path)?;
        registry().with_handle(handle, |h| facade::write_index(h, &path, method_type))?;
        Ok(true)
    })
}

/// # Safety
///
/// `vectors` must be valid for reads of `count * dimension` floats.
#[no_mangle]
pub unsafe extern "C" fn ihm_train(handle: HandleRef, count: i64, vectors: *const f32, method_type: c_int) -> bool {
    call(false, || {
        let n = non_negative(count, "count")?;
        registry().with_handle(handle, |h| {
            let vectors = slice(vectors, elements(n, h.dimension(), "vectors")?, "vectors")?;
            facade::train(h, vectors, method_type)
        })?;
        Ok(true)
    })
}

/// Add `count` vectors under `ids`. Returns the new total, or `-1`.
///
/// # Safety
///
/// `vectors` must be valid for reads of `count * dimension` floats and
/// `ids` for `count` ids.
#[no_mangle]
pub unsafe extern "C" fn ihm_add(
    handle: HandleRef,
    count: i64,
    vectors: *const f32,
    ids: *const i64,
    method_type: c_int,
) -> i64 {
    call(-1, || {
        let n = non_negative(count, "count")?;
        let added = registry().with_handle(handle, |h| {
            let vectors = slice(vectors, elements(n, h.dimension(), "vectors")?, "vectors")?;
            let ids = slice(ids, n, "ids")?;
            facade::add(h, vectors, ids, method_type)
        })?;
        Ok(total(added))
    })
}

/// Search `query_count` queries for `k` neighbors each.
///
/// Writes `query_count * k` ids and distances, query-major, padding with id
/// `-1` and distance `FLT_MAX`. A `breadth <= 0` selects the default.
///
/// # Safety
///
/// `queries` must be valid for reads of `query_count * dimension` floats;
/// `out_ids` and `out_distances` for writes of `query_count * k` elements.
#[no_mangle]
pub unsafe extern "C" fn ihm_search(
    handle: HandleRef,
    k: i64,
    breadth: i64,
    query_count: i64,
    queries: *const f32,
    method_type: c_int,
    out_ids: *mut i64,
    out_distances: *mut f32,
) -> bool {
    call(false, || {
        let k = non_negative(k, "k")?;
        let nq = non_negative(query_count, "query_count")?;
        let breadth = RuntimeConfig::global().breadth(breadth);

        let results = registry().with_handle(handle, |h| {
            let queries = slice(queries, elements(nq, h.dimension(), "queries")?, "queries")?;
            facade::search(h, k, breadth, queries, method_type)
        })?;

        let out_ids = slice_mut(out_ids, results.ids.len(), "out_ids")?;
        let out_distances = slice_mut(out_distances, results.distances.len(), "out_distances")?;
        out_ids.copy_from_slice(&results.ids);
        out_distances.copy_from_slice(&results.distances);
        Ok(true)
    })
}

/// Remove every vector stored under one of `ids`. Returns the new total,
/// or `-1`.
///
/// # Safety
///
/// `ids` must be valid for reads of `count` ids.
#[no_mangle]
pub unsafe extern "C" fn ihm_remove(handle: HandleRef, count: i64, ids: *const i64, method_type: c_int) -> i64 {
    call(-1, || {
        let ids = slice(ids, non_negative(count, "count")?, "ids")?;
        let remaining = registry().with_handle(handle, |h| facade::remove(h, ids, method_type))?;
        Ok(total(remaining))
    })
}

/// Build a quantized graph index after its objects are added.
#[no_mangle]
pub extern "C" fn ihm_build(handle: HandleRef, method_type: c_int) -> bool {
    call(false, || {
        registry().with_handle(handle, |h| facade::build(h, method_type))?;
        Ok(true)
    })
}

/// Number of stored vectors, or `-1`.
#[no_mangle]
pub extern "C" fn ihm_ntotal(handle: HandleRef, method_type: c_int) -> i64 {
    call(-1, || Ok(total(registry().with_handle(handle, |h| facade::ntotal(h, method_type))?)))
}

/// Vector width of the index (bits, for binary indexes), or `-1`.
#[no_mangle]
pub extern "C" fn ihm_dimension(handle: HandleRef, method_type: c_int) -> i64 {
    call(-1, || Ok(total(registry().with_handle(handle, |h| facade::dimension(h, method_type))?)))
}

/// Copy the vector stored under `id` into `out_vector`.
///
/// `capacity` is the length of `out_vector` in floats and must be at least
/// the index dimension.
///
/// # Safety
///
/// `out_vector` must be valid for writes of `capacity` floats.
#[no_mangle]
pub unsafe extern "C" fn ihm_get_object(
    handle: HandleRef,
    id: i64,
    method_type: c_int,
    out_vector: *mut f32,
    capacity: i64,
) -> bool {
    call(false, || {
        let capacity = non_negative(capacity, "capacity")?;
        let vector = registry().with_handle(handle, |h| facade::get_object(h, id, method_type))?;
        if vector.len() > capacity {
            return Err(HandleError::InvalidConfiguration(format!(
                "output holds {capacity} floats, object has {}",
                vector.len()
            )));
        }
        slice_mut(out_vector, vector.len(), "out_vector")?.copy_from_slice(&vector);
        Ok(true)
    })
}

/// `1` if trained (built, for the graph), `0` if not, `-1` on failure.
#[no_mangle]
pub extern "C" fn ihm_is_trained(handle: HandleRef, method_type: c_int) -> c_int {
    call(-1, || {
        let trained = registry().with_handle(handle, |h| facade::is_trained(h, method_type))?;
        Ok(c_int::from(trained))
    })
}

/// Release a handle. Returns `false` if it was unknown or already released.
#[no_mangle]
pub extern "C" fn ihm_release(handle: HandleRef) -> bool {
    call(false, || {
        if registry().release(handle) {
            Ok(true)
        } else {
            Err(HandleError::InvalidHandle(handle))
        }
    })
}

/// Code of this thread's last failure; `0` after a successful call.
#[no_mangle]
pub extern "C" fn ihm_last_error_code() -> c_int {
    boundary::last_error_code()
}

/// Copy this thread's last failure message into `buf` (NUL-terminated,
/// truncated to `len`). Returns the full message length, `0` if none.
///
/// # Safety
///
/// `buf` must be null or valid for writes of `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn ihm_last_error_message(buf: *mut c_char, len: usize) -> usize {
    match boundary::last_error_message() {
        Some(message) => boundary::copy_message(&message, buf, len),
        None => {
            if !buf.is_null() && len > 0 {
                *buf = 0;
            }
            0
        }
    }
}
