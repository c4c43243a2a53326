//! Per-thread error slot and the guard every export runs inside.

use std::cell::RefCell;
use std::ffi::c_char;
use std::panic::{self, AssertUnwindSafe};

use index_core::error::panic_message;
use index_core::{HandleError, Result};

struct LastError {
    code: i32,
    message: String,
}

thread_local! {
    static LAST_ERROR: RefCell<Option<LastError>> = const { RefCell::new(None) };
}

fn record(err: &HandleError) {
    tracing::warn!(code = err.code(), error = %err, "boundary call failed");
    LAST_ERROR.with(|slot| {
        *slot.borrow_mut() = Some(LastError {
            code: err.code(),
            message: err.to_string(),
        })
    });
}

fn clear() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// Run one boundary call.
///
/// Clears the error slot, runs `f` with panics caught, and on any failure
/// records it and returns `failure`.
pub fn call<T, F>(failure: T, f: F) -> T
where
    F: FnOnce() -> Result<T>,
{
    clear();
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => value,
        Ok(Err(err)) => {
            record(&err);
            failure
        }
        Err(payload) => {
            record(&HandleError::NativeFailure(panic_message(payload.as_ref())));
            failure
        }
    }
}

/// Code of this thread's last failure, `0` if the last call succeeded.
pub fn last_error_code() -> i32 {
    LAST_ERROR.with(|slot| slot.borrow().as_ref().map_or(0, |e| e.code))
}

/// This thread's last failure message, if any.
pub fn last_error_message() -> Option<String> {
    LAST_ERROR.with(|slot| slot.borrow().as_ref().map(|e| e.message.clone()))
}

/// Copy `message` into `buf` as a NUL-terminated string, truncating to
/// fit. Returns the full message length in bytes, without the NUL.
///
/// # Safety
///
/// `buf` must be null or valid for writes of `len` bytes.
pub unsafe fn copy_message(message: &str, buf: *mut c_char, len: usize) -> usize {
    if !buf.is_null() && len > 0 {
        let bytes = message.as_bytes();
        let n = bytes.len().min(len - 1);
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf.cast::<u8>(), n);
        *buf.add(n) = 0;
    }
    message.len()
}

/// Borrow `len` elements at `ptr`, rejecting a null pointer with data.
///
/// # Safety
///
/// When `len > 0`, `ptr` must be valid for reads of `len` elements for the
/// returned lifetime.
pub unsafe fn slice<'a, T>(ptr: *const T, len: usize, what: &str) -> Result<&'a [T]> {
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err(HandleError::InvalidConfiguration(format!("{what} pointer is null")));
    }
    Ok(std::slice::from_raw_parts(ptr, len))
}

/// Mutable counterpart of [`slice`].
///
/// # Safety
///
/// When `len > 0`, `ptr` must be valid for writes of `len` elements for the
/// returned lifetime and not aliased.
pub unsafe fn slice_mut<'a, T>(ptr: *mut T, len: usize, what: &str) -> Result<&'a mut [T]> {
    if len == 0 {
        return Ok(&mut []);
    }
    if ptr.is_null() {
        return Err(HandleError::InvalidConfiguration(format!("{what} pointer is null")));
    }
    Ok(std::slice::from_raw_parts_mut(ptr, len))
}

/// Convert a boundary count to `usize`.
pub fn non_negative(value: i64, what: &str) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| HandleError::InvalidConfiguration(format!("{what} must not be negative, got {value}")))
}

/// Number of values in `rows` vectors of `width`, rejecting overflow.
pub fn elements(rows: usize, width: usize, what: &str) -> Result<usize> {
    rows.checked_mul(width).ok_or_else(|| {
        HandleError::InvalidConfiguration(format!("{what}: {rows} rows of {width} values overflow"))
    })
}
