//! Error channel between the native engines and the handle boundary.
//!
//! Engines report failures as [`NativeError`] values or, in the worst case,
//! by panicking. Neither is allowed to reach a caller as-is: every public
//! entry point converts them into a [`HandleError`], and panics are caught
//! with [`catch_native`] before they can unwind across the boundary.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

use thiserror::Error;

use crate::descriptor::MethodType;
use crate::VectorId;

/// Errors surfaced by the handle layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HandleError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid metric type: {0}")]
    InvalidMetric(i32),

    #[error("Invalid method type: {0}")]
    InvalidMethod(i32),

    #[error("Unsupported method type: {0}")]
    UnsupportedMethod(i32),

    #[error("Failed to allocate {method} index: {message}")]
    AllocationFailure { method: MethodType, message: String },

    #[error("I/O failure on {}: {message}", path.display())]
    IoFailure { path: PathBuf, message: String },

    #[error("Format mismatch in {}: {message}", path.display())]
    FormatMismatch { path: PathBuf, message: String },

    #[error("Method type mismatch: handle is {actual}, operation requested {requested}")]
    TypeMismatch {
        actual: MethodType,
        requested: MethodType,
    },

    #[error("{operation} is not supported by {method} indexes")]
    NotSupportedByVariant {
        method: MethodType,
        operation: &'static str,
    },

    #[error("Native failure: {0}")]
    NativeFailure(String),

    #[error("Unknown or released handle: {0}")]
    InvalidHandle(u64),

    #[error("Handle is unusable after an earlier native failure: {0}")]
    HandleFailed(String),
}

impl HandleError {
    /// Stable numeric code for boundary callers. `0` is reserved for success.
    pub fn code(&self) -> i32 {
        match self {
            HandleError::InvalidConfiguration(_) => 1,
            HandleError::InvalidMetric(_) => 2,
            HandleError::InvalidMethod(_) => 3,
            HandleError::UnsupportedMethod(_) => 4,
            HandleError::AllocationFailure { .. } => 5,
            HandleError::IoFailure { .. } => 6,
            HandleError::FormatMismatch { .. } => 7,
            HandleError::TypeMismatch { .. } => 8,
            HandleError::NotSupportedByVariant { .. } => 9,
            HandleError::NativeFailure(_) => 10,
            HandleError::InvalidHandle(_) => 11,
            HandleError::HandleFailed(_) => 12,
        }
    }
}

impl From<NativeError> for HandleError {
    fn from(err: NativeError) -> Self {
        HandleError::NativeFailure(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HandleError>;

/// Failures raised inside a native engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NativeError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Index is not trained")]
    NotTrained,

    #[error("Index is not built")]
    NotBuilt,

    #[error("Number of training points ({got}) should be at least as large as number of clusters ({need})")]
    InsufficientTrainingData { need: usize, got: usize },

    #[error("Index error: {0}")]
    IndexError(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Empty input")]
    EmptyInput,

    #[error("No vector stored under id {0}")]
    IdNotFound(VectorId),

    #[error("Inconsistent index state: {0}")]
    Inconsistent(String),
}

pub type NativeResult<T> = std::result::Result<T, NativeError>;

/// Run `f`, converting a panic into its message.
pub fn catch_native<T, F>(f: F) -> std::result::Result<T, String>
where
    F: FnOnce() -> T,
{
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(payload.as_ref()))
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic in native index".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catch_native_passes_values_through() {
        assert_eq!(catch_native(|| 41 + 1), Ok(42));
    }

    #[test]
    fn test_catch_native_captures_str_and_string_panics() {
        let caught = catch_native(|| -> () { panic!("boom") });
        assert_eq!(caught, Err("boom".to_string()));

        let code = 7;
        let caught = catch_native(|| -> () { panic!("bad code {code}") });
        assert_eq!(caught, Err("bad code 7".to_string()));
    }

    #[test]
    fn test_native_error_becomes_native_failure() {
        let err: HandleError = NativeError::NotTrained.into();
        assert_eq!(err, HandleError::NativeFailure("Index is not trained".to_string()));
        assert_eq!(err.code(), 10);
    }

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            HandleError::InvalidConfiguration(String::new()),
            HandleError::InvalidMetric(9),
            HandleError::InvalidMethod(9),
            HandleError::UnsupportedMethod(9),
            HandleError::AllocationFailure {
                method: MethodType::QuantizedIvf,
                message: String::new(),
            },
            HandleError::IoFailure {
                path: PathBuf::new(),
                message: String::new(),
            },
            HandleError::FormatMismatch {
                path: PathBuf::new(),
                message: String::new(),
            },
            HandleError::TypeMismatch {
                actual: MethodType::QuantizedIvf,
                requested: MethodType::BinaryIvf,
            },
            HandleError::NotSupportedByVariant {
                method: MethodType::QuantizedGraph,
                operation: "train",
            },
            HandleError::NativeFailure(String::new()),
            HandleError::InvalidHandle(0),
            HandleError::HandleFailed(String::new()),
        ];
        let mut codes: Vec<i32> = errors.iter().map(HandleError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(!codes.contains(&0));
    }
}
