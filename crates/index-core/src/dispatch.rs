//! Method-tag routing and the boundary handle registry.
//!
//! Callers outside Rust hold handles as opaque [`HandleRef`] numbers, never
//! as pointers. The registry owns every live handle; each operation names
//! the method tag it expects, and the tag is checked against the handle
//! before any engine code runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};

use crate::descriptor::MethodType;
use crate::error::{HandleError, Result};
use crate::handle::IndexHandle;

/// Opaque boundary reference to a registered handle. Never `0`.
pub type HandleRef = u64;

/// Map a raw method tag to a method, rejecting unknown tags.
pub fn resolve_method(raw: i32) -> Result<MethodType> {
    MethodType::from_raw(raw).ok_or(HandleError::UnsupportedMethod(raw))
}

/// Check that `raw` names the method `handle` was built with.
pub fn ensure_method(handle: &IndexHandle, raw: i32) -> Result<MethodType> {
    let requested = resolve_method(raw)?;
    if handle.method() != requested {
        return Err(HandleError::TypeMismatch {
            actual: handle.method(),
            requested,
        });
    }
    Ok(requested)
}

/// Owner of every handle handed across the boundary.
///
/// Each handle sits behind its own mutex, so calls on one handle are
/// serialized while different handles proceed independently.
pub struct HandleRegistry {
    next: AtomicU64,
    handles: RwLock<HashMap<HandleRef, Arc<Mutex<IndexHandle>>>>,
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// Process-wide registry used by the C ABI.
    pub fn global() -> &'static HandleRegistry {
        static GLOBAL: OnceLock<HandleRegistry> = OnceLock::new();
        GLOBAL.get_or_init(HandleRegistry::new)
    }

    /// Take ownership of `handle` and return its reference.
    pub fn insert(&self, handle: IndexHandle) -> HandleRef {
        let handle_ref = self.next.fetch_add(1, Ordering::Relaxed);
        let method = handle.method();
        self.handles.write().insert(handle_ref, Arc::new(Mutex::new(handle)));
        tracing::debug!(handle = handle_ref, %method, "registered handle");
        handle_ref
    }

    /// Run `f` on the handle behind `handle_ref` with its lock held.
    pub fn with_handle<T, F>(&self, handle_ref: HandleRef, f: F) -> Result<T>
    where
        F: FnOnce(&mut IndexHandle) -> Result<T>,
    {
        let slot = self
            .handles
            .read()
            .get(&handle_ref)
            .cloned()
            .ok_or(HandleError::InvalidHandle(handle_ref))?;
        let mut handle = slot.lock();
        f(&mut handle)
    }

    /// Unregister and drop a handle. Returns `false` if `handle_ref` is
    /// unknown or was already released.
    ///
    /// A call still running on the handle keeps it alive until it returns;
    /// the handle is dropped exactly once either way.
    pub fn release(&self, handle_ref: HandleRef) -> bool {
        let Some(slot) = self.handles.write().remove(&handle_ref) else {
            tracing::debug!(handle = handle_ref, "release of unknown handle ignored");
            return false;
        };
        if let Some(handle) = Arc::into_inner(slot) {
            handle.into_inner().release();
        }
        true
    }

    pub fn contains(&self, handle_ref: HandleRef) -> bool {
        self.handles.read().contains_key(&handle_ref)
    }

    pub fn len(&self) -> usize {
        self.handles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.read().is_empty()
    }
}
