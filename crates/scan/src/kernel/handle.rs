//! Owning wrappers around resources handed out by a table engine.
//!
//! Every resource an engine returns (snapshot, scan, scan-data iterator,
//! global scan state, selection vector) is wrapped in a [`KernelHandle`]
//! exactly once. The handle owns the resource, is movable but not copyable,
//! and releases the resource exactly once when dropped.

use std::fmt;
use std::ops::{Deref, DerefMut};

use tracing::trace;

use crate::{DeltaResult, DeltaTableError};

/// A resource owned by a [`KernelHandle`].
pub trait KernelResource: Send + Sync {
    /// Short name of the resource kind, used in logs and errors.
    fn kind(&self) -> &'static str;

    /// Give back whatever the engine associated with this resource.
    ///
    /// Called exactly once, when the owning handle is dropped.
    fn release(&mut self) {}
}

/// Exclusive owner of one engine resource.
pub struct KernelHandle<R: ?Sized + KernelResource> {
    inner: Box<R>,
}

impl<R: ?Sized + KernelResource> KernelHandle<R> {
    /// Wrap a resource.
    pub fn new(inner: Box<R>) -> Self {
        Self { inner }
    }

    /// Wrap a resource the engine may have failed to produce.
    pub fn try_new(inner: Option<Box<R>>, kind: &'static str) -> DeltaResult<Self> {
        inner
            .map(Self::new)
            .ok_or(DeltaTableError::NullHandle(kind))
    }

    /// Borrow the wrapped resource.
    pub fn get(&self) -> &R {
        &self.inner
    }

    /// Mutably borrow the wrapped resource.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

impl<R: KernelResource> KernelHandle<R> {
    /// Wrap a sized resource value.
    pub fn from_value(value: R) -> Self {
        Self::new(Box::new(value))
    }
}

impl<R: ?Sized + KernelResource> Deref for KernelHandle<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.inner
    }
}

impl<R: ?Sized + KernelResource> DerefMut for KernelHandle<R> {
    fn deref_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

impl<R: ?Sized + KernelResource> Drop for KernelHandle<R> {
    fn drop(&mut self) {
        trace!(kind = self.inner.kind(), "releasing kernel handle");
        self.inner.release();
    }
}

impl<R: ?Sized + KernelResource> fmt::Debug for KernelHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelHandle")
            .field("kind", &self.inner.kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    struct Counted(Arc<AtomicUsize>);

    impl KernelResource for Counted {
        fn kind(&self) -> &'static str {
            "counted"
        }

        fn release(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_release_runs_once_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let handle = KernelHandle::from_value(Counted(released.clone()));
        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(handle);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_moving_handle_does_not_release() {
        let released = Arc::new(AtomicUsize::new(0));
        let handle = KernelHandle::from_value(Counted(released.clone()));
        let moved = vec![handle];
        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(moved);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_null_handle_is_an_error() {
        let res = KernelHandle::<Counted>::try_new(None, "snapshot");
        assert!(matches!(res, Err(DeltaTableError::NullHandle("snapshot"))));
    }
}
