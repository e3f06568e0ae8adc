
//! Explicit state that is threaded through all reading and writing calls:
//! allocation limits, image size limits, the worker count,
//! and the cooperative cancellation token.
//! There are no hidden process-wide settings.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use crate::error::{Error, UnitResult};


/// The default allocation ceiling of two gibibytes per chunk-sized request.
pub const DEFAULT_MAX_ALLOCATION: usize = 2 * 1024 * 1024 * 1024;

/// The default maximum image extent of 65536 pixels per axis.
pub const DEFAULT_MAX_IMAGE_DIMENSION: usize = 65536;

/// A token that can be triggered from another thread
/// to stop a running read or write at the next chunk boundary.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {

    /// Create a token that has not been triggered.
    pub fn new() -> Self { Self::default() }

    /// Request cancellation. The running operation will return
    /// `Error::Cancelled` at its next chunk boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Return `Error::Cancelled` if cancellation has been requested.
    pub fn check(&self) -> UnitResult {
        if self.is_cancelled() { Err(Error::Cancelled) } else { Ok(()) }
    }
}


/// Limits and shared handles for one read or write call.
/// The same context value can be reused across calls.
#[derive(Debug, Clone)]
pub struct CodecContext {

    /// Upper bound in bytes for any single chunk-sized allocation.
    /// Exceeding requests fail with `Error::MemoryLimit`
    /// before any memory is taken.
    pub max_allocation: usize,

    /// Upper bound for the width and height of any image part.
    pub max_image_dimension: usize,

    /// How many chunks may be compressed or decompressed concurrently.
    /// One means strictly sequential operation on the calling thread.
    pub worker_count: usize,

    /// Checked at every chunk boundary.
    pub cancellation: CancellationToken,
}

impl Default for CodecContext {
    fn default() -> Self {
        CodecContext {
            max_allocation: DEFAULT_MAX_ALLOCATION,
            max_image_dimension: DEFAULT_MAX_IMAGE_DIMENSION,
            worker_count: available_parallelism(),
            cancellation: CancellationToken::new(),
        }
    }
}

impl CodecContext {

    /// A context with default limits.
    pub fn new() -> Self { Self::default() }

    /// Use the specified allocation ceiling.
    pub fn with_max_allocation(self, max_allocation: usize) -> Self {
        Self { max_allocation, ..self }
    }

    /// Use the specified maximum image extent per axis.
    pub fn with_max_image_dimension(self, max_image_dimension: usize) -> Self {
        Self { max_image_dimension, ..self }
    }

    /// Use the specified number of codec workers.
    pub fn with_worker_count(self, worker_count: usize) -> Self {
        Self { worker_count: worker_count.max(1), ..self }
    }

    /// Use the specified cancellation token.
    pub fn with_cancellation(self, cancellation: CancellationToken) -> Self {
        Self { cancellation, ..self }
    }

    /// Check a single allocation request against the ceiling.
    /// Call this before allocating any chunk-sized buffer.
    pub fn check_allocation(&self, requested_bytes: usize) -> UnitResult {
        if requested_bytes > self.max_allocation {
            Err(Error::MemoryLimit { requested: requested_bytes, limit: self.max_allocation })
        }
        else { Ok(()) }
    }
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism().map_or(1, |count| count.get())
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn allocation_limit_rejects_before_allocating() {
        let context = CodecContext::new().with_max_allocation(1024);
        assert!(context.check_allocation(1024).is_ok());

        match context.check_allocation(1025) {
            Err(Error::MemoryLimit { requested: 1025, limit: 1024 }) => {},
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn cancellation_is_sticky_and_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();

        assert!(token.check().is_ok());
        clone.cancel();

        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(Error::Cancelled)));
    }
}
