//! Cache-line alignment for hot-path synchronization primitives.
//!
//! Provides [`CachePadded<T>`] to prevent false sharing between data
//! accessed by different threads. The scheduler wraps its queue mutex,
//! condition variable and observer mutex in it so that producers hammering
//! one lock do not invalidate the cache line of another.

use core::ops::{Deref, DerefMut};

/// The cache line size in bytes for the target platform.
///
/// 64 bytes is correct for x86-64, ARM Cortex-A and Apple Silicon. Some
/// POWER and z/Architecture CPUs use 128 bytes, but 64 is the common
/// denominator and sufficient for preventing most false sharing.
pub const CACHE_LINE_SIZE: usize = 64;

/// A wrapper that aligns and pads its contents to a cache line boundary.
///
/// The struct is `#[repr(C, align(64))]`, guaranteeing that the start
/// address is 64-byte aligned and the total size is a multiple of 64 bytes.
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct CachePadded<T> {
    value: T,
}

impl<T> CachePadded<T> {
    /// Creates a new cache-padded value.
    #[must_use]
    #[inline]
    pub const fn new(value: T) -> Self {
        Self { value }
    }

    /// Consumes the wrapper and returns the inner value.
    #[must_use]
    #[inline]
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for CachePadded<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for CachePadded<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}
