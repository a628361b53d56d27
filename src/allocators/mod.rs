//! The [`Malloc`] interface and the [`BlockMalloc`] allocator implementing it.

pub mod block_malloc;

pub use block_malloc::{BlockMalloc, Corruption, HeapStats};

use crate::heaps::Heap;

/// The C-style allocator entry points the benchmark harness drives.
///
/// Implementors own their heap source. [`reset`](Malloc::reset) discards every heap
/// instance together with all allocator state, and
/// [`initialize_heap`](Malloc::initialize_heap) must be called afterwards before the
/// allocator is used again.
pub trait Malloc {
    /// Prepares a fresh heap. Returns `Err(())` if no memory could be obtained.
    fn initialize_heap(&mut self) -> Result<(), ()>;

    /// Discards all heap instances and allocator state.
    fn reset(&mut self);

    /// Returns a pointer to at least `size` usable bytes or null on exhaustion.
    fn malloc(&mut self, size: usize) -> *mut u8;

    /// Returns a pointer to `nmemb * size` zeroed bytes, or null on exhaustion or if the
    /// product overflows.
    fn calloc(&mut self, nmemb: usize, size: usize) -> *mut u8;

    /// Resizes the allocation at `ptr` to `size` bytes, preserving its contents up to the
    /// smaller of the old and new sizes.
    ///
    /// # Safety
    /// `ptr` must be null or a live pointer returned by this allocator.
    unsafe fn realloc(&mut self, ptr: *mut u8, size: usize) -> *mut u8;

    /// Releases the allocation at `ptr`. Releasing null does nothing.
    ///
    /// # Safety
    /// `ptr` must be null or a live pointer returned by this allocator.
    unsafe fn free(&mut self, ptr: *mut u8);

    /// Every heap instance created since the last reset.
    fn heap_instances(&self) -> &[Heap];
}
