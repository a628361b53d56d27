//! [`HeapFactory`] trait and structures that implement it.
//!
//! A heap factory is the allocator's source of raw memory. It hands out independently
//! sized arenas ("heap instances"), remembers every instance it created so that their
//! total size can be reported, and discards all of them on [`reset`](HeapFactory::reset).

use core::ptr::{null_mut, NonNull};

use libc::{mmap, munmap, MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE};
use tracing::{debug, error};

/// A contiguous region of memory obtained from a [`HeapFactory`].
///
/// A `Heap` references its memory but does not own it, the factory that created it does.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Heap {
    start: NonNull<u8>,
    size: usize,
}

impl Heap {
    /// # Safety
    /// `start` must be valid for reads and writes of `size` bytes.
    pub const unsafe fn from_raw_parts(start: NonNull<u8>, size: usize) -> Heap {
        Heap { start, size }
    }

    #[inline(always)]
    pub fn start(&self) -> NonNull<u8> {
        self.start
    }

    /// Total size of the heap instance in bytes.
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline(always)]
    pub fn end(&self) -> *mut u8 {
        self.start.as_ptr().wrapping_add(self.size)
    }
}

/// A trait for types that produce heap instances.
///
/// # Safety
/// * every heap returned by `new_instance` must be valid for reads and writes for its whole
///   size, must not overlap any other live instance, and must stay valid until `reset` is
///   called or the factory is dropped.
/// * moving the factory must not invalidate its instances.
pub unsafe trait HeapFactory {
    /// Creates a new heap instance of exactly `size` bytes
    /// or returns `Err(())` if the memory could not be obtained.
    fn new_instance(&mut self, size: usize) -> Result<Heap, ()>;

    /// Returns all live heap instances in creation order.
    fn instances(&self) -> &[Heap];

    /// Discards all heap instances. Any pointer into them becomes dangling.
    fn reset(&mut self);

    /// Sum of the sizes of all live heap instances.
    fn total_size(&self) -> usize {
        self.instances().iter().map(Heap::size).sum()
    }
}

/// A factory that maps every heap instance with [`libc::mmap`].
#[derive(Debug, Default)]
pub struct MmapHeapFactory {
    instances: Vec<Heap>,
    limit: Option<usize>,
}

impl MmapHeapFactory {
    pub const fn new() -> Self {
        MmapHeapFactory {
            instances: Vec::new(),
            limit: None,
        }
    }

    /// Creates a factory that refuses to map more than `limit` bytes in total.
    pub const fn with_limit(limit: usize) -> Self {
        MmapHeapFactory {
            instances: Vec::new(),
            limit: Some(limit),
        }
    }

    fn within_limit(&self, size: usize) -> bool {
        match self.limit {
            None => true,
            Some(limit) => self
                .total_size()
                .checked_add(size)
                .is_some_and(|total| total <= limit),
        }
    }
}

unsafe impl HeapFactory for MmapHeapFactory {
    fn new_instance(&mut self, size: usize) -> Result<Heap, ()> {
        if size == 0 || size > isize::MAX as usize {
            error!(size, "Refusing to map heap instance of invalid size.");
            return Err(());
        }
        if !self.within_limit(size) {
            debug!(size, limit = ?self.limit, "Heap instance would exceed the factory limit.");
            return Err(());
        }

        let p = unsafe {
            mmap(
                null_mut(),
                size,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if p == MAP_FAILED {
            error!(size, "mmap failed, no memory.");
            return Err(());
        }

        let start = NonNull::new(p.cast::<u8>()).ok_or(())?;
        let heap = unsafe { Heap::from_raw_parts(start, size) };
        debug!(?heap, "Mapped new heap instance.");
        self.instances.push(heap);
        Ok(heap)
    }

    fn instances(&self) -> &[Heap] {
        &self.instances
    }

    fn reset(&mut self) {
        for heap in self.instances.drain(..) {
            if unsafe { munmap(heap.start.as_ptr().cast(), heap.size) } != 0 {
                error!(?heap, "munmap failed.");
            }
        }
    }
}

impl Drop for MmapHeapFactory {
    fn drop(&mut self) {
        self.reset();
    }
}

unsafe impl<T: HeapFactory + ?Sized> HeapFactory for &mut T {
    fn new_instance(&mut self, size: usize) -> Result<Heap, ()> {
        (**self).new_instance(size)
    }

    fn instances(&self) -> &[Heap] {
        (**self).instances()
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mmap_factory_1() {
        let mut factory = MmapHeapFactory::new();
        let a = factory.new_instance(4096).unwrap();
        let b = factory.new_instance(1000).unwrap();
        assert_eq!(factory.instances(), &[a, b]);
        assert_eq!(factory.total_size(), 5096);
        assert_ne!(a.start(), b.start());
        assert_eq!(a.end() as usize - a.start().as_ptr() as usize, 4096);

        unsafe {
            // Fresh mappings are writable and zeroed.
            assert_eq!(*b.start().as_ptr(), 0);
            b.start().as_ptr().write_bytes(0xAB, b.size());
            assert_eq!(*b.start().as_ptr().add(999), 0xAB);
        }

        factory.reset();
        assert!(factory.instances().is_empty());
        assert_eq!(factory.total_size(), 0);
    }

    #[test]
    fn test_mmap_factory_2() {
        let mut factory = MmapHeapFactory::with_limit(8192);
        assert!(factory.new_instance(0).is_err());
        assert!(factory.new_instance(4096).is_ok());
        assert!(factory.new_instance(4096).is_ok());
        assert!(factory.new_instance(1).is_err());
        factory.reset();
        assert!(factory.new_instance(8192).is_ok());
    }

    #[test]
    fn test_mmap_factory_3() {
        fn map_one<F: HeapFactory>(mut factory: F) -> usize {
            factory.new_instance(64).unwrap();
            factory.instances().len()
        }

        let mut factory = MmapHeapFactory::new();
        assert_eq!(map_one(&mut factory), 1);
        assert_eq!(factory.total_size(), 64);
    }
}
