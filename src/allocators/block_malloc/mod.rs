//! A singlethreaded boundary-tag allocator.
//!
// For a general view of the allocator's operational semantics see the [`crate`] level documentation.
//
// # Additional implementation notes
// ## Object requirements and size augmentation
// Every block header is `HEADER_ALIGN`-aligned and every payload size is a multiple of
// `HEADER_ALIGN` no smaller than `BLOCK_CONTENT_MIN_SIZE`, so that any block can later be
// turned into a free block holding its freelist links and so that the header following a
// payload is again properly aligned. Sizes passed to malloc/realloc are adjusted to these
// requirements by `util::augment_size`.
//
// ## Heap instances
// Every heap instance carries its own physical chain of blocks. The first block of an
// instance has a null `prev` and the last one a null `next`, so coalescing never crosses
// instance boundaries. The freelist spans all instances.

use self::util::{augment_size, can_split, instance_size};
use super::Malloc;
use crate::block::{Block, HEADER_ALIGN, HEADER_SIZE};
use crate::free_block::{FreeBlock, Freelist, FREE_BLOCK_ALIGN, LINKS_SIZE};
use crate::heaps::{Heap, HeapFactory};
use crate::util::{find_aligned, raw_ptr};

use core::fmt::{self, Debug};
use core::ptr::{copy_nonoverlapping, null_mut, NonNull};

use rustc_hash::FxHashSet;
use static_assertions::const_assert;
use tracing::{debug, error, instrument, Level};

mod util;

pub(crate) const BLOCK_CONTENT_MIN_SIZE: usize = LINKS_SIZE;
pub(crate) const BLOCK_MIN_SIZE: usize = HEADER_SIZE + BLOCK_CONTENT_MIN_SIZE;

// Freelist links must fit in the payload of the smallest block and keep its alignment.
const_assert!(FREE_BLOCK_ALIGN == HEADER_ALIGN);
const_assert!(BLOCK_CONTENT_MIN_SIZE % HEADER_ALIGN == 0);
const_assert!(HEADER_SIZE % HEADER_ALIGN == 0);

/// A singlethreaded first-fit allocator over heap instances produced by a [`HeapFactory`].
pub struct BlockMalloc<F: HeapFactory> {
    freelist: Freelist,
    factory: F,
    arena_size: usize,
}

impl<F: HeapFactory> Debug for BlockMalloc<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockMalloc")
            .field("freelist", &self.freelist)
            .field("arena_size", &self.arena_size)
            .field("instances", &self.factory.instances().len())
            .finish()
    }
}

/// Summary of a heap that passed [`BlockMalloc::validate`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub instances: usize,
    pub blocks: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    pub used_bytes: usize,
}

/// The first structural inconsistency found by [`BlockMalloc::validate`].
/// Addresses are those of the offending block headers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Corruption {
    /// A `next` link does not point right behind the block's payload.
    Gap { block: usize },
    /// A block's `prev` link does not point to its physical predecessor.
    BrokenBackLink { block: usize },
    /// The chain of an instance does not end exactly at the instance end.
    Overrun { block: usize },
    /// Two physically adjacent blocks are both free.
    AdjacentFree { block: usize },
    /// A block on the freelist is not a free block of any instance.
    StrayFreelistNode { block: usize },
    /// The freelist and the physical chains disagree on the number of free blocks.
    FreelistMismatch { chain: usize, freelist: usize },
}

impl<F: HeapFactory> BlockMalloc<F> {
    /// Creates an allocator drawing heap instances of at least `arena_size` bytes
    /// from `factory`. No memory is requested until [`initialize_heap`](Malloc::initialize_heap).
    ///
    /// The allocator becomes the only user of `factory`, it resets the factory whenever it
    /// is reset itself.
    pub fn with_factory(factory: F, arena_size: usize) -> Self {
        BlockMalloc {
            freelist: Freelist::new(),
            factory,
            arena_size,
        }
    }

    #[inline]
    pub fn heap_factory(&self) -> &F {
        &self.factory
    }

    /// Returns the number of usable bytes of the allocation at `ptr`,
    /// which is at least the size that was requested for it.
    ///
    /// # Safety
    /// `ptr` must be a live pointer returned by a [`BlockMalloc`].
    #[inline]
    pub unsafe fn usable_size(ptr: *const u8) -> usize {
        let block = Block::from_payload(ptr.cast_mut());
        debug_assert!(!(*block).is_free(), "Objects should be preceded by in-use headers.");
        (*block).size()
    }

    #[instrument(level = "debug", ret(level = Level::DEBUG), err(Debug, level = Level::DEBUG))]
    unsafe fn __alloc(&mut self, size: usize) -> Result<NonNull<u8>, ()> {
        let obj_size = augment_size(size)?;
        debug!(obj_size, "Size augmented.");

        let obj_start = match self.place_in_first_free_block(obj_size) {
            Ok(p) => {
                debug!(obj_start = ?p.as_ptr(), "Found free block to accomodate object.");
                p
            }
            Err(()) => {
                debug!("Couldn't find free block to accomodate object, requesting a new heap instance.");
                self.grow_and_place(obj_size)?
            }
        };

        Ok(obj_start)
    }

    #[instrument(level = "debug", ret(level = Level::DEBUG), err(Debug, level = Level::DEBUG))]
    unsafe fn __realloc(&mut self, obj_start: *mut u8, size: usize) -> Result<NonNull<u8>, ()> {
        let new_obj_size = augment_size(size)?;
        debug!(augmented_size = new_obj_size, "Augmented new size.");

        let block = Block::from_payload(obj_start);
        debug_assert!(
            !(*block).is_free(),
            "Objects should be preceded by in-use headers."
        );
        let obj_size = (*block).size();

        if self.try_adjust(block, new_obj_size).is_ok() {
            return Ok(NonNull::new_unchecked(obj_start));
        }
        debug_assert!(new_obj_size > obj_size);
        debug!("Couldn't adjust current block, attempting reallocation to a new block.");

        let new_obj_start = self.__alloc(size)?.as_ptr();
        copy_nonoverlapping(obj_start, new_obj_start, obj_size.min(new_obj_size));
        self.free_block(block);
        Ok(NonNull::new_unchecked(new_obj_start))
    }

    /// Tries to adjust (that is shrink or expand) an occupied block for an object of
    /// `new_obj_size` bytes without moving it.
    ///
    /// # Notes
    /// Shrinks always succeed and give any trailing space back to the freelist. Grows succeed
    /// only if the physically next block is free and large enough to be absorbed, otherwise
    /// `Err(())` is returned and the block is left untouched.
    ///
    /// # Safety
    /// `block` must be a valid occupied block and `new_obj_size` must be augmented.
    #[instrument(level = "trace", ret(level = Level::TRACE), err(Debug, level = Level::TRACE))]
    unsafe fn try_adjust(&mut self, block: *mut Block, new_obj_size: usize) -> Result<(), ()> {
        if (*block).size() < new_obj_size {
            let next = (*block).next();
            if next.is_null() || !(*next).is_free() {
                return Err(());
            }
            match (*block).size().checked_add(HEADER_SIZE + (*next).size()) {
                Some(combined) if combined >= new_obj_size => {}
                _ => return Err(()),
            }

            self.freelist.remove(FreeBlock::from_block(next));
            Self::absorb(block, next);
            debug!(?next, size = (*block).size(), "Grew in place by absorbing successive free block.");
        }

        if can_split((*block).size(), new_obj_size) {
            let remainder = Self::split(block, new_obj_size);
            self.free_block(remainder);
        }
        Ok(())
    }

    /// Requests a new heap instance large enough for an object of `obj_size` bytes and
    /// places the object at its start.
    ///
    /// # Safety
    /// `obj_size` must be augmented.
    #[instrument(level = "debug", ret(level = Level::DEBUG), err(Debug, level = Level::ERROR))]
    unsafe fn grow_and_place(&mut self, obj_size: usize) -> Result<NonNull<u8>, ()> {
        let size = instance_size(obj_size, self.arena_size)?;
        let block = self
            .add_instance(size)
            .inspect_err(|_| error!(size, "Couldn't obtain a new heap instance."))?;

        if (*block).size() < obj_size {
            error!(?block, "New heap instance is too small for the object.");
            return Err(());
        }
        Ok(self.place(block, obj_size))
    }

    /// Obtains a heap instance of `size` bytes and turns it into a single free block.
    ///
    /// # Safety
    /// The freelist must be in a consistent state.
    #[instrument(level = "debug", ret(level = Level::DEBUG), err(Debug, level = Level::ERROR))]
    unsafe fn add_instance(&mut self, size: usize) -> Result<*mut Block, ()> {
        if size < BLOCK_MIN_SIZE {
            error!(size, "Heap instance would be too small to hold a block.");
            return Err(());
        }
        let heap = self.factory.new_instance(size)?;
        let Some((first, end)) = arena_bounds(&heap) else {
            error!(?heap, "Heap instance is too small to hold a block.");
            return Err(());
        };

        let content_size = end as usize - first as usize - HEADER_SIZE;
        first.write(Block::new(content_size, true));
        self.freelist.push_front(FreeBlock::from_block(first));
        debug!(?heap, ?first, content_size, "Carved new heap instance.");
        Ok(first)
    }

    /// Hands out the free block `block` for an object of `obj_size` bytes,
    /// splitting off any trailing space large enough to form a free block.
    ///
    /// # Safety
    /// `block` must be a free block on the freelist with at least `obj_size` payload bytes.
    #[instrument(level = "trace")]
    unsafe fn place(&mut self, block: *mut Block, obj_size: usize) -> NonNull<u8> {
        debug_assert!((*block).is_free(), "Block should be free.");
        debug_assert!((*block).size() >= obj_size);

        self.freelist.remove(FreeBlock::from_block(block));
        (*block).set_free(false);

        if can_split((*block).size(), obj_size) {
            let remainder = Self::split(block, obj_size);
            debug!(?remainder, "Placing a free block as right padding.");
            self.free_block(remainder);
        }

        NonNull::new_unchecked(Block::payload(block))
    }

    /// Shrinks `block` to `obj_size` payload bytes and creates a new in-use block in the
    /// space left behind it. Returns the new block.
    ///
    /// # Safety
    /// `block` must be an in-use block with `can_split(size, obj_size)`.
    #[inline]
    unsafe fn split(block: *mut Block, obj_size: usize) -> *mut Block {
        debug_assert!(can_split((*block).size(), obj_size));

        let remainder: *mut Block = Block::payload(block).add(obj_size).cast();
        let mut header = Block::new((*block).size() - obj_size - HEADER_SIZE, false);
        header.set_prev(block);
        header.set_next((*block).next());
        remainder.write(header);

        let next = (*block).next();
        if !next.is_null() {
            (*next).set_prev(remainder);
        }
        (*block).set_next(remainder);
        (*block).resize(obj_size);
        remainder
    }

    /// Merges `victim`, the physical successor of `block`, into `block`.
    ///
    /// # Safety
    /// `victim` must be `block`'s successor and must not be on the freelist.
    #[inline]
    unsafe fn absorb(block: *mut Block, victim: *mut Block) {
        debug_assert_eq!((*block).next(), victim);

        (*block).resize((*block).size() + HEADER_SIZE + (*victim).size());
        let next = (*victim).next();
        (*block).set_next(next);
        if !next.is_null() {
            (*next).set_prev(block);
        }
    }

    /// Frees `block`, merging it with its free physical neighbours, and makes sure the
    /// resulting block is on the freelist.
    ///
    /// # Safety
    /// `block` must be an in-use block that is not referenced by any live object afterwards.
    #[instrument(level = "debug")]
    unsafe fn free_block(&mut self, block: *mut Block) {
        debug_assert!(!(*block).is_free(), "Block shouldn't be free already.");
        (*block).set_free(true);

        let next = (*block).next();
        if !next.is_null() && (*next).is_free() {
            self.freelist.remove(FreeBlock::from_block(next));
            Self::absorb(block, next);
            debug!(?next, size = (*block).size(), "Merged with successive free block.");
        }

        let prev = (*block).prev();
        if !prev.is_null() && (*prev).is_free() {
            // `prev` is already on the freelist and stays there.
            Self::absorb(prev, block);
            debug!(?prev, size = (*prev).size(), "Merged into preceding free block.");
            return;
        }

        self.freelist.push_front(FreeBlock::from_block(block));
    }

    /// Places an object of `obj_size` bytes into the first free block that can hold it.
    /// Returns a pointer to that object or `Err(())` if no free block is large enough.
    ///
    /// # Safety
    /// `obj_size` must be augmented.
    #[instrument(level = "trace", ret(level = Level::TRACE), err(Debug, level = Level::TRACE))]
    unsafe fn place_in_first_free_block(&mut self, obj_size: usize) -> Result<NonNull<u8>, ()> {
        let mut p: *mut FreeBlock = raw_ptr(self.freelist.head());

        while !p.is_null() {
            let block = FreeBlock::as_block(p);
            if (*block).size() >= obj_size {
                return Ok(self.place(block, obj_size));
            }
            p = (*p).next_free();
        }

        Err(())
    }

    /// Walks every heap instance and the freelist and checks that
    /// - the blocks of every instance tile it exactly, with consistent `prev`/`next` links,
    /// - no two physically adjacent blocks are free,
    /// - the freelist holds exactly the free blocks.
    pub fn validate(&self) -> Result<HeapStats, Corruption> {
        let mut stats = HeapStats::default();
        let mut free_blocks: FxHashSet<usize> = FxHashSet::default();

        for heap in self.factory.instances() {
            let Some((first, end)) = arena_bounds(heap) else {
                continue;
            };
            stats.instances += 1;

            let mut prev: *mut Block = null_mut();
            let mut block = first;
            unsafe {
                loop {
                    if (*block).prev() != prev {
                        return Err(Corruption::BrokenBackLink { block: block as usize });
                    }
                    if Block::end(block) > end {
                        return Err(Corruption::Overrun { block: block as usize });
                    }

                    stats.blocks += 1;
                    if (*block).is_free() {
                        if !prev.is_null() && (*prev).is_free() {
                            return Err(Corruption::AdjacentFree { block: block as usize });
                        }
                        stats.free_blocks += 1;
                        stats.free_bytes += (*block).size();
                        free_blocks.insert(block as usize);
                    } else {
                        stats.used_bytes += (*block).size();
                    }

                    let next = (*block).next();
                    if next.is_null() {
                        if Block::end(block) != end {
                            return Err(Corruption::Overrun { block: block as usize });
                        }
                        break;
                    }
                    if next.cast::<u8>() != Block::end(block) {
                        return Err(Corruption::Gap { block: block as usize });
                    }
                    prev = block;
                    block = next;
                }
            }
        }

        let mut listed = 0;
        let mut prev: *mut FreeBlock = null_mut();
        // One node past the chain's free blocks is enough to detect a cycle.
        for p in unsafe { self.freelist.iter() }.take(stats.free_blocks + 1) {
            let addr = p as usize;
            if !free_blocks.contains(&addr) || unsafe { (*p).prev_free() } != prev {
                return Err(Corruption::StrayFreelistNode { block: addr });
            }
            listed += 1;
            prev = p;
        }

        if listed != stats.free_blocks || listed != self.freelist.len() {
            return Err(Corruption::FreelistMismatch {
                chain: stats.free_blocks,
                freelist: listed,
            });
        }
        Ok(stats)
    }
}

/// Returns the first block header and the end of the block-carrying part of `heap`,
/// or `None` if the heap can not hold a single block.
fn arena_bounds(heap: &Heap) -> Option<(*mut Block, *mut u8)> {
    let first = find_aligned(heap.start().as_ptr(), HEADER_ALIGN)? as *mut u8;
    let available = (heap.end() as usize).checked_sub(first as usize)?;
    let usable = available - available % HEADER_ALIGN;
    if usable < BLOCK_MIN_SIZE {
        return None;
    }
    Some((first.cast(), first.wrapping_add(usable)))
}

//---------------impl Malloc for BlockMalloc---------------//

impl<F: HeapFactory> Malloc for BlockMalloc<F> {
    #[instrument(level = "info", err(Debug, level = Level::ERROR))]
    fn initialize_heap(&mut self) -> Result<(), ()> {
        let size = instance_size(0, self.arena_size)?;
        unsafe { self.add_instance(size).map(|_| ()) }
    }

    #[instrument(level = "info")]
    fn reset(&mut self) {
        self.freelist = Freelist::new();
        self.factory.reset();
    }

    fn malloc(&mut self, size: usize) -> *mut u8 {
        unsafe { raw_ptr(self.__alloc(size).ok()) }
    }

    #[instrument(level = "debug")]
    fn calloc(&mut self, nmemb: usize, size: usize) -> *mut u8 {
        let Some(total) = nmemb.checked_mul(size) else {
            debug!("calloc size overflows.");
            return null_mut();
        };
        unsafe {
            let Ok(obj_start) = self.__alloc(total) else {
                return null_mut();
            };
            obj_start.as_ptr().write_bytes(0, total);
            obj_start.as_ptr()
        }
    }

    unsafe fn realloc(&mut self, ptr: *mut u8, size: usize) -> *mut u8 {
        if ptr.is_null() {
            return self.malloc(size);
        }
        if size == 0 {
            self.free(ptr);
            return null_mut();
        }
        raw_ptr(self.__realloc(ptr, size).ok())
    }

    #[instrument(level = "debug")]
    unsafe fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        debug_assert_eq!(
            ptr as usize % HEADER_ALIGN,
            0,
            "All allocations should have header alignment."
        );

        let block = Block::from_payload(ptr);
        debug_assert!(
            !(*block).is_free(),
            "Allocations should be preceded by in-use headers."
        );
        debug_assert!(
            (*block).size() >= BLOCK_CONTENT_MIN_SIZE,
            "Allocation size should be at least {BLOCK_CONTENT_MIN_SIZE}."
        );

        self.free_block(block);
    }

    fn heap_instances(&self) -> &[Heap] {
        self.factory.instances()
    }
}

#[cfg(test)]
mod tests;
