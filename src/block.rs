//! Defines the [`Block`] header and associated constants.

use core::mem::{align_of, size_of};
use core::ptr::null_mut;

pub const HEADER_SIZE: usize = size_of::<Block>();
pub const HEADER_ALIGN: usize = align_of::<Block>();

/// The header placed at the start of every block on the heap, occupied or free.
///
/// A block's payload starts right after its header and spans `size` bytes, so the header of
/// the physically next block always lives at `payload + size`. `prev` and `next` link the
/// physically adjacent blocks of the same heap instance and are null at its boundaries.
///
/// This is a plain record: it performs no validation of its own and every linkage
/// invariant is maintained by [`BlockMalloc`](crate::allocators::BlockMalloc).
#[derive(Debug)]
#[repr(C)]
pub struct Block {
    prev: *mut Block,
    next: *mut Block,
    size: usize,
    is_free: bool,
}

impl Block {
    /// Creates a detached header with the specified payload size and free status.
    #[inline(always)]
    pub const fn new(size: usize, is_free: bool) -> Block {
        Block {
            prev: null_mut(),
            next: null_mut(),
            size,
            is_free,
        }
    }

    /// Returns the size of the block payload (excludes the size of the header itself).
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline(always)]
    pub fn resize(&mut self, size: usize) {
        self.size = size;
    }

    #[inline(always)]
    pub fn prev(&self) -> *mut Block {
        self.prev
    }

    #[inline(always)]
    pub fn set_prev(&mut self, prev: *mut Block) {
        self.prev = prev;
    }

    #[inline(always)]
    pub fn next(&self) -> *mut Block {
        self.next
    }

    #[inline(always)]
    pub fn set_next(&mut self, next: *mut Block) {
        self.next = next;
    }

    #[inline(always)]
    pub fn is_free(&self) -> bool {
        self.is_free
    }

    #[inline(always)]
    pub fn set_free(&mut self, is_free: bool) {
        self.is_free = is_free;
    }

    /// Returns a pointer to the payload of the block starting at `block`.
    ///
    /// # Safety
    /// `block` must point to a header inside a heap instance.
    #[inline(always)]
    pub unsafe fn payload(block: *mut Block) -> *mut u8 {
        block.cast::<u8>().add(HEADER_SIZE)
    }

    /// Returns the header owning the payload at `payload`.
    ///
    /// # Safety
    /// `payload` must have been obtained from [`Block::payload`].
    #[inline(always)]
    pub unsafe fn from_payload(payload: *mut u8) -> *mut Block {
        payload.sub(HEADER_SIZE).cast()
    }

    /// Returns the address one past the end of the block's payload, which is where the
    /// physically next block starts (or the end of the heap instance).
    ///
    /// # Safety
    /// `block` must point to a valid header.
    #[inline(always)]
    pub unsafe fn end(block: *mut Block) -> *mut u8 {
        Block::payload(block).add((*block).size)
    }
}
