//! Defines the [`FreeBlock`] view and the [`Freelist`] threaded through free blocks.

use core::mem::{align_of, size_of};
use core::ptr::{null_mut, NonNull};

use super::block::{Block, HEADER_ALIGN, HEADER_SIZE};

pub const FREE_BLOCK_SIZE: usize = size_of::<FreeBlock>();
pub const FREE_BLOCK_ALIGN: usize = align_of::<FreeBlock>();

/// Bytes of payload a free block needs to hold its freelist links.
pub const LINKS_SIZE: usize = FREE_BLOCK_SIZE - HEADER_SIZE;

/// A [`Block`] that is currently free.
///
/// Free blocks reuse the first bytes of their payload for the `prev_free`/`next_free`
/// links, so a `FreeBlock` is the same memory as its [`Block`] header, seen while
/// [`Block::is_free`] holds. The links are meaningless once the block is handed out.
#[derive(Debug)]
#[repr(C)]
pub struct FreeBlock {
    block: Block,
    prev_free: *mut FreeBlock,
    next_free: *mut FreeBlock,
}

impl FreeBlock {
    /// Reinterprets a free block header as a [`FreeBlock`].
    ///
    /// # Safety
    /// `block` must point to a header whose payload is at least [`LINKS_SIZE`] bytes.
    #[inline(always)]
    pub unsafe fn from_block(block: *mut Block) -> *mut FreeBlock {
        debug_assert!((*block).is_free(), "Only free blocks can be viewed as FreeBlock.");
        debug_assert!((*block).size() >= LINKS_SIZE);
        block.cast()
    }

    #[inline(always)]
    pub fn as_block(node: *mut FreeBlock) -> *mut Block {
        node.cast()
    }

    #[inline(always)]
    pub fn prev_free(&self) -> *mut FreeBlock {
        self.prev_free
    }

    #[inline(always)]
    pub fn set_prev_free(&mut self, prev: *mut FreeBlock) {
        self.prev_free = prev;
    }

    #[inline(always)]
    pub fn next_free(&self) -> *mut FreeBlock {
        self.next_free
    }

    #[inline(always)]
    pub fn set_next_free(&mut self, next: *mut FreeBlock) {
        self.next_free = next;
    }
}

/// An intrusive doubly linked list of every free block, in no particular physical order.
#[derive(Debug)]
#[repr(C)]
pub struct Freelist {
    head: *mut FreeBlock,
    len: usize,
}

impl Freelist {
    /// Creates an empty Freelist.
    #[inline]
    pub const fn new() -> Self {
        Freelist {
            head: null_mut(),
            len: 0,
        }
    }

    /// Adds the free block `node` to the front of the Freelist.
    /// This operation has a time complexity of *O*(1).
    ///
    /// # Safety
    /// This function is unsafe since it assumes that `node` is a free block which is not
    /// currently part of the list.
    pub unsafe fn push_front(&mut self, node: *mut FreeBlock) {
        debug_assert_eq!(node as usize % HEADER_ALIGN, 0);
        debug_assert!((*node).block.is_free());

        (*node).prev_free = null_mut();
        (*node).next_free = self.head;
        if !self.head.is_null() {
            (*self.head).prev_free = node;
        }
        self.head = node;
        self.len += 1;
    }

    /// Removes `node` from the list and clears its links.
    /// This operation has a time complexity of *O*(1).
    ///
    /// # Safety
    /// This function is unsafe since it assumes that `node` is part of the list.
    pub unsafe fn remove(&mut self, node: *mut FreeBlock) {
        let prev = (*node).prev_free;
        let next = (*node).next_free;
        match prev.is_null() {
            true => self.head = next,
            false => (*prev).next_free = next,
        }
        if !next.is_null() {
            (*next).prev_free = prev;
        }
        (*node).prev_free = null_mut();
        (*node).next_free = null_mut();
        self.len -= 1;
    }

    /// Returns the head of the list or `None` if the list is empty.
    #[inline]
    pub fn head(&self) -> Option<NonNull<FreeBlock>> {
        NonNull::new(self.head)
    }

    /// Number of blocks currently in the list.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Iterates over the list from head to tail.
    ///
    /// # Safety
    /// No node may be added or removed while the iterator is alive.
    pub unsafe fn iter(&self) -> impl Iterator<Item = *mut FreeBlock> + '_ {
        let mut p = self.head;
        core::iter::from_fn(move || {
            if p.is_null() {
                return None;
            }
            let current = p;
            p = unsafe { (*p).next_free };
            Some(current)
        })
    }
}

impl Default for Freelist {
    fn default() -> Self {
        Freelist::new()
    }
}
