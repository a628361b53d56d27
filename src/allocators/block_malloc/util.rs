//! Utility functions specific to the [`BlockMalloc`](super::BlockMalloc) allocator.

use super::{BLOCK_CONTENT_MIN_SIZE, BLOCK_MIN_SIZE};
use crate::block::{HEADER_ALIGN, HEADER_SIZE};
use crate::util::find_divisible;

/// Augments `size` to a payload size that can be used for an allocation
/// or returns `Err(())` if the size can not be augmented.
#[inline]
pub fn augment_size(size: usize) -> Result<usize, ()> {
    // Size of objects should not exceed isize::MAX.
    // https://doc.rust-lang.org/std/ptr/index.html#allocated-object
    match find_divisible(size.max(BLOCK_CONTENT_MIN_SIZE), HEADER_ALIGN) {
        Some(new_size) if new_size as isize > 0 => Ok(new_size),
        _ => Err(()),
    }
}

/// Returns the size of a heap instance able to hold a single block with a payload of
/// `obj_size` bytes, but never less than `arena_size`.
#[inline]
pub fn instance_size(obj_size: usize, arena_size: usize) -> Result<usize, ()> {
    let needed = obj_size.checked_add(HEADER_SIZE).ok_or(())?;
    find_divisible(needed.max(arena_size).max(BLOCK_MIN_SIZE), HEADER_ALIGN).ok_or(())
}

/// Returns whether a block with payload `block_size` holding an object of `obj_size`
/// bytes leaves enough room behind the object for a free block.
#[inline(always)]
pub fn can_split(block_size: usize, obj_size: usize) -> bool {
    block_size >= obj_size && block_size - obj_size >= BLOCK_MIN_SIZE
}
