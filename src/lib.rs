//! A boundary-tag free-list allocator and a harness that replays recorded allocation
//! workloads against it.
//!
//! The crate has two halves. [`BlockMalloc`] manages raw memory handed out by a
//! [`HeapFactory`](heaps::HeapFactory) and implements the C allocator entry points (malloc, calloc, realloc,
//! free) through the [`Malloc`] trait. The [`bench`] module takes a recorded trace of such
//! calls and measures how fast an allocator replays it and how well it uses its memory.
//!
//! # Usage
//! ```
//! use almalloc::bench::{measure_utilization, TraceId, TraceLine, TracefileReader, UtilizationConfig};
//! use almalloc::heaps::MmapHeapFactory;
//! use almalloc::{BlockMalloc, Malloc};
//!
//! let mut allocator = BlockMalloc::with_factory(MmapHeapFactory::new(), 1000);
//! let trace = TracefileReader::from_lines(vec![
//!     TraceLine::malloc(10, TraceId(0x10)),
//!     TraceLine::malloc(20, TraceId(0x20)),
//!     TraceLine::free(TraceId(0x10)),
//!     TraceLine::free(TraceId(0x20)),
//! ]);
//! let utilization = measure_utilization(&trace, &mut allocator, UtilizationConfig::default()).unwrap();
//! assert_eq!(utilization.peak_live_bytes, 30);
//!
//! allocator.reset();
//! allocator.initialize_heap().unwrap();
//! let p = allocator.malloc(100);
//! assert!(!p.is_null());
//! unsafe { allocator.free(p) };
//! ```
//!
//! # Mode of operation
//! The allocator divides every heap instance into blocks:
//! - When an allocation is requested the freelist is searched for the first block that is
//!   large enough. If the block is larger than needed by at least the size of a minimal
//!   block, its tail is split off into a new free block.
//! - If no block is found the allocator asks its [heap factory](#heap-factories) for a new
//!   heap instance large enough for the object.
//! - When a block is freed it is merged with its free physical neighbours right away, so no
//!   two adjacent blocks are ever free, and the result is put on the freelist.
//! - A realloc shrinks in place, grows in place when the next block is free and large
//!   enough, and moves the object otherwise.
//!
//! ## Blocks
//! Each block starts with a [`Block`](block::Block) header holding the size of its payload,
//! whether it is free and links to the physically previous and next blocks. The links make
//! both neighbours reachable in *O*(1) without any boundary tag at the block's end.
//!
//! ## Freelist
//! The freelist is a doubly linked list embedded within the payload of all of the free
//! blocks. A free block is viewed as a [`FreeBlock`](free_block::FreeBlock), which is the
//! same header followed by the list links. Blocks are pushed to the front of the list when
//! freed and unlinked in *O*(1) when handed out or merged.
//!
//! ## Heap factories
//! A [`HeapFactory`] produces independent heap instances, reports their sizes and discards
//! all of them on reset. Every instance holds its own chain of blocks, blocks never merge
//! across instances. [`MmapHeapFactory`](heaps::MmapHeapFactory) maps instances with
//! `mmap` and can be given a limit to make heap exhaustion observable.
//!
//! # Replay harness
//! Traces refer to objects by the pointers of the recording session. Before timing,
//! [`compute_ops`](bench::compute_ops) replaces those pointers by small recycled slot
//! indices, so that replay only indexes a flat pointer table. [`time_trace`](bench::time_trace)
//! then runs the operations as many times as needed to reach a minimum operation count, and
//! [`measure_utilization`](bench::measure_utilization) replays the raw trace once while
//! tracking the peak of live requested bytes.
//!
//! [`HeapFactory`]: heaps::HeapFactory

pub use crate::allocators::{BlockMalloc, Malloc};
pub use crate::error::{Error, Result};

pub mod allocators;
pub mod bench;
pub mod block;
mod error;
pub mod free_block;
pub mod heaps;
mod util;
