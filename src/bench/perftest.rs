//! Throughput measurement.

use std::ptr::null_mut;
use std::time::{Duration, Instant};

use tracing::{info, instrument};

use super::ops::{compute_ops, TimeOp};
use super::tracefile::TracefileReader;
use crate::allocators::Malloc;
use crate::error::{Error, Result};

/// Outcome of [`time_trace`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Throughput {
    /// Number of full passes over the trace.
    pub repetitions: usize,
    /// Number of allocator calls made over all passes.
    pub total_ops: usize,
    /// Wall-clock time spent in the passes, heap setup excluded.
    pub elapsed: Duration,
}

impl Throughput {
    /// Average number of allocator calls per microsecond.
    pub fn ops_per_microsecond(&self) -> f64 {
        let micros = self.elapsed.as_secs_f64() * 1e6;
        self.total_ops as f64 / micros.max(f64::MIN_POSITIVE)
    }
}

/// Number of passes over `op_count` operations needed to execute at least
/// `min_desired_ops` operations (and at least one pass).
#[inline]
pub fn repetitions(min_desired_ops: usize, op_count: usize) -> usize {
    debug_assert!(op_count > 0);
    (min_desired_ops.max(1) - 1) / op_count + 1
}

/// Replays `reader`'s trace against `allocator` until at least `min_desired_ops`
/// allocator calls were made, and reports the achieved throughput.
///
/// The allocator is reset and its heap reinitialized once, before the clock starts. Passes
/// run back to back, so every pass starts from the heap the previous one left behind.
#[instrument(level = "info", skip(reader, allocator))]
pub fn time_trace<M: Malloc>(
    reader: &TracefileReader,
    allocator: &mut M,
    min_desired_ops: usize,
) -> Result<Throughput> {
    let sequence = compute_ops(reader)?;
    if sequence.is_empty() {
        return Err(Error::EmptyTrace);
    }
    let repetitions = repetitions(min_desired_ops, sequence.len());
    let mut ptrs: Vec<*mut u8> = vec![null_mut(); sequence.slot_count()];

    allocator.reset();
    allocator.initialize_heap().map_err(|()| Error::HeapInit)?;

    let start = Instant::now();
    for _ in 0..repetitions {
        // SAFETY: slots only ever hold null or pointers returned by `allocator`, and an
        // argument slot is always written by an earlier operation of the same pass.
        unsafe { replay(sequence.ops(), &mut ptrs, allocator) };
    }
    let elapsed = start.elapsed();

    let throughput = Throughput {
        repetitions,
        total_ops: repetitions * sequence.len(),
        elapsed,
    };
    info!(
        repetitions,
        total_ops = throughput.total_ops,
        ?elapsed,
        mops = throughput.ops_per_microsecond(),
        "Trace timed."
    );
    Ok(throughput)
}

/// Executes `ops` once, keeping the live pointers in `ptrs`.
///
/// # Safety
/// Every argument slot read by `ops` must hold null or a live pointer of `allocator`.
#[inline]
unsafe fn replay<M: Malloc>(ops: &[TimeOp], ptrs: &mut [*mut u8], allocator: &mut M) {
    for op in ops {
        match *op {
            TimeOp::Malloc { size, res } => ptrs[res] = allocator.malloc(size),
            TimeOp::Calloc { nmemb, size, res } => ptrs[res] = allocator.calloc(nmemb, size),
            TimeOp::Realloc { arg, size, res } => ptrs[res] = allocator.realloc(ptrs[arg], size),
            TimeOp::Free { arg } => allocator.free(ptrs[arg]),
        }
    }
}
