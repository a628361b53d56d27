//! Rewrites pointer-identified trace events into slot-identified operations.
//!
//! Replaying a trace needs to know, for every realloc and free, which earlier allocation it
//! refers to. Doing that with a hash lookup inside the timed loop would measure the hash map
//! as much as the allocator, so the lookups are done once up front: every recorded pointer
//! is given a small integer slot, and replay keeps its live pointers in a flat table indexed
//! by slot. Slots of dead objects are recycled, so the table only needs as many entries as
//! the trace has simultaneously live objects.

use rustc_hash::FxHashMap;
use tracing::{info, instrument, warn};

use super::tracefile::{Op, TraceId, TraceLine, TracefileReader};
use crate::error::{Error, Result};

/// A trace event with its pointers replaced by slots.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TimeOp {
    Malloc { size: usize, res: usize },
    Calloc { nmemb: usize, size: usize, res: usize },
    Realloc { arg: usize, size: usize, res: usize },
    Free { arg: usize },
}

/// The replayable form of a trace.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OpSequence {
    ops: Vec<TimeOp>,
    slot_count: usize,
}

impl OpSequence {
    #[inline]
    pub fn ops(&self) -> &[TimeOp] {
        &self.ops
    }

    /// Number of distinct slots the operations use. A pointer table of this length can
    /// hold every object that is ever live at once.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Hands out dense slot indices, preferring the most recently released one.
#[derive(Debug, Default)]
struct SlotPool {
    released: Vec<usize>,
    next: usize,
}

impl SlotPool {
    fn acquire(&mut self) -> usize {
        match self.released.pop() {
            Some(slot) => slot,
            None => {
                self.next += 1;
                self.next - 1
            }
        }
    }

    fn release(&mut self, slot: usize) {
        debug_assert!(slot < self.next);
        self.released.push(slot);
    }
}

/// Maps live recorded pointers to their slots.
#[derive(Debug, Default)]
struct SlotMap {
    slots: FxHashMap<TraceId, usize>,
    pool: SlotPool,
}

impl SlotMap {
    fn bind_new(&mut self, line: usize, ptr: TraceId) -> usize {
        let slot = self.pool.acquire();
        if let Some(previous) = self.slots.insert(ptr, slot) {
            warn!(line, %ptr, previous, "Pointer allocated again while still live.");
            self.pool.release(previous);
        }
        slot
    }

    fn lookup(&self, line: usize, ptr: TraceId) -> Result<usize> {
        self.slots
            .get(&ptr)
            .copied()
            .ok_or(Error::UnknownPointer { line, ptr: ptr.0 })
    }

    fn unbind(&mut self, line: usize, ptr: TraceId) -> Result<usize> {
        let slot = self
            .slots
            .remove(&ptr)
            .ok_or(Error::UnknownPointer { line, ptr: ptr.0 })?;
        self.pool.release(slot);
        Ok(slot)
    }
}

/// Computes the slot-identified operations of `reader`'s trace.
///
/// Frees of null are dropped and reallocs of null become mallocs. Events are numbered from
/// zero in errors. Fails if an event frees or resizes a pointer that is not live.
#[instrument(level = "info", skip_all, fields(events = reader.size()))]
pub fn compute_ops(reader: &TracefileReader) -> Result<OpSequence> {
    let mut map = SlotMap::default();
    let mut ops = Vec::with_capacity(reader.size());

    for (line, event) in reader.iter().enumerate() {
        if let Some(op) = remap(&mut map, line, event)? {
            ops.push(op);
        }
    }

    let sequence = OpSequence {
        ops,
        slot_count: map.pool.next,
    };
    info!(
        ops = sequence.len(),
        slots = sequence.slot_count(),
        "Trace remapped."
    );
    Ok(sequence)
}

fn remap(map: &mut SlotMap, line: usize, event: &TraceLine) -> Result<Option<TimeOp>> {
    let op = match event.op {
        Op::Malloc => TimeOp::Malloc {
            size: event.input_size,
            res: map.bind_new(line, event.result),
        },
        Op::Calloc => TimeOp::Calloc {
            nmemb: event.nmemb,
            size: event.input_size,
            res: map.bind_new(line, event.result),
        },
        Op::Realloc if event.input_ptr.is_null() && event.result.is_null() => return Ok(None),
        Op::Realloc if event.input_ptr.is_null() => TimeOp::Malloc {
            size: event.input_size,
            res: map.bind_new(line, event.result),
        },
        Op::Realloc if event.input_ptr == event.result => {
            let slot = map.lookup(line, event.input_ptr)?;
            TimeOp::Realloc {
                arg: slot,
                size: event.input_size,
                res: slot,
            }
        }
        Op::Realloc if event.result.is_null() => {
            // Resized to nothing, the object dies with the call.
            let slot = map.unbind(line, event.input_ptr)?;
            TimeOp::Realloc {
                arg: slot,
                size: event.input_size,
                res: slot,
            }
        }
        Op::Realloc => {
            let old = map.lookup(line, event.input_ptr)?;
            // The result slot is taken before the old one is released so the two differ.
            let res = map.bind_new(line, event.result);
            map.unbind(line, event.input_ptr)?;
            TimeOp::Realloc {
                arg: old,
                size: event.input_size,
                res,
            }
        }
        Op::Free if event.input_ptr.is_null() => return Ok(None),
        Op::Free => TimeOp::Free {
            arg: map.unbind(line, event.input_ptr)?,
        },
    };
    Ok(Some(op))
}
