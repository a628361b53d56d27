//! Space utilization measurement.

use rustc_hash::FxHashMap;
use tracing::{info, instrument, warn};

use super::tracefile::{Op, TraceId, TracefileReader};
use crate::allocators::Malloc;
use crate::error::{Error, Result};

/// How requested sizes are accounted for.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct UtilizationConfig {
    /// Rounds every request up to the alignment a typical malloc would have to honor anyway
    /// (8 bytes for tiny requests, 16 otherwise), which is a fairer measure for allocators
    /// with a coarse granularity.
    pub effective: bool,
}

/// Outcome of [`measure_utilization`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Utilization {
    /// Largest number of live requested bytes at any point of the trace.
    pub peak_live_bytes: usize,
    /// Total size of all heap instances the allocator created.
    pub heap_bytes: usize,
}

impl Utilization {
    #[inline]
    pub fn ratio(&self) -> f64 {
        self.peak_live_bytes as f64 / self.heap_bytes as f64
    }
}

/// Size that counts towards the live total for a request of `size` bytes.
#[inline]
pub fn round_up(size: usize, config: UtilizationConfig) -> usize {
    if !config.effective {
        return size;
    }
    if size <= 8 {
        return 8;
    }
    size.saturating_add(0xf) & !0xf
}

/// Replays `reader`'s trace once against a freshly reset `allocator`, tracking the live
/// requested bytes, and relates their peak to the memory the allocator took from its heap
/// source.
///
/// Fails if the trace refers to pointers it never allocated, if the allocator can not
/// satisfy a request, or if the trace does not free everything it allocates.
#[instrument(level = "info", skip(reader, allocator))]
pub fn measure_utilization<M: Malloc>(
    reader: &TracefileReader,
    allocator: &mut M,
    config: UtilizationConfig,
) -> Result<Utilization> {
    let mut live: FxHashMap<TraceId, (*mut u8, usize)> = FxHashMap::default();

    allocator.reset();
    allocator.initialize_heap().map_err(|()| Error::HeapInit)?;

    let mut total_allocated_bytes: usize = 0;
    let mut max_allocated_bytes: usize = 0;

    for (line, event) in reader.iter().enumerate() {
        match event.op {
            Op::Malloc | Op::Calloc => {
                let size = event.requested_bytes();
                let ptr = match event.op {
                    Op::Calloc => allocator.calloc(event.nmemb, event.input_size),
                    _ => allocator.malloc(size),
                };
                if ptr.is_null() {
                    return Err(Error::AllocationFailed { line, size });
                }
                live.insert(event.result, (ptr, size));
                total_allocated_bytes += round_up(size, config);
            }
            Op::Realloc => {
                let size = event.input_size;
                let old_ptr = match event.input_ptr.is_null() {
                    true => std::ptr::null_mut(),
                    false => {
                        let (old_ptr, old_size) =
                            live.remove(&event.input_ptr).ok_or(Error::UnknownPointer {
                                line,
                                ptr: event.input_ptr.0,
                            })?;
                        total_allocated_bytes -= round_up(old_size, config);
                        old_ptr
                    }
                };
                if old_ptr.is_null() && event.result.is_null() {
                    continue;
                }

                let new_ptr = unsafe { allocator.realloc(old_ptr, size) };
                if new_ptr.is_null() && size > 0 {
                    return Err(Error::AllocationFailed { line, size });
                }
                if event.result.is_null() {
                    continue;
                }
                // A zero-size result stays live until the trace frees it,
                // even though the allocator released it already.
                live.insert(event.result, (new_ptr, size));
                total_allocated_bytes += round_up(size, config);
            }
            Op::Free => {
                if event.input_ptr.is_null() {
                    continue;
                }
                let (ptr, size) = live.remove(&event.input_ptr).ok_or(Error::UnknownPointer {
                    line,
                    ptr: event.input_ptr.0,
                })?;
                unsafe { allocator.free(ptr) };
                total_allocated_bytes -= round_up(size, config);
            }
        }

        max_allocated_bytes = max_allocated_bytes.max(total_allocated_bytes);
    }

    if !live.is_empty() {
        for (id, (ptr, size)) in &live {
            warn!(%id, ?ptr, size, "Object never freed.");
        }
        return Err(Error::Leak {
            objects: live.len(),
            bytes: live.values().map(|&(_, size)| size).sum(),
        });
    }

    let heap_bytes = allocator.heap_instances().iter().map(|heap| heap.size()).sum();
    let utilization = Utilization {
        peak_live_bytes: max_allocated_bytes,
        heap_bytes,
    };
    info!(
        peak_live_bytes = utilization.peak_live_bytes,
        heap_bytes,
        ratio = utilization.ratio(),
        "Utilization measured."
    );
    Ok(utilization)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocators::BlockMalloc;
    use crate::bench::tracefile::TraceLine;
    use crate::heaps::MmapHeapFactory;

    const EXACT: UtilizationConfig = UtilizationConfig { effective: false };
    const EFFECTIVE: UtilizationConfig = UtilizationConfig { effective: true };

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(0, EXACT), 0);
        assert_eq!(round_up(13, EXACT), 13);
        assert_eq!(round_up(0, EFFECTIVE), 8);
        assert_eq!(round_up(8, EFFECTIVE), 8);
        assert_eq!(round_up(9, EFFECTIVE), 16);
        assert_eq!(round_up(16, EFFECTIVE), 16);
        assert_eq!(round_up(17, EFFECTIVE), 32);
    }

    #[test]
    fn test_utilization() {
        let reader = TracefileReader::from_lines(vec![
            TraceLine::malloc(10, TraceId(1)),
            TraceLine::malloc(20, TraceId(2)),
            TraceLine::free(TraceId(1)),
            TraceLine::free(TraceId(2)),
        ]);
        let mut allocator = BlockMalloc::with_factory(MmapHeapFactory::new(), 1000);

        let exact = measure_utilization(&reader, &mut allocator, EXACT).unwrap();
        assert_eq!(exact.peak_live_bytes, 30);
        assert_eq!(exact.heap_bytes, 1000);
        assert!((exact.ratio() - 0.03).abs() < 1e-12);

        let effective = measure_utilization(&reader, &mut allocator, EFFECTIVE).unwrap();
        assert_eq!(effective.peak_live_bytes, 48);
        assert_eq!(effective.heap_bytes, 1000);
    }

    #[test]
    fn test_realloc_accounting() {
        let reader = TracefileReader::from_lines(vec![
            TraceLine::realloc(TraceId::NULL, 100, TraceId(1)),
            TraceLine::calloc(10, 10, TraceId(2)),
            TraceLine::realloc(TraceId(1), 50, TraceId(1)),
            TraceLine::realloc(TraceId(1), 400, TraceId(3)),
            TraceLine::free(TraceId(2)),
            TraceLine::free(TraceId::NULL),
            TraceLine::realloc(TraceId(3), 0, TraceId::NULL),
        ]);
        let mut allocator = BlockMalloc::with_factory(MmapHeapFactory::new(), 4096);
        let result = measure_utilization(&reader, &mut allocator, EXACT).unwrap();
        assert_eq!(result.peak_live_bytes, 550);
        assert_eq!(allocator.validate().unwrap().blocks, 1);
    }

    #[test]
    fn test_realloc_to_zero_with_result() {
        for result in [TraceId(0x20), TraceId(0x10)] {
            let reader = TracefileReader::from_lines(vec![
                TraceLine::malloc(10, TraceId(0x10)),
                TraceLine::realloc(TraceId(0x10), 0, result),
                TraceLine::free(result),
            ]);
            let mut allocator = BlockMalloc::with_factory(MmapHeapFactory::new(), 1000);
            let exact = measure_utilization(&reader, &mut allocator, EXACT).unwrap();
            assert_eq!(exact.peak_live_bytes, 10);
            let stats = allocator.validate().unwrap();
            assert_eq!(stats.blocks, stats.free_blocks);

            let mut allocator = BlockMalloc::with_factory(MmapHeapFactory::new(), 1000);
            assert!(crate::bench::time_trace(&reader, &mut allocator, 100).is_ok());
        }
    }

    #[test]
    fn test_leak() {
        let reader = TracefileReader::from_lines(vec![TraceLine::malloc(10, TraceId(1))]);
        let mut allocator = BlockMalloc::with_factory(MmapHeapFactory::new(), 1000);
        assert!(matches!(
            measure_utilization(&reader, &mut allocator, EXACT),
            Err(Error::Leak {
                objects: 1,
                bytes: 10
            })
        ));
    }

    #[test]
    fn test_unknown_free() {
        let reader = TracefileReader::from_lines(vec![TraceLine::free(TraceId(7))]);
        let mut allocator = BlockMalloc::with_factory(MmapHeapFactory::new(), 1000);
        assert!(matches!(
            measure_utilization(&reader, &mut allocator, EXACT),
            Err(Error::UnknownPointer { line: 0, ptr: 7 })
        ));
    }

    #[test]
    fn test_exhaustion() {
        let reader = TracefileReader::from_lines(vec![
            TraceLine::malloc(10, TraceId(1)),
            TraceLine::malloc(5000, TraceId(2)),
        ]);
        let mut allocator = BlockMalloc::with_factory(MmapHeapFactory::with_limit(1000), 1000);
        assert!(matches!(
            measure_utilization(&reader, &mut allocator, EXACT),
            Err(Error::AllocationFailed {
                line: 1,
                size: 5000
            })
        ));
    }
}
