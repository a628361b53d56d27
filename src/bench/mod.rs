//! The tracefile replay harness.
//!
//! A recorded workload is decoded by [`TracefileReader`], turned into slot-identified
//! operations by [`compute_ops`], and replayed against any [`Malloc`](crate::Malloc)
//! implementation either to time it ([`time_trace`]) or to measure how much of its heap
//! the workload's live data occupies at peak ([`measure_utilization`]).

pub mod ops;
pub mod perftest;
pub mod tracefile;
pub mod utiltest;

pub use ops::{compute_ops, OpSequence, TimeOp};
pub use perftest::{time_trace, Throughput};
pub use tracefile::{Op, TraceId, TraceLine, TracefileReader};
pub use utiltest::{measure_utilization, round_up, Utilization, UtilizationConfig};
