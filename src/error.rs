//! Errors reported by the benchmark harness.

use std::fmt;
use std::io;

/// A failure of one of the harness analyses.
///
/// Allocation exhaustion inside the allocator is never an error of its own, it only shows up
/// here when an analysis can not be carried out without the memory.
#[derive(Debug)]
pub enum Error {
    /// The tracefile could not be read.
    Io(io::Error),
    /// A line of the tracefile could not be decoded.
    Parse { line: usize, reason: String },
    /// The event at index `line` releases or resizes a pointer that is not live.
    UnknownPointer { line: usize, ptr: u64 },
    /// The tracefile holds no replayable operation.
    EmptyTrace,
    /// The allocator failed to set up its heap.
    HeapInit,
    /// The allocator could not satisfy a request the trace depends on.
    AllocationFailed { line: usize, size: usize },
    /// The tracefile does not free all the memory it allocates.
    Leak { objects: usize, bytes: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "couldn't read tracefile: {err}"),
            Error::Parse { line, reason } => write!(f, "line {line}: {reason}"),
            Error::UnknownPointer { line, ptr } => {
                write!(f, "event {line} references unknown pointer {ptr:#x}")
            }
            Error::EmptyTrace => write!(f, "tracefile holds no operations"),
            Error::HeapInit => write!(f, "couldn't initialize the heap"),
            Error::AllocationFailed { line, size } => {
                write!(f, "event {line}: allocation of {size} bytes failed")
            }
            Error::Leak { objects, bytes } => write!(
                f,
                "tracefile does not free all the memory it allocates ({objects} objects, {bytes} bytes outstanding)"
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}
