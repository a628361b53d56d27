//! Decoding of recorded allocation workloads.
//!
//! A tracefile is plain text holding one event per line, in the order the events were
//! recorded:
//!
//! ```text
//! # comments and blank lines are ignored
//! malloc 10 -> 0x5581a000
//! calloc 4 16 -> 0x5581a040
//! realloc 0x5581a000 64 -> 0x5581a100
//! realloc 0x5581a100 0 -> nil
//! free 0x5581a040
//! free nil
//! ```
//!
//! Pointers are identifiers from the recording session and are never dereferenced.

use std::fmt;
use std::fs;
use std::path::Path;
use std::slice;

use tracing::{debug, info, instrument};

use crate::error::{Error, Result};

/// An opaque pointer value from the recording session. Zero is the null pointer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(pub u64);

impl TraceId {
    pub const NULL: TraceId = TraceId(0);

    #[inline(always)]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.is_null() {
            true => write!(f, "nil"),
            false => write!(f, "{:#x}", self.0),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Malloc,
    Calloc,
    Realloc,
    Free,
}

/// One recorded event.
///
/// `input_ptr` is only meaningful for realloc and free, `result` only for malloc, calloc
/// and realloc, and `nmemb` only for calloc. Unused fields hold null or zero.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TraceLine {
    pub op: Op,
    pub input_size: usize,
    pub nmemb: usize,
    pub input_ptr: TraceId,
    pub result: TraceId,
}

impl TraceLine {
    pub const fn malloc(size: usize, result: TraceId) -> Self {
        TraceLine {
            op: Op::Malloc,
            input_size: size,
            nmemb: 0,
            input_ptr: TraceId::NULL,
            result,
        }
    }

    pub const fn calloc(nmemb: usize, size: usize, result: TraceId) -> Self {
        TraceLine {
            op: Op::Calloc,
            input_size: size,
            nmemb,
            input_ptr: TraceId::NULL,
            result,
        }
    }

    pub const fn realloc(ptr: TraceId, size: usize, result: TraceId) -> Self {
        TraceLine {
            op: Op::Realloc,
            input_size: size,
            nmemb: 0,
            input_ptr: ptr,
            result,
        }
    }

    pub const fn free(ptr: TraceId) -> Self {
        TraceLine {
            op: Op::Free,
            input_size: 0,
            nmemb: 0,
            input_ptr: ptr,
            result: TraceId::NULL,
        }
    }

    /// Number of bytes the event asks for. Saturates for overflowing calloc requests.
    pub fn requested_bytes(&self) -> usize {
        match self.op {
            Op::Calloc => self.nmemb.saturating_mul(self.input_size),
            Op::Free => 0,
            Op::Malloc | Op::Realloc => self.input_size,
        }
    }
}

impl fmt::Display for TraceLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            Op::Malloc => write!(f, "malloc {} -> {}", self.input_size, self.result),
            Op::Calloc => write!(
                f,
                "calloc {} {} -> {}",
                self.nmemb, self.input_size, self.result
            ),
            Op::Realloc => write!(
                f,
                "realloc {} {} -> {}",
                self.input_ptr, self.input_size, self.result
            ),
            Op::Free => write!(f, "free {}", self.input_ptr),
        }
    }
}

/// A decoded tracefile. Iterating it yields the events in recorded order and can be done
/// any number of times.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TracefileReader {
    lines: Vec<TraceLine>,
}

impl TracefileReader {
    /// Reads and decodes the tracefile at `path`.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let reader = Self::parse(&text)?;
        info!(events = reader.size(), "Tracefile decoded.");
        Ok(reader)
    }

    /// Decodes a tracefile from its textual form.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let content = raw.split('#').next().unwrap_or("").trim();
            if content.is_empty() {
                continue;
            }
            lines.push(parse_line(idx + 1, content)?);
        }
        debug!(events = lines.len(), "Parsed tracefile text.");
        Ok(TracefileReader { lines })
    }

    pub fn from_lines(lines: Vec<TraceLine>) -> Self {
        TracefileReader { lines }
    }

    /// Total number of events.
    #[inline]
    pub fn size(&self) -> usize {
        self.lines.len()
    }

    #[inline]
    pub fn iter(&self) -> slice::Iter<'_, TraceLine> {
        self.lines.iter()
    }
}

impl<'a> IntoIterator for &'a TracefileReader {
    type Item = &'a TraceLine;
    type IntoIter = slice::Iter<'a, TraceLine>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn parse_line(line: usize, content: &str) -> Result<TraceLine> {
    let tokens: Vec<&str> = content.split_whitespace().collect();
    let parsed = match tokens.as_slice() {
        ["malloc", size, "->", result] => {
            TraceLine::malloc(parse_size(line, size)?, parse_ptr(line, result)?)
        }
        ["calloc", nmemb, size, "->", result] => TraceLine::calloc(
            parse_size(line, nmemb)?,
            parse_size(line, size)?,
            parse_ptr(line, result)?,
        ),
        ["realloc", ptr, size, "->", result] => TraceLine::realloc(
            parse_ptr(line, ptr)?,
            parse_size(line, size)?,
            parse_ptr(line, result)?,
        ),
        ["free", ptr] => TraceLine::free(parse_ptr(line, ptr)?),
        [op, ..] if !matches!(*op, "malloc" | "calloc" | "realloc" | "free") => {
            return Err(parse_error(line, format!("unknown operation `{op}`")));
        }
        _ => return Err(parse_error(line, format!("malformed event `{content}`"))),
    };

    // A recorded allocation that failed can not be replayed meaningfully.
    let nil_allowed = match parsed.op {
        Op::Malloc | Op::Calloc => false,
        Op::Realloc => parsed.input_size == 0,
        Op::Free => true,
    };
    if parsed.result.is_null() && !nil_allowed {
        return Err(parse_error(line, "allocation result must not be nil".to_string()));
    }
    Ok(parsed)
}

fn parse_size(line: usize, token: &str) -> Result<usize> {
    token
        .parse()
        .map_err(|err| parse_error(line, format!("invalid size `{token}`: {err}")))
}

fn parse_ptr(line: usize, token: &str) -> Result<TraceId> {
    if token == "nil" {
        return Ok(TraceId::NULL);
    }
    let Some(hex) = token.strip_prefix("0x") else {
        return Err(parse_error(line, format!("invalid pointer `{token}`")));
    };
    u64::from_str_radix(hex, 16)
        .map(TraceId)
        .map_err(|err| parse_error(line, format!("invalid pointer `{token}`: {err}")))
}

fn parse_error(line: usize, reason: String) -> Error {
    Error::Parse { line, reason }
}
