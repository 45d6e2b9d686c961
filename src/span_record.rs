//! Span records persisted by the store
//!
//! A span is one correlated ENTER/EXIT pair. All three trace kinds share a
//! flat header (timestamps, latency, pid/tid/proc, event name) and add a few
//! kind-specific columns:
//!
//! ```text
//! SpanHeader                       IoSpan          MetaSpan        MemorySpan
//! ├─ id: u64 (store-assigned)      ├─ fd: i64      ├─ fname        ├─ fd: i64
//! ├─ en_timestamp_ns: u64          ├─ ret: i64     └─ ret: i64     ├─ ret: i64
//! ├─ en_wall_time: DateTime<Utc>   ├─ countbytes                   └─ length: u64
//! ├─ ex_timestamp_ns: u64          └─ fname
//! ├─ ex_wall_time: DateTime<Utc>
//! ├─ latency_ns: i64
//! ├─ pid: u32, tid: u32
//! ├─ proc: String
//! └─ event_name: String
//! ```
//!
//! Field names are the stable contract for downstream query and
//! visualization tools; the header is flattened when serialized.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// File name used when an fd cannot be resolved
pub const UNKNOWN_FNAME: &str = "unknown";

/// Trace kind: decides which files feed a correlator and how pairs are validated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceKind {
    /// read/write-class calls
    Io,
    /// open-class calls whose return value is a new fd
    Meta,
    /// mmap-class calls
    Memory,
}

impl TraceKind {
    /// All kinds in processing order
    pub const ALL: [TraceKind; 3] = [TraceKind::Meta, TraceKind::Io, TraceKind::Memory];

    pub fn as_str(&self) -> &'static str {
        match self {
            TraceKind::Io => "io",
            TraceKind::Meta => "meta",
            TraceKind::Memory => "memory",
        }
    }
}

impl fmt::Display for TraceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Columns shared by every span kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanHeader {
    /// Row id, assigned by the store on insert (0 until then)
    #[serde(default)]
    pub id: u64,

    /// Tracer monotonic time of the ENTER line
    pub en_timestamp_ns: u64,
    /// Reconciled wall time of the ENTER line
    pub en_wall_time: DateTime<Utc>,
    /// Tracer monotonic time of the EXIT line
    pub ex_timestamp_ns: u64,
    /// Reconciled wall time of the EXIT line
    pub ex_wall_time: DateTime<Utc>,
    /// `ex_wall_time - en_wall_time` in nanoseconds
    pub latency_ns: i64,

    pub pid: u32,
    pub tid: u32,
    pub proc: String,
    /// Syscall name (the line's operand)
    pub event_name: String,
}

/// A completed read/write-class call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoSpan {
    #[serde(flatten)]
    pub header: SpanHeader,
    pub fd: i64,
    pub ret: i64,
    pub countbytes: u64,
    /// Resolved after ingestion; `"unknown"` until then
    pub fname: String,
}

/// A completed open-class call; `ret` is the fd the kernel handed out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaSpan {
    #[serde(flatten)]
    pub header: SpanHeader,
    pub fname: String,
    pub ret: i64,
}

/// A completed memory call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySpan {
    #[serde(flatten)]
    pub header: SpanHeader,
    pub fd: i64,
    pub ret: i64,
    pub length: u64,
}

/// Any span, tagged by kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Span {
    Io(IoSpan),
    Meta(MetaSpan),
    Memory(MemorySpan),
}

impl Span {
    pub fn kind(&self) -> TraceKind {
        match self {
            Span::Io(_) => TraceKind::Io,
            Span::Meta(_) => TraceKind::Meta,
            Span::Memory(_) => TraceKind::Memory,
        }
    }

    pub fn header(&self) -> &SpanHeader {
        match self {
            Span::Io(s) => &s.header,
            Span::Meta(s) => &s.header,
            Span::Memory(s) => &s.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut SpanHeader {
        match self {
            Span::Io(s) => &mut s.header,
            Span::Meta(s) => &mut s.header,
            Span::Memory(s) => &mut s.header,
        }
    }

    /// EXIT-derived return value
    pub fn ret(&self) -> i64 {
        match self {
            Span::Io(s) => s.ret,
            Span::Meta(s) => s.ret,
            Span::Memory(s) => s.ret,
        }
    }
}
