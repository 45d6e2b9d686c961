//! Tracer line grammar
//!
//! Every traced call produces two lines, one at entry and one at return:
//!
//! ```text
//! 1000 {pid=1 tid=1 proc=foo}{EN read}{fd=3}
//! 2000 {pid=1 tid=1 proc=foo}{EX read}{ret=10 count=4096}
//! ```
//!
//! [`parse_line`] turns one such line into a [`RawLogLine`] or returns `None`.
//! It never fails loudly: callers skip whatever does not match.
//!
//! The untyped `spec` block is converted once into [`CallArgs`] by
//! [`CallArgs::from_line`], so correlators never re-read string maps.

use crate::span_record::TraceKind;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Which side of a traced call a line records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallStatus {
    /// `EN`: emitted when the call is entered
    Enter,
    /// `EX`: emitted when the call returns
    Exit,
}

/// One parsed tracer line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLogLine {
    /// Tracer monotonic clock, nanoseconds
    pub time_ns: u64,
    pub pid: u32,
    pub tid: u32,
    pub proc: String,
    pub status: CallStatus,
    /// Syscall or operation name (e.g. "read", "openat", "mmap")
    pub operand: String,
    /// Operation-specific key=value parameters (fd, ret, count, fname, len, addr, ...)
    pub spec: BTreeMap<String, String>,
}

fn line_regex() -> &'static Regex {
    static LINE_RE: OnceLock<Regex> = OnceLock::new();
    LINE_RE.get_or_init(|| {
        Regex::new(
            r"^(?P<time>\d+)\s+\{pid=(?P<pid>\d+)\s+tid=(?P<tid>\d+)\s+proc=(?P<proc>[^}]+)\}\{(?P<status>EN|EX)\s+(?P<operand>[A-Za-z0-9_]+)\}\{(?P<spec>[^}]*)\}$",
        )
        .expect("tracer line regex is valid")
    })
}

/// Parse a single tracer line
///
/// Trailing `\n` / `\r\n` is ignored. Returns `None` for anything that does not
/// match the grammar, including numeric fields that overflow their type.
pub fn parse_line(line: &str) -> Option<RawLogLine> {
    let line = line.trim_end_matches(['\n', '\r']);
    let caps = line_regex().captures(line)?;

    let time_ns = caps["time"].parse::<u64>().ok()?;
    let pid = caps["pid"].parse::<u32>().ok()?;
    let tid = caps["tid"].parse::<u32>().ok()?;
    let status = match &caps["status"] {
        "EN" => CallStatus::Enter,
        _ => CallStatus::Exit,
    };

    Some(RawLogLine {
        time_ns,
        pid,
        tid,
        proc: caps["proc"].to_string(),
        status,
        operand: caps["operand"].to_string(),
        spec: parse_spec(&caps["spec"]),
    })
}

/// Build the key=value map of a spec block
///
/// Tokens without `=` (or with an empty key) are ignored; the last occurrence
/// of a duplicate key wins.
pub fn parse_spec(spec: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for token in spec.split_whitespace() {
        if let Some((key, value)) = token.split_once('=') {
            if !key.is_empty() {
                map.insert(key.to_string(), value.to_string());
            }
        }
    }
    map
}

/// Typed view of a line's spec block
///
/// Absent or non-numeric `fd`/`ret` become `-1`, which later fails validation;
/// absent `count`/`len` become `0`; absent `fname` becomes `"unknown"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallArgs {
    /// ENTER of a read/write-class call
    Io { fd: i64, count: Option<u64> },
    /// ENTER of an open-class call
    Meta { fname: String },
    /// ENTER of a memory call
    Memory { fd: i64, len: u64, addr: Option<u64> },
    /// Any EXIT; `count` is kept for tracers that report it on return
    Exit { ret: i64, count: Option<u64> },
}

impl CallArgs {
    /// Interpret `line.spec` for the given trace kind
    pub fn from_line(kind: TraceKind, line: &RawLogLine) -> Self {
        let spec = &line.spec;
        match (line.status, kind) {
            (CallStatus::Exit, _) => CallArgs::Exit {
                ret: int_field(spec, "ret").unwrap_or(-1),
                count: uint_field(spec, "count"),
            },
            (CallStatus::Enter, TraceKind::Io) => CallArgs::Io {
                fd: int_field(spec, "fd").unwrap_or(-1),
                count: uint_field(spec, "count"),
            },
            (CallStatus::Enter, TraceKind::Meta) => CallArgs::Meta {
                fname: spec
                    .get("fname")
                    .cloned()
                    .unwrap_or_else(|| crate::span_record::UNKNOWN_FNAME.to_string()),
            },
            (CallStatus::Enter, TraceKind::Memory) => CallArgs::Memory {
                fd: int_field(spec, "fd").unwrap_or(-1),
                len: uint_field(spec, "len").unwrap_or(0),
                addr: uint_field(spec, "addr"),
            },
        }
    }
}

fn int_field(spec: &BTreeMap<String, String>, key: &str) -> Option<i64> {
    spec.get(key).and_then(|v| v.parse::<i64>().ok())
}

fn uint_field(spec: &BTreeMap<String, String>, key: &str) -> Option<u64> {
    spec.get(key).and_then(|v| v.parse::<u64>().ok())
}
