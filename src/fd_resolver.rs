//! File descriptor → file name resolution
//!
//! An fd number only means something for a given process at a given moment:
//! descriptors are closed and handed out again. Metadata spans record every
//! successful open-class call together with the fd it returned, so the name
//! behind `(proc, fd)` at time `t` is the fname of the latest open of that fd
//! in that process that started no later than `t`.
//!
//! The lookup runs on an explicit ordered index:
//!
//! ```text
//! proc ──► fd ──► BTreeMap<en_timestamp_ns, (id, fname)>
//!                         range(..=t).next_back()
//! ```
//!
//! Two opens at the same timestamp keep the one with the smaller store id.
//! With no match, fds 0/1/2 fall back to `stdin`/`stdout`/`stderr`, anything
//! else to `unknown`.

use crate::span_record::{MetaSpan, UNKNOWN_FNAME};
use std::collections::{BTreeMap, HashMap};

/// Names used for the standard streams when no open was traced
pub fn standard_stream_name(fd: i64) -> Option<&'static str> {
    match fd {
        0 => Some("stdin"),
        1 => Some("stdout"),
        2 => Some("stderr"),
        _ => None,
    }
}

#[derive(Debug, Clone)]
struct OpenRecord {
    id: u64,
    fname: String,
}

/// "Latest open not after t" index over metadata spans
#[derive(Debug, Default, Clone)]
pub struct FdNameResolver {
    opens: HashMap<String, HashMap<i64, BTreeMap<u64, OpenRecord>>>,
    len: usize,
}

impl FdNameResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the index from metadata spans
    pub fn from_meta_spans<'a, I>(spans: I) -> Self
    where
        I: IntoIterator<Item = &'a MetaSpan>,
    {
        let mut resolver = Self::new();
        for span in spans {
            resolver.insert(span);
        }
        resolver
    }

    /// Index one metadata span; failed opens (`ret < 0`) are ignored
    pub fn insert(&mut self, span: &MetaSpan) {
        if span.ret < 0 {
            return;
        }

        let by_time = self
            .opens
            .entry(span.header.proc.clone())
            .or_default()
            .entry(span.ret)
            .or_default();

        let record = OpenRecord {
            id: span.header.id,
            fname: span.fname.clone(),
        };
        match by_time.get_mut(&span.header.en_timestamp_ns) {
            Some(existing) => {
                if record.id < existing.id {
                    *existing = record;
                }
            }
            None => {
                by_time.insert(span.header.en_timestamp_ns, record);
                self.len += 1;
            }
        }
    }

    /// Number of distinct `(proc, fd, timestamp)` entries
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The fname of the latest open of `fd` in `proc` at or before `en_timestamp_ns`
    pub fn lookup(&self, proc: &str, fd: i64, en_timestamp_ns: u64) -> Option<&str> {
        self.opens
            .get(proc)?
            .get(&fd)?
            .range(..=en_timestamp_ns)
            .next_back()
            .map(|(_, record)| record.fname.as_str())
    }

    /// Resolve with standard-stream and `unknown` fallbacks
    pub fn resolve(&self, proc: &str, fd: i64, en_timestamp_ns: u64) -> String {
        if let Some(fname) = self.lookup(proc, fd, en_timestamp_ns) {
            return fname.to_string();
        }
        standard_stream_name(fd).unwrap_or(UNKNOWN_FNAME).to_string()
    }
}
