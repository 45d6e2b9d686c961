//! Span storage
//!
//! Correlators only need a batch-insert target ([`SpanStore`]); the storage
//! engine behind it is opaque to them. [`MemoryStore`] is the in-process
//! implementation: three tables in id order, JSON-lines persistence, and the
//! queries downstream tools rely on (filtered listing, per-file aggregates,
//! fd-name resolution).
//!
//! # Query Patterns
//!
//! ```text
//! io_spans(proc = ?, fd = ?, fname = ?, en_wall_time BETWEEN ? AND ?)
//! SELECT DISTINCT proc
//! SELECT fname, count(*), sum(countbytes), sum(latency_ns)
//!   FROM io_spans WHERE proc = ? AND event_name != 'close' GROUP BY fname
//! io_spans JOIN latest preceding meta_spans ON (proc, fd = ret)
//! ```

mod memory;

pub use memory::MemoryStore;

use crate::error::Result;
use crate::span_record::{IoSpan, Span};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Batch-insert target shared by all correlators of a run
///
/// Implementations must accept interleaved calls from several threads; no
/// ordering between trace kinds is assumed.
pub trait SpanStore: Send + Sync {
    /// Persist a batch of spans
    ///
    /// # Errors
    /// Any error is fatal to the ingestion run; callers do not retry.
    fn insert_batch(&self, spans: Vec<Span>) -> Result<()>;

    /// Rewrite stored I/O fnames from the metadata spans seen so far
    ///
    /// Called once after every trace kind has been loaded. Returns how many
    /// spans matched a traced open; stores without the join return 0.
    fn resolve_fd_names(&self) -> Result<usize> {
        Ok(0)
    }
}

/// Filter and pagination for span listings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpanQuery {
    pub proc: Option<String>,
    pub fd: Option<i64>,
    pub fname: Option<String>,
    /// Inclusive lower bound on `en_wall_time`
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `en_wall_time`
    pub to: Option<DateTime<Utc>>,
    /// Skip spans whose fname is `unknown`
    pub hide_unknown: bool,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl SpanQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn proc(mut self, proc: impl Into<String>) -> Self {
        self.proc = Some(proc.into());
        self
    }

    pub fn fd(mut self, fd: i64) -> Self {
        self.fd = Some(fd);
        self
    }

    pub fn fname(mut self, fname: impl Into<String>) -> Self {
        self.fname = Some(fname.into());
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn hide_unknown(mut self, hide: bool) -> Self {
        self.hide_unknown = hide;
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    /// Whether an I/O span passes every filter (pagination excluded)
    pub fn matches(&self, span: &IoSpan) -> bool {
        if let Some(proc) = &self.proc {
            if &span.header.proc != proc {
                return false;
            }
        }
        if let Some(fd) = self.fd {
            if span.fd != fd {
                return false;
            }
        }
        if let Some(fname) = &self.fname {
            if &span.fname != fname {
                return false;
            }
        }
        if let Some(from) = self.from {
            if span.header.en_wall_time < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if span.header.en_wall_time > to {
                return false;
            }
        }
        !(self.hide_unknown && span.fname == crate::span_record::UNKNOWN_FNAME)
    }

    /// Apply offset/limit to an already filtered, id-ordered iterator
    pub(crate) fn paginate<T>(&self, items: impl Iterator<Item = T>) -> Vec<T> {
        let items = items.skip(self.offset);
        match self.limit {
            Some(limit) => items.take(limit).collect(),
            None => items.collect(),
        }
    }
}

/// Per-file totals for one process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAggregate {
    pub fname: String,
    pub count: u64,
    pub total_bytes: u64,
    pub total_latency_ns: i64,
}

/// Sort key for [`FileAggregate`] listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggregateOrder {
    #[default]
    Count,
    Bytes,
    Latency,
}

/// One page of a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub page: usize,
    pub next_page: Option<usize>,
    pub prev_page: Option<usize>,
    pub total: usize,
    pub total_pages: usize,
    pub page_size: usize,
}

impl<T> Page<T> {
    /// Cut page `page` (1-based) out of `items`
    ///
    /// A `page` of 0 is treated as 1; a `page_size` of 0 as 1. A page past
    /// the end is empty.
    pub fn from_items(items: Vec<T>, page: usize, page_size: usize) -> Self {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let total = items.len();
        let total_pages = total.div_ceil(page_size);

        let data = items
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .collect();

        Self {
            data,
            page,
            next_page: (page < total_pages).then_some(page + 1),
            prev_page: (page > 1).then_some(page - 1),
            total,
            total_pages,
            page_size,
        }
    }
}
