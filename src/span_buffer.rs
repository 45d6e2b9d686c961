/// Batched span writes
///
/// Correlators emit spans one at a time; the store wants them in batches.
/// [`SpanBuffer`] sits in between and flushes as soon as it holds
/// `batch_size` spans. Whatever is left at end of stream goes out in
/// [`SpanBuffer::finish`], so nothing buffered outlives a run.
use crate::error::{IngestError, Result};
use crate::span_record::Span;
use crate::store::SpanStore;
use std::sync::Arc;
use tracing::debug;

/// Default number of spans per store insert
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Counters reported when a buffer finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub flushes: u64,
    pub spans_written: u64,
}

/// Accumulates spans and flushes them to a shared store
pub struct SpanBuffer {
    store: Arc<dyn SpanStore>,
    batch_size: usize,
    buf: Vec<Span>,
    stats: BufferStats,
}

impl SpanBuffer {
    /// Create a buffer; `batch_size` must be non-zero
    pub fn new(store: Arc<dyn SpanStore>, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(IngestError::Config("batch_size must be at least 1".to_string()));
        }
        Ok(Self {
            store,
            batch_size,
            buf: Vec::with_capacity(batch_size),
            stats: BufferStats::default(),
        })
    }

    /// Spans currently held
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn stats(&self) -> BufferStats {
        self.stats
    }

    /// Add one span, flushing once the buffer reaches `batch_size`
    pub fn push(&mut self, span: Span) -> Result<()> {
        self.buf.push(span);
        if self.buf.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Write all buffered spans in one batch (no-op when empty)
    pub fn flush(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }

        let batch = std::mem::replace(&mut self.buf, Vec::with_capacity(self.batch_size));
        let n = batch.len() as u64;
        self.store.insert_batch(batch)?;

        self.stats.flushes += 1;
        self.stats.spans_written += n;
        debug!(spans = n, flushes = self.stats.flushes, "span batch flushed");
        Ok(())
    }

    /// Flush the remainder and return the final counters
    pub fn finish(mut self) -> Result<BufferStats> {
        self.flush()?;
        Ok(self.stats)
    }
}

impl std::fmt::Debug for SpanBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanBuffer")
            .field("batch_size", &self.batch_size)
            .field("buffered", &self.buf.len())
            .field("stats", &self.stats)
            .finish()
    }
}
