//! Partition arena: one queue and writer thread per `(proc, operand)`

use super::worker::{PartitionKey, RoutedLine};
use super::writer::{partition_queue, spawn_writer, PartitionSender, WriterStats};
use crate::error::{IngestError, Result};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use tracing::debug;

struct PartitionHandle {
    path: PathBuf,
    queue: PartitionSender,
    writer: JoinHandle<Result<WriterStats>>,
}

/// Totals across all writers after shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterTotals {
    pub partitions: usize,
    pub payloads: u64,
    pub bytes: u64,
    pub flushes: u64,
}

/// Dispatches routed lines to lazily created partition writers
pub struct PartitionRouter {
    base: PathBuf,
    queue_capacity: usize,
    flush_bytes: usize,
    partitions: HashMap<PartitionKey, PartitionHandle>,
}

impl PartitionRouter {
    pub fn new(base: &Path, queue_capacity: usize, flush_bytes: usize) -> Self {
        Self {
            base: base.to_path_buf(),
            queue_capacity,
            flush_bytes,
            partitions: HashMap::new(),
        }
    }

    pub fn partitions(&self) -> usize {
        self.partitions.len()
    }

    /// Enqueue one line, creating its partition on first use
    ///
    /// Blocks while the partition's queue is full. Fails with
    /// [`IngestError::WriterDisconnected`] if that writer already exited.
    pub fn route(&mut self, line: RoutedLine) -> Result<()> {
        let RoutedLine { key, payload } = line;
        let handle = match self.partitions.entry(key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let path = entry.key().path(&self.base);
                let (queue, receiver) = partition_queue(self.queue_capacity);
                let writer = spawn_writer(path.clone(), receiver, self.flush_bytes)?;
                debug!(path = %path.display(), "partition created");
                entry.insert(PartitionHandle { path, queue, writer })
            }
        };

        if handle.queue.send(payload) {
            Ok(())
        } else {
            Err(IngestError::WriterDisconnected(handle.path.clone()))
        }
    }

    /// Send the sentinel to every writer, then join them all
    ///
    /// Every writer is joined even after a failure; the first error (in
    /// partition path order) is returned.
    pub fn shutdown(self) -> Result<RouterTotals> {
        let mut handles: Vec<PartitionHandle> = self.partitions.into_values().collect();
        handles.sort_by(|a, b| a.path.cmp(&b.path));

        for handle in &handles {
            // a writer that already died reports its own error on join
            let _ = handle.queue.shutdown();
        }

        let mut totals = RouterTotals {
            partitions: handles.len(),
            ..RouterTotals::default()
        };
        let mut first_error = None;
        for handle in handles {
            let outcome = handle.writer.join().unwrap_or_else(|_| {
                Err(IngestError::WorkerPool(format!(
                    "writer for {} panicked",
                    handle.path.display()
                )))
            });
            match outcome {
                Ok(stats) => {
                    totals.payloads += stats.payloads;
                    totals.bytes += stats.bytes;
                    totals.flushes += stats.flushes;
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(totals),
        }
    }
}
