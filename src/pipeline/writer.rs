//! Per-partition writer threads
//!
//! Each partition owns one bounded queue and one thread. The thread appends
//! payloads to an in-memory buffer and writes the buffer out in a single
//! call once it reaches `flush_bytes`, and again when the shutdown sentinel
//! arrives. Payloads are written in the order they were enqueued.

use crate::error::{IngestError, Result};
use crossbeam::channel::{self, Receiver, Sender};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use tracing::debug;

/// Message on a partition queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterMessage {
    Payload(Vec<u8>),
    /// Flush and exit
    Shutdown,
}

/// Producer half of a partition queue
#[derive(Debug, Clone)]
pub struct PartitionSender {
    tx: Sender<WriterMessage>,
}

/// Consumer half of a partition queue
#[derive(Debug)]
pub struct PartitionReceiver {
    rx: Receiver<WriterMessage>,
}

/// Create a queue that holds at most `capacity` messages
pub fn partition_queue(capacity: usize) -> (PartitionSender, PartitionReceiver) {
    let (tx, rx) = channel::bounded(capacity);
    (PartitionSender { tx }, PartitionReceiver { rx })
}

impl PartitionSender {
    /// Enqueue a payload, blocking while the queue is full
    ///
    /// Returns `false` if the writer is gone.
    pub fn send(&self, payload: Vec<u8>) -> bool {
        self.tx.send(WriterMessage::Payload(payload)).is_ok()
    }

    /// Ask the writer to flush and exit
    pub fn shutdown(&self) -> bool {
        self.tx.send(WriterMessage::Shutdown).is_ok()
    }

    /// Messages waiting in the queue
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

impl PartitionReceiver {
    pub fn recv(&self) -> Option<WriterMessage> {
        self.rx.recv().ok()
    }
}

/// What one writer did before it exited
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub payloads: u64,
    pub bytes: u64,
    pub flushes: u64,
}

/// Start the writer thread for `path`
pub fn spawn_writer(
    path: PathBuf,
    queue: PartitionReceiver,
    flush_bytes: usize,
) -> Result<JoinHandle<Result<WriterStats>>> {
    let name = format!(
        "write-{}",
        path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default()
    );
    thread::Builder::new()
        .name(name)
        .spawn(move || run_writer(&path, &queue, flush_bytes))
        .map_err(IngestError::from)
}

/// Drain `queue` into `path` until the sentinel arrives or every sender is gone
pub fn run_writer(path: &Path, queue: &PartitionReceiver, flush_bytes: usize) -> Result<WriterStats> {
    let writer_err = |source: std::io::Error| IngestError::Writer {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(writer_err)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(writer_err)?;

    let mut stats = WriterStats::default();
    let mut buf: Vec<u8> = Vec::new();

    while let Some(message) = queue.recv() {
        match message {
            WriterMessage::Payload(payload) => {
                stats.payloads += 1;
                buf.extend_from_slice(&payload);
                if buf.len() >= flush_bytes {
                    flush(&mut file, &mut buf, &mut stats).map_err(writer_err)?;
                }
            }
            WriterMessage::Shutdown => break,
        }
    }

    flush(&mut file, &mut buf, &mut stats).map_err(writer_err)?;
    file.flush().map_err(writer_err)?;
    debug!(
        path = %path.display(),
        payloads = stats.payloads,
        bytes = stats.bytes,
        flushes = stats.flushes,
        "partition writer finished"
    );
    Ok(stats)
}

fn flush(file: &mut fs::File, buf: &mut Vec<u8>, stats: &mut WriterStats) -> std::io::Result<()> {
    if buf.is_empty() {
        return Ok(());
    }
    file.write_all(buf)?;
    stats.bytes += buf.len() as u64;
    stats.flushes += 1;
    buf.clear();
    Ok(())
}
