//! Stateless line classification and the thread pool that runs it

use crate::error::{IngestError, Result};
use crossbeam::channel::{self, Receiver, Sender};
use serde_json::{Map, Value};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use tracing::trace;

/// Stable identity of one output partition
///
/// Both components are already sanitized, so two keys that would map to the
/// same file are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub proc: String,
    pub operand: String,
}

impl PartitionKey {
    pub fn new(proc: &str, operand: &str) -> Self {
        Self {
            proc: sanitize_component(proc),
            operand: sanitize_component(operand),
        }
    }

    /// `{base}/procs/{proc}/{operand}.jsonl`
    pub fn path(&self, base: &Path) -> PathBuf {
        base.join("procs")
            .join(&self.proc)
            .join(format!("{}.jsonl", self.operand))
    }
}

/// Make a proc or operand safe to use as one path component
pub fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// One line bound for one partition; `payload` is the line plus `\n`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedLine {
    pub key: PartitionKey,
    pub payload: Vec<u8>,
}

/// Classification result of one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutput {
    pub seq: u64,
    /// Routable lines, in input order
    pub routed: Vec<RoutedLine>,
    pub skipped: u64,
}

/// Classify one line; `None` if it is not routable
pub fn classify_line(line: &str) -> Option<RoutedLine> {
    let object: Map<String, Value> = serde_json::from_str(line).ok()?;
    let proc = non_empty_str(&object, "proc")?;
    let operand = non_empty_str(&object, "operand")?;

    let mut payload = Vec::with_capacity(line.len() + 1);
    payload.extend_from_slice(line.as_bytes());
    payload.push(b'\n');

    Some(RoutedLine {
        key: PartitionKey::new(proc, operand),
        payload,
    })
}

fn non_empty_str<'a>(object: &'a Map<String, Value>, field: &str) -> Option<&'a str> {
    object
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Classify a batch, preserving line order
pub fn classify_batch(seq: u64, lines: &[String]) -> BatchOutput {
    let mut output = BatchOutput {
        seq,
        routed: Vec::with_capacity(lines.len()),
        skipped: 0,
    };
    for line in lines {
        match classify_line(line) {
            Some(routed) => output.routed.push(routed),
            None => {
                output.skipped += 1;
                trace!(batch = seq, "unroutable line skipped");
            }
        }
    }
    output
}

/// Batch classifier run by each pool thread
pub type Classifier = fn(u64, &[String]) -> BatchOutput;

/// Fixed set of classifier threads fed through a bounded job queue
///
/// Results come back on an unbounded channel; callers cap the number of
/// batches in flight themselves. A batch whose classifier panics comes back
/// as an error, so every submitted batch yields exactly one result.
pub struct WorkerPool {
    jobs: Option<Sender<(u64, Vec<String>)>>,
    results: Receiver<Result<BatchOutput>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `workers` threads running [`classify_batch`] with a job queue of
    /// `job_capacity` batches
    pub fn new(workers: usize, job_capacity: usize) -> Result<Self> {
        Self::with_classifier(workers, job_capacity, classify_batch)
    }

    pub fn with_classifier(workers: usize, job_capacity: usize, classify: Classifier) -> Result<Self> {
        let workers = workers.max(1);
        let (job_tx, job_rx) = channel::bounded::<(u64, Vec<String>)>(job_capacity.max(1));
        let (result_tx, result_rx) = channel::unbounded::<Result<BatchOutput>>();

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let jobs = job_rx.clone();
            let results = result_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("classify-{}", i))
                .spawn(move || {
                    for (seq, lines) in jobs {
                        let output = panic::catch_unwind(AssertUnwindSafe(|| classify(seq, &lines)))
                            .map_err(|_| {
                                IngestError::WorkerPool(format!("classifier panicked on batch {}", seq))
                            });
                        if results.send(output).is_err() {
                            break;
                        }
                    }
                })
                .map_err(|e| IngestError::WorkerPool(format!("failed to spawn worker {}: {}", i, e)))?;
            handles.push(handle);
        }

        Ok(Self {
            jobs: Some(job_tx),
            results: result_rx,
            handles,
        })
    }

    pub fn workers(&self) -> usize {
        self.handles.len()
    }

    /// Queue a batch; blocks while the job queue is full
    pub fn submit(&self, seq: u64, lines: Vec<String>) -> Result<()> {
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| IngestError::WorkerPool("pool already shut down".to_string()))?;
        jobs.send((seq, lines))
            .map_err(|_| IngestError::WorkerPool("all workers exited".to_string()))
    }

    /// Wait for the next finished batch (any order)
    pub fn recv(&self) -> Result<BatchOutput> {
        self.results
            .recv()
            .map_err(|_| IngestError::WorkerPool("all workers exited".to_string()))?
    }

    /// Close the job queue and join every worker
    pub fn shutdown(mut self) -> Result<()> {
        drop(self.jobs.take());

        let mut panicked = 0;
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            return Err(IngestError::WorkerPool(format!("{} worker(s) panicked", panicked)));
        }
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        drop(self.jobs.take());
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
