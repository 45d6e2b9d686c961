//! JSON-lines partitioning pipeline
//!
//! The high-throughput path: split one merged `logs.jsonl` into one file per
//! `(proc, operand)`.
//!
//! ```text
//! ┌──────────────┐  batches   ┌──────────────┐  BatchOutput  ┌──────────────┐
//! │ MmapLines    │──(seq)────►│ WorkerPool   │──(any order)─►│ reorder by   │
//! │ (zero-copy)  │  bounded   │ classify_*   │               │ seq          │
//! └──────────────┘            └──────────────┘               └──────┬───────┘
//!                                                                   │ RoutedLine
//!                                                                   ▼
//!                     ┌──────────────────────── PartitionRouter ────────────┐
//!                     │ (proc, operand) ─► bounded queue ─► writer thread   │
//!                     │                                      append + flush │
//!                     └─────────────────────────────────────────────────────┘
//! ```
//!
//! Classification is stateless, so batches run on any worker in any order.
//! Results are routed strictly in batch order, which keeps every partition
//! file in input line order. Backpressure comes only from the partition
//! queues: a full queue blocks the router, which stops collecting results,
//! which stops new submissions once the in-flight cap is reached.
//!
//! Unroutable lines are skipped. Any writer failure fails the run, after
//! every writer has been joined.

pub mod reader;
pub mod router;
pub mod worker;
pub mod writer;

pub use reader::MmapLines;
pub use router::{PartitionRouter, RouterTotals};
pub use worker::{classify_batch, classify_line, BatchOutput, PartitionKey, RoutedLine, WorkerPool};

use crate::config::PipelineConfig;
use crate::error::{IngestError, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::info;

/// Batches between progress log lines
const PROGRESS_EVERY: u64 = 100;

/// Summary of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub lines_read: u64,
    pub lines_routed: u64,
    /// Unroutable lines, including lines that were not UTF-8
    pub lines_skipped: u64,
    pub batches: u64,
    pub partitions: usize,
    pub bytes_written: u64,
    pub elapsed: Duration,
}

/// Configured pipeline; one `run` per input file
#[derive(Debug, Clone, Default)]
pub struct IngestionPipeline {
    config: PipelineConfig,
}

impl IngestionPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Partition `{base}/{input_name}` into `{base}/procs/`
    ///
    /// # Errors
    /// Fails if the input cannot be mapped, a thread cannot be spawned, or
    /// any partition writer fails. A writer's own I/O error is reported in
    /// preference to the disconnect it causes on the routing side.
    pub fn run(&self, base: &Path) -> Result<PipelineReport> {
        let start = Instant::now();
        let input = base.join(&self.config.input_name);
        let batch_lines = self.config.batch_lines.max(1);
        let workers = self.config.effective_workers();
        let max_in_flight = workers * 2;

        let mut lines = MmapLines::open(&input)?;
        info!(
            input = %input.display(),
            bytes = lines.len_bytes(),
            workers,
            batch_lines,
            "pipeline started"
        );

        let pool = WorkerPool::new(workers, max_in_flight)?;
        let mut router =
            PartitionRouter::new(base, self.config.queue_capacity, self.config.flush_bytes);
        let mut report = PipelineReport::default();

        let routed = self.dispatch(&mut lines, &pool, &mut router, batch_lines, max_in_flight, &mut report);
        let pool_closed = pool.shutdown();
        report.partitions = router.partitions();
        let joined = router.shutdown();

        let totals = match (routed, pool_closed, joined) {
            (_, _, Err(e @ IngestError::Writer { .. })) => return Err(e),
            (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => return Err(e),
            (Ok(()), Ok(()), Ok(totals)) => totals,
        };

        let invalid_utf8 = lines.invalid_utf8();
        report.lines_read += invalid_utf8;
        report.lines_skipped += invalid_utf8;
        report.bytes_written = totals.bytes;
        report.elapsed = start.elapsed();

        info!(
            lines_read = report.lines_read,
            lines_routed = report.lines_routed,
            lines_skipped = report.lines_skipped,
            batches = report.batches,
            partitions = report.partitions,
            bytes_written = report.bytes_written,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "pipeline complete"
        );
        Ok(report)
    }

    /// Feed batches to the pool and route results in submission order
    fn dispatch(
        &self,
        lines: &mut MmapLines,
        pool: &WorkerPool,
        router: &mut PartitionRouter,
        batch_lines: usize,
        max_in_flight: usize,
        report: &mut PipelineReport,
    ) -> Result<()> {
        let mut pending: BTreeMap<u64, BatchOutput> = BTreeMap::new();
        let mut next_seq = 0u64;
        let mut submitted = 0u64;

        loop {
            let batch: Vec<String> = lines.by_ref().take(batch_lines).collect();
            if batch.is_empty() {
                break;
            }

            // in flight = submitted but not yet routed
            while submitted - next_seq >= max_in_flight as u64 {
                collect_one(pool, &mut pending, &mut next_seq, router, report)?;
            }

            report.lines_read += batch.len() as u64;
            pool.submit(submitted, batch)?;
            submitted += 1;
            report.batches += 1;

            if report.batches % PROGRESS_EVERY == 0 {
                info!(
                    batches = report.batches,
                    lines_read = report.lines_read,
                    lines_routed = report.lines_routed,
                    partitions = router.partitions(),
                    "pipeline progress"
                );
            }
        }

        while next_seq < submitted {
            collect_one(pool, &mut pending, &mut next_seq, router, report)?;
        }
        Ok(())
    }
}

/// Receive one batch result and route every batch that is now in order
fn collect_one(
    pool: &WorkerPool,
    pending: &mut BTreeMap<u64, BatchOutput>,
    next_seq: &mut u64,
    router: &mut PartitionRouter,
    report: &mut PipelineReport,
) -> Result<()> {
    let output = pool.recv()?;
    pending.insert(output.seq, output);

    while let Some(output) = pending.remove(next_seq) {
        report.lines_skipped += output.skipped;
        for line in output.routed {
            router.route(line)?;
            report.lines_routed += 1;
        }
        *next_seq += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config(batch_lines: usize, workers: usize) -> PipelineConfig {
        PipelineConfig {
            batch_lines,
            workers,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_partitions_in_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut input = String::new();
        for i in 0..50 {
            let operand = if i % 2 == 0 { "read" } else { "write" };
            input.push_str(&format!(r#"{{"proc":"app","operand":"{}","n":{}}}"#, operand, i));
            input.push('\n');
        }
        input.push_str("not json\n");
        fs::write(dir.path().join("logs.jsonl"), input).unwrap();

        let report = IngestionPipeline::new(config(3, 4)).run(dir.path()).unwrap();
        assert_eq!(report.lines_read, 51);
        assert_eq!(report.lines_routed, 50);
        assert_eq!(report.lines_skipped, 1);
        assert_eq!(report.batches, 17);
        assert_eq!(report.partitions, 2);

        let reads = fs::read_to_string(dir.path().join("procs/app/read.jsonl")).unwrap();
        let ns: Vec<u64> = reads
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["n"].as_u64().unwrap())
            .collect();
        assert_eq!(ns, (0..50).step_by(2).collect::<Vec<_>>());
        assert_eq!(report.bytes_written, fs::read_to_string(dir.path().join("procs/app/write.jsonl")).unwrap().len() as u64 + reads.len() as u64);
    }

    #[test]
    fn test_missing_input_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            IngestionPipeline::default().run(dir.path()),
            Err(IngestError::Io(_))
        ));
    }

    #[test]
    fn test_empty_input() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("logs.jsonl"), "").unwrap();
        let report = IngestionPipeline::new(config(10, 2)).run(dir.path()).unwrap();
        assert_eq!(report.lines_read, 0);
        assert_eq!(report.partitions, 0);
        assert!(!dir.path().join("procs").exists());
    }

    #[test]
    fn test_writer_failure_fails_run() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("logs.jsonl"), "{\"proc\":\"p\",\"operand\":\"read\"}\n").unwrap();
        fs::write(dir.path().join("procs"), "not a directory").unwrap();

        let err = IngestionPipeline::new(config(10, 1)).run(dir.path()).unwrap_err();
        assert!(matches!(err, IngestError::Writer { .. }));
    }
}
