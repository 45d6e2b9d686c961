//! Trace-file loader
//!
//! The primary ingestion path. A logs directory holds one clock reference
//! file plus any number of trace files per kind:
//!
//! ```text
//! logs/
//! ├─ reference_timestamps.json   {"ref_mono": .., "ref_wall": ..}
//! ├─ trace_meta_0.log  ─┐
//! ├─ trace_meta_1.log  ─┴─► meta correlator ───┐
//! ├─ trace_io_0.log    ───► io correlator ─────┼─► SpanBuffer ─► SpanStore
//! └─ trace_memory_0.log ──► memory correlator ─┘        (batch_size)
//! ```
//!
//! Each kind runs on its own thread with its own correlator; the store is the
//! only shared state. Once all three finish, the store's fd-name pass runs
//! over the complete metadata table.
//!
//! A missing or invalid reference file aborts before any trace file is read.
//! Lines that do not parse are skipped and counted.

use crate::clock::{ClockReconciler, ClockReference};
use crate::config::{matches_pattern, LoaderConfig};
use crate::correlator::{CorrelatorStats, EventCorrelator};
use crate::error::{IngestError, Result};
use crate::line_parser::parse_line;
use crate::span_buffer::{BufferStats, SpanBuffer};
use crate::span_record::TraceKind;
use crate::store::SpanStore;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Outcome of loading one trace kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindReport {
    pub kind: TraceKind,
    pub files: usize,
    pub lines: u64,
    /// Lines that did not match the line grammar
    pub malformed: u64,
    pub correlator: CorrelatorStats,
    pub buffer: BufferStats,
}

impl KindReport {
    fn new(kind: TraceKind) -> Self {
        Self {
            kind,
            files: 0,
            lines: 0,
            malformed: 0,
            correlator: CorrelatorStats::default(),
            buffer: BufferStats::default(),
        }
    }
}

/// Outcome of a whole load run
#[derive(Debug, Clone)]
pub struct LoadReport {
    /// One entry per kind, in [`TraceKind::ALL`] order
    pub kinds: Vec<KindReport>,
    /// I/O spans whose fd matched a traced open
    pub fd_names_resolved: usize,
    pub elapsed: Duration,
}

impl LoadReport {
    pub fn kind(&self, kind: TraceKind) -> Option<&KindReport> {
        self.kinds.iter().find(|k| k.kind == kind)
    }

    /// Spans written across all kinds
    pub fn spans_written(&self) -> u64 {
        self.kinds.iter().map(|k| k.buffer.spans_written).sum()
    }
}

/// Loads a logs directory into a [`SpanStore`]
#[derive(Debug, Clone, Default)]
pub struct TraceLoader {
    config: LoaderConfig,
}

impl TraceLoader {
    pub fn new(config: LoaderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Read the clock reference of a logs directory
    pub fn read_reference(&self, logs_dir: &Path) -> Result<ClockReconciler> {
        let reference = ClockReference::from_file(logs_dir.join(&self.config.reference_file))?;
        Ok(ClockReconciler::new(reference))
    }

    /// Trace files of one kind, sorted by file name
    pub fn discover(&self, logs_dir: &Path, kind: TraceKind) -> Result<Vec<PathBuf>> {
        let pattern = self.config.pattern(kind);
        let mut files = Vec::new();
        for entry in fs::read_dir(logs_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            // follows symlinks; a dangling link is skipped
            let path = entry.path();
            if matches_pattern(pattern, name) && path.is_file() {
                files.push(path);
            }
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(files)
    }

    /// Load every trace kind, then run the store's fd-name pass
    ///
    /// # Errors
    /// A bad reference file, an unreadable directory or trace file, or a
    /// failed store insert aborts the run.
    pub fn run(&self, logs_dir: &Path, store: Arc<dyn SpanStore>) -> Result<LoadReport> {
        let start = Instant::now();
        let clock = self.read_reference(logs_dir)?;
        info!(
            logs_dir = %logs_dir.display(),
            ref_mono_ns = clock.ref_mono_ns(),
            ref_wall_ns = clock.ref_wall_ns(),
            "clock reference loaded"
        );

        let mut plan = Vec::with_capacity(TraceKind::ALL.len());
        for kind in TraceKind::ALL {
            let files = self.discover(logs_dir, kind)?;
            if files.is_empty() {
                warn!(%kind, pattern = self.config.pattern(kind), "no trace files found");
            } else {
                debug!(%kind, files = files.len(), "trace files discovered");
            }
            plan.push((kind, files));
        }

        let results: Vec<Result<KindReport>> = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(plan.len());
            for (kind, files) in &plan {
                let store = Arc::clone(&store);
                let spawned = thread::Builder::new()
                    .name(format!("correlate-{}", kind))
                    .spawn_scoped(scope, move || self.load_kind(*kind, files, clock, store));
                handles.push((*kind, spawned));
            }

            handles
                .into_iter()
                .map(|(kind, spawned)| -> Result<KindReport> {
                    let handle = spawned?;
                    handle.join().map_err(|_| {
                        IngestError::WorkerPool(format!("{} correlator thread panicked", kind))
                    })?
                })
                .collect()
        });

        let mut kinds = Vec::with_capacity(results.len());
        for result in results {
            kinds.push(result?);
        }

        let fd_names_resolved = store.resolve_fd_names()?;
        let report = LoadReport {
            kinds,
            fd_names_resolved,
            elapsed: start.elapsed(),
        };
        info!(
            spans = report.spans_written(),
            fd_names_resolved,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "load complete"
        );
        Ok(report)
    }

    /// Correlate all files of one kind through a single correlator
    pub fn load_kind(
        &self,
        kind: TraceKind,
        files: &[PathBuf],
        clock: ClockReconciler,
        store: Arc<dyn SpanStore>,
    ) -> Result<KindReport> {
        let mut correlator = EventCorrelator::new(kind, clock);
        let mut buffer = SpanBuffer::new(store, self.config.batch_size)?;
        let mut report = KindReport::new(kind);

        for path in files {
            let (lines, malformed) = feed_file(path, &mut correlator, &mut buffer)?;
            report.files += 1;
            report.lines += lines;
            report.malformed += malformed;
            debug!(%kind, file = %path.display(), lines, malformed, "trace file loaded");
        }

        report.correlator = correlator.finish();
        report.buffer = buffer.finish()?;

        if report.correlator.negative_latency > 0 {
            warn!(
                %kind,
                pairs = report.correlator.negative_latency,
                "pairs dropped because EXIT precedes ENTER after clock reconciliation"
            );
        }

        let stats = &report.correlator;
        info!(
            %kind,
            files = report.files,
            lines = report.lines,
            malformed = report.malformed,
            enters = stats.enters,
            exits = stats.exits,
            orphan_exits = stats.orphan_exits,
            overwritten_enters = stats.overwritten_enters,
            rejected_pairs = stats.rejected_pairs,
            negative_latency = stats.negative_latency,
            unmatched_enters = stats.unmatched_enters,
            spans = report.buffer.spans_written,
            "trace kind loaded"
        );
        Ok(report)
    }
}

/// Stream one file through the correlator; returns `(lines, malformed)`
fn feed_file(
    path: &Path,
    correlator: &mut EventCorrelator,
    buffer: &mut SpanBuffer,
) -> Result<(u64, u64)> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut raw = Vec::new();
    let (mut lines, mut malformed) = (0u64, 0u64);

    loop {
        raw.clear();
        if reader.read_until(b'\n', &mut raw)? == 0 {
            break;
        }
        lines += 1;

        let parsed = std::str::from_utf8(&raw).ok().and_then(parse_line);
        let Some(line) = parsed else {
            malformed += 1;
            trace!(file = %path.display(), line = lines, "malformed line skipped");
            continue;
        };

        if let Some(span) = correlator.observe(line) {
            buffer.push(span)?;
        }
    }
    Ok((lines, malformed))
}
