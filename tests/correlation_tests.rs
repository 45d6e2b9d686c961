//! Integration tests for the trace-file loader: ENTER/EXIT correlation,
//! batching, and failure handling across all three trace kinds

mod utils;

use std::sync::{Arc, Mutex};
use sysspan::config::LoaderConfig;
use sysspan::error::IngestError;
use sysspan::loader::{LoadReport, TraceLoader};
use sysspan::span_record::{Span, TraceKind};
use sysspan::store::{MemoryStore, SpanQuery, SpanStore};
use utils::{en, ex, LogsDir};

fn load(logs: &LogsDir) -> (Arc<MemoryStore>, LoadReport) {
    let store = Arc::new(MemoryStore::new());
    let report = TraceLoader::default()
        .run(logs.path(), store.clone())
        .expect("load succeeds");
    (store, report)
}

#[test]
fn test_single_read_pair_end_to_end() {
    let logs = LogsDir::with_reference(0.0, 0.0);
    logs.trace(
        "trace_io_0.log",
        &[
            "1000 {pid=1 tid=1 proc=foo}{EN read}{fd=3}",
            "2000 {pid=1 tid=1 proc=foo}{EX read}{ret=10 count=4096}",
        ],
    );

    let (store, report) = load(&logs);
    let spans = store.io_spans(&SpanQuery::new()).unwrap();
    assert_eq!(spans.len(), 1);

    let span = &spans[0];
    assert_eq!(span.header.id, 1);
    assert_eq!(span.header.proc, "foo");
    assert_eq!(span.header.event_name, "read");
    assert_eq!(span.fd, 3);
    assert_eq!(span.ret, 10);
    assert_eq!(span.countbytes, 4096);
    assert_eq!(span.header.latency_ns, 1000);
    assert_eq!(span.header.en_timestamp_ns, 1000);
    assert_eq!(span.header.ex_timestamp_ns, 2000);
    // fd 3 was never opened in the trace
    assert_eq!(span.fname, "unknown");

    assert_eq!(report.spans_written(), 1);
}

#[test]
fn test_wall_times_follow_reference() {
    // ref_mono = 1s, ref_wall = 1000s: mono 1.5s is wall 1000.5s
    let logs = LogsDir::with_reference(1.0, 1000.0);
    logs.trace(
        "trace_meta_0.log",
        &[
            en(1_500_000_000, 9, 9, "app", "openat", "fname=/etc/hosts"),
            ex(1_500_000_250, 9, 9, "app", "openat", "ret=4"),
        ],
    );

    let (store, _) = load(&logs);
    let meta = store.meta_spans().unwrap();
    assert_eq!(meta.len(), 1);
    assert_eq!(meta[0].header.en_wall_time.timestamp_nanos_opt(), Some(1_000_500_000_000));
    assert_eq!(meta[0].header.latency_ns, 250);
    assert_eq!(meta[0].fname, "/etc/hosts");
    assert_eq!(meta[0].ret, 4);
}

#[test]
fn test_interleaved_threads_pair_independently() {
    let logs = LogsDir::with_reference(0.0, 0.0);
    logs.trace(
        "trace_io_0.log",
        &[
            en(100, 1, 1, "p", "read", "fd=3 count=10"),
            en(110, 1, 2, "p", "write", "fd=4 count=20"),
            ex(150, 1, 2, "p", "write", "ret=20"),
            ex(300, 1, 1, "p", "read", "ret=10"),
        ],
    );

    let (store, _) = load(&logs);
    let spans = store.io_spans(&SpanQuery::new()).unwrap();
    assert_eq!(spans.len(), 2);

    let write = spans.iter().find(|s| s.header.event_name == "write").unwrap();
    assert_eq!((write.header.tid, write.fd, write.header.latency_ns), (2, 4, 40));
    let read = spans.iter().find(|s| s.header.event_name == "read").unwrap();
    assert_eq!((read.header.tid, read.fd, read.header.latency_ns), (1, 3, 200));
}

#[test]
fn test_failed_calls_and_orphans_are_not_persisted() {
    let logs = LogsDir::with_reference(0.0, 0.0);
    logs.trace(
        "trace_io_0.log",
        &[
            ex(50, 1, 1, "p", "read", "ret=1"),
            en(100, 1, 1, "p", "read", "fd=3"),
            ex(200, 1, 1, "p", "read", "ret=-11"),
            en(300, 1, 1, "p", "read", "fd=-1"),
            ex(400, 1, 1, "p", "read", "ret=5"),
            en(500, 1, 1, "p", "read", "fd=3"),
        ],
    );
    logs.trace(
        "trace_meta_0.log",
        &[
            en(100, 1, 1, "p", "openat", "fname=/missing"),
            ex(200, 1, 1, "p", "openat", "ret=-2"),
        ],
    );

    let (store, report) = load(&logs);
    assert_eq!(store.counts().unwrap(), (0, 0, 0));

    let io = report.kind(TraceKind::Io).unwrap();
    assert_eq!(io.correlator.orphan_exits, 1);
    assert_eq!(io.correlator.rejected_pairs, 2);
    assert_eq!(io.correlator.unmatched_enters, 1);
    assert_eq!(report.kind(TraceKind::Meta).unwrap().correlator.rejected_pairs, 1);
}

#[test]
fn test_duplicate_enter_keeps_the_last() {
    let logs = LogsDir::with_reference(0.0, 0.0);
    logs.trace(
        "trace_io_0.log",
        &[
            en(100, 1, 1, "p", "read", "fd=3 count=1"),
            en(200, 1, 1, "p", "pread64", "fd=7 count=2"),
            ex(300, 1, 1, "p", "pread64", "ret=2"),
        ],
    );

    let (store, report) = load(&logs);
    let spans = store.io_spans(&SpanQuery::new()).unwrap();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].fd, 7);
    assert_eq!(spans[0].countbytes, 2);
    assert_eq!(spans[0].header.event_name, "pread64");
    assert_eq!(spans[0].header.latency_ns, 100);
    assert_eq!(report.kind(TraceKind::Io).unwrap().correlator.overwritten_enters, 1);
}

#[test]
fn test_memory_spans() {
    let logs = LogsDir::with_reference(0.0, 0.0);
    logs.trace(
        "trace_memory_0.log",
        &[
            en(10, 2, 2, "db", "mmap", "addr=0 len=4096 fd=5"),
            ex(30, 2, 2, "db", "mmap", "ret=140000000"),
            en(40, 2, 2, "db", "mmap", "len=8192"),
            ex(45, 2, 2, "db", "mmap", "ret=140004096"),
        ],
    );

    let (store, _) = load(&logs);
    let memory = store.memory_spans().unwrap();
    assert_eq!(memory.len(), 2);
    assert_eq!((memory[0].fd, memory[0].length, memory[0].ret), (5, 4096, 140_000_000));
    // anonymous mapping: no fd given
    assert_eq!((memory[1].fd, memory[1].length), (-1, 8192));
}

#[test]
fn test_files_of_a_kind_share_one_correlator() {
    // an ENTER at the end of one file is completed by the first line of the next
    let logs = LogsDir::with_reference(0.0, 0.0);
    logs.trace("trace_io_0.log", &[en(100, 1, 1, "p", "read", "fd=3")]);
    logs.trace("trace_io_1.log", &[ex(200, 1, 1, "p", "read", "ret=8")]);

    let (store, report) = load(&logs);
    assert_eq!(store.io_spans(&SpanQuery::new()).unwrap().len(), 1);
    assert_eq!(report.kind(TraceKind::Io).unwrap().files, 2);
}

#[test]
fn test_malformed_lines_are_skipped() {
    let logs = LogsDir::with_reference(0.0, 0.0);
    logs.trace(
        "trace_io_0.log",
        &[
            "".to_string(),
            "1000 pid=1 tid=1 proc=foo EN read fd=3".to_string(),
            en(100, 1, 1, "p", "read", "fd=3"),
            "{\"json\": true}".to_string(),
            ex(200, 1, 1, "p", "read", "ret=8"),
        ],
    );

    let (store, report) = load(&logs);
    assert_eq!(store.io_spans(&SpanQuery::new()).unwrap().len(), 1);
    let io = report.kind(TraceKind::Io).unwrap();
    assert_eq!(io.lines, 5);
    assert_eq!(io.malformed, 3);
}

#[test]
fn test_batches_reach_the_store() {
    let logs = LogsDir::with_reference(0.0, 0.0);
    let mut lines = Vec::new();
    for i in 0..7u64 {
        lines.push(en(i * 10, 1, 1, "p", "read", "fd=3"));
        lines.push(ex(i * 10 + 5, 1, 1, "p", "read", "ret=1"));
    }
    logs.trace("trace_io_0.log", &lines);

    let store = Arc::new(MemoryStore::new());
    let config = LoaderConfig {
        batch_size: 3,
        ..LoaderConfig::default()
    };
    let report = TraceLoader::new(config).run(logs.path(), store.clone()).unwrap();

    let io = report.kind(TraceKind::Io).unwrap();
    assert_eq!(io.buffer.spans_written, 7);
    // 3 + 3 on the way, 1 at end of stream
    assert_eq!(io.buffer.flushes, 3);
    let ids: Vec<u64> = store.io_spans(&SpanQuery::new()).unwrap().iter().map(|s| s.header.id).collect();
    assert_eq!(ids, (1..=7).collect::<Vec<_>>());
}

#[test]
fn test_missing_reference_aborts() {
    let logs = LogsDir::without_reference();
    logs.trace("trace_io_0.log", &[en(1, 1, 1, "p", "read", "fd=3")]);

    let result = TraceLoader::default().run(logs.path(), Arc::new(MemoryStore::new()));
    assert!(matches!(result, Err(IngestError::ReferenceRead { .. })));
}

#[test]
fn test_invalid_reference_aborts() {
    let logs = LogsDir::without_reference();
    std::fs::write(logs.path().join("reference_timestamps.json"), r#"{"ref_mono": 1.0}"#).unwrap();

    let result = TraceLoader::default().run(logs.path(), Arc::new(MemoryStore::new()));
    assert!(matches!(result, Err(IngestError::ReferenceInvalid { .. })));
}

/// Accepts a fixed number of batches, then fails every insert
struct FlakyStore {
    accepted: Mutex<usize>,
    limit: usize,
}

impl SpanStore for FlakyStore {
    fn insert_batch(&self, _spans: Vec<Span>) -> sysspan::Result<()> {
        let mut accepted = self.accepted.lock().unwrap();
        if *accepted >= self.limit {
            return Err(IngestError::Store("insert rejected".to_string()));
        }
        *accepted += 1;
        Ok(())
    }
}

#[test]
fn test_store_failure_aborts_run() {
    let logs = LogsDir::with_reference(0.0, 0.0);
    logs.trace(
        "trace_io_0.log",
        &[en(1, 1, 1, "p", "read", "fd=3"), ex(2, 1, 1, "p", "read", "ret=1")],
    );

    let store = Arc::new(FlakyStore {
        accepted: Mutex::new(0),
        limit: 0,
    });
    let result = TraceLoader::default().run(logs.path(), store);
    assert!(matches!(result, Err(IngestError::Store(_))));
}

#[test]
fn test_all_kinds_share_the_store() {
    let logs = LogsDir::with_reference(0.0, 0.0);
    let mut io = Vec::new();
    let mut meta = Vec::new();
    let mut memory = Vec::new();
    for i in 0..200u64 {
        let tid = (i % 4) as u32;
        io.push(en(i * 10, 1, tid, "p", "read", "fd=3"));
        io.push(ex(i * 10 + 1, 1, tid, "p", "read", "ret=1"));
        meta.push(en(i * 10, 1, tid, "p", "openat", "fname=/f"));
        meta.push(ex(i * 10 + 1, 1, tid, "p", "openat", "ret=3"));
        memory.push(en(i * 10, 1, tid, "p", "mmap", "len=4096"));
        memory.push(ex(i * 10 + 1, 1, tid, "p", "mmap", "ret=4096"));
    }
    logs.trace("trace_io_0.log", &io);
    logs.trace("trace_meta_0.log", &meta);
    logs.trace("trace_memory_0.log", &memory);

    let (store, report) = load(&logs);
    assert_eq!(store.counts().unwrap(), (200, 200, 200));
    assert_eq!(report.spans_written(), 600);
    assert_eq!(report.fd_names_resolved, 200);
}
