use super::{AggregateOrder, FileAggregate, Page, SpanQuery, SpanStore};
use crate::error::{IngestError, Result};
use crate::fd_resolver::FdNameResolver;
use crate::span_record::{IoSpan, MemorySpan, MetaSpan, Span};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

pub const IO_TABLE: &str = "io_spans.jsonl";
pub const META_TABLE: &str = "meta_spans.jsonl";
pub const MEMORY_TABLE: &str = "memory_spans.jsonl";

#[derive(Debug, Default)]
struct Tables {
    io: Vec<IoSpan>,
    meta: Vec<MetaSpan>,
    memory: Vec<MemorySpan>,
    next_io_id: u64,
    next_meta_id: u64,
    next_memory_id: u64,
}

impl Tables {
    fn next_id(counter: &mut u64) -> u64 {
        *counter += 1;
        *counter
    }
}

/// In-process span store with JSON-lines persistence
///
/// Each table keeps rows in insertion order; ids start at 1 per table.
/// Inserts take a write lock, queries a read lock, so correlator threads may
/// insert concurrently.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| IngestError::Store("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| IngestError::Store("store lock poisoned".to_string()))
    }

    /// Row counts as `(io, meta, memory)`
    pub fn counts(&self) -> Result<(usize, usize, usize)> {
        let tables = self.read()?;
        Ok((tables.io.len(), tables.meta.len(), tables.memory.len()))
    }

    /// I/O spans passing `query`, in id order, with their stored fname
    pub fn io_spans(&self, query: &SpanQuery) -> Result<Vec<IoSpan>> {
        let tables = self.read()?;
        Ok(query.paginate(tables.io.iter().filter(|s| query.matches(s)).cloned()))
    }

    /// I/O spans passing `query`, with fname computed by the fd join at query time
    ///
    /// Stored rows are left untouched. On a static dataset this returns the
    /// same fnames that [`SpanStore::resolve_fd_names`] would write.
    pub fn io_spans_resolved(&self, query: &SpanQuery) -> Result<Vec<IoSpan>> {
        let tables = self.read()?;
        let resolver = FdNameResolver::from_meta_spans(&tables.meta);

        let resolved = tables.io.iter().map(|span| {
            let mut span = span.clone();
            span.fname = resolver.resolve(&span.header.proc, span.fd, span.header.en_timestamp_ns);
            span
        });
        Ok(query.paginate(resolved.filter(|s| query.matches(s))))
    }

    pub fn meta_spans(&self) -> Result<Vec<MetaSpan>> {
        Ok(self.read()?.meta.clone())
    }

    pub fn memory_spans(&self) -> Result<Vec<MemorySpan>> {
        Ok(self.read()?.memory.clone())
    }

    /// Sorted distinct process names of the I/O table
    ///
    /// Only processes with I/O spans have per-file rows, so a process that
    /// only opened files is not listed.
    pub fn distinct_procs(&self) -> Result<Vec<String>> {
        let tables = self.read()?;
        let procs: BTreeSet<&str> = tables.io.iter().map(|s| s.header.proc.as_str()).collect();
        Ok(procs.into_iter().map(str::to_string).collect())
    }

    /// Per-file count, byte and latency totals of one process's I/O spans
    ///
    /// `close` spans are excluded. Ties on the sort key are broken by fname.
    pub fn file_aggregates(
        &self,
        proc: &str,
        order: AggregateOrder,
        descending: bool,
    ) -> Result<Vec<FileAggregate>> {
        let tables = self.read()?;

        let mut by_file: BTreeMap<&str, FileAggregate> = BTreeMap::new();
        for span in tables
            .io
            .iter()
            .filter(|s| s.header.proc == proc && s.header.event_name != "close")
        {
            let entry = by_file.entry(span.fname.as_str()).or_insert_with(|| FileAggregate {
                fname: span.fname.clone(),
                count: 0,
                total_bytes: 0,
                total_latency_ns: 0,
            });
            entry.count += 1;
            entry.total_bytes = entry.total_bytes.saturating_add(span.countbytes);
            entry.total_latency_ns = entry.total_latency_ns.saturating_add(span.header.latency_ns);
        }

        let mut aggregates: Vec<FileAggregate> = by_file.into_values().collect();
        aggregates.sort_by(|a, b| {
            let key = match order {
                AggregateOrder::Count => a.count.cmp(&b.count),
                AggregateOrder::Bytes => a.total_bytes.cmp(&b.total_bytes),
                AggregateOrder::Latency => a.total_latency_ns.cmp(&b.total_latency_ns),
            };
            let key = if descending { key.reverse() } else { key };
            key.then_with(|| a.fname.cmp(&b.fname))
        });
        Ok(aggregates)
    }

    /// Cut one page out of a listing (see [`Page::from_items`])
    pub fn paginate<T>(items: Vec<T>, page: usize, page_size: usize) -> Page<T> {
        Page::from_items(items, page, page_size)
    }

    /// Write all tables as JSON lines into `dir` (created if missing)
    pub fn persist<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let tables = self.read()?;
        write_table(&dir.join(IO_TABLE), &tables.io)?;
        write_table(&dir.join(META_TABLE), &tables.meta)?;
        write_table(&dir.join(MEMORY_TABLE), &tables.memory)?;

        info!(
            dir = %dir.display(),
            io = tables.io.len(),
            meta = tables.meta.len(),
            memory = tables.memory.len(),
            "store persisted"
        );
        Ok(())
    }

    /// Load a store written by [`MemoryStore::persist`]
    ///
    /// Missing table files are treated as empty tables.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let io: Vec<IoSpan> = read_table(&dir.join(IO_TABLE))?;
        let meta: Vec<MetaSpan> = read_table(&dir.join(META_TABLE))?;
        let memory: Vec<MemorySpan> = read_table(&dir.join(MEMORY_TABLE))?;

        let tables = Tables {
            next_io_id: io.iter().map(|s| s.header.id).max().unwrap_or(0),
            next_meta_id: meta.iter().map(|s| s.header.id).max().unwrap_or(0),
            next_memory_id: memory.iter().map(|s| s.header.id).max().unwrap_or(0),
            io,
            meta,
            memory,
        };

        Ok(Self {
            tables: RwLock::new(tables),
        })
    }
}

impl SpanStore for MemoryStore {
    fn insert_batch(&self, spans: Vec<Span>) -> Result<()> {
        if spans.is_empty() {
            return Ok(());
        }

        let mut tables = self.write()?;
        let tables = &mut *tables;
        for span in spans {
            match span {
                Span::Io(mut s) => {
                    s.header.id = Tables::next_id(&mut tables.next_io_id);
                    tables.io.push(s);
                }
                Span::Meta(mut s) => {
                    s.header.id = Tables::next_id(&mut tables.next_meta_id);
                    tables.meta.push(s);
                }
                Span::Memory(mut s) => {
                    s.header.id = Tables::next_id(&mut tables.next_memory_id);
                    tables.memory.push(s);
                }
            }
        }
        Ok(())
    }

    /// Rewrite every I/O span's fname from the metadata table
    ///
    /// Returns how many spans resolved to a traced open (standard-stream and
    /// `unknown` fallbacks are not counted).
    fn resolve_fd_names(&self) -> Result<usize> {
        let mut tables = self.write()?;
        let resolver = FdNameResolver::from_meta_spans(&tables.meta);

        let mut matched = 0;
        for span in tables.io.iter_mut() {
            let proc = &span.header.proc;
            match resolver.lookup(proc, span.fd, span.header.en_timestamp_ns) {
                Some(fname) => {
                    span.fname = fname.to_string();
                    matched += 1;
                }
                None => {
                    span.fname = resolver.resolve(proc, span.fd, span.header.en_timestamp_ns);
                }
            }
        }

        debug!(
            io_spans = tables.io.len(),
            index_entries = resolver.len(),
            matched,
            "fd names resolved"
        );
        Ok(matched)
    }
}

fn write_table<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for row in rows {
        serde_json::to_writer(&mut writer, row)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

fn read_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut rows = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        rows.push(serde_json::from_str(&line)?);
    }
    Ok(rows)
}
