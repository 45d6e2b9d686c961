//! Sysspan - syscall trace ingestion
//!
//! Turns per-thread ENTER/EXIT syscall trace lines into latency spans,
//! resolves file descriptors to file names, and splits merged JSON-lines
//! logs into per-process, per-syscall files.
//!
//! ```text
//! trace_*.log ─► line_parser ─► correlator ─► span_buffer ─► store ─► fd_resolver
//!                                  ▲
//!                                clock
//!
//! logs.jsonl  ─► pipeline (mmap reader ─► worker pool ─► router ─► writers)
//! ```

pub mod cli;
pub mod clock;
pub mod config;
pub mod correlator;
pub mod error;
pub mod fd_resolver;
pub mod line_parser;
pub mod loader;
pub mod pipeline;
pub mod span_buffer;
pub mod span_record;
pub mod store;

pub use error::{IngestError, Result};
