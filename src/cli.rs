//! CLI argument parsing for sysspan

use crate::config::SysspanConfig;
use crate::store::AggregateOrder;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Sort key for `summary` output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SummaryOrder {
    /// Number of calls per file (default)
    Count,
    /// Total bytes per file
    Bytes,
    /// Total latency per file
    Latency,
}

impl From<SummaryOrder> for AggregateOrder {
    fn from(order: SummaryOrder) -> Self {
        match order {
            SummaryOrder::Count => AggregateOrder::Count,
            SummaryOrder::Bytes => AggregateOrder::Bytes,
            SummaryOrder::Latency => AggregateOrder::Latency,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "sysspan")]
#[command(version)]
#[command(about = "Correlate syscall ENTER/EXIT traces into queryable spans", long_about = None)]
pub struct Cli {
    /// TOML configuration file (flags override its values)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable trace-level logging to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Correlate trace_*.log files of a directory into a span store
    Load {
        /// Directory holding the trace files and the clock reference
        logs_dir: PathBuf,

        /// Store directory (default: <LOGS_DIR>/store)
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,

        /// Spans per store insert
        #[arg(long, value_name = "N")]
        batch_size: Option<usize>,
    },

    /// Split <BASE_DIR>/logs.jsonl into per-(proc, operand) files
    Index {
        base_dir: PathBuf,

        /// Classifier threads (default: available cores)
        #[arg(long, value_name = "N")]
        workers: Option<usize>,

        /// Lines per worker batch
        #[arg(long, value_name = "N")]
        batch_lines: Option<usize>,

        /// Per-partition queue capacity
        #[arg(long, value_name = "N")]
        queue_capacity: Option<usize>,

        /// Buffered bytes that trigger a partition flush
        #[arg(long, value_name = "BYTES")]
        flush_bytes: Option<usize>,
    },

    /// List processes, or per-file totals for one process
    Summary {
        store_dir: PathBuf,

        /// Show per-file totals for this process
        #[arg(long = "proc", value_name = "PROC")]
        proc_name: Option<String>,

        /// Sort key for per-file totals
        #[arg(long, value_enum, default_value = "count")]
        order: SummaryOrder,

        /// Sort descending
        #[arg(long)]
        desc: bool,

        /// Page number (1-based)
        #[arg(long, default_value_t = 1)]
        page: usize,
    },
}

impl Cli {
    /// Apply this invocation's flags on top of `config`
    pub fn apply_overrides(&self, config: &mut SysspanConfig) {
        match &self.command {
            Command::Load { batch_size, .. } => {
                if let Some(n) = batch_size {
                    config.loader.batch_size = *n;
                }
            }
            Command::Index {
                workers,
                batch_lines,
                queue_capacity,
                flush_bytes,
                ..
            } => {
                let pipeline = &mut config.pipeline;
                if let Some(n) = workers {
                    pipeline.workers = *n;
                }
                if let Some(n) = batch_lines {
                    pipeline.batch_lines = *n;
                }
                if let Some(n) = queue_capacity {
                    pipeline.queue_capacity = *n;
                }
                if let Some(n) = flush_bytes {
                    pipeline.flush_bytes = *n;
                }
            }
            Command::Summary { .. } => {}
        }
    }
}
