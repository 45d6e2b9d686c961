use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use sysspan::cli::{Cli, Command, SummaryOrder};
use sysspan::config::SysspanConfig;
use sysspan::loader::TraceLoader;
use sysspan::pipeline::IngestionPipeline;
use sysspan::store::{MemoryStore, Page};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber (info by default, trace with --debug)
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<SysspanConfig> {
    let mut config = match &cli.config {
        Some(path) => SysspanConfig::from_toml(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SysspanConfig::default(),
    };
    cli.apply_overrides(&mut config);
    config.validate().context("Invalid configuration after applying flags")?;
    Ok(config)
}

fn run_load(config: &SysspanConfig, logs_dir: &Path, out: Option<&Path>) -> Result<()> {
    let out = out.map_or_else(|| logs_dir.join("store"), Path::to_path_buf);
    let store = Arc::new(MemoryStore::new());

    let report = TraceLoader::new(config.loader.clone())
        .run(logs_dir, store.clone())
        .with_context(|| format!("Failed to load traces from {}", logs_dir.display()))?;
    store
        .persist(&out)
        .with_context(|| format!("Failed to write store to {}", out.display()))?;

    for kind in &report.kinds {
        println!(
            "{:<7} files={} lines={} malformed={} spans={} orphan_exits={} rejected={}",
            kind.kind.as_str(),
            kind.files,
            kind.lines,
            kind.malformed,
            kind.buffer.spans_written,
            kind.correlator.orphan_exits,
            kind.correlator.rejected_pairs,
        );
    }
    println!(
        "resolved {} fd names; store written to {}",
        report.fd_names_resolved,
        out.display()
    );
    Ok(())
}

fn run_index(config: &SysspanConfig, base_dir: &Path) -> Result<()> {
    let report = IngestionPipeline::new(config.pipeline.clone())
        .run(base_dir)
        .with_context(|| format!("Failed to index {}", base_dir.display()))?;

    println!(
        "lines={} routed={} skipped={} batches={} partitions={} bytes={} elapsed={:.3}s",
        report.lines_read,
        report.lines_routed,
        report.lines_skipped,
        report.batches,
        report.partitions,
        report.bytes_written,
        report.elapsed.as_secs_f64(),
    );
    Ok(())
}

fn run_summary(
    config: &SysspanConfig,
    store_dir: &Path,
    proc_name: Option<&str>,
    order: SummaryOrder,
    desc: bool,
    page: usize,
) -> Result<()> {
    if !store_dir.is_dir() {
        anyhow::bail!("Store directory not found: {}", store_dir.display());
    }
    let store = MemoryStore::open(store_dir)
        .with_context(|| format!("Failed to open store {}", store_dir.display()))?;

    let Some(proc_name) = proc_name else {
        for proc_name in store.distinct_procs()? {
            println!("{}", proc_name);
        }
        return Ok(());
    };

    let aggregates = store.file_aggregates(proc_name, order.into(), desc)?;
    let page: Page<_> = MemoryStore::paginate(aggregates, page, config.store.page_size);

    println!("{:<48} {:>10} {:>14} {:>16}", "FILE", "CALLS", "BYTES", "LATENCY_NS");
    for row in &page.data {
        println!(
            "{:<48} {:>10} {:>14} {:>16}",
            row.fname, row.count, row.total_bytes, row.total_latency_ns
        );
    }
    println!(
        "page {}/{} ({} files)",
        page.page,
        page.total_pages.max(1),
        page.total
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = load_config(&cli)?;

    match &cli.command {
        Command::Load { logs_dir, out, .. } => run_load(&config, logs_dir, out.as_deref()),
        Command::Index { base_dir, .. } => run_index(&config, base_dir),
        Command::Summary {
            store_dir,
            proc_name,
            order,
            desc,
            page,
        } => run_summary(&config, store_dir, proc_name.as_deref(), *order, *desc, *page),
    }
}
