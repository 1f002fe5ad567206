//! Binary entry point for the `sombra-check` consistency CLI.
#![forbid(unsafe_code)]

#[path = "cli/config.rs"]
mod config;
#[path = "cli/ui.rs"]
mod ui;

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use config::CliConfig;
use ui::{format_duration, Theme, Ui};
use sombra_check::{
    check::{
        budget_factory, CheckInputs, CheckOptions, CheckScope, ConsistencySummary, EntityRange,
        FullCheck, MemoryTracker,
    },
    primitives::pager::{null_tracer, CountingTracer},
    storage::{BuiltStore, GraphBuilder, IndexEntry, OpenedStore, PropertyValue, StoreAccess},
    types::EntityType,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_CACHE_PAGES: usize = 1024;

/// Exit code when the check found inconsistencies.
const EXIT_INCONSISTENT: i32 = 2;
/// Exit code when the check could not complete.
const EXIT_INCOMPLETE: i32 = 1;

#[derive(Parser, Debug)]
#[command(
    name = "sombra-check",
    version,
    about = "Bounded-memory consistency checker for Sombra record stores",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "SOMBRA_CHECK_CONFIG",
        value_name = "FILE",
        help = "Config file (defaults to <config dir>/sombra-check/config.toml)"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[arg(long, global = true, value_enum, help = "Color theme for text output")]
    theme: Option<ThemeArg>,

    #[arg(long, short, global = true, help = "Plain output without progress")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct CheckCmd {
    #[arg(value_name = "DB")]
    db_path: PathBuf,

    #[arg(long, help = "Worker threads (defaults to available parallelism)")]
    threads: Option<usize>,

    #[arg(long, value_name = "BYTES", help = "Total memory the check may use")]
    memory: Option<u64>,

    #[arg(long, value_name = "PAGES", help = "Page cache size in pages")]
    cache_pages: Option<usize>,

    #[arg(
        long = "range",
        value_name = "TYPE:LOW..HIGH",
        value_parser = parse_range,
        help = "Only check this range, e.g. node:0..1000 (repeatable)"
    )]
    ranges: Vec<EntityRange>,

    #[arg(long, help = "Skip index checks")]
    no_indexes: bool,

    #[arg(long, help = "Skip counts and degree checks")]
    no_counts: bool,

    #[arg(long, help = "Detailed inconsistencies to print")]
    max_findings: Option<usize>,
}

#[derive(Args, Debug)]
struct SeedDemoCmd {
    #[arg(value_name = "DB")]
    db_path: PathBuf,

    #[arg(long, default_value_t = 42, help = "Generator seed")]
    seed: u64,

    #[arg(long, default_value_t = 1_000)]
    nodes: usize,

    #[arg(long, default_value_t = 3_000)]
    relationships: usize,

    #[arg(long, help = "Inject a stale count and a dangling index entry")]
    corrupt: bool,
}

#[derive(Args, Debug)]
struct RangesCmd {
    #[arg(value_name = "DB")]
    db_path: PathBuf,

    #[arg(long, value_name = "BYTES", help = "Total memory the check may use")]
    memory: Option<u64>,

    #[arg(long, value_name = "PAGES", help = "Page cache size in pages")]
    cache_pages: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Check a store for inconsistencies")]
    Check(CheckCmd),

    #[command(about = "Write a generated demo store and its catalog")]
    SeedDemo(SeedDemoCmd),

    #[command(about = "Print the ranges a check would use")]
    Ranges(RangesCmd),

    #[command(about = "Show the effective configuration")]
    Config {
        #[arg(long, help = "Write the effective configuration to the config file")]
        write: bool,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ThemeArg {
    Auto,
    Light,
    Dark,
    Plain,
}

impl From<ThemeArg> for Theme {
    fn from(theme: ThemeArg) -> Self {
        match theme {
            ThemeArg::Auto => Theme::Auto,
            ThemeArg::Light => Theme::Light,
            ThemeArg::Dark => Theme::Dark,
            ThemeArg::Plain => Theme::Plain,
        }
    }
}

fn main() {
    init_logging();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(EXIT_INCOMPLETE);
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<i32, Box<dyn Error>> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.clone())?;
    let theme = cli.theme.or(config.theme()).unwrap_or(ThemeArg::Auto);
    let ui = Ui::new(theme.into(), cli.quiet || cli.format == OutputFormat::Json);

    match &cli.command {
        Command::Check(cmd) => run_check(&ui, &config, cli.format, cmd),
        Command::SeedDemo(cmd) => {
            run_seed_demo(&ui, cmd)?;
            Ok(0)
        }
        Command::Ranges(cmd) => {
            run_ranges(&ui, &config, cli.format, cmd)?;
            Ok(0)
        }
        Command::Config { write } => {
            let options = config.check_options();
            emit(cli.format, &options, || {
                ui.section(
                    "Configuration",
                    [
                        (
                            "file",
                            config
                                .path()
                                .map_or_else(|| "(none)".to_string(), |p| p.display().to_string()),
                        ),
                        ("threads", options.worker_threads().to_string()),
                        ("memory", options.memory.total_memory.to_string()),
                        ("max findings", options.max_findings.to_string()),
                    ],
                );
            })?;
            if *write {
                let path = config.persist()?;
                ui.success(&format!("wrote {}", path.display()));
            }
            Ok(0)
        }
    }
}

fn run_check(
    ui: &Ui,
    config: &CliConfig,
    format: OutputFormat,
    cmd: &CheckCmd,
) -> Result<i32, Box<dyn Error>> {
    let mut options = config.check_options();
    if let Some(threads) = cmd.threads {
        options.threads = Some(threads);
    }
    if let Some(memory) = cmd.memory {
        options.memory.total_memory = memory;
    }
    if let Some(max_findings) = cmd.max_findings {
        options.max_findings = max_findings;
    }
    if cmd.no_indexes {
        options.flags = options.flags.without_indexes();
    }
    if cmd.no_counts {
        options.flags = options.flags.without_counts();
    }
    let cache_pages = cmd
        .cache_pages
        .or(config.cache_pages())
        .unwrap_or(DEFAULT_CACHE_PAGES);

    let tracer = Arc::new(CountingTracer::new());
    let opened = OpenedStore::open_path(&cmd.db_path, cache_pages, tracer)?;
    let memory = MemoryTracker::new();
    let scope = if cmd.ranges.is_empty() {
        CheckScope::Full
    } else {
        CheckScope::Limited(cmd.ranges.clone())
    };
    let progress = ui.check_progress("checking");
    let started = std::time::Instant::now();
    let outcome = FullCheck::new(options)
        .with_scope(scope)
        .with_progress(progress)
        .execute(CheckInputs::from_opened(&opened, &memory));
    let summary = match outcome {
        Ok(summary) => summary,
        Err(err) => {
            ui.warn(&err.to_string());
            return Ok(EXIT_INCOMPLETE);
        }
    };
    let elapsed = format_duration(started.elapsed());
    emit(format, &summary, || print_summary(ui, &cmd.db_path, &summary, &elapsed))?;
    Ok(if summary.is_consistent() {
        0
    } else {
        EXIT_INCONSISTENT
    })
}

fn print_summary(ui: &Ui, db: &Path, summary: &ConsistencySummary, elapsed: &str) {
    let mut rows = vec![
        ("store", db.display().to_string()),
        ("result", summary.to_string()),
        ("elapsed", elapsed.to_string()),
        (
            "ranges",
            format!(
                "{} node, {} relationship ({} entities each)",
                summary.ranges.node_ranges,
                summary.ranges.relationship_ranges,
                summary.ranges.entities_per_range
            ),
        ),
        ("peak range memory", summary.peak_memory_bytes.to_string()),
        ("page cache", summary.page_cache.to_string()),
    ];
    if let Some(cache) = &summary.cache {
        rows.push((
            "page faults",
            format!(
                "{} ({} bytes read, {} evictions)",
                cache.faults, cache.bytes_read, cache.evictions
            ),
        ));
    }
    if summary.limited {
        rows.push(("scope", "limited".to_string()));
    }
    ui.section("Consistency check", rows);
    ui.list(
        "Findings",
        summary
            .findings
            .iter()
            .map(|f| ui.finding(f.record_type, f.id, &f.message)),
    );
    let hidden = summary.total().saturating_sub(summary.findings.len() as u64);
    if hidden > 0 {
        ui.info(&format!("{hidden} more inconsistencies not shown"));
    }
    if summary.is_consistent() {
        ui.success("store is consistent");
    } else {
        ui.warn("store is inconsistent");
    }
}

fn run_seed_demo(ui: &Ui, cmd: &SeedDemoCmd) -> Result<(), Box<dyn Error>> {
    let spinner = ui.spinner(format!("seeding {}", cmd.db_path.display()));
    let mut built = GraphBuilder::random(cmd.seed, cmd.nodes, cmd.relationships).build()?;
    if cmd.corrupt {
        corrupt(&mut built);
    }
    built.write_to_path(&cmd.db_path)?;
    let elapsed = spinner.finish();
    ui.success(&format!(
        "wrote {} nodes and {} relationships to {} in {}",
        built.layout.high.nodes,
        built.layout.high.relationships,
        cmd.db_path.display(),
        format_duration(elapsed)
    ));
    Ok(())
}

fn corrupt(built: &mut BuiltStore) {
    let nodes = built.catalog.counts.node_count(None);
    built.catalog.counts.set_node_count(None, nodes + 1);
    let beyond = built.layout.high.nodes + 7;
    if let Some(index) = built.catalog.indexes.first_mut() {
        index.entries.push(IndexEntry {
            entity: beyond,
            key: vec![PropertyValue::Int(-1)],
        });
    }
}

fn run_ranges(
    ui: &Ui,
    config: &CliConfig,
    format: OutputFormat,
    cmd: &RangesCmd,
) -> Result<(), Box<dyn Error>> {
    let mut options: CheckOptions = config.check_options();
    if let Some(memory) = cmd.memory {
        options.memory.total_memory = memory;
    }
    let cache_pages = cmd
        .cache_pages
        .or(config.cache_pages())
        .unwrap_or(DEFAULT_CACHE_PAGES);
    let opened = OpenedStore::open_path(&cmd.db_path, cache_pages, null_tracer())?;
    let high = opened.store.high_ids();
    let limiter = budget_factory(options.memory)(
        opened.cache.memory_bytes(),
        high.nodes,
        high.relationships,
    )?;
    let ranges: Vec<EntityRange> = [EntityType::Node, EntityType::Relationship]
        .iter()
        .flat_map(|t| limiter.ranges(*t).iter().copied())
        .collect();
    let report = serde_json::json!({
        "entities_per_range": limiter.entities_per_range(),
        "passes": limiter.number_of_passes(),
        "ranges": ranges,
    });
    emit(format, &report, || {
        ui.section(
            "Range plan",
            [
                ("entities per range", limiter.entities_per_range().to_string()),
                ("passes", limiter.number_of_passes().to_string()),
            ],
        );
        ui.list("Ranges", ranges.iter().map(ToString::to_string));
    })?;
    Ok(())
}

fn parse_range(raw: &str) -> Result<EntityRange, String> {
    let (kind, bounds) = raw
        .split_once(':')
        .ok_or_else(|| format!("invalid range '{raw}', expected TYPE:LOW..HIGH"))?;
    let entity_type = match kind.trim().to_ascii_lowercase().as_str() {
        "node" | "nodes" => EntityType::Node,
        "relationship" | "relationships" | "rel" => EntityType::Relationship,
        other => return Err(format!("unknown entity type '{other}'")),
    };
    let (low, high) = bounds
        .split_once("..")
        .ok_or_else(|| format!("invalid bounds '{bounds}', expected LOW..HIGH"))?;
    let parse = |value: &str| {
        value
            .trim()
            .parse::<u64>()
            .map_err(|err| format!("invalid bound '{value}': {err}"))
    };
    EntityRange::new(entity_type, parse(low)?, parse(high)?)
        .ok_or_else(|| format!("range '{raw}' is empty"))
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: FnOnce(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}
