use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use graphstats_cli::{ingest, parse_resource};
use graphstats_config::{init_tracing, GraphStatsConfig};
use graphstats_db::{DatabaseSpaceReport, ResourceStatistics, StatisticsDatabase};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "graphstats", version, about = "RDF graph statistics (ingest, inspect, clear)")]
struct Cli {
    /// Path to a `graphstats.toml` (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Count the quads of a whitespace separated `s p o chunk` file
    Ingest(IngestArgs),
    /// Print the statistics of one resource
    Show(ShowArgs),
    /// Assign an unowned resource to an owner
    SetOwner(SetOwnerArgs),
    /// Print chunk sizes, owner load and cache usage
    Summary(SummaryArgs),
    /// Delete all statistics
    Clear,
}

#[derive(Args)]
struct IngestArgs {
    quads: PathBuf,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ShowArgs {
    /// Resource id, decimal or 0x-prefixed hex
    #[arg(value_parser = parse_resource)]
    resource: u64,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct SetOwnerArgs {
    #[arg(value_parser = parse_resource)]
    resource: u64,
    owner: u16,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct SummaryArgs {
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Summary {
    dir: PathBuf,
    chunks: usize,
    resources: u64,
    chunk_sizes: Vec<u64>,
    owner_load: Vec<u64>,
    space: DatabaseSpaceReport,
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            2
        }
    };

    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    let config = GraphStatsConfig::load_or_default(cli.config.as_deref())?;
    init_tracing(&config.logging);
    let mut db = StatisticsDatabase::open(&config).with_context(|| {
        format!(
            "failed to open statistics in {}",
            config.storage.dir.display()
        )
    })?;

    let exit = execute(&mut db, cli.command)?;
    db.close().context("failed to close statistics")?;
    Ok(exit)
}

fn execute(db: &mut StatisticsDatabase, command: Command) -> Result<i32> {
    match command {
        Command::Ingest(args) => {
            let file = File::open(&args.quads)
                .with_context(|| format!("failed to open {}", args.quads.display()))?;
            let report = ingest(db, BufReader::new(file))?;
            if args.json {
                print_json(&report)?;
            } else {
                println!("ingest: {} quads from {} lines", report.quads, report.lines);
                println!("  chunk_sizes: {:?}", report.chunk_sizes);
            }
            Ok(0)
        }
        Command::Show(args) => {
            let stats = db.statistics(args.resource)?;
            let exit = if stats.is_some() { 0 } else { 1 };
            if args.json {
                print_json(&stats)?;
            } else if let Some(stats) = stats {
                print_statistics(&stats);
            } else {
                println!("resource {:#x}: no statistics", args.resource);
            }
            Ok(exit)
        }
        Command::SetOwner(args) => {
            let resource = db.set_owner(args.resource, args.owner)?;
            db.flush()?;
            if args.json {
                print_json(&serde_json::json!({ "resource": resource }))?;
            } else {
                println!("resource {:#x} is now {:#x}", args.resource, resource);
            }
            Ok(0)
        }
        Command::Summary(args) => {
            let mut resources = 0u64;
            db.for_each_resource(|_| resources += 1)?;
            let summary = Summary {
                dir: db.dir().to_path_buf(),
                chunks: db.chunks(),
                resources,
                chunk_sizes: db.chunk_sizes(),
                owner_load: db.owner_load(),
                space: db.space_report(),
            };
            if args.json {
                print_json(&summary)?;
            } else {
                print_summary(&summary);
            }
            Ok(0)
        }
        Command::Clear => {
            db.clear()?;
            println!("clear: removed statistics in {}", db.dir().display());
            Ok(0)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value)?;
    println!("{out}");
    Ok(())
}

fn print_statistics(stats: &ResourceStatistics) {
    println!("resource {:#x} (owner {})", stats.resource, stats.owner);
    println!("  subject:     {:?}", stats.subject);
    println!("  property:    {:?}", stats.property);
    println!("  object:      {:?}", stats.object);
    println!("  occurrences: {}", stats.occurrences);
}

fn print_summary(summary: &Summary) {
    println!("statistics: {}", summary.dir.display());
    println!("  chunks: {}", summary.chunks);
    println!("  resources: {}", summary.resources);
    println!("  chunk_sizes: {:?}", summary.chunk_sizes);
    println!("  owner_load: {:?}", summary.owner_load);
    println!(
        "  partitions: {} open, {} cached",
        summary.space.open_partitions, summary.space.cached_partitions
    );
    if let Some(space) = &summary.space.partitions {
        println!(
            "  shared cache: {} of {} bytes ({:?})",
            space.granted_bytes, space.budget_bytes, space.pressure
        );
    }
}
