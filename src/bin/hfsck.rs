//! hfsck - offline consistency check for hierarchical node store dumps.
//!
//! Checks every partition directory under a store dump (a directory of
//! `nodes.jsonl`/`refs.jsonl` partitions; a `version` subdirectory is
//! treated as the version-history store and checked first).
//!
//! Usage:
//!   hfsck <store-dir> [--fix] [--strict]
//!
//! Repairs are queued during checking and executed only with --fix; a run
//! without it is strictly read-only.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use hfsck::dump::DumpPartition;
use hfsck::{all_clean, check_store, CheckOptions, CheckReport, StorePartition};

fn print_usage() {
    println!("hfsck {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Offline consistency checker for hierarchical node store dumps");
    println!();
    println!("Usage: hfsck <store-dir> [--fix] [--strict]");
    println!();
    println!("Arguments:");
    println!("  <store-dir>    Directory of partition dumps (nodes.jsonl per partition)");
    println!();
    println!("Flags:");
    println!("  --fix          Apply queued repairs after checking (default: report only)");
    println!("  --strict       Escalate stale child entries instead of auto-repairing");
    println!("  -V, --version  Print version information");
    println!("  -h, --help     Print this help message");
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("hfsck {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }
    if args.len() < 2 || args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return if args.len() < 2 {
            ExitCode::from(2)
        } else {
            ExitCode::SUCCESS
        };
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let store_dir = PathBuf::from(&args[1]);
    if args[1].starts_with("--") {
        eprintln!("[hfsck] Error: store-dir '{}' looks like a flag, not a path.", args[1]);
        return ExitCode::from(2);
    }

    let options = CheckOptions {
        fix: args.iter().any(|a| a == "--fix"),
        strict: args.iter().any(|a| a == "--strict"),
        ..CheckOptions::default()
    };

    match run(&store_dir, options) {
        Ok(reports) => {
            print_summary(&reports);
            if all_clean(&reports) {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("[hfsck] Fatal: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn run(store_dir: &Path, options: CheckOptions) -> anyhow::Result<Vec<CheckReport>> {
    let partitions: Vec<StorePartition> = DumpPartition::discover(store_dir)
        .with_context(|| format!("enumerating partitions under {}", store_dir.display()))?
        .into_iter()
        .map(Arc::new)
        .map(|p| StorePartition {
            source: p.clone(),
            store: p,
        })
        .collect();

    if partitions.is_empty() {
        anyhow::bail!("no partitions found under {}", store_dir.display());
    }
    eprintln!("[hfsck] Checking {} partitions", partitions.len());

    check_store(&partitions, options).context("consistency check failed")
}

fn print_summary(reports: &[CheckReport]) {
    for r in reports {
        println!(
            "{}: {} ({} nodes, {} refs, {} queued repairs)",
            r.partition,
            if r.clean { "clean" } else { "NOT CLEAN" },
            r.nodes,
            r.refs,
            r.queued_repairs
        );
    }
}
