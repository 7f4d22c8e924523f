//! # linkpack CLI
//!
//! Hard-links duplicate copies of installed packages across
//! `node_modules` trees to reclaim disk space.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use console::style;
use indicatif::HumanBytes;
use tracing::debug;

use linkpack_config::Config;
use linkpack_core::{
    prune, scan_and_link, HardLinker, RefStore, RunContext, RunMode, RunSummary, StoreError,
};

mod progress;

use progress::TermSink;

// Fatal startup problems get their own exit codes so wrapping scripts
// can tell them apart.
const EXIT_CONFIG_PARSE: u8 = 21;
const EXIT_CONFIG_INVALID: u8 = 22;
const EXIT_REFS_PARSE: u8 = 24;

/// Space saver for duplicated node_modules packages.
///
/// Scans the given root directories for installed packages, groups
/// identical (name, version) copies per device, and replaces duplicate
/// files with hard links to one master copy.
#[derive(Parser)]
#[command(name = "linkpack", version, about)]
struct Cli {
    /// Root directories to scan for node_modules trees
    #[arg(value_name = "DIR", required_unless_present = "prune")]
    roots: Vec<PathBuf>,

    /// Config file (default: ~/.linkpack/config.toml, then ./.linkpack.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Show duplicates and the bytes linking would save, change nothing
    #[arg(short, long, conflicts_with = "gen_ln_cmds")]
    dryrun: bool,

    /// Print one `ln -f` command per eligible file instead of linking
    #[arg(short, long = "gen-ln-cmds")]
    gen_ln_cmds: bool,

    /// Revalidate every stored fingerprint and drop stale ones
    #[arg(short, long)]
    prune: bool,

    /// Package-reference file
    #[arg(short, long, value_name = "FILE")]
    refs_file: Option<PathBuf>,

    /// Minimum file size worth linking, in bytes
    #[arg(short = 's', long, value_name = "BYTES")]
    min_size: Option<u64>,

    /// Maximum directory depth below each root (0 = unbounded)
    #[arg(short = 't', long, value_name = "N")]
    tree_depth: Option<usize>,

    /// Concurrent filesystem operations per pipeline stage
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Skip mtime comparison (for installs that do not preserve it)
    #[arg(long)]
    ignore_mtime: bool,

    /// Verbose logging (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn mode(&self) -> RunMode {
        if self.dryrun {
            RunMode::DryRun
        } else if self.gen_ln_cmds {
            RunMode::GenCommands
        } else {
            RunMode::Link
        }
    }

    /// CLI flags override whatever the config files and env provided.
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(refs_file) = &self.refs_file {
            config.refs.file = refs_file.clone();
        }
        if let Some(min_size) = self.min_size {
            config.link.min_file_size = min_size;
        }
        if let Some(tree_depth) = self.tree_depth {
            config.scan.tree_depth = tree_depth;
        }
        if let Some(concurrency) = self.concurrency {
            config.scan.concurrent_ops = concurrency;
        }
        if self.ignore_mtime {
            config.link.ignore_mtime = true;
        }
    }
}

fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("LINKPACK_LOG")
                .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = {
        let loaded = match &cli.config {
            Some(path) => Config::load_path(path),
            None => Config::load(),
        };
        let mut config = match loaded {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{} {e}", style("error: invalid configuration:").red());
                return ExitCode::from(EXIT_CONFIG_PARSE);
            }
        };
        cli.apply_overrides(&mut config);
        if let Err(e) = config.validate() {
            eprintln!("{} {e}", style("error:").red());
            return ExitCode::from(EXIT_CONFIG_INVALID);
        }
        config
    };

    let store = match RefStore::load(&config.refs.file) {
        Ok(store) => store,
        Err(e @ StoreError::Malformed { .. }) => {
            eprintln!("{} {e}", style("error:").red());
            eprintln!("fix or remove the reference file and rerun");
            return ExitCode::from(EXIT_REFS_PARSE);
        }
        Err(e) => {
            eprintln!("{} {e}", style("error:").red());
            return ExitCode::from(EXIT_REFS_PARSE);
        }
    };
    debug!(identities = store.len(), "loaded reference store");

    let mode = cli.mode();
    let sink = Arc::new(TermSink::new(mode));
    let ctx = RunContext::new(store, sink.clone());

    // First interrupt cancels cooperatively; the run drains and final
    // tasks still write back accumulated state.
    {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("cancelling and saving state...");
                ctx.cancel();
            }
        });
    }

    if cli.prune {
        eprintln!("{}", style("pruning...").bold());
        prune(&ctx, &config).await;
    }

    let mut summary = RunSummary::default();
    if !cli.roots.is_empty() {
        summary = scan_and_link(&ctx, &config, mode, &cli.roots, Arc::new(HardLinker)).await;
    }
    sink.finish();

    match finish(&cli, &config, &ctx, mode, &summary).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", style("error:").red());
            ExitCode::FAILURE
        }
    }
}

/// End-of-run bookkeeping: persist the reference store when it changed
/// (never in dry-run or command-generation mode) and print the summary.
async fn finish(
    cli: &Cli,
    config: &Config,
    ctx: &Arc<RunContext>,
    mode: RunMode,
    summary: &RunSummary,
) -> anyhow::Result<()> {
    if mode != RunMode::Link {
        println!(
            "# {} {}",
            style("would save:").yellow(),
            style(HumanBytes(summary.saved_bytes).to_string()).bold()
        );
        return Ok(());
    }

    let refs = ctx.refs.lock().await;
    if cli.prune || refs.is_dirty() {
        refs.save(&config.refs.file)
            .with_context(|| format!("failed to write {}", config.refs.file.display()))?;
        println!("updated {}", config.refs.file.display());
    }
    if summary.saved_bytes > 0 {
        println!(
            "{} {}",
            style("saved:").green(),
            style(HumanBytes(summary.saved_bytes).to_string()).bold()
        );
    }
    if summary.link_errors > 0 {
        eprintln!(
            "{} {} file(s) failed to link, see log above",
            style("warning:").yellow(),
            summary.link_errors
        );
    }
    Ok(())
}
