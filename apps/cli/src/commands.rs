//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use docharvest_core::{
    CancelToken, ProgressReporter, RunContext, build_backend, group_directory, retry_failed,
    run_pipeline,
};
use docharvest_shared::{
    AppConfig, FetchResult, RunConfig, RunReport, SourceKind, init_config, load_config,
};
use docharvest_storage::{BlobStore, FsBlobStore, Storage};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// docharvest: harvest recently changed documents into sectioned JSON.
#[derive(Parser)]
#[command(
    name = "docharvest",
    version,
    about = "Harvest recently changed Confluence pages and Google Docs into sectioned JSON and bundles.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Detect recent changes, fetch and segment them, then bundle.
    Run(RunArgs),

    /// Bundle an existing directory of document records.
    Group {
        /// Directory holding `*.json` records.
        #[arg(long)]
        dir: PathBuf,

        /// Where to write bundles (defaults to <dir>/bundles).
        #[arg(long)]
        out: Option<PathBuf>,

        /// Group key separator (defaults to the configured one).
        #[arg(long)]
        separator: Option<char>,
    },

    /// Re-fetch the items that failed in an earlier run.
    Retry {
        /// Run identifier, as printed by `run` or `runs`.
        #[arg(long = "run")]
        run_id: String,

        /// Output directory holding that run's ledger.
        #[arg(long)]
        out: Option<PathBuf>,

        /// Worker pool size.
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// List recent runs from the ledger.
    Runs {
        /// Output directory holding the ledger.
        #[arg(long)]
        out: Option<PathBuf>,

        /// Maximum number of runs shown.
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Flags for `run`. Unset flags fall back to the config file.
#[derive(Args, Debug, Default)]
pub(crate) struct RunArgs {
    /// Source to query: confluence or gdocs.
    #[arg(long)]
    pub source: Option<SourceKind>,

    /// Trailing change window in days.
    #[arg(long)]
    pub window_days: Option<u32>,

    /// Maximum number of changes considered.
    #[arg(long)]
    pub limit: Option<usize>,

    /// Worker pool size.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Per-item timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Output directory.
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Also write a Markdown rendition of each document.
    #[arg(long)]
    pub markdown: bool,

    /// Skip the bundling stage.
    #[arg(long)]
    pub no_group: bool,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "docharvest=info",
        1 => "docharvest=debug",
        _ => "docharvest=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run(args) => cmd_run(args).await,
        Command::Group {
            dir,
            out,
            separator,
        } => cmd_group(dir, out, separator).await,
        Command::Retry {
            run_id,
            out,
            concurrency,
        } => cmd_retry(&run_id, out, concurrency).await,
        Command::Runs { out, limit } => cmd_runs(out, limit).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

/// Merge `run` flags over the file-derived run config.
fn apply_overrides(config: &mut RunConfig, args: &RunArgs) {
    if let Some(source) = args.source {
        config.source = source;
    }
    if let Some(days) = args.window_days {
        config.window_days = days;
    }
    if let Some(limit) = args.limit {
        config.limit = limit;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(secs) = args.timeout {
        config.item_timeout = Duration::from_secs(secs);
    }
    if let Some(out) = &args.out {
        config.output_dir = out.clone();
    }
    config.emit_markdown |= args.markdown;
    config.skip_bundling |= args.no_group;
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(args: RunArgs) -> Result<()> {
    let config = load_config()?;
    let mut run_config = RunConfig::from(&config);
    apply_overrides(&mut run_config, &args);
    run_config.validate()?;

    info!(
        source = %run_config.source,
        window_days = run_config.window_days,
        limit = run_config.limit,
        concurrency = run_config.concurrency,
        out = %run_config.output_dir.display(),
        "starting run"
    );

    let store: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(&run_config.output_dir));
    let backend = build_backend(run_config.source, &config, &run_config, store.clone())?;
    let ledger = Storage::open(&Storage::ledger_path(&run_config.output_dir)).await?;

    let mut ctx = RunContext::new(run_config).with_cancel(cancel_on_ctrl_c());
    let progress = Arc::new(CliProgress::new());
    let report = run_pipeline(&mut ctx, &backend, store.as_ref(), &ledger, progress).await?;

    print_report("Run complete", &report);
    Ok(())
}

async fn cmd_retry(run_id: &str, out: Option<PathBuf>, concurrency: Option<usize>) -> Result<()> {
    let config = load_config()?;
    let mut run_config = RunConfig::from(&config);
    if let Some(out) = out {
        run_config.output_dir = out;
    }
    if let Some(concurrency) = concurrency {
        run_config.concurrency = concurrency;
    }
    run_config.validate()?;

    let ledger = Storage::open(&Storage::ledger_path(&run_config.output_dir)).await?;
    let source = ledger
        .run_source(run_id)
        .await?
        .ok_or_else(|| eyre!("no run '{run_id}' in {}", run_config.output_dir.display()))?;
    run_config.source = source;

    info!(run_id, %source, "retrying failed items");

    let store: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(&run_config.output_dir));
    let backend = build_backend(source, &config, &run_config, store.clone())?;

    let mut ctx = RunContext::new(run_config).with_cancel(cancel_on_ctrl_c());
    let progress = Arc::new(CliProgress::new());
    let report = retry_failed(&mut ctx, run_id, &backend, store.as_ref(), &ledger, progress).await?;

    print_report("Retry complete", &report);
    Ok(())
}

async fn cmd_group(dir: PathBuf, out: Option<PathBuf>, separator: Option<char>) -> Result<()> {
    let config = load_config()?;
    let separator = separator.unwrap_or(config.bundle.separator);

    info!(dir = %dir.display(), %separator, "grouping records");
    let report = group_directory(&dir, out.as_deref(), separator).await?;

    println!();
    println!("  Bundles written: {}", report.written.len());
    for written in &report.written {
        println!(
            "    {} ({} members) -> {}",
            written.key, written.member_count, written.path
        );
    }
    println!("  Members read:    {}", report.members_read);
    println!("  Members skipped: {}", report.members_skipped);
    for warning in &report.warnings {
        println!("  warning: {warning}");
    }
    println!();
    Ok(())
}

async fn cmd_runs(out: Option<PathBuf>, limit: usize) -> Result<()> {
    let output_dir = match out {
        Some(dir) => dir,
        None => RunConfig::from(&load_config()?).output_dir,
    };
    let ledger = Storage::open_readonly(&Storage::ledger_path(&output_dir)).await?;
    let runs = ledger.list_runs(limit).await?;

    if runs.is_empty() {
        println!("No runs recorded in {}", output_dir.display());
        return Ok(());
    }

    println!(
        "{:<36}  {:<10}  {:<25}  {:>7}  {:>6}  {:>7}",
        "RUN", "SOURCE", "STARTED", "FETCHED", "FAILED", "BUNDLES"
    );
    for run in runs {
        let status = if run.finished_at.is_some() { "" } else { " (unfinished)" };
        println!(
            "{:<36}  {:<10}  {:<25}  {:>7}  {:>6}  {:>7}{status}",
            run.run_id,
            run.source,
            run.started_at,
            run.items_fetched,
            run.items_failed,
            run.bundles_written
        );
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A token that trips on the first Ctrl-C. In-flight items still finish.
fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, not starting further items");
            token.cancel();
        }
    });
    cancel
}

fn print_report(heading: &str, report: &RunReport) {
    println!();
    println!("  {heading}");
    println!("  Run:       {}", report.run_id);
    println!("  Detected:  {}", report.items_detected);
    println!("  Fetched:   {}", report.items_fetched);
    println!("  Failed:    {}", report.items_failed);
    println!("  Sections:  {}", report.sections_produced);
    println!("  Bundles:   {}", report.bundles_written);
    println!("  Skipped:   {}", report.members_skipped);
    if let (Some(start), Some(end)) = (report.started_at, report.finished_at) {
        let secs = (end - start).num_milliseconds() as f64 / 1000.0;
        println!("  Time:      {secs:.1}s");
    }
    for warning in &report.warnings {
        println!("  warning: {warning}");
    }
    if report.items_failed > 0 {
        println!();
        println!("  Retry failures with: docharvest retry --run {}", report.run_id);
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter: a spinner per phase, a bar while fetching.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .expect("valid spinner template")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.bar.set_message(name.to_string());
    }

    fn changes_detected(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.bar.set_length(count as u64);
        self.bar.set_position(0);
        self.bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg} [{bar:30.cyan/blue}] {pos}/{len}")
                .expect("valid bar template")
                .progress_chars("=> "),
        );
    }

    fn item_finished(&self, result: &FetchResult) {
        self.bar.inc(1);
        if !result.is_success() {
            self.bar.println(format!(
                "  failed {}: {}",
                result.id,
                result.error.as_deref().unwrap_or("unknown error")
            ));
        }
    }

    fn done(&self, _report: &RunReport) {
        self.bar.finish_and_clear();
    }
}
