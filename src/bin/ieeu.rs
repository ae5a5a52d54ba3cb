//! CLI binary for edgequake-ieeu.
//!
//! A thin shim over the library crate that maps CLI flags onto the settings
//! file and prints per-document results.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edgequake_ieeu::{
    describe_directory, DescribeConfig, DescribeProgressCallback, DirectoryReport, ErrorKind,
    ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar per document plus a log line per image.
/// Images settle out of order inside a concurrent chunk; `current` is the
/// settled count, so the bar only moves forward.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let cb = Self {
            bar: ProgressBar::new(0),
            errors: AtomicUsize::new(0),
        };
        cb.idle("Scanning for documents…");
        cb.bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(cb)
    }

    /// Back to the spinner between documents.
    fn idle(&self, message: &'static str) {
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        self.bar.set_style(spinner_style);
        self.bar.set_prefix("Preparing");
        self.bar.set_message(message);
    }

    /// Stop ticking and remove the bar so later output is not overdrawn.
    fn finish(&self) {
        self.bar.finish_and_clear();
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} figures  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Describing");
        self.bar.reset_eta();
        self.errors.store(0, Ordering::SeqCst);
    }
}

impl DescribeProgressCallback for CliProgressCallback {
    fn on_dispatch_start(&self, total: usize) {
        self.activate_bar(total);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Describing {total} figures…"))
        ));
    }

    fn on_item_complete(&self, current: usize, total: usize, key: &str) {
        self.bar
            .println(format!("  {} {:>3}/{:<3}  {}", green("✓"), current, total, dim(key)));
        self.bar.set_position(current as u64);
    }

    fn on_item_error(&self, current: usize, total: usize, key: &str, kind: ErrorKind) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}",
            red("✗"),
            current,
            total,
            key,
            red(kind.as_str()),
        ));
        self.bar.set_position(current as u64);
    }

    fn on_degraded(&self, pending: usize) {
        self.bar.println(format!(
            "  {} rate limited; describing the remaining {pending} one at a time",
            yellow("⚠")
        ));
    }

    fn on_total_failure(&self, failed: usize) {
        self.bar.println(format!(
            "  {} credential rejected; {failed} figure(s) not described",
            red("✘")
        ));
    }

    fn on_dispatch_complete(&self, total: usize, success_count: usize) {
        let failed = total.saturating_sub(success_count);
        self.bar.set_position(total as u64);
        if failed == 0 {
            self.bar.println(format!(
                "{} {} figures described",
                green("✔"),
                bold(&success_count.to_string())
            ));
        } else {
            self.bar.println(format!(
                "{} {}/{} figures described  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total,
                red(&failed.to_string()),
            ));
        }
        self.idle("Looking for the next document…");
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Describe figures of every full.md under the current directory
  ieeu run

  # A MinerU output directory, verbose logs
  ieeu run --dir ./paper -v

  # Gentler on a small endpoint
  ieeu run --concurrency 2 --retries 5 --timeout 120

  # Machine-readable report
  ieeu run --json > report.json

CONFIGURATION (~/.ieeU/settings.json):
  {
    "endpoint": "https://api.openai.com/v1/chat/completions",
    "key": "sk-...",
    "modelName": "gpt-4o-mini",
    "timeout": 60,
    "retries": 3,
    "maxConcurrency": 5
  }

ENVIRONMENT VARIABLES:
  IEEU_ENDPOINT   Chat-completions URL (overrides "endpoint")
  IEEU_KEY        API key (overrides "key")
  IEEU_MODEL      Vision model name (overrides "modelName")
  RUST_LOG        Log filter, e.g. edgequake_ieeu=debug

OUTPUT:
  For each <dir>/full.md a sibling full.iee.md is written in which every
  described ![](images/...) is replaced by a ```figure N``` block.
  Exit status is 1 when the configuration is invalid or the endpoint
  rejected the credential.
"#;

/// Describe the figures of MinerU Markdown with a Vision LLM.
#[derive(Parser, Debug)]
#[command(
    name = "ieeu",
    version,
    about = "Describe the figures of MinerU Markdown with a Vision LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Describe every full.md in a directory and its subdirectories.
    Run(RunArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Directory containing full.md (or one subdirectory per document).
    #[arg(short, long, default_value = ".")]
    dir: PathBuf,

    /// Settings file to use instead of ~/.ieeU/settings.json.
    #[arg(long, env = "IEEU_CONFIG")]
    config: Option<PathBuf>,

    /// Maximum VLM calls in flight.
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Attempts per figure.
    #[arg(long)]
    retries: Option<u32>,

    /// Per-call timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let Command::Run(args) = cli.command;

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !args.quiet && !args.no_progress && !args.json;
    let filter = if args.verbose {
        "debug"
    } else if args.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match run(&args, show_progress).await {
        Ok(report) if report.api_unusable() => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", red("error:"), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &RunArgs, show_progress: bool) -> Result<DirectoryReport> {
    let cli_progress = show_progress.then(CliProgressCallback::new);
    let progress = cli_progress
        .clone()
        .map(|cb| cb as Arc<dyn DescribeProgressCallback>);

    let result = match build_config(args, progress) {
        Ok(config) => describe_directory(&args.dir, &config)
            .await
            .with_context(|| format!("Failed to process {}", args.dir.display())),
        Err(e) => Err(e),
    };
    if let Some(cb) = &cli_progress {
        cb.finish();
    }
    let report = result?;

    if args.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    } else if !args.quiet {
        print_summary(&report);
    }

    Ok(report)
}

/// Settings file + environment, then CLI flags on top.
fn build_config(args: &RunArgs, progress: Option<ProgressCallback>) -> Result<DescribeConfig> {
    let mut builder = match args.config {
        Some(ref path) => DescribeConfig::load_from(path),
        None => DescribeConfig::load(),
    }
    .context("Failed to load settings")?;

    if let Some(n) = args.concurrency {
        builder = builder.max_concurrency(n);
    }
    if let Some(n) = args.retries {
        builder = builder.retries(n);
    }
    if let Some(secs) = args.timeout {
        builder = builder.timeout_secs(secs);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_summary(report: &DirectoryReport) {
    if report.documents.is_empty() && report.errors.is_empty() {
        eprintln!("No full.md found.");
        return;
    }

    for doc in &report.documents {
        let mark = if doc.api_totally_failed {
            red("✘")
        } else if doc.failed_keys.is_empty() {
            green("✔")
        } else {
            cyan("⚠")
        };
        let target = doc
            .output
            .as_ref()
            .map(|p| bold(&p.display().to_string()))
            .unwrap_or_else(|| dim("(not written)"));
        eprintln!(
            "{}  {}/{} figures  {}ms{}  →  {}",
            mark,
            doc.described,
            doc.images,
            doc.duration_ms,
            if doc.degraded_to_sequential {
                dim("  sequential")
            } else {
                String::new()
            },
            target,
        );
        for key in &doc.failed_keys {
            eprintln!("   {} {}", red("✗"), dim(key));
        }
    }

    for failure in &report.errors {
        eprintln!("{}  {}: {}", red("✘"), failure.source.display(), failure.error);
    }
    for skipped in &report.skipped {
        eprintln!("{}  {} {}", dim("-"), skipped.display(), dim("(skipped)"));
    }

    if report.api_unusable() {
        eprintln!(
            "{} the endpoint rejected the API key; check \"key\" in settings.json or IEEU_KEY",
            red("✘")
        );
    } else {
        eprintln!(
            "{} figures described, {} failed",
            bold(&report.total_described().to_string()),
            report.total_failed()
        );
    }
}
