//! CLI binary for rxscribe.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, runs the batch, and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rxscribe::{
    find_images, run_batch, BatchProgressCallback, CancelFlag, ExtractionConfig, GeminiTransport,
    ProgressCallback, PromptConfig, ResultStore,
};
use std::io;
use std::path::PathBuf;
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
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: renders a live progress bar and per-image log
/// lines using [indicatif]. Works correctly when items complete out of order
/// (concurrent mode).
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new(total: usize) -> Arc<Self> {
        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} images  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(style);
        bar.set_prefix("Extracting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_items: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Starting extraction of {total_items} image(s)…"))
        ));
    }

    fn on_item_start(&self, _index: usize, source: &str, _total: usize) {
        self.bar.set_message(source.to_string());
    }

    fn on_item_complete(&self, _index: usize, source: &str, _total: usize, medicines_count: usize) {
        self.bar.println(format!(
            "  {} {:<32}  {}",
            green("✓"),
            source,
            dim(&format!("{medicines_count} medicine(s)")),
        ));
        self.bar.inc(1);
    }

    fn on_item_error(&self, _index: usize, source: &str, _total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);

        // Truncate very long error messages to keep output tidy.
        let msg: String = if error.chars().count() > 80 {
            let cut: String = error.chars().take(79).collect();
            format!("{cut}\u{2026}")
        } else {
            error.to_string()
        };

        self.bar
            .println(format!("  {} {:<32}  {}", red("✗"), source, red(&msg)));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_items: usize, success_count: usize) {
        let failed = self.errors.load(Ordering::SeqCst);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} image(s) extracted successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} image(s) extracted  ({} failed)",
                if failed == total_items {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_items,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Single prescription image
  rxscribe scan.jpg

  # A directory of scans, 8 at a time
  rxscribe scans/ -c 8 -o results/

  # Recurse into subdirectories
  rxscribe archive/ --recursive

  # Different model, more retries on malformed output
  rxscribe scan.png --model gemini-2.5-pro --max-retries 4

  # Machine-readable summary on stdout
  rxscribe scans/ --json > summary.json

OUTPUT LAYOUT:
  <output>/<image-name>/results.json   full per-image result
  <output>/<image-name>/summary.json   lightweight per-image summary
  <output>/summary.json                batch aggregate
  <logs>/debug/                        raw malformed model responses
  <logs>/ocr/                          transcription text

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY                   Google Gemini API key (required)
  RXSCRIBE_SYSTEM_PROMPT           Override the system prompt
  RXSCRIBE_USER_PROMPT_TEMPLATE    Override the user prompt template
                                   (must contain {filename})

SETUP:
  1. Set API key:   export GEMINI_API_KEY=...
  2. Extract:       rxscribe scan.jpg -o results/
"#;

/// Extract structured medication data from prescription images.
#[derive(Parser, Debug)]
#[command(
    name = "rxscribe",
    version,
    about = "Extract structured medication data from prescription images using a vision LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Prescription image file, or a directory of images.
    input: PathBuf,

    /// Directory for per-image results and the batch summary.
    #[arg(short, long, env = "RXSCRIBE_OUTPUT", default_value = "output")]
    output: PathBuf,

    /// Directory for debug artifacts and transcription logs.
    #[arg(long, env = "RXSCRIBE_LOGS", default_value = "logs")]
    logs: PathBuf,

    /// Gemini model ID.
    #[arg(long, env = "RXSCRIBE_MODEL", default_value = "gemini-2.0-flash-exp")]
    model: String,

    /// Google Gemini API key.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Number of concurrent model calls.
    #[arg(short, long, env = "RXSCRIBE_CONCURRENCY", default_value_t = 5)]
    concurrency: usize,

    /// Scan subdirectories too when the input is a directory.
    #[arg(short, long)]
    recursive: bool,

    /// Path to a JSON prompts file (system_prompt, user_prompt_template).
    #[arg(long, env = "RXSCRIBE_PROMPTS")]
    prompts: Option<PathBuf>,

    /// Extra attempts when the model returns malformed output.
    #[arg(long, env = "RXSCRIBE_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Per-model-call timeout in seconds.
    #[arg(long, env = "RXSCRIBE_API_TIMEOUT", default_value_t = 60)]
    timeout: u64,

    /// Print the batch summary as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "RXSCRIBE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "RXSCRIBE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "RXSCRIBE_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
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

    // ── Resolve inputs ───────────────────────────────────────────────────
    let paths: Vec<PathBuf> = if cli.input.is_dir() {
        let found = find_images(&cli.input, cli.recursive)
            .with_context(|| format!("Failed to scan directory {:?}", cli.input))?;
        if found.is_empty() {
            anyhow::bail!("No supported images found in {:?}", cli.input);
        }
        found
    } else {
        vec![cli.input.clone()]
    };

    // ── Build config ─────────────────────────────────────────────────────
    let prompts = PromptConfig::resolve(None, None, cli.prompts.as_deref())
        .context("Failed to resolve prompt configuration")?;

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new(paths.len());
        Some(cb as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };

    let mut builder = ExtractionConfig::builder(prompts)
        .concurrency(cli.concurrency)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.timeout);
    if let Some(cb) = progress_cb {
        builder = builder.progress_callback(cb);
    }
    let config = builder.build().context("Invalid configuration")?;

    let transport = Arc::new(GeminiTransport::new(&cli.api_key, &cli.model));
    let store = ResultStore::new(&cli.output, &cli.logs);

    // ── Run the batch, cancelling cleanly on Ctrl-C ──────────────────────
    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nCancelling: in-flight images will finish…");
                cancel.cancel();
            }
        });
    }

    let summary = run_batch(transport, &config, &store, &paths, &cancel)
        .await
        .context("Extraction failed")?;

    // ── Report ───────────────────────────────────────────────────────────
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?
        );
    } else if !cli.quiet {
        let medicines: usize = summary.items.iter().map(|i| i.medicines_count).sum();
        eprintln!(
            "{}  {}/{} images  {} medication(s)  {}ms  →  {}",
            if summary.failed == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            summary.succeeded,
            summary.total,
            medicines,
            summary.total_elapsed_ms,
            bold(&cli.output.display().to_string()),
        );
        if summary.failed > 0 {
            for item in summary.items.iter().filter(|i| !i.success) {
                eprintln!(
                    "   {} {}: {}",
                    red("✗"),
                    item.source,
                    dim(item.error.as_deref().unwrap_or("unknown error")),
                );
            }
        }
    }

    Ok(())
}
