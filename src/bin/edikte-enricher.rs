//! CLI binary for edikte-enricher.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `EnricherConfig`, wires the Notion store and prints the run summary.

use anyhow::{Context, Result};
use clap::Parser;
use edikte_enricher::{
    Enricher, EnricherConfig, KeywordRules, NotionStore, RecordOutcome, RunProgressCallback, RunSummary,
    SweepReport, TextStrategy,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
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

/// Terminal progress callback: one bar for the queue, one log line per record.
struct CliProgressCallback {
    bar: ProgressBar,
    started: Mutex<Option<Instant>>,
    failures: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until the queue length is known.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Sweeping");
        bar.set_message("Reading database…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            started: Mutex::new(None),
            failures: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} records  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Enriching");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self) -> f64 {
        self.started
            .lock()
            .ok()
            .and_then(|mut s| s.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl RunProgressCallback for CliProgressCallback {
    fn on_sweep_complete(&self, report: &SweepReport) {
        if report.writes() > 0 || report.errors > 0 {
            self.bar.println(format!(
                "{} Sweep: {} repaired, {} re-queued{}",
                cyan("◆"),
                report.repaired,
                report.requeued,
                if report.errors > 0 {
                    format!(", {}", red(&format!("{} failed", report.errors)))
                } else {
                    String::new()
                },
            ));
        }
    }

    fn on_run_start(&self, queued: usize) {
        self.activate_bar(queued);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{queued} record(s) queued"))
        ));
    }

    fn on_record_start(&self, _index: usize, _total: usize, title: &str) {
        if let Ok(mut s) = self.started.lock() {
            *s = Some(Instant::now());
        }
        self.bar.set_message(title.to_string());
    }

    fn on_record_done(&self, index: usize, total: usize, id: &str, outcome: &RecordOutcome) {
        let mark = match outcome {
            RecordOutcome::Complete => green("✓"),
            RecordOutcome::Incomplete | RecordOutcome::Deferred => yellow("◐"),
            RecordOutcome::Unreadable => red("✗"),
            RecordOutcome::Skipped => dim("·"),
            RecordOutcome::TransportFailed => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                red("!")
            }
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {:<16}  {}  {}",
            mark,
            index,
            total,
            outcome.label(),
            dim(id),
            dim(&format!("{:.1}s", self.elapsed_secs())),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, processed: usize, stopped_early: bool) {
        self.bar.finish_and_clear();
        let failures = self.failures.load(Ordering::SeqCst);
        let mark = if failures == 0 { green("✔") } else { cyan("⚠") };
        eprintln!(
            "{} {} record(s) processed{}{}",
            mark,
            bold(&processed.to_string()),
            if failures > 0 {
                format!("  ({} transport failure(s))", red(&failures.to_string()))
            } else {
                String::new()
            },
            if stopped_early { "  (stopped early)" } else { "" },
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Regular run against the auction database
  edikte-enricher --notion-token secret_xxx --database-id 0123456789abcdef0123456789abcdef

  # Grammar only, no model calls
  edikte-enricher --patterns-only

  # Small vision budget, model leads on text documents
  edikte-enricher --model-first --max-vision-calls 3

  # Skip the convergence sweep, machine-readable summary
  edikte-enricher --no-sweep --json > summary.json

TEXT TIERS:
  By default the pattern grammar runs first and the text model only runs
  when the grammar finds no owner data. --model-first makes the model the
  primary path and lets the grammar fill the fields it left empty.

STATUS VALUES (select property "Gutachten analysiert?"):
  Nicht analysiert   queued for the next run
  Analysiert         owner name or address found
  Unvollständig      document parsed, no owner data (re-queued once by the sweep)
  Nicht lesbar       no attachment, or a scan even the vision tier could not read

ENVIRONMENT VARIABLES:
  NOTION_TOKEN            Notion integration token
  NOTION_DATABASE_ID      Database ID or URL
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_PROVIDER      Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (directory or file)
  RUST_LOG                Log filter, e.g. edikte_enricher=debug
"#;

/// Enrich court-auction records in Notion with owner and creditor data.
#[derive(Parser, Debug)]
#[command(
    name = "edikte-enricher",
    version,
    about = "Extract owner and creditor data from foreclosure appraisals into Notion",
    long_about = "Reads auction records from a Notion database, downloads each notice's appraisal \
PDF, extracts owner and creditor data with a pattern grammar, a text model and, for scans, a \
vision model, and writes the validated result back. A sweep before each run re-queues incomplete \
records once and repairs court names stored as owners.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Notion integration token.
    #[arg(long, env = "NOTION_TOKEN", hide_env_values = true)]
    notion_token: String,

    /// Notion database ID or URL.
    #[arg(long, env = "NOTION_DATABASE_ID")]
    database_id: String,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM model ID (e.g. gpt-4.1-mini).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Path to libpdfium (file or directory).
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// JSON file overriding keyword tables (placeholders, non-party actors, ...).
    #[arg(long, env = "EDIKTE_RULES")]
    rules: Option<PathBuf>,

    /// Pattern grammar only; never call a model.
    #[arg(long)]
    patterns_only: bool,

    /// Let the text model lead; the grammar only fills gaps.
    ///
    /// Off by default even when a model is configured: the grammar is free,
    /// and the model still runs whenever it finds no owner data.
    #[arg(long)]
    model_first: bool,

    /// Records processed per run.
    #[arg(long, env = "EDIKTE_MAX_RECORDS", default_value_t = 50)]
    max_records: usize,

    /// Text-model calls per run.
    #[arg(long, env = "EDIKTE_MAX_TEXT_CALLS", default_value_t = 50)]
    max_text_calls: usize,

    /// Vision-model calls per run (at most 20).
    #[arg(long, env = "EDIKTE_MAX_VISION_CALLS", default_value_t = 10,
          value_parser = clap::value_parser!(u16).range(0..=20))]
    max_vision_calls: u16,

    /// Skip the convergence sweep.
    #[arg(long)]
    no_sweep: bool,

    /// Writes the sweep may issue per run.
    #[arg(long, env = "EDIKTE_SWEEP_LIMIT", default_value_t = 100)]
    sweep_limit: usize,

    /// Pause between records in milliseconds.
    #[arg(long, env = "EDIKTE_DELAY_MS", default_value_t = 500)]
    delay_ms: u64,

    /// Print the run summary as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable the progress bar.
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
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else if show_progress {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb = show_progress.then(|| CliProgressCallback::new_dynamic() as Arc<dyn RunProgressCallback>);
    let config = build_config(&cli, progress_cb)?;

    let store = NotionStore::new(cli.notion_token.clone(), &cli.database_id)
        .context("Invalid Notion settings")?;
    let enricher = Enricher::with_defaults(config, Arc::new(store), cli.pdfium_lib.clone())
        .context("Failed to set up the pipeline")?;

    // Ctrl-C finishes the current record, then stops.
    let stop = enricher.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", yellow("Stopping after the current record…"));
            stop.store(true, Ordering::SeqCst);
        }
    });

    // ── Run ──────────────────────────────────────────────────────────────
    let summary = enricher.run().await.context("Run failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    } else if !cli.quiet {
        print_summary(&summary);
    }

    Ok(())
}

/// Map CLI args to `EnricherConfig`.
fn build_config(cli: &Cli, progress: Option<Arc<dyn RunProgressCallback>>) -> Result<EnricherConfig> {
    let rules = match cli.rules {
        Some(ref path) => KeywordRules::from_json_file(path).context("Failed to load keyword rules")?,
        None => KeywordRules::default(),
    };
    let strategy = if cli.model_first {
        TextStrategy::ModelFirst
    } else {
        TextStrategy::PatternFirst
    };

    let mut builder = EnricherConfig::builder()
        .patterns_only(cli.patterns_only)
        .text_strategy(strategy)
        .max_records_per_run(cli.max_records)
        .max_text_model_calls_per_run(cli.max_text_calls)
        .max_vision_calls_per_run(usize::from(cli.max_vision_calls))
        .sweep_enabled(!cli.no_sweep)
        .sweep_limit(cli.sweep_limit)
        .record_delay_ms(cli.delay_ms)
        .rules(rules);

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_summary(s: &RunSummary) {
    eprintln!(
        "   sweep: {} repaired, {} re-queued{}",
        s.sweep.repaired,
        s.sweep.requeued,
        if s.sweep.over_limit > 0 {
            format!(", {} left for next run", s.sweep.over_limit)
        } else {
            String::new()
        }
    );
    eprintln!(
        "   {} complete  /  {} incomplete  /  {} unreadable  /  {} deferred  /  {} skipped  /  {} errors",
        green(&s.complete.to_string()),
        yellow(&s.incomplete.to_string()),
        red(&s.unreadable.to_string()),
        s.deferred,
        dim(&s.skipped.to_string()),
        s.errors,
    );
    eprintln!(
        "   {} text-model call(s)  /  {} vision call(s)",
        dim(&s.text_model_calls.to_string()),
        dim(&s.vision_calls.to_string()),
    );
}
