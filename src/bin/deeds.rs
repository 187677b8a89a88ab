//! CLI binary for edgequake-deeds.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `AnalysisConfig` and prints reports.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_deeds::{
    analyze, inspect, store::report_key, AnalysisConfig, AnalysisProgressCallback, AnalysisRun,
    AnalysisService, BlobStore, FsStore, PipelineShape, PollResponse, ProgressCallback,
    ReportStore, Stage,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner plus one log line per finished model call. The number of calls
/// is only known once identification returns, so there is no bar length.
struct CliProgressCallback {
    bar: ProgressBar,
    completed: AtomicUsize,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed_precise}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDFs…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            completed: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
        })
    }
}

impl AnalysisProgressCallback for CliProgressCallback {
    fn on_file_rasterized(&self, file_name: &str, pages: usize) {
        self.bar.println(format!(
            "  {} {:<40} {}",
            dim("▸"),
            file_name,
            dim(&format!("{pages} pages"))
        ));
    }

    fn on_run_start(&self, files: usize, pages: usize) {
        self.bar.set_prefix("Analysing");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Analysing {pages} pages from {files} files…"))
        ));
    }

    fn on_stage_start(&self, stage: &Stage) {
        self.bar.set_message(stage.to_string());
    }

    fn on_stage_complete(&self, stage: &Stage) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!("  {} {}", green("✓"), stage));
    }

    fn on_stage_error(&self, stage: &Stage, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!("  {} {}  {}", red("✗"), stage, red(&msg)));
    }

    fn on_run_complete(&self, documents: usize, events: usize, red_flags: usize) {
        self.bar.finish_and_clear();
        let errors = self.errors.load(Ordering::SeqCst);
        eprintln!(
            "{} {} documents, {} title-chain events, {} red flags  {}",
            if errors == 0 { green("✔") } else { cyan("⚠") },
            bold(&documents.to_string()),
            events,
            red_flags,
            dim(&format!(
                "({} calls ok, {} failed)",
                self.completed.load(Ordering::SeqCst),
                errors
            )),
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Analyse a bundle, report to stdout
  deeds analyze sale-deed.pdf tax-receipts.pdf

  # Write the report to a file
  deeds analyze bundle/*.pdf -o report.json

  # Batched pipeline (many pages, small request budget)
  deeds analyze --shape batch-then-synthesize --batch-size 8 big-bundle.pdf

  # Background run against a local store, then poll
  deeds submit --store ./store deed.pdf
  deeds report --store ./store 3f2c9b8e-…

  # Page count only (no API key needed)
  deeds inspect deed.pdf

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Directory containing libpdfium
  DEEDS_STORE_DIR         Root directory of the local store
"#;

/// Analyse property title documents using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "deeds",
    version,
    about = "Segment, summarise and audit property title documents using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DEEDS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DEEDS_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyse PDFs and wait for the report.
    Analyze {
        /// Local PDF paths or HTTP/HTTPS URLs, in bundle order.
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Write the report to this file instead of stdout.
        #[arg(short, long, env = "DEEDS_OUTPUT")]
        output: Option<PathBuf>,

        /// Also print run statistics to stderr.
        #[arg(long)]
        stats: bool,

        #[command(flatten)]
        run: RunArgs,
    },
    /// Store a PDF in a local store, start a background run and poll until done.
    Submit {
        input: String,

        #[arg(long, env = "DEEDS_STORE_DIR", default_value = ".deeds-store")]
        store: PathBuf,

        /// Analysis ID; a random UUID when omitted.
        #[arg(long)]
        id: Option<String>,

        /// Seconds between polls.
        #[arg(long, default_value_t = 2)]
        poll_interval: u64,

        /// Give up polling after this many seconds.
        #[arg(long, default_value_t = 1800)]
        wait_timeout: u64,

        #[command(flatten)]
        run: RunArgs,
    },
    /// Poll one analysis ID in a local store.
    Report {
        id: String,

        #[arg(long, env = "DEEDS_STORE_DIR", default_value = ".deeds-store")]
        store: PathBuf,
    },
    /// Print the page count of a PDF.
    Inspect {
        input: String,

        #[arg(long, env = "DEEDS_PASSWORD")]
        password: Option<String>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Orchestration strategy.
    #[arg(long, env = "DEEDS_SHAPE", value_enum, default_value = "segment-then-analyze")]
    shape: ShapeArg,

    /// LLM model ID (e.g. gpt-4.1-mini, claude-sonnet-4-20250514, gemini-2.0-flash).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Pages per batch (batch-then-synthesize only).
    #[arg(long, env = "DEEDS_BATCH_SIZE", default_value_t = 10)]
    batch_size: usize,

    /// Document analyses in flight at once (segment-then-analyze only).
    #[arg(short, long, env = "DEEDS_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Render scale factor (0.5–4.0).
    #[arg(long, env = "DEEDS_RENDER_SCALE", default_value_t = 1.5)]
    render_scale: f32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "DEEDS_PASSWORD")]
    password: Option<String>,

    /// Max LLM output tokens per call.
    #[arg(long, env = "DEEDS_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "DEEDS_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per call on rate limits, timeouts and transport errors.
    #[arg(long, env = "DEEDS_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "DEEDS_API_TIMEOUT", default_value_t = 300)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "DEEDS_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Keep the model's title-chain order instead of sorting by date.
    #[arg(long)]
    keep_model_order: bool,

    /// Do not report pages left uncovered by any document.
    #[arg(long)]
    no_fill_uncovered: bool,

    /// Disable progress output.
    #[arg(long, env = "DEEDS_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ShapeArg {
    SegmentThenAnalyze,
    BatchThenSynthesize,
    SinglePass,
}

impl From<ShapeArg> for PipelineShape {
    fn from(v: ShapeArg) -> Self {
        match v {
            ShapeArg::SegmentThenAnalyze => PipelineShape::SegmentThenAnalyze,
            ShapeArg::BatchThenSynthesize => PipelineShape::BatchThenSynthesize,
            ShapeArg::SinglePass => PipelineShape::SinglePass,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO-level library logs are suppressed while the spinner is active.
    let progress_active = match &cli.command {
        Command::Analyze { run, .. } | Command::Submit { run, .. } => !cli.quiet && !run.no_progress,
        _ => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || progress_active {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Analyze {
            inputs,
            output,
            stats,
            run,
        } => {
            let config = build_config(&run, progress_active)?;
            let result = analyze(inputs.as_slice(), &config).await.context("Analysis failed")?;
            write_report(&result, output.as_ref())?;
            if stats && !cli.quiet {
                print_stats(&result);
            }
        }
        Command::Submit {
            input,
            store,
            id,
            poll_interval,
            wait_timeout,
            run,
        } => {
            let config = build_config(&run, progress_active)?;
            submit(&input, store, id, poll_interval, wait_timeout, config, cli.quiet).await?;
        }
        Command::Report { id, store } => {
            let store = FsStore::new(store);
            let poll = match store.get_report(&id).await.context("Failed to read report")? {
                Some(report) => PollResponse::Complete { report },
                None => PollResponse::Pending,
            };
            println!("{}", serde_json::to_string_pretty(&poll).context("Failed to serialise report")?);
        }
        Command::Inspect { input, password } => {
            let file = inspect(&input, password).await.context("Failed to inspect PDF")?;
            println!("File:   {}", file.name);
            println!("Pages:  {}", file.total_pages);
        }
    }
    Ok(())
}

/// Map CLI args to `AnalysisConfig`.
fn build_config(run: &RunArgs, progress: bool) -> Result<AnalysisConfig> {
    let mut builder = AnalysisConfig::builder()
        .shape(run.shape.into())
        .batch_size(run.batch_size)
        .segment_concurrency(run.concurrency)
        .render_scale(run.render_scale)
        .max_tokens(run.max_tokens)
        .temperature(run.temperature)
        .max_retries(run.max_retries)
        .api_timeout_secs(run.api_timeout)
        .download_timeout_secs(run.download_timeout)
        .chronological_title_chain(!run.keep_model_order)
        .fill_uncovered_pages(!run.no_fill_uncovered);

    if let Some(ref model) = run.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = run.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref password) = run.password {
        builder = builder.password(password.clone());
    }
    if progress {
        let cb: ProgressCallback = CliProgressCallback::new();
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

fn write_report(run: &AnalysisRun, output: Option<&PathBuf>) -> Result<()> {
    let json = run.outcome.to_json().context("Failed to serialise report")?;
    match output {
        Some(path) => {
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, &json).with_context(|| format!("Failed to write {}", tmp.display()))?;
            std::fs::rename(&tmp, path).with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("{}  →  {}", green("✔"), bold(&path.display().to_string()));
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle.write_all(json.as_bytes()).context("Failed to write to stdout")?;
            handle.write_all(b"\n").ok();
        }
    }
    Ok(())
}

fn print_stats(run: &AnalysisRun) {
    let s = &run.stats;
    eprintln!(
        "   {} shape  {} files  {} pages  {} calls ({} failed)  {}ms",
        s.shape, s.total_files, s.total_pages, s.inference_calls, s.failed_calls, s.total_duration_ms
    );
    eprintln!(
        "   {} tokens in  /  {} tokens out",
        dim(&s.input_tokens.to_string()),
        dim(&s.output_tokens.to_string()),
    );
}

async fn submit(
    input: &str,
    root: PathBuf,
    id: Option<String>,
    poll_interval: u64,
    wait_timeout: u64,
    config: AnalysisConfig,
    quiet: bool,
) -> Result<()> {
    let resolved = edgequake_deeds::pipeline::input::resolve_input(input, config.download_timeout_secs)
        .await
        .context("Failed to read input")?;
    let store = Arc::new(FsStore::new(root));
    let key = format!("uploads/{}", resolved.name);
    store
        .put(&key, resolved.bytes)
        .await
        .with_context(|| format!("Failed to store {key}"))?;

    let service = AnalysisService::connect(store.clone(), store.clone(), config)
        .await
        .context("Failed to configure the model provider")?;
    let started = service.start_analysis(&key, id).context("Failed to start analysis")?;
    if !quiet {
        eprintln!(
            "{} started {}  {}",
            cyan("◆"),
            bold(&started.analysis_id),
            dim(&report_key(&started.analysis_id))
        );
    }

    let deadline = Instant::now() + Duration::from_secs(wait_timeout);
    loop {
        match service.poll_report(&started.analysis_id).await? {
            PollResponse::Complete { report } => {
                println!("{}", report.to_json().context("Failed to serialise report")?);
                return Ok(());
            }
            PollResponse::Pending if Instant::now() >= deadline => {
                anyhow::bail!(
                    "analysis {} still pending after {}s (see logs for failures)",
                    started.analysis_id,
                    wait_timeout
                );
            }
            PollResponse::Pending => tokio::time::sleep(Duration::from_secs(poll_interval.max(1))).await,
        }
    }
}
