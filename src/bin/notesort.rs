//! CLI binary for notesort.
//!
//! `notesort serve` runs the HTTP service; `notesort sort` runs the same
//! pipeline over local files or URLs and writes the archive to disk. Both map
//! their flags onto `SortConfig`.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use notesort::{
    serve, sort_files, BatchProgressCallback, CollisionPolicy, Pipeline, ProgressCallback,
    ServerConfig, SortConfig, TesseractEngine,
};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};
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

/// Progress bar plus one log line per file.
struct CliProgressCallback {
    bar: ProgressBar,
    file_started: Mutex<Option<Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Sorting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            file_started: Mutex::new(None),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self) -> f64 {
        self.file_started
            .lock()
            .ok()
            .and_then(|mut t| t.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_files: usize) {
        self.bar.set_length(total_files as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Sorting {total_files} file(s)…"))
        ));
    }

    fn on_file_start(&self, _index: usize, _total_files: usize, file_name: &str) {
        if let Ok(mut t) = self.file_started.lock() {
            *t = Some(Instant::now());
        }
        self.bar.set_message(file_name.to_string());
    }

    fn on_file_complete(&self, index: usize, total_files: usize, file_name: &str, category: &str) {
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  →  {}  {}",
            green("✓"),
            index,
            total_files,
            file_name,
            bold(category),
            dim(&format!("{:.1}s", self.elapsed_secs())),
        ));
        self.bar.inc(1);
    }

    fn on_file_error(&self, index: usize, total_files: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}",
            red("✗"),
            index,
            total_files,
            red(&msg),
            dim(&format!("{:.1}s", self.elapsed_secs())),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_files: usize, success_count: usize) {
        let failed = total_files.saturating_sub(success_count);
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!("{} {} file(s) sorted", green("✔"), bold(&success_count.to_string()));
        } else {
            eprintln!(
                "{} {}/{} file(s) sorted  ({} failed)",
                if failed == total_files { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total_files,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the upload service on the default port
  notesort serve

  # Allow a different front end
  notesort serve --bind 0.0.0.0:8080 --allow-origin https://notes.example.com

  # Sort local photos into a zip
  notesort sort IMG_001.jpg IMG_002.jpg -c Study -c Planning -o notes.zip

  # Print the per-file manifest as JSON
  notesort sort scans/*.png -c Study,Motivation --json

  # Keep both files when two uploads share a name
  notesort sort a/page.png b/page.png --collision rename

  # Upload to a running service
  curl -F file=@page.png -F categories=Study -o notes.zip http://localhost:8000/upload/

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (default provider)
  GENAI_API_KEY           Same, also accepted (as is GOOGLE_API_KEY)
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (gemini, openai, anthropic, ollama)
  EDGEQUAKE_MODEL         Override model ID
  NOTESORT_*              Any flag, e.g. NOTESORT_WORK_DIR, NOTESORT_BIND
  RUST_LOG                Log filter, overrides --verbose / --quiet

  A `.env` file in the working directory is loaded on startup.

SETUP:
  1. Install Tesseract:  apt install tesseract-ocr  (or brew install tesseract)
  2. Set an API key:     export GEMINI_API_KEY=...
  3. Serve:              notesort serve
"#;

/// Sort photographed notes into category folders using OCR and an LLM.
#[derive(Parser, Debug)]
#[command(
    name = "notesort",
    version,
    about = "Sort photographed notes into category folders using OCR and an LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "NOTESORT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "NOTESORT_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP upload service.
    Serve(ServeArgs),
    /// Sort local files or URLs into a zip archive.
    Sort(SortArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "NOTESORT_BIND", default_value = "127.0.0.1:8000")]
    bind: SocketAddr,

    /// Allowed CORS origin; repeat for several, `*` for any.
    #[arg(long = "allow-origin", env = "NOTESORT_ALLOWED_ORIGINS",
          value_delimiter = ',', default_value = "http://localhost:3000")]
    allowed_origins: Vec<String>,

    /// Maximum request body size in MiB.
    #[arg(long, env = "NOTESORT_MAX_UPLOAD_MB", default_value_t = 50)]
    max_upload_mb: usize,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(Args, Debug)]
struct SortArgs {
    /// Image paths or HTTP/HTTPS URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Category names; repeat or separate with commas.
    #[arg(short, long = "categories", value_delimiter = ',')]
    categories: Vec<String>,

    /// Where to write the archive.
    #[arg(short, long, env = "NOTESORT_OUTPUT", default_value = "organized_notes.zip")]
    output: PathBuf,

    /// Print the manifest as JSON on stdout.
    #[arg(long, env = "NOTESORT_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "NOTESORT_NO_PROGRESS")]
    no_progress: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "NOTESORT_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

/// Settings shared by `serve` and `sort`.
#[derive(Args, Debug)]
struct PipelineArgs {
    /// Directory holding per-batch working directories.
    #[arg(long, env = "NOTESORT_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// LLM model ID (e.g. gemini-2.0-flash, gpt-4.1-nano).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: gemini, openai, anthropic, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "NOTESORT_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Label used when nothing fits.
    #[arg(long, env = "NOTESORT_FALLBACK_CATEGORY", default_value = "Other")]
    fallback_category: String,

    /// Maximum number of categories per batch.
    #[arg(long, env = "NOTESORT_MAX_CATEGORIES", default_value_t = 64)]
    max_categories: usize,

    /// What to do when two files with the same name land in one folder.
    #[arg(long, env = "NOTESORT_COLLISION", value_enum, default_value = "overwrite")]
    collision: CollisionArg,

    /// Leave the JSON manifest out of the archive.
    #[arg(long, env = "NOTESORT_NO_MANIFEST")]
    no_manifest: bool,

    /// Retries per file on LLM failure.
    #[arg(long, env = "NOTESORT_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,

    /// Per-file LLM call timeout in seconds.
    #[arg(long, env = "NOTESORT_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Tesseract executable.
    #[arg(long, env = "NOTESORT_TESSERACT", default_value = "tesseract")]
    tesseract: String,

    /// Tesseract language(s), e.g. eng or eng+deu.
    #[arg(long, env = "NOTESORT_OCR_LANG")]
    ocr_lang: Option<String>,

    /// Tesseract page segmentation mode (0–13).
    #[arg(long, env = "NOTESORT_OCR_PSM",
          value_parser = clap::value_parser!(u8).range(0..=13))]
    ocr_psm: Option<u8>,

    /// Per-image OCR timeout in seconds.
    #[arg(long, env = "NOTESORT_OCR_TIMEOUT", default_value_t = 60)]
    ocr_timeout: u64,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum CollisionArg {
    Overwrite,
    Rename,
}

impl From<CollisionArg> for CollisionPolicy {
    fn from(v: CollisionArg) -> Self {
        match v {
            CollisionArg::Overwrite => CollisionPolicy::Overwrite,
            CollisionArg::Rename => CollisionPolicy::Rename,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before parsing so `env = ...` defaults see it.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // `sort` with a progress bar only needs errors; the bar shows the rest.
    let show_progress = match &cli.command {
        Command::Sort(args) => !cli.quiet && !args.no_progress && !args.json,
        Command::Serve(_) => false,
    };
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

    match cli.command {
        Command::Serve(args) => run_serve(args).await,
        Command::Sort(args) => run_sort(args, show_progress, cli.quiet).await,
    }
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let config = build_config(&args.pipeline, None, None).await?;

    match TesseractEngine::from_config(&config).version().await {
        Ok(version) => info!("OCR engine: {}", version),
        Err(e) => warn!("{} (OCR will fail for every upload)", e),
    }
    info!("Work directory: {}", config.work_dir.display());

    let server = ServerConfig {
        bind: args.bind,
        allowed_origins: args.allowed_origins,
        max_upload_bytes: args.max_upload_mb.saturating_mul(1024 * 1024),
    };
    serve(server, Pipeline::new(config))
        .await
        .context("Server failed")
}

async fn run_sort(args: SortArgs, show_progress: bool, quiet: bool) -> Result<()> {
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };

    let config = build_config(&args.pipeline, progress_cb, Some(args.download_timeout)).await?;

    let manifest = sort_files(&args.inputs[..], &args.categories, &args.output, &config)
        .await
        .context("Sorting failed")?;

    if args.json {
        let json = manifest
            .to_json_pretty()
            .context("Failed to serialise manifest")?;
        println!("{json}");
    } else if !quiet {
        let stats = &manifest.stats;
        eprintln!(
            "{}  {}/{} files  {}ms  →  {}",
            if stats.failed_files == 0 { green("✔") } else { cyan("⚠") },
            stats.organized_files,
            stats.total_files,
            stats.total_duration_ms,
            bold(&args.output.display().to_string()),
        );
        if !manifest.new_categories.is_empty() {
            eprintln!(
                "   new categories: {}",
                dim(&manifest.new_categories.join(", "))
            );
        }
        if !show_progress {
            for failure in manifest.failures() {
                if let Some(ref e) = failure.error {
                    eprintln!("   {} {}", red("✗"), e);
                }
            }
        }
    }

    Ok(())
}

/// Map CLI args to `SortConfig`.
async fn build_config(
    args: &PipelineArgs,
    progress: Option<ProgressCallback>,
    download_timeout: Option<u64>,
) -> Result<SortConfig> {
    let system_prompt = if let Some(ref path) = args.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let mut builder = SortConfig::builder()
        .fallback_category(args.fallback_category.clone())
        .max_categories(args.max_categories)
        .collision(args.collision.clone().into())
        .include_manifest(!args.no_manifest)
        .max_retries(args.max_retries)
        .api_timeout_secs(args.api_timeout)
        .tesseract_cmd(args.tesseract.clone())
        .ocr_timeout_secs(args.ocr_timeout);

    if let Some(ref dir) = args.work_dir {
        builder = builder.work_dir(dir);
    }
    if let Some(ref lang) = args.ocr_lang {
        builder = builder.ocr_language(lang.clone());
    }
    if let Some(psm) = args.ocr_psm {
        builder = builder.ocr_psm(psm);
    }
    if let Some(secs) = download_timeout {
        builder = builder.download_timeout_secs(secs);
    }
    if let Some(ref model) = args.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
