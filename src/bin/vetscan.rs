//! CLI binary for vetscan.
//!
//! A thin shim over the library crate that maps CLI flags to a
//! `ProcessingConfig` plus concrete collaborators, runs one report through
//! the pipeline, and prints the result.

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use vetscan::services::{
    DocumentAiExtractor, EntityExtractor, FsObjectStore, MemoryReportStore, StaticExtractor,
};
use vetscan::{
    format_bytes, inspect_images, PipelineStage, ProcessingConfig, ProcessingProgressCallback,
    ProgressCallback, ReportProcessor, ScanLimits, UploadedFile, MIB,
};

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

/// Terminal progress: a spinner naming the current stage, switching to a
/// bar while images upload. Uploads may finish out of order.
struct CliProgressCallback {
    bar: ProgressBar,
    failed: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            failed: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} images  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Uploading");
    }
}

impl ProcessingProgressCallback for CliProgressCallback {
    fn on_processing_start(&self, file_name: &str, size_bytes: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "Processing {file_name} ({})",
                format_bytes(size_bytes as u64)
            ))
        ));
    }

    fn on_stage(&self, stage: PipelineStage) {
        self.bar.set_prefix("Working");
        self.bar.set_message(stage.to_string());
    }

    fn on_images_scanned(&self, count: usize) {
        self.bar.println(format!(
            "  {} {} image(s) found",
            green("✓"),
            bold(&count.to_string())
        ));
        if count > 0 {
            self.activate_bar(count);
        }
    }

    fn on_image_uploaded(&self, index: usize, total: usize) {
        self.bar.println(format!(
            "  {} Image {:>3}/{:<3}",
            green("✓"),
            index,
            total
        ));
        self.bar.inc(1);
    }

    fn on_image_failed(&self, index: usize, total: usize, error: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Image {:>3}/{:<3}  {}",
            red("✗"),
            index,
            total,
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_processing_complete(&self, images_stored: usize, images_scanned: usize) {
        self.bar.finish_and_clear();
        let failed = self.failed.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!(
                "{} report stored with {} image(s)",
                green("✔"),
                bold(&images_stored.to_string())
            );
        } else {
            eprintln!(
                "{} report stored with {}/{} image(s)  ({} failed)",
                cyan("⚠"),
                bold(&images_stored.to_string()),
                images_scanned,
                red(&failed.to_string())
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # List embedded images without contacting any service
  vetscan --scan-only informe.pdf

  # Full run against a saved processor response
  vetscan --document-json respuesta.json informe.pdf

  # Full run against a live processor, keeping reports between runs
  vetscan --extractor-url "$PROCESSOR_URL" --extractor-token "$(gcloud auth print-access-token)" \
          --reports-file reports.json informe.pdf

  # Machine-readable output
  vetscan --json --document-json respuesta.json informe.pdf > report.json

ENVIRONMENT VARIABLES:
  VETSCAN_OUTPUT_DIR          Where the original PDF and images are written
  VETSCAN_PUBLIC_URL          URL prefix for stored objects
  VETSCAN_EXTRACTOR_URL       Document processor `:process` endpoint
  VETSCAN_EXTRACTOR_TOKEN     Bearer token for the processor
  VETSCAN_REPORTS_FILE        JSON snapshot of stored reports
  RUST_LOG                    Overrides the log filter derived from -v/-q
"#;

/// Extract images and clinical fields from a veterinary ultrasound report.
#[derive(Parser, Debug)]
#[command(
    name = "vetscan",
    version,
    about = "Extract images and clinical fields from veterinary ultrasound PDFs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF report to process.
    input: PathBuf,

    /// Directory that receives the original PDF and extracted images.
    #[arg(long, env = "VETSCAN_OUTPUT_DIR", default_value = "vetscan-output")]
    output_dir: PathBuf,

    /// URL prefix for stored objects. Default: file:// URL of --output-dir.
    #[arg(long, env = "VETSCAN_PUBLIC_URL")]
    public_url: Option<String>,

    /// Document processor `:process` endpoint.
    #[arg(long, env = "VETSCAN_EXTRACTOR_URL", conflicts_with = "document_json")]
    extractor_url: Option<String>,

    /// Bearer token sent to the document processor.
    #[arg(long, env = "VETSCAN_EXTRACTOR_TOKEN", hide_env_values = true)]
    extractor_token: Option<String>,

    /// Document processor request timeout in seconds.
    #[arg(long, env = "VETSCAN_EXTRACTOR_TIMEOUT", default_value_t = 120)]
    extractor_timeout: u64,

    /// Use a saved processor response instead of calling the processor.
    #[arg(long)]
    document_json: Option<PathBuf>,

    /// Persist reports to this JSON file (loaded first if present).
    #[arg(long, env = "VETSCAN_REPORTS_FILE")]
    reports_file: Option<PathBuf>,

    /// Only list accepted images; store nothing.
    #[arg(long)]
    scan_only: bool,

    /// Concurrent image uploads (1–8).
    #[arg(short, long, env = "VETSCAN_UPLOAD_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Maximum accepted PDF size in MiB.
    #[arg(long, env = "VETSCAN_MAX_FILE_SIZE_MB", default_value_t = 10)]
    max_file_size_mb: u64,

    /// Images this size in bytes or smaller are ignored.
    #[arg(long, default_value_t = 1000)]
    min_image_bytes: usize,

    /// Images this many pixels wide or tall, or smaller, are ignored.
    #[arg(long, default_value_t = 50)]
    min_image_dimension: u32,

    /// Print JSON instead of a summary.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "VETSCAN_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "VETSCAN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "VETSCAN_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless -v is given.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.scan_only;
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

    let bytes = tokio::fs::read(&cli.input)
        .await
        .with_context(|| format!("Failed to read {}", cli.input.display()))?;

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ProcessingProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Scan-only mode ───────────────────────────────────────────────────
    if cli.scan_only {
        let outcome = inspect_images(bytes, &config)
            .await
            .context("Failed to scan PDF")?;
        if cli.json {
            let images: Vec<serde_json::Value> = outcome
                .images
                .iter()
                .map(|img| {
                    serde_json::json!({
                        "index": img.index,
                        "width": img.width,
                        "height": img.height,
                        "format": img.format,
                        "size": img.byte_size,
                    })
                })
                .collect();
            let out = serde_json::json!({ "images": images, "warnings": outcome.warnings });
            println!(
                "{}",
                serde_json::to_string_pretty(&out).context("Failed to serialise scan")?
            );
        } else {
            println!("File:    {}", cli.input.display());
            println!("Images:  {}", outcome.images.len());
            for img in &outcome.images {
                println!(
                    "  #{:<3} {:>5}x{:<5} {:<4} {}",
                    img.index,
                    img.width,
                    img.height,
                    img.format,
                    format_bytes(img.byte_size as u64)
                );
            }
            for w in &outcome.warnings {
                eprintln!("{} {}", cyan("⚠"), w);
            }
        }
        return Ok(());
    }

    // ── Full pipeline ────────────────────────────────────────────────────
    let extractor = build_extractor(&cli).await?;
    tokio::fs::create_dir_all(&cli.output_dir)
        .await
        .with_context(|| format!("Failed to create {}", cli.output_dir.display()))?;
    let public_url = match cli.public_url.clone() {
        Some(url) => url,
        None => file_url(&cli.output_dir)?,
    };
    let objects = Arc::new(FsObjectStore::new(&cli.output_dir, public_url));
    let reports = match &cli.reports_file {
        Some(path) => MemoryReportStore::with_snapshot(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?,
        None => MemoryReportStore::new(),
    };

    let processor = ReportProcessor::new(config, objects, extractor, Arc::new(reports));
    let file_name = cli
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "report.pdf".to_string());

    let outcome = processor
        .process_upload(UploadedFile::pdf(file_name, bytes))
        .await
        .context("Processing failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&outcome.report)
            .context("Failed to serialise report")?;
        println!("{json}");
    } else if !cli.quiet {
        let r = &outcome.report;
        println!("{}  {}", bold("Report"), r.id);
        println!(
            "  Patient:       {} ({}, {})",
            r.report.patient.name, r.report.patient.species, r.report.patient.breed
        );
        println!("  Owner:         {}", r.report.owner.name);
        println!("  Veterinarian:  {}", r.report.veterinarian.name);
        println!("  Diagnosis:     {}", r.report.clinical.diagnosis);
        println!(
            "  Images:        {}/{}",
            r.report.images.len(),
            outcome.images_scanned
        );
        for img in &r.report.images {
            println!("    {} {}", dim(&format!("#{}", img.index)), img.url);
        }
        println!("  {}", dim(&format!("{}ms", r.processing_time_ms)));
    }
    for w in &outcome.warnings {
        if !cli.quiet {
            eprintln!("{} {}", cyan("⚠"), w);
        }
    }

    Ok(())
}

/// Map CLI args to `ProcessingConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ProcessingConfig> {
    let mut builder = ProcessingConfig::builder()
        .max_file_size(cli.max_file_size_mb.saturating_mul(MIB))
        .upload_concurrency(cli.concurrency)
        .scan_limits(ScanLimits {
            min_bytes: cli.min_image_bytes,
            min_dimension: cli.min_image_dimension,
        })
        .debug_errors(cli.verbose);
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

async fn build_extractor(cli: &Cli) -> Result<Arc<dyn EntityExtractor>> {
    if let Some(ref path) = cli.document_json {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let extractor = StaticExtractor::from_document_ai_json(&json)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        return Ok(Arc::new(extractor));
    }
    if let Some(ref url) = cli.extractor_url {
        let extractor =
            DocumentAiExtractor::new(url.clone(), cli.extractor_token.clone(), cli.extractor_timeout)
                .context("Failed to build processor client")?;
        return Ok(Arc::new(extractor));
    }
    bail!("No entity extractor configured: pass --extractor-url or --document-json (or use --scan-only)")
}

fn file_url(dir: &Path) -> Result<String> {
    let abs = std::fs::canonicalize(dir)
        .with_context(|| format!("Failed to resolve {}", dir.display()))?;
    Ok(format!("file://{}", abs.display()))
}
