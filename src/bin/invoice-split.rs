//! CLI binary for invoice-split.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, wires the local-filesystem store, and prints the report.

use anyhow::{Context, Result};
use clap::Parser;
use invoice_split::{
    process_document, run_job, ExtractionStatus, HttpAttachmentFetcher, HttpRecordSink, JobReport,
    JobState, LocalDirStore, NullRecordSink, PipelineConfig, RecordSink,
};
use std::io;
use std::path::PathBuf;
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

const AFTER_HELP: &str = r#"EXAMPLES:
  # Split a local scan into per-invoice PDFs + JSON records under ./out
  invoice-split scan.pdf

  # Choose the output directory and model
  invoice-split scan.pdf -o processed --model gpt-4o --provider openai

  # Process an attachment from the processor API
  invoice-split --attachment-id 4711 --api-base https://api.example.com

  # Machine-readable job report
  invoice-split scan.pdf --json > report.json

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  PDFIUM_LIB_PATH         Path to an existing libpdfium

OUTPUT LAYOUT:
  {out}/{attachment_id}/{stem}_invoice_{number}.pdf    split invoice
  {out}/{attachment_id}/{stem}_invoice_{number}.json   extracted fields
  {out}/errors/{attachment_id}/{stem}.pdf              unrepairable input

Artifact names are deterministic, so re-running the same job overwrites
its previous output instead of duplicating it.
"#;

/// Split multi-invoice PDF scans and extract structured fields using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "invoice-split",
    version,
    about = "Split multi-invoice PDF scans and extract structured fields using Vision LLMs",
    long_about = "Segment a PDF containing several scanned invoices into one PDF per invoice, \
extract structured fields (invoice number, vendor, amounts, line items) with a Vision Language \
Model, and write the artifacts to a local directory. Supports OpenAI, Anthropic, Google Gemini, \
Azure OpenAI, and any OpenAI-compatible endpoint.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file to process. Omit when using --attachment-id.
    input: Option<PathBuf>,

    /// Fetch the document from the processor API instead of a local file.
    #[arg(long, env = "INVOICE_SPLIT_ATTACHMENT_ID", conflicts_with = "input")]
    attachment_id: Option<i64>,

    /// Base URL of the processor API (attachment fetch + record creation).
    #[arg(long, env = "INVOICE_SPLIT_API_BASE")]
    api_base: Option<String>,

    /// Output directory for split PDFs and JSON records.
    #[arg(short, long, env = "INVOICE_SPLIT_OUTPUT", default_value = "out")]
    output: PathBuf,

    /// Vision LLM model ID (e.g. gpt-4o, claude-sonnet-4-20250514).
    #[arg(long, env = "INVOICE_SPLIT_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "INVOICE_SPLIT_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// Number of concurrent vision API calls.
    #[arg(short, long, env = "INVOICE_SPLIT_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Longest edge of rendered page images, in pixels.
    #[arg(long, env = "INVOICE_SPLIT_MAX_PIXELS", default_value_t = 2000,
          value_parser = clap::value_parser!(u32).range(100..=8000))]
    max_pixels: u32,

    /// JPEG quality for encoded page images (1-100).
    #[arg(long, env = "INVOICE_SPLIT_JPEG_QUALITY", default_value_t = 85,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// LLM temperature (0.0-2.0).
    #[arg(long, env = "INVOICE_SPLIT_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per vision call on failure.
    #[arg(long, env = "INVOICE_SPLIT_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-call vision API timeout in seconds.
    #[arg(long, env = "INVOICE_SPLIT_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Output the structured JobReport as JSON instead of the summary.
    #[arg(long, env = "INVOICE_SPLIT_JSON")]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "INVOICE_SPLIT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "INVOICE_SPLIT_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli).context("Invalid configuration")?;
    let store = LocalDirStore::new(&cli.output);

    // Records go to the processor API when one is configured, otherwise the
    // JSON artifact in the output directory is the durable copy.
    let sink: Box<dyn RecordSink> = match cli.api_base {
        Some(ref base) => {
            Box::new(HttpRecordSink::new(base.as_str()).context("Invalid --api-base")?)
        }
        None => Box::new(NullRecordSink),
    };

    // ── Run the job ──────────────────────────────────────────────────────
    let report = match (&cli.input, cli.attachment_id) {
        (Some(path), None) => {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "document".to_string());
            process_document(0, &stem, bytes, &store, sink.as_ref(), &config)
                .await
                .context("Processing failed")?
        }
        (None, Some(attachment_id)) => {
            let base = cli
                .api_base
                .as_deref()
                .context("--attachment-id requires --api-base")?;
            let fetcher = HttpAttachmentFetcher::new(base).context("Invalid --api-base")?;
            run_job(&fetcher, &store, sink.as_ref(), attachment_id, &config)
                .await
                .context("Processing failed")?
        }
        _ => anyhow::bail!("Provide either a local PDF file or --attachment-id"),
    };

    // ── Report ───────────────────────────────────────────────────────────
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !cli.quiet {
        print_summary(&report, &cli.output);
    }

    if report.state == JobState::Unprocessable {
        std::process::exit(2);
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .concurrency(cli.concurrency)
        .max_rendered_pixels(cli.max_pixels)
        .jpeg_quality(cli.jpeg_quality)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }

    Ok(builder.build()?)
}

/// Human-readable per-invoice summary on stderr.
fn print_summary(report: &JobReport, out_dir: &std::path::Path) {
    match report.state {
        JobState::Completed => {
            for artifact in &report.artifacts {
                let (tick, note) = match artifact.status {
                    ExtractionStatus::Extracted => (green("✓"), String::new()),
                    ExtractionStatus::ExtractionFailed => {
                        (red("✗"), red("  fields missing (extraction failed)"))
                    }
                };
                eprintln!(
                    "  {tick} {}  {}{note}",
                    bold(&artifact.name),
                    dim(&format!("pages {:?}", artifact.pages)),
                );
            }
            let s = &report.stats;
            eprintln!(
                "{} {} invoices from {} pages  →  {}",
                if s.failed_groups == 0 {
                    green("✔")
                } else {
                    cyan("⚠")
                },
                bold(&s.invoice_count.to_string()),
                s.total_pages,
                bold(&out_dir.join(report.attachment_id.to_string()).display().to_string()),
            );
            eprintln!(
                "   {} tokens in  /  {} tokens out  —  {}ms total",
                dim(&s.total_input_tokens.to_string()),
                dim(&s.total_output_tokens.to_string()),
                s.total_duration_ms,
            );
        }
        JobState::Unprocessable => {
            eprintln!(
                "{} document could not be repaired; original preserved under {}",
                red("✘"),
                bold(&out_dir.join("errors").display().to_string()),
            );
        }
        other => {
            // run_job only returns through Completed or Unprocessable; fatal
            // paths surface as errors before this point.
            eprintln!("{} job ended in state {other}", red("✘"));
        }
    }
}
