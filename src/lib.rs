//! # invoice-split
//!
//! Segment multi-invoice PDF scans into per-invoice documents and extract
//! structured fields using Vision Language Models (VLMs).
//!
//! ## Why this crate?
//!
//! Accounts-payable inboxes receive PDFs that batch several invoices into one
//! scan. Heuristics over text layers fail on them — many are image-only, and
//! invoice layouts vary too much for rules to find the boundaries reliably.
//! Instead this crate rasterises each page and asks a VLM two questions a
//! human clerk would answer at a glance: "does this page start a new
//! invoice?" and "what are its fields?". The source PDF is then split at
//! byte level, so every output invoice keeps the original fidelity.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Integrity  validate or repair via lopdf; unrepairable input is
//!  │                quarantined without a single API call
//!  ├─ 2. Render     rasterise pages via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 3. Encode     JPEG → base64 ImageData
//!  ├─ 4. Classify   concurrent per-page boundary calls to gpt-4o / claude / …
//!  ├─ 5. Group      linear scan into an exact partition of the page range
//!  ├─ 6. Extract    one per-group call carrying all of the group's pages
//!  └─ 7. Write      split PDFs + JSON records to the store, records to the sink
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use invoice_split::{process_document, LocalDirStore, NullRecordSink, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = PipelineConfig::default();
//!     let store = LocalDirStore::new("out");
//!     let bytes = std::fs::read("scan.pdf")?;
//!
//!     let report = process_document(1, "scan", bytes, &store, &NullRecordSink, &config).await?;
//!     println!("{} invoices, state: {}", report.artifacts.len(), report.state);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `invoice-split` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! invoice-split = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod handoff;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod prompts;
pub mod vision;

#[cfg(test)]
pub(crate) mod test_pdf;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{CancelToken, PipelineConfig, PipelineConfigBuilder};
pub use error::{GroupError, PipelineError};
pub use handoff::{
    AttachmentFetcher, FetchedAttachment, HandoffFailure, HttpAttachmentFetcher, HttpRecordSink,
    LocalDirStore, NullRecordSink, ObjectStore, RecordSink,
};
pub use model::{
    BoundarySignal, ExtractedInvoice, ExtractionStatus, InvoiceGroup, InvoiceRecord, LineItem,
    Page, SourceDocument, Validity,
};
pub use output::{ArtifactSummary, JobReport, JobState, JobStats, OutputArtifact};
pub use process::{process_document, process_pages, run_job};
pub use vision::{LlmVisionModel, VisionError, VisionModel, VisionReply, VisionRequest};
