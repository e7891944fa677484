//! Job orchestration: the entry points that drive a document end to end.
//!
//! ## State machine
//!
//! ```text
//! received ─▶ validated ─▶ segmented ─▶ extracted ─▶ written ─▶ completed
//!     │
//!     └─▶ unprocessable        (unrepairable input, error partition)
//! ```
//!
//! A state only advances after its stage fully completes. Any fatal error
//! surfaces as `Err(PipelineError)` and the job is observably not
//! `Completed`; per-group extraction failures do not stop the job and are
//! carried inside the affected records instead.
//!
//! ## Idempotency contract
//!
//! The attachment id is the idempotency key. Artifact names derive only from
//! the source stem and the extracted (or ordinal) invoice identity, and the
//! object store has overwrite semantics, so redelivering a job rewrites the
//! same keys rather than duplicating output. Hand-offs get exactly one
//! bounded attempt each; redelivery policy belongs to the queue in front of
//! this crate.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::handoff::{AttachmentFetcher, ObjectStore, RecordSink};
use crate::model::{ExtractionStatus, InvoiceRecord, Page, SourceDocument};
use crate::output::{ArtifactSummary, JobReport, JobState, JobStats, OutputArtifact};
use crate::pipeline::{classify, encode, extract, group, integrity, render, split};
use crate::vision::{LlmVisionModel, VisionModel};
use edgequake_llm::ProviderFactory;

static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_-]+").expect("static pattern compiles"));

/// Run one job from an attachment id: fetch, then process.
///
/// This is the entry point queue workers use. The fetched filename's stem
/// seeds the deterministic artifact names.
pub async fn run_job(
    fetcher: &dyn AttachmentFetcher,
    store: &dyn ObjectStore,
    sink: &dyn RecordSink,
    attachment_id: i64,
    config: &PipelineConfig,
) -> Result<JobReport, PipelineError> {
    let fetched = fetcher
        .fetch(attachment_id)
        .await
        .map_err(|e| PipelineError::Fetch {
            attachment_id,
            detail: e.to_string(),
        })?;

    let stem = fetched
        .filename
        .strip_suffix(".pdf")
        .or_else(|| fetched.filename.strip_suffix(".PDF"))
        .unwrap_or(&fetched.filename)
        .to_string();

    process_document(attachment_id, &stem, fetched.bytes, store, sink, config).await
}

/// Process one document's bytes end to end.
///
/// Validates (or repairs) the input, rasterises and encodes every page, then
/// hands over to [`process_pages`]. Unrepairable input short-circuits to the
/// error partition without a single vision call.
pub async fn process_document(
    attachment_id: i64,
    stem: &str,
    bytes: Vec<u8>,
    store: &dyn ObjectStore,
    sink: &dyn RecordSink,
    config: &PipelineConfig,
) -> Result<JobReport, PipelineError> {
    let total_start = Instant::now();
    info!(attachment_id, stem, state = %JobState::Received, "job received");

    // ── Validate ─────────────────────────────────────────────────────────
    config.cancel.check("validate")?;
    let doc = integrity::validate(attachment_id, stem, bytes).await?;

    if !doc.is_processable() {
        return quarantine(doc, store, total_start).await;
    }
    info!(
        attachment_id,
        validity = ?doc.validity,
        pages = doc.page_count,
        state = %JobState::Validated,
        "document validated"
    );

    // ── Render & encode ──────────────────────────────────────────────────
    config.cancel.check("render")?;
    let render_start = Instant::now();
    let images = render::render_pages(doc.bytes.clone(), config.max_rendered_pixels).await?;
    let pages = encode::encode_pages(&images, config.jpeg_quality)?;
    let render_duration_ms = render_start.elapsed().as_millis() as u64;
    debug!(attachment_id, pages = pages.len(), render_duration_ms, "pages rendered");

    let mut report = process_pages(&doc, pages, store, sink, config).await?;
    report.stats.render_duration_ms = render_duration_ms;
    report.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
    Ok(report)
}

/// Process an already-rendered document: classify, group, extract, split,
/// write.
///
/// Split out from [`process_document`] so callers with their own rendering
/// (and tests) can enter the pipeline after rasterisation. `doc.bytes` must
/// still hold the validated PDF; splitting operates on them, never on the
/// page images.
pub async fn process_pages(
    doc: &SourceDocument,
    pages: Vec<Page>,
    store: &dyn ObjectStore,
    sink: &dyn RecordSink,
    config: &PipelineConfig,
) -> Result<JobReport, PipelineError> {
    let total_start = Instant::now();
    let attachment_id = doc.attachment_id;
    let total_pages = pages.len();

    let model = resolve_model(config)?;

    // ── Classify & group ─────────────────────────────────────────────────
    config.cancel.check("classify")?;
    let classify_start = Instant::now();
    let signals = classify::classify_pages(&model, &pages, total_pages, config).await?;
    let classify_duration_ms = classify_start.elapsed().as_millis() as u64;

    let groups = group::group_pages(&signals, total_pages)?;
    info!(
        attachment_id,
        invoices = groups.len(),
        state = %JobState::Segmented,
        "document segmented"
    );

    // ── Extract ──────────────────────────────────────────────────────────
    config.cancel.check("extract")?;
    let extract_start = Instant::now();
    let results = extract::extract_groups(&model, &groups, &pages, config).await;
    let extract_duration_ms = extract_start.elapsed().as_millis() as u64;
    let failed_groups = results.iter().filter(|r| r.error.is_some()).count();
    info!(
        attachment_id,
        failed_groups,
        state = %JobState::Extracted,
        "fields extracted"
    );

    // ── Split & write ────────────────────────────────────────────────────
    config.cancel.check("write")?;
    let write_start = Instant::now();
    let pdfs = split::split_groups(doc.bytes.clone(), groups).await?;

    let artifacts = assemble_artifacts(doc, &results, pdfs);
    let mut summaries = Vec::with_capacity(artifacts.len());
    for artifact in &artifacts {
        write_artifact(attachment_id, artifact, store, sink).await?;
        summaries.push(ArtifactSummary {
            name: artifact.name.clone(),
            pages: artifact.record.pages.clone(),
            status: artifact.record.status,
        });
    }
    let write_duration_ms = write_start.elapsed().as_millis() as u64;
    info!(attachment_id, artifacts = summaries.len(), state = %JobState::Written, "artifacts written");

    let stats = JobStats {
        total_pages,
        invoice_count: results.len(),
        failed_groups,
        total_input_tokens: results.iter().map(|r| r.input_tokens).sum(),
        total_output_tokens: results.iter().map(|r| r.output_tokens).sum(),
        render_duration_ms: 0,
        classify_duration_ms,
        extract_duration_ms,
        write_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(attachment_id, state = %JobState::Completed, "job completed");
    Ok(JobReport {
        attachment_id,
        state: JobState::Completed,
        validity: doc.validity,
        artifacts: summaries,
        stats,
    })
}

/// Route an unrepairable document to the error partition.
///
/// The original bytes are preserved verbatim for manual inspection and the
/// job terminates in `Unprocessable` without any vision call having been
/// made.
async fn quarantine(
    doc: SourceDocument,
    store: &dyn ObjectStore,
    total_start: Instant,
) -> Result<JobReport, PipelineError> {
    let key = format!("errors/{}/{}.pdf", doc.attachment_id, sanitize(&doc.stem));
    warn!(
        attachment_id = doc.attachment_id,
        key,
        state = %JobState::Unprocessable,
        "unrepairable document quarantined"
    );
    store
        .put(&key, &doc.bytes, "application/pdf")
        .await
        .map_err(|e| PipelineError::Handoff {
            name: key.clone(),
            detail: e.to_string(),
        })?;

    Ok(JobReport {
        attachment_id: doc.attachment_id,
        state: JobState::Unprocessable,
        validity: doc.validity,
        artifacts: Vec::new(),
        stats: JobStats {
            total_duration_ms: total_start.elapsed().as_millis() as u64,
            ..JobStats::default()
        },
    })
}

/// Pair each extraction result with its split PDF under a deterministic,
/// collision-free name.
fn assemble_artifacts(
    doc: &SourceDocument,
    results: &[extract::GroupResult],
    pdfs: Vec<Vec<u8>>,
) -> Vec<OutputArtifact> {
    let mut used = HashSet::new();
    results
        .iter()
        .zip(pdfs)
        .map(|(result, pdf_bytes)| {
            let mut name = artifact_name(
                &doc.stem,
                result.invoice.invoice_number.as_deref(),
                result.ordinal,
            );
            // Two invoices sharing a number still get distinct artifacts.
            if !used.insert(name.clone()) {
                name = format!("{name}_{}", result.ordinal);
                used.insert(name.clone());
            }
            let status = if result.error.is_none() {
                ExtractionStatus::Extracted
            } else {
                ExtractionStatus::ExtractionFailed
            };
            OutputArtifact {
                name,
                pdf_bytes,
                record: InvoiceRecord {
                    attachment_id: doc.attachment_id,
                    status,
                    pages: result.group.page_numbers(),
                    invoice: result.invoice.clone(),
                    error: result.error.clone(),
                },
            }
        })
        .collect()
}

/// Write one artifact pair and create its record.
async fn write_artifact(
    attachment_id: i64,
    artifact: &OutputArtifact,
    store: &dyn ObjectStore,
    sink: &dyn RecordSink,
) -> Result<(), PipelineError> {
    let handoff_err = |detail: String| PipelineError::Handoff {
        name: artifact.name.clone(),
        detail,
    };

    let pdf_key = format!("{attachment_id}/{}.pdf", artifact.name);
    let json_key = format!("{attachment_id}/{}.json", artifact.name);

    store
        .put(&pdf_key, &artifact.pdf_bytes, "application/pdf")
        .await
        .map_err(|e| handoff_err(e.to_string()))?;

    let json = serde_json::to_vec_pretty(&artifact.record)
        .map_err(|e| handoff_err(format!("record serialisation failed: {e}")))?;
    store
        .put(&json_key, &json, "application/json")
        .await
        .map_err(|e| handoff_err(e.to_string()))?;

    sink.create(&artifact.record, &pdf_key, &json_key)
        .await
        .map_err(|e| handoff_err(e.to_string()))?;

    debug!(pdf_key, json_key, "artifact written");
    Ok(())
}

/// `{stem}_invoice_{identity}` where identity is the sanitised extracted
/// invoice number, or the 1-based ordinal when extraction gave none.
fn artifact_name(stem: &str, invoice_number: Option<&str>, ordinal: usize) -> String {
    let identity = invoice_number
        .map(sanitize)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| ordinal.to_string());
    format!("{}_invoice_{identity}", sanitize(stem))
}

/// Collapse every run of filesystem/S3-hostile characters to an underscore.
fn sanitize(raw: &str) -> String {
    UNSAFE_CHARS.replace_all(raw.trim(), "_").into_owned()
}

/// Resolve the vision model, from most-specific to least-specific.
///
/// 1. **Pre-built model** (`config.vision`) — used as-is; the injection
///    point for tests and custom middleware.
/// 2. **Pre-built provider** (`config.provider`) — wrapped in
///    [`LlmVisionModel`].
/// 3. **Named provider** (`config.provider_name`) — instantiated through
///    [`ProviderFactory::create_llm_provider`], which reads the matching API
///    key from the environment.
/// 4. **`OPENAI_API_KEY`** — users with several provider keys default to
///    OpenAI unless they name another provider.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`) — scans all
///    known key variables and picks the first available provider.
fn resolve_model(config: &PipelineConfig) -> Result<Arc<dyn VisionModel>, PipelineError> {
    if let Some(ref vision) = config.vision {
        return Ok(Arc::clone(vision));
    }

    if let Some(ref provider) = config.provider {
        return Ok(Arc::new(LlmVisionModel::new(Arc::clone(provider))));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or("gpt-4o");
        let provider = ProviderFactory::create_llm_provider(name, model).map_err(|e| {
            PipelineError::ProviderNotConfigured {
                provider: name.clone(),
                hint: e.to_string(),
            }
        })?;
        return Ok(Arc::new(LlmVisionModel::new(provider)));
    }

    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        if !key.is_empty() {
            let model = config.model.as_deref().unwrap_or("gpt-4o");
            let provider = ProviderFactory::create_llm_provider("openai", model).map_err(|e| {
                PipelineError::ProviderNotConfigured {
                    provider: "openai".into(),
                    hint: e.to_string(),
                }
            })?;
            return Ok(Arc::new(LlmVisionModel::new(provider)));
        }
    }

    let (provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| PipelineError::ProviderNotConfigured {
            provider: "auto".into(),
            hint: format!(
                "No vision provider could be auto-detected from the environment.\n\
                 Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                 Error: {e}"
            ),
        })?;
    Ok(Arc::new(LlmVisionModel::new(provider)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_collapses_hostile_characters() {
        assert_eq!(sanitize("INV/2024 #17"), "INV_2024_17");
        assert_eq!(sanitize("  scan-01.v2  "), "scan-01_v2");
        assert_eq!(sanitize("***"), "_");
    }

    #[test]
    fn artifact_name_prefers_the_invoice_number() {
        assert_eq!(
            artifact_name("scan", Some("INV-42"), 1),
            "scan_invoice_INV-42"
        );
    }

    #[test]
    fn artifact_name_falls_back_to_the_ordinal() {
        assert_eq!(artifact_name("scan", None, 3), "scan_invoice_3");
        // A number that sanitises to nothing is as good as no number.
        assert_eq!(artifact_name("scan", Some("   "), 2), "scan_invoice_2");
    }
}
