//! Structured extraction: one vision call per invoice group.
//!
//! All of a group's page images travel in a single request so line items
//! split across pages are captured in one pass. Groups are independent, so
//! extraction runs concurrently through `buffer_unordered`, capped by the
//! same concurrency knob as classification.
//!
//! ## Failure isolation
//!
//! This stage never returns `Err` for a bad group. A group whose call
//! exhausts its retries comes back as a [`GroupResult`] carrying a
//! [`GroupError`] and empty fields; its siblings are unaffected and the
//! orchestrator still writes the group's split PDF. Contrast with
//! classification, where one unclassifiable page poisons the whole
//! segmentation.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::error::GroupError;
use crate::model::{ExtractedInvoice, InvoiceGroup, Page};
use crate::prompts::extraction_prompt;
use crate::vision::{extract_json_payload, VisionModel, VisionRequest};

/// Outcome of extracting one invoice group, successful or not.
#[derive(Debug, Clone)]
pub struct GroupResult {
    /// 1-based position of the group within the document.
    pub ordinal: usize,
    pub group: InvoiceGroup,
    /// Extracted fields; default-empty when `error` is set.
    pub invoice: ExtractedInvoice,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
    pub retries: u32,
    pub error: Option<GroupError>,
}

/// Extract structured fields for every group concurrently.
///
/// Results come back sorted by ordinal. Always returns one result per
/// group; check [`GroupResult::error`] for per-group failures.
pub async fn extract_groups(
    model: &Arc<dyn VisionModel>,
    groups: &[InvoiceGroup],
    pages: &[Page],
    config: &PipelineConfig,
) -> Vec<GroupResult> {
    let total_pages = pages.len();
    let mut results: Vec<GroupResult> = stream::iter(groups.iter().enumerate().map(
        |(i, group)| {
            let model = Arc::clone(model);
            let group = group.clone();
            let images: Vec<_> = group
                .pages
                .iter()
                .map(|&idx| pages[idx].image.clone())
                .collect();
            let config = config.clone();
            async move {
                extract_group(&model, i + 1, group, images, total_pages, &config).await
            }
        },
    ))
    .buffer_unordered(config.concurrency)
    .collect()
    .await;

    results.sort_by_key(|r| r.ordinal);
    results
}

/// Extract one group with retry and per-call timeout.
async fn extract_group(
    model: &Arc<dyn VisionModel>,
    ordinal: usize,
    group: InvoiceGroup,
    images: Vec<edgequake_llm::ImageData>,
    total_pages: usize,
    config: &PipelineConfig,
) -> GroupResult {
    let start = Instant::now();
    let request = VisionRequest {
        prompt: extraction_prompt(&group.page_numbers(), total_pages),
        images,
        max_tokens: config.extract_max_tokens,
        temperature: config.temperature,
    };

    let mut last_err = String::new();

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = config.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                invoice = ordinal,
                attempt,
                max = config.max_retries,
                backoff_ms = backoff,
                "retrying extraction"
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        let reply = match timeout(
            Duration::from_secs(config.api_timeout_secs),
            model.complete(request.clone()),
        )
        .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                last_err = e.to_string();
                continue;
            }
            Err(_) => {
                last_err = format!("timed out after {}s", config.api_timeout_secs);
                continue;
            }
        };

        match serde_json::from_str::<ExtractedInvoice>(extract_json_payload(&reply.content)) {
            Ok(invoice) => {
                debug!(
                    invoice = ordinal,
                    pages = ?group.page_numbers(),
                    number = invoice.invoice_number.as_deref().unwrap_or("<none>"),
                    input_tokens = reply.input_tokens,
                    output_tokens = reply.output_tokens,
                    "invoice extracted"
                );
                return GroupResult {
                    ordinal,
                    group,
                    invoice,
                    input_tokens: reply.input_tokens,
                    output_tokens: reply.output_tokens,
                    duration_ms: start.elapsed().as_millis() as u64,
                    retries: attempt,
                    error: None,
                };
            }
            Err(e) => {
                last_err = format!("unparseable extraction reply: {e}");
            }
        }
    }

    warn!(invoice = ordinal, detail = %last_err, "extraction failed for group");
    GroupResult {
        ordinal,
        group,
        invoice: ExtractedInvoice::default(),
        input_tokens: 0,
        output_tokens: 0,
        duration_ms: start.elapsed().as_millis() as u64,
        retries: config.max_retries,
        error: Some(GroupError::ExtractionFailed {
            ordinal,
            retries: config.max_retries,
            detail: last_err,
        }),
    }
}
