//! Boundary classification: one vision call per page.
//!
//! Each page is asked, independently, whether it starts a new invoice. Calls
//! for different pages share no state, so they run concurrently through
//! `buffer_unordered` and the results are re-sorted by page index afterwards.
//!
//! ## Retry strategy
//!
//! HTTP 429 / 503 errors from vision APIs are transient and frequent under
//! concurrent load. Exponential backoff (`retry_backoff_ms * 2^attempt`)
//! avoids thundering-herd: with 500 ms base and 3 retries the wait sequence
//! is 500 ms → 1 s → 2 s. A reply that fails to parse into the expected JSON
//! shape burns a retry the same way a transport error does; from here they
//! are indistinguishable flavours of "no usable signal".
//!
//! Unlike extraction, an exhausted page here is fatal: grouping needs a
//! signal for every page or the resulting partition is meaningless.

use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::model::{BoundarySignal, Page};
use crate::prompts::boundary_prompt;
use crate::vision::{extract_json_payload, VisionModel, VisionRequest};

/// Wire shape of the boundary reply. `is_continuation` and `reasoning` are
/// accepted but only logged; the grouper keys off `is_invoice_start` alone.
#[derive(Debug, Deserialize)]
struct BoundaryResponse {
    is_invoice_start: bool,
    #[serde(default)]
    is_continuation: bool,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    reasoning: String,
}

/// Classify every page, returning signals sorted by page index.
///
/// Page 0 is forced to `is_invoice_start = true` regardless of what the
/// model said: the first page of a document necessarily opens its first
/// invoice, and anchoring it keeps the grouper total.
pub async fn classify_pages(
    model: &Arc<dyn VisionModel>,
    pages: &[Page],
    total_pages: usize,
    config: &PipelineConfig,
) -> Result<Vec<BoundarySignal>, PipelineError> {
    let results: Vec<Result<BoundarySignal, PipelineError>> =
        stream::iter(pages.iter().map(|page| {
            let model = Arc::clone(model);
            let page = page.clone();
            let config = config.clone();
            async move { classify_page(&model, &page, total_pages, &config).await }
        }))
        .buffer_unordered(config.concurrency)
        .collect()
        .await;

    let mut signals = results
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;
    signals.sort_by_key(|s| s.page_index);

    let starts = signals.iter().filter(|s| s.is_invoice_start).count();
    info!(total_pages, starts, "boundary classification complete");
    Ok(signals)
}

/// Classify a single page with retry and per-call timeout.
async fn classify_page(
    model: &Arc<dyn VisionModel>,
    page: &Page,
    total_pages: usize,
    config: &PipelineConfig,
) -> Result<BoundarySignal, PipelineError> {
    let page_num = page.index + 1;
    let request = VisionRequest {
        prompt: boundary_prompt(page_num, total_pages),
        images: vec![page.image.clone()],
        max_tokens: config.classify_max_tokens,
        temperature: config.temperature,
    };

    let mut last_err = String::new();

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = config.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                page = page_num,
                attempt,
                max = config.max_retries,
                backoff_ms = backoff,
                "retrying boundary classification"
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

        match serde_json::from_str::<BoundaryResponse>(extract_json_payload(&reply.content)) {
            Ok(parsed) => {
                // The first page of a document opens its first invoice no
                // matter what the model thinks.
                let is_start = page.index == 0 || parsed.is_invoice_start;
                if page.index == 0 && !parsed.is_invoice_start {
                    debug!(page = page_num, "forcing invoice start on first page");
                }
                debug!(
                    page = page_num,
                    is_start,
                    continuation = parsed.is_continuation,
                    confidence = parsed.confidence,
                    reasoning = %parsed.reasoning,
                    input_tokens = reply.input_tokens,
                    output_tokens = reply.output_tokens,
                    "page classified"
                );
                return Ok(BoundarySignal {
                    page_index: page.index,
                    is_invoice_start: is_start,
                    confidence: parsed.confidence.clamp(0.0, 1.0),
                    raw_response: reply.content,
                });
            }
            Err(e) => {
                last_err = format!("unparseable boundary reply: {e}");
            }
        }
    }

    Err(PipelineError::Classification {
        page: page_num,
        retries: config.max_retries,
        detail: last_err,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::{VisionError, VisionReply};
    use async_trait::async_trait;
    use edgequake_llm::ImageData;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn page(index: usize) -> Page {
        Page {
            index,
            image: ImageData::new("aGk=".to_string(), "image/jpeg"),
        }
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig::builder()
            .max_retries(1)
            .retry_backoff_ms(1)
            .build()
            .unwrap()
    }

    /// Replies with a fixed JSON body per page, keyed off "page N of M" in
    /// the prompt.
    struct ScriptedBoundaries {
        replies: Vec<&'static str>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl VisionModel for ScriptedBoundaries {
        async fn complete(&self, request: VisionRequest) -> Result<VisionReply, VisionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let page_num = self
                .replies
                .iter()
                .enumerate()
                .find(|(i, _)| request.prompt.contains(&format!("page {} of", i + 1)))
                .map(|(i, _)| i)
                .ok_or_else(|| VisionError("no scripted reply for prompt".into()))?;
            Ok(VisionReply {
                content: self.replies[page_num].to_string(),
                input_tokens: 10,
                output_tokens: 5,
            })
        }
    }

    #[tokio::test]
    async fn signals_come_back_in_page_order() {
        let model: Arc<dyn VisionModel> = Arc::new(ScriptedBoundaries {
            replies: vec![
                r#"{"is_invoice_start": true, "is_continuation": false, "confidence": 0.9, "reasoning": "header"}"#,
                r#"{"is_invoice_start": false, "is_continuation": true, "confidence": 0.8, "reasoning": "table rows"}"#,
                r#"{"is_invoice_start": true, "is_continuation": false, "confidence": 0.95, "reasoning": "new header"}"#,
            ],
            calls: AtomicUsize::new(0),
        });
        let pages: Vec<Page> = (0..3).map(page).collect();
        let signals = classify_pages(&model, &pages, 3, &fast_config()).await.unwrap();

        let starts: Vec<bool> = signals.iter().map(|s| s.is_invoice_start).collect();
        assert_eq!(starts, vec![true, false, true]);
        assert_eq!(signals[1].page_index, 1);
    }

    #[tokio::test]
    async fn first_page_is_forced_to_start() {
        let model: Arc<dyn VisionModel> = Arc::new(ScriptedBoundaries {
            replies: vec![
                r#"{"is_invoice_start": false, "is_continuation": true, "confidence": 0.4, "reasoning": "unsure"}"#,
            ],
            calls: AtomicUsize::new(0),
        });
        let signals = classify_pages(&model, &[page(0)], 1, &fast_config()).await.unwrap();
        assert!(signals[0].is_invoice_start);
    }

    #[tokio::test]
    async fn fenced_json_is_accepted() {
        let model: Arc<dyn VisionModel> = Arc::new(ScriptedBoundaries {
            replies: vec![
                "```json\n{\"is_invoice_start\": true, \"confidence\": 1.0}\n```",
            ],
            calls: AtomicUsize::new(0),
        });
        let signals = classify_pages(&model, &[page(0)], 1, &fast_config()).await.unwrap();
        assert!(signals[0].is_invoice_start);
    }

    /// Fails `failures` times, then returns a valid reply.
    struct FlakyModel {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl VisionModel for FlakyModel {
        async fn complete(&self, _request: VisionRequest) -> Result<VisionReply, VisionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(VisionError("HTTP 503".into()))
            } else {
                Ok(VisionReply {
                    content: r#"{"is_invoice_start": true, "confidence": 0.9}"#.into(),
                    input_tokens: 1,
                    output_tokens: 1,
                })
            }
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let model: Arc<dyn VisionModel> = Arc::new(FlakyModel {
            failures: 1,
            calls: AtomicUsize::new(0),
        });
        let signals = classify_pages(&model, &[page(0)], 1, &fast_config()).await.unwrap();
        assert!(signals[0].is_invoice_start);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_job() {
        let model: Arc<dyn VisionModel> = Arc::new(FlakyModel {
            failures: 99,
            calls: AtomicUsize::new(0),
        });
        let err = classify_pages(&model, &[page(0)], 1, &fast_config())
            .await
            .unwrap_err();
        match err {
            PipelineError::Classification { page, retries, .. } => {
                assert_eq!(page, 1);
                assert_eq!(retries, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
