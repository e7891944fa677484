//! Configuration for the segmentation and extraction pipeline.
//!
//! All behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share configs across jobs, serialise them for logging, and
//! diff two runs to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A fifteen-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! documented defaults for the rest.

use crate::error::PipelineError;
use crate::vision::VisionModel;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation hook.
///
/// The job runner (queue worker, CLI) owns shutdown state; the core only
/// polls this flag between stages. Cloning is cheap and all clones observe
/// the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. The current stage is allowed to finish; the
    /// orchestrator stops before starting the next one.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Error out of the pipeline if cancellation was requested.
    pub(crate) fn check(&self, stage: &'static str) -> Result<(), PipelineError> {
        if self.is_cancelled() {
            Err(PipelineError::Cancelled { stage })
        } else {
            Ok(())
        }
    }
}

/// Configuration for one pipeline run.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use invoice_split::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .concurrency(4)
///     .model("gpt-4o")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    ///
    /// A safety cap independent of page size: an A3 scan at high density
    /// could produce an image that exhausts memory and blows past API upload
    /// limits. Either dimension is capped, scaling the other proportionally.
    pub max_rendered_pixels: u32,

    /// JPEG quality for encoded page images, 1–100. Default: 85.
    ///
    /// Scanned invoices are photographic content, where JPEG at quality 85
    /// is visually lossless to a vision model at a fraction of the PNG size.
    pub jpeg_quality: u8,

    /// Number of concurrent vision API calls (classification and
    /// extraction). Default: 4.
    ///
    /// Boundary calls for different pages are independent, as are extraction
    /// calls for different groups; only the index labeling of results
    /// matters. Lower this if the provider rate-limits, raise it to trade
    /// API cost for wall-clock time.
    pub concurrency: usize,

    /// Vision model identifier, e.g. "gpt-4o". If None, uses provider default.
    pub model: Option<String>,

    /// Provider name (e.g. "openai", "anthropic"). If None along with
    /// `provider`, the provider is auto-detected from the environment.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed vision model. Takes precedence over everything else;
    /// primarily an injection point for tests and custom middleware.
    pub vision: Option<Arc<dyn VisionModel>>,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Near-zero keeps the model faithful to what is on the page, which is
    /// exactly what boundary detection and field extraction want.
    pub temperature: f32,

    /// Max tokens for a boundary classification response. Default: 500.
    ///
    /// The response is a small fixed-shape JSON object; 500 leaves room for
    /// the reasoning string without paying for unused budget on every page.
    pub classify_max_tokens: usize,

    /// Max tokens for an extraction response. Default: 2500.
    ///
    /// Line-item tables can run long on multi-page invoices; truncating the
    /// JSON mid-array turns a good extraction into a schema failure.
    pub extract_max_tokens: usize,

    /// Maximum retry attempts per vision call. Default: 3.
    ///
    /// Most 5xx and timeout errors are transient. Schema-mismatched
    /// responses are also retried: a malformed JSON reply is
    /// indistinguishable from a flaky one.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    ///
    /// Doubles after each attempt: 500 ms → 1 s → 2 s. Exponential backoff
    /// avoids a thundering herd when several concurrent page calls retry at
    /// once against a recovering endpoint.
    pub retry_backoff_ms: u64,

    /// Per-vision-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Cancellation hook polled between stages. Default: never cancelled.
    pub cancel: CancelToken,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_rendered_pixels: 2000,
            jpeg_quality: 85,
            concurrency: 4,
            model: None,
            provider_name: None,
            provider: None,
            vision: None,
            temperature: 0.1,
            classify_max_tokens: 500,
            extract_max_tokens: 2500,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            cancel: CancelToken::new(),
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("vision", &self.vision.as_ref().map(|_| "<dyn VisionModel>"))
            .field("temperature", &self.temperature)
            .field("classify_max_tokens", &self.classify_max_tokens)
            .field("extract_max_tokens", &self.extract_max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn vision(mut self, model: Arc<dyn VisionModel>) -> Self {
        self.config.vision = Some(model);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn classify_max_tokens(mut self, n: usize) -> Self {
        self.config.classify_max_tokens = n;
        self
    }

    pub fn extract_max_tokens(mut self, n: usize) -> Self {
        self.config.extract_max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn cancel(mut self, token: CancelToken) -> Self {
        self.config.cancel = token;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(PipelineError::InvalidConfig(
                "concurrency must be ≥ 1".into(),
            ));
        }
        if c.jpeg_quality == 0 || c.jpeg_quality > 100 {
            return Err(PipelineError::InvalidConfig(format!(
                "jpeg_quality must be 1–100, got {}",
                c.jpeg_quality
            )));
        }
        if c.extract_max_tokens < c.classify_max_tokens {
            return Err(PipelineError::InvalidConfig(
                "extract_max_tokens must be ≥ classify_max_tokens".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = PipelineConfig::default();
        assert_eq!(c.jpeg_quality, 85);
        assert_eq!(c.concurrency, 4);
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.retry_backoff_ms, 500);
    }

    #[test]
    fn builder_clamps_out_of_range_values() {
        let c = PipelineConfig::builder()
            .jpeg_quality(250)
            .concurrency(0)
            .temperature(9.0)
            .build()
            .unwrap();
        assert_eq!(c.jpeg_quality, 100);
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn build_rejects_inverted_token_budgets() {
        let err = PipelineConfig::builder()
            .classify_max_tokens(4000)
            .extract_max_tokens(100)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("extract_max_tokens"));
    }

    #[test]
    fn cancel_token_is_shared_across_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        assert!(clone.check("render").is_err());
    }
}
