//! The vision-model seam: one trait, one production implementation.
//!
//! The classifier and extractor only ever see [`VisionModel`], so tests can
//! script responses and callers can wrap a provider with caching or
//! rate-limiting middleware. The production implementation,
//! [`LlmVisionModel`], drives any `edgequake-llm` provider (OpenAI,
//! Anthropic, Gemini, Ollama, Azure).
//!
//! The response shape of the service is not statically guaranteed, so raw
//! replies pass through [`extract_json_payload`] before deserialisation into
//! the strict schema types; a mismatch is treated as a retryable failure by
//! the calling stage, never propagated as untyped data.

use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// A single vision call failed. Uniformly retryable up to the budget of the
/// calling stage; the distinction fatal/transient is made by exhaustion, not
/// by error kind.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct VisionError(pub String);

/// One task for the vision service: a prompt plus one or more page images.
#[derive(Clone)]
pub struct VisionRequest {
    pub prompt: String,
    pub images: Vec<ImageData>,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl std::fmt::Debug for VisionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionRequest")
            .field("prompt_len", &self.prompt.len())
            .field("images", &self.images.len())
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

/// The service's reply with token accounting for job stats.
#[derive(Debug, Clone)]
pub struct VisionReply {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Capability contract for the external classification/extraction service.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn complete(&self, request: VisionRequest) -> Result<VisionReply, VisionError>;
}

/// Production [`VisionModel`] backed by an `edgequake-llm` provider.
pub struct LlmVisionModel {
    provider: Arc<dyn LLMProvider>,
}

impl LlmVisionModel {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl VisionModel for LlmVisionModel {
    async fn complete(&self, request: VisionRequest) -> Result<VisionReply, VisionError> {
        let messages = vec![ChatMessage::user_with_images(
            request.prompt,
            request.images,
        )];

        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| VisionError(e.to_string()))?;

        debug!(
            input_tokens = response.prompt_tokens,
            output_tokens = response.completion_tokens,
            "vision call complete"
        );

        Ok(VisionReply {
            content: response.content,
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        })
    }
}

/// Strip the markdown code fences some models wrap JSON responses in.
///
/// Handles ```` ```json … ``` ````, bare ```` ``` … ``` ````, and fence-free
/// responses. Returns the trimmed payload; it is the caller's job to
/// deserialise and decide whether the payload actually parses.
pub fn extract_json_payload(raw: &str) -> &str {
    let trimmed = raw.trim();

    if let Some(rest) = trimmed.split_once("```json").map(|(_, r)| r) {
        if let Some((payload, _)) = rest.split_once("```") {
            return payload.trim();
        }
        return rest.trim();
    }

    if let Some(rest) = trimmed.split_once("```").map(|(_, r)| r) {
        if let Some((payload, _)) = rest.split_once("```") {
            return payload.trim();
        }
        return rest.trim();
    }

    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_without_fences_passes_through() {
        assert_eq!(extract_json_payload(r#"  {"a": 1} "#), r#"{"a": 1}"#);
    }

    #[test]
    fn payload_in_json_fence_is_unwrapped() {
        let raw = "```json\n{\"is_invoice_start\": true}\n```";
        assert_eq!(extract_json_payload(raw), r#"{"is_invoice_start": true}"#);
    }

    #[test]
    fn payload_in_bare_fence_is_unwrapped() {
        let raw = "Here you go:\n```\n{\"a\": 1}\n```\nanything after";
        assert_eq!(extract_json_payload(raw), r#"{"a": 1}"#);
    }

    #[test]
    fn unterminated_fence_still_yields_payload() {
        let raw = "```json\n{\"a\": 1}";
        assert_eq!(extract_json_payload(raw), r#"{"a": 1}"#);
    }
}
