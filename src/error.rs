//! Error types for the invoice-split library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PipelineError`] — **Fatal**: the job cannot complete (rasterisation
//!   failure, classification retries exhausted, hand-off rejected). Returned
//!   as `Err(PipelineError)` from the orchestrator entry points.
//!
//! * [`GroupError`] — **Non-fatal**: extraction failed for a single invoice
//!   group but its siblings are fine. Stored inside the group's
//!   [`crate::model::InvoiceRecord`] so the split PDF is still written and
//!   the failure travels with the record instead of discarding the batch.
//!
//! An unrepairable input PDF is deliberately *not* an error: it is an
//! expected, user-visible outcome represented by
//! [`crate::model::Validity::Unrepairable`] and routed to the error
//! partition by the orchestrator.

use thiserror::Error;

/// All fatal errors returned by the invoice-split library.
///
/// Group-level extraction failures use [`GroupError`] and are stored in the
/// group's record rather than propagated here.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Job source errors ─────────────────────────────────────────────────
    /// The attachment id could not be resolved to PDF bytes.
    #[error("attachment {attachment_id}: failed to fetch source document: {detail}")]
    Fetch { attachment_id: i64, detail: String },

    // ── Rasterisation errors ──────────────────────────────────────────────
    /// A page could not be rendered. Fatal for the whole job: a partially
    /// rendered document signals corruption the integrity guard missed.
    #[error("rasterisation failed for page {page}: {detail}")]
    Render { page: usize, detail: String },

    // ── Vision API errors ─────────────────────────────────────────────────
    /// Boundary classification for a page failed after every retry. An
    /// unclassified page breaks the segmentation invariant, so the job fails.
    #[error("page {page}: boundary classification failed after {retries} retries: {detail}")]
    Classification {
        page: usize,
        retries: u32,
        detail: String,
    },

    /// The configured vision provider could not be initialised
    /// (missing API key etc.).
    #[error("vision provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Segmentation errors ───────────────────────────────────────────────
    /// The grouper produced groups that do not partition the page range.
    /// Internal defect, never expected; file a bug if observed.
    #[error("invoice grouping violated the page partition: {detail}")]
    Invariant { detail: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// The source PDF could not be split at the group's page boundaries.
    #[error("failed to split source PDF for '{name}': {detail}")]
    Split { name: String, detail: String },

    /// A storage put or record-creation call failed. One bounded attempt is
    /// made per hand-off; the caller decides whether to redeliver the job.
    #[error("hand-off failed for '{name}': {detail}")]
    Handoff { name: String, detail: String },

    // ── Lifecycle errors ──────────────────────────────────────────────────
    /// The cancellation hook fired between stages; the job never reaches
    /// `Completed` and no artifact is claimed as written.
    #[error("job cancelled before the {stage} stage")]
    Cancelled { stage: &'static str },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single invoice group.
///
/// Stored in [`crate::model::InvoiceRecord::error`] when extraction fails.
/// The group's PDF artifact is still split and written; only the structured
/// fields are missing.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum GroupError {
    /// The extraction call failed after all retries.
    #[error("invoice {ordinal}: extraction failed after {retries} retries: {detail}")]
    ExtractionFailed {
        ordinal: usize,
        retries: u32,
        detail: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_display() {
        let e = PipelineError::Classification {
            page: 4,
            retries: 3,
            detail: "HTTP 503".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("page 4"), "got: {msg}");
        assert!(msg.contains("3 retries"), "got: {msg}");
    }

    #[test]
    fn invariant_display_names_the_partition() {
        let e = PipelineError::Invariant {
            detail: "gap before page 2".into(),
        };
        assert!(e.to_string().contains("partition"));
    }

    #[test]
    fn cancelled_display() {
        let e = PipelineError::Cancelled { stage: "extract" };
        assert!(e.to_string().contains("extract"));
    }

    #[test]
    fn group_error_roundtrips_through_serde() {
        let e = GroupError::ExtractionFailed {
            ordinal: 2,
            retries: 3,
            detail: "timeout".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        let back: GroupError = serde_json::from_str(&json).unwrap();
        assert!(back.to_string().contains("invoice 2"));
    }
}
