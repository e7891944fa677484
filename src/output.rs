//! Job-level result types: artifacts, state machine, stats, report.

use serde::{Deserialize, Serialize};

use crate::model::{ExtractionStatus, InvoiceRecord, Validity};

/// One split PDF plus its structured record, ready for hand-off.
///
/// The derived name is deterministic for a given source document and model
/// output: `{source_stem}_invoice_{sanitized_invoice_number_or_ordinal}`.
/// Determinism is what makes at-least-once redelivery safe — a re-run
/// overwrites the same keys instead of duplicating artifacts.
#[derive(Debug, Clone)]
pub struct OutputArtifact {
    /// Artifact name without extension; `.pdf`/`.json` are appended per blob.
    pub name: String,
    pub pdf_bytes: Vec<u8>,
    pub record: InvoiceRecord,
}

/// Compact per-artifact summary carried in the [`JobReport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub name: String,
    /// 1-indexed source page numbers.
    pub pages: Vec<usize>,
    pub status: ExtractionStatus,
}

/// Externally visible job lifecycle.
///
/// A state only advances after its stage fully completes, so an interrupted
/// job can never be observed as `Completed` with partial output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Received,
    Validated,
    Segmented,
    Extracted,
    Written,
    Completed,
    /// Distinguished terminal for unrepairable input: an expected,
    /// user-visible outcome, not a system defect. The original file is
    /// preserved under the error partition.
    Unprocessable,
    Failed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Received => "received",
            JobState::Validated => "validated",
            JobState::Segmented => "segmented",
            JobState::Extracted => "extracted",
            JobState::Written => "written",
            JobState::Completed => "completed",
            JobState::Unprocessable => "unprocessable",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Counters and timings for one job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStats {
    pub total_pages: usize,
    pub invoice_count: usize,
    /// Groups whose extraction exhausted its retries.
    pub failed_groups: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub render_duration_ms: u64,
    pub classify_duration_ms: u64,
    pub extract_duration_ms: u64,
    pub write_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// The terminal result of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub attachment_id: i64,
    pub state: JobState,
    pub validity: Validity,
    pub artifacts: Vec<ArtifactSummary>,
    pub stats: JobStats,
}

impl JobReport {
    pub fn is_completed(&self) -> bool {
        self.state == JobState::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_state_serialises_snake_case() {
        let json = serde_json::to_string(&JobState::Unprocessable).unwrap();
        assert_eq!(json, r#""unprocessable""#);
    }

    #[test]
    fn job_state_display() {
        assert_eq!(JobState::Segmented.to_string(), "segmented");
        assert_eq!(JobState::Completed.to_string(), "completed");
    }
}
