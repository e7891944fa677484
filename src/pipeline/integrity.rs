//! Integrity guard: validate or repair the input PDF before any processing.
//!
//! The check mirrors what the rest of the pipeline needs to hold: the
//! document parses, it has at least one page, and the first page object
//! resolves. When the check fails, repair strategies are attempted in order
//! and each candidate is re-checked before being accepted:
//!
//! 1. **Truncate trailing garbage** — mail gateways and print spoolers are
//!    fond of appending junk after the final `%%EOF`, which hides the
//!    `startxref` pointer from parsers that scan backwards from the end.
//! 2. **Rewrite through lopdf** — re-serialising the object graph rebuilds
//!    the cross-reference table and trailer, recovering documents whose
//!    objects are intact but whose xref offsets are wrong.
//!
//! Repair failure is a normal, expected outcome, not an exceptional one: the
//! guard never raises for unrepairable input. It returns a document marked
//! [`Validity::Unrepairable`] carrying the original bytes, and the
//! orchestrator routes it to the error partition.

use lopdf::Document;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::model::{SourceDocument, Validity};

const EOF_MARKER: &[u8] = b"%%EOF";

/// Validate the input bytes, repairing if necessary.
///
/// Runs the lopdf work inside `spawn_blocking`; parsing a large object graph
/// is CPU-bound. Errors only on executor failure — corruption outcomes are
/// encoded in the returned document's [`Validity`].
pub async fn validate(
    attachment_id: i64,
    stem: &str,
    bytes: Vec<u8>,
) -> Result<SourceDocument, PipelineError> {
    let stem = stem.to_string();
    tokio::task::spawn_blocking(move || validate_blocking(attachment_id, stem, bytes))
        .await
        .map_err(|e| PipelineError::Internal(format!("validate task panicked: {e}")))
}

fn validate_blocking(attachment_id: i64, stem: String, bytes: Vec<u8>) -> SourceDocument {
    match check(&bytes) {
        Ok(page_count) => {
            debug!(attachment_id, page_count, "PDF passed integrity check");
            SourceDocument {
                attachment_id,
                stem,
                bytes,
                validity: Validity::Valid,
                page_count,
            }
        }
        Err(detail) => {
            warn!(attachment_id, %detail, "PDF failed integrity check, attempting repair");
            for (strategy, candidate) in repair_candidates(&bytes) {
                match check(&candidate) {
                    Ok(page_count) => {
                        info!(attachment_id, strategy, page_count, "PDF repaired");
                        return SourceDocument {
                            attachment_id,
                            stem,
                            bytes: candidate,
                            validity: Validity::Repaired,
                            page_count,
                        };
                    }
                    Err(detail) => {
                        debug!(attachment_id, strategy, %detail, "repair candidate rejected");
                    }
                }
            }
            warn!(attachment_id, "PDF is unrepairable");
            SourceDocument {
                attachment_id,
                stem,
                bytes,
                validity: Validity::Unrepairable,
                page_count: 0,
            }
        }
    }
}

/// Structural check: parses, has pages, first page object resolves.
fn check(bytes: &[u8]) -> Result<usize, String> {
    let doc = Document::load_mem(bytes).map_err(|e| e.to_string())?;
    let pages = doc.get_pages();
    if pages.is_empty() {
        return Err("PDF has no pages".into());
    }
    let (_, &first_id) = pages.iter().next().ok_or("PDF has no pages")?;
    doc.get_object(first_id)
        .map_err(|e| format!("first page unreadable: {e}"))?;
    Ok(pages.len())
}

/// Repair candidates in attempt order, each labeled for logging.
fn repair_candidates(bytes: &[u8]) -> Vec<(&'static str, Vec<u8>)> {
    let mut candidates = Vec::new();

    if let Some(truncated) = truncate_after_eof(bytes) {
        candidates.push(("truncate-after-eof", truncated.to_vec()));
    }

    // Rewrite from the truncated stream when available; its xref is the one
    // lopdf is most likely to recover from.
    let rewrite_source = truncate_after_eof(bytes).unwrap_or(bytes);
    if let Ok(rewritten) = rewrite(rewrite_source) {
        candidates.push(("rewrite-xref", rewritten));
    }

    candidates
}

/// Drop everything after the final `%%EOF` marker. Returns `None` when the
/// marker is absent or nothing follows it (no repair to offer).
fn truncate_after_eof(bytes: &[u8]) -> Option<&[u8]> {
    let pos = bytes
        .windows(EOF_MARKER.len())
        .rposition(|w| w == EOF_MARKER)?;
    let end = pos + EOF_MARKER.len();
    if end == bytes.len() {
        return None;
    }
    Some(&bytes[..end])
}

/// Re-serialise the document, rebuilding the xref table and trailer.
fn rewrite(bytes: &[u8]) -> Result<Vec<u8>, String> {
    let mut doc = Document::load_mem(bytes).map_err(|e| e.to_string())?;
    doc.prune_objects();
    doc.renumber_objects();
    let mut out = Vec::new();
    doc.save_to(&mut out).map_err(|e| e.to_string())?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_pdf::sample_pdf;

    #[tokio::test]
    async fn well_formed_pdf_is_valid() {
        let bytes = sample_pdf(3);
        let doc = validate(1, "scan", bytes).await.unwrap();
        assert_eq!(doc.validity, Validity::Valid);
        assert_eq!(doc.page_count, 3);
        assert!(doc.is_processable());
    }

    #[tokio::test]
    async fn garbage_bytes_are_unrepairable() {
        let doc = validate(2, "junk", b"this is not a pdf at all".to_vec())
            .await
            .unwrap();
        assert_eq!(doc.validity, Validity::Unrepairable);
        assert_eq!(doc.page_count, 0);
        assert!(!doc.is_processable());
        // Original bytes preserved for manual inspection.
        assert_eq!(doc.bytes, b"this is not a pdf at all");
    }

    #[tokio::test]
    async fn truncated_pdf_is_unrepairable() {
        let bytes = sample_pdf(2);
        let half = bytes[..bytes.len() / 2].to_vec();
        let doc = validate(3, "cut", half).await.unwrap();
        assert_eq!(doc.validity, Validity::Unrepairable);
    }

    #[test]
    fn truncate_after_eof_strips_trailing_junk() {
        let mut bytes = sample_pdf(1);
        let clean_len = bytes.len();
        bytes.extend_from_slice(&[0xAB; 2048]);
        let truncated = truncate_after_eof(&bytes).expect("junk should be stripped");
        // The marker may be followed by a newline in the clean stream, so
        // truncation lands at or just before the clean length.
        assert!(truncated.len() <= clean_len);
        assert!(truncated.ends_with(EOF_MARKER));
    }

    #[test]
    fn truncate_after_eof_is_noop_for_clean_stream() {
        let bytes = b"%PDF-1.5 ... %%EOF".to_vec();
        assert!(truncate_after_eof(&bytes).is_none());
    }

    #[test]
    fn rewrite_produces_parseable_output() {
        let bytes = sample_pdf(2);
        let rewritten = rewrite(&bytes).unwrap();
        assert_eq!(check(&rewritten).unwrap(), 2);
    }
}
