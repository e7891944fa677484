//! Domain types shared across the pipeline stages.
//!
//! The orchestrator exclusively owns the [`SourceDocument`] and its
//! [`Page`]s for the duration of one job; [`BoundarySignal`]s and
//! [`InvoiceGroup`]s are produced once and never mutated afterwards.

use edgequake_llm::ImageData;
use serde::{Deserialize, Serialize};

use crate::error::GroupError;

/// Outcome of the integrity check on the input bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validity {
    /// Parsed cleanly on the first attempt.
    Valid,
    /// Initial check failed but a repair strategy produced a parseable
    /// document; `SourceDocument::bytes` holds the repaired stream.
    Repaired,
    /// Every repair strategy failed. The document is routed to the error
    /// partition; it never reaches the rasteriser or any API call.
    Unrepairable,
}

/// A validated (or repaired, or unrepairable) input PDF.
///
/// Immutable once returned by the integrity guard.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Idempotency key: the external attachment id this job was created from.
    pub attachment_id: i64,
    /// Source filename stem, used for deterministic artifact naming.
    pub stem: String,
    /// Validated or repaired PDF bytes. For `Unrepairable` documents these
    /// are the original bytes, preserved for manual inspection.
    pub bytes: Vec<u8>,
    pub validity: Validity,
    /// Page count from the structural check; 0 when unrepairable.
    pub page_count: usize,
}

impl SourceDocument {
    /// Whether the document may proceed past the integrity guard.
    pub fn is_processable(&self) -> bool {
        !matches!(self.validity, Validity::Unrepairable)
    }
}

/// One rendered, encoded page of a [`SourceDocument`].
#[derive(Clone)]
pub struct Page {
    /// 0-indexed position within the source document.
    pub index: usize,
    /// Base64 JPEG ready for the multimodal API request body.
    pub image: ImageData,
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The base64 payload is noise in logs; size is what matters.
        f.debug_struct("Page")
            .field("index", &self.index)
            .field("image_bytes", &self.image.data.len())
            .finish()
    }
}

/// Per-page boundary classification result. Produced once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundarySignal {
    pub page_index: usize,
    /// Whether this page starts a new invoice. Page 0 is always forced to
    /// `true` by the classifier regardless of model output.
    pub is_invoice_start: bool,
    /// Model confidence in [0, 1]. Advisory only: logged for diagnostics,
    /// never consulted by the grouper.
    pub confidence: f32,
    /// Verbatim model response, kept for debugging a bad segmentation.
    pub raw_response: String,
}

/// A contiguous, non-overlapping run of pages belonging to one invoice.
///
/// Invariant (checked by the grouper): the groups of a document exactly
/// partition `[0, page_count)` in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceGroup {
    /// 0-indexed page indices, ascending and contiguous.
    pub pages: Vec<usize>,
}

impl InvoiceGroup {
    pub fn first_page(&self) -> usize {
        self.pages[0]
    }

    /// 1-indexed page numbers for naming and human-facing records.
    pub fn page_numbers(&self) -> Vec<usize> {
        self.pages.iter().map(|p| p + 1).collect()
    }
}

/// Structured fields extracted from one invoice group.
///
/// Every scalar field is optional: the extractor reports "unknown" rather
/// than failing when a field is absent on the source document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedInvoice {
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub vendor_name: Option<String>,
    #[serde(default)]
    pub vendor_address: Option<String>,
    #[serde(default)]
    pub vendor_phone: Option<String>,
    #[serde(default)]
    pub vendor_email: Option<String>,
    /// YYYY-MM-DD as reported by the model.
    #[serde(default)]
    pub invoice_date: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub total_amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub total_tax: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
}

/// One row of an invoice's itemised table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub item_name: String,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub unit_price: Option<f64>,
    #[serde(default)]
    pub total_price: Option<f64>,
}

/// Whether the structured fields of a record were populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Extracted,
    /// The vision call exhausted its retries; the PDF artifact was still
    /// split and written, only enrichment is missing.
    ExtractionFailed,
}

/// The structured record written alongside each split PDF.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub attachment_id: i64,
    pub status: ExtractionStatus,
    /// 1-indexed page numbers of the source document covered by this invoice.
    pub pages: Vec<usize>,
    pub invoice: ExtractedInvoice,
    /// Present only when `status` is `ExtractionFailed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<GroupError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracted_invoice_tolerates_missing_fields() {
        let inv: ExtractedInvoice =
            serde_json::from_str(r#"{"invoice_number": "INV-1"}"#).unwrap();
        assert_eq!(inv.invoice_number.as_deref(), Some("INV-1"));
        assert!(inv.total_amount.is_none());
        assert!(inv.line_items.is_empty());
    }

    #[test]
    fn extracted_invoice_tolerates_explicit_nulls() {
        let inv: ExtractedInvoice = serde_json::from_str(
            r#"{
                "invoice_number": null,
                "vendor_name": "Acme GmbH",
                "total_amount": 1234.5,
                "line_items": [
                    {"item_name": "Widget", "quantity": 2, "unit_price": null, "total_price": 617.25}
                ]
            }"#,
        )
        .unwrap();
        assert!(inv.invoice_number.is_none());
        assert_eq!(inv.total_amount, Some(1234.5));
        assert_eq!(inv.line_items.len(), 1);
        assert!(inv.line_items[0].unit_price.is_none());
    }

    #[test]
    fn record_serialises_status_snake_case() {
        let record = InvoiceRecord {
            attachment_id: 7,
            status: ExtractionStatus::ExtractionFailed,
            pages: vec![1, 2],
            invoice: ExtractedInvoice::default(),
            error: None,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains(r#""status":"extraction_failed""#), "got: {json}");
        assert!(!json.contains(r#""error""#), "error should be omitted when None");
    }

    #[test]
    fn group_page_numbers_are_one_indexed() {
        let g = InvoiceGroup { pages: vec![2, 3, 4] };
        assert_eq!(g.first_page(), 2);
        assert_eq!(g.page_numbers(), vec![3, 4, 5]);
    }
}
