//! PDF splitting: carve each invoice group out of the source bytes.
//!
//! The split operates on the validated source bytes directly, never on a
//! re-render: the output artifact keeps the original vector text, fonts, and
//! resolution. Each group is produced by reloading the source document and
//! deleting the complement of the group's pages, which is simpler and safer
//! than surgically importing page trees between documents.

use lopdf::Document;
use tracing::debug;

use crate::error::PipelineError;
use crate::model::InvoiceGroup;

/// Produce one single-invoice PDF per group.
///
/// Runs on the blocking pool; re-serialising the object graph once per group
/// is CPU-bound. Returns the PDFs in group order.
pub async fn split_groups(
    bytes: Vec<u8>,
    groups: Vec<InvoiceGroup>,
) -> Result<Vec<Vec<u8>>, PipelineError> {
    tokio::task::spawn_blocking(move || {
        groups
            .iter()
            .enumerate()
            .map(|(i, group)| split_group(&bytes, group, i + 1))
            .collect()
    })
    .await
    .map_err(|e| PipelineError::Internal(format!("split task panicked: {e}")))?
}

/// Extract one group's pages into a standalone PDF.
fn split_group(
    bytes: &[u8],
    group: &InvoiceGroup,
    ordinal: usize,
) -> Result<Vec<u8>, PipelineError> {
    let split_err = |detail: String| PipelineError::Split {
        name: format!("invoice {ordinal}"),
        detail,
    };

    let mut doc = Document::load_mem(bytes).map_err(|e| split_err(e.to_string()))?;
    let total = doc.get_pages().len();

    // delete_pages takes 1-based page numbers; drop everything outside the group.
    let keep: Vec<usize> = group.page_numbers();
    let to_delete: Vec<u32> = (1..=total as u32)
        .filter(|n| !keep.contains(&(*n as usize)))
        .collect();

    if keep.iter().any(|&n| n > total) {
        return Err(split_err(format!(
            "group references page {} but document has {total}",
            keep.iter().max().copied().unwrap_or(0)
        )));
    }

    if !to_delete.is_empty() {
        doc.delete_pages(&to_delete);
    }
    doc.prune_objects();
    doc.renumber_objects();

    let mut out = Vec::new();
    doc.save_to(&mut out).map_err(|e| split_err(e.to_string()))?;

    debug!(
        invoice = ordinal,
        pages = ?keep,
        bytes = out.len(),
        "split invoice PDF"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_pdf::sample_pdf;

    fn page_count(bytes: &[u8]) -> usize {
        Document::load_mem(bytes).unwrap().get_pages().len()
    }

    #[tokio::test]
    async fn splits_carry_the_right_page_counts() {
        let source = sample_pdf(5);
        let groups = vec![
            InvoiceGroup { pages: vec![0, 1] },
            InvoiceGroup { pages: vec![2, 3, 4] },
        ];
        let outputs = split_groups(source, groups).await.unwrap();

        assert_eq!(outputs.len(), 2);
        assert_eq!(page_count(&outputs[0]), 2);
        assert_eq!(page_count(&outputs[1]), 3);
    }

    #[tokio::test]
    async fn whole_document_group_is_a_faithful_copy() {
        let source = sample_pdf(3);
        let groups = vec![InvoiceGroup { pages: vec![0, 1, 2] }];
        let outputs = split_groups(source, groups).await.unwrap();
        assert_eq!(page_count(&outputs[0]), 3);
    }

    #[tokio::test]
    async fn single_page_group_from_the_middle() {
        let source = sample_pdf(4);
        let groups = vec![InvoiceGroup { pages: vec![2] }];
        let outputs = split_groups(source, groups).await.unwrap();
        assert_eq!(page_count(&outputs[0]), 1);
    }

    #[tokio::test]
    async fn out_of_range_group_is_rejected() {
        let source = sample_pdf(2);
        let groups = vec![InvoiceGroup { pages: vec![5] }];
        let err = split_groups(source, groups).await.unwrap_err();
        assert!(matches!(err, PipelineError::Split { .. }));
    }
}
