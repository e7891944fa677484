//! Invoice grouping: turn per-page boundary signals into page groups.
//!
//! A single linear pass over the signals in page order. Each `is_invoice_start`
//! opens a new group; every other page joins the currently open one. Because
//! the classifier guarantees a start on page 0, the scan never sees a page
//! with no open group.
//!
//! The output is checked to be an exact ordered partition of the page range
//! before it leaves this module. A violation here means a bug upstream (a
//! missing or duplicated signal), and failing loudly beats silently dropping
//! or double-assigning a page of someone's invoice.

use tracing::{debug, info};

use crate::error::PipelineError;
use crate::model::{BoundarySignal, InvoiceGroup};

/// Group classified pages into invoices.
///
/// `signals` must be sorted by page index and cover every page exactly once,
/// which is what [`super::classify::classify_pages`] returns.
pub fn group_pages(
    signals: &[BoundarySignal],
    page_count: usize,
) -> Result<Vec<InvoiceGroup>, PipelineError> {
    let mut groups: Vec<InvoiceGroup> = Vec::new();

    for signal in signals {
        if signal.is_invoice_start || groups.is_empty() {
            groups.push(InvoiceGroup {
                pages: vec![signal.page_index],
            });
        } else if let Some(current) = groups.last_mut() {
            current.pages.push(signal.page_index);
        }
    }

    verify_partition(&groups, page_count)?;

    info!(
        page_count,
        invoice_count = groups.len(),
        "grouped pages into invoices"
    );
    for (i, g) in groups.iter().enumerate() {
        debug!(invoice = i + 1, pages = ?g.page_numbers(), "invoice group");
    }

    Ok(groups)
}

/// Check that the groups exactly partition `[0, page_count)` in order.
fn verify_partition(groups: &[InvoiceGroup], page_count: usize) -> Result<(), PipelineError> {
    let mut expected = 0usize;
    for (i, group) in groups.iter().enumerate() {
        if group.pages.is_empty() {
            return Err(PipelineError::Invariant {
                detail: format!("group {} is empty", i + 1),
            });
        }
        for &page in &group.pages {
            if page != expected {
                return Err(PipelineError::Invariant {
                    detail: format!(
                        "expected page index {expected} next, group {} has {page}",
                        i + 1
                    ),
                });
            }
            expected += 1;
        }
    }
    if expected != page_count {
        return Err(PipelineError::Invariant {
            detail: format!("groups cover {expected} pages, document has {page_count}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals(starts: &[bool]) -> Vec<BoundarySignal> {
        starts
            .iter()
            .enumerate()
            .map(|(i, &s)| BoundarySignal {
                page_index: i,
                is_invoice_start: s,
                confidence: 0.9,
                raw_response: String::new(),
            })
            .collect()
    }

    fn page_sets(groups: &[InvoiceGroup]) -> Vec<Vec<usize>> {
        groups.iter().map(|g| g.pages.clone()).collect()
    }

    #[test]
    fn single_invoice_single_page() {
        let groups = group_pages(&signals(&[true]), 1).unwrap();
        assert_eq!(page_sets(&groups), vec![vec![0]]);
    }

    #[test]
    fn continuations_extend_the_open_group() {
        let groups = group_pages(&signals(&[true, false, true, false, false]), 5).unwrap();
        assert_eq!(page_sets(&groups), vec![vec![0, 1], vec![2, 3, 4]]);
    }

    #[test]
    fn every_page_a_start_means_one_group_each() {
        let groups = group_pages(&signals(&[true, true, true]), 3).unwrap();
        assert_eq!(page_sets(&groups), vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn missing_leading_start_still_groups_from_page_zero() {
        // The classifier forces page 0, but the grouper tolerates raw
        // signals too rather than panicking on an unanchored scan.
        let groups = group_pages(&signals(&[false, false, false]), 3).unwrap();
        assert_eq!(page_sets(&groups), vec![vec![0, 1, 2]]);
    }

    #[test]
    fn partition_check_rejects_missing_pages() {
        let err = group_pages(&signals(&[true, false]), 3).unwrap_err();
        assert!(matches!(err, PipelineError::Invariant { .. }));
    }

    #[test]
    fn partition_check_rejects_gaps() {
        let mut s = signals(&[true, false, false]);
        s.remove(1); // page 1 never classified
        let err = group_pages(&s, 3).unwrap_err();
        assert!(matches!(err, PipelineError::Invariant { .. }));
    }

    #[test]
    fn exhaustive_start_patterns_partition_up_to_eight_pages() {
        for page_count in 1..=8usize {
            for mask in 0..(1u32 << page_count) {
                // Page 0 forced on, matching the classifier contract.
                let starts: Vec<bool> =
                    (0..page_count).map(|i| i == 0 || mask & (1 << i) != 0).collect();
                let groups = group_pages(&signals(&starts), page_count).unwrap();

                let flattened: Vec<usize> =
                    groups.iter().flat_map(|g| g.pages.iter().copied()).collect();
                assert_eq!(flattened, (0..page_count).collect::<Vec<_>>());

                let expected_groups = starts.iter().filter(|&&s| s).count();
                assert_eq!(groups.len(), expected_groups);
            }
        }
    }
}
