//! Prompts for the vision model's two task modes.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — changing what counts as an invoice start,
//!    or adding an extraction field, requires editing exactly one place.
//!
//! 2. **Testability** — unit tests can inspect prompts directly without
//!    spinning up a real vision model, making prompt regressions easy to
//!    catch.
//!
//! Both prompts demand a bare JSON response; [`crate::vision`] strips any
//! markdown fences the model wraps it in anyway.

/// Prompt for per-page boundary classification.
///
/// Page numbers are 1-indexed in the prompt; models reason about "page 2 of
/// 5" far more reliably than about zero-based offsets.
pub fn boundary_prompt(page_num: usize, total_pages: usize) -> String {
    format!(
        r#"Analyze this document page (page {page_num} of {total_pages}) and determine:

1. Does this page START a new invoice? (Look for invoice headers, invoice numbers, "INVOICE" title, billing/shipping addresses at top)
2. Is this page a CONTINUATION of a previous invoice? (Look for "continued from previous page", partial tables, no invoice header)

Consider these patterns:
- New invoice pages typically have: invoice header/title, invoice number prominently displayed, billing "From" and "To" addresses, invoice date
- Continuation pages typically have: itemized lists continuing, page numbers like "Page 2 of 3", no invoice header/number, table rows continuing

Respond ONLY with valid JSON in this exact format:
{{
    "is_invoice_start": true/false,
    "is_continuation": true/false,
    "confidence": 0.0-1.0,
    "reasoning": "brief explanation"
}}"#
    )
}

/// Prompt for per-group structured extraction.
///
/// All of a group's page images accompany this prompt in a single call so
/// line items split across pages are captured completely.
pub fn extraction_prompt(page_numbers: &[usize], total_pages: usize) -> String {
    let page_info = if page_numbers.len() > 1 {
        format!(
            "Pages {}-{} of {total_pages}",
            page_numbers[0],
            page_numbers[page_numbers.len() - 1]
        )
    } else {
        format!("Page {} of {total_pages}", page_numbers[0])
    };

    format!(
        r#"Analyze this invoice document ({page_info}) and extract all relevant information.

For multi-page invoices, combine information from all pages.

Extract and return the following information in JSON format:

1. invoice_number: The invoice number/identifier
2. customer_name: The customer/buyer name (the "Bill To" or recipient)
3. vendor_name: The vendor/seller name (the "From" or issuer)
4. vendor_address: The vendor/seller address
5. vendor_phone: The vendor/seller phone number
6. vendor_email: The vendor/seller email address
7. invoice_date: Invoice date in YYYY-MM-DD format
8. due_date: Payment due date in YYYY-MM-DD format (if available)
9. total_amount: Total invoice amount as a number
10. currency: Currency code (USD, EUR, etc.)
11. total_tax: Total tax amount as a number
12. description: Brief description or summary of the invoice
13. line_items: Array of items with:
   - item_name: Name/description of the item/service
   - quantity: Quantity ordered
   - unit_price: Price per unit (null if not available)
   - total_price: Total price for this line item

Important:
- If a field is not found, use null
- For line_items, extract ALL items across all pages
- Ensure amounts are numbers, not strings
- Use YYYY-MM-DD format for dates

Respond ONLY with valid JSON in this exact format:
{{
    "invoice_number": "string or null",
    "customer_name": "string or null",
    "vendor_name": "string or null",
    "vendor_address": "string or null",
    "vendor_phone": "string or null",
    "vendor_email": "string or null",
    "invoice_date": "YYYY-MM-DD or null",
    "due_date": "YYYY-MM-DD or null",
    "total_amount": number or null,
    "currency": "string or null",
    "total_tax": number or null,
    "description": "string or null",
    "line_items": [
        {{
            "item_name": "string",
            "quantity": number or null,
            "unit_price": number or null,
            "total_price": number or null
        }}
    ]
}}"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_prompt_mentions_page_position() {
        let p = boundary_prompt(2, 5);
        assert!(p.contains("page 2 of 5"));
        assert!(p.contains("is_invoice_start"));
    }

    #[test]
    fn extraction_prompt_renders_single_page() {
        let p = extraction_prompt(&[3], 3);
        assert!(p.contains("Page 3 of 3"));
    }

    #[test]
    fn extraction_prompt_renders_page_range() {
        let p = extraction_prompt(&[2, 3, 4], 6);
        assert!(p.contains("Pages 2-4 of 6"));
        assert!(p.contains("line_items"));
    }
}
