//! Extraction confidence scoring.
//!
//! Combines three signals into a [0, 1] score: how many required invoice
//! fields the AI actually filled, whether the totals arithmetic holds, and
//! how much raw text the backends recovered. Each additional missing
//! required field strictly lowers the score.

use crate::record::InvoiceRecord;

/// Weight of the required-field presence signal.
const FIELD_WEIGHT: f64 = 0.60;
/// Weight of the totals-identity consistency signal.
const CONSISTENCY_WEIGHT: f64 = 0.25;
/// Weight of the raw-text density signal.
const DENSITY_WEIGHT: f64 = 0.15;

/// Fields the downstream stages depend on.
const REQUIRED_FIELD_COUNT: f64 = 6.0;

pub fn compute_extraction_confidence(invoice: &InvoiceRecord, raw_text: &str) -> f64 {
    let present = [
        invoice.invoice_number.as_deref().is_some_and(|s| !s.trim().is_empty()),
        invoice.order_id.as_deref().is_some_and(|s| !s.trim().is_empty()),
        invoice.customer_name.as_deref().is_some_and(|s| !s.trim().is_empty()),
        invoice.due_date.is_some(),
        invoice.total.is_some(),
        !invoice.line_items.is_empty(),
    ]
    .iter()
    .filter(|&&p| p)
    .count() as f64;

    let field_score = present / REQUIRED_FIELD_COUNT;

    let consistency_score = match invoice.totals_consistent(0.01) {
        Some(true) => 1.0,
        // Identity evaluable and violated.
        Some(false) => 0.3,
        // Not enough fields to evaluate the identity.
        None => 0.6,
    };

    let meaningful_chars = raw_text.chars().filter(|c| !c.is_whitespace()).count();
    let density_score = match meaningful_chars {
        0..=49 => 0.2,
        50..=199 => 0.6,
        _ => 1.0,
    };

    (FIELD_WEIGHT * field_score
        + CONSISTENCY_WEIGHT * consistency_score
        + DENSITY_WEIGHT * density_score)
        .clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LineItem;
    use chrono::NaiveDate;

    const RICH_TEXT: &str = "INVOICE INV-001 issued to Test Customer for order ORD-001. \
         Subtotal 100.00, discount 0.00, shipping 10.00, total due 110.00 by 2023-12-31. \
         1 x Test Item @ 100.00 = 100.00. Payment terms net 30.";

    fn complete_invoice() -> InvoiceRecord {
        InvoiceRecord {
            invoice_number: Some("INV-001".into()),
            order_id: Some("ORD-001".into()),
            customer_name: Some("Test Customer".into()),
            due_date: NaiveDate::from_ymd_opt(2023, 12, 31),
            subtotal: Some(100.0),
            discount: Some(0.0),
            shipping_cost: Some(10.0),
            total: Some(110.0),
            line_items: vec![LineItem {
                name: "Test Item".into(),
                quantity: 1,
                rate: 100.0,
                amount: 100.0,
            }],
        }
    }

    #[test]
    fn confidence_in_unit_interval() {
        let conf = compute_extraction_confidence(&complete_invoice(), RICH_TEXT);
        assert!((0.0..=1.0).contains(&conf));
        assert!(conf > 0.9, "complete consistent invoice should score high, got {conf}");
    }

    #[test]
    fn empty_invoice_scores_low() {
        let conf = compute_extraction_confidence(&InvoiceRecord::default(), "");
        assert!(conf < 0.5, "empty extraction should score low, got {conf}");
    }

    #[test]
    fn each_missing_field_strictly_lowers_confidence() {
        // Knock out required fields one at a time, holding the text fixed.
        let mut invoice = complete_invoice();
        let mut previous = compute_extraction_confidence(&invoice, RICH_TEXT);

        let removals: Vec<fn(&mut InvoiceRecord)> = vec![
            |i| i.invoice_number = None,
            |i| i.order_id = None,
            |i| i.customer_name = None,
            |i| i.due_date = None,
            |i| i.line_items.clear(),
        ];

        for remove in removals {
            remove(&mut invoice);
            let conf = compute_extraction_confidence(&invoice, RICH_TEXT);
            assert!(
                conf < previous,
                "confidence must strictly decrease per missing field ({conf} >= {previous})"
            );
            previous = conf;
        }
    }

    #[test]
    fn whitespace_only_field_counts_as_missing() {
        let mut invoice = complete_invoice();
        let baseline = compute_extraction_confidence(&invoice, RICH_TEXT);
        invoice.customer_name = Some("   ".into());
        let conf = compute_extraction_confidence(&invoice, RICH_TEXT);
        assert!(conf < baseline);
    }

    #[test]
    fn totals_violation_lowers_confidence() {
        let consistent = compute_extraction_confidence(&complete_invoice(), RICH_TEXT);

        let mut skewed = complete_invoice();
        skewed.total = Some(400.0);
        let violated = compute_extraction_confidence(&skewed, RICH_TEXT);

        assert!(violated < consistent);
    }

    #[test]
    fn sparse_text_lowers_confidence() {
        let invoice = complete_invoice();
        let rich = compute_extraction_confidence(&invoice, RICH_TEXT);
        let sparse = compute_extraction_confidence(&invoice, "INV-001 110.00");
        assert!(sparse < rich);
    }
}
