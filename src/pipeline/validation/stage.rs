//! Validation stage: invoice vs. purchase-order catalog.

use std::collections::BTreeMap;

use super::catalog::{PurchaseOrder, PurchaseOrderCatalog};
use super::fuzzy::similarity;
use super::ValidationError;
use crate::config::ValidationConfig;
use crate::record::{
    DiscrepancySeverity, InvoiceRecord, MatchedOrder, ValidationResult, ValidationStatus,
};

pub struct ValidationStage {
    catalog: PurchaseOrderCatalog,
    fuzzy_threshold: u8,
    amount_tolerance: f64,
}

impl ValidationStage {
    /// Catalog load failures propagate as fatal errors for the run.
    pub fn new(config: &ValidationConfig) -> Result<Self, ValidationError> {
        let catalog = PurchaseOrderCatalog::load(&config.catalog_path)?;
        Ok(Self::with_catalog(catalog, config))
    }

    pub fn with_catalog(catalog: PurchaseOrderCatalog, config: &ValidationConfig) -> Self {
        Self {
            catalog,
            fuzzy_threshold: config.fuzzy_threshold,
            amount_tolerance: config.amount_tolerance,
        }
    }

    pub fn validate(&self, invoice: &InvoiceRecord) -> ValidationResult {
        let mut discrepancies = BTreeMap::new();

        // Explicit contradictions first: an invoice with negative amounts
        // is invalid regardless of any catalog match.
        if let Some(contradiction) = detect_contradictions(invoice) {
            discrepancies.insert(contradiction, DiscrepancySeverity::High);
            return ValidationResult {
                status: ValidationStatus::Invalid,
                matched_order: None,
                discrepancies,
                customer_recognized: self.customer_recognized(invoice),
            };
        }

        // Totals identity is a recorded signal, never a rejection.
        if invoice.totals_consistent(self.amount_tolerance) == Some(false) {
            discrepancies.insert("totals_identity_violation".into(), DiscrepancySeverity::Low);
        }

        let candidate = self.exact_match(invoice).or_else(|| self.fuzzy_match(invoice));
        let Some((po, score)) = candidate else {
            tracing::info!(
                invoice_number = invoice.invoice_number.as_deref().unwrap_or("-"),
                "No catalog candidate cleared the similarity threshold"
            );
            return ValidationResult {
                status: ValidationStatus::NoMatch,
                matched_order: None,
                discrepancies,
                customer_recognized: self.customer_recognized(invoice),
            };
        };

        let mut degraded = false;

        match invoice.total {
            Some(total) => {
                let tolerance = self.amount_tolerance * po.total.abs().max(1.0);
                if (total - po.total).abs() > tolerance {
                    discrepancies.insert("amount_mismatch".into(), DiscrepancySeverity::High);
                    degraded = true;
                }
            }
            None => {
                discrepancies.insert("missing_total".into(), DiscrepancySeverity::Medium);
                degraded = true;
            }
        }

        if let Some(name) = invoice.customer_name.as_deref() {
            if similarity(name, &po.customer_name) < self.fuzzy_threshold {
                discrepancies.insert("name_mismatch".into(), DiscrepancySeverity::Medium);
                degraded = true;
            }
        }

        let status = if degraded {
            ValidationStatus::PartialMatch
        } else {
            ValidationStatus::Valid
        };

        tracing::info!(
            status = status.as_str(),
            matched_order = %po.order_id,
            match_score = score,
            discrepancies = discrepancies.len(),
            "Validation complete"
        );

        ValidationResult {
            status,
            matched_order: Some(MatchedOrder {
                invoice_number: po.invoice_number.clone(),
                order_id: po.order_id.clone(),
                customer_name: po.customer_name.clone(),
                total: po.total,
                match_score: score,
            }),
            discrepancies,
            customer_recognized: self.customer_recognized(invoice),
        }
    }

    fn exact_match(&self, invoice: &InvoiceRecord) -> Option<(&PurchaseOrder, u8)> {
        let by_invoice = invoice
            .invoice_number
            .as_deref()
            .and_then(|n| self.catalog.find_by_invoice_number(n));
        let by_order = invoice
            .order_id
            .as_deref()
            .and_then(|id| self.catalog.find_by_order_id(id));
        by_invoice.or(by_order).map(|po| (po, 100))
    }

    /// Best catalog row by customer-name / item-description similarity,
    /// accepted only above the configured threshold.
    fn fuzzy_match(&self, invoice: &InvoiceRecord) -> Option<(&PurchaseOrder, u8)> {
        let mut best: Option<(&PurchaseOrder, u8)> = None;
        for po in self.catalog.iter() {
            let name_score = invoice
                .customer_name
                .as_deref()
                .map(|n| similarity(n, &po.customer_name))
                .unwrap_or(0);
            let item_score = invoice
                .line_items
                .iter()
                .map(|item| similarity(&item.name, &po.customer_name))
                .max()
                .unwrap_or(0);
            let score = name_score.max(item_score);

            if score >= self.fuzzy_threshold
                && best.map_or(true, |(_, best_score)| score > best_score)
            {
                best = Some((po, score));
            }
        }
        best
    }

    /// Novelty signal for the risk stage: does this customer appear
    /// anywhere in the catalog?
    fn customer_recognized(&self, invoice: &InvoiceRecord) -> bool {
        let Some(name) = invoice.customer_name.as_deref() else {
            return false;
        };
        self.catalog
            .iter()
            .any(|po| similarity(name, &po.customer_name) >= self.fuzzy_threshold)
    }
}

fn detect_contradictions(invoice: &InvoiceRecord) -> Option<String> {
    if invoice.total.is_some_and(|t| t < 0.0) {
        return Some("negative_total".into());
    }
    if invoice.subtotal.is_some_and(|s| s < 0.0) {
        return Some("negative_subtotal".into());
    }
    if invoice
        .line_items
        .iter()
        .any(|item| item.rate < 0.0 || item.amount < 0.0)
    {
        return Some("negative_line_amount".into());
    }
    None
}
