//! Risk stage: continuous score from weighted signals, discrete level
//! from configured cutoffs, plus a rule-based fraud-indicator pass.

use std::collections::HashMap;
use std::sync::Mutex;

use regex::RegexBuilder;
use uuid::Uuid;

use crate::config::{RiskConfig, RiskThresholds};
use crate::record::{
    FraudIndicator, InvoiceRecord, RiskAssessment, RiskLevel, ValidationResult, ValidationStatus,
};

// Signal weights. Sum to 1.0 so the unclamped base score stays in [0, 1].
const VALIDATION_WEIGHT: f64 = 0.35;
const AMOUNT_WEIGHT: f64 = 0.30;
const NOVELTY_WEIGHT: f64 = 0.20;
const CONFIDENCE_WEIGHT: f64 = 0.15;

/// Proximity window for the round-threshold-amount indicator.
const BOUNDARY_EPSILON: f64 = 0.005;

pub struct RiskStage {
    thresholds: RiskThresholds,
    large_amount_reference: f64,
    indicator_boost: f64,
    flagged_name_pattern: Option<regex::Regex>,
    /// Decision-threshold amounts; totals landing exactly on one are a
    /// classic fat-finger / probing signal.
    boundary_amounts: Vec<f64>,
    /// invoice_number → record id of the first run that saw it.
    seen_invoices: Mutex<HashMap<String, Uuid>>,
}

impl RiskStage {
    pub fn new(config: &RiskConfig, boundary_amounts: Vec<f64>) -> Self {
        let flagged_name_pattern = if config.flagged_name_terms.is_empty() {
            None
        } else {
            let alternation = config
                .flagged_name_terms
                .iter()
                .map(|term| regex::escape(term))
                .collect::<Vec<_>>()
                .join("|");
            RegexBuilder::new(&alternation)
                .case_insensitive(true)
                .build()
                .ok()
        };
        Self {
            thresholds: config.thresholds,
            large_amount_reference: config.large_amount_reference,
            indicator_boost: config.indicator_boost,
            flagged_name_pattern,
            boundary_amounts,
            seen_invoices: Mutex::new(HashMap::new()),
        }
    }

    pub fn assess(
        &self,
        invoice: &InvoiceRecord,
        validation: &ValidationResult,
        extraction_confidence: f64,
        record_id: Uuid,
    ) -> RiskAssessment {
        let base = self.base_score(invoice, validation, extraction_confidence);
        let indicators = self.detect_fraud_indicators(invoice, record_id);
        let score = (base + self.indicator_boost * indicators.len() as f64).clamp(0.0, 1.0);
        let level = self.level_for(score);

        tracing::info!(
            score,
            level = level.as_str(),
            indicators = indicators.len(),
            "Risk assessment complete"
        );

        RiskAssessment {
            score,
            level,
            indicators,
        }
    }

    /// Weighted combination of normalized signals. Pure in its inputs, so
    /// re-running on an unchanged pair yields an identical score.
    fn base_score(
        &self,
        invoice: &InvoiceRecord,
        validation: &ValidationResult,
        extraction_confidence: f64,
    ) -> f64 {
        let validation_signal = match validation.status {
            ValidationStatus::Valid => 0.0,
            ValidationStatus::PartialMatch => 0.5,
            ValidationStatus::Invalid => 0.9,
            ValidationStatus::NoMatch => 1.0,
        };

        let amount_signal = invoice
            .total
            .map(|t| (t.abs() / self.large_amount_reference).clamp(0.0, 1.0))
            .unwrap_or(0.5);

        let novelty_signal = if validation.customer_recognized { 0.1 } else { 0.9 };

        let confidence_signal = (1.0 - extraction_confidence).clamp(0.0, 1.0);

        VALIDATION_WEIGHT * validation_signal
            + AMOUNT_WEIGHT * amount_signal
            + NOVELTY_WEIGHT * novelty_signal
            + CONFIDENCE_WEIGHT * confidence_signal
    }

    /// Rule pass independent of the numeric score. Tags only; the boost
    /// is applied by the caller.
    fn detect_fraud_indicators(&self, invoice: &InvoiceRecord, record_id: Uuid) -> Vec<FraudIndicator> {
        let mut indicators = Vec::new();

        if let (Some(pattern), Some(name)) =
            (self.flagged_name_pattern.as_ref(), invoice.customer_name.as_deref())
        {
            if pattern.is_match(name) {
                indicators.push(FraudIndicator::FlaggedCustomerName);
            }
        }

        if let Some(total) = invoice.total {
            if self
                .boundary_amounts
                .iter()
                .any(|boundary| (total - boundary).abs() <= BOUNDARY_EPSILON)
            {
                indicators.push(FraudIndicator::AmountAtThresholdBoundary);
            }
            if total >= 2.0 * self.large_amount_reference {
                indicators.push(FraudIndicator::AnomalouslyHighAmount);
            }
        }

        if let Some(number) = invoice.invoice_number.as_deref() {
            let mut seen = self
                .seen_invoices
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match seen.get(number) {
                Some(first) if *first != record_id => {
                    indicators.push(FraudIndicator::DuplicateInvoiceNumber);
                }
                Some(_) => {}
                None => {
                    seen.insert(number.to_string(), record_id);
                }
            }
        }

        indicators
    }

    /// Descending cutoff checks; ties land in the higher band.
    fn level_for(&self, score: f64) -> RiskLevel {
        if score >= self.thresholds.critical {
            RiskLevel::Critical
        } else if score >= self.thresholds.high {
            RiskLevel::High
        } else if score >= self.thresholds.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}
