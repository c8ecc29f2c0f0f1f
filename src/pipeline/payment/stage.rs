//! Payment decision table and gateway submission.

use std::time::Duration;

use super::gateway::{PaymentGateway, PaymentRequest};
use crate::config::PaymentConfig;
use crate::record::{
    Disposition, InvoiceRecord, PaymentDecision, PaymentMethod, RiskAssessment, RiskLevel,
    ValidationResult, ValidationStatus,
};
use crate::retry::RetryPolicy;

pub struct PaymentStage {
    gateway: Box<dyn PaymentGateway>,
    retry: RetryPolicy,
    auto_payment_threshold: f64,
    manual_approval_threshold: f64,
    instant_transfer_limit: f64,
    ach_batch_limit: f64,
}

/// Outcome of the ordered decision table, before any gateway call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableOutcome {
    Rejected,
    Manual,
    Auto,
    /// No rule matched. Handled as manual, never auto.
    PolicyViolation,
}

impl PaymentStage {
    pub fn new(config: &PaymentConfig, gateway: Box<dyn PaymentGateway>) -> Self {
        Self {
            gateway,
            retry: RetryPolicy::new(
                config.max_retries.max(1),
                Duration::from_millis(config.retry_base_delay_ms),
            ),
            auto_payment_threshold: config.auto_payment_threshold,
            manual_approval_threshold: config.manual_approval_threshold,
            instant_transfer_limit: config.instant_transfer_limit,
            ach_batch_limit: config.ach_batch_limit,
        }
    }

    pub fn decide(
        &self,
        invoice: &InvoiceRecord,
        validation: &ValidationResult,
        risk: &RiskAssessment,
    ) -> PaymentDecision {
        let total = invoice.total.unwrap_or(0.0);
        let method = self.select_payment_method(total);
        let (outcome, reason) = self.evaluate_table(total, validation, risk);

        let mut decision = match outcome {
            TableOutcome::Rejected => PaymentDecision {
                disposition: Disposition::Rejected,
                method,
                transaction_id: None,
                reason,
            },
            TableOutcome::Manual | TableOutcome::PolicyViolation => PaymentDecision {
                disposition: Disposition::ManualApprovalRequired,
                method,
                transaction_id: None,
                reason,
            },
            TableOutcome::Auto => PaymentDecision {
                disposition: Disposition::AutoApproved,
                method,
                transaction_id: None,
                reason,
            },
        };

        // The gateway is only ever contacted for auto-approved payments.
        if decision.disposition == Disposition::AutoApproved {
            match self.submit(invoice, total) {
                Ok(transaction_id) => decision.transaction_id = Some(transaction_id),
                Err(e) => {
                    // Transport failure after retries downgrades to manual,
                    // never to rejected.
                    tracing::warn!(error = %e, "Gateway submission failed, downgrading to manual");
                    decision.disposition = Disposition::ManualApprovalRequired;
                    decision.reason = format!("gateway submission failed after retries: {e}");
                }
            }
        }

        tracing::info!(
            disposition = decision.disposition.as_str(),
            method = decision.method.as_str(),
            total,
            "Payment decision made"
        );
        decision
    }

    /// Ordered decision table; first match wins.
    fn evaluate_table(
        &self,
        total: f64,
        validation: &ValidationResult,
        risk: &RiskAssessment,
    ) -> (TableOutcome, String) {
        if matches!(
            validation.status,
            ValidationStatus::Invalid | ValidationStatus::NoMatch
        ) {
            return (
                TableOutcome::Rejected,
                format!("validation status is {}", validation.status.as_str()),
            );
        }
        if matches!(risk.level, RiskLevel::High | RiskLevel::Critical) {
            return (
                TableOutcome::Manual,
                format!("risk level is {}", risk.level.as_str()),
            );
        }
        if total <= self.auto_payment_threshold
            && matches!(risk.level, RiskLevel::Low | RiskLevel::Medium)
        {
            return (
                TableOutcome::Auto,
                format!("total {total:.2} within auto-payment threshold"),
            );
        }
        if total > self.manual_approval_threshold {
            return (
                TableOutcome::Manual,
                format!("total {total:.2} exceeds manual-approval threshold"),
            );
        }
        if total > self.auto_payment_threshold {
            return (
                TableOutcome::Manual,
                format!("total {total:.2} above auto-payment threshold"),
            );
        }
        // Unreachable with the rules above, but a fall-through must never
        // auto-approve.
        (
            TableOutcome::PolicyViolation,
            "decision table reached no rule".to_string(),
        )
    }

    /// Amount band → method, independent of the disposition.
    pub fn select_payment_method(&self, total: f64) -> PaymentMethod {
        if total <= self.instant_transfer_limit {
            PaymentMethod::InstantTransfer
        } else if total <= self.ach_batch_limit {
            PaymentMethod::AchBatch
        } else {
            PaymentMethod::WireTransfer
        }
    }

    fn submit(&self, invoice: &InvoiceRecord, total: f64) -> Result<String, super::PaymentError> {
        let request = PaymentRequest {
            order_id: invoice.order_id.clone().unwrap_or_default(),
            customer_name: invoice.customer_name.clone().unwrap_or_default(),
            amount: total,
            due_date: invoice.due_date.map(|d| d.to_string()),
        };
        let receipt = self
            .retry
            .run(super::PaymentError::is_transient, |_| {
                self.gateway.initiate_payment(&request)
            })?;
        Ok(receipt.transaction_id)
    }
}
