//! Escalation: routes an invoice out of automatic processing.

use chrono::Utc;

use crate::record::{Disposition, EscalationNotice, PaymentDecision};

pub struct EscalationStage;

impl EscalationStage {
    /// Build a notice from whatever condition triggered the hand-off. Does
    /// not resolve the invoice, only marks it for out-of-band review.
    pub fn escalate(&self, payment: Option<&PaymentDecision>) -> EscalationNotice {
        let (reason, triggered_by) = match payment {
            Some(decision) => {
                let reason = match decision.disposition {
                    Disposition::ManualApprovalRequired => {
                        format!("manual approval required: {}", decision.reason)
                    }
                    Disposition::Rejected => format!("invoice rejected: {}", decision.reason),
                    Disposition::AutoApproved => "escalated despite auto-approval".to_string(),
                };
                (reason, "payment_decision".to_string())
            }
            None => (
                "processing failed before a payment decision was reached".to_string(),
                "pipeline_failure".to_string(),
            ),
        };

        tracing::info!(%reason, %triggered_by, "Escalating invoice for human review");

        EscalationNotice {
            reason,
            triggered_by,
            escalated_at: Utc::now(),
        }
    }
}
