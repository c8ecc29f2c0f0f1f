//! Pipeline orchestrator: sequences the stages over one processing
//! record per invoice and evaluates the branch conditions between them.
//!
//! Stages never call each other. The orchestrator owns the state machine
//! `extracting → validating → risk_scoring → deciding →
//! (escalating | finalizing) → done`, with `failed` absorbing from any
//! stage on a fatal error. Every stage invocation gets exactly one
//! `started` and one terminal audit entry plus one metrics update, even
//! when the run ends in `failed`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;

use super::escalation::EscalationStage;
use super::extraction::{ExtractionStage, LlmClient};
use super::payment::{PaymentGateway, PaymentStage};
use super::risk::RiskStage;
use super::validation::ValidationStage;
use super::PipelineError;
use crate::config::PipelineConfig;
use crate::record::{AuditStatus, Disposition, ProcessingRecord, ProcessingStatus, ValidationStatus};

const STAGE_EXTRACTION: &str = "extraction";
const STAGE_VALIDATION: &str = "validation";
const STAGE_RISK: &str = "risk";
const STAGE_PAYMENT: &str = "payment";
const STAGE_ESCALATION: &str = "escalation";

pub struct InvoicePipeline {
    extraction: ExtractionStage,
    validation: ValidationStage,
    risk: RiskStage,
    payment: PaymentStage,
    escalation: EscalationStage,
    cancel: Arc<AtomicBool>,
}

impl InvoicePipeline {
    /// Build every stage up front. A missing or corrupt purchase-order
    /// catalog is fatal here, before any invoice is accepted.
    pub fn from_config(
        config: &PipelineConfig,
        llm: Box<dyn LlmClient>,
        gateway: Box<dyn PaymentGateway>,
    ) -> Result<Self, PipelineError> {
        let retry = crate::retry::RetryPolicy::new(
            config.payment.max_retries,
            std::time::Duration::from_millis(config.payment.retry_base_delay_ms),
        );
        Ok(Self {
            extraction: ExtractionStage::new(&config.extraction, llm, retry)?,
            validation: ValidationStage::new(&config.validation)?,
            risk: RiskStage::new(
                &config.risk,
                vec![
                    config.payment.auto_payment_threshold,
                    config.payment.manual_approval_threshold,
                ],
            ),
            payment: PaymentStage::new(&config.payment, gateway),
            escalation: EscalationStage,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Same wiring from pre-built stages, bypassing config and the CSV
    /// catalog load. Used by tests and in-memory callers.
    pub fn with_stages(
        extraction: ExtractionStage,
        validation: ValidationStage,
        risk: RiskStage,
        payment: PaymentStage,
    ) -> Self {
        Self {
            extraction,
            validation,
            risk,
            payment,
            escalation: EscalationStage,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared flag for operator-requested cancellation. Checked between
    /// stages only, never mid-stage.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Process one invoice end to end. Always returns the record: on a
    /// fatal stage error the record comes back in `failed` with the audit
    /// trail complete up to that point.
    pub fn process(&self, path: &Path) -> ProcessingRecord {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mut record = ProcessingRecord::new(file_name);

        let span = tracing::info_span!("invoice", record_id = %record.id, file = %record.file_name);
        let _guard = span.enter();

        // ── extracting ──
        if self.cancelled(&mut record) {
            return record;
        }
        record.status = ProcessingStatus::Extracting;
        let outcome = self.run_stage(&mut record, STAGE_EXTRACTION, "extract invoice data", |s| {
            let outcome = s.extraction.run(path)?;
            let mut details = BTreeMap::new();
            details.insert("backend".into(), json!(outcome.backend));
            details.insert("confidence".into(), json!(outcome.confidence));
            details.insert("raw_text_chars".into(), json!(outcome.raw_text_chars));
            if outcome.parse_retried {
                details.insert("parse_retried".into(), json!(true));
            }
            if outcome.low_confidence {
                details.insert("low_confidence".into(), json!(true));
            }
            Ok::<_, PipelineError>((outcome, details))
        });
        let outcome = match outcome {
            Ok(o) => o,
            Err(e) => return self.fail(record, e),
        };
        record.extraction_confidence = Some(outcome.confidence);
        record.invoice = Some(outcome.invoice);

        // ── validating ──
        if self.cancelled(&mut record) {
            return record;
        }
        record.status = ProcessingStatus::Validating;
        let invoice = record.invoice.clone().unwrap_or_default();
        let validation = self.run_stage(
            &mut record,
            STAGE_VALIDATION,
            "match against purchase orders",
            |s| {
                let result = s.validation.validate(&invoice);
                let mut details = BTreeMap::new();
                details.insert("status".into(), json!(result.status.as_str()));
                details.insert("discrepancies".into(), json!(result.discrepancies.len()));
                if let Some(matched) = &result.matched_order {
                    details.insert("matched_order".into(), json!(matched.order_id));
                    details.insert("match_score".into(), json!(matched.match_score));
                }
                Ok::<_, PipelineError>((result, details))
            },
        );
        let validation = match validation {
            Ok(v) => v,
            Err(e) => return self.fail(record, e),
        };
        record.validation = Some(validation.clone());

        // ── risk_scoring ──
        if self.cancelled(&mut record) {
            return record;
        }
        record.status = ProcessingStatus::RiskScoring;
        let confidence = record.extraction_confidence.unwrap_or(0.0);
        let record_id = record.id;
        let assessment = self.run_stage(&mut record, STAGE_RISK, "assess payment risk", |s| {
            let assessment = s.risk.assess(&invoice, &validation, confidence, record_id);
            let mut details = BTreeMap::new();
            details.insert("score".into(), json!(assessment.score));
            details.insert("level".into(), json!(assessment.level.as_str()));
            details.insert(
                "indicators".into(),
                json!(assessment
                    .indicators
                    .iter()
                    .map(|i| i.as_str())
                    .collect::<Vec<_>>()),
            );
            Ok::<_, PipelineError>((assessment, details))
        });
        let assessment = match assessment {
            Ok(a) => a,
            Err(e) => return self.fail(record, e),
        };
        record.risk = Some(assessment.clone());

        // ── deciding ──
        if self.cancelled(&mut record) {
            return record;
        }
        record.status = ProcessingStatus::Deciding;
        let decision = self.run_stage(&mut record, STAGE_PAYMENT, "decide payment", |s| {
            let decision = s.payment.decide(&invoice, &validation, &assessment);
            let mut details = BTreeMap::new();
            details.insert("disposition".into(), json!(decision.disposition.as_str()));
            details.insert("method".into(), json!(decision.method.as_str()));
            details.insert("reason".into(), json!(decision.reason));
            if let Some(txn) = &decision.transaction_id {
                details.insert("transaction_id".into(), json!(txn));
            }
            Ok::<_, PipelineError>((decision, details))
        });
        let decision = match decision {
            Ok(d) => d,
            Err(e) => return self.fail(record, e),
        };
        record.payment = Some(decision.clone());

        // ── escalating | finalizing ──
        let needs_escalation = decision.disposition != Disposition::AutoApproved
            || matches!(
                validation.status,
                ValidationStatus::Invalid | ValidationStatus::NoMatch
            );
        if needs_escalation {
            let notice = self.run_stage(&mut record, STAGE_ESCALATION, "route to human review", |s| {
                let notice = s.escalation.escalate(Some(&decision));
                let mut details = BTreeMap::new();
                details.insert("reason".into(), json!(notice.reason));
                details.insert("triggered_by".into(), json!(notice.triggered_by));
                Ok::<_, PipelineError>((notice, details))
            });
            match notice {
                Ok(n) => {
                    record.escalation = Some(n);
                    record.status = ProcessingStatus::Escalated;
                }
                Err(e) => return self.fail(record, e),
            }
        } else {
            record.status = ProcessingStatus::Completed;
        }

        tracing::info!(status = ?record.status, "Invoice processing finished");
        record
    }

    /// Wrap one stage invocation with its audit and metrics bookkeeping:
    /// exactly one `started` entry, one terminal entry, and one metrics
    /// update, regardless of outcome.
    fn run_stage<T, E: Into<PipelineError>>(
        &self,
        record: &mut ProcessingRecord,
        stage: &str,
        action: &str,
        op: impl FnOnce(&Self) -> Result<(T, BTreeMap<String, serde_json::Value>), E>,
    ) -> Result<T, PipelineError> {
        record.add_audit_entry(stage, action, AuditStatus::Started, BTreeMap::new());
        let start = Instant::now();
        let result = op(self);
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok((value, details)) => {
                record.add_audit_entry(stage, action, AuditStatus::Completed, details);
                record.update_metrics(stage, true, duration_ms);
                Ok(value)
            }
            Err(e) => {
                let e = e.into();
                let mut details = BTreeMap::new();
                details.insert("error".into(), json!(e.to_string()));
                record.add_audit_entry(stage, action, AuditStatus::Failed, details);
                record.update_metrics(stage, false, duration_ms);
                Err(e)
            }
        }
    }

    fn cancelled(&self, record: &mut ProcessingRecord) -> bool {
        if self.cancel.load(Ordering::SeqCst) {
            tracing::warn!("Cancellation requested, stopping between stages");
            record.status = ProcessingStatus::Failed;
            record.add_audit_entry(
                "pipeline",
                "cancelled between stages",
                AuditStatus::Failed,
                BTreeMap::new(),
            );
            true
        } else {
            false
        }
    }

    /// Terminal handling for a stage error: the record is marked failed and
    /// still routed through escalation so a reviewer sees why it stopped.
    fn fail(&self, mut record: ProcessingRecord, error: PipelineError) -> ProcessingRecord {
        tracing::error!(error = %error, "Invoice processing failed");
        record.status = ProcessingStatus::Failed;
        let notice = self.run_stage(&mut record, STAGE_ESCALATION, "route to human review", |s| {
            let notice = s.escalation.escalate(None);
            let mut details = BTreeMap::new();
            details.insert("reason".into(), json!(notice.reason));
            details.insert("triggered_by".into(), json!(notice.triggered_by));
            Ok::<_, PipelineError>((notice, details))
        });
        if let Ok(n) = notice {
            record.escalation = Some(n);
        }
        record
    }
}
