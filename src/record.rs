//! Shared processing state threaded through every pipeline stage.
//!
//! One `ProcessingRecord` exists per invoice. Each stage writes exactly one
//! field of it (extraction → `invoice`, validation → `validation`, ...) and
//! never touches the fields owned by other stages. The orchestrator is the
//! only writer of `status`, the audit trail, and the per-stage metrics.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ═══════════════════════════════════════════
// Invoice data
// ═══════════════════════════════════════════

/// One billed line on an invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(alias = "item_name")]
    pub name: String,
    pub quantity: u32,
    pub rate: f64,
    pub amount: f64,
}

impl LineItem {
    /// Whether `amount` is consistent with `quantity × rate` (1% slack for
    /// rounding in the source document).
    pub fn amount_consistent(&self) -> bool {
        let expected = f64::from(self.quantity) * self.rate;
        (self.amount - expected).abs() <= 0.01 * expected.abs().max(1.0)
    }
}

/// Structured billing facts extracted from one invoice document.
///
/// Every field is optional: the AI extraction returns `null` for anything it
/// cannot determine, and missing fields lower the extraction confidence
/// rather than failing the parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_date")]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub subtotal: Option<f64>,
    #[serde(default)]
    pub discount: Option<f64>,
    #[serde(default)]
    pub shipping_cost: Option<f64>,
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default, alias = "item_details")]
    pub line_items: Vec<LineItem>,
}

impl InvoiceRecord {
    /// Check the arithmetic identity `total = subtotal − discount + shipping`.
    ///
    /// Returns `None` when the fields needed to evaluate it are absent.
    /// A violation is a validation signal, never a hard rejection.
    pub fn totals_consistent(&self, tolerance: f64) -> Option<bool> {
        let (subtotal, total) = (self.subtotal?, self.total?);
        let expected =
            subtotal - self.discount.unwrap_or(0.0) + self.shipping_cost.unwrap_or(0.0);
        Some((total - expected).abs() <= tolerance * expected.abs().max(1.0))
    }
}

/// Accept `"2024-12-31"` style dates, mapping anything unparseable to `None`
/// instead of failing the whole record.
fn lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| s.trim().parse::<NaiveDate>().ok()))
}

// ═══════════════════════════════════════════
// Stage outputs
// ═══════════════════════════════════════════

/// Outcome of matching an invoice against the purchase-order catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Valid,
    Invalid,
    NoMatch,
    PartialMatch,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::NoMatch => "no_match",
            Self::PartialMatch => "partial_match",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancySeverity {
    Low,
    Medium,
    High,
}

/// Reference to the catalog row an invoice matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedOrder {
    pub invoice_number: String,
    pub order_id: String,
    pub customer_name: String,
    pub total: f64,
    /// 0–100 similarity for fuzzy matches; 100 for exact identifier matches.
    pub match_score: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub status: ValidationStatus,
    pub matched_order: Option<MatchedOrder>,
    /// Discrepancy description → severity (`amount_mismatch`, `name_mismatch`, ...).
    pub discrepancies: BTreeMap<String, DiscrepancySeverity>,
    /// Whether the customer appears anywhere in the catalog. Consumed by the
    /// risk stage as the novelty signal.
    pub customer_recognized: bool,
}

/// Discrete banding of the continuous risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Rule-based fraud signals, independent of the numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FraudIndicator {
    /// Customer name contains a flagged substring.
    FlaggedCustomerName,
    /// Total sits exactly on a configured approval threshold.
    AmountAtThresholdBoundary,
    /// Total far exceeds the configured large-amount reference.
    AnomalouslyHighAmount,
    /// Invoice number already seen on a different processing run.
    DuplicateInvoiceNumber,
}

impl FraudIndicator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FlaggedCustomerName => "flagged_customer_name",
            Self::AmountAtThresholdBoundary => "amount_at_threshold_boundary",
            Self::AnomalouslyHighAmount => "anomalously_high_amount",
            Self::DuplicateInvoiceNumber => "duplicate_invoice_number",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Clamped to [0, 1].
    pub score: f64,
    pub level: RiskLevel,
    pub indicators: Vec<FraudIndicator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    AutoApproved,
    ManualApprovalRequired,
    Rejected,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoApproved => "auto_approved",
            Self::ManualApprovalRequired => "manual_approval_required",
            Self::Rejected => "rejected",
        }
    }
}

/// Selected by amount band, independent of the disposition, so an eventual
/// approval can execute without recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    InstantTransfer,
    AchBatch,
    WireTransfer,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InstantTransfer => "instant_transfer",
            Self::AchBatch => "ach_batch",
            Self::WireTransfer => "wire_transfer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentDecision {
    pub disposition: Disposition,
    pub method: PaymentMethod,
    /// Populated once the gateway accepts the payment.
    pub transaction_id: Option<String>,
    pub reason: String,
}

/// Marker that the invoice left automatic processing for human review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationNotice {
    pub reason: String,
    pub triggered_by: String,
    pub escalated_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════
// Audit trail & metrics
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Started,
    Completed,
    Failed,
}

/// Immutable record of one stage transition. Entries are append-only and
/// chronological; the orchestrator writes exactly one `started` and one
/// terminal entry per stage invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub stage: String,
    pub action: String,
    pub status: AuditStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
}

/// Running per-stage counters. The average is maintained as a running mean,
/// never recomputed from history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_duration_ms: u64,
    pub average_duration_ms: f64,
}

impl AgentMetrics {
    pub fn record(&mut self, success: bool, duration_ms: u64) {
        self.executions += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.total_duration_ms += duration_ms;
        let delta = duration_ms as f64 - self.average_duration_ms;
        self.average_duration_ms += delta / self.executions as f64;
    }

    /// Fold another counter set into this one (used by the cross-run registry).
    pub fn merge(&mut self, other: &AgentMetrics) {
        if other.executions == 0 {
            return;
        }
        let combined = self.executions + other.executions;
        self.average_duration_ms = (self.average_duration_ms * self.executions as f64
            + other.average_duration_ms * other.executions as f64)
            / combined as f64;
        self.executions = combined;
        self.successes += other.successes;
        self.failures += other.failures;
        self.total_duration_ms += other.total_duration_ms;
    }
}

// ═══════════════════════════════════════════
// Processing record
// ═══════════════════════════════════════════

/// Overall lifecycle of one invoice run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Extracting,
    Validating,
    RiskScoring,
    Deciding,
    Escalated,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Escalated | Self::Completed | Self::Failed)
    }
}

/// The aggregate state for one invoice, exclusively owned by its pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingRecord {
    pub id: Uuid,
    pub file_name: String,
    pub status: ProcessingStatus,
    pub invoice: Option<InvoiceRecord>,
    /// Confidence reported by the extraction stage, in [0, 1].
    pub extraction_confidence: Option<f64>,
    pub validation: Option<ValidationResult>,
    pub risk: Option<RiskAssessment>,
    pub payment: Option<PaymentDecision>,
    pub escalation: Option<EscalationNotice>,
    pub audit_trail: Vec<AuditEntry>,
    pub metrics: HashMap<String, AgentMetrics>,
    pub created_at: DateTime<Utc>,
}

impl ProcessingRecord {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_name: file_name.into(),
            status: ProcessingStatus::Pending,
            invoice: None,
            extraction_confidence: None,
            validation: None,
            risk: None,
            payment: None,
            escalation: None,
            audit_trail: Vec::new(),
            metrics: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn add_audit_entry(
        &mut self,
        stage: &str,
        action: &str,
        status: AuditStatus,
        details: BTreeMap<String, serde_json::Value>,
    ) {
        self.audit_trail.push(AuditEntry {
            stage: stage.to_string(),
            action: action.to_string(),
            status,
            timestamp: Utc::now(),
            details,
        });
    }

    pub fn update_metrics(&mut self, stage: &str, success: bool, duration_ms: u64) {
        self.metrics
            .entry(stage.to_string())
            .or_default()
            .record(success, duration_ms);
    }

    /// Terminal once a payment decision or escalation exists, or a stage
    /// reported a fatal error.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
