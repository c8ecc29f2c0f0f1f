//! Pipeline configuration.
//!
//! One immutable `PipelineConfig` is built at startup and handed to each
//! stage at construction. No stage reads ambient or global state.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Text backends attempted in order until one yields usable text.
    pub backend_priority: Vec<String>,
    /// Below this confidence the extraction is recorded as degraded and
    /// feeds into risk scoring; it never blocks the pipeline.
    pub confidence_threshold: f64,
    /// Structured-extraction AI endpoint.
    pub ai_base_url: String,
    pub ai_model: String,
    pub ai_timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            backend_priority: vec!["text_layer".into(), "structural".into()],
            confidence_threshold: 0.7,
            ai_base_url: "http://localhost:11434".into(),
            ai_model: "llama3:8b".into(),
            ai_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// CSV purchase-order catalog.
    pub catalog_path: PathBuf,
    /// Minimum 0–100 similarity for a fuzzy catalog match.
    pub fuzzy_threshold: u8,
    /// Relative tolerance when comparing invoice total to the catalog total.
    pub amount_tolerance: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            catalog_path: PathBuf::from("data/purchase_orders.csv"),
            fuzzy_threshold: 80,
            amount_tolerance: 0.05,
        }
    }
}

/// Band floors for the discrete risk levels. Each band is the closed-open
/// interval from its own cutoff up to the next; scores below `medium` are
/// low, and the critical band is closed at 1.0.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            low: 0.3,
            medium: 0.6,
            high: 0.8,
            critical: 0.9,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub thresholds: RiskThresholds,
    /// Amount at which the magnitude signal saturates to 1.0.
    pub large_amount_reference: f64,
    /// Additive score boost per fraud indicator present.
    pub indicator_boost: f64,
    /// Substrings that flag a customer name as suspicious.
    pub flagged_name_terms: Vec<String>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            thresholds: RiskThresholds::default(),
            large_amount_reference: 10_000.0,
            indicator_boost: 0.05,
            flagged_name_terms: vec![
                "test".into(),
                "fraud".into(),
                "fake".into(),
                "suspicious".into(),
                "unknown".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaymentConfig {
    pub gateway_url: String,
    pub gateway_timeout_secs: u64,
    /// At or below this total, low/medium-risk valid invoices auto-approve.
    pub auto_payment_threshold: f64,
    /// Above this total, approval is always manual.
    pub manual_approval_threshold: f64,
    /// Amount bands for payment-method selection.
    pub instant_transfer_limit: f64,
    pub ach_batch_limit: f64,
    /// Gateway retry policy.
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            gateway_url: "http://localhost:8000".into(),
            gateway_timeout_secs: 10,
            auto_payment_threshold: 5_000.0,
            manual_approval_threshold: 25_000.0,
            instant_transfer_limit: 1_000.0,
            ach_batch_limit: 10_000.0,
            max_retries: 3,
            retry_base_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub extraction: ExtractionConfig,
    pub validation: ValidationConfig,
    pub risk: RiskConfig,
    pub payment: PaymentConfig,
    /// Maximum invoices processed concurrently by the batch runner.
    pub concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extraction: ExtractionConfig::default(),
            validation: ValidationConfig::default(),
            risk: RiskConfig::default(),
            payment: PaymentConfig::default(),
            concurrency: 4,
        }
    }
}

impl PipelineConfig {
    /// Load from a TOML file. Absent keys fall back to defaults section by
    /// section, so a partial config file is valid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
