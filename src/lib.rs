//! ClearBill — automated invoice processing.
//!
//! Turns PDF invoices into approved-or-escalated payment actions:
//! text extraction with backend fallback, AI-assisted structuring,
//! purchase-order validation, risk scoring, payment decisioning, and a
//! complete per-stage audit trail. See [`pipeline::InvoicePipeline`] for
//! the entry point and [`batch::BatchProcessor`] for concurrent runs.

pub mod batch;
pub mod config;
pub mod pipeline;
pub mod record;
pub mod retry;

pub use config::PipelineConfig;
pub use pipeline::{InvoicePipeline, PipelineError};
pub use record::{ProcessingRecord, ProcessingStatus};
