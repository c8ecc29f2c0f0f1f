//! Invoice processing pipeline: stages and the orchestrator that
//! sequences them.

pub mod escalation;
pub mod extraction;
pub mod orchestrator;
pub mod payment;
pub mod risk;
pub mod validation;

pub use escalation::EscalationStage;
pub use extraction::{ExtractionError, ExtractionStage, HttpLlmClient, LlmClient};
pub use orchestrator::InvoicePipeline;
pub use payment::{HttpPaymentGateway, PaymentError, PaymentGateway, PaymentStage};
pub use risk::RiskStage;
pub use validation::{ValidationError, ValidationStage};

use thiserror::Error;

/// Fatal pipeline errors. Anything recoverable is absorbed by the stage
/// that hit it and recorded on the processing record instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error("Processing cancelled")]
    Cancelled,
}
