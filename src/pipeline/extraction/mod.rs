pub mod backends;
pub mod confidence;
pub mod stage;
pub mod structurer;

pub use backends::{build_backends, run_backends, TextBackend};
pub use confidence::compute_extraction_confidence;
pub use stage::{ExtractionOutcome, ExtractionStage};
pub use structurer::{HttpLlmClient, LlmClient};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PDF parsing failed: {0}")]
    PdfParsing(String),

    #[error("Document appears to be scanned/image-only")]
    ScannedDocument,

    #[error("Backend produced no usable text")]
    EmptyText,

    #[error("All text-extraction backends failed")]
    AllBackendsFailed,

    #[error("Unknown extraction backend: {0}")]
    UnknownBackend(String),

    #[error("AI service unreachable at {0}")]
    ServiceUnavailable(String),

    #[error("AI service timed out after {0}s")]
    ServiceTimeout(u64),

    #[error("AI service error {status}: {body}")]
    ServiceError { status: u16, body: String },

    #[error("AI response does not match the invoice schema: {0}")]
    ParseError(String),
}

impl ExtractionError {
    /// Transport-level failures worth retrying with backoff. Parse errors
    /// are handled separately via one stricter-prompt retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ServiceUnavailable(_) | Self::ServiceTimeout(_) | Self::ServiceError { .. }
        )
    }
}
