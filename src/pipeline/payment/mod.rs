//! Payment decisioning and gateway submission.

mod gateway;
mod stage;

#[cfg(test)]
pub(crate) use stage::tests;

pub use gateway::{GatewayHealth, GatewayReceipt, HttpPaymentGateway, PaymentGateway, PaymentRequest};
pub use stage::PaymentStage;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Payment gateway unreachable: {0}")]
    Transport(String),

    #[error("Payment gateway timed out: {0}")]
    Timeout(String),

    #[error("Payment gateway rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Unexpected gateway response: {0}")]
    InvalidResponse(String),
}

impl PaymentError {
    /// Transport-level failures are worth retrying; an explicit gateway
    /// rejection or a garbled body is not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}
