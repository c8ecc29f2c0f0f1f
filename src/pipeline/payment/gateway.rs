//! Outbound payment gateway client.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::PaymentError;

#[derive(Debug, Clone, Serialize)]
pub struct PaymentRequest {
    pub order_id: String,
    pub customer_name: String,
    pub amount: f64,
    pub due_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayReceipt {
    pub transaction_id: String,
    pub status: String,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct GatewayHealth {
    pub status: String,
    pub timestamp: String,
}

/// Boundary trait so tests (and a dry-run mode) can stand in for the
/// real HTTP gateway.
pub trait PaymentGateway: Send + Sync {
    fn initiate_payment(&self, request: &PaymentRequest) -> Result<GatewayReceipt, PaymentError>;

    fn health(&self) -> Result<GatewayHealth, PaymentError>;
}

pub struct HttpPaymentGateway {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpPaymentGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn map_transport_error(err: reqwest::Error) -> PaymentError {
        if err.is_timeout() {
            PaymentError::Timeout(err.to_string())
        } else {
            PaymentError::Transport(err.to_string())
        }
    }
}

impl PaymentGateway for HttpPaymentGateway {
    fn initiate_payment(&self, request: &PaymentRequest) -> Result<GatewayReceipt, PaymentError> {
        let url = format!("{}/initiate_payment", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .map_err(Self::map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(PaymentError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<GatewayReceipt>()
            .map_err(|e| PaymentError::InvalidResponse(e.to_string()))
    }

    fn health(&self) -> Result<GatewayHealth, PaymentError> {
        let url = format!("{}/health", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(Self::map_transport_error)?;

        if !response.status().is_success() {
            return Err(PaymentError::Transport(format!(
                "health check returned {}",
                response.status()
            )));
        }

        response
            .json::<GatewayHealth>()
            .map_err(|e| PaymentError::InvalidResponse(e.to_string()))
    }
}
