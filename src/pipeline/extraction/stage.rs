//! Extraction stage: document reference → structured invoice + confidence.

use std::path::Path;

use super::backends::{build_backends, run_backends, TextBackend};
use super::confidence::compute_extraction_confidence;
use super::structurer::{structure_invoice, LlmClient};
use super::ExtractionError;
use crate::config::ExtractionConfig;
use crate::record::InvoiceRecord;
use crate::retry::RetryPolicy;

pub struct ExtractionStage {
    backends: Vec<Box<dyn TextBackend>>,
    llm: Box<dyn LlmClient>,
    retry: RetryPolicy,
    confidence_threshold: f64,
}

/// Everything the extraction stage learned about one document.
#[derive(Debug)]
pub struct ExtractionOutcome {
    pub invoice: InvoiceRecord,
    /// In [0, 1]. Below-threshold values are recorded, never fatal.
    pub confidence: f64,
    pub backend: &'static str,
    pub raw_text_chars: usize,
    /// Whether the stricter-prompt parse retry was needed.
    pub parse_retried: bool,
    /// Whether confidence fell below the configured threshold.
    pub low_confidence: bool,
}

impl ExtractionStage {
    pub fn new(
        config: &ExtractionConfig,
        llm: Box<dyn LlmClient>,
        retry: RetryPolicy,
    ) -> Result<Self, ExtractionError> {
        Ok(Self {
            backends: build_backends(&config.backend_priority)?,
            llm,
            retry,
            confidence_threshold: config.confidence_threshold,
        })
    }

    /// Process one document from disk. An unreadable or missing file is an
    /// immediate fatal error for this invoice.
    pub fn run(&self, path: &Path) -> Result<ExtractionOutcome, ExtractionError> {
        let pdf_bytes = std::fs::read(path)?;
        self.run_bytes(&pdf_bytes)
    }

    pub fn run_bytes(&self, pdf_bytes: &[u8]) -> Result<ExtractionOutcome, ExtractionError> {
        let (raw_text, backend) = run_backends(&self.backends, pdf_bytes)?;

        // Transport failures toward the AI service are retried with backoff;
        // parse failures get their single stricter retry inside.
        let structured = self
            .retry
            .run(ExtractionError::is_transient, |_| {
                structure_invoice(self.llm.as_ref(), &raw_text)
            })?;

        let confidence = compute_extraction_confidence(&structured.invoice, &raw_text);
        let low_confidence = confidence < self.confidence_threshold;
        if low_confidence {
            tracing::info!(
                confidence,
                threshold = self.confidence_threshold,
                "Extraction confidence below threshold"
            );
        }

        Ok(ExtractionOutcome {
            invoice: structured.invoice,
            confidence,
            backend,
            raw_text_chars: raw_text.len(),
            parse_retried: structured.parse_retried,
            low_confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::backends::tests::make_test_pdf;
    use crate::pipeline::extraction::structurer::tests::{FlakyLlm, MockLlm, VALID_RESPONSE};

    fn stage_with(llm: Box<dyn LlmClient>) -> ExtractionStage {
        ExtractionStage::new(&ExtractionConfig::default(), llm, RetryPolicy::none()).unwrap()
    }

    fn invoice_pdf() -> Vec<u8> {
        make_test_pdf(
            "INVOICE INV-001 Test Customer order ORD-001 subtotal 100.00 \
             shipping 10.00 total 110.00 due 2023-12-31",
        )
    }

    #[test]
    fn full_extraction_from_pdf_bytes() {
        let stage = stage_with(Box::new(MockLlm::new(VALID_RESPONSE)));
        let outcome = stage.run_bytes(&invoice_pdf()).unwrap();

        assert_eq!(outcome.invoice.invoice_number.as_deref(), Some("INV-001"));
        assert_eq!(outcome.backend, "text_layer");
        assert!((0.0..=1.0).contains(&outcome.confidence));
        assert!(!outcome.parse_retried);
    }

    #[test]
    fn missing_file_is_fatal() {
        let stage = stage_with(Box::new(MockLlm::new(VALID_RESPONSE)));
        let result = stage.run(Path::new("/nonexistent/invoice.pdf"));
        assert!(matches!(result, Err(ExtractionError::Io(_))));
    }

    #[test]
    fn malformed_first_response_recovers_via_strict_retry() {
        let stage = stage_with(Box::new(FlakyLlm::new(1)));
        let outcome = stage.run_bytes(&invoice_pdf()).unwrap();
        assert!(outcome.parse_retried);
        assert_eq!(outcome.invoice.total, Some(110.0));
    }

    #[test]
    fn unusable_document_fails_before_reaching_llm() {
        /// Client that panics if reached.
        struct UnreachableLlm;
        impl LlmClient for UnreachableLlm {
            fn generate(&self, _: &str, _: &str) -> Result<String, ExtractionError> {
                panic!("LLM must not be called for an unextractable document");
            }
        }

        let stage = stage_with(Box::new(UnreachableLlm));
        let result = stage.run_bytes(b"definitely not a pdf");
        assert!(matches!(result, Err(ExtractionError::AllBackendsFailed)));
    }

    #[test]
    fn low_confidence_is_flagged_not_fatal() {
        // Sparse response: most required fields null.
        let sparse = r#"{"invoice_number": null, "order_id": null, "customer_name": null,
            "due_date": null, "subtotal": null, "discount": null, "shipping_cost": null,
            "total": 110.0, "item_details": []}"#;
        let stage = stage_with(Box::new(MockLlm::new(sparse)));
        let outcome = stage.run_bytes(&invoice_pdf()).unwrap();
        assert!(outcome.low_confidence);
        assert!(outcome.confidence < 0.7);
    }

    #[test]
    fn transient_service_errors_are_retried() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        /// Fails with a transport error once, then succeeds.
        struct TransientLlm {
            calls: AtomicUsize,
        }
        impl LlmClient for TransientLlm {
            fn generate(&self, _: &str, _: &str) -> Result<String, ExtractionError> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ExtractionError::ServiceTimeout(1))
                } else {
                    Ok(VALID_RESPONSE.to_string())
                }
            }
        }

        let stage = ExtractionStage::new(
            &ExtractionConfig::default(),
            Box::new(TransientLlm { calls: AtomicUsize::new(0) }),
            RetryPolicy::new(3, std::time::Duration::from_millis(1)),
        )
        .unwrap();

        let outcome = stage.run_bytes(&invoice_pdf()).unwrap();
        assert_eq!(outcome.invoice.invoice_number.as_deref(), Some("INV-001"));
    }
}
