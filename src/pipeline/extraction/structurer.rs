//! Structured extraction: raw invoice text → `InvoiceRecord` via an AI call.
//!
//! The AI boundary is modeled strictly: the response either satisfies the
//! declared schema or the attempt fails with `ParseError`. A malformed
//! response is retried exactly once with a stricter prompt before the
//! failure becomes fatal for the invoice.

use serde::{Deserialize, Serialize};

use super::ExtractionError;
use crate::record::InvoiceRecord;

/// Truncation limit keeping the prompt inside the model's context window.
const MAX_PROMPT_CHARS: usize = 12_000;

pub const SCHEMA_SYSTEM_PROMPT: &str = r#"You are an invoice data extraction assistant.
Given raw text extracted from a PDF invoice, extract structured data and return ONLY valid JSON.

The JSON must match this schema exactly:
{
  "invoice_number": "string or null",
  "order_id": "string or null",
  "customer_name": "string or null",
  "due_date": "YYYY-MM-DD or null",
  "subtotal": number or null,
  "discount": number or null,
  "shipping_cost": number or null,
  "total": number or null,
  "item_details": [
    {
      "item_name": "string",
      "quantity": integer,
      "rate": number,
      "amount": number
    }
  ]
}

Notes:
- The text may be garbled due to PDF column extraction issues. Do your best to reconstruct the data.
- Use null for fields you cannot determine.
- Return ONLY the JSON object, no markdown fences, no commentary."#;

/// Follow-up prompt used after a malformed first response.
pub const STRICT_SYSTEM_PROMPT: &str = r#"Your previous answer was not valid JSON. Respond again.
Output a single JSON object and NOTHING else: no prose, no markdown fences, no reasoning.
The object must contain exactly these keys: invoice_number, order_id, customer_name,
due_date, subtotal, discount, shipping_cost, total, item_details.
Use null for unknown values. item_details is an array of objects with keys
item_name, quantity, rate, amount."#;

pub trait LlmClient: Send + Sync {
    fn generate(&self, prompt: &str, system: &str) -> Result<String, ExtractionError>;
}

/// HTTP client for an Ollama-compatible generation endpoint.
pub struct HttpLlmClient {
    base_url: String,
    model: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl HttpLlmClient {
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Result<Self, ExtractionError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ExtractionError::ServiceUnavailable(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
            timeout_secs,
        })
    }
}

impl LlmClient for HttpLlmClient {
    fn generate(&self, prompt: &str, system: &str) -> Result<String, ExtractionError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            system,
            stream: false,
        };

        let response = self.client.post(&url).json(&body).send().map_err(|e| {
            if e.is_connect() {
                ExtractionError::ServiceUnavailable(self.base_url.clone())
            } else if e.is_timeout() {
                ExtractionError::ServiceTimeout(self.timeout_secs)
            } else {
                ExtractionError::ServiceUnavailable(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ExtractionError::ServiceError {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .map_err(|e| ExtractionError::ParseError(e.to_string()))?;
        Ok(parsed.response)
    }
}

/// Result of structuring one document, including whether the stricter
/// retry prompt was needed (recorded in the audit trail).
#[derive(Debug)]
pub struct StructuredInvoice {
    pub invoice: InvoiceRecord,
    pub parse_retried: bool,
}

/// Run the text through the AI service and parse the response into an
/// `InvoiceRecord`. One stricter-prompt retry on parse failure, then fatal.
pub fn structure_invoice(
    llm: &dyn LlmClient,
    raw_text: &str,
) -> Result<StructuredInvoice, ExtractionError> {
    let text = truncate_at_char_boundary(raw_text, MAX_PROMPT_CHARS);
    let prompt = format!("Extract invoice data from the following PDF text:\n\n{text}");

    let first = llm.generate(&prompt, SCHEMA_SYSTEM_PROMPT)?;
    match parse_invoice_response(&first) {
        Ok(invoice) => Ok(StructuredInvoice {
            invoice,
            parse_retried: false,
        }),
        Err(first_err) => {
            tracing::warn!(error = %first_err, "Malformed AI response, retrying with strict prompt");
            let second = llm.generate(&prompt, STRICT_SYSTEM_PROMPT)?;
            let invoice = parse_invoice_response(&second)?;
            Ok(StructuredInvoice {
                invoice,
                parse_retried: true,
            })
        }
    }
}

/// Parse the model's textual payload as an `InvoiceRecord`, tolerating
/// markdown fences and surrounding prose but nothing structurally wrong.
pub fn parse_invoice_response(response: &str) -> Result<InvoiceRecord, ExtractionError> {
    let stripped = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let json_str = extract_json_object(stripped)?;
    serde_json::from_str(json_str).map_err(|e| ExtractionError::ParseError(e.to_string()))
}

/// Slice out the outermost JSON object; some models prepend reasoning text.
fn extract_json_object(s: &str) -> Result<&str, ExtractionError> {
    let start = s
        .find('{')
        .ok_or_else(|| ExtractionError::ParseError("no '{' in response".into()))?;
    let end = s
        .rfind('}')
        .ok_or_else(|| ExtractionError::ParseError("no '}' in response".into()))?;
    if end <= start {
        return Err(ExtractionError::ParseError("malformed JSON object".into()));
    }
    Ok(&s[start..=end])
}

fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
