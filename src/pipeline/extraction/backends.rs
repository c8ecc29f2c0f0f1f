//! Text-extraction backends, attempted in configured priority order.
//!
//! A backend failure is non-fatal: the next backend in the priority list is
//! tried. Only when every backend has failed does extraction abort.

use lopdf::Document;

use super::ExtractionError;

/// Minimum non-whitespace characters for text to count as a real text layer.
/// Below this the document is treated as scanned.
const MIN_TEXT_CHARS: usize = 30;

pub trait TextBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Extract raw text from PDF bytes. `EmptyText` and `ScannedDocument`
    /// fall through to the next backend.
    fn extract(&self, pdf_bytes: &[u8]) -> Result<String, ExtractionError>;
}

/// Primary backend: the document's embedded text layer via `pdf-extract`.
pub struct TextLayerBackend;

impl TextBackend for TextLayerBackend {
    fn name(&self) -> &'static str {
        "text_layer"
    }

    fn extract(&self, pdf_bytes: &[u8]) -> Result<String, ExtractionError> {
        let text = pdf_extract::extract_text_from_mem(pdf_bytes)
            .map_err(|e| ExtractionError::PdfParsing(e.to_string()))?;
        require_meaningful(text)
    }
}

/// Fallback backend: walk the PDF object tree with `lopdf` and pull text
/// from each page's content streams. Catches documents whose text layer
/// confuses the primary extractor. Declines scanned documents instead of
/// returning garbage.
pub struct StructuralBackend;

impl TextBackend for StructuralBackend {
    fn name(&self) -> &'static str {
        "structural"
    }

    fn extract(&self, pdf_bytes: &[u8]) -> Result<String, ExtractionError> {
        let doc = Document::load_mem(pdf_bytes)
            .map_err(|e| ExtractionError::PdfParsing(e.to_string()))?;

        if looks_like_scanned(&doc) {
            return Err(ExtractionError::ScannedDocument);
        }

        let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
        let text = doc
            .extract_text(&page_numbers)
            .map_err(|e| ExtractionError::PdfParsing(e.to_string()))?;
        require_meaningful(text)
    }
}

fn require_meaningful(text: String) -> Result<String, ExtractionError> {
    let meaningful = text.chars().filter(|c| !c.is_whitespace()).count();
    if meaningful < MIN_TEXT_CHARS {
        tracing::info!(chars = meaningful, "Extracted text too short to be usable");
        Err(ExtractionError::EmptyText)
    } else {
        Ok(text)
    }
}

/// Heuristic: a page with XObject images but no Font resources is almost
/// certainly a scan. If ≥80% of pages look like that, so does the document.
fn looks_like_scanned(doc: &Document) -> bool {
    let pages = doc.get_pages();
    if pages.is_empty() {
        return false;
    }

    let mut image_only_pages = 0usize;
    for object_id in pages.values() {
        let Ok(page_obj) = doc.get_object(*object_id) else {
            continue;
        };
        let Ok(page_dict) = page_obj.as_dict() else {
            continue;
        };

        let resource_dict = |key: &[u8]| {
            page_dict
                .get(b"Resources")
                .ok()
                .and_then(|r| doc.dereference(r).ok())
                .and_then(|(_, resolved)| resolved.as_dict().ok())
                .and_then(|res| res.get(key).ok())
                .and_then(|v| doc.dereference(v).ok())
                .and_then(|(_, resolved)| resolved.as_dict().ok())
                .is_some_and(|d| !d.is_empty())
        };

        if resource_dict(b"XObject") && !resource_dict(b"Font") {
            image_only_pages += 1;
        }
    }

    image_only_pages as f64 / pages.len() as f64 >= 0.8
}

/// Resolve a configured priority list into backend instances.
pub fn build_backends(priority: &[String]) -> Result<Vec<Box<dyn TextBackend>>, ExtractionError> {
    priority
        .iter()
        .map(|name| match name.as_str() {
            "text_layer" => Ok(Box::new(TextLayerBackend) as Box<dyn TextBackend>),
            "structural" => Ok(Box::new(StructuralBackend) as Box<dyn TextBackend>),
            other => Err(ExtractionError::UnknownBackend(other.to_string())),
        })
        .collect()
}

/// Try each backend in order; the first usable text wins. Returns the text
/// together with the name of the backend that produced it.
pub fn run_backends(
    backends: &[Box<dyn TextBackend>],
    pdf_bytes: &[u8],
) -> Result<(String, &'static str), ExtractionError> {
    for backend in backends {
        match backend.extract(pdf_bytes) {
            Ok(text) => {
                tracing::info!(backend = backend.name(), chars = text.len(), "Text extracted");
                return Ok((text, backend.name()));
            }
            Err(e) => {
                tracing::warn!(
                    backend = backend.name(),
                    error = %e,
                    "Backend failed, falling through"
                );
            }
        }
    }
    Err(ExtractionError::AllBackendsFailed)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a minimal one-page PDF with a text layer, using lopdf directly.
    pub(crate) fn make_test_pdf(text: &str) -> Vec<u8> {
        use lopdf::dictionary;
        use lopdf::{Object, Stream};

        let mut doc = Document::with_version("1.4");

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });

        let content = format!("BT /F1 12 Tf 100 700 Td ({text}) Tj ET");
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

        let resources = dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        };

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
            "Resources" => resources,
        });

        let pages_id = doc.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        });

        if let Ok(Object::Dictionary(dict)) = doc.get_object_mut(page_id) {
            dict.set("Parent", pages_id);
        }

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn garbage_bytes_fail_to_parse() {
        let result = StructuralBackend.extract(b"this is not a pdf");
        assert!(matches!(result, Err(ExtractionError::PdfParsing(_))));
    }

    #[test]
    fn text_layer_backend_reads_embedded_text() {
        let pdf = make_test_pdf("Invoice INV-001 Total 110.00 Customer Test Corp Ltd");
        let text = TextLayerBackend.extract(&pdf).unwrap();
        assert!(text.contains("INV-001"));
    }

    #[test]
    fn short_text_counts_as_empty() {
        let pdf = make_test_pdf("hi");
        let result = TextLayerBackend.extract(&pdf);
        assert!(matches!(result, Err(ExtractionError::EmptyText)));
    }

    #[test]
    fn fallthrough_reaches_second_backend() {
        /// Backend that always declines.
        struct AlwaysFails;
        impl TextBackend for AlwaysFails {
            fn name(&self) -> &'static str {
                "always_fails"
            }
            fn extract(&self, _: &[u8]) -> Result<String, ExtractionError> {
                Err(ExtractionError::EmptyText)
            }
        }

        let backends: Vec<Box<dyn TextBackend>> =
            vec![Box::new(AlwaysFails), Box::new(TextLayerBackend)];
        let pdf = make_test_pdf("Invoice INV-002 for Acme Industrial Supplies Pte Ltd");
        let (text, backend) = run_backends(&backends, &pdf).unwrap();
        assert_eq!(backend, "text_layer");
        assert!(text.contains("INV-002"));
    }

    #[test]
    fn all_backends_failing_is_fatal() {
        let backends = build_backends(&["text_layer".into(), "structural".into()]).unwrap();
        let result = run_backends(&backends, b"not a pdf at all");
        assert!(matches!(result, Err(ExtractionError::AllBackendsFailed)));
    }

    #[test]
    fn unknown_backend_name_rejected() {
        let result = build_backends(&["ocr_cloud".into()]);
        assert!(matches!(result, Err(ExtractionError::UnknownBackend(_))));
    }

    #[test]
    fn priority_order_is_respected() {
        let backends =
            build_backends(&["structural".into(), "text_layer".into()]).unwrap();
        assert_eq!(backends[0].name(), "structural");
        assert_eq!(backends[1].name(), "text_layer");
    }
}
