//! PDF text extraction.
//!
//! Extracts text page by page and joins pages with blank lines; the title
//! comes from the document information dictionary when one exists.

use lopdf::{Document, Object};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("not a PDF document")]
    InvalidHeader,
    #[error("pdf parse failed: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("document has no pages")]
    NoPages,
}

/// Result of one extraction pass.
#[derive(Debug, Clone)]
pub struct PdfExtraction {
    pub title: Option<String>,
    pub text: String,
    pub page_count: usize,
}

/// Extract text from PDF bytes.
///
/// Pages that fail individually are skipped with a warning; the document
/// only errors when nothing at all can be parsed.
pub fn extract_text(data: &[u8]) -> Result<PdfExtraction, PdfError> {
    if data.len() < 10 || !data.starts_with(b"%PDF-") {
        return Err(PdfError::InvalidHeader);
    }

    let document = Document::load_mem(data)?;
    let pages = document.get_pages();
    if pages.is_empty() {
        return Err(PdfError::NoPages);
    }

    let mut parts: Vec<String> = Vec::with_capacity(pages.len());
    for page_number in pages.keys() {
        match document.extract_text(&[*page_number]) {
            Ok(text) => {
                let text = text.trim().to_string();
                if !text.is_empty() {
                    parts.push(text);
                }
            }
            Err(err) => {
                warn!(page = page_number, error = %err, "skipping unreadable pdf page");
            }
        }
    }

    let title = info_title(&document);
    debug!(pages = pages.len(), chars = parts.iter().map(String::len).sum::<usize>(), "pdf text extracted");

    Ok(PdfExtraction {
        title,
        text: parts.join("\n\n"),
        page_count: pages.len(),
    })
}

/// Title from the `/Info` dictionary, when present and non-empty.
fn info_title(document: &Document) -> Option<String> {
    let info = document.trailer.get(b"Info").ok()?;
    let info_dict = match info {
        Object::Reference(id) => document.get_object(*id).ok()?.as_dict().ok()?,
        Object::Dictionary(dict) => dict,
        _ => return None,
    };
    match info_dict.get(b"Title").ok()? {
        Object::String(bytes, _) => {
            let title = String::from_utf8_lossy(bytes).trim().to_string();
            (!title.is_empty()).then_some(title)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    #[test]
    fn rejects_non_pdf_bytes() {
        assert!(matches!(
            extract_text(b"<html>not a pdf</html>"),
            Err(PdfError::InvalidHeader)
        ));
        assert!(matches!(extract_text(b"%PDF"), Err(PdfError::InvalidHeader)));
    }

    #[test]
    fn extracts_minimal_document() {
        // Smallest well-formed document lopdf can author and re-read.
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(lopdf::dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(lopdf::dictionary! {
            "Font" => lopdf::dictionary! { "F1" => font_id },
        });
        let content = lopdf::content::Content {
            operations: vec![
                lopdf::content::Operation::new("BT", vec![]),
                lopdf::content::Operation::new("Tf", vec!["F1".into(), 24.into()]),
                lopdf::content::Operation::new("Td", vec![100.into(), 600.into()]),
                lopdf::content::Operation::new(
                    "Tj",
                    vec![Object::string_literal("Budget report for the year")],
                ),
                lopdf::content::Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Object::Stream(lopdf::Stream::new(
            lopdf::dictionary! {},
            content.encode().unwrap(),
        )));
        let page_id = doc.add_object(lopdf::dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        let pages = lopdf::dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(lopdf::dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();

        let extraction = extract_text(&bytes).unwrap();
        assert_eq!(extraction.page_count, 1);
        assert!(extraction.text.contains("Budget report"));
    }
}
