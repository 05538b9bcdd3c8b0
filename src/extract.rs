//! Text extraction for uploaded files (PDF, DOCX, plain text, Markdown).
//!
//! Callers supply bytes plus a content type (usually derived from the file
//! extension via [`content_type_for`]); this module returns plain UTF-8
//! text or [`RagError::UnsupportedFormat`]. Extraction never panics on
//! malformed input.

use std::io::Read;
use std::path::Path;

use ragchat_core::error::{RagError, Result};

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_DOC: &str = "application/msword";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Map a file name's extension to a content type.
pub fn content_type_for(name: &str) -> Option<&'static str> {
    let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(MIME_PDF),
        "docx" => Some(MIME_DOCX),
        "doc" => Some(MIME_DOC),
        "txt" => Some(MIME_TEXT),
        "md" | "markdown" => Some(MIME_MARKDOWN),
        _ => None,
    }
}

/// Extract plain text from `bytes` of the given content type.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String> {
    match content_type {
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => extract_docx(bytes),
        MIME_TEXT | MIME_MARKDOWN => decode_utf8(bytes),
        MIME_DOC => Err(RagError::UnsupportedFormat(
            "legacy .doc files are not supported; save as .docx".to_string(),
        )),
        _ => Err(RagError::UnsupportedFormat(format!(
            "unsupported content-type: {}",
            content_type
        ))),
    }
}

fn decode_utf8(bytes: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| RagError::UnsupportedFormat(format!("text is not valid UTF-8: {}", e)))?;
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

fn extract_pdf(bytes: &[u8]) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| RagError::UnsupportedFormat(format!("PDF extraction failed: {}", e)))
}

fn ooxml_error<E: std::fmt::Display>(e: E) -> RagError {
    RagError::UnsupportedFormat(format!("DOCX extraction failed: {}", e))
}

fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(ooxml_error)?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ooxml_error("word/document.xml not found"))?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(ooxml_error)?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ooxml_error("word/document.xml exceeds size limit"));
    }
    extract_paragraphs(&doc_xml)
}

/// Collect `w:t` runs, separating `w:p` paragraphs with blank lines.
fn extract_paragraphs(xml: &[u8]) -> Result<String> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut paragraph = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                paragraph.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"tab" => paragraph.push('\t'),
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let trimmed = paragraph.trim();
                    if !trimmed.is_empty() {
                        if !out.is_empty() {
                            out.push_str("\n\n");
                        }
                        out.push_str(trimmed);
                    }
                    paragraph.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_error(e)),
            _ => {}
        }
        buf.clear();
    }
    let tail = paragraph.trim();
    if !tail.is_empty() {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(tail);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_by_extension() {
        assert_eq!(content_type_for("report.PDF"), Some(MIME_PDF));
        assert_eq!(content_type_for("notes.md"), Some(MIME_MARKDOWN));
        assert_eq!(content_type_for("old.doc"), Some(MIME_DOC));
        assert_eq!(content_type_for("image.png"), None);
        assert_eq!(content_type_for("README"), None);
    }

    #[test]
    fn unsupported_content_type_returns_error() {
        let err = extract_text(b"foo", "application/octet-stream").unwrap_err();
        assert!(matches!(err, RagError::UnsupportedFormat(_)));
    }

    #[test]
    fn legacy_doc_is_unsupported() {
        let err = extract_text(b"\xd0\xcf\x11\xe0", MIME_DOC).unwrap_err();
        assert!(matches!(err, RagError::UnsupportedFormat(_)));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, RagError::UnsupportedFormat(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_text(b"not a zip", MIME_DOCX).unwrap_err();
        assert!(matches!(err, RagError::UnsupportedFormat(_)));
    }

    #[test]
    fn plain_text_passes_through() {
        let text = extract_text("\u{feff}héllo\n\nworld".as_bytes(), MIME_TEXT).unwrap();
        assert_eq!(text, "héllo\n\nworld");
    }

    #[test]
    fn invalid_utf8_is_unsupported() {
        let err = extract_text(&[0xff, 0xfe, 0x00], MIME_TEXT).unwrap_err();
        assert!(matches!(err, RagError::UnsupportedFormat(_)));
    }

    #[test]
    fn docx_paragraphs_separated() {
        let xml = br#"<w:document xmlns:w="x"><w:body>
            <w:p><w:r><w:t>First</w:t></w:r><w:r><w:t xml:space="preserve"> line.</w:t></w:r></w:p>
            <w:p><w:r><w:t>Second.</w:t></w:r></w:p>
        </w:body></w:document>"#;
        let text = extract_paragraphs(xml).unwrap();
        assert_eq!(text, "First line.\n\nSecond.");
    }
}
