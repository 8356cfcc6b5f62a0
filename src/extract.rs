//! Plain-text extraction for attached files.
//!
//! Attachments arrive as bytes plus a file name; the extension picks the
//! extractor:
//!
//! | Extension | Extractor |
//! |-----------|-----------|
//! | `.pdf` | `pdf-extract` |
//! | `.docx` | `word/document.xml` via `zip` + `quick-xml`, one paragraph per `<w:p>` |
//! | `.txt`, `.md`, `.markdown`, `.csv`, `.json`, `.html`, `.htm`, `.rst`, `.log`, none | UTF-8 decode |
//!
//! Extraction never panics; failures are returned as [`ExtractError`].

use std::io::Read;
use std::path::Path;

use thiserror::Error;

/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "csv", "json", "html", "htm", "rst", "log", "text",
];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("DOCX extraction failed: {0}")]
    Docx(String),

    #[error("file is not valid UTF-8 text")]
    Encoding,
}

/// Extract plain text from `bytes`, choosing the format from `file_name`.
pub fn extract_text(bytes: &[u8], file_name: &str) -> Result<String, ExtractError> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "pdf" => extract_pdf(bytes),
        "docx" => extract_docx(bytes),
        "" => decode_utf8(bytes),
        ext if TEXT_EXTENSIONS.contains(&ext) => decode_utf8(bytes),
        other => Err(ExtractError::Unsupported(format!(".{}", other))),
    }
}

fn decode_utf8(bytes: &[u8]) -> Result<String, ExtractError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| ExtractError::Encoding)
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    docx_paragraphs(&xml)
}

/// Collect `<w:t>` runs, ending each `<w:p>` with a blank line so the
/// segmenter sees paragraph structure.
fn docx_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
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
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"tab" => paragraph.push(' '),
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let line = paragraph.trim();
                    if !line.is_empty() {
                        out.push_str(line);
                        out.push_str("\n\n");
                    }
                    paragraph.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !paragraph.trim().is_empty() {
        out.push_str(paragraph.trim());
    }
    Ok(out.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with(document_xml: &str) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("word/document.xml", options).unwrap();
            zip.write_all(document_xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_plain_text_by_extension() {
        assert_eq!(extract_text(b"hello", "notes.TXT").unwrap(), "hello");
        assert_eq!(extract_text(b"# Title", "readme.md").unwrap(), "# Title");
        assert_eq!(extract_text(b"raw", "LICENSE").unwrap(), "raw");
    }

    #[test]
    fn test_unsupported_extension() {
        let err = extract_text(b"\x00\x01", "image.png").unwrap_err();
        assert!(matches!(err, ExtractError::Unsupported(ref e) if e == ".png"));
    }

    #[test]
    fn test_invalid_utf8() {
        let err = extract_text(&[0xff, 0xfe, 0x00], "notes.txt").unwrap_err();
        assert!(matches!(err, ExtractError::Encoding));
    }

    #[test]
    fn test_invalid_pdf() {
        let err = extract_text(b"not a pdf", "policy.pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn test_invalid_docx() {
        let err = extract_text(b"not a zip", "policy.docx").unwrap_err();
        assert!(matches!(err, ExtractError::Docx(_)));
    }

    #[test]
    fn test_docx_paragraphs() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Chapter 1</w:t></w:r></w:p>
    <w:p><w:r><w:t xml:space="preserve">Staff </w:t></w:r><w:r><w:t>must sign in.</w:t></w:r></w:p>
  </w:body>
</w:document>"#;
        let text = extract_text(&docx_with(xml), "handbook.docx").unwrap();
        assert_eq!(text, "Chapter 1\n\nStaff must sign in.");
    }
}
