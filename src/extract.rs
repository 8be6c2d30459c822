//! Text extraction for uploaded files.
//!
//! The format is chosen from the file name's extension. Plain-text formats
//! are decoded as (lossy) UTF-8; PDF goes through `pdf-extract`; DOCX is
//! unzipped and its `w:t` runs are collected paragraph by paragraph.
//! Extracted text has its whitespace normalised before chunking.

use std::io::Read;
use std::path::Path;

use thiserror::Error;

use ragchat_core::error::RagError;

/// Shortest extracted text accepted for ingestion, in characters.
pub const MIN_TEXT_CHARS: usize = 10;

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type '{0}' (supported: txt, md, csv, json, pdf, docx)")]
    UnsupportedType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
    #[error("extracted text is too short ({0} characters)")]
    TooShort(usize),
}

impl From<ExtractError> for RagError {
    fn from(e: ExtractError) -> Self {
        RagError::Validation(e.to_string())
    }
}

/// Lower-cased extension of `file_name`, if any.
pub fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Extract normalised plain text from an uploaded file.
pub fn extract_text(file_name: &str, bytes: &[u8]) -> Result<String, ExtractError> {
    let ext = extension_of(file_name).unwrap_or_default();
    let raw = match ext.as_str() {
        "txt" | "md" | "csv" | "json" => String::from_utf8_lossy(bytes).into_owned(),
        "pdf" => extract_pdf(bytes)?,
        "docx" => extract_docx(bytes)?,
        other => return Err(ExtractError::UnsupportedType(other.to_string())),
    };

    let text = normalize_whitespace(&raw);
    let chars = text.chars().count();
    if chars < MIN_TEXT_CHARS {
        return Err(ExtractError::TooShort(chars));
    }
    Ok(text)
}

/// Collapse runs of spaces/tabs, trim every line, and squeeze runs of blank
/// lines down to one.
pub fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        out.push_str(&collapsed);
        blank_run = 0;
    }
    out
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

/// Text of every `w:t` run, with a newline after each `w:p` paragraph.
fn docx_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(t)) if in_text => {
                let s = t.unescape().map_err(|e| ExtractError::Docx(e.to_string()))?;
                out.push_str(&s);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"tab" => out.push(' '),
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
