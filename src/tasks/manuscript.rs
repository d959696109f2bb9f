// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Reading book manuscripts as plain text

use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

use crate::validation::{display_name, extension_of};
use crate::{Result, ScriptoriumError};

/// Extensions the loader understands
pub const MANUSCRIPT_EXTENSIONS: &[&str] = &["txt", "md", "markdown", "pdf", "docx"];

/// Where the text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Utf8,
    Latin1,
    Pdf,
    Docx,
}

/// Manuscript text plus what we know about it
#[derive(Debug, Clone)]
pub struct Manuscript {
    pub text: String,
    pub format: SourceFormat,
    pub page_count: Option<usize>,
}

impl Manuscript {
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Load a manuscript, choosing the reader by extension
pub fn load(path: &Path) -> Result<Manuscript> {
    let manuscript = match extension_of(path).as_str() {
        "txt" | "md" | "markdown" => {
            let (text, format) = decode_text(&std::fs::read(path)?);
            if format == SourceFormat::Latin1 {
                warn!("{} is not valid UTF-8, reading as Latin-1", display_name(path));
            }
            Manuscript { text, format, page_count: None }
        }
        "pdf" => {
            let bytes = std::fs::read(path)?;
            let text = pdf_extract::extract_text_from_mem(&bytes)
                .map_err(|e| ScriptoriumError::Pdf(format!("Text extraction failed: {}", e)))?;
            Manuscript {
                text,
                format: SourceFormat::Pdf,
                page_count: pdf_page_count(&bytes),
            }
        }
        "docx" => Manuscript {
            text: extract_docx(path)?,
            format: SourceFormat::Docx,
            page_count: None,
        },
        other => return Err(ScriptoriumError::UnsupportedFileType(format!(".{}", other))),
    };

    debug!(
        "Loaded {}: {:?}, {} words",
        display_name(path),
        manuscript.format,
        manuscript.word_count()
    );
    Ok(manuscript)
}

/// UTF-8 (BOM stripped) when valid, Latin-1 otherwise
fn decode_text(bytes: &[u8]) -> (String, SourceFormat) {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => (s.to_string(), SourceFormat::Utf8),
        Err(_) => (bytes.iter().map(|&b| b as char).collect(), SourceFormat::Latin1),
    }
}

fn pdf_page_count(bytes: &[u8]) -> Option<usize> {
    match lopdf::Document::load_mem(bytes) {
        Ok(doc) => Some(doc.get_pages().len()),
        Err(e) => {
            debug!("Could not read PDF page tree: {}", e);
            None
        }
    }
}

/// Paragraph text from `word/document.xml`
fn extract_docx(path: &Path) -> Result<String> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| ScriptoriumError::Document(format!("Failed to open DOCX: {}", e)))?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|_| ScriptoriumError::Document("No word/document.xml found".to_string()))?
        .read_to_string(&mut xml)?;

    docx_text(&xml)
}

fn docx_text(xml: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut text = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"w:t" => in_text = true,
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:tab" => text.push('\t'),
                b"w:br" | b"w:cr" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let unescaped = t
                    .unescape()
                    .map_err(|e| ScriptoriumError::Document(format!("Bad DOCX text: {}", e)))?;
                text.push_str(&unescaped);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ScriptoriumError::Document(format!(
                    "Malformed DOCX XML at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    Ok(text)
}
