//! PDF extractor: `pdf-extract` first, `lopdf` page-by-page as fallback.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use lopdf::content::Content;
use lopdf::{Document, Encoding, Object, ObjectId};
use serde_json::Map;
use tracing::{debug, warn};

use super::{ExtractedText, ExtractionError, TextExtractor, MIME_PDF};

/// How far from the end of the file the `%%EOF` marker is searched for.
const EOF_SEARCH_WINDOW: usize = 1024;

pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn supports_file_type(&self, mime_type: &str) -> bool {
        mime_type.eq_ignore_ascii_case(MIME_PDF)
    }

    fn supported_mime_types(&self) -> &'static [&'static str] {
        &[MIME_PDF]
    }

    fn extract_text(&self, data: &[u8]) -> Result<ExtractedText, ExtractionError> {
        extract_with(data, extract_primary)
    }
}

/// Runs `primary` and falls back to walking the page content streams with lopdf.
fn extract_with(
    data: &[u8],
    primary: impl FnOnce(&[u8]) -> Option<String>,
) -> Result<ExtractedText, ExtractionError> {
    let mut metadata = Map::new();

    let truncated = !has_eof_marker(data);
    if truncated {
        warn!("PDF has no %%EOF marker near the end; file may be truncated");
    }
    metadata.insert("truncated_warning".into(), truncated.into());

    let document = Document::load_mem(data).ok();
    if let Some(doc) = &document {
        metadata.insert("page_count".into(), doc.get_pages().len().into());
    }

    if let Some(text) = primary(data) {
        return Ok(ExtractedText {
            text: normalize_pdf_text(&text),
            method: "pdf-extract".into(),
            metadata,
        });
    }

    debug!("pdf-extract produced no text, falling back to lopdf");
    let Some(doc) = document else {
        return Err(ExtractionError::NoText(
            "No text could be extracted from PDF (pdf-extract found none and lopdf could not load it)"
                .into(),
        ));
    };

    match extract_fallback(&doc) {
        Some(text) => Ok(ExtractedText {
            text: normalize_pdf_text(&text),
            method: "lopdf".into(),
            metadata,
        }),
        None => Err(ExtractionError::NoText(
            "No text could be extracted from PDF; it may be image-based or encrypted".into(),
        )),
    }
}

/// `pdf-extract` is known to panic on some malformed fonts; treat that as "no text".
fn extract_primary(data: &[u8]) -> Option<String> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem(data)
    }));

    match outcome {
        Ok(Ok(text)) if !text.trim().is_empty() => Some(text),
        Ok(Ok(_)) => None,
        Ok(Err(e)) => {
            debug!("pdf-extract failed: {e}");
            None
        }
        Err(_) => {
            warn!("pdf-extract panicked while reading PDF");
            None
        }
    }
}

/// Emits a line break for every text-positioning operator, so headings stay on
/// their own lines.
fn extract_fallback(doc: &Document) -> Option<String> {
    let mut text = String::new();
    for (page_num, page_id) in doc.get_pages() {
        if let Err(e) = collect_page_text(doc, page_id, &mut text) {
            debug!("lopdf could not read page {page_num}: {e}");
        }
        push_line_break(&mut text);
    }
    (!text.trim().is_empty()).then_some(text)
}

fn collect_page_text(doc: &Document, page_id: ObjectId, out: &mut String) -> lopdf::Result<()> {
    let encodings = doc
        .get_page_fonts(page_id)?
        .into_iter()
        .map(|(name, font)| font.get_font_encoding(doc).map(|enc| (name, enc)))
        .collect::<lopdf::Result<BTreeMap<Vec<u8>, Encoding>>>()?;
    let content = Content::decode(&doc.get_page_content(page_id)?)?;

    let mut encoding = None;
    for op in &content.operations {
        match op.operator.as_str() {
            "Tf" => {
                encoding = op
                    .operands
                    .first()
                    .and_then(|o| o.as_name().ok())
                    .and_then(|name| encodings.get(name));
            }
            "Tj" | "TJ" | "'" | "\"" => {
                if op.operator == "'" || op.operator == "\"" {
                    push_line_break(out);
                }
                match (encoding, op.operands.last()) {
                    (Some(enc), Some(operand)) => push_shown_text(out, enc, operand)?,
                    (None, _) => debug!("Text shown without a font; skipping"),
                    _ => {}
                }
            }
            "Td" | "TD" => {
                let dy = op
                    .operands
                    .get(1)
                    .and_then(|o| o.as_float().ok())
                    .unwrap_or(0.0);
                if dy != 0.0 {
                    push_line_break(out);
                } else if !out.ends_with([' ', '\n']) && !out.is_empty() {
                    out.push(' ');
                }
            }
            "T*" | "ET" => push_line_break(out),
            _ => {}
        }
    }
    Ok(())
}

/// Operand of `Tj`/`'`/`"` is a string; `TJ` takes an array of strings and kerning offsets.
fn push_shown_text(out: &mut String, encoding: &Encoding, operand: &Object) -> lopdf::Result<()> {
    match operand {
        Object::String(bytes, _) => out.push_str(&Document::decode_text(encoding, bytes)?),
        Object::Array(items) => {
            for item in items {
                match item {
                    Object::String(bytes, _) => {
                        out.push_str(&Document::decode_text(encoding, bytes)?);
                    }
                    // Large negative kerning is a word gap.
                    other if other.as_float().is_ok_and(|k| k < -100.0) => out.push(' '),
                    _ => {}
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn push_line_break(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

pub(crate) fn has_eof_marker(data: &[u8]) -> bool {
    let start = data.len().saturating_sub(EOF_SEARCH_WINDOW);
    data[start..].windows(5).any(|w| w == b"%%EOF")
}

/// Drops NUL bytes and blank lines and trims each line.
fn normalize_pdf_text(text: &str) -> String {
    text.replace('\0', "")
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
