//! DOCX extractor. Reads `word/document.xml` and emits paragraphs and table
//! rows in document order; table cells are joined with ` | `.

use std::io::{Cursor, Read};

use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::Map;

use super::{ExtractedText, ExtractionError, TextExtractor, MIME_DOCX};

pub struct DocxExtractor;

impl TextExtractor for DocxExtractor {
    fn name(&self) -> &'static str {
        "docx"
    }

    fn supports_file_type(&self, mime_type: &str) -> bool {
        mime_type.eq_ignore_ascii_case(MIME_DOCX)
    }

    fn supported_mime_types(&self) -> &'static [&'static str] {
        &[MIME_DOCX]
    }

    fn extract_text(&self, data: &[u8]) -> Result<ExtractedText, ExtractionError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(data))
            .map_err(|e| ExtractionError::Parse(format!("Failed to open DOCX: {e}")))?;

        let mut xml = String::new();
        archive
            .by_name("word/document.xml")
            .map_err(|e| ExtractionError::Parse(format!("Failed to find document.xml: {e}")))?
            .read_to_string(&mut xml)?;

        let body = parse_document_xml(&xml)?;
        if body.paragraphs == 0 && body.table_rows == 0 {
            return Err(ExtractionError::NoText(
                "DOCX contains no paragraphs or tables".into(),
            ));
        }
        if body.text.trim().is_empty() {
            return Err(ExtractionError::NoText("DOCX contains no text".into()));
        }

        let mut metadata = Map::new();
        metadata.insert("paragraph_count".into(), body.paragraphs.into());
        metadata.insert("table_row_count".into(), body.table_rows.into());

        Ok(ExtractedText {
            text: body.text,
            method: "docx-xml".into(),
            metadata,
        })
    }
}

#[derive(Debug, Default)]
struct DocxBody {
    text: String,
    paragraphs: usize,
    table_rows: usize,
}

/// Walks the WordprocessingML body. Nested tables are flattened into the
/// enclosing cell.
fn parse_document_xml(xml: &str) -> Result<DocxBody, ExtractionError> {
    let mut reader = Reader::from_str(xml);

    let mut body = DocxBody::default();
    let mut lines: Vec<String> = Vec::new();

    let mut in_text = false;
    let mut table_depth = 0usize;
    let mut paragraph = String::new();
    let mut cell = String::new();
    let mut row: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"p" => paragraph.clear(),
                b"tbl" => table_depth += 1,
                b"tr" if table_depth == 1 => row.clear(),
                b"tc" if table_depth == 1 => cell.clear(),
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"tab" => paragraph.push('\t'),
                b"br" | b"cr" => paragraph.push('\n'),
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    body.paragraphs += 1;
                    let text = std::mem::take(&mut paragraph);
                    if table_depth == 0 {
                        lines.push(text);
                    } else if !text.trim().is_empty() {
                        if !cell.is_empty() {
                            cell.push(' ');
                        }
                        cell.push_str(text.trim());
                    }
                }
                b"tc" if table_depth == 1 => row.push(std::mem::take(&mut cell)),
                b"tr" if table_depth == 1 => {
                    body.table_rows += 1;
                    let cells: Vec<String> = row
                        .drain(..)
                        .filter(|c| !c.trim().is_empty())
                        .collect();
                    if !cells.is_empty() {
                        lines.push(cells.join(" | "));
                    }
                }
                b"tbl" => table_depth = table_depth.saturating_sub(1),
                _ => {}
            },
            Ok(Event::Text(e)) if in_text => {
                let decoded = e
                    .unescape()
                    .map_err(|err| ExtractionError::Parse(format!("XML decode error: {err}")))?;
                paragraph.push_str(&decoded);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ExtractionError::Parse(format!("XML parsing error: {e}")));
            }
            _ => {}
        }
    }

    body.text = lines.join("\n");
    Ok(body)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::io::{Cursor, Write};

    use zip::write::SimpleFileOptions;

    /// Wraps `body_xml` in a minimal DOCX archive.
    pub fn docx_with_body(body_xml: &str) -> Vec<u8> {
        let document = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body_xml}</w:body></w:document>"#
        );
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("word/document.xml", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(document.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    pub fn paragraph(text: &str) -> String {
        format!("<w:p><w:r><w:t>{text}</w:t></w:r></w:p>")
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_paragraphs_in_order() {
        let body = format!(
            "{}{}{}",
            paragraph("Jane Doe"),
            paragraph("EXPERIENCE"),
            paragraph("Backend Engineer at Acme")
        );
        let extracted = DocxExtractor.extract_text(&docx_with_body(&body)).unwrap();
        assert_eq!(
            extracted.text,
            "Jane Doe\nEXPERIENCE\nBackend Engineer at Acme"
        );
        assert_eq!(extracted.metadata["paragraph_count"], 3);
    }

    #[test]
    fn test_runs_are_concatenated_without_trimming() {
        let body = "<w:p><w:r><w:t xml:space=\"preserve\">Senior </w:t></w:r><w:r><w:t>Engineer</w:t></w:r></w:p>";
        let extracted = DocxExtractor.extract_text(&docx_with_body(body)).unwrap();
        assert_eq!(extracted.text, "Senior Engineer");
    }

    #[test]
    fn test_table_cells_follow_document_order() {
        let table = format!(
            "<w:tbl><w:tr><w:tc>{}</w:tc><w:tc>{}</w:tc></w:tr></w:tbl>",
            paragraph("Rust"),
            paragraph("5 years")
        );
        let body = format!("{}{}{}", paragraph("SKILLS"), table, paragraph("EDUCATION"));
        let extracted = DocxExtractor.extract_text(&docx_with_body(&body)).unwrap();
        assert_eq!(extracted.text, "SKILLS\nRust | 5 years\nEDUCATION");
        assert_eq!(extracted.metadata["table_row_count"], 1);
    }

    #[test]
    fn test_entities_are_unescaped() {
        let body = paragraph("R&amp;D Lead");
        let extracted = DocxExtractor.extract_text(&docx_with_body(&body)).unwrap();
        assert_eq!(extracted.text, "R&D Lead");
    }

    #[test]
    fn test_empty_document_is_failure() {
        let err = DocxExtractor.extract_text(&docx_with_body("")).unwrap_err();
        assert!(matches!(err, ExtractionError::NoText(_)));
    }

    #[test]
    fn test_not_a_zip_is_parse_error() {
        let err = DocxExtractor.extract_text(b"plain bytes").unwrap_err();
        assert!(matches!(err, ExtractionError::Parse(_)));
    }
}
