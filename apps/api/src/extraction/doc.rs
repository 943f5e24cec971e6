use super::{ExtractedText, ExtractionError, TextExtractor, MIME_DOC};

/// Legacy Word (OLE2 `.doc`) files are recognised but not parsed.
pub struct DocExtractor;

impl TextExtractor for DocExtractor {
    fn name(&self) -> &'static str {
        "doc"
    }

    fn supports_file_type(&self, mime_type: &str) -> bool {
        mime_type.eq_ignore_ascii_case(MIME_DOC)
    }

    fn supported_mime_types(&self) -> &'static [&'static str] {
        &[MIME_DOC]
    }

    fn extract_text(&self, _data: &[u8]) -> Result<ExtractedText, ExtractionError> {
        Err(ExtractionError::UnsupportedFormat(
            "Legacy .doc files are not supported; please upload a PDF or DOCX".into(),
        ))
    }
}
