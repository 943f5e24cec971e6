//! File validation collaborator: identifies the MIME type of an upload and
//! whether it is acceptable for extraction.

use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{MIME_DOC, MIME_DOCX, MIME_PDF};

const OLE2_SIGNATURE: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileInfo {
    /// Declared MIME type used to pick an extractor.
    pub file_type: String,
    pub file_size: u64,
    pub is_valid: bool,
}

impl FileInfo {
    pub fn new(file_type: impl Into<String>, file_size: u64) -> Self {
        let file_type = file_type.into();
        let is_valid = file_size > 0 && is_supported_mime(&file_type);
        Self {
            file_type,
            file_size,
            is_valid,
        }
    }
}

pub fn is_supported_mime(mime_type: &str) -> bool {
    [MIME_PDF, MIME_DOCX, MIME_DOC]
        .iter()
        .any(|m| m.eq_ignore_ascii_case(mime_type))
}

/// Inspects the file on disk. Magic bytes win over the filename extension.
pub fn get_file_info(path: &Path, filename: &str, max_size: u64) -> FileInfo {
    let file_size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

    let mut header = [0u8; 8];
    let read = std::fs::File::open(path)
        .and_then(|mut f| f.read(&mut header))
        .unwrap_or(0);

    let file_type = sniff_mime(&header[..read]).map(String::from).unwrap_or_else(|| {
        mime_guess::from_path(filename)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string()
    });

    let mut info = FileInfo::new(file_type, file_size);
    info.is_valid = info.is_valid && file_size <= max_size;
    info
}

fn sniff_mime(header: &[u8]) -> Option<&'static str> {
    if header.starts_with(b"%PDF") {
        Some(MIME_PDF)
    } else if header.starts_with(b"PK\x03\x04") {
        // Zip container; only DOCX is accepted among OOXML formats.
        Some(MIME_DOCX)
    } else if header.starts_with(OLE2_SIGNATURE) {
        Some(MIME_DOC)
    } else {
        None
    }
}
