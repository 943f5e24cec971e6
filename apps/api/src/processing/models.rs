use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    Contact,
    Experience,
    Education,
    Skills,
    Summary,
    Certifications,
    Projects,
    Achievements,
    Other,
}

/// A contiguous span of resume lines. `line_start` is the heading line and
/// `line_end` the last content line, both inclusive indices into the
/// cleaned text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResumeSection {
    pub section_type: SectionType,
    pub title: String,
    pub content: String,
    pub line_start: usize,
    pub line_end: usize,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContactInfo {
    pub emails: Vec<String>,
    pub phones: Vec<String>,
    pub urls: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    Good,
    Fair,
    Poor,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityAssessment {
    pub level: QualityLevel,
    pub issues: Vec<String>,
    pub single_char_line_ratio: f64,
    /// Low-confidence extractions are flagged, never rejected.
    pub needs_manual_review: bool,
}

impl Default for QualityAssessment {
    fn default() -> Self {
        Self {
            level: QualityLevel::Poor,
            issues: Vec::new(),
            single_char_line_ratio: 0.0,
            needs_manual_review: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProcessedMetadata {
    pub word_count: usize,
    pub line_count: usize,
    pub character_count: usize,
    pub contact_info: ContactInfo,
    pub quality: QualityAssessment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProcessedText {
    pub raw_text: String,
    pub cleaned_text: String,
    pub sections: Vec<ResumeSection>,
    pub metadata: ProcessedMetadata,
}

// ────────────────────────────────────────────────────────────────────────────
// AI-ready projection consumed by downstream LLM callers
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiSection {
    #[serde(rename = "type")]
    pub section_type: SectionType,
    pub title: String,
    pub content: String,
    pub position: usize,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionInfo {
    pub word_count: usize,
    pub line_count: usize,
    pub character_count: usize,
    pub section_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiMetadata {
    pub contact_info: ContactInfo,
    pub quality: QualityAssessment,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiReadyData {
    pub text: String,
    pub sections: Vec<AiSection>,
    pub extraction_info: ExtractionInfo,
    pub metadata: AiMetadata,
}
