//! Text processor: cleans raw extraction output, detects resume sections,
//! pulls contact details and grades extraction quality.
//!
//! Cleaning order matters: line endings → HTML → noise patterns → whitespace.
//! Noise must go before whitespace collapsing so removed page markers do not
//! leave runs of blank lines behind.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::processing::models::{
    AiMetadata, AiReadyData, AiSection, ContactInfo, ExtractionInfo, ProcessedMetadata,
    ProcessedText, QualityAssessment, QualityLevel, ResumeSection, SectionType,
};

const MAX_HEADING_CHARS: usize = 50;
const MAX_HEADING_WORDS: usize = 5;

const EXACT_CONFIDENCE: f64 = 0.9;
const FUZZY_CONFIDENCE: f64 = 0.7;
const FORMATTING_BONUS: f64 = 0.1;

const MIN_TEXT_CHARS: usize = 100;
const GOOD_TEXT_CHARS: usize = 300;
const POOR_SINGLE_CHAR_RATIO: f64 = 0.3;
const GOOD_SINGLE_CHAR_RATIO: f64 = 0.1;

static BLOCK_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>|</p\s*>|</div\s*>|</li\s*>|</h[1-6]\s*>").unwrap());
/// Tag-shaped spans only: `<jane@x.com>` or `<50k` are left alone.
static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"</?[A-Za-z][A-Za-z0-9-]*(?:\s[^<>\n]*)?/?>").unwrap()
});

static NOISE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // "Page 3", "Page 3 of 7", "--- Page 2 ---"
        r"(?im)^[ \t]*-*[ \t]*page[ \t]+\d+([ \t]+of[ \t]+\d+)?[ \t]*-*[ \t]*$",
        // bare "3 / 7" page counters
        r"(?m)^[ \t]*\d+[ \t]*/[ \t]*\d+[ \t]*$",
        r"(?im)^[ \t]*(strictly[ \t]+)?(private[ \t]+(and|&)[ \t]+)?confidential([ \t]+(and[ \t]+proprietary|document|information))?[ \t]*$",
        r"(?im)^.*this document (is|contains) confidential.*$",
        r"\x0c",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static HORIZONTAL_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\u{00A0}\u{2002}\u{2003}\u{2009}]+").unwrap());
static BLANK_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}\b").unwrap());
static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+\d{1,3}[\s.-]?)?(?:\(\d{2,4}\)|\d{2,4})[\s.-]?\d{3,4}[\s.-]?\d{3,4}\b")
        .unwrap()
});
static PROFILE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:https?://)?(?:www\.)?(?:linkedin\.com/in|github\.com)/[A-Za-z0-9_-]+")
        .unwrap()
});

/// Heading vocabulary. Checked in this order; the first exact match wins.
const SECTION_KEYWORDS: &[(SectionType, &[&str])] = &[
    (
        SectionType::Contact,
        &[
            "contact",
            "contact information",
            "contact details",
            "personal information",
            "personal details",
        ],
    ),
    (
        SectionType::Summary,
        &[
            "summary",
            "professional summary",
            "profile",
            "professional profile",
            "objective",
            "career objective",
            "about me",
        ],
    ),
    (
        SectionType::Experience,
        &[
            "experience",
            "work experience",
            "professional experience",
            "employment",
            "employment history",
            "work history",
            "career history",
        ],
    ),
    (
        SectionType::Education,
        &["education", "academic background", "qualifications", "academic qualifications"],
    ),
    (
        SectionType::Skills,
        &[
            "skills",
            "technical skills",
            "key skills",
            "core competencies",
            "competencies",
            "expertise",
        ],
    ),
    (
        SectionType::Certifications,
        &[
            "certifications",
            "certification",
            "certificates",
            "licenses",
            "licenses and certifications",
        ],
    ),
    (
        SectionType::Projects,
        &["projects", "personal projects", "key projects"],
    ),
    (
        SectionType::Achievements,
        &["achievements", "accomplishments", "awards", "honors", "awards and honors"],
    ),
];

#[derive(Debug, Clone, Default)]
pub struct TextProcessor;

impl TextProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Never fails: blank input yields an empty result with `metadata.error` set.
    pub fn process_text(&self, raw_text: &str) -> ProcessedText {
        if raw_text.trim().is_empty() {
            return ProcessedText {
                raw_text: raw_text.to_string(),
                metadata: ProcessedMetadata {
                    error: Some("No text provided".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            };
        }

        let cleaned_text = self.clean_text(raw_text);
        let sections = self.detect_sections(&cleaned_text);
        let contact_info = self.extract_contact_info(&cleaned_text);
        let quality = self.assess_quality(&cleaned_text, &sections);

        let metadata = ProcessedMetadata {
            word_count: cleaned_text.split_whitespace().count(),
            line_count: cleaned_text.lines().filter(|l| !l.trim().is_empty()).count(),
            character_count: cleaned_text.chars().count(),
            contact_info,
            quality,
            error: None,
        };

        ProcessedText {
            raw_text: raw_text.to_string(),
            cleaned_text,
            sections,
            metadata,
        }
    }

    pub fn clean_text(&self, raw_text: &str) -> String {
        let text = raw_text.replace("\r\n", "\n").replace('\r', "\n");

        let text = BLOCK_TAG.replace_all(&text, "\n");
        let text = HTML_TAG.replace_all(&text, "");
        let mut text = decode_entities(&text);

        for pattern in NOISE_PATTERNS.iter() {
            text = pattern.replace_all(&text, "").into_owned();
        }

        let text = HORIZONTAL_SPACE.replace_all(&text, " ");
        let text = text.lines().map(str::trim).collect::<Vec<_>>().join("\n");
        BLANK_RUNS.replace_all(&text, "\n\n").trim().to_string()
    }

    /// Splits cleaned text into sections. Every line belongs to at most one
    /// section; lines before the first heading form a preamble section.
    pub fn detect_sections(&self, cleaned_text: &str) -> Vec<ResumeSection> {
        let lines: Vec<&str> = cleaned_text.lines().collect();
        let mut sections = Vec::new();

        let first_heading = lines.iter().position(|l| detect_heading(l).is_some());
        let preamble_end = first_heading.unwrap_or(lines.len());
        if let Some(section) = preamble_section(&lines, preamble_end) {
            sections.push(section);
        }

        let mut open: Option<OpenSection> = None;
        for (idx, line) in lines.iter().enumerate().skip(preamble_end) {
            if let Some((section_type, confidence)) = detect_heading(line) {
                if let Some(done) = open.take().and_then(|s| s.finish(&lines)) {
                    sections.push(done);
                }
                open = Some(OpenSection {
                    section_type,
                    title: line.trim().trim_end_matches(':').trim().to_string(),
                    heading_line: idx,
                    last_line: idx,
                    confidence,
                });
            } else if let Some(current) = open.as_mut() {
                current.last_line = idx;
            }
        }
        if let Some(done) = open.and_then(|s| s.finish(&lines)) {
            sections.push(done);
        }

        sections
    }

    /// Emails, phone numbers and profile URLs anywhere in the text, deduplicated
    /// in order of first appearance.
    pub fn extract_contact_info(&self, text: &str) -> ContactInfo {
        let mut seen = HashSet::new();
        let emails = EMAIL
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .filter(|e| seen.insert(e.to_lowercase()))
            .collect();

        let mut seen = HashSet::new();
        let phones = PHONE
            .find_iter(text)
            .map(|m| m.as_str().trim().to_string())
            .filter(|p| {
                let digits: String = p.chars().filter(char::is_ascii_digit).collect();
                (10..=15).contains(&digits.len()) && !is_year_run(p) && seen.insert(digits)
            })
            .collect();

        let mut seen = HashSet::new();
        let urls = PROFILE_URL
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .filter(|u| seen.insert(u.to_lowercase()))
            .collect();

        ContactInfo {
            emails,
            phones,
            urls,
        }
    }

    /// Good / fair / poor grading. Poor extractions are flagged for manual review.
    pub fn assess_quality(
        &self,
        cleaned_text: &str,
        sections: &[ResumeSection],
    ) -> QualityAssessment {
        let mut issues = Vec::new();
        let char_count = cleaned_text.chars().count();

        let non_empty: Vec<&str> = cleaned_text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let single_char = non_empty.iter().filter(|l| l.chars().count() == 1).count();
        let ratio = if non_empty.is_empty() {
            0.0
        } else {
            single_char as f64 / non_empty.len() as f64
        };

        let structured = sections
            .iter()
            .filter(|s| !matches!(s.section_type, SectionType::Other | SectionType::Contact))
            .count();

        if char_count < MIN_TEXT_CHARS {
            issues.push(format!("Text is very short ({char_count} characters)"));
        }
        if ratio > POOR_SINGLE_CHAR_RATIO {
            issues.push(format!(
                "{:.0}% of lines are single characters; extraction may be garbled",
                ratio * 100.0
            ));
        }
        if structured == 0 {
            issues.push("No resume sections detected".to_string());
        }

        let level = if char_count < MIN_TEXT_CHARS || ratio > POOR_SINGLE_CHAR_RATIO {
            QualityLevel::Poor
        } else if char_count >= GOOD_TEXT_CHARS
            && ratio < GOOD_SINGLE_CHAR_RATIO
            && structured >= 2
        {
            QualityLevel::Good
        } else {
            QualityLevel::Fair
        };

        QualityAssessment {
            level,
            issues,
            single_char_line_ratio: ratio,
            needs_manual_review: level == QualityLevel::Poor,
        }
    }

    pub fn get_ai_ready_format(&self, processed: &ProcessedText) -> AiReadyData {
        let sections = processed
            .sections
            .iter()
            .enumerate()
            .map(|(position, s)| AiSection {
                section_type: s.section_type,
                title: s.title.clone(),
                content: s.content.clone(),
                position,
                confidence: s.confidence,
            })
            .collect();

        AiReadyData {
            text: processed.cleaned_text.clone(),
            sections,
            extraction_info: ExtractionInfo {
                word_count: processed.metadata.word_count,
                line_count: processed.metadata.line_count,
                character_count: processed.metadata.character_count,
                section_count: processed.sections.len(),
            },
            metadata: AiMetadata {
                contact_info: processed.metadata.contact_info.clone(),
                quality: processed.metadata.quality.clone(),
            },
        }
    }
}

struct OpenSection {
    section_type: SectionType,
    title: String,
    heading_line: usize,
    last_line: usize,
    confidence: f64,
}

impl OpenSection {
    /// Sections with no content lines are dropped.
    fn finish(self, lines: &[&str]) -> Option<ResumeSection> {
        let body = &lines[self.heading_line + 1..=self.last_line.max(self.heading_line)];
        let last_content = body.iter().rposition(|l| !l.trim().is_empty())?;
        let content = body[..=last_content].join("\n").trim().to_string();
        Some(ResumeSection {
            section_type: self.section_type,
            title: self.title,
            content,
            line_start: self.heading_line,
            line_end: self.heading_line + 1 + last_content,
            confidence: self.confidence,
        })
    }
}

/// "2018 2020 2021" has a phone number's digit count but is a list of years.
fn is_year_run(candidate: &str) -> bool {
    candidate
        .split(|c: char| !c.is_ascii_digit())
        .filter(|g| !g.is_empty())
        .all(|g| g.len() == 4 && (g.starts_with("19") || g.starts_with("20")))
}

fn preamble_section(lines: &[&str], end: usize) -> Option<ResumeSection> {
    let head = &lines[..end];
    let first = head.iter().position(|l| !l.trim().is_empty())?;
    let last = head.iter().rposition(|l| !l.trim().is_empty())?;
    let content = head[first..=last].join("\n");

    let has_contact = EMAIL.is_match(&content) || PHONE.is_match(&content);
    let (section_type, confidence) = if has_contact {
        (SectionType::Contact, 0.6)
    } else {
        (SectionType::Other, 0.3)
    };

    Some(ResumeSection {
        section_type,
        title: "Header".to_string(),
        content,
        line_start: first,
        line_end: last,
        confidence,
    })
}

/// Returns the section type and confidence if `line` looks like a heading.
fn detect_heading(line: &str) -> Option<(SectionType, f64)> {
    let trimmed = line.trim();
    if trimmed.is_empty()
        || trimmed.chars().count() > MAX_HEADING_CHARS
        || trimmed.split_whitespace().count() > MAX_HEADING_WORDS
    {
        return None;
    }

    let normalized = normalize_heading(trimmed);
    if normalized.is_empty() {
        return None;
    }

    let has_letters = trimmed.chars().any(char::is_alphabetic);
    let formatted = trimmed.ends_with(':')
        || (has_letters && trimmed.chars().all(|c| !c.is_alphabetic() || c.is_uppercase()));
    let bonus = if formatted { FORMATTING_BONUS } else { 0.0 };

    for (section_type, keywords) in SECTION_KEYWORDS {
        if keywords.iter().any(|k| *k == normalized) {
            return Some((*section_type, EXACT_CONFIDENCE + bonus));
        }
    }

    // Fuzzy: the heading starts or ends with a keyword ("Relevant Experience",
    // "Skills & Tools"). Lines with digits or sentence punctuation are content.
    if trimmed.chars().any(|c| c.is_ascii_digit()) || trimmed.contains(['.', ',', ';']) {
        return None;
    }
    let mut best: Option<(SectionType, usize)> = None;
    for (section_type, keywords) in SECTION_KEYWORDS {
        for keyword in keywords.iter() {
            let hit = normalized.starts_with(&format!("{keyword} "))
                || normalized.ends_with(&format!(" {keyword}"));
            if hit && best.map_or(true, |(_, len)| keyword.len() > len) {
                best = Some((*section_type, keyword.len()));
            }
        }
    }
    best.map(|(section_type, _)| (section_type, FUZZY_CONFIDENCE + bonus))
}

fn normalize_heading(text: &str) -> String {
    text.to_lowercase()
        .replace('&', " and ")
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
