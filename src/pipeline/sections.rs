//! Text fallback: carve named sections out of the raw document text.
//!
//! Used only to backfill clinical fields the entity mapper left empty.
//! Each section starts at the first occurrence of one of its bilingual
//! header keywords and runs until the first terminator keyword after it,
//! or the end of the text. The span is trimmed and capped at
//! [`MAX_SECTION_CHARS`] characters.
//!
//! `regex` has no look-ahead, so the terminator is located with a second
//! search starting where the header match ends.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Longest span kept per section, in Unicode scalar values.
pub const MAX_SECTION_CHARS: usize = 500;

/// Best-effort sections found in the document text. Empty when not found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSections {
    pub patient: String,
    pub diagnosis: String,
    pub recommendations: String,
}

struct SectionPattern {
    header: Regex,
    terminator: Option<Regex>,
}

impl SectionPattern {
    fn new(header: &str, terminator: Option<&str>) -> Self {
        Self {
            header: Regex::new(&format!(r"(?i)(?:{header})[:\s]*")).unwrap(),
            terminator: terminator.map(|t| Regex::new(&format!("(?i){t}")).unwrap()),
        }
    }

    fn extract(&self, text: &str) -> String {
        let Some(header) = self.header.find(text) else {
            return String::new();
        };
        let start = header.end();
        let end = self
            .terminator
            .as_ref()
            .and_then(|t| t.find_at(text, start))
            .map_or(text.len(), |m| m.start());

        truncate_chars(text[start..end].trim(), MAX_SECTION_CHARS)
    }
}

static PATIENT: Lazy<SectionPattern> = Lazy::new(|| {
    SectionPattern::new(
        "paciente|patient|datos del animal",
        Some("diagnóstico|diagnosis|hallazgos"),
    )
});

static DIAGNOSIS: Lazy<SectionPattern> = Lazy::new(|| {
    SectionPattern::new(
        "diagnóstico|diagnosis|hallazgos|findings|impresión",
        Some("recomendaciones|recommendations|tratamiento"),
    )
});

static RECOMMENDATIONS: Lazy<SectionPattern> = Lazy::new(|| {
    SectionPattern::new(
        "recomendaciones|recommendations|tratamiento|treatment|seguimiento",
        None,
    )
});

/// Extract the patient, diagnosis, and recommendations sections.
///
/// Never fails; missing sections come back as empty strings.
pub fn extract_sections(text: &str) -> TextSections {
    TextSections {
        patient: PATIENT.extract(text),
        diagnosis: DIAGNOSIS.extract(text),
        recommendations: RECOMMENDATIONS.extract(text),
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((byte_idx, _)) => s[..byte_idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "INFORME ECOGRÁFICO\n\
        Paciente: Luna, felino, 4 años\n\
        Diagnóstico: Nefropatía crónica bilateral.\n\
        Recomendaciones: Control en 30 días.\n";

    #[test]
    fn spanish_report_sections() {
        let s = extract_sections(REPORT);
        assert_eq!(s.patient, "Luna, felino, 4 años");
        assert_eq!(s.diagnosis, "Nefropatía crónica bilateral.");
        assert_eq!(s.recommendations, "Control en 30 días.");
    }

    #[test]
    fn english_headers_are_case_insensitive() {
        let text = "PATIENT: Rex\nFINDINGS: splenic mass\nRECOMMENDATIONS: surgery referral";
        let s = extract_sections(text);
        // "findings" is a diagnosis header but not a patient terminator.
        assert_eq!(s.patient, "Rex\nFINDINGS: splenic mass\nRECOMMENDATIONS: surgery referral");
        assert_eq!(s.diagnosis, "splenic mass");
        assert_eq!(s.recommendations, "surgery referral");
    }

    #[test]
    fn uppercase_accented_header_matches() {
        let s = extract_sections("DIAGNÓSTICO: Cistitis");
        assert_eq!(s.diagnosis, "Cistitis");
    }

    #[test]
    fn missing_sections_are_empty() {
        let s = extract_sections("Sin encabezados reconocibles.");
        assert_eq!(s, TextSections::default());
        assert_eq!(extract_sections(""), TextSections::default());
    }

    #[test]
    fn section_runs_to_end_without_terminator() {
        let s = extract_sections("Hallazgos: vesícula biliar con barro");
        assert_eq!(s.diagnosis, "vesícula biliar con barro");
    }

    #[test]
    fn long_sections_are_truncated_on_char_boundary() {
        let body = "ñ".repeat(MAX_SECTION_CHARS + 40);
        let s = extract_sections(&format!("Diagnóstico: {body}"));
        assert_eq!(s.diagnosis.chars().count(), MAX_SECTION_CHARS);
    }

    #[test]
    fn header_without_content_yields_empty() {
        let s = extract_sections("Diagnóstico:   \nRecomendaciones: reposo");
        assert_eq!(s.diagnosis, "");
        assert_eq!(s.recommendations, "reposo");
    }
}
