//! Heuristic scan of model output for confabulation (hallucination)
//! signals: specificity without a source, contentless filler, drift into
//! an unrelated "attractor basin" of training data, repetition loops,
//! and — for recalled lessons — a confidence/evidence mismatch.
//!
//! These are heuristics, not proofs. A clean scan doesn't mean the
//! output is correct; a flagged scan doesn't mean it's wrong. The
//! agent loop uses flags to decide whether to surface a caution to the
//! user or require the model to cite evidence before a lesson is
//! trusted, not to silently rewrite anything.

use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Heuristic {
    /// Specificity without source: numbers, dates, dollar amounts stated
    /// as fact with nothing backing them.
    H1,
    /// Plausible filler: contentless hedging that pads a response
    /// without saying anything.
    H2,
    /// Attractor basin drift: the model lapses into a generic-assistant
    /// or otherwise off-task persona, or loops on a repeated phrase.
    H5,
    /// Confidence/evidence mismatch in a recalled lesson.
    H6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warn,
    Quarantine,
}

#[derive(Debug, Clone)]
pub struct ConfabFlag {
    pub heuristic: Heuristic,
    pub severity: Severity,
    pub detail: String,
    pub snippet: String,
}

#[derive(Debug, Clone)]
pub struct ConfabReport {
    pub source: String,
    pub flags: Vec<ConfabFlag>,
}

impl ConfabReport {
    pub fn clean(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn quarantine(&self) -> bool {
        self.flags.iter().any(|f| f.severity == Severity::Quarantine)
    }
}

static FILLER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)no\s+(meaningful|significant|notable)\s+(changes?|developments?)",
        r"(?i)remains?\s+(broadly|generally|largely)\s+(neutral|stable|unchanged)",
        r"(?i)continues?\s+to\s+(evolve|develop|unfold)",
        r"(?i)further\s+(analysis|investigation|monitoring)\s+(is\s+)?(needed|required)",
        r"(?i)it\s+remains\s+to\s+be\s+seen",
        r"(?i)only\s+time\s+will\s+tell",
        r"(?i)the\s+situation\s+is\s+(complex|nuanced|multifaceted)",
        r"(?i)as\s+(previously|earlier)\s+(mentioned|noted|discussed)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Drift into a generic chatbot persona or disclaimer boilerplate
/// instead of staying in the local-coding-agent role — the most common
/// real-world attractor basin this kind of model falls into.
static ATTRACTOR_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)as an ai language model",
        r"(?i)i(?:'m| am)\s+just an ai",
        r"(?i)i don't have access to (?:real-time|the internet|live)",
        r"(?i)i cannot browse the internet",
        r"(?i)as of my last (?:training|knowledge) (?:cut-?off|update)",
        r"(?i)please consult a (?:lawyer|doctor|licensed professional)",
        r"(?i)i'?m not able to (?:provide|give) (?:medical|legal|financial) advice",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static SPECIFICITY_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (Regex::new(r"\b\d+\.?\d*%").unwrap(), "percentage"),
        (Regex::new(r"\$\d+").unwrap(), "dollar amount"),
        (
            Regex::new(
                r"\b(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2},?\s+\d{4}",
            )
            .unwrap(),
            "specific date",
        ),
    ]
});

fn snippet_around(text: &str, start: usize, end: usize) -> String {
    let s = start.saturating_sub(20).min(text.len());
    let e = (end + 40).min(text.len());
    let snippet = text.get(s..e).unwrap_or("").trim();
    snippet.chars().take(200).collect()
}

/// Scan free-form model output text. Runs H1, H2, and H5; H6 only
/// applies to recalled lessons (see [`scan_lesson`]).
pub fn scan_text(text: &str, source_name: &str) -> ConfabReport {
    let mut flags = Vec::new();

    for (pattern, desc) in SPECIFICITY_PATTERNS.iter() {
        for m in pattern.find_iter(text) {
            flags.push(ConfabFlag {
                heuristic: Heuristic::H1,
                severity: Severity::Warn,
                detail: format!("Ungrounded {}: {}", desc, m.as_str()),
                snippet: snippet_around(text, m.start(), m.end()),
            });
        }
    }

    for pattern in FILLER_PATTERNS.iter() {
        if let Some(m) = pattern.find(text) {
            flags.push(ConfabFlag {
                heuristic: Heuristic::H2,
                severity: Severity::Warn,
                detail: format!("Filler pattern: '{}'", m.as_str()),
                snippet: snippet_around(text, m.start(), m.end()),
            });
        }
    }

    for pattern in ATTRACTOR_PATTERNS.iter() {
        if let Some(m) = pattern.find(text) {
            flags.push(ConfabFlag {
                heuristic: Heuristic::H5,
                severity: Severity::Quarantine,
                detail: format!("Attractor drift: '{}'", m.as_str()),
                snippet: snippet_around(text, m.start(), m.end()),
            });
        }
    }

    if let Some(flag) = detect_repetition_loop(text) {
        flags.push(flag);
    }

    ConfabReport { source: source_name.to_string(), flags }
}

/// Look for a 10-25 word sequence repeated 3+ times — a model stuck in
/// a generation loop.
fn detect_repetition_loop(text: &str) -> Option<ConfabFlag> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() < 30 {
        return None;
    }

    let max_window = (words.len() / 3).min(25);
    for window in 10..max_window.max(10) {
        if window > words.len() {
            break;
        }
        let mut seen = std::collections::HashMap::new();
        for i in 0..=words.len().saturating_sub(window) {
            let seq = words[i..i + window].join(" ");
            let count = seen.entry(seq.clone()).or_insert(0);
            *count += 1;
            if *count >= 3 {
                return Some(ConfabFlag {
                    heuristic: Heuristic::H5,
                    severity: Severity::Quarantine,
                    detail: format!("Generation loop: {}-word sequence repeated 3+ times", window),
                    snippet: seq.chars().take(200).collect(),
                });
            }
        }
    }
    None
}

/// A recalled lesson's content, as far as H6 needs to see it.
#[derive(Debug, Clone, Default)]
pub struct LessonContent {
    pub lesson_id: String,
    pub topic: String,
    pub summary: String,
    pub insight: String,
    pub decision_rationale: String,
    pub confidence: f64,
    pub evidence_count: usize,
}

fn required_evidence_for_confidence(confidence: f64) -> usize {
    if confidence <= 0.50 {
        1
    } else if confidence <= 0.70 {
        2
    } else if confidence <= 0.85 {
        3
    } else if confidence <= 0.95 {
        5
    } else {
        8
    }
}

/// Scan a recalled lesson: runs [`scan_text`] over its narrative fields,
/// then adds an H6 flag if its stated confidence isn't backed by enough
/// evidence items.
pub fn scan_lesson(lesson: &LessonContent) -> ConfabReport {
    let text = [&lesson.topic, &lesson.summary, &lesson.insight, &lesson.decision_rationale]
        .iter()
        .filter(|s| !s.is_empty())
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let mut report = scan_text(&text, &lesson.lesson_id);

    let required = required_evidence_for_confidence(lesson.confidence);
    if lesson.evidence_count < required {
        let severity = if lesson.confidence > 0.7 { Severity::Quarantine } else { Severity::Warn };
        report.flags.push(ConfabFlag {
            heuristic: Heuristic::H6,
            severity,
            detail: format!(
                "Confidence {} requires {} evidence items, found {}",
                lesson.confidence, required, lesson.evidence_count
            ),
            snippet: format!("confidence={}, evidence={}", lesson.confidence, lesson.evidence_count),
        });
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_has_no_flags() {
        let report = scan_text("I edited src/main.rs to fix the off-by-one error in the loop.", "test");
        assert!(report.clean());
    }

    #[test]
    fn percentage_without_source_flagged_h1() {
        let report = scan_text("This improves performance by 42.5% according to nothing in particular.", "test");
        assert!(report.flags.iter().any(|f| f.heuristic == Heuristic::H1));
    }

    #[test]
    fn filler_phrase_flagged_h2() {
        let report = scan_text("There have been no significant changes since last week.", "test");
        assert!(report.flags.iter().any(|f| f.heuristic == Heuristic::H2));
    }

    #[test]
    fn generic_assistant_disclaimer_flagged_as_attractor_drift() {
        let report = scan_text("As an AI language model, I don't have access to real-time data.", "test");
        assert!(report.flags.iter().any(|f| f.heuristic == Heuristic::H5));
        assert!(report.quarantine());
    }

    #[test]
    fn repetition_loop_detected() {
        let phrase = "the quick brown fox jumps over the lazy dog again and ";
        let text = phrase.repeat(6);
        let report = scan_text(&text, "test");
        assert!(report.flags.iter().any(|f| f.detail.contains("Generation loop")));
    }

    #[test]
    fn lesson_with_low_confidence_and_no_evidence_warns() {
        let lesson = LessonContent {
            lesson_id: "lesson-1".to_string(),
            confidence: 0.4,
            evidence_count: 0,
            ..Default::default()
        };
        let report = scan_lesson(&lesson);
        let h6 = report.flags.iter().find(|f| f.heuristic == Heuristic::H6).unwrap();
        assert_eq!(h6.severity, Severity::Warn);
    }

    #[test]
    fn lesson_with_high_confidence_and_no_evidence_quarantines() {
        let lesson = LessonContent {
            lesson_id: "lesson-2".to_string(),
            confidence: 0.92,
            evidence_count: 1,
            ..Default::default()
        };
        let report = scan_lesson(&lesson);
        let h6 = report.flags.iter().find(|f| f.heuristic == Heuristic::H6).unwrap();
        assert_eq!(h6.severity, Severity::Quarantine);
    }

    #[test]
    fn lesson_with_sufficient_evidence_has_no_h6_flag() {
        let lesson = LessonContent {
            lesson_id: "lesson-3".to_string(),
            confidence: 0.45,
            evidence_count: 1,
            ..Default::default()
        };
        let report = scan_lesson(&lesson);
        assert!(!report.flags.iter().any(|f| f.heuristic == Heuristic::H6));
    }

    #[test]
    fn evidence_thresholds_scale_with_confidence() {
        assert_eq!(required_evidence_for_confidence(0.3), 1);
        assert_eq!(required_evidence_for_confidence(0.6), 2);
        assert_eq!(required_evidence_for_confidence(0.8), 3);
        assert_eq!(required_evidence_for_confidence(0.9), 5);
        assert_eq!(required_evidence_for_confidence(0.99), 8);
    }
}
