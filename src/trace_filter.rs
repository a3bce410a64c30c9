use serde::{Deserialize, Serialize};

use crate::types::ExecutionRecord;

/// Phrases that mark an entry as a failed or retried attempt.
pub const FAILURE_KEYWORDS: &[&str] = &[
    "failed",
    "error",
    "could not",
    "unable",
    "not found",
    "invalid",
    "re-input",
    "retry",
    "retrying",
    "try again",
];

/// Markers of engine-internal problems that never belong in a replayable path.
const INTERNAL_ERROR_MARKERS: &[&str] = &["internal error", "processing error", "exception", "traceback"];

/// One entry of a raw or filtered trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEntry {
    pub description: String,
    pub action_signatures: Vec<String>,
    pub has_screenshot: bool,
}

impl TraceEntry {
    pub fn new<I, S>(description: impl Into<String>, signatures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            description: description.into(),
            action_signatures: signatures.into_iter().map(Into::into).collect(),
            has_screenshot: false,
        }
    }

    /// Raw-trace view of a record. Failures carry their detail in the description.
    pub fn from_record(record: &ExecutionRecord) -> Self {
        let description = match (&record.error_detail, record.success) {
            (Some(detail), false) => format!("{} failed: {detail}", record.description),
            (None, false) => format!("{} failed", record.description),
            _ => record.description.clone(),
        };
        Self {
            description,
            action_signatures: vec![record.action_taken.clone()],
            has_screenshot: record.screenshot_ref.is_some(),
        }
    }

    fn kinds(&self) -> impl Iterator<Item = &str> {
        self.action_signatures
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.split_once(':').map_or(s, |(kind, _)| kind))
    }

    fn only_kind(&self, kind: &str) -> bool {
        let mut kinds = self.kinds().peekable();
        kinds.peek().is_some() && kinds.all(|k| k == kind)
    }

    fn has_kind(&self, kind: &str) -> bool {
        self.kinds().any(|k| k == kind)
    }

    /// Signatures joined in order; `None` for an entry without actions.
    fn combined_signature(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .action_signatures
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join("|"))
    }
}

/// Reduces a raw trace to the minimal replayable sequence.
///
/// Two passes: first drop noise (error markers, bare screenshots, repeated
/// navigation and waits), then drop failed attempts and collapse retries so
/// the last attempt at a given signature wins while keeping the position of
/// its first occurrence.
#[derive(Debug, Clone)]
pub struct TraceFilter {
    failure_keywords: Vec<String>,
}

impl Default for TraceFilter {
    fn default() -> Self {
        Self {
            failure_keywords: FAILURE_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

impl TraceFilter {
    pub fn with_keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            failure_keywords: keywords
                .into_iter()
                .map(|k| k.into().to_lowercase())
                .collect(),
        }
    }

    pub fn extract_success_path(&self, raw: &[TraceEntry]) -> Vec<TraceEntry> {
        let cleaned = self.drop_noise(raw);
        self.collapse_retries(cleaned)
    }

    fn drop_noise(&self, raw: &[TraceEntry]) -> Vec<TraceEntry> {
        let mut seen_navigation = false;
        let mut seen_wait = false;
        let mut out = Vec::with_capacity(raw.len());

        for entry in raw {
            if entry.has_kind("error") || mentions_internal_error(&entry.description) {
                continue;
            }
            if entry.only_kind("screenshot") {
                continue;
            }
            if entry.has_kind("navigate") {
                if seen_navigation {
                    continue;
                }
                seen_navigation = true;
            } else if entry.only_kind("wait") {
                if seen_wait {
                    continue;
                }
                seen_wait = true;
            }
            out.push(entry.clone());
        }
        out
    }

    fn collapse_retries(&self, entries: Vec<TraceEntry>) -> Vec<TraceEntry> {
        let mut out: Vec<TraceEntry> = Vec::with_capacity(entries.len());
        let mut signatures: Vec<Option<String>> = Vec::with_capacity(entries.len());

        for entry in entries {
            if self.is_failure(&entry.description) || entry.only_kind("done") {
                continue;
            }
            let signature = entry.combined_signature();
            let existing = signature
                .as_ref()
                .and_then(|sig| signatures.iter().position(|s| s.as_ref() == Some(sig)));
            match existing {
                Some(index) => out[index] = entry,
                None => {
                    signatures.push(signature);
                    out.push(entry);
                }
            }
        }
        out
    }

    fn is_failure(&self, description: &str) -> bool {
        let lower = description.to_lowercase();
        self.failure_keywords.iter().any(|k| lower.contains(k.as_str()))
    }
}

fn mentions_internal_error(description: &str) -> bool {
    let lower = description.to_lowercase();
    INTERNAL_ERROR_MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(description: &str, signatures: &[&str]) -> TraceEntry {
        TraceEntry::new(description, signatures.iter().copied())
    }

    fn descriptions(entries: &[TraceEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.description.as_str()).collect()
    }

    #[test]
    fn keeps_only_the_first_navigation() {
        let raw = vec![
            entry("Open app", &["navigate:https://app.test"]),
            entry("Open settings", &["navigate:https://app.test/settings"]),
            entry("Click save", &["click:#save"]),
        ];
        let path = TraceFilter::default().extract_success_path(&raw);
        assert_eq!(descriptions(&path), vec!["Open app", "Click save"]);
    }

    #[test]
    fn drops_screenshots_errors_and_repeated_waits() {
        let raw = vec![
            entry("Capture page", &["screenshot"]),
            entry("Let the page load", &["wait"]),
            entry("Click new", &["click:#new"]),
            entry("Settle again", &["wait"]),
            entry("Driver crashed", &["error"]),
            entry("Traceback while parsing", &["click:#x"]),
        ];
        let path = TraceFilter::default().extract_success_path(&raw);
        assert_eq!(descriptions(&path), vec!["Let the page load", "Click new"]);
    }

    #[test]
    fn later_attempt_replaces_earlier_in_place() {
        let raw = vec![
            entry("Type name", &["input:#name"]),
            entry("Pick category", &["select:#category"]),
            entry("Type name properly", &["input:#name"]),
        ];
        let path = TraceFilter::default().extract_success_path(&raw);
        assert_eq!(descriptions(&path), vec!["Type name properly", "Pick category"]);
    }

    #[test]
    fn failure_keywords_match_case_insensitively() {
        let raw = vec![
            entry("Click Submit FAILED: target not found", &["click:#submit"]),
            entry("Retrying the login", &["click:#login"]),
            entry("Click submit", &["click:#submit"]),
        ];
        let path = TraceFilter::default().extract_success_path(&raw);
        assert_eq!(descriptions(&path), vec!["Click submit"]);
    }

    #[test]
    fn entries_without_signatures_are_never_merged() {
        let raw = vec![entry("Note one", &[]), entry("Note two", &[])];
        let path = TraceFilter::default().extract_success_path(&raw);
        assert_eq!(path.len(), 2);
    }

    #[test]
    fn done_markers_and_custom_keywords() {
        let raw = vec![
            entry("Vision confirmed the step", &["done"]),
            entry("Click flaky button", &["click:#flaky"]),
        ];
        let path = TraceFilter::with_keywords(["FLAKY"]).extract_success_path(&raw);
        assert!(path.is_empty());
    }

    #[test]
    fn failed_record_is_labelled_as_failure() {
        let record = ExecutionRecord::new(2, "Click submit", "click:#submit".to_string())
            .failed("target not found: #submit");
        let entry = TraceEntry::from_record(&record);
        assert_eq!(entry.description, "Click submit failed: target not found: #submit");
        assert_eq!(entry.action_signatures, vec!["click:#submit"]);
    }
}
