use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::locator::Locator;

/// The closed set of things a step can ask the browser to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    #[serde(alias = "goto")]
    Navigate,
    Click,
    #[serde(alias = "input", alias = "type")]
    Fill,
    Select,
    Wait,
    Scroll,
    PressKey,
}

impl ActionKind {
    /// Kind label used in action signatures and trace entries.
    pub fn signature_kind(self) -> &'static str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::Click => "click",
            ActionKind::Fill => "input",
            ActionKind::Select => "select",
            ActionKind::Wait => "wait",
            ActionKind::Scroll => "scroll",
            ActionKind::PressKey => "press_key",
        }
    }

    /// Kinds that act on an element and therefore walk the locator chain.
    pub fn targets_element(self) -> bool {
        matches!(
            self,
            ActionKind::Click | ActionKind::Fill | ActionKind::Select | ActionKind::Scroll
        )
    }
}

/// Render an action signature: `kind` or `kind:target`.
///
/// Typed text and other payloads never take part in the signature.
pub fn action_signature(kind: &str, target: Option<&str>) -> String {
    match target.map(str::trim).filter(|t| !t.is_empty()) {
        Some(target) => format!("{kind}:{target}"),
        None => kind.to_string(),
    }
}

/// A single declarative step produced by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub ordinal: u32,
    pub action: ActionKind,
    #[serde(default)]
    pub locator: Option<Locator>,
    #[serde(default)]
    pub value: Option<String>,
    pub description: String,
    #[serde(default)]
    pub expected_outcome: String,
}

impl Step {
    /// URL for a navigate step: the value, or a primary selector that is itself a URL.
    pub fn navigation_url(&self) -> Option<&str> {
        if let Some(value) = self.value.as_deref().filter(|v| !v.trim().is_empty()) {
            return Some(value.trim());
        }
        self.locator
            .as_ref()
            .map(|l| l.primary.as_str())
            .filter(|p| p.starts_with("http://") || p.starts_with("https://"))
    }

    /// Signature of this step when attempted through its primary strategy.
    pub fn signature(&self) -> String {
        let target = match self.action {
            ActionKind::Navigate => self.navigation_url(),
            ActionKind::PressKey => self.value.as_deref(),
            _ => self.locator.as_ref().map(|l| l.primary.as_str()),
        };
        action_signature(self.action.signature_kind(), target)
    }
}

/// One attempt against the browser, appended to the run and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub step_ordinal: u32,
    pub description: String,
    /// Action signature of what was actually attempted.
    pub action_taken: String,
    pub resulting_url: String,
    pub screenshot_ref: Option<String>,
    pub success: bool,
    pub error_detail: Option<String>,
    pub recovery_used: bool,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn new(step_ordinal: u32, description: impl Into<String>, action_taken: String) -> Self {
        Self {
            step_ordinal,
            description: description.into(),
            action_taken,
            resulting_url: String::new(),
            screenshot_ref: None,
            success: true,
            error_detail: None,
            recovery_used: false,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(mut self, detail: impl Into<String>) -> Self {
        self.success = false;
        self.error_detail = Some(detail.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.resulting_url = url.into();
        self
    }

    pub fn with_screenshot(mut self, screenshot_ref: Option<String>) -> Self {
        self.screenshot_ref = screenshot_ref;
        self
    }

    pub fn recovered(mut self) -> Self {
        self.recovery_used = true;
        self
    }
}

/// A concrete action suggested by the vision collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: ActionKind,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, alias = "duration")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub description: String,
}

impl ActionRequest {
    pub fn wait(duration_ms: u64, description: impl Into<String>) -> Self {
        Self {
            action: ActionKind::Wait,
            selector: None,
            value: None,
            key: None,
            url: None,
            duration_ms: Some(duration_ms),
            description: description.into(),
        }
    }

    pub fn click(selector: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            action: ActionKind::Click,
            selector: Some(selector.into()),
            value: None,
            key: None,
            url: None,
            duration_ms: None,
            description: description.into(),
        }
    }

    pub fn signature(&self) -> String {
        let target = match self.action {
            ActionKind::Navigate => self.url.as_deref().or(self.selector.as_deref()),
            ActionKind::PressKey => self.key.as_deref().or(self.value.as_deref()),
            _ => self.selector.as_deref(),
        };
        action_signature(self.action.signature_kind(), target)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    StepComplete,
    InProgress,
    Blocked,
}

/// What the vision collaborator concluded from a screenshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionVerdict {
    pub observation: String,
    pub status: VerdictStatus,
    #[serde(default)]
    pub blocker: Option<String>,
    #[serde(default)]
    pub next_actions: Vec<ActionRequest>,
}

pub const BLOCKER_AUTHENTICATION: &str = "authentication";
pub const BLOCKER_VISION_ERROR: &str = "vision_error";

impl VisionVerdict {
    /// Safe default used whenever the collaborator misbehaves.
    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            observation: format!("Failed to interpret vision response: {}", reason.into()),
            status: VerdictStatus::Blocked,
            blocker: Some(BLOCKER_VISION_ERROR.to_string()),
            next_actions: vec![ActionRequest::wait(1000, "Wait due to vision error")],
        }
    }

    pub fn is_auth_blocker(&self) -> bool {
        self.status == VerdictStatus::Blocked
            && self.blocker.as_deref() == Some(BLOCKER_AUTHENTICATION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_excludes_typed_text() {
        let step = Step {
            ordinal: 2,
            action: ActionKind::Fill,
            locator: Some(Locator::new("input[name='email']")),
            value: Some("someone@example.com".into()),
            description: "Enter email".into(),
            expected_outcome: String::new(),
        };
        assert_eq!(step.signature(), "input:input[name='email']");
    }

    #[test]
    fn navigate_reads_url_from_value_or_primary() {
        let mut step = Step {
            ordinal: 1,
            action: ActionKind::Navigate,
            locator: Some(Locator::new("https://app.example.com")),
            value: None,
            description: "Open app".into(),
            expected_outcome: String::new(),
        };
        assert_eq!(step.navigation_url(), Some("https://app.example.com"));

        step.value = Some("https://other.example.com/home".into());
        assert_eq!(step.navigation_url(), Some("https://other.example.com/home"));
        assert_eq!(step.signature(), "navigate:https://other.example.com/home");
    }

    #[test]
    fn action_kinds_accept_vision_aliases() {
        let req: ActionRequest =
            serde_json::from_str(r#"{"action":"goto","url":"https://x.dev"}"#).unwrap();
        assert_eq!(req.action, ActionKind::Navigate);

        let req: ActionRequest =
            serde_json::from_str(r#"{"action":"wait","duration":2000}"#).unwrap();
        assert_eq!(req.duration_ms, Some(2000));
        assert_eq!(req.signature(), "wait");
    }

    #[test]
    fn fallback_verdict_is_a_non_auth_blocker() {
        let verdict = VisionVerdict::fallback("bad json");
        assert_eq!(verdict.status, VerdictStatus::Blocked);
        assert_eq!(verdict.blocker.as_deref(), Some(BLOCKER_VISION_ERROR));
        assert_eq!(verdict.next_actions.len(), 1);
        assert!(!verdict.is_auth_blocker());
    }
}
