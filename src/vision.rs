use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::types::{ExecutionRecord, VerdictStatus, VisionVerdict};

/// What the vision collaborator is shown for one consultation.
#[derive(Debug, Clone, PartialEq)]
pub struct VisionRequest {
    /// PNG bytes of the current viewport.
    pub screenshot: Vec<u8>,
    /// Descriptions of the failed step and every step after it.
    pub remaining_plan: Vec<String>,
    pub current_step_description: String,
    /// One line per recent record, oldest first.
    pub recent_history: Vec<String>,
}

impl VisionRequest {
    /// Summarise the last `window` records for the prompt.
    pub fn history_lines(records: &[ExecutionRecord], window: usize) -> Vec<String> {
        let start = records.len().saturating_sub(window);
        records[start..]
            .iter()
            .map(|r| {
                let outcome = if r.success { "ok" } else { "failed" };
                format!("step {} {} ({outcome}): {}", r.step_ordinal, r.action_taken, r.description)
            })
            .collect()
    }
}

/// Turns a screenshot plus context into a verdict.
#[async_trait]
pub trait VisionClient: Send + Sync {
    async fn analyze(&self, request: &VisionRequest) -> Result<VisionVerdict, EngineError>;
}

#[async_trait]
impl<T: VisionClient + ?Sized> VisionClient for Arc<T> {
    async fn analyze(&self, request: &VisionRequest) -> Result<VisionVerdict, EngineError> {
        (**self).analyze(request).await
    }
}

/// Parse a raw model reply into a verdict.
///
/// Markdown fences are tolerated. A blocked verdict without a blocker is
/// normalised to `"unknown"`.
pub fn parse_verdict(text: &str) -> Result<VisionVerdict, EngineError> {
    let cleaned = strip_fences(text);
    let mut verdict: VisionVerdict = serde_json::from_str(cleaned)
        .map_err(|e| EngineError::VisionContractError(format!("{e}: {cleaned}")))?;

    if verdict.status == VerdictStatus::Blocked
        && verdict.blocker.as_deref().is_none_or(|b| b.trim().is_empty())
    {
        verdict.blocker = Some("unknown".to_string());
    }
    Ok(verdict)
}

/// Remove a surrounding ```json fence if the model added one.
pub fn strip_fences(text: &str) -> &str {
    text.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

const VISION_RULES: &str = r##"Reply with ONE JSON object and nothing else:
{
  "observation": "what the screen shows",
  "status": "step_complete" | "in_progress" | "blocked",
  "blocker": "authentication" | "<other reason>"   (only when blocked),
  "next_actions": [ at most 2 actions ]
}

Actions:
- {"action":"click","selector":"button:has-text('Save')","description":"..."}
- {"action":"fill","selector":"input[name='email']","value":"...","description":"..."}
- {"action":"select","selector":"select#country","value":"...","description":"..."}
- {"action":"wait","selector":"div.modal","duration":2000,"description":"..."}   (selector optional)
- {"action":"scroll","selector":"#share","description":"..."}
- {"action":"press_key","key":"Enter","description":"..."}
- {"action":"navigate","url":"https://...","description":"..."}

Rules:
1. A login page means status "blocked" with blocker "authentication".
2. Ads or interstitials are not failures: suggest a wait.
3. Scroll to elements outside the viewport before acting on them.
4. Use "step_complete" only when the current step is really done.
5. If a previous attempt failed, use a different selector."##;

/// Prompt text sent alongside the screenshot.
pub fn build_prompt(request: &VisionRequest) -> String {
    let plan = request
        .remaining_plan
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {s}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");
    let history = if request.recent_history.is_empty() {
        "None yet.".to_string()
    } else {
        request
            .recent_history
            .iter()
            .map(|h| format!("- {h}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "You guide a browser automation that got stuck. Look at the screenshot.\n\n\
         Current step: \"{}\"\n\nRemaining plan:\n{plan}\n\nRecent actions:\n{history}\n\n{VISION_RULES}",
        request.current_step_description
    )
}

/// Retries transport failures with doubling backoff. Contract violations are
/// returned at once since asking again rarely fixes them.
pub struct RetryingVision<C> {
    inner: C,
    max_attempts: u32,
    backoff: Duration,
}

impl<C: VisionClient> RetryingVision<C> {
    pub fn new(inner: C, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

#[async_trait]
impl<C: VisionClient> VisionClient for RetryingVision<C> {
    async fn analyze(&self, request: &VisionRequest) -> Result<VisionVerdict, EngineError> {
        let mut delay = self.backoff;
        let mut attempt = 1;
        loop {
            match self.inner.analyze(request).await {
                Ok(verdict) => return Ok(verdict),
                Err(EngineError::VisionUnavailable(msg)) if attempt < self.max_attempts => {
                    warn!(attempt, max = self.max_attempts, "vision call failed: {msg}");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(err) => {
                    debug!(attempt, "vision call gave up: {err}");
                    return Err(err);
                }
            }
        }
    }
}
