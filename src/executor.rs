use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::error::EngineError;
use crate::locator::Locator;
use crate::session::BrowserSession;
use crate::types::{ActionKind, ActionRequest, ExecutionRecord, Step, action_signature};

/// Slack given to a driver on top of the budget it was handed.
const DRIVER_GRACE: Duration = Duration::from_millis(500);
const DEFAULT_WAIT_MS: u64 = 3_000;
const DEFAULT_RECOVERY_WAIT_MS: u64 = 2_000;

/// Turns declarative steps into browser calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct StepExecutor;

impl StepExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Execute one planned step, walking its locator chain.
    ///
    /// Always yields a record; only a session fault comes back as `Err`.
    pub async fn execute(
        &self,
        step: &Step,
        ctx: &mut RunContext,
    ) -> Result<ExecutionRecord, EngineError> {
        info!(step = step.ordinal, action = ?step.action, "{}", step.description);

        let outcome = self.perform(step, ctx).await;
        let (signature, failure) = match outcome {
            Ok(signature) => (signature, None),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(step = step.ordinal, "step failed: {err}");
                (step.signature(), Some(err))
            }
        };
        settle(ctx.config.step_settle).await;

        let screenshot = ctx.capture_screenshot().await?.map(|(name, _)| name);
        let url = ctx.current_url().await?;
        let record = ExecutionRecord::new(step.ordinal, &step.description, signature)
            .with_url(url)
            .with_screenshot(screenshot);

        Ok(match failure {
            Some(err) => record.failed(err.to_string()),
            None => record,
        })
    }

    async fn perform(&self, step: &Step, ctx: &RunContext) -> Result<String, EngineError> {
        let session = ctx.session.as_ref();
        let cfg = &ctx.config;

        match step.action {
            ActionKind::Navigate => {
                let url = step.navigation_url().ok_or_else(|| {
                    EngineError::TargetNotFound(format!("step {} has no URL", step.ordinal))
                })?;
                bounded(
                    cfg.navigation_timeout,
                    url,
                    session.navigate(url, cfg.navigation_timeout),
                )
                .await?;
                Ok(action_signature("navigate", Some(url)))
            }
            ActionKind::Click | ActionKind::Fill | ActionKind::Select | ActionKind::Scroll => {
                let locator = require_locator(step)?;
                let selector = self
                    .resolve_with_fallback(
                        step.action,
                        locator,
                        step.value.as_deref(),
                        session,
                        cfg.action_timeout,
                        cfg.alternative_timeout,
                    )
                    .await?;
                Ok(action_signature(step.action.signature_kind(), Some(selector.as_str())))
            }
            ActionKind::Wait => {
                let millis = step
                    .value
                    .as_deref()
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .unwrap_or(DEFAULT_WAIT_MS);
                match &step.locator {
                    Some(locator) => {
                        let budget = Duration::from_millis(millis);
                        let selector = self
                            .resolve_with_fallback(
                                ActionKind::Wait,
                                locator,
                                None,
                                session,
                                budget,
                                budget,
                            )
                            .await?;
                        Ok(action_signature("wait", Some(selector.as_str())))
                    }
                    None => {
                        debug!(step = step.ordinal, millis, "fixed wait");
                        tokio::time::sleep(Duration::from_millis(millis)).await;
                        Ok(action_signature("wait", None))
                    }
                }
            }
            ActionKind::PressKey => {
                let key = step
                    .value
                    .as_deref()
                    .or_else(|| step.locator.as_ref().map(|l| l.primary.as_str()))
                    .ok_or_else(|| {
                        EngineError::TargetNotFound(format!("step {} names no key", step.ordinal))
                    })?;
                bounded(cfg.action_timeout, key, session.press_key(key)).await?;
                Ok(action_signature("press_key", Some(key)))
            }
        }
    }

    /// Try the primary selector, then each alternative, stopping at the first that works.
    pub async fn resolve_with_fallback(
        &self,
        kind: ActionKind,
        locator: &Locator,
        value: Option<&str>,
        session: &dyn BrowserSession,
        primary_timeout: Duration,
        alternative_timeout: Duration,
    ) -> Result<String, EngineError> {
        let mut tried = Vec::new();

        for candidate in locator.candidates() {
            let timeout = if candidate.is_primary() {
                primary_timeout
            } else {
                alternative_timeout
            };
            debug!(selector = candidate.selector, rank = candidate.rank, "trying locator");

            match act_on(kind, candidate.selector, value, session, timeout).await {
                Ok(()) => {
                    if !candidate.is_primary() {
                        info!(
                            selector = candidate.selector,
                            rank = candidate.rank,
                            "alternative locator matched"
                        );
                    }
                    return Ok(candidate.selector.to_string());
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    debug!(selector = candidate.selector, "locator failed: {err}");
                    tried.push(format!("{} ({err})", candidate.selector));
                }
            }
        }

        Err(EngineError::TargetNotFound(format!(
            "no candidate matched: {}",
            tried.join("; ")
        )))
    }

    /// Run one vision-suggested action against a single selector, no fallback chain.
    ///
    /// Returns the signature of what was done.
    pub async fn run_action(
        &self,
        action: &ActionRequest,
        ctx: &RunContext,
    ) -> Result<String, EngineError> {
        let session = ctx.session.as_ref();
        let cfg = &ctx.config;
        debug!(action = ?action.action, "{}", action.description);

        match action.action {
            ActionKind::Navigate => {
                let url = action
                    .url
                    .as_deref()
                    .or(action.selector.as_deref())
                    .ok_or_else(|| EngineError::TargetNotFound("navigate without URL".into()))?;
                bounded(
                    cfg.navigation_timeout,
                    url,
                    session.navigate(url, cfg.navigation_timeout),
                )
                .await?;
            }
            ActionKind::Click | ActionKind::Fill | ActionKind::Select | ActionKind::Scroll => {
                let selector = action.selector.as_deref().ok_or_else(|| {
                    EngineError::TargetNotFound(format!(
                        "{} without selector",
                        action.action.signature_kind()
                    ))
                })?;
                act_on(
                    action.action,
                    selector,
                    action.value.as_deref(),
                    session,
                    cfg.action_timeout,
                )
                .await?;
            }
            ActionKind::Wait => {
                let millis = action.duration_ms.unwrap_or(DEFAULT_RECOVERY_WAIT_MS);
                match action.selector.as_deref() {
                    Some(selector) => {
                        act_on(
                            ActionKind::Wait,
                            selector,
                            None,
                            session,
                            Duration::from_millis(millis),
                        )
                        .await?
                    }
                    None => tokio::time::sleep(Duration::from_millis(millis)).await,
                }
            }
            ActionKind::PressKey => {
                let key = action
                    .key
                    .as_deref()
                    .or(action.value.as_deref())
                    .ok_or_else(|| EngineError::TargetNotFound("press_key without key".into()))?;
                bounded(cfg.action_timeout, key, session.press_key(key)).await?;
            }
        }

        Ok(action.signature())
    }
}

fn require_locator(step: &Step) -> Result<&Locator, EngineError> {
    step.locator.as_ref().ok_or_else(|| {
        EngineError::TargetNotFound(format!(
            "step {} ({}) has no locator",
            step.ordinal,
            step.action.signature_kind()
        ))
    })
}

async fn act_on(
    kind: ActionKind,
    selector: &str,
    value: Option<&str>,
    session: &dyn BrowserSession,
    timeout: Duration,
) -> Result<(), EngineError> {
    let value = value.unwrap_or_default();
    match kind {
        ActionKind::Click => bounded(timeout, selector, session.click(selector, timeout)).await,
        ActionKind::Fill => {
            bounded(timeout, selector, session.fill(selector, value, timeout)).await
        }
        ActionKind::Select => {
            bounded(timeout, selector, session.select(selector, value, timeout)).await
        }
        ActionKind::Scroll => {
            bounded(timeout, selector, session.scroll_into_view(selector, timeout)).await
        }
        ActionKind::Wait => bounded(timeout, selector, session.wait_for(selector, timeout)).await,
        ActionKind::Navigate | ActionKind::PressKey => Err(EngineError::TargetNotFound(format!(
            "{} does not act on an element",
            kind.signature_kind()
        ))),
    }
}

/// Enforce a budget on a driver call even if the driver ignores its own timeout.
pub(crate) async fn bounded<F>(budget: Duration, what: &str, call: F) -> Result<(), EngineError>
where
    F: Future<Output = Result<(), EngineError>>,
{
    match tokio::time::timeout(budget + DRIVER_GRACE, call).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::ActionTimeout(format!(
            "'{what}' did not respond within {}ms",
            budget.as_millis()
        ))),
    }
}

async fn settle(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
