use std::sync::Arc;

use tracing::{info, warn};

use crate::auth::AuthenticationCoordinator;
use crate::context::RunContext;
use crate::error::EngineError;
use crate::executor::StepExecutor;
use crate::loop_guard::LoopGuard;
use crate::types::{ExecutionRecord, Step, VerdictStatus, VisionVerdict};
use crate::vision::{VisionClient, VisionRequest};

#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryOutcome {
    /// Last verdict received, if the collaborator was consulted at all.
    pub verdict: Option<VisionVerdict>,
    pub resolved: bool,
}

impl RecoveryOutcome {
    fn unresolved(verdict: Option<VisionVerdict>) -> Self {
        Self {
            verdict,
            resolved: false,
        }
    }
}

/// Vision-guided recovery for a step whose locators all failed.
///
/// Every attempt is appended to the run's records, and every exit path
/// appends a final record, so the step's outcome is always its last record.
pub struct VisionRecoveryLoop {
    vision: Arc<dyn VisionClient>,
    guard: LoopGuard,
}

impl VisionRecoveryLoop {
    pub fn new(vision: Arc<dyn VisionClient>, guard: LoopGuard) -> Self {
        Self { vision, guard }
    }

    pub async fn recover(
        &self,
        step: &Step,
        remaining: &[Step],
        ctx: &mut RunContext,
        executor: &StepExecutor,
        auth: &mut AuthenticationCoordinator,
    ) -> Result<RecoveryOutcome, EngineError> {
        info!(step = step.ordinal, "entering vision recovery");
        let mut actions_taken = 0usize;
        let mut last_verdict: Option<VisionVerdict> = None;

        loop {
            if ctx.cancel.is_cancelled() {
                self.give_up(step, ctx, "run cancelled during recovery".to_string())
                    .await?;
                return Ok(RecoveryOutcome::unresolved(last_verdict));
            }
            if self.guard.is_stalled(ctx.records(), step.ordinal) {
                let last = ctx
                    .records()
                    .last()
                    .map(|r| r.action_taken.clone())
                    .unwrap_or_default();
                let err = EngineError::LoopStalled(format!(
                    "'{last}' repeated {} times",
                    self.guard.threshold()
                ));
                self.give_up(step, ctx, err.to_string()).await?;
                return Ok(RecoveryOutcome::unresolved(last_verdict));
            }
            if actions_taken >= ctx.config.max_actions_per_step {
                let detail = format!(
                    "action budget of {} exhausted for this step",
                    ctx.config.max_actions_per_step
                );
                self.give_up(step, ctx, detail).await?;
                return Ok(RecoveryOutcome::unresolved(last_verdict));
            }
            if !ctx.try_consume_vision_call() {
                let detail = format!(
                    "vision budget of {} calls exhausted for this run",
                    ctx.config.max_vision_calls
                );
                self.give_up(step, ctx, detail).await?;
                return Ok(RecoveryOutcome::unresolved(last_verdict));
            }

            let shot = ctx.capture_screenshot().await?;
            let (shot_name, png) = match shot {
                Some((name, png)) => (Some(name), png),
                None => (None, Vec::new()),
            };
            let request = VisionRequest {
                screenshot: png,
                remaining_plan: std::iter::once(step)
                    .chain(remaining)
                    .map(|s| s.description.clone())
                    .collect(),
                current_step_description: step.description.clone(),
                recent_history: VisionRequest::history_lines(
                    ctx.records(),
                    ctx.config.history_window,
                ),
            };

            let verdict = match self.vision.analyze(&request).await {
                Ok(verdict) => verdict,
                Err(err) => {
                    warn!(step = step.ordinal, "vision degraded to safe default: {err}");
                    VisionVerdict::fallback(err.to_string())
                }
            };
            info!(
                step = step.ordinal,
                status = ?verdict.status,
                blocker = verdict.blocker.as_deref().unwrap_or("-"),
                "{}",
                verdict.observation
            );
            last_verdict = Some(verdict.clone());

            match verdict.status {
                VerdictStatus::StepComplete => {
                    let url = ctx.current_url().await?;
                    let record = ExecutionRecord::new(
                        step.ordinal,
                        format!("{} (confirmed by vision)", step.description),
                        "done".to_string(),
                    )
                    .with_url(url)
                    .with_screenshot(shot_name)
                    .recovered();
                    ctx.push_record(record);
                    return Ok(RecoveryOutcome {
                        verdict: last_verdict,
                        resolved: true,
                    });
                }
                VerdictStatus::Blocked if verdict.is_auth_blocker() => {
                    info!(step = step.ordinal, "login wall reported, authenticating");
                    if !auth.authenticate(ctx).await? {
                        warn!(step = step.ordinal, "authentication failed, retrying step anyway");
                    }
                    let record = executor.execute(step, ctx).await?.recovered();
                    let resolved = record.success;
                    ctx.push_record(record);
                    return Ok(RecoveryOutcome {
                        verdict: last_verdict,
                        resolved,
                    });
                }
                VerdictStatus::Blocked => {
                    let blocker = verdict.blocker.as_deref().unwrap_or("unknown");
                    let detail = format!("blocked by {blocker}: {}", verdict.observation);
                    self.give_up(step, ctx, detail).await?;
                    return Ok(RecoveryOutcome::unresolved(last_verdict));
                }
                VerdictStatus::InProgress => {
                    if verdict.next_actions.is_empty() {
                        // Nothing suggested still costs the step one action.
                        actions_taken += 1;
                        continue;
                    }
                    for action in verdict
                        .next_actions
                        .iter()
                        .take(ctx.config.max_actions_per_verdict)
                    {
                        if actions_taken >= ctx.config.max_actions_per_step {
                            break;
                        }
                        actions_taken += 1;

                        let description = if action.description.trim().is_empty() {
                            step.description.clone()
                        } else {
                            action.description.clone()
                        };
                        let record = match executor.run_action(action, ctx).await {
                            Ok(signature) => {
                                ExecutionRecord::new(step.ordinal, description, signature)
                            }
                            Err(err) if err.is_fatal() => return Err(err),
                            Err(err) => {
                                warn!(step = step.ordinal, "suggested action failed: {err}");
                                ExecutionRecord::new(step.ordinal, description, action.signature())
                                    .failed(err.to_string())
                            }
                        };
                        if !ctx.config.recovery_settle.is_zero() {
                            tokio::time::sleep(ctx.config.recovery_settle).await;
                        }
                        let url = ctx.current_url().await?;
                        ctx.push_record(record.with_url(url).recovered());
                    }
                }
            }
        }
    }

    /// Close the step with a terminal failure record.
    async fn give_up(
        &self,
        step: &Step,
        ctx: &mut RunContext,
        detail: String,
    ) -> Result<(), EngineError> {
        warn!(step = step.ordinal, "recovery gave up: {detail}");
        let url = ctx.current_url().await?;
        let record = ExecutionRecord::new(step.ordinal, &step.description, step.signature())
            .with_url(url)
            .failed(detail)
            .recovered();
        ctx.push_record(record);
        Ok(())
    }
}
