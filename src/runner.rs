use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::auth::AuthenticationCoordinator;
use crate::config::EngineConfig;
use crate::context::RunContext;
use crate::error::EngineError;
use crate::executor::{StepExecutor, bounded};
use crate::loop_guard::LoopGuard;
use crate::planner::Plan;
use crate::recovery::VisionRecoveryLoop;
use crate::trace_filter::TraceEntry;
use crate::trace_store::{RunCounters, RunMetadata, RunStatus, StepOutcome, plan_outcomes};
use crate::types::{ActionKind, ExecutionRecord};
use crate::vision::VisionClient;

/// What a caller gets back once a run is over, however it ended.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub abort_reason: Option<String>,
    pub records: Vec<ExecutionRecord>,
    pub outcomes: Vec<StepOutcome>,
    pub success_path: Vec<TraceEntry>,
    /// `None` when the metadata file could not be written.
    pub metadata_path: Option<PathBuf>,
}

/// Drives a whole plan through execution, authentication and recovery.
pub struct WorkflowRunner {
    executor: StepExecutor,
    auth: AuthenticationCoordinator,
    recovery: VisionRecoveryLoop,
}

impl WorkflowRunner {
    pub fn new(vision: Arc<dyn VisionClient>, config: &EngineConfig) -> Self {
        Self {
            executor: StepExecutor::new(),
            auth: AuthenticationCoordinator::default(),
            recovery: VisionRecoveryLoop::new(vision, LoopGuard::new(config.loop_detection_threshold)),
        }
    }

    pub fn with_auth(mut self, auth: AuthenticationCoordinator) -> Self {
        self.auth = auth;
        self
    }

    pub fn auth(&self) -> &AuthenticationCoordinator {
        &self.auth
    }

    /// Run `plan` to completion. Only an invalid plan is returned as `Err`;
    /// session faults and cancellation end up in an `Aborted` report. The
    /// session is closed and `metadata.json` written on every path.
    pub async fn run(&mut self, mut ctx: RunContext, plan: &Plan) -> Result<RunReport, EngineError> {
        plan.validate()?;
        info!(
            run = %ctx.run_id,
            task = %plan.request.task,
            steps = plan.steps.len(),
            "run started"
        );

        let abort_reason = match self.drive(&mut ctx, plan).await {
            Ok(reason) => reason,
            Err(err) => {
                error!(run = %ctx.run_id, "run aborted: {err}");
                Some(err.to_string())
            }
        };

        if let Err(err) = ctx.session.close().await {
            warn!(run = %ctx.run_id, "closing the session failed: {err}");
        }

        let outcomes = plan_outcomes(&plan.steps, ctx.records());
        let status = match &abort_reason {
            Some(_) => RunStatus::Aborted,
            None if outcomes.iter().all(|o| o.success) => RunStatus::Success,
            None => RunStatus::Partial,
        };

        let metadata = RunMetadata {
            run_id: ctx.run_id.clone(),
            task: plan.request.task.clone(),
            app_name: plan.request.app_name.clone(),
            app_url: plan.request.app_url.clone(),
            status: status.clone(),
            abort_reason: abort_reason.clone(),
            started_at: ctx.started_at,
            finished_at: Utc::now(),
            counters: RunCounters::from_outcomes(&outcomes),
            records: ctx.records().to_vec(),
        };
        let metadata_path = match ctx.store.save_metadata(&metadata) {
            Ok(path) => Some(path),
            Err(err) => {
                error!(run = %ctx.run_id, "metadata could not be saved: {err}");
                None
            }
        };

        info!(
            run = %ctx.run_id,
            status = ?status,
            successful = metadata.counters.successful_steps,
            failed = metadata.counters.failed_steps,
            "run finished"
        );

        let success_path = metadata.success_path();
        Ok(RunReport {
            run_id: metadata.run_id,
            status,
            abort_reason,
            records: metadata.records,
            outcomes,
            success_path,
            metadata_path,
        })
    }

    /// `Ok(Some(reason))` when cancelled, `Err` on a session fault.
    async fn drive(&mut self, ctx: &mut RunContext, plan: &Plan) -> Result<Option<String>, EngineError> {
        if let Some(url) = entry_url(plan) {
            let timeout = ctx.config.navigation_timeout;
            info!(run = %ctx.run_id, url = %url, "opening application");
            if let Err(err) = bounded(timeout, url, ctx.session.navigate(url, timeout)).await {
                if err.is_fatal() {
                    return Err(err);
                }
                return Err(EngineError::SessionFault(format!("could not open {url}: {err}")));
            }
        }

        if !self.auth.authenticate(ctx).await? {
            warn!(run = %ctx.run_id, "authentication failed, continuing anyway");
        }

        for (index, step) in plan.steps.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                return Ok(Some(format!("cancelled before step {}", step.ordinal)));
            }

            if self.auth.on_login_page(ctx).await? {
                info!(step = step.ordinal, "login wall detected before step");
                if !self.auth.authenticate(ctx).await? {
                    warn!(step = step.ordinal, "authentication failed, attempting step anyway");
                }
            }

            let record = match self.executor.execute(step, ctx).await {
                Ok(record) => record,
                Err(err) => {
                    ctx.push_record(
                        ExecutionRecord::new(step.ordinal, &step.description, step.signature())
                            .failed(err.to_string()),
                    );
                    return Err(err);
                }
            };
            let succeeded = record.success;
            ctx.push_record(record);
            if succeeded {
                continue;
            }

            let outcome = self
                .recovery
                .recover(
                    step,
                    &plan.steps[index + 1..],
                    ctx,
                    &self.executor,
                    &mut self.auth,
                )
                .await?;
            if !outcome.resolved {
                warn!(step = step.ordinal, "step failed, continuing with the next one");
            }
        }

        if ctx.cancel.is_cancelled() {
            return Ok(Some("cancelled after the last step".to_string()));
        }
        Ok(None)
    }
}

/// Page to open before authenticating: the app URL, else the first navigate step.
fn entry_url(plan: &Plan) -> Option<&str> {
    let app_url = plan.request.app_url.trim();
    if !app_url.is_empty() {
        return Some(app_url);
    }
    plan.steps
        .iter()
        .find(|s| s.action == ActionKind::Navigate)
        .and_then(|s| s.navigation_url())
}
