use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::session::BrowserSession;
use crate::trace_store::TraceStore;
use crate::types::ExecutionRecord;

/// Everything one run owns. Passed explicitly to every component; runs never share one.
pub struct RunContext {
    pub run_id: String,
    pub session: Arc<dyn BrowserSession>,
    pub config: EngineConfig,
    pub store: TraceStore,
    pub cancel: CancellationToken,
    pub started_at: DateTime<Utc>,
    records: Vec<ExecutionRecord>,
    vision_calls: u32,
}

impl RunContext {
    pub fn new(
        run_id: impl Into<String>,
        session: Arc<dyn BrowserSession>,
        config: EngineConfig,
        store: TraceStore,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            session,
            config,
            store,
            cancel: CancellationToken::new(),
            started_at: Utc::now(),
            records: Vec::new(),
            vision_calls: 0,
        }
    }

    /// Fresh run id plus its trace directory under `config.output_dir`.
    pub fn create(session: Arc<dyn BrowserSession>, config: EngineConfig) -> Result<Self, EngineError> {
        let run_id = format!(
            "run_{}_{}",
            Utc::now().format("%Y%m%d_%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let store = TraceStore::create(&config.output_dir, &run_id)?;
        Ok(Self::new(run_id, session, config, store))
    }

    pub fn records(&self) -> &[ExecutionRecord] {
        &self.records
    }

    pub fn push_record(&mut self, record: ExecutionRecord) {
        self.records.push(record);
    }

    pub fn into_records(self) -> Vec<ExecutionRecord> {
        self.records
    }

    pub fn vision_calls(&self) -> u32 {
        self.vision_calls
    }

    /// Take one call from the per-run vision budget. `false` once it is spent.
    pub fn try_consume_vision_call(&mut self) -> bool {
        if self.vision_calls >= self.config.max_vision_calls {
            return false;
        }
        self.vision_calls += 1;
        true
    }

    /// Capture and persist a screenshot. Capture problems are logged, not raised,
    /// unless the session itself is gone.
    pub async fn capture_screenshot(&mut self) -> Result<Option<(String, Vec<u8>)>, EngineError> {
        let png = match self.session.screenshot().await {
            Ok(png) => png,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(run = %self.run_id, "screenshot capture failed: {err}");
                return Ok(None);
            }
        };
        match self.store.save_screenshot(&png) {
            Ok(name) => Ok(Some((name, png))),
            Err(err) => {
                warn!(run = %self.run_id, "screenshot could not be written: {err}");
                Ok(None)
            }
        }
    }

    /// Current URL, or `"unknown"` when the page cannot be asked.
    pub async fn current_url(&self) -> Result<String, EngineError> {
        match self.session.current_url().await {
            Ok(url) => Ok(url),
            Err(err) if err.is_fatal() => Err(err),
            Err(_) => Ok("unknown".to_string()),
        }
    }
}
