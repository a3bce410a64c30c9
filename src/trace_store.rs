use std::fs::OpenOptions;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::trace_filter::{TraceEntry, TraceFilter};
use crate::types::{ExecutionRecord, Step};

pub const METADATA_FILE: &str = "metadata.json";

/// Overall verdict on a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Partial,
    Aborted,
}

/// Final outcome of one planned step: its last record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub step_ordinal: u32,
    pub description: String,
    pub success: bool,
    pub recovery_used: bool,
    pub attempts: usize,
    pub error_detail: Option<String>,
}

/// Collapse the record sequence into one outcome per step, in ordinal order of first appearance.
pub fn step_outcomes(records: &[ExecutionRecord]) -> Vec<StepOutcome> {
    let mut outcomes: Vec<StepOutcome> = Vec::new();
    for record in records {
        match outcomes
            .iter_mut()
            .find(|o| o.step_ordinal == record.step_ordinal)
        {
            Some(outcome) => {
                outcome.success = record.success;
                outcome.recovery_used |= record.recovery_used;
                outcome.attempts += 1;
                outcome.error_detail = record.error_detail.clone();
            }
            None => outcomes.push(StepOutcome {
                step_ordinal: record.step_ordinal,
                description: record.description.clone(),
                success: record.success,
                recovery_used: record.recovery_used,
                attempts: 1,
                error_detail: record.error_detail.clone(),
            }),
        }
    }
    outcomes
}

/// One outcome per planned step, in plan order. Steps the run never reached
/// are listed as failed with zero attempts.
pub fn plan_outcomes(steps: &[Step], records: &[ExecutionRecord]) -> Vec<StepOutcome> {
    let mut seen = step_outcomes(records);
    steps
        .iter()
        .map(|step| match seen.iter().position(|o| o.step_ordinal == step.ordinal) {
            Some(index) => seen.swap_remove(index),
            None => StepOutcome {
                step_ordinal: step.ordinal,
                description: step.description.clone(),
                success: false,
                recovery_used: false,
                attempts: 0,
                error_detail: Some("not attempted".to_string()),
            },
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCounters {
    pub total_steps: usize,
    pub successful_steps: usize,
    pub failed_steps: usize,
}

impl RunCounters {
    pub fn from_outcomes(outcomes: &[StepOutcome]) -> Self {
        let successful_steps = outcomes.iter().filter(|o| o.success).count();
        Self {
            total_steps: outcomes.len(),
            successful_steps,
            failed_steps: outcomes.len() - successful_steps,
        }
    }
}

/// Everything persisted about a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub run_id: String,
    pub task: String,
    pub app_name: String,
    pub app_url: String,
    pub status: RunStatus,
    pub abort_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub counters: RunCounters,
    pub records: Vec<ExecutionRecord>,
}

impl RunMetadata {
    /// The retry-free view over the stored records.
    pub fn success_path(&self) -> Vec<TraceEntry> {
        let raw: Vec<TraceEntry> = self.records.iter().map(TraceEntry::from_record).collect();
        TraceFilter::default().extract_success_path(&raw)
    }
}

/// One directory per run holding numbered screenshots and `metadata.json`.
#[derive(Debug)]
pub struct TraceStore {
    dir: PathBuf,
    screenshots: u32,
}

impl TraceStore {
    pub fn create(root: &Path, run_id: &str) -> Result<Self, EngineError> {
        let dir = root.join(run_id);
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            screenshots: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the next `screenshot_NNN.png` and return its name relative to the run directory.
    pub fn save_screenshot(&mut self, png: &[u8]) -> Result<String, EngineError> {
        self.screenshots += 1;
        let name = format!("screenshot_{:03}.png", self.screenshots);
        std::fs::write(self.dir.join(&name), png)?;
        Ok(name)
    }

    pub fn read_screenshot(&self, name: &str) -> Result<Vec<u8>, EngineError> {
        Ok(std::fs::read(self.dir.join(name))?)
    }

    pub fn save_metadata(&self, metadata: &RunMetadata) -> Result<PathBuf, EngineError> {
        let path = self.dir.join(METADATA_FILE);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        serde_json::to_writer_pretty(file, metadata)?;
        Ok(path)
    }

    pub fn load_metadata(run_dir: &Path) -> Result<RunMetadata, EngineError> {
        let file = std::fs::File::open(run_dir.join(METADATA_FILE))?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ordinal: u32, signature: &str, success: bool) -> ExecutionRecord {
        let r = ExecutionRecord::new(ordinal, format!("step {ordinal}"), signature.to_string());
        if success { r } else { r.failed("target not found: #x") }
    }

    #[test]
    fn last_record_decides_each_step() {
        let records = vec![
            record(1, "navigate:https://app.test", true),
            record(2, "click:#new", false),
            record(2, "click:button.new", true).recovered(),
            record(3, "input:#name", false),
        ];
        let outcomes = step_outcomes(&records);
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[1].success && outcomes[1].recovery_used);
        assert_eq!(outcomes[1].attempts, 2);
        assert!(!outcomes[2].success);

        let counters = RunCounters::from_outcomes(&outcomes);
        assert_eq!(counters.total_steps, 3);
        assert_eq!(counters.successful_steps, 2);
        assert_eq!(counters.failed_steps, 1);
    }

    #[test]
    fn unreached_steps_still_count_as_failed() {
        let steps: Vec<Step> = (1..=3)
            .map(|ordinal| Step {
                ordinal,
                action: crate::types::ActionKind::Click,
                locator: Some(crate::locator::Locator::new("#x")),
                value: None,
                description: format!("step {ordinal}"),
                expected_outcome: String::new(),
            })
            .collect();
        let records = vec![record(1, "click:#x", true)];

        let outcomes = plan_outcomes(&steps, &records);
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].success);
        assert_eq!(outcomes[2].attempts, 0);
        assert_eq!(outcomes[2].error_detail.as_deref(), Some("not attempted"));

        let counters = RunCounters::from_outcomes(&outcomes);
        assert_eq!(counters.total_steps, 3);
        assert_eq!(counters.successful_steps, 1);
        assert_eq!(counters.failed_steps, 2);
    }

    #[test]
    fn screenshots_are_numbered_and_metadata_round_trips() {
        let root = tempfile::tempdir().unwrap();
        let mut store = TraceStore::create(root.path(), "run-1").unwrap();
        assert_eq!(store.save_screenshot(b"a").unwrap(), "screenshot_001.png");
        assert_eq!(store.save_screenshot(b"b").unwrap(), "screenshot_002.png");
        assert_eq!(store.read_screenshot("screenshot_002.png").unwrap(), b"b");

        let records = vec![record(1, "navigate:https://app.test", true)];
        let outcomes = step_outcomes(&records);
        let meta = RunMetadata {
            run_id: "run-1".into(),
            task: "demo".into(),
            app_name: "App".into(),
            app_url: "https://app.test".into(),
            status: RunStatus::Success,
            abort_reason: None,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            counters: RunCounters::from_outcomes(&outcomes),
            records,
        };
        store.save_metadata(&meta).unwrap();

        let loaded = TraceStore::load_metadata(store.dir()).unwrap();
        assert_eq!(loaded, meta);
        assert_eq!(loaded.success_path().len(), 1);
    }
}
