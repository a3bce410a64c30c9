use std::path::PathBuf;
use std::time::Duration;

use crate::error::EngineError;

/// Tunables for one run. Defaults mirror what works against typical SaaS apps.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Budget for the primary locator of an element action.
    pub action_timeout: Duration,
    /// Budget for each alternative locator (fail fast, try next).
    pub alternative_timeout: Duration,
    pub navigation_timeout: Duration,
    /// Manual login wait.
    pub auth_timeout: Duration,
    pub oauth_redirect_timeout: Duration,
    /// Pause after clicking a provider button before watching the URL.
    pub oauth_settle: Duration,
    pub auth_poll_interval: Duration,
    pub loop_detection_threshold: usize,
    pub max_actions_per_step: usize,
    /// Actions taken from a single in-progress verdict.
    pub max_actions_per_verdict: usize,
    pub max_vision_calls: u32,
    pub step_settle: Duration,
    pub recovery_settle: Duration,
    pub vision_max_retries: u32,
    pub vision_backoff: Duration,
    /// Prior records shown to the vision collaborator.
    pub history_window: usize,
    pub output_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            action_timeout: Duration::from_millis(5_000),
            alternative_timeout: Duration::from_millis(3_000),
            navigation_timeout: Duration::from_millis(30_000),
            auth_timeout: Duration::from_millis(30_000),
            oauth_redirect_timeout: Duration::from_millis(15_000),
            oauth_settle: Duration::from_millis(2_000),
            auth_poll_interval: Duration::from_millis(500),
            loop_detection_threshold: 3,
            max_actions_per_step: 10,
            max_actions_per_verdict: 2,
            max_vision_calls: 50,
            step_settle: Duration::from_millis(2_000),
            recovery_settle: Duration::from_millis(3_000),
            vision_max_retries: 3,
            vision_backoff: Duration::from_millis(2_000),
            history_window: 3,
            output_dir: PathBuf::from("output"),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `FLOWFORGE_*` environment variables.
    pub fn from_env() -> Result<Self, EngineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        let millis = |key: &str, slot: &mut Duration| -> Result<(), EngineError> {
            if let Some(raw) = lookup(key) {
                *slot = Duration::from_millis(parse_number(key, &raw)?);
            }
            Ok(())
        };
        millis("FLOWFORGE_ACTION_TIMEOUT_MS", &mut cfg.action_timeout)?;
        millis("FLOWFORGE_ALTERNATIVE_TIMEOUT_MS", &mut cfg.alternative_timeout)?;
        millis("FLOWFORGE_NAVIGATION_TIMEOUT_MS", &mut cfg.navigation_timeout)?;
        millis("FLOWFORGE_AUTH_TIMEOUT_MS", &mut cfg.auth_timeout)?;
        millis("FLOWFORGE_OAUTH_REDIRECT_TIMEOUT_MS", &mut cfg.oauth_redirect_timeout)?;
        millis("FLOWFORGE_OAUTH_SETTLE_MS", &mut cfg.oauth_settle)?;
        millis("FLOWFORGE_AUTH_POLL_MS", &mut cfg.auth_poll_interval)?;
        millis("FLOWFORGE_STEP_SETTLE_MS", &mut cfg.step_settle)?;
        millis("FLOWFORGE_RECOVERY_SETTLE_MS", &mut cfg.recovery_settle)?;
        millis("FLOWFORGE_VISION_BACKOFF_MS", &mut cfg.vision_backoff)?;

        if let Some(raw) = lookup("FLOWFORGE_LOOP_THRESHOLD") {
            cfg.loop_detection_threshold = parse_number("FLOWFORGE_LOOP_THRESHOLD", &raw)? as usize;
        }
        if let Some(raw) = lookup("FLOWFORGE_MAX_ACTIONS_PER_STEP") {
            cfg.max_actions_per_step =
                parse_number("FLOWFORGE_MAX_ACTIONS_PER_STEP", &raw)? as usize;
        }
        if let Some(raw) = lookup("FLOWFORGE_MAX_ACTIONS_PER_VERDICT") {
            cfg.max_actions_per_verdict =
                parse_number("FLOWFORGE_MAX_ACTIONS_PER_VERDICT", &raw)? as usize;
        }
        if let Some(raw) = lookup("FLOWFORGE_MAX_VISION_CALLS") {
            cfg.max_vision_calls = parse_number("FLOWFORGE_MAX_VISION_CALLS", &raw)? as u32;
        }
        if let Some(raw) = lookup("FLOWFORGE_VISION_RETRIES") {
            cfg.vision_max_retries = parse_number("FLOWFORGE_VISION_RETRIES", &raw)? as u32;
        }
        if let Some(raw) = lookup("FLOWFORGE_HISTORY_WINDOW") {
            cfg.history_window = parse_number("FLOWFORGE_HISTORY_WINDOW", &raw)? as usize;
        }
        if let Some(raw) = lookup("FLOWFORGE_OUTPUT_DIR") {
            cfg.output_dir = PathBuf::from(raw);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.loop_detection_threshold < 2 {
            return Err(EngineError::Config(
                "loop detection threshold must be at least 2".to_string(),
            ));
        }
        if self.max_actions_per_verdict == 0 {
            return Err(EngineError::Config(
                "at least one action per verdict is required".to_string(),
            ));
        }
        if self.vision_max_retries == 0 {
            return Err(EngineError::Config(
                "vision calls need at least one attempt".to_string(),
            ));
        }
        if self.auth_poll_interval.is_zero() {
            return Err(EngineError::Config(
                "auth poll interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Config with every delay collapsed, for tests and dry runs.
    pub fn without_delays() -> Self {
        Self {
            step_settle: Duration::ZERO,
            recovery_settle: Duration::ZERO,
            oauth_settle: Duration::ZERO,
            vision_backoff: Duration::ZERO,
            ..Self::default()
        }
    }
}

fn parse_number(key: &str, raw: &str) -> Result<u64, EngineError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| EngineError::Config(format!("{key} must be a non-negative integer, got '{raw}'")))
}
