use thiserror::Error;

/// Everything that can go wrong while driving a run.
///
/// Only [`EngineError::SessionFault`] is fatal to a run. Every other variant is
/// absorbed by the component that raised it and turned into a failed
/// [`ExecutionRecord`](crate::types::ExecutionRecord) or a degraded verdict.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    /// Every locator candidate was tried and none resolved.
    #[error("target not found: {0}")]
    TargetNotFound(String),

    /// A resolved target did not respond within its budget.
    #[error("action timed out: {0}")]
    ActionTimeout(String),

    /// No authentication tier completed within its budget.
    #[error("authentication timed out: {0}")]
    AuthenticationTimeout(String),

    /// The vision collaborator returned something we could not interpret.
    #[error("vision contract violated: {0}")]
    VisionContractError(String),

    /// The vision collaborator could not be reached.
    #[error("vision collaborator unavailable: {0}")]
    VisionUnavailable(String),

    /// The same action kept repeating for one step.
    #[error("loop stalled: {0}")]
    LoopStalled(String),

    /// The browser session itself is unusable.
    #[error("browser session fault: {0}")]
    SessionFault(String),

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("planner failed: {0}")]
    Planner(String),

    #[error("trace storage error: {0}")]
    Storage(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::SessionFault(_))
    }

    /// Whether the vision recovery loop should take over after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::TargetNotFound(_) | EngineError::ActionTimeout(_)
        )
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}
