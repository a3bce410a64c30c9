//! Execution and recovery engine for browser workflows.
//!
//! A [`planner::Plan`] is driven step by step by the [`runner::WorkflowRunner`]:
//! the [`executor::StepExecutor`] walks each step's locator chain, the
//! [`auth::AuthenticationCoordinator`] gets past login walls, and failed steps
//! are handed to the [`recovery::VisionRecoveryLoop`]. Every attempt is kept
//! as an [`types::ExecutionRecord`]; the [`trace_filter::TraceFilter`] reduces
//! them to the success path.

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod locator;
pub mod loop_guard;
pub mod planner;
pub mod recovery;
pub mod runner;
pub mod session;
pub mod trace_filter;
pub mod trace_store;
pub mod types;
pub mod vision;

#[cfg(test)]
mod testing;

pub use auth::{AuthState, AuthenticationCoordinator, KeywordLoginDetector, LoginDetector, ProviderCatalog};
pub use config::EngineConfig;
pub use context::RunContext;
pub use error::EngineError;
pub use executor::StepExecutor;
pub use locator::Locator;
pub use loop_guard::LoopGuard;
pub use planner::{Plan, PlanRequest, Planner};
pub use recovery::{RecoveryOutcome, VisionRecoveryLoop};
pub use runner::{RunReport, WorkflowRunner};
pub use session::BrowserSession;
pub use trace_filter::{TraceEntry, TraceFilter};
pub use trace_store::{RunMetadata, RunStatus, TraceStore};
pub use types::{ActionKind, ActionRequest, ExecutionRecord, Step, VerdictStatus, VisionVerdict};
pub use vision::{RetryingVision, VisionClient, VisionRequest};
