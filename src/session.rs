use std::time::Duration;

use async_trait::async_trait;

use crate::error::EngineError;

/// The browser as seen by the engine.
///
/// Implementations map driver failures onto the engine taxonomy:
/// missing targets become [`EngineError::TargetNotFound`], unresponsive ones
/// [`EngineError::ActionTimeout`], and a dead browser
/// [`EngineError::SessionFault`].
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), EngineError>;

    async fn click(&self, selector: &str, timeout: Duration) -> Result<(), EngineError>;

    /// Clear the field, then type `text` into it.
    async fn fill(&self, selector: &str, text: &str, timeout: Duration) -> Result<(), EngineError>;

    async fn select(&self, selector: &str, value: &str, timeout: Duration)
    -> Result<(), EngineError>;

    async fn scroll_into_view(&self, selector: &str, timeout: Duration) -> Result<(), EngineError>;

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), EngineError>;

    async fn press_key(&self, key: &str) -> Result<(), EngineError>;

    async fn current_url(&self) -> Result<String, EngineError>;

    /// Non-blocking presence probe.
    async fn element_exists(&self, selector: &str) -> Result<bool, EngineError>;

    /// PNG bytes of the current viewport.
    async fn screenshot(&self) -> Result<Vec<u8>, EngineError>;

    async fn close(&self) -> Result<(), EngineError>;
}
