//! In-crate fakes for the browser and the vision collaborator.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::config::EngineConfig;
use crate::context::RunContext;
use crate::error::EngineError;
use crate::session::BrowserSession;
use crate::trace_store::TraceStore;
use crate::types::{ActionRequest, VerdictStatus, VisionVerdict};
use crate::vision::{VisionClient, VisionRequest};

#[derive(Default)]
struct MockState {
    url: String,
    present: HashSet<String>,
    redirects: HashMap<String, String>,
    /// Selectors that appear once the key selector is clicked.
    reveals: HashMap<String, Vec<String>>,
    fault_on: HashSet<String>,
    calls: Vec<String>,
    faulted: bool,
    failing_navigation: bool,
    closed: bool,
}

/// Scriptable stand-in for a browser tab.
#[derive(Default)]
pub(crate) struct MockSession {
    state: Mutex<MockState>,
}

impl MockSession {
    pub fn new(url: &str) -> Self {
        let session = Self::default();
        session.state.lock().unwrap().url = url.to_string();
        session
    }

    pub fn with_element(self, selector: &str) -> Self {
        self.state.lock().unwrap().present.insert(selector.to_string());
        self
    }

    /// Clicking `selector` moves the page to `url`.
    pub fn with_redirect(self, selector: &str, url: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .redirects
            .insert(selector.to_string(), url.to_string());
        self
    }

    /// Clicking `selector` makes `revealed` present.
    pub fn with_reveal(self, selector: &str, revealed: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .reveals
            .entry(selector.to_string())
            .or_default()
            .push(revealed.to_string());
        self
    }

    /// Touching `selector` kills the session.
    pub fn with_fault_on(self, selector: &str) -> Self {
        self.state.lock().unwrap().fault_on.insert(selector.to_string());
        self
    }

    pub fn faulted(self) -> Self {
        self.state.lock().unwrap().faulted = true;
        self
    }

    pub fn failing_navigation(self) -> Self {
        self.state.lock().unwrap().failing_navigation = true;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn url(&self) -> String {
        self.state.lock().unwrap().url.clone()
    }

    pub fn set_url(&self, url: &str) {
        self.state.lock().unwrap().url = url.to_string();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Logged calls whose name is `kind`, e.g. `"click"`.
    pub fn calls_of(&self, kind: &str) -> Vec<String> {
        let prefix = format!("{kind}:");
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .cloned()
            .collect()
    }

    fn touch(&self, call: String, selector: Option<&str>) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if let Some(sel) = selector.filter(|s| state.fault_on.contains(*s)) {
            state.faulted = true;
            return Err(EngineError::SessionFault(format!("browser died at {sel}")));
        }
        if state.faulted {
            return Err(EngineError::SessionFault("connection closed".into()));
        }
        match selector {
            Some(sel) if !state.present.contains(sel) => {
                Err(EngineError::TargetNotFound(sel.to_string()))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl BrowserSession for MockSession {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<(), EngineError> {
        self.touch(format!("navigate:{url}"), None)?;
        let mut state = self.state.lock().unwrap();
        if state.failing_navigation {
            return Err(EngineError::ActionTimeout(format!("{url} did not load")));
        }
        state.url = url.to_string();
        Ok(())
    }

    async fn click(&self, selector: &str, _timeout: Duration) -> Result<(), EngineError> {
        self.touch(format!("click:{selector}"), Some(selector))?;
        let mut state = self.state.lock().unwrap();
        if let Some(url) = state.redirects.get(selector).cloned() {
            state.url = url;
        }
        if let Some(revealed) = state.reveals.get(selector).cloned() {
            state.present.extend(revealed);
        }
        Ok(())
    }

    async fn fill(&self, selector: &str, text: &str, _timeout: Duration) -> Result<(), EngineError> {
        self.touch(format!("fill:{selector}={text}"), Some(selector))
    }

    async fn select(&self, selector: &str, value: &str, _timeout: Duration) -> Result<(), EngineError> {
        self.touch(format!("select:{selector}={value}"), Some(selector))
    }

    async fn scroll_into_view(&self, selector: &str, _timeout: Duration) -> Result<(), EngineError> {
        self.touch(format!("scroll:{selector}"), Some(selector))
    }

    async fn wait_for(&self, selector: &str, _timeout: Duration) -> Result<(), EngineError> {
        self.touch(format!("wait:{selector}"), Some(selector))
    }

    async fn press_key(&self, key: &str) -> Result<(), EngineError> {
        self.touch(format!("press_key:{key}"), None)
    }

    async fn current_url(&self) -> Result<String, EngineError> {
        let state = self.state.lock().unwrap();
        if state.faulted {
            return Err(EngineError::SessionFault("connection closed".into()));
        }
        Ok(state.url.clone())
    }

    async fn element_exists(&self, selector: &str) -> Result<bool, EngineError> {
        let state = self.state.lock().unwrap();
        if state.faulted {
            return Err(EngineError::SessionFault("connection closed".into()));
        }
        Ok(state.present.contains(selector))
    }

    async fn screenshot(&self) -> Result<Vec<u8>, EngineError> {
        let state = self.state.lock().unwrap();
        if state.faulted {
            return Err(EngineError::SessionFault("connection closed".into()));
        }
        Ok(b"\x89PNG fake".to_vec())
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Vision collaborator that replays canned verdicts.
pub(crate) struct ScriptedVision {
    replies: Mutex<VecDeque<Result<VisionVerdict, EngineError>>>,
    requests: Mutex<Vec<VisionRequest>>,
}

impl ScriptedVision {
    pub fn new<I>(replies: I) -> Arc<Self>
    where
        I: IntoIterator<Item = Result<VisionVerdict, EngineError>>,
    {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<VisionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl VisionClient for ScriptedVision {
    async fn analyze(&self, request: &VisionRequest) -> Result<VisionVerdict, EngineError> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(verdict(VerdictStatus::Blocked, Some("script exhausted"), vec![])))
    }
}

pub(crate) fn verdict(
    status: VerdictStatus,
    blocker: Option<&str>,
    next_actions: Vec<ActionRequest>,
) -> VisionVerdict {
    VisionVerdict {
        observation: format!("{status:?}"),
        status,
        blocker: blocker.map(str::to_string),
        next_actions,
    }
}

/// Fresh run context over `session`, no delays, traces in a temp dir.
pub(crate) fn test_context(session: Arc<MockSession>) -> (RunContext, TempDir) {
    test_context_with(session, EngineConfig::without_delays())
}

pub(crate) fn test_context_with(
    session: Arc<MockSession>,
    mut config: EngineConfig,
) -> (RunContext, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    config.output_dir = dir.path().to_path_buf();
    let store = TraceStore::create(dir.path(), "run-test").unwrap();
    (RunContext::new("run-test", session, config, store), dir)
}
