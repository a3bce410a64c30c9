use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::error::EngineError;
use crate::executor::bounded;

/// Where the coordinator is in its three-tier login strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unknown,
    CheckingPersistent,
    Authenticated,
    NeedsOAuth,
    TryingOAuth,
    NeedsManual,
    WaitingManual,
    Failed,
}

impl AuthState {
    pub fn is_terminal(self) -> bool {
        matches!(self, AuthState::Authenticated | AuthState::Failed)
    }

    pub fn can_transition_to(self, next: AuthState) -> bool {
        use AuthState::*;
        matches!(
            (self, next),
            (Unknown, CheckingPersistent)
                | (CheckingPersistent, Authenticated | NeedsOAuth)
                | (NeedsOAuth, TryingOAuth | NeedsManual)
                | (TryingOAuth, Authenticated | NeedsOAuth)
                | (NeedsManual, WaitingManual | Failed)
                | (WaitingManual, Authenticated | Failed)
                | (Authenticated | Failed, Unknown)
        )
    }
}

/// Heuristics deciding whether the browser sits on a login wall.
pub trait LoginDetector: Send + Sync {
    fn is_login_url(&self, url: &str) -> bool;

    /// Selector whose presence also marks a login form. URL-only when `None`.
    fn password_selector(&self) -> Option<&str> {
        None
    }
}

/// Matches login vocabulary anywhere in the URL.
///
/// A password-field check can be switched on with
/// [`KeywordLoginDetector::with_password_field`]; it is off by default since
/// settings pages carry password inputs too.
#[derive(Debug, Clone)]
pub struct KeywordLoginDetector {
    keywords: Vec<String>,
    password_field: Option<String>,
}

pub const LOGIN_KEYWORDS: &[&str] = &[
    "login",
    "signin",
    "sign-in",
    "auth",
    "signup",
    "sign-up",
    "register",
    "authenticate",
];

impl Default for KeywordLoginDetector {
    fn default() -> Self {
        Self {
            keywords: LOGIN_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            password_field: None,
        }
    }
}

impl KeywordLoginDetector {
    /// Also treat pages showing `selector` as login walls.
    pub fn with_password_field(mut self, selector: impl Into<String>) -> Self {
        self.password_field = Some(selector.into());
        self
    }
}

impl LoginDetector for KeywordLoginDetector {
    fn is_login_url(&self, url: &str) -> bool {
        let url = url.to_lowercase();
        self.keywords.iter().any(|k| url.contains(k.as_str()))
    }

    fn password_selector(&self) -> Option<&str> {
        self.password_field.as_deref()
    }
}

/// Button patterns for one identity provider, tried in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthProvider {
    pub name: String,
    pub selectors: Vec<String>,
}

impl OAuthProvider {
    pub fn new<I, S>(name: impl Into<String>, selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            selectors: selectors.into_iter().map(Into::into).collect(),
        }
    }

    /// The usual "Continue with X" / "Sign in with X" buttons plus attribute hooks.
    fn standard(name: &str, label: &str) -> Self {
        Self::new(
            name,
            [
                format!(r#"button:has-text("Continue with {label}")"#),
                format!(r#"button:has-text("Sign in with {label}")"#),
                format!(r#"a:has-text("Continue with {label}")"#),
                format!(r#"a:has-text("Sign in with {label}")"#),
                format!(r#"[aria-label*="{label}"]"#),
                format!(r#"[data-provider="{name}"]"#),
            ],
        )
    }
}

#[derive(Debug, Clone)]
pub struct ProviderCatalog {
    providers: Vec<OAuthProvider>,
}

impl Default for ProviderCatalog {
    fn default() -> Self {
        Self {
            providers: vec![
                OAuthProvider::standard("google", "Google"),
                OAuthProvider::standard("github", "GitHub"),
            ],
        }
    }
}

impl ProviderCatalog {
    pub fn new(providers: Vec<OAuthProvider>) -> Self {
        Self { providers }
    }

    pub fn with_provider(mut self, provider: OAuthProvider) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn providers(&self) -> &[OAuthProvider] {
        &self.providers
    }
}

/// Gets the session past login walls: persistent session, then provider
/// buttons, then a timed wait for a human.
///
/// `authenticate` takes `&mut self`, so one coordinator never runs two
/// authentications at once. Tiers that were exhausted earlier in the run are
/// skipped on later invocations.
pub struct AuthenticationCoordinator {
    detector: Box<dyn LoginDetector>,
    providers: ProviderCatalog,
    state: AuthState,
    history: Vec<AuthState>,
    oauth_exhausted: bool,
    manual_exhausted: bool,
}

impl Default for AuthenticationCoordinator {
    fn default() -> Self {
        Self::new(
            Box::new(KeywordLoginDetector::default()),
            ProviderCatalog::default(),
        )
    }
}

impl AuthenticationCoordinator {
    pub fn new(detector: Box<dyn LoginDetector>, providers: ProviderCatalog) -> Self {
        Self {
            detector,
            providers,
            state: AuthState::Unknown,
            history: vec![AuthState::Unknown],
            oauth_exhausted: false,
            manual_exhausted: false,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Every state entered so far, across invocations.
    pub fn history(&self) -> &[AuthState] {
        &self.history
    }

    /// Whether the page currently shows a login wall.
    pub async fn on_login_page(&self, ctx: &RunContext) -> Result<bool, EngineError> {
        let url = ctx.current_url().await?;
        if self.detector.is_login_url(&url) {
            return Ok(true);
        }
        let Some(selector) = self.detector.password_selector() else {
            return Ok(false);
        };
        match ctx.session.element_exists(selector).await {
            Ok(found) => Ok(found),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                debug!("password field check failed: {err}");
                Ok(false)
            }
        }
    }

    /// Run the tiers in order. `Ok(false)` means every tier failed; the caller
    /// decides whether to continue.
    pub async fn authenticate(&mut self, ctx: &RunContext) -> Result<bool, EngineError> {
        if self.state != AuthState::Unknown {
            self.reset();
        }
        self.transition(AuthState::CheckingPersistent);

        if !self.on_login_page(ctx).await? {
            info!(run = %ctx.run_id, "tier 1: existing session is authenticated");
            self.transition(AuthState::Authenticated);
            return Ok(true);
        }

        info!(run = %ctx.run_id, "tier 1 failed: login page detected");
        self.transition(AuthState::NeedsOAuth);

        if self.oauth_exhausted {
            debug!("tier 2 exhausted earlier in this run, skipping");
        } else if self.try_oauth(ctx).await? {
            return Ok(true);
        } else {
            self.oauth_exhausted = true;
        }

        self.transition(AuthState::NeedsManual);
        if self.manual_exhausted {
            warn!(run = %ctx.run_id, "manual login already timed out in this run");
            self.transition(AuthState::Failed);
            return Ok(false);
        }

        self.transition(AuthState::WaitingManual);
        warn!(
            run = %ctx.run_id,
            timeout_ms = ctx.config.auth_timeout.as_millis() as u64,
            "MANUAL INTERVENTION REQUIRED: please log in in the browser window"
        );
        if self.wait_off_login(ctx, ctx.config.auth_timeout).await? {
            info!(run = %ctx.run_id, "tier 3: manual login completed");
            self.transition(AuthState::Authenticated);
            return Ok(true);
        }

        let err = EngineError::AuthenticationTimeout(format!(
            "no login within {}ms",
            ctx.config.auth_timeout.as_millis()
        ));
        warn!(run = %ctx.run_id, "{err}");
        self.manual_exhausted = true;
        self.transition(AuthState::Failed);
        Ok(false)
    }

    async fn try_oauth(&mut self, ctx: &RunContext) -> Result<bool, EngineError> {
        let cfg = &ctx.config;

        for provider in self.providers.providers().to_vec() {
            for selector in &provider.selectors {
                let present = match ctx.session.element_exists(selector).await {
                    Ok(present) => present,
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(_) => false,
                };
                if !present {
                    continue;
                }

                info!(provider = %provider.name, selector = %selector, "tier 2: trying OAuth button");
                self.transition(AuthState::TryingOAuth);

                let clicked = bounded(
                    cfg.action_timeout,
                    selector,
                    ctx.session.click(selector, cfg.action_timeout),
                )
                .await;
                match clicked {
                    Ok(()) => {}
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => {
                        debug!(provider = %provider.name, "OAuth click failed: {err}");
                        self.transition(AuthState::NeedsOAuth);
                        continue;
                    }
                }

                if !cfg.oauth_settle.is_zero() {
                    tokio::time::sleep(cfg.oauth_settle).await;
                }
                if self.wait_off_login(ctx, cfg.oauth_redirect_timeout).await? {
                    info!(provider = %provider.name, "tier 2: OAuth login completed");
                    self.transition(AuthState::Authenticated);
                    return Ok(true);
                }

                warn!(provider = %provider.name, "OAuth flow finished but still on a login page");
                self.transition(AuthState::NeedsOAuth);
            }
        }

        info!("tier 2 failed: no usable OAuth button");
        Ok(false)
    }

    /// Poll until the login wall is gone or `timeout` passes.
    async fn wait_off_login(&self, ctx: &RunContext, timeout: Duration) -> Result<bool, EngineError> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.on_login_page(ctx).await? {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline || ctx.cancel.is_cancelled() {
                return Ok(false);
            }
            let nap = ctx.config.auth_poll_interval.min(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(nap) => {}
                _ = ctx.cancel.cancelled() => return Ok(false),
            }
        }
    }

    /// Back to `Unknown`, also from a tier that a session fault cut short.
    fn reset(&mut self) {
        debug!(from = ?self.state, "auth state reset");
        self.state = AuthState::Unknown;
        self.history.push(AuthState::Unknown);
    }

    fn transition(&mut self, next: AuthState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal auth transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(from = ?self.state, to = ?next, "auth state");
        self.state = next;
        self.history.push(next);
    }
}
