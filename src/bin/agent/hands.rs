use anyhow::Result;
use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use flowforge::{BrowserSession, EngineError};

use crate::dom;

/// A real Chrome tab. Logins persist in the profile directory between runs.
pub struct ChromeSession {
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromeSession {
    pub fn launch(headless: bool, profile_dir: &Path) -> Result<Self> {
        // 1. Try to connect to existing Chrome (Attach Mode)
        info!("attempting to attach to existing Chrome on port 9222");
        if let Ok(browser) = Browser::connect("http://127.0.0.1:9222".to_string()) {
            info!("attached to existing Chrome");
            let tab = browser.new_tab()?;
            return Ok(Self {
                _browser: browser,
                tab,
            });
        }

        if !profile_dir.exists() {
            info!(profile = %profile_dir.display(), "creating persistent profile");
            std::fs::create_dir_all(profile_dir)?;
            if let Err(e) = sync_profile(profile_dir) {
                warn!("profile sync failed: {e}");
            }
        } else {
            info!(profile = %profile_dir.display(), "reusing persistent profile");
        }

        let options = LaunchOptions {
            headless,
            path: find_chrome(),
            user_data_dir: Some(profile_dir.to_path_buf()),
            window_size: Some((1920, 1080)),
            args: vec![
                std::ffi::OsStr::new("--no-first-run"),
                std::ffi::OsStr::new("--no-default-browser-check"),
                // Anti-bot flags
                std::ffi::OsStr::new("--disable-blink-features=AutomationControlled"),
                std::ffi::OsStr::new("--disable-infobars"),
                std::ffi::OsStr::new("--password-store=basic"),
            ],
            idle_browser_timeout: Duration::from_secs(600),
            ..Default::default()
        };

        info!(headless, "starting Chrome");
        let browser = Browser::new(options)
            .map_err(|e| anyhow::anyhow!("Browser launch failed: {}", e))?;
        let tab = browser.new_tab()?;
        tab.navigate_to("about:blank")?;
        info!("Chrome ready");

        Ok(Self {
            _browser: browser,
            tab,
        })
    }

    /// Run a synchronous driver call off the async runtime.
    async fn blocking<T, F>(&self, call: F) -> Result<T, EngineError>
    where
        F: FnOnce(Arc<Tab>) -> Result<T, EngineError> + Send + 'static,
        T: Send + 'static,
    {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || call(tab))
            .await
            .map_err(|e| EngineError::SessionFault(format!("browser worker panicked: {e}")))?
    }
}

/// Map a driver error onto the engine taxonomy.
pub fn classify(err: anyhow::Error, what: &str) -> EngineError {
    let msg = format!("{err:#}");
    let lower = msg.to_lowercase();
    if ["connection", "disconnected", "closed", "no such target", "target crashed"]
        .iter()
        .any(|m| lower.contains(m))
    {
        EngineError::SessionFault(format!("{what}: {msg}"))
    } else if lower.contains("timed out") || lower.contains("timeout") {
        EngineError::ActionTimeout(format!("{what}: {msg}"))
    } else {
        EngineError::TargetNotFound(format!("{what}: {msg}"))
    }
}

fn element_js(
    tab: &Arc<Tab>,
    selector: &str,
    timeout: Duration,
    function: &str,
    args: Vec<serde_json::Value>,
) -> Result<Option<serde_json::Value>, EngineError> {
    let css = dom::wait_for_target(tab, selector, timeout)?;
    let el = tab.find_element(&css).map_err(|e| classify(e, selector))?;
    let result = el
        .call_js_fn(function, args, false)
        .map_err(|e| classify(e, selector))?;
    Ok(result.value)
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), EngineError> {
        let url = url.to_string();
        self.blocking(move |tab| {
            tab.set_default_timeout(timeout);
            tab.navigate_to(&url).map_err(|e| classify(e, &url))?;
            tab.wait_until_navigated().map_err(|e| classify(e, &url))?;
            if let Ok(title) = dom::page_title(&tab) {
                debug!(url = %url, title = %title, "page loaded");
            }
            Ok(())
        })
        .await
    }

    async fn click(&self, selector: &str, timeout: Duration) -> Result<(), EngineError> {
        let selector = selector.to_string();
        self.blocking(move |tab| {
            let css = dom::wait_for_target(&tab, &selector, timeout)?;
            let el = tab.find_element(&css).map_err(|e| classify(e, &selector))?;
            el.scroll_into_view().map_err(|e| classify(e, &selector))?;
            el.click().map_err(|e| classify(e, &selector))?;
            Ok(())
        })
        .await
    }

    async fn fill(&self, selector: &str, text: &str, timeout: Duration) -> Result<(), EngineError> {
        let selector = selector.to_string();
        let text = text.to_string();
        self.blocking(move |tab| {
            element_js(
                &tab,
                &selector,
                timeout,
                "function() { this.focus(); this.value = ''; this.dispatchEvent(new Event('input', { bubbles: true })); }",
                Vec::new(),
            )?;
            tab.type_str(&text).map_err(|e| classify(e, &selector))?;
            Ok(())
        })
        .await
    }

    async fn select(&self, selector: &str, value: &str, timeout: Duration) -> Result<(), EngineError> {
        let selector = selector.to_string();
        let value = value.to_string();
        self.blocking(move |tab| {
            let picked = element_js(
                &tab,
                &selector,
                timeout,
                "function(v) { const opt = [...this.options].find(o => o.value === v || o.text.trim() === v); if (!opt) return false; this.value = opt.value; this.dispatchEvent(new Event('change', { bubbles: true })); return true; }",
                vec![json!(value)],
            )?;
            if picked.and_then(|v| v.as_bool()) == Some(true) {
                Ok(())
            } else {
                Err(EngineError::TargetNotFound(format!(
                    "{selector} has no option '{value}'"
                )))
            }
        })
        .await
    }

    async fn scroll_into_view(&self, selector: &str, timeout: Duration) -> Result<(), EngineError> {
        let selector = selector.to_string();
        self.blocking(move |tab| {
            let css = dom::wait_for_target(&tab, &selector, timeout)?;
            let el = tab.find_element(&css).map_err(|e| classify(e, &selector))?;
            el.scroll_into_view().map_err(|e| classify(e, &selector))?;
            Ok(())
        })
        .await
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), EngineError> {
        let selector = selector.to_string();
        self.blocking(move |tab| dom::wait_for_target(&tab, &selector, timeout).map(|_| ()))
            .await
    }

    async fn press_key(&self, key: &str) -> Result<(), EngineError> {
        let key = key.to_string();
        self.blocking(move |tab| {
            tab.press_key(&key).map_err(|e| classify(e, &key))?;
            Ok(())
        })
        .await
    }

    async fn current_url(&self) -> Result<String, EngineError> {
        self.blocking(|tab| dom::current_url(&tab)).await
    }

    async fn element_exists(&self, selector: &str) -> Result<bool, EngineError> {
        let selector = selector.to_string();
        self.blocking(move |tab| dom::locate(&tab, &selector).map(|found| found.is_some()))
            .await
    }

    async fn screenshot(&self) -> Result<Vec<u8>, EngineError> {
        self.blocking(|tab| {
            tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
                .map_err(|e| classify(e, "screenshot"))
        })
        .await
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.blocking(|tab| {
            tab.close(true).map_err(|e| classify(e, "close"))?;
            Ok(())
        })
        .await
    }
}

/// Seed a fresh profile with the user's Chrome cookies so existing logins carry over.
fn sync_profile(agent_profile: &Path) -> Result<()> {
    let Some(real_user_data) = chrome_user_data_dir() else {
        return Ok(());
    };
    if !real_user_data.exists() {
        return Ok(());
    }

    // Local State holds the key for decrypting cookies
    let _ = std::fs::copy(
        real_user_data.join("Local State"),
        agent_profile.join("Local State"),
    );

    let real_default = real_user_data.join("Default");
    let agent_default = agent_profile.join("Default");
    std::fs::create_dir_all(&agent_default)?;

    let files = [
        "Cookies",
        "Cookies-journal",
        "Login Data",
        "Login Data-journal",
        "Web Data",
        "Web Data-journal",
        "Preferences",
        "Secure Preferences",
    ];
    for name in &files {
        let src = real_default.join(name);
        if src.exists() {
            let _ = std::fs::copy(&src, agent_default.join(name));
        }
    }

    let real_network = real_default.join("Network");
    let agent_network = agent_default.join("Network");
    if real_network.exists() {
        std::fs::create_dir_all(&agent_network)?;
        for name in ["Cookies", "Cookies-journal", "Network Persistent State"] {
            let src = real_network.join(name);
            if src.exists() {
                let _ = std::fs::copy(&src, agent_network.join(name));
            }
        }
    }

    Ok(())
}

fn chrome_user_data_dir() -> Option<PathBuf> {
    if cfg!(target_os = "windows") {
        dirs::data_local_dir().map(|d| d.join("Google").join("Chrome").join("User Data"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir().map(|d| d.join("Google").join("Chrome"))
    } else {
        dirs::config_dir().map(|d| d.join("google-chrome"))
    }
}

/// Well-known install locations; `None` lets headless_chrome search on its own.
fn find_chrome() -> Option<PathBuf> {
    let mut candidates = vec![
        PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
        PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
        PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
        PathBuf::from("/usr/bin/google-chrome"),
        PathBuf::from("/usr/bin/chromium"),
    ];
    if let Some(local) = dirs::data_local_dir() {
        candidates.push(local.join(r"Google\Chrome\Application\chrome.exe"));
    }
    candidates.into_iter().find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_errors_are_classified() {
        let fault = classify(anyhow::anyhow!("Connection closed by remote"), "click");
        assert!(fault.is_fatal());

        let slow = classify(anyhow::anyhow!("The event waited for never came (timed out)"), "#a");
        assert!(matches!(slow, EngineError::ActionTimeout(_)));

        let missing = classify(anyhow::anyhow!("No element found"), "#a");
        assert!(missing.is_recoverable());
    }
}
