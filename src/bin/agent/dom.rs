use headless_chrome::Tab;
use std::sync::Arc;
use std::time::{Duration, Instant};

use flowforge::EngineError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Tags the first element under `base` whose text contains `text` so it can be
/// addressed with plain CSS afterwards. Returns whether one was found.
///
/// Locators coming from planners and vision models use `:has-text("...")`,
/// which the browser's own selector engine does not understand.
const ANCHOR_JS: &str = r#"
(base, text, token) => {
  const wanted = text.trim().toLowerCase();
  const nodes = document.querySelectorAll(base);
  for (const el of nodes) {
    const label = (el.innerText || el.textContent || el.value || '').trim().toLowerCase();
    if (label.includes(wanted)) {
      el.setAttribute('data-flowforge-anchor', token);
      return true;
    }
  }
  return false;
}
"#;

/// A selector split into a CSS part and an optional text filter.
#[derive(Debug, PartialEq, Eq)]
pub struct ParsedSelector {
    pub css: String,
    pub text: Option<String>,
}

/// Split a selector list on its top-level commas, ignoring commas inside
/// quotes or parentheses.
pub fn split_selector_list(selector: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in selector.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '(' | '[') => depth += 1,
            (None, ')' | ']') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                parts.push(&selector[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&selector[start..]);
    parts.into_iter().map(str::trim).filter(|p| !p.is_empty()).collect()
}

/// Split `button:has-text("Save")` into `button` + `Save`. Plain CSS passes through.
pub fn parse_selector(selector: &str) -> ParsedSelector {
    let Some((base, rest)) = selector.split_once(":has-text(") else {
        return ParsedSelector {
            css: selector.trim().to_string(),
            text: None,
        };
    };
    let rest = rest.trim_start();
    let text = match rest.chars().next() {
        Some(q @ ('"' | '\'')) => rest[1..].split(q).next().unwrap_or_default(),
        _ => rest.split(')').next().unwrap_or_default(),
    };
    let css = if base.trim().is_empty() { "*" } else { base.trim() };
    ParsedSelector {
        css: css.to_string(),
        text: Some(text.trim().to_string()),
    }
}

/// One lookup: the CSS selector addressing the element now, if it is there.
/// A selector list resolves to its first part that matches.
pub fn locate(tab: &Arc<Tab>, selector: &str) -> Result<Option<String>, EngineError> {
    for part in split_selector_list(selector) {
        if let Some(css) = locate_one(tab, part)? {
            return Ok(Some(css));
        }
    }
    Ok(None)
}

fn locate_one(tab: &Arc<Tab>, selector: &str) -> Result<Option<String>, EngineError> {
    let parsed = parse_selector(selector);
    let script = match &parsed.text {
        None => format!(
            "document.querySelector({}) !== null",
            js_string(&parsed.css)
        ),
        Some(text) => {
            let token = uuid::Uuid::new_v4().simple().to_string();
            let call = format!(
                "({ANCHOR_JS})({}, {}, {})",
                js_string(&parsed.css),
                js_string(text),
                js_string(&token)
            );
            let found = evaluate_bool(tab, &call)?;
            return Ok(found.then(|| format!("[data-flowforge-anchor=\"{token}\"]")));
        }
    };
    Ok(evaluate_bool(tab, &script)?.then_some(parsed.css))
}

/// Poll until `selector` resolves or `timeout` passes.
pub fn wait_for_target(tab: &Arc<Tab>, selector: &str, timeout: Duration) -> Result<String, EngineError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(css) = locate(tab, selector)? {
            return Ok(css);
        }
        if Instant::now() >= deadline {
            return Err(EngineError::TargetNotFound(format!(
                "{selector} not present after {}ms",
                timeout.as_millis()
            )));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn evaluate_bool(tab: &Arc<Tab>, script: &str) -> Result<bool, EngineError> {
    let result = tab
        .evaluate(script, false)
        .map_err(|e| crate::hands::classify(e, "evaluate"))?;
    Ok(result.value.and_then(|v| v.as_bool()).unwrap_or(false))
}

fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

fn evaluate_string(tab: &Arc<Tab>, expression: &str) -> Result<Option<String>, EngineError> {
    let result = tab
        .evaluate(expression, false)
        .map_err(|e| crate::hands::classify(e, expression))?;
    Ok(result.value.and_then(|v| v.as_str().map(String::from)))
}

/// `window.location.href`, or `about:blank` when the page reports nothing.
pub fn current_url(tab: &Arc<Tab>) -> Result<String, EngineError> {
    Ok(evaluate_string(tab, "window.location.href")?.unwrap_or_else(|| "about:blank".to_string()))
}

pub fn page_title(tab: &Arc<Tab>) -> Result<String, EngineError> {
    Ok(evaluate_string(tab, "document.title")?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_text_is_split_from_css() {
        assert_eq!(
            parse_selector(r#"button:has-text("Continue with Google")"#),
            ParsedSelector {
                css: "button".into(),
                text: Some("Continue with Google".into()),
            }
        );
        assert_eq!(
            parse_selector(":has-text('Save')"),
            ParsedSelector {
                css: "*".into(),
                text: Some("Save".into()),
            }
        );
    }

    #[test]
    fn selector_lists_split_on_top_level_commas_only() {
        assert_eq!(
            split_selector_list("button:has-text('Create, then open'), button[type='submit'] ,"),
            vec!["button:has-text('Create, then open')", "button[type='submit']"]
        );
        assert_eq!(
            split_selector_list("a[title=\"x,y\"]:not(.a, .b)"),
            vec!["a[title=\"x,y\"]:not(.a, .b)"]
        );

        let parts = split_selector_list("button:has-text('Create'), button[type='submit']");
        assert_eq!(
            parse_selector(parts[0]),
            ParsedSelector {
                css: "button".into(),
                text: Some("Create".into()),
            }
        );
        assert_eq!(parse_selector(parts[1]).css, "button[type='submit']");
    }

    #[test]
    fn text_ends_at_its_closing_quote() {
        let parsed = parse_selector(r#"div:has-text("Save (draft)") > span"#);
        assert_eq!(parsed.css, "div");
        assert_eq!(parsed.text.as_deref(), Some("Save (draft)"));
    }

    #[test]
    fn plain_css_passes_through() {
        let parsed = parse_selector("[aria-label*=\"Google\"]");
        assert_eq!(parsed.css, "[aria-label*=\"Google\"]");
        assert!(parsed.text.is_none());
    }
}
