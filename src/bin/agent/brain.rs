use anyhow::{Result, anyhow};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info};

use flowforge::planner::parse_plan;
use flowforge::vision::{build_prompt, parse_verdict};
use flowforge::{EngineError, Plan, PlanRequest, Planner, VisionClient, VisionRequest, VisionVerdict};

const MODEL: &str = "gpt-5.2"; // Change to your preferred model
const ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

const PLANNER_PROMPT: &str = r#"You plan browser workflows. Given a task and a web application, return ONE JSON object and nothing else:

{
  "task_analysis": {
    "requires_authentication": true,
    "auth_type": "oauth_google|oauth_github|email_password|manual|none",
    "complexity": "low|medium|high"
  },
  "workflow_outline": ["Open the projects page", "Click New project", "..."],
  "context": {"app_url": "https://...", "app_name": "...", "notes": "known UI patterns"},
  "steps": [
    {"ordinal": 1, "action": "navigate", "value": "https://...", "description": "Open the projects page", "expectedOutcome": "Project list visible"},
    {"ordinal": 2, "action": "click",
     "locator": {"primary": "button[data-testid='new-project']", "alternatives": ["button:has-text('New project')", "[aria-label='New project']"]},
     "description": "Click New project", "expectedOutcome": "Creation form opens"},
    {"ordinal": 3, "action": "fill", "locator": {"primary": "input[name='name']", "alternatives": []}, "value": "Roadmap", "description": "Type the project name"}
  ]
}

Rules:
1. workflow_outline stays high level (5-10 entries).
2. Actions: navigate, click, fill, select, wait, scroll, press_key. wait takes milliseconds in "value".
3. Ordinals start at 1 and have no gaps.
4. Give every element step 1-3 alternative selectors, text-based ones included.
5. Do not include login steps; authentication is handled separately."#;

/// Chat-completions client used as both the planner and the vision collaborator.
pub struct Brain {
    client: Client,
    api_key: String,
}

impl Brain {
    pub fn new() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY not set in environment"))?;
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, api_key })
    }

    /// Send one chat request and return the assistant's text.
    async fn complete(&self, messages: Vec<Value>) -> Result<String, EngineError> {
        let response = self
            .client
            .post(ENDPOINT)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": MODEL,
                "messages": messages,
                "temperature": 0.2,
            }))
            .send()
            .await
            .map_err(|e| EngineError::VisionUnavailable(e.to_string()))?;

        let status = response.status();
        let json_resp: Value = response
            .json()
            .await
            .map_err(|e| EngineError::VisionUnavailable(e.to_string()))?;

        if !status.is_success() {
            let err_msg = json_resp["error"]["message"]
                .as_str()
                .unwrap_or("Unknown API error");
            return Err(EngineError::VisionUnavailable(format!(
                "API error ({status}): {err_msg}"
            )));
        }

        let content = json_resp["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                EngineError::VisionContractError(format!("no content in response: {json_resp}"))
            })?;
        debug!("model says: {content}");
        Ok(content.to_string())
    }
}

#[async_trait]
impl Planner for Brain {
    async fn plan(&self, request: &PlanRequest) -> Result<Plan, EngineError> {
        info!(task = %request.task, app = %request.app_name, "asking the model for a plan");
        let messages = vec![
            json!({"role": "system", "content": PLANNER_PROMPT}),
            json!({
                "role": "user",
                "content": format!(
                    "Task: {}\nApplication: {} ({})",
                    request.task, request.app_name, request.app_url
                ),
            }),
        ];
        let text = self
            .complete(messages)
            .await
            .map_err(|e| EngineError::Planner(e.to_string()))?;
        parse_plan(request.clone(), &text)
    }
}

#[async_trait]
impl VisionClient for Brain {
    async fn analyze(&self, request: &VisionRequest) -> Result<VisionVerdict, EngineError> {
        let image = format!("data:image/png;base64,{}", STANDARD.encode(&request.screenshot));
        let messages = vec![json!({
            "role": "user",
            "content": [
                {"type": "text", "text": build_prompt(request)},
                {"type": "image_url", "image_url": {"url": image}},
            ],
        })];
        let text = self.complete(messages).await?;
        parse_verdict(&text)
    }
}
