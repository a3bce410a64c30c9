use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::EngineError;
use crate::types::{ActionKind, Step};
use crate::vision::strip_fences;

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    pub task: String,
    pub app_url: String,
    pub app_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAnalysis {
    #[serde(default)]
    pub requires_authentication: bool,
    #[serde(default = "default_auth_type")]
    pub auth_type: String,
    #[serde(default = "default_complexity")]
    pub complexity: String,
}

fn default_auth_type() -> String {
    "none".to_string()
}

fn default_complexity() -> String {
    "medium".to_string()
}

impl Default for TaskAnalysis {
    fn default() -> Self {
        Self {
            requires_authentication: false,
            auth_type: default_auth_type(),
            complexity: default_complexity(),
        }
    }
}

/// The planner's high-level view of the task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResponse {
    #[serde(default)]
    pub task_analysis: TaskAnalysis,
    pub workflow_outline: Vec<String>,
    #[serde(default)]
    pub context: serde_json::Value,
}

/// A validated plan ready to run.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub request: PlanRequest,
    pub response: PlanResponse,
    pub steps: Vec<Step>,
}

impl Plan {
    /// Plan from hand-written steps; the outline is their descriptions.
    pub fn from_steps(request: PlanRequest, steps: Vec<Step>) -> Self {
        let response = PlanResponse {
            task_analysis: TaskAnalysis::default(),
            workflow_outline: steps.iter().map(|s| s.description.clone()).collect(),
            context: serde_json::Value::Null,
        };
        Self {
            request,
            response,
            steps,
        }
    }

    /// Reject plans the engine cannot run before any browser work starts.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.steps.is_empty() {
            return Err(EngineError::InvalidPlan("plan has no steps".to_string()));
        }
        for (index, step) in self.steps.iter().enumerate() {
            let expected = index as u32 + 1;
            if step.ordinal != expected {
                return Err(EngineError::InvalidPlan(format!(
                    "step ordinals must run 1..={} in order, found {} at position {expected}",
                    self.steps.len(),
                    step.ordinal
                )));
            }
            if let Some(locator) = &step.locator {
                locator.validate().map_err(|e| {
                    EngineError::InvalidPlan(format!("step {}: {e}", step.ordinal))
                })?;
            }
            if step.action.targets_element() && step.locator.is_none() {
                return Err(EngineError::InvalidPlan(format!(
                    "step {} ({}) needs a locator",
                    step.ordinal,
                    step.action.signature_kind()
                )));
            }
            if step.action == ActionKind::Navigate && step.navigation_url().is_none() {
                return Err(EngineError::InvalidPlan(format!(
                    "step {} navigates nowhere",
                    step.ordinal
                )));
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct PlannerReply {
    #[serde(flatten)]
    response: PlanResponse,
    #[serde(default)]
    steps: Vec<Step>,
}

/// Parse a planner reply carrying the outline and the concrete steps.
pub fn parse_plan(request: PlanRequest, text: &str) -> Result<Plan, EngineError> {
    let cleaned = strip_fences(text);
    let reply: PlannerReply = serde_json::from_str(cleaned)
        .map_err(|e| EngineError::Planner(format!("unreadable plan: {e}")))?;

    if reply.response.workflow_outline.is_empty() {
        return Err(EngineError::Planner("workflow outline is empty".to_string()));
    }
    if reply.response.workflow_outline.len() > 20 {
        warn!(
            steps = reply.response.workflow_outline.len(),
            "workflow outline is unusually detailed"
        );
    }
    info!(
        auth = reply.response.task_analysis.requires_authentication,
        auth_type = %reply.response.task_analysis.auth_type,
        steps = reply.steps.len(),
        "plan received"
    );

    let plan = Plan {
        request,
        response: reply.response,
        steps: reply.steps,
    };
    plan.validate()?;
    Ok(plan)
}

/// Turns a natural-language task into a plan.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, request: &PlanRequest) -> Result<Plan, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::Locator;

    fn request() -> PlanRequest {
        PlanRequest {
            task: "Create a project".into(),
            app_url: "https://linear.test".into(),
            app_name: "Linear".into(),
        }
    }

    fn step(ordinal: u32, action: ActionKind, locator: Option<&str>) -> Step {
        Step {
            ordinal,
            action,
            locator: locator.map(Locator::new),
            value: None,
            description: format!("step {ordinal}"),
            expected_outcome: String::new(),
        }
    }

    #[test]
    fn reply_with_missing_analysis_fields_uses_defaults() {
        let text = r##"```json
{
  "task_analysis": {"requires_authentication": true},
  "workflow_outline": ["Open Linear", "Click New project"],
  "steps": [
    {"ordinal": 1, "action": "navigate", "value": "https://linear.test", "description": "Open Linear"},
    {"ordinal": 2, "action": "click",
     "locator": {"primary": "#new", "alternatives": ["button:has-text('New project')"]},
     "description": "Click New project", "expectedOutcome": "Form opens"}
  ]
}
```"##;
        let plan = parse_plan(request(), text).unwrap();
        assert!(plan.response.task_analysis.requires_authentication);
        assert_eq!(plan.response.task_analysis.auth_type, "none");
        assert_eq!(plan.response.task_analysis.complexity, "medium");
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[1].locator.as_ref().unwrap().alternatives.len(), 1);
    }

    #[test]
    fn empty_outline_is_a_planner_error() {
        let err = parse_plan(request(), r#"{"workflow_outline": []}"#).unwrap_err();
        assert!(matches!(err, EngineError::Planner(_)));
    }

    #[test]
    fn gaps_in_ordinals_are_rejected() {
        let plan = Plan::from_steps(
            request(),
            vec![
                step(1, ActionKind::Click, Some("#a")),
                step(3, ActionKind::Click, Some("#b")),
            ],
        );
        assert!(matches!(plan.validate(), Err(EngineError::InvalidPlan(_))));
    }

    #[test]
    fn element_steps_need_a_primary_locator() {
        let missing = Plan::from_steps(request(), vec![step(1, ActionKind::Fill, None)]);
        assert!(missing.validate().is_err());

        let blank = Plan::from_steps(request(), vec![step(1, ActionKind::Click, Some(" "))]);
        assert!(blank.validate().is_err());

        let ok = Plan::from_steps(
            request(),
            vec![step(1, ActionKind::Wait, None), step(2, ActionKind::Click, Some("#a"))],
        );
        assert!(ok.validate().is_ok());
        assert_eq!(ok.response.workflow_outline, vec!["step 1", "step 2"]);
    }
}
