// Task planner: decompose a free-form task into ordered, atomic steps
// and classify what kind of task it is

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::LlmConfig;
use crate::error::{AgentError, Result};
use crate::llm::{extract_json, LlmClient};

const MAX_PLAN_STEPS: usize = 10;

/// Coarse task classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    #[serde(rename = "Simple Action", alias = "simple")]
    SimpleAction,
    #[serde(rename = "Deep Research", alias = "research")]
    DeepResearch,
    #[serde(rename = "Transactional", alias = "transactional")]
    Transactional,
}

impl Default for TaskKind {
    fn default() -> Self {
        TaskKind::SimpleAction
    }
}

/// One atomic step of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub needs_auth: bool,
}

/// An ordered plan for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub strategy: String,
    #[serde(default)]
    pub kind: TaskKind,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(AgentError::Schema("plan has no steps".into()));
        }
        if self.steps.len() > MAX_PLAN_STEPS {
            return Err(AgentError::Schema(format!(
                "plan has {} steps, maximum is {}",
                self.steps.len(),
                MAX_PLAN_STEPS
            )));
        }
        Ok(())
    }

    /// First step that needs a human (login, MFA, OTP); the host treats
    /// these as pause points before running the loop over them.
    pub fn first_auth_step(&self) -> Option<&PlanStep> {
        self.steps.iter().find(|step| step.needs_auth)
    }
}

lazy_static! {
    static ref STEP_SPLIT: Regex = Regex::new(r"(?i)\bthen\b|[,.;\n]").unwrap();
    static ref NEEDS_AUTH: Regex = Regex::new(r"(?i)login|sign in|password").unwrap();
    static ref TRANSACTIONAL: Regex =
        Regex::new(r"(?i)buy|purchase|checkout|order|book|pay\b").unwrap();
    static ref RESEARCH: Regex =
        Regex::new(r"(?i)research|compare|find out|investigate|summari[sz]e").unwrap();
}

pub struct Planner {
    client: Option<LlmClient>,
    timeout: std::time::Duration,
    temperature: f32,
}

impl Planner {
    pub fn new(client: Option<LlmClient>, config: &LlmConfig) -> Self {
        Self {
            client,
            timeout: config.decision_timeout,
            temperature: config.temperature,
        }
    }

    pub fn offline() -> Self {
        Self {
            client: None,
            timeout: std::time::Duration::from_secs(30),
            temperature: 0.2,
        }
    }

    /// Produce a validated plan: one LLM call when available, heuristic
    /// decomposition otherwise.
    pub async fn plan(&self, task: &str) -> Plan {
        if let Some(client) = &self.client {
            let prompt = build_planner_prompt(task);
            match client.complete(&prompt, self.temperature, self.timeout).await {
                Ok(raw) => {
                    if let Some(plan) = parse_plan(&raw) {
                        info!(
                            "planned {} steps ({:?}): {}",
                            plan.steps.len(),
                            plan.kind,
                            plan.strategy
                        );
                        return plan;
                    }
                    warn!("planner response failed validation; using heuristic plan");
                }
                Err(e) => warn!("planner call failed ({}); using heuristic plan", e),
            }
        }
        fallback_plan(task)
    }
}

fn build_planner_prompt(task: &str) -> String {
    format!(
        r#"You are planning how to complete a web task with a browser.

TASK: {task}

First classify the task as one of: "Simple Action", "Deep Research", "Transactional".
Then mentally simulate the target site and break the task into 1-10 atomic steps.
Mark any step that requires the user to log in or provide a code with "needsAuth": true.

Respond with strict JSON:
{{"kind":"Simple Action","strategy":"one sentence","steps":[{{"id":"step-1","title":"...","description":"...","needsAuth":false}}]}}
"#,
    )
}

/// Parse a planner completion, tolerant of markdown fences.
pub fn parse_plan(raw: &str) -> Option<Plan> {
    let json = extract_json(raw)?;
    let plan: Plan = match serde_json::from_str(&json) {
        Ok(plan) => plan,
        Err(e) => {
            warn!("plan parse failed: {}", e);
            return None;
        }
    };
    if let Err(e) = plan.validate() {
        warn!("plan failed validation: {}", e);
        return None;
    }
    Some(plan)
}

/// Heuristic decomposition: split the task on connectives, cap the step
/// count, and flag authentication-flavoured parts.
pub fn fallback_plan(task: &str) -> Plan {
    let parts: Vec<&str> = STEP_SPLIT
        .split(task)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .take(MAX_PLAN_STEPS)
        .collect();

    let parts = if parts.is_empty() { vec![task.trim()] } else { parts };

    let steps = parts
        .iter()
        .enumerate()
        .map(|(index, part)| PlanStep {
            id: format!("step-{}", index + 1),
            title: part.chars().take(60).collect(),
            description: part.to_string(),
            needs_auth: NEEDS_AUTH.is_match(part),
        })
        .collect();

    Plan {
        strategy: format!(
            "System Offline: heuristic decomposition of \"{}\"",
            task.chars().take(80).collect::<String>()
        ),
        kind: classify(task),
        steps,
    }
}

fn classify(task: &str) -> TaskKind {
    if TRANSACTIONAL.is_match(task) {
        TaskKind::Transactional
    } else if RESEARCH.is_match(task) {
        TaskKind::DeepResearch
    } else {
        TaskKind::SimpleAction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockProvider;

    #[test]
    fn fallback_splits_on_connectives() {
        let plan = fallback_plan("Go to the site, search for shoes then open the first result");
        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.steps[0].id, "step-1");
        assert!(plan.strategy.starts_with("System Offline:"));
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn fallback_caps_step_count() {
        let task = (0..20).map(|i| format!("step number {}", i)).collect::<Vec<_>>().join(", ");
        let plan = fallback_plan(&task);
        assert_eq!(plan.steps.len(), 10);
    }

    #[test]
    fn fallback_marks_auth_steps() {
        let plan = fallback_plan("open the portal, sign in with my account, download the report");
        assert!(!plan.steps[0].needs_auth);
        assert!(plan.steps[1].needs_auth);
        assert_eq!(plan.first_auth_step().unwrap().id, "step-2");
    }

    #[test]
    fn fallback_never_produces_empty_plan() {
        let plan = fallback_plan("   ");
        assert_eq!(plan.steps.len(), 1);
    }

    #[test]
    fn classification_heuristics() {
        assert_eq!(fallback_plan("buy a phone case").kind, TaskKind::Transactional);
        assert_eq!(
            fallback_plan("research the best laptops and compare prices").kind,
            TaskKind::DeepResearch
        );
        assert_eq!(fallback_plan("open the docs page").kind, TaskKind::SimpleAction);
    }

    #[test]
    fn plan_round_trips() {
        let plan = fallback_plan("search for rust, open the book");
        let json = serde_json::to_string(&plan).unwrap();
        let back: Plan = serde_json::from_str(&json).unwrap();
        assert_eq!(plan, back);
    }

    #[test]
    fn parse_plan_tolerates_fences() {
        let raw = r#"```json
{"kind":"Simple Action","strategy":"direct","steps":[{"id":"step-1","title":"t","description":"d","needsAuth":true}]}
```"#;
        let plan = parse_plan(raw).unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert!(plan.steps[0].needs_auth);
    }

    #[test]
    fn parse_plan_rejects_oversized_plans() {
        let steps: Vec<String> = (0..11)
            .map(|i| format!(r#"{{"id":"step-{i}","title":"t","description":"d"}}"#))
            .collect();
        let raw = format!(r#"{{"strategy":"s","steps":[{}]}}"#, steps.join(","));
        assert!(parse_plan(&raw).is_none());
    }

    #[tokio::test]
    async fn planner_uses_llm_when_available() {
        let response = r#"{"kind":"Transactional","strategy":"cart flow","steps":[{"id":"step-1","title":"Open shop","description":"navigate","needsAuth":false}]}"#;
        let client = LlmClient::new(Box::new(MockProvider::with_responses(vec![response])), 512);
        let planner = Planner::new(Some(client), &LlmConfig::default());
        let plan = planner.plan("buy the thing").await;
        assert_eq!(plan.kind, TaskKind::Transactional);
        assert_eq!(plan.strategy, "cart flow");
    }

    #[tokio::test]
    async fn planner_degrades_on_garbage() {
        let client = LlmClient::new(Box::new(MockProvider::with_responses(vec!["nope"])), 512);
        let planner = Planner::new(Some(client), &LlmConfig::default());
        let plan = planner.plan("open the docs then search").await;
        assert!(plan.strategy.starts_with("System Offline:"));
        assert_eq!(plan.steps.len(), 2);
    }
}
