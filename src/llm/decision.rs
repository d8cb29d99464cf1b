// Decision layer: task + perceived state + short history in, one
// validated action out. LLM first, deterministic heuristics as fallback.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::action::{Action, Decision, ScrollDirection};
use crate::config::LlmConfig;
use crate::controller::state::Feedback;
use crate::llm::semantic::extract_objective;
use crate::llm::{extract_json, LlmClient};
use crate::memory::HistoryEntry;
use crate::perception::Region;

const PAGE_TEXT_CAP: usize = 2000;
const HISTORY_CAP: usize = 5;

/// Scroll-gate status surfaced to the decision prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScrollStatus {
    pub scroll_count: u32,
    pub max_auto_scrolls: u32,
    pub content_visible: bool,
    pub bottom_reached: bool,
}

/// Everything a decision is made from.
pub struct DecisionContext<'a> {
    pub task: &'a str,
    /// 1-based loop step.
    pub step: usize,
    pub url: &'a str,
    pub page_text: &'a str,
    pub regions: &'a [Region],
    pub feedback: &'a Feedback,
    pub history: &'a [HistoryEntry],
    pub scroll: ScrollStatus,
    pub consecutive_failures: u32,
}

/// The capability the controller consumes: a decision or nothing.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn decide(&self, ctx: &DecisionContext<'_>) -> Option<Decision>;
}

/// Inputs first, then content links, then the rest; capped.
pub fn prioritize_regions(regions: &[Region], cap: usize) -> Vec<&Region> {
    let inputs = regions.iter().filter(|r| r.role.is_input());
    let links = regions
        .iter()
        .filter(|r| !r.role.is_input() && r.href.is_some());
    let rest = regions
        .iter()
        .filter(|r| !r.role.is_input() && r.href.is_none());
    inputs.chain(links).chain(rest).take(cap).collect()
}

/// Assemble the full decision prompt.
pub fn build_decision_prompt(ctx: &DecisionContext<'_>, region_cap: usize) -> String {
    let mut prompt = String::new();

    let _ = writeln!(prompt, "You are driving a real web browser to complete a task.");
    let _ = writeln!(prompt, "\nTASK: {}", ctx.task);
    let _ = writeln!(prompt, "STEP: {}", ctx.step);
    let _ = writeln!(prompt, "CURRENT URL: {}", ctx.url);

    if !ctx.history.is_empty() {
        let _ = writeln!(prompt, "\nRECENT ACTIONS:");
        for entry in ctx.history.iter().rev().take(HISTORY_CAP).rev() {
            let outcome = entry.outcome.as_deref().unwrap_or("pending");
            let _ = writeln!(
                prompt,
                "- step {}: {} {} -> {}",
                entry.step, entry.action, entry.detail, outcome
            );
        }
    }

    let text: String = ctx.page_text.chars().take(PAGE_TEXT_CAP).collect();
    let _ = writeln!(prompt, "\nVISIBLE TEXT (truncated):\n{}", text);

    if let Some(outcome) = &ctx.feedback.last_outcome {
        let _ = writeln!(
            prompt,
            "\nLAST ACTION EFFECT: stateChanged={} (url {} -> {})",
            outcome.state_changed, outcome.url_before, outcome.url_after
        );
    }
    if let Some(diff) = &ctx.feedback.region_diff {
        if !diff.is_empty() {
            let _ = writeln!(
                prompt,
                "CONTENT DIFF: appeared={:?} disappeared={:?}",
                diff.appeared, diff.disappeared
            );
        }
    }
    let _ = writeln!(
        prompt,
        "SCROLL STATUS: {}/{} auto-scrolls, contentVisible={}, bottomReached={}",
        ctx.scroll.scroll_count,
        ctx.scroll.max_auto_scrolls,
        ctx.scroll.content_visible,
        ctx.scroll.bottom_reached
    );

    let _ = writeln!(prompt, "\nINTERACTIVE ELEMENTS (id | role | label):");
    let prioritized = prioritize_regions(ctx.regions, region_cap);
    for region in &prioritized {
        let _ = writeln!(
            prompt,
            "- {} | {:?} | {}",
            region.id, region.role, region.label
        );
    }
    if ctx.regions.len() > prioritized.len() {
        let _ = writeln!(prompt, "(+{} more not shown)", ctx.regions.len() - prioritized.len());
    }

    prompt.push_str(
        r#"
ALLOWED ACTIONS (respond with exactly one):
- {"type":"VISION_CLICK","regionId":"...","description":"..."}
- {"type":"VISION_FILL","regionId":"...","value":"...","description":"..."}
- {"type":"DOM_CLICK","regionId":"..."} or {"type":"DOM_CLICK","selector":"..."} or {"type":"DOM_CLICK","role":"...","name":"..."}
- {"type":"DOM_FILL","regionId":"...","value":"..."} (one target form, like DOM_CLICK)
- {"type":"KEY_PRESS","key":"Enter"}
- {"type":"SCROLL","direction":"up"|"down","amount":600}
- {"type":"WAIT","duration":1000} or {"type":"WAIT","until":"load"|"domcontentloaded"|"networkidle"}
- {"type":"ASK_USER","message":"..."}
- {"type":"CONFIRM","message":"..."}
- {"type":"DONE","reason":"..."}

RULES:
- Fill values must come from the TASK; never invent credentials.
- Passwords, payment details, or MFA codes must become ASK_USER.
- If CONTENT DIFF shows new elements, the previous action succeeded; do not repeat it.
- If stateChanged=false and there is no content diff, try a different approach.
- Region ids are only valid this step; pick them from the list above.

Respond with strict JSON: {"action":{...},"reasoning":"...","confidence":0.0-1.0}
"#,
    );
    prompt
}

/// Parse and validate an untrusted completion into a decision.
pub fn parse_decision(raw: &str) -> Option<Decision> {
    let json = extract_json(raw)?;
    let decision: Decision = match serde_json::from_str(&json) {
        Ok(decision) => decision,
        Err(e) => {
            warn!("decision parse failed: {}", e);
            return None;
        }
    };
    if let Err(e) = decision.validate() {
        warn!("decision failed validation: {}", e);
        return None;
    }
    Some(decision)
}

/// LLM-backed oracle.
pub struct LlmDecisionOracle {
    client: LlmClient,
    temperature: f32,
    timeout: Duration,
    region_cap: usize,
}

impl LlmDecisionOracle {
    pub fn new(client: LlmClient, config: &LlmConfig, region_cap: usize) -> Self {
        Self {
            client,
            temperature: config.temperature,
            timeout: config.decision_timeout,
            region_cap,
        }
    }
}

#[async_trait]
impl DecisionOracle for LlmDecisionOracle {
    async fn decide(&self, ctx: &DecisionContext<'_>) -> Option<Decision> {
        let prompt = build_decision_prompt(ctx, self.region_cap);
        match self.client.complete(&prompt, self.temperature, self.timeout).await {
            Ok(raw) => parse_decision(&raw),
            Err(e) => {
                warn!("decision call failed: {}", e);
                // A failing HTTP call on the very first step is almost
                // always a configuration problem; surface it instead of
                // silently degrading to heuristics.
                if ctx.step <= 1 {
                    if let Some(status) = e.http_status() {
                        return Some(Decision::new(
                            Action::AskUser {
                                message: format!(
                                    "The language model request failed with HTTP {} on the first step. \
                                     Check the API key and model configuration before continuing.",
                                    status
                                ),
                                action_id: None,
                            },
                            "LLM call failed on the first step",
                            1.0,
                        ));
                    }
                }
                None
            }
        }
    }
}

lazy_static! {
    static ref SEARCHY_URL: Regex = Regex::new(r"(?i)search|results|\?q=|query=").unwrap();
    static ref NAV_TARGET: Regex =
        Regex::new(r"(?i)(?:navigate to|go to|open|visit)\s+([a-z0-9][a-z0-9.-]*)").unwrap();
}

/// Loose, non-authoritative check that the URL already satisfies the
/// current step objective. The LLM path is expected to override this.
pub fn url_satisfies_step(objective: &str, url: &str) -> bool {
    let url_lower = url.to_lowercase();
    if let Some(captures) = NAV_TARGET.captures(objective) {
        let target = captures[1].trim_end_matches('.').to_lowercase();
        if !target.is_empty() && url_lower.contains(&target) {
            return true;
        }
    }
    objective.to_lowercase().contains("search") && SEARCHY_URL.is_match(&url_lower)
}

/// Deterministic fallback when no decision came back from the LLM.
#[derive(Default)]
pub struct HeuristicOracle;

impl HeuristicOracle {
    pub fn new() -> Self {
        Self
    }

    fn decide_sync(&self, ctx: &DecisionContext<'_>) -> Decision {
        let task_lower = ctx.task.to_lowercase();

        if task_lower.contains("click") && task_lower.contains("first link") {
            if let Some(link) = ctx
                .regions
                .iter()
                .find(|r| r.id.starts_with("link-") || r.role.is_clickable() && r.href.is_some())
            {
                return Decision::new(
                    Action::VisionClick {
                        region_id: link.id.clone(),
                        description: Some(link.label.clone()),
                    },
                    format!("Task asks for the first link; clicking '{}'", link.label),
                    0.8,
                );
            }
        }

        if task_lower.contains("click") {
            let clickables: Vec<&Region> =
                ctx.regions.iter().filter(|r| r.role.is_clickable()).collect();
            if let Some(matched) = clickables.iter().find(|r| {
                let label = r.label.to_lowercase();
                !label.is_empty() && task_lower.contains(&label)
            }) {
                return Decision::new(
                    Action::VisionClick {
                        region_id: matched.id.clone(),
                        description: Some(matched.label.clone()),
                    },
                    format!("Label '{}' appears in the task", matched.label),
                    0.7,
                );
            }
            if let Some(first) = clickables.first() {
                return Decision::new(
                    Action::VisionClick {
                        region_id: first.id.clone(),
                        description: Some(first.label.clone()),
                    },
                    "No label matched; trying the first clickable element",
                    0.5,
                );
            }
        }

        let objective = extract_objective(ctx.task);
        if url_satisfies_step(objective, ctx.url) {
            return Decision::new(
                Action::Done {
                    reason: Some(format!("URL {} already satisfies the step", ctx.url)),
                },
                "The current URL appears to satisfy the step objective",
                0.6,
            );
        }

        // Graduated retry ladder: scroll, then wait, then give up.
        match ctx.consecutive_failures {
            0 => Decision::new(
                Action::Scroll {
                    direction: ScrollDirection::Down,
                    amount: Some(600.0),
                    description: Some("look further down the page".into()),
                },
                "Nothing matched; scrolling for more content",
                0.4,
            ),
            1 => Decision::new(
                Action::Wait {
                    duration: Some(2000),
                    until: None,
                    description: Some("give the page time to settle".into()),
                },
                "Still nothing; waiting for late content",
                0.3,
            ),
            _ => Decision::new(
                Action::Done {
                    reason: Some("no further progress possible heuristically".into()),
                },
                "Retry ladder exhausted",
                0.3,
            ),
        }
    }
}

#[async_trait]
impl DecisionOracle for HeuristicOracle {
    async fn decide(&self, ctx: &DecisionContext<'_>) -> Option<Decision> {
        Some(self.decide_sync(ctx))
    }
}

/// LLM primary with heuristic fallback; the shape the controller runs.
pub struct LayeredOracle {
    primary: Option<LlmDecisionOracle>,
    fallback: HeuristicOracle,
}

impl LayeredOracle {
    pub fn new(primary: Option<LlmDecisionOracle>) -> Self {
        Self {
            primary,
            fallback: HeuristicOracle::new(),
        }
    }
}

#[async_trait]
impl DecisionOracle for LayeredOracle {
    async fn decide(&self, ctx: &DecisionContext<'_>) -> Option<Decision> {
        if let Some(primary) = &self.primary {
            if let Some(decision) = primary.decide(ctx).await {
                info!(
                    "decision ({}, {:.2}): {}",
                    decision.action.kind(),
                    decision.confidence,
                    decision.reasoning
                );
                return Some(decision);
            }
            debug!("LLM path returned nothing; falling back to heuristics");
        }
        self.fallback.decide(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::BoundingBox;
    use crate::llm::MockProvider;
    use crate::perception::RegionRole;

    fn region(id: &str, label: &str, role: RegionRole, href: Option<&str>) -> Region {
        Region {
            id: id.into(),
            label: label.into(),
            role,
            bbox: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 120.0,
                height: 24.0,
            },
            href: href.map(String::from),
            confidence: 0.9,
        }
    }

    fn ctx<'a>(
        task: &'a str,
        url: &'a str,
        regions: &'a [Region],
        feedback: &'a Feedback,
        failures: u32,
    ) -> DecisionContext<'a> {
        DecisionContext {
            task,
            step: 1,
            url,
            page_text: "",
            regions,
            feedback,
            history: &[],
            scroll: ScrollStatus::default(),
            consecutive_failures: failures,
        }
    }

    #[test]
    fn prioritization_puts_inputs_before_links() {
        let regions = vec![
            region("element-1", "Docs", RegionRole::Link, Some("/docs")),
            region("element-2", "Search", RegionRole::Textbox, None),
            region("element-3", "OK", RegionRole::Button, None),
        ];
        let ordered = prioritize_regions(&regions, 60);
        assert_eq!(ordered[0].id, "element-2");
        assert_eq!(ordered[1].id, "element-1");
        assert_eq!(ordered[2].id, "element-3");
    }

    #[test]
    fn prioritization_caps() {
        let regions: Vec<Region> = (0..100)
            .map(|i| region(&format!("element-{}", i), "x", RegionRole::Button, None))
            .collect();
        assert_eq!(prioritize_regions(&regions, 60).len(), 60);
    }

    #[test]
    fn parse_tolerates_fences_and_patches_fields() {
        let raw = "```json\n{\"action\":{\"type\":\"DONE\"}}\n```";
        let decision = parse_decision(raw).unwrap();
        assert_eq!(decision.action.kind(), "DONE");
        assert_eq!(decision.confidence, 0.5);
    }

    #[test]
    fn parse_rejects_unknown_action_type() {
        let raw = r#"{"action":{"type":"TELEPORT"},"reasoning":"zap","confidence":0.9}"#;
        assert!(parse_decision(raw).is_none());
    }

    #[test]
    fn parse_rejects_invalid_shapes() {
        let raw = r#"{"action":{"type":"DOM_FILL","value":""},"confidence":0.9}"#;
        assert!(parse_decision(raw).is_none());
    }

    #[test]
    fn heuristic_first_link() {
        let regions = vec![
            region("element-a", "Docs", RegionRole::Link, Some("/docs")),
            region("element-b", "About", RegionRole::Link, Some("/about")),
        ];
        let feedback = Feedback::default();
        let decision = HeuristicOracle::new()
            .decide_sync(&ctx("Click the first link.", "https://x.dev", &regions, &feedback, 0));
        assert_eq!(decision.confidence, 0.8);
        assert_eq!(
            decision.action,
            Action::VisionClick {
                region_id: "element-a".into(),
                description: Some("Docs".into()),
            }
        );
    }

    #[test]
    fn heuristic_label_match_beats_first_clickable() {
        let regions = vec![
            region("element-a", "Cancel", RegionRole::Button, None),
            region("element-b", "Checkout", RegionRole::Button, None),
        ];
        let feedback = Feedback::default();
        let decision = HeuristicOracle::new().decide_sync(&ctx(
            "click checkout",
            "https://shop.test",
            &regions,
            &feedback,
            0,
        ));
        assert_eq!(decision.confidence, 0.7);
        assert_eq!(decision.action.region_id(), Some("element-b"));
    }

    #[test]
    fn heuristic_url_satisfaction_emits_done() {
        let feedback = Feedback::default();
        let decision = HeuristicOracle::new().decide_sync(&ctx(
            "navigate to google",
            "https://www.google.com/",
            &[],
            &feedback,
            0,
        ));
        assert_eq!(decision.action.kind(), "DONE");
        assert_eq!(decision.confidence, 0.6);

        let decision = HeuristicOracle::new().decide_sync(&ctx(
            "search for rust tutorials",
            "https://duckduckgo.com/?q=rust+tutorials",
            &[],
            &feedback,
            0,
        ));
        assert_eq!(decision.action.kind(), "DONE");
    }

    #[test]
    fn heuristic_ladder_progression() {
        let feedback = Feedback::default();
        let oracle = HeuristicOracle::new();
        let d0 = oracle.decide_sync(&ctx("find dining hours", "https://x.dev", &[], &feedback, 0));
        assert_eq!(d0.action.kind(), "SCROLL");
        let d1 = oracle.decide_sync(&ctx("find dining hours", "https://x.dev", &[], &feedback, 1));
        assert_eq!(d1.action.kind(), "WAIT");
        let d2 = oracle.decide_sync(&ctx("find dining hours", "https://x.dev", &[], &feedback, 2));
        assert_eq!(d2.action.kind(), "DONE");
    }

    #[tokio::test]
    async fn first_step_http_failure_surfaces_ask_user() {
        let client = LlmClient::new(Box::new(MockProvider::failing(401)), 256);
        let config = LlmConfig::default();
        let oracle = LlmDecisionOracle::new(client, &config, 60);
        let feedback = Feedback::default();
        let regions = [];
        let context = ctx("click things", "https://x.dev", &regions, &feedback, 0);
        let decision = oracle.decide(&context).await.unwrap();
        match decision.action {
            Action::AskUser { message, .. } => assert!(message.contains("401")),
            other => panic!("expected ASK_USER, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn later_step_failure_returns_none() {
        let client = LlmClient::new(Box::new(MockProvider::failing(503)), 256);
        let config = LlmConfig::default();
        let oracle = LlmDecisionOracle::new(client, &config, 60);
        let feedback = Feedback::default();
        let regions = [];
        let mut context = ctx("click things", "https://x.dev", &regions, &feedback, 0);
        context.step = 3;
        assert!(oracle.decide(&context).await.is_none());
    }

    #[tokio::test]
    async fn layered_oracle_falls_back() {
        let client = LlmClient::new(
            Box::new(MockProvider::with_responses(vec!["not json at all"])),
            256,
        );
        let config = LlmConfig::default();
        let oracle = LayeredOracle::new(Some(LlmDecisionOracle::new(client, &config, 60)));
        let feedback = Feedback::default();
        let regions = vec![region("element-a", "Docs", RegionRole::Link, Some("/d"))];
        let mut context = ctx("Click the first link.", "https://x.dev", &regions, &feedback, 0);
        context.step = 2;
        let decision = oracle.decide(&context).await.unwrap();
        assert_eq!(decision.confidence, 0.8);
    }

    #[test]
    fn prompt_contains_grammar_and_state() {
        let regions = vec![region("element-a", "Docs", RegionRole::Link, Some("/d"))];
        let feedback = Feedback::default();
        let context = ctx("Click the first link.", "https://x.dev", &regions, &feedback, 0);
        let prompt = build_decision_prompt(&context, 60);
        assert!(prompt.contains("TASK: Click the first link."));
        assert!(prompt.contains("VISION_CLICK"));
        assert!(prompt.contains("element-a"));
        assert!(prompt.contains("SCROLL STATUS"));
    }
}
