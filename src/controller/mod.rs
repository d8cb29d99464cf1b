// The control loop: OBSERVE -> auto-scroll gate -> DECIDE -> guardrails
// -> ACT -> VERIFY, with oscillation detection and feedback synthesis

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::action::{Action, ScrollDirection, WaitUntil};
use crate::browser::humanize::Cursor;
use crate::browser::{BrowserGateway, LoadState};
use crate::config::ControllerSettings;
use crate::error::{AgentError, Result};
use crate::guardrails::Guardrails;
use crate::llm::semantic::extract_objective;
use crate::llm::{DecisionContext, DecisionOracle, ScrollStatus, SemanticVisibility};
use crate::memory::{HistoryEntry, HistoryStore};
use crate::perception::{ElementStore, Region, Regionizer};
use crate::verifier::Verifier;

pub mod state;

pub use state::{ActionOutcome, ControllerState, Feedback, RegionDiff};

use state::{diff_labels, snippet};

const STABILITY_BUDGET: Duration = Duration::from_secs(5);
const SCROLL_SETTLE: Duration = Duration::from_millis(400);

/// Loop phases surfaced through the step callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    Observe,
    Decide,
    Act,
    Verify,
}

impl StepPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepPhase::Observe => "OBSERVE",
            StepPhase::Decide => "DECIDE",
            StepPhase::Act => "ACT",
            StepPhase::Verify => "VERIFY",
        }
    }
}

/// Why a paused loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PauseKind {
    #[serde(rename = "CONFIRM")]
    Confirm,
    #[serde(rename = "ASK_USER")]
    AskUser,
}

/// Terminal state of one `run_loop` invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopOutcome {
    pub completed: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_action: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_kind: Option<PauseKind>,
    #[serde(default)]
    pub step_completion_check: bool,
}

impl LoopOutcome {
    fn success(reason: impl Into<String>) -> Self {
        Self {
            completed: true,
            reason: reason.into(),
            pending_action: None,
            pause_kind: None,
            step_completion_check: false,
        }
    }

    fn failure(reason: impl Into<String>) -> Self {
        Self {
            completed: false,
            reason: reason.into(),
            pending_action: None,
            pause_kind: None,
            step_completion_check: false,
        }
    }

    fn paused(kind: PauseKind, reason: impl Into<String>, pending: Option<Action>) -> Self {
        Self {
            completed: false,
            reason: reason.into(),
            pending_action: pending,
            pause_kind: Some(kind),
            step_completion_check: false,
        }
    }
}

/// Options for one loop invocation.
///
/// `reset_step_count` defaults to `true`: every `run_loop` call starts a
/// fresh step budget and session state. Hosts resuming after a pause pass
/// `false` to keep the budget and the scroll/oscillation tracking.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub reset_step_count: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            reset_step_count: true,
        }
    }
}

/// Callback receiving every phase transition.
pub type StepCallback<'a> = &'a mut (dyn FnMut(StepPhase, &str, Option<&Action>) + Send);

/// Composes the gateway, perception, oracle, guardrails, verifier and
/// memory into the per-session control loop.
pub struct AgentController {
    gateway: Arc<dyn BrowserGateway>,
    oracle: Arc<dyn DecisionOracle>,
    semantic: SemanticVisibility,
    guardrails: Guardrails,
    verifier: Arc<dyn Verifier>,
    memory: Arc<dyn HistoryStore>,
    settings: ControllerSettings,
    store: ElementStore,
    state: ControllerState,
    cursor: Cursor,
}

impl AgentController {
    pub fn new(
        gateway: Arc<dyn BrowserGateway>,
        oracle: Arc<dyn DecisionOracle>,
        semantic: SemanticVisibility,
        guardrails: Guardrails,
        verifier: Arc<dyn Verifier>,
        memory: Arc<dyn HistoryStore>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            gateway,
            oracle,
            semantic,
            guardrails,
            verifier,
            memory,
            settings,
            store: ElementStore::new(),
            state: ControllerState::new(),
            cursor: Cursor::new(),
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Drive the task until completion, pause, or budget exhaustion.
    pub async fn run_loop(
        &mut self,
        session_id: &str,
        task: &str,
        on_step: StepCallback<'_>,
        opts: RunOptions,
    ) -> Result<LoopOutcome> {
        if opts.reset_step_count {
            self.state = ControllerState::new();
        }
        info!("starting loop for session {} (task: {})", session_id, task);

        loop {
            if self.state.step_count >= self.settings.max_steps {
                return Ok(LoopOutcome::failure("Max steps reached"));
            }
            self.state.step_count += 1;
            let step = self.state.step_count;

            // OBSERVE: rebuild the catalogue, diff against the last scan.
            let regions = Regionizer::detect_regions(self.gateway.as_ref(), &mut self.store).await?;
            let labels: Vec<String> = regions.iter().map(|r| r.label.clone()).collect();
            let region_diff = diff_labels(
                &self.state.previous_region_labels,
                &labels,
                self.settings.region_diff_cap,
            );
            self.state.previous_region_labels = labels.clone();
            self.state.last_region_diff = Some(region_diff.clone());
            on_step(
                StepPhase::Observe,
                &format!("step {}: {} interactive regions", step, regions.len()),
                None,
            );

            // URL change: scroll tracking and the failure counter start over.
            let url = self.gateway.url().await.unwrap_or_default();
            if url != self.state.last_url {
                debug!("url changed {} -> {}", self.state.last_url, url);
                self.state.reset_scroll_tracking();
                self.state.consecutive_failures = 0;
                self.state.last_url = url.clone();
            }

            // Pre-decision auto-scroll gate.
            if !self.state.content_visible
                && !self.state.bottom_reached
                && self.state.scroll_count < self.settings.max_auto_scrolls
            {
                let scrolled = self.auto_scroll_gate(task, &labels, &url, on_step).await?;
                if scrolled {
                    continue;
                }
            }

            // DECIDE.
            let page_text = self.gateway.page_text().await.unwrap_or_default();
            let feedback = Feedback {
                last_action: self.state.last_action.clone(),
                last_outcome: self.state.last_outcome.clone(),
                region_diff: Some(region_diff),
            };
            let history = self.memory.recent(session_id, self.settings.history_window);
            let context = DecisionContext {
                task,
                step,
                url: &url,
                page_text: &page_text,
                regions: &regions,
                feedback: &feedback,
                history: &history,
                scroll: ScrollStatus {
                    scroll_count: self.state.scroll_count,
                    max_auto_scrolls: self.settings.max_auto_scrolls,
                    content_visible: self.state.content_visible,
                    bottom_reached: self.state.bottom_reached,
                },
                consecutive_failures: self.state.consecutive_failures,
            };
            let decision = match self.oracle.decide(&context).await {
                Some(decision) => decision,
                None => {
                    return Ok(LoopOutcome::failure(
                        "decision failed schema validation",
                    ))
                }
            };
            if let Err(e) = decision.validate() {
                return Ok(LoopOutcome::failure(e.to_string()));
            }
            on_step(StepPhase::Decide, &decision.reasoning, Some(&decision.action));

            match &decision.action {
                Action::Done { reason } => {
                    let reason = reason.clone().unwrap_or_else(|| "Task completed".to_string());
                    self.memory.append(
                        session_id,
                        HistoryEntry::new(step, "DONE", reason.clone()),
                    );
                    self.state.clear_action_key();
                    return Ok(LoopOutcome::success(reason));
                }
                Action::Confirm { message, .. } => {
                    return Ok(LoopOutcome::paused(
                        PauseKind::Confirm,
                        message.clone(),
                        Some(decision.action.clone()),
                    ));
                }
                Action::AskUser { message, .. } => {
                    return Ok(LoopOutcome::paused(
                        PauseKind::AskUser,
                        message.clone(),
                        Some(decision.action.clone()),
                    ));
                }
                _ => {}
            }

            // Oscillation detection on (type, resolved label).
            let action_key = format!(
                "{}:{}",
                decision.action.kind(),
                resolve_label(&decision.action, &regions)
            );
            let repeats = self.state.note_action_key(&action_key);
            if repeats >= 2 {
                let message = format!(
                    "{} has been proposed {} times in a row without progress. \
                     Is this step already complete?",
                    decision.action.kind(),
                    repeats + 1
                );
                warn!("oscillation: {}", action_key);
                let mut outcome = LoopOutcome::paused(
                    PauseKind::Confirm,
                    message,
                    Some(decision.action.clone()),
                );
                outcome.step_completion_check = true;
                return Ok(outcome);
            }

            // Guardrails.
            match self.guardrails.review(&decision.action, &regions).into_result() {
                Ok(()) => {}
                Err(AgentError::GuardrailNeedsConfirm(reason)) => {
                    return Ok(LoopOutcome::paused(
                        PauseKind::Confirm,
                        reason,
                        Some(decision.action.clone()),
                    ));
                }
                Err(e) => {
                    let reason = match e {
                        AgentError::GuardrailDenied(reason) => reason,
                        other => other.to_string(),
                    };
                    info!("Action skipped due to guardrail: {}", reason);
                    on_step(
                        StepPhase::Act,
                        &format!("Action skipped due to guardrail: {}", reason),
                        Some(&decision.action),
                    );
                    self.memory.append(
                        session_id,
                        HistoryEntry::new(step, decision.action.kind(), "skipped by guardrail")
                            .with_outcome(reason),
                    );
                    continue;
                }
            }

            // ACT: snapshot, dispatch, tolerate per-action failures.
            let url_before = url.clone();
            let title_before = self.gateway.title().await.unwrap_or_default();
            let text_before = snippet(&page_text);
            on_step(
                StepPhase::Act,
                &describe_action(&decision.action),
                Some(&decision.action),
            );

            if let Err(e) = self.dispatch(&decision.action).await {
                warn!("action failed: {}", e);
                self.state.consecutive_failures += 1;
                let outcome = ActionOutcome::failed(&url_before, &title_before, &text_before);
                self.memory.append(
                    session_id,
                    HistoryEntry::new(step, decision.action.kind(), describe_action(&decision.action))
                        .with_outcome(format!("failed: {}", e)),
                );
                on_step(StepPhase::Verify, &format!("action failed: {}", e), None);
                self.state.last_action = Some(decision.action.clone());
                self.state.last_outcome = Some(outcome);
                continue;
            }

            // VERIFY: re-read, tolerating a destroyed context mid-navigation.
            self.gateway.wait_for_stability(STABILITY_BUDGET).await;
            let mut navigation_destroyed = false;
            let text_after_raw = match self.gateway.page_text().await {
                Ok(text) => text,
                Err(AgentError::NavigationContextDestroyed) => {
                    debug!("context destroyed during verify; reading the new page");
                    navigation_destroyed = true;
                    self.gateway.wait_for_stability(STABILITY_BUDGET).await;
                    self.gateway.page_text().await.unwrap_or_default()
                }
                Err(e) => {
                    warn!("could not read page text after action: {}", e);
                    String::new()
                }
            };
            let url_after = self.gateway.url().await.unwrap_or_else(|_| url_before.clone());
            let title_after = self.gateway.title().await.unwrap_or_default();
            let text_after = snippet(&text_after_raw);
            let state_changed = navigation_destroyed
                || url_after != url_before
                || title_after != title_before
                || text_after != text_before;

            let outcome = ActionOutcome {
                state_changed,
                url_before,
                url_after,
                title_before,
                title_after,
                text_before,
                text_after,
            };
            let message = self.verifier.report(&decision.action, &outcome).await;
            on_step(StepPhase::Verify, &message, None);

            if state_changed {
                self.state.consecutive_failures = 0;
            } else {
                self.state.consecutive_failures += 1;
            }
            self.memory.append(
                session_id,
                HistoryEntry::new(step, decision.action.kind(), describe_action(&decision.action))
                    .with_outcome(message),
            );
            self.state.last_action = Some(decision.action);
            self.state.last_outcome = Some(outcome);
        }
    }

    /// One gate evaluation. Returns true when the loop should re-observe
    /// (a scroll happened), false when control falls through to DECIDE.
    async fn auto_scroll_gate(
        &mut self,
        task: &str,
        labels: &[String],
        url: &str,
        on_step: StepCallback<'_>,
    ) -> Result<bool> {
        let objective = extract_objective(task);
        let page_text = self.gateway.page_text().await.unwrap_or_default();
        if self.semantic.is_relevant(objective, &page_text, labels).await {
            self.state.content_visible = true;
            return Ok(false);
        }

        let geometry = self.gateway.scroll_geometry().await?;
        let scroll_y_stuck = geometry.scroll_y == self.state.last_scroll_y;
        let height_stuck = geometry.scroll_height == self.state.last_scroll_height;
        let unscrollable = geometry.unscrollable();
        let after_first_scroll = self.state.scroll_count > 0;

        let bottom_reached = (after_first_scroll && scroll_y_stuck && height_stuck && !unscrollable)
            || (after_first_scroll
                && geometry.at_document_bottom()
                && height_stuck
                && !unscrollable)
            || (unscrollable && self.state.scroll_count >= self.settings.max_auto_scrolls);

        if bottom_reached {
            debug!("scroll gate: bottom reached at y={}", geometry.scroll_y);
            self.state.bottom_reached = true;
            return Ok(false);
        }

        self.gateway.wheel(0.0, self.settings.scroll_step_px).await?;
        self.gateway.wait_for_stability(STABILITY_BUDGET).await;
        let after = self.gateway.scroll_geometry().await.unwrap_or(geometry);

        // Record the pre-scroll reading: the stuck checks above compare
        // successive gate entries, so they must see where this scroll
        // started, not where it landed.
        self.state.scroll_count += 1;
        self.state.last_scroll_y = geometry.scroll_y;
        self.state.last_scroll_height = geometry.scroll_height;

        let scroll_action = Action::Scroll {
            direction: ScrollDirection::Down,
            amount: Some(self.settings.scroll_step_px),
            description: Some("auto-scroll towards relevant content".into()),
        };
        let moved = after.scroll_y != geometry.scroll_y
            || after.scroll_height != geometry.scroll_height;
        self.state.last_outcome = Some(ActionOutcome {
            state_changed: moved,
            url_before: url.to_string(),
            url_after: url.to_string(),
            title_before: String::new(),
            title_after: String::new(),
            text_before: snippet(&page_text),
            text_after: snippet(&page_text),
        });
        self.state.last_action = Some(scroll_action);

        on_step(
            StepPhase::Observe,
            &format!(
                "auto-scroll {}/{}: content not yet relevant",
                self.state.scroll_count, self.settings.max_auto_scrolls
            ),
            None,
        );
        Ok(true)
    }

    /// One-shot dispatch bypassing the loop; used by the host to resume
    /// after a pause. The element store still holds the last scan, so a
    /// pending action's region ids stay valid.
    pub async fn execute_action(&mut self, action: &Action) -> Result<()> {
        action.validate()?;
        if action.is_control() {
            return Err(AgentError::Schema(format!(
                "{} is controller-owned and cannot be dispatched",
                action.kind()
            )));
        }
        self.dispatch(action).await
    }

    async fn dispatch(&self, action: &Action) -> Result<()> {
        match action {
            Action::VisionClick { region_id, description } => {
                let handle = self.store.get(region_id)?;
                let label = description.as_deref().unwrap_or(region_id);
                self.cursor
                    .vision_click(self.gateway.as_ref(), handle.as_ref(), label)
                    .await
            }
            Action::VisionFill {
                region_id,
                value,
                description,
            } => {
                let handle = self.store.get(region_id)?;
                let label = description.as_deref().unwrap_or(region_id);
                self.cursor
                    .vision_fill(self.gateway.as_ref(), handle.as_ref(), label, value)
                    .await
            }
            Action::DomClick {
                region_id,
                selector,
                role,
                name,
                ..
            } => {
                if let Some(id) = region_id {
                    self.store.get(id)?.click().await
                } else if let (Some(role), Some(name)) = (role, name) {
                    self.gateway.click_role(role, name).await
                } else if let Some(selector) = selector {
                    self.gateway.click_selector(selector).await
                } else {
                    Err(AgentError::Schema("DOM_CLICK without a target".into()))
                }
            }
            Action::DomFill {
                region_id,
                selector,
                role,
                name,
                value,
                ..
            } => {
                if let Some(id) = region_id {
                    self.store.get(id)?.fill(value).await
                } else if let (Some(role), Some(name)) = (role, name) {
                    self.gateway.fill_role(role, name, value).await
                } else if let Some(selector) = selector {
                    self.gateway.fill_selector(selector, value).await
                } else {
                    Err(AgentError::Schema("DOM_FILL without a target".into()))
                }
            }
            Action::KeyPress { key, region_id, .. } => match region_id {
                Some(id) => self.store.get(id)?.press(key).await,
                None => self.gateway.press_key(key).await,
            },
            Action::Scroll {
                direction, amount, ..
            } => {
                let amount = amount.unwrap_or(600.0);
                let delta = match direction {
                    ScrollDirection::Down => amount,
                    ScrollDirection::Up => -amount,
                };
                self.gateway.wheel(0.0, delta).await?;
                tokio::time::sleep(SCROLL_SETTLE).await;
                Ok(())
            }
            Action::Wait {
                duration, until, ..
            } => {
                if let Some(ms) = duration {
                    tokio::time::sleep(Duration::from_millis(*ms)).await;
                } else if let Some(until) = until {
                    let state = match until {
                        WaitUntil::Load => LoadState::Load,
                        WaitUntil::Domcontentloaded => LoadState::DomContentLoaded,
                        WaitUntil::Networkidle => LoadState::NetworkIdle,
                    };
                    self.gateway
                        .wait_for_load_state(state, Duration::from_secs(10))
                        .await?;
                } else {
                    tokio::time::sleep(Duration::from_millis(1000)).await;
                }
                Ok(())
            }
            Action::Done { .. } | Action::AskUser { .. } | Action::Confirm { .. } => {
                Err(AgentError::Schema(format!(
                    "{} is controller-owned and cannot be dispatched",
                    action.kind()
                )))
            }
        }
    }
}

/// Resolve the stable half of the oscillation key: the region label when
/// the id resolves (ids are volatile across scans, labels are not),
/// otherwise whatever target text the action carries.
fn resolve_label(action: &Action, regions: &[Region]) -> String {
    if let Some(id) = action.region_id() {
        if let Some(region) = regions.iter().find(|r| r.id == id) {
            return region.label.clone();
        }
    }
    match action {
        Action::DomClick { selector, name, .. } | Action::DomFill { selector, name, .. } => name
            .clone()
            .or_else(|| selector.clone())
            .unwrap_or_default(),
        Action::KeyPress { key, .. } => key.clone(),
        Action::Scroll { direction, .. } => format!("{:?}", direction),
        _ => String::new(),
    }
}

fn describe_action(action: &Action) -> String {
    match action {
        Action::VisionClick { description, region_id, .. } => format!(
            "click '{}'",
            description.as_deref().unwrap_or(region_id)
        ),
        Action::VisionFill {
            description,
            region_id,
            value,
            ..
        } => format!(
            "fill '{}' with '{}'",
            description.as_deref().unwrap_or(region_id),
            value
        ),
        Action::DomClick {
            region_id,
            selector,
            name,
            ..
        } => format!(
            "dom-click {}",
            name.as_deref()
                .or(selector.as_deref())
                .or(region_id.as_deref())
                .unwrap_or("?")
        ),
        Action::DomFill {
            region_id,
            selector,
            name,
            value,
            ..
        } => format!(
            "dom-fill {} with '{}'",
            name.as_deref()
                .or(selector.as_deref())
                .or(region_id.as_deref())
                .unwrap_or("?"),
            value
        ),
        Action::KeyPress { key, .. } => format!("press {}", key),
        Action::Scroll { direction, amount, .. } => format!(
            "scroll {:?} by {}px",
            direction,
            amount.unwrap_or(600.0)
        ),
        Action::Wait { duration, until, .. } => match (duration, until) {
            (Some(ms), _) => format!("wait {}ms", ms),
            (None, Some(until)) => format!("wait until {:?}", until),
            _ => "wait 1000ms".to_string(),
        },
        Action::AskUser { message, .. } | Action::Confirm { message, .. } => message.clone(),
        Action::Done { reason } => reason.clone().unwrap_or_else(|| "done".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::BoundingBox;
    use crate::perception::RegionRole;

    fn region(id: &str, label: &str) -> Region {
        Region {
            id: id.into(),
            label: label.into(),
            role: RegionRole::Button,
            bbox: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 100.0,
                height: 20.0,
            },
            href: None,
            confidence: 0.9,
        }
    }

    #[test]
    fn oscillation_key_uses_label_not_id() {
        let regions = vec![region("element-abc", "Submit")];
        let action = Action::DomClick {
            region_id: Some("element-abc".into()),
            selector: None,
            role: None,
            name: None,
            description: None,
        };
        assert_eq!(resolve_label(&action, &regions), "Submit");

        // a rescan changed the id but not the label: same key either way
        let regions = vec![region("element-def", "Submit")];
        let stale = Action::DomClick {
            region_id: Some("element-zzz".into()),
            selector: Some("#submit".into()),
            role: None,
            name: None,
            description: None,
        };
        assert_eq!(resolve_label(&stale, &regions), "#submit");
    }

    #[test]
    fn phase_names_match_contract() {
        assert_eq!(StepPhase::Observe.as_str(), "OBSERVE");
        assert_eq!(StepPhase::Decide.as_str(), "DECIDE");
        assert_eq!(StepPhase::Act.as_str(), "ACT");
        assert_eq!(StepPhase::Verify.as_str(), "VERIFY");
    }

    #[test]
    fn pause_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&PauseKind::AskUser).unwrap(),
            "\"ASK_USER\""
        );
        assert_eq!(
            serde_json::to_string(&PauseKind::Confirm).unwrap(),
            "\"CONFIRM\""
        );
    }

    #[test]
    fn outcome_serialization_is_camel_case() {
        let outcome = LoopOutcome::failure("Max steps reached");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["completed"], false);
        assert_eq!(json["stepCompletionCheck"], false);
        assert!(json.get("pauseKind").is_none());
    }
}
