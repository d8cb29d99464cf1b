// Per-session controller state and the feedback delta fed into decisions

use serde::{Deserialize, Serialize};

use crate::action::Action;

/// Length of the normalised text snippet used for change detection.
const SNIPPET_LEN: usize = 400;

/// Labels that appeared or disappeared between two consecutive scans.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionDiff {
    pub appeared: Vec<String>,
    pub disappeared: Vec<String>,
}

impl RegionDiff {
    pub fn is_empty(&self) -> bool {
        self.appeared.is_empty() && self.disappeared.is_empty()
    }
}

/// Observable effect of one dispatched action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    pub state_changed: bool,
    pub url_before: String,
    pub url_after: String,
    pub title_before: String,
    pub title_after: String,
    pub text_before: String,
    pub text_after: String,
}

impl ActionOutcome {
    /// Outcome for an action that threw before taking effect.
    pub fn failed(url: &str, title: &str, text: &str) -> Self {
        Self {
            state_changed: false,
            url_before: url.to_string(),
            url_after: url.to_string(),
            title_before: title.to_string(),
            title_after: title.to_string(),
            text_before: text.to_string(),
            text_after: text.to_string(),
        }
    }
}

/// The controller's synthesised delta: what just happened, for the next
/// decision to build on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<ActionOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_diff: Option<RegionDiff>,
}

/// Mutable loop state for one session.
#[derive(Debug, Default)]
pub struct ControllerState {
    pub step_count: usize,
    pub last_action: Option<Action>,
    pub last_outcome: Option<ActionOutcome>,
    pub previous_region_labels: Vec<String>,
    pub last_region_diff: Option<RegionDiff>,

    pub last_action_key: Option<String>,
    pub repeated_action_count: u32,

    pub scroll_count: u32,
    pub content_visible: bool,
    pub bottom_reached: bool,
    pub last_scroll_y: f64,
    pub last_scroll_height: f64,
    pub last_url: String,

    pub consecutive_failures: u32,
}

impl ControllerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// URL changed: scroll tracking starts over before the next scroll
    /// gate runs.
    pub fn reset_scroll_tracking(&mut self) {
        self.scroll_count = 0;
        self.content_visible = false;
        self.bottom_reached = false;
        self.last_scroll_y = 0.0;
        self.last_scroll_height = 0.0;
    }

    /// Track the action key for oscillation detection and return how many
    /// times in a row this key has now been proposed beyond the first.
    pub fn note_action_key(&mut self, key: &str) -> u32 {
        if self.last_action_key.as_deref() == Some(key) {
            self.repeated_action_count += 1;
        } else {
            self.last_action_key = Some(key.to_string());
            self.repeated_action_count = 0;
        }
        self.repeated_action_count
    }

    pub fn clear_action_key(&mut self) {
        self.last_action_key = None;
        self.repeated_action_count = 0;
    }
}

/// Normalised change-detection snippet: collapsed whitespace, capped length.
pub fn snippet(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(SNIPPET_LEN).collect()
}

/// Diff two label sets, capping each side.
pub fn diff_labels(previous: &[String], current: &[String], cap: usize) -> RegionDiff {
    let appeared = current
        .iter()
        .filter(|label| !previous.contains(label))
        .take(cap)
        .cloned()
        .collect();
    let disappeared = previous
        .iter()
        .filter(|label| !current.contains(label))
        .take(cap)
        .cloned()
        .collect();
    RegionDiff {
        appeared,
        disappeared,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scroll_tracking_resets_fully() {
        let mut state = ControllerState::new();
        state.scroll_count = 3;
        state.content_visible = true;
        state.bottom_reached = true;
        state.last_scroll_y = 1800.0;
        state.last_scroll_height = 4000.0;

        state.reset_scroll_tracking();
        assert_eq!(state.scroll_count, 0);
        assert!(!state.content_visible);
        assert!(!state.bottom_reached);
        assert_eq!(state.last_scroll_y, 0.0);
    }

    #[test]
    fn action_key_repeat_counting() {
        let mut state = ControllerState::new();
        assert_eq!(state.note_action_key("DOM_CLICK:Submit"), 0);
        assert_eq!(state.note_action_key("DOM_CLICK:Submit"), 1);
        assert_eq!(state.note_action_key("DOM_CLICK:Submit"), 2);
        // a different key resets the counter
        assert_eq!(state.note_action_key("SCROLL:"), 0);
        assert_eq!(state.note_action_key("DOM_CLICK:Submit"), 0);
    }

    #[test]
    fn snippet_normalises_and_caps() {
        assert_eq!(snippet("a\n\n  b\tc"), "a b c");
        let long = "word ".repeat(200);
        assert_eq!(snippet(&long).chars().count(), 400);
    }

    #[test]
    fn diff_caps_each_side() {
        let previous: Vec<String> = (0..20).map(|i| format!("old-{}", i)).collect();
        let current: Vec<String> = (0..20).map(|i| format!("new-{}", i)).collect();
        let diff = diff_labels(&previous, &current, 15);
        assert_eq!(diff.appeared.len(), 15);
        assert_eq!(diff.disappeared.len(), 15);
    }

    #[test]
    fn diff_ignores_shared_labels() {
        let previous = vec!["Home".to_string(), "Docs".to_string()];
        let current = vec!["Docs".to_string(), "Pricing".to_string()];
        let diff = diff_labels(&previous, &current, 15);
        assert_eq!(diff.appeared, vec!["Pricing".to_string()]);
        assert_eq!(diff.disappeared, vec!["Home".to_string()]);
    }
}
