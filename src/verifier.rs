// Post-action verification: turn an observed outcome into a short
// human-readable report for the step stream

use async_trait::async_trait;

use crate::action::Action;
use crate::controller::state::ActionOutcome;

#[async_trait]
pub trait Verifier: Send + Sync {
    async fn report(&self, action: &Action, outcome: &ActionOutcome) -> String;
}

/// Default verifier: summarises what changed, if anything.
#[derive(Default)]
pub struct EffectVerifier;

impl EffectVerifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Verifier for EffectVerifier {
    async fn report(&self, action: &Action, outcome: &ActionOutcome) -> String {
        let kind = action.kind();
        if !outcome.state_changed {
            return format!("{} produced no observable change", kind);
        }
        if outcome.url_before != outcome.url_after {
            return format!(
                "{} navigated from {} to {}",
                kind, outcome.url_before, outcome.url_after
            );
        }
        if outcome.title_before != outcome.title_after {
            return format!(
                "{} changed the page title to '{}'",
                kind, outcome.title_after
            );
        }
        format!("{} updated the page content", kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(changed: bool, url_after: &str, title_after: &str) -> ActionOutcome {
        ActionOutcome {
            state_changed: changed,
            url_before: "https://a.test/".into(),
            url_after: url_after.into(),
            title_before: "A".into(),
            title_after: title_after.into(),
            text_before: "before".into(),
            text_after: "after".into(),
        }
    }

    #[tokio::test]
    async fn reports_navigation() {
        let verifier = EffectVerifier::new();
        let action = Action::VisionClick {
            region_id: "element-1".into(),
            description: None,
        };
        let message = verifier
            .report(&action, &outcome(true, "https://b.test/", "B"))
            .await;
        assert!(message.contains("navigated"));
        assert!(message.contains("https://b.test/"));
    }

    #[tokio::test]
    async fn reports_no_change() {
        let verifier = EffectVerifier::new();
        let action = Action::KeyPress {
            key: "Enter".into(),
            region_id: None,
            description: None,
        };
        let message = verifier
            .report(&action, &outcome(false, "https://a.test/", "A"))
            .await;
        assert!(message.contains("no observable change"));
    }

    #[tokio::test]
    async fn reports_content_update() {
        let verifier = EffectVerifier::new();
        let action = Action::Scroll {
            direction: crate::action::ScrollDirection::Down,
            amount: None,
            description: None,
        };
        let message = verifier
            .report(&action, &outcome(true, "https://a.test/", "A"))
            .await;
        assert!(message.contains("updated the page content"));
    }
}
