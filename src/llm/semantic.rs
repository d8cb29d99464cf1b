// Semantic scroll-visibility check: one short, cheap YES/NO call that
// decides whether to spend a full decision on the current viewport

use std::time::Duration;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::llm::LlmClient;

const OBJECTIVE_CAP: usize = 200;
const TEXT_CAP: usize = 1500;
const LABEL_CAP: usize = 30;

/// Current step objective from the composed task string: the text after
/// the `CURRENT STEP:` marker, or the first 200 characters.
pub fn extract_objective(task: &str) -> &str {
    if let Some(idx) = task.find("CURRENT STEP:") {
        let rest = task[idx + "CURRENT STEP:".len()..].trim_start();
        let end = rest.find('\n').unwrap_or(rest.len());
        return rest[..end].trim();
    }
    match task.char_indices().nth(OBJECTIVE_CAP) {
        Some((idx, _)) => &task[..idx],
        None => task,
    }
}

/// Lightweight relevance oracle for the pre-decision scroll gate.
///
/// Fails open: with no client configured, or on any call failure, the
/// content is treated as relevant and the gate is skipped.
pub struct SemanticVisibility {
    client: Option<LlmClient>,
    temperature: f32,
    timeout: Duration,
}

impl SemanticVisibility {
    pub fn new(client: Option<LlmClient>, config: &LlmConfig) -> Self {
        Self {
            client,
            temperature: config.semantic_temperature,
            timeout: config.semantic_timeout,
        }
    }

    pub fn disabled() -> Self {
        Self {
            client: None,
            temperature: 0.0,
            timeout: Duration::from_secs(10),
        }
    }

    /// Is the visible content semantically relevant to the objective?
    pub async fn is_relevant(&self, objective: &str, page_text: &str, labels: &[String]) -> bool {
        let client = match &self.client {
            Some(client) => client,
            None => return true,
        };

        let text: String = page_text.chars().take(TEXT_CAP).collect();
        let shown_labels = labels
            .iter()
            .take(LABEL_CAP)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        let prompt = format!(
            "Objective: {}\n\nVisible page text:\n{}\n\nInteractive elements: {}\n\n\
             Is the content above semantically relevant to the objective? \
             Answer with exactly YES or NO.",
            objective, text, shown_labels
        );

        match client.complete(&prompt, self.temperature, self.timeout).await {
            Ok(answer) => {
                let relevant = answer.trim().to_uppercase().starts_with("YES");
                debug!("semantic visibility: {}", if relevant { "YES" } else { "NO" });
                relevant
            }
            Err(e) => {
                warn!("semantic visibility check failed, skipping gate: {}", e);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockProvider;

    #[test]
    fn objective_uses_marker_when_present() {
        let task = "Overall goal: book travel\nCURRENT STEP: find the dining hall hours\nNotes: n/a";
        assert_eq!(extract_objective(task), "find the dining hall hours");
    }

    #[test]
    fn objective_falls_back_to_prefix() {
        let long = "a".repeat(500);
        assert_eq!(extract_objective(&long).len(), 200);
        assert_eq!(extract_objective("short task"), "short task");
    }

    #[tokio::test]
    async fn no_client_fails_open() {
        let check = SemanticVisibility::disabled();
        assert!(check.is_relevant("anything", "text", &[]).await);
    }

    #[tokio::test]
    async fn yes_and_no_answers_are_honored() {
        let config = crate::config::LlmConfig::default();
        let client = LlmClient::new(Box::new(MockProvider::with_responses(vec!["NO", "YES"])), 16);
        let check = SemanticVisibility::new(Some(client), &config);
        assert!(!check.is_relevant("dining hours", "sports news", &[]).await);
        assert!(check.is_relevant("dining hours", "menu and hours", &[]).await);
    }

    #[tokio::test]
    async fn call_failure_fails_open() {
        let config = crate::config::LlmConfig::default();
        let client = LlmClient::new(Box::new(MockProvider::failing(500)), 16);
        let check = SemanticVisibility::new(Some(client), &config);
        assert!(check.is_relevant("dining hours", "anything", &[]).await);
    }
}
