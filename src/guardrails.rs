// Policy oracle: reviews every proposed action before dispatch

use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::action::Action;
use crate::config::GuardrailConfig;
use crate::perception::Region;

/// Literal markers that always deny a fill, regardless of configuration.
const SECRET_MARKERS: [&str; 3] = ["SECRET.", "PASSWORD", "API_KEY"];

/// Review outcome for one proposed action.
///
/// `allowed == false` with `requires_confirmation == true` means "pause
/// and surface the action for explicit approval"; without it, "skip and
/// continue".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailVerdict {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub requires_confirmation: bool,
}

impl GuardrailVerdict {
    /// Collapse the verdict into the error taxonomy: denial and
    /// confirm-required become distinct error kinds.
    pub fn into_result(self) -> crate::error::Result<()> {
        if self.allowed {
            return Ok(());
        }
        let reason = self.reason.unwrap_or_else(|| "guardrail policy".to_string());
        if self.requires_confirmation {
            Err(crate::error::AgentError::GuardrailNeedsConfirm(reason))
        } else {
            Err(crate::error::AgentError::GuardrailDenied(reason))
        }
    }

    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            requires_confirmation: false,
        }
    }

    fn deny(reason: String) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            requires_confirmation: false,
        }
    }

    fn confirm(reason: String) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            requires_confirmation: true,
        }
    }
}

pub struct Guardrails {
    config: GuardrailConfig,
}

impl Guardrails {
    pub fn new(config: GuardrailConfig) -> Self {
        Self { config }
    }

    /// Evaluate the policy rules in order: sensitive-field protection,
    /// secret-marker detection, risky-click confirmation.
    pub fn review(&self, action: &Action, regions: &[Region]) -> GuardrailVerdict {
        if action.is_fill() {
            let label = self.resolve_target_label(action, regions).to_lowercase();
            for keyword in &self.config.sensitive_fields {
                if label.contains(keyword.as_str()) {
                    warn!("guardrail deny: fill targets sensitive field '{}'", label);
                    return GuardrailVerdict::deny(format!(
                        "fill target '{}' matches sensitive keyword '{}'",
                        label, keyword
                    ));
                }
            }

            if let Some(value) = fill_value(action) {
                for marker in SECRET_MARKERS {
                    if value.contains(marker) {
                        warn!("guardrail deny: fill value carries secret marker");
                        return GuardrailVerdict::deny(format!(
                            "fill value contains the secret marker '{}'",
                            marker
                        ));
                    }
                }
            }
        }

        if action.is_click() {
            if let Some(region) = action.region_id().and_then(|id| find_region(regions, id)) {
                let label = region.label.to_lowercase();
                for keyword in &self.config.require_confirm_for {
                    if label.contains(keyword.as_str()) {
                        return GuardrailVerdict::confirm(format!(
                            "clicking '{}' matches confirm keyword '{}'",
                            region.label, keyword
                        ));
                    }
                }
            }
        }

        GuardrailVerdict::allow()
    }

    /// Hostname check against the allowlist: exact match, or a suffix
    /// after a dot. An empty allowlist permits everything.
    pub fn is_domain_allowed(&self, url: &str) -> bool {
        if self.config.allowed_domains.is_empty() {
            return true;
        }
        let host = match Url::parse(url).ok().and_then(|u| u.host_str().map(String::from)) {
            Some(host) => host,
            None => return false,
        };
        self.config.allowed_domains.iter().any(|entry| {
            host == *entry || host.ends_with(&format!(".{}", entry))
        })
    }

    /// Best label for the action's target: the region's label when the id
    /// resolves, otherwise the concatenated name and selector text.
    fn resolve_target_label(&self, action: &Action, regions: &[Region]) -> String {
        if let Some(region) = action.region_id().and_then(|id| find_region(regions, id)) {
            return region.label.clone();
        }
        match action {
            Action::DomFill { selector, name, .. } | Action::DomClick { selector, name, .. } => {
                let mut parts = Vec::new();
                if let Some(name) = name {
                    parts.push(name.clone());
                }
                if let Some(selector) = selector {
                    parts.push(selector.clone());
                }
                parts.join(" ")
            }
            _ => String::new(),
        }
    }
}

fn find_region<'a>(regions: &'a [Region], id: &str) -> Option<&'a Region> {
    regions.iter().find(|r| r.id == id)
}

fn fill_value(action: &Action) -> Option<&str> {
    match action {
        Action::VisionFill { value, .. } | Action::DomFill { value, .. } => Some(value),
        _ => None,
    }
}
