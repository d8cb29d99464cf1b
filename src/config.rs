// Configuration structures for the agent
// Loaded from TOML, overlaid with environment variables

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{AgentError, Result};

/// Top-level agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub llm: LlmConfig,
    pub guardrails: GuardrailConfig,
    pub browser: BrowserSettings,
    pub controller: ControllerSettings,
}

/// LLM provider configuration.
///
/// When `api_key` is absent the decision and planning paths fall back to
/// their heuristic implementations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    /// Temperature for full decision calls.
    pub temperature: f32,
    /// Temperature for the short semantic-visibility call.
    pub semantic_temperature: f32,
    /// Budget for one full decision call.
    pub decision_timeout: Duration,
    /// Budget for one semantic-visibility call.
    pub semantic_timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-1.5-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            max_tokens: 2048,
            temperature: 0.2,
            semantic_temperature: 0.0,
            decision_timeout: Duration::from_secs(30),
            semantic_timeout: Duration::from_secs(10),
        }
    }
}

/// Guardrail policy lists.
///
/// These are data, not code: the defaults below can be replaced wholesale
/// from configuration. Only the secret-marker check in the guardrail
/// engine itself is baked in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailConfig {
    /// Hostnames (or parent domains) the agent may operate on.
    pub allowed_domains: Vec<String>,
    /// Lowercased keywords that turn a click into a confirm-required action.
    pub require_confirm_for: Vec<String>,
    /// Lowercased keywords that make a fill target sensitive (hard deny).
    pub sensitive_fields: Vec<String>,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            allowed_domains: Vec::new(),
            require_confirm_for: vec![
                "delete".to_string(),
                "pay".to_string(),
                "purchase".to_string(),
                "submit order".to_string(),
                "unsubscribe".to_string(),
            ],
            sensitive_fields: vec![
                "email".to_string(),
                "username".to_string(),
                "user name".to_string(),
                "billing".to_string(),
                "mfa".to_string(),
                "otp".to_string(),
                "password".to_string(),
                "passcode".to_string(),
                "credit card".to_string(),
                "cvc".to_string(),
                "ccv".to_string(),
                "ssn".to_string(),
                "social security".to_string(),
                "address".to_string(),
                "phone number".to_string(),
                "dob".to_string(),
                "date of birth".to_string(),
                "api key".to_string(),
                "secret".to_string(),
                "debit".to_string(),
                "bank account".to_string(),
            ],
        }
    }
}

/// Browser launch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub start_url: String,
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            start_url: "about:blank".to_string(),
            headless: true,
            window_width: 1280,
            window_height: 800,
        }
    }
}

/// Control-loop constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Hard cap on loop iterations per session.
    pub max_steps: usize,
    /// Maximum pre-decision auto-scrolls per page.
    pub max_auto_scrolls: u32,
    /// Pixels scrolled per auto-scroll.
    pub scroll_step_px: f64,
    /// History rows fed into the decision prompt.
    pub history_window: usize,
    /// Region cap for the decision prompt.
    pub region_prompt_cap: usize,
    /// Cap on appeared/disappeared labels in a region diff.
    pub region_diff_cap: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            max_steps: 50,
            max_auto_scrolls: 5,
            scroll_step_px: 600.0,
            history_window: 5,
            region_prompt_cap: 60,
            region_diff_cap: 15,
        }
    }
}

impl AgentConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AgentError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        toml::from_str(&raw).map_err(|e| AgentError::Config(format!("invalid TOML: {}", e)))
    }

    /// Overlay environment variables on top of the current values.
    ///
    /// `WEBPILOT_API_KEY` (or the legacy `GEMINI_API_KEY`) supplies the
    /// LLM key; `WEBPILOT_START_URL` and `WEBPILOT_HEADLESS` override the
    /// browser settings.
    pub fn apply_env(mut self) -> Self {
        if let Ok(key) = std::env::var("WEBPILOT_API_KEY") {
            if !key.is_empty() {
                self.llm.api_key = Some(key);
            }
        } else if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            if !key.is_empty() {
                self.llm.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("WEBPILOT_START_URL") {
            if !url.is_empty() {
                self.browser.start_url = url;
            }
        }
        if let Ok(headless) = std::env::var("WEBPILOT_HEADLESS") {
            self.browser.headless = headless != "0" && headless.to_lowercase() != "false";
        }
        self
    }
}
