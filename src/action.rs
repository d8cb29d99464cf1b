// The action grammar the decision layer emits and the dispatcher executes
// Ten tagged variants; unknown tags fail at deserialization, never at dispatch

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

/// Scroll direction for the `SCROLL` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
}

/// Load states the `WAIT` variant can wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    Load,
    Domcontentloaded,
    Networkidle,
}

/// One concrete browser action.
///
/// `VISION_*` variants go through the cursor-physics path against a live
/// region handle; `DOM_*` variants dispatch directly. `DONE`, `ASK_USER`
/// and `CONFIRM` are control actions owned by the loop and must never
/// reach the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Action {
    #[serde(rename = "VISION_CLICK", rename_all = "camelCase")]
    VisionClick {
        region_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },

    #[serde(rename = "VISION_FILL", rename_all = "camelCase")]
    VisionFill {
        region_id: String,
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },

    #[serde(rename = "DOM_CLICK", rename_all = "camelCase")]
    DomClick {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },

    #[serde(rename = "DOM_FILL", rename_all = "camelCase")]
    DomFill {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },

    #[serde(rename = "KEY_PRESS", rename_all = "camelCase")]
    KeyPress {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },

    #[serde(rename = "SCROLL", rename_all = "camelCase")]
    Scroll {
        direction: ScrollDirection,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amount: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },

    #[serde(rename = "WAIT", rename_all = "camelCase")]
    Wait {
        /// Milliseconds to sleep.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        until: Option<WaitUntil>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },

    #[serde(rename = "ASK_USER", rename_all = "camelCase")]
    AskUser {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action_id: Option<String>,
    },

    #[serde(rename = "CONFIRM", rename_all = "camelCase")]
    Confirm {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action_id: Option<String>,
    },

    #[serde(rename = "DONE", rename_all = "camelCase")]
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl Action {
    /// The wire tag, also used as the first half of the oscillation key.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::VisionClick { .. } => "VISION_CLICK",
            Action::VisionFill { .. } => "VISION_FILL",
            Action::DomClick { .. } => "DOM_CLICK",
            Action::DomFill { .. } => "DOM_FILL",
            Action::KeyPress { .. } => "KEY_PRESS",
            Action::Scroll { .. } => "SCROLL",
            Action::Wait { .. } => "WAIT",
            Action::AskUser { .. } => "ASK_USER",
            Action::Confirm { .. } => "CONFIRM",
            Action::Done { .. } => "DONE",
        }
    }

    /// Control actions terminate or pause the loop and are never dispatched.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Action::Done { .. } | Action::AskUser { .. } | Action::Confirm { .. }
        )
    }

    pub fn is_fill(&self) -> bool {
        matches!(self, Action::VisionFill { .. } | Action::DomFill { .. })
    }

    pub fn is_click(&self) -> bool {
        matches!(self, Action::VisionClick { .. } | Action::DomClick { .. })
    }

    /// Region id referenced by this action, if any.
    pub fn region_id(&self) -> Option<&str> {
        match self {
            Action::VisionClick { region_id, .. } | Action::VisionFill { region_id, .. } => {
                Some(region_id)
            }
            Action::DomClick { region_id, .. }
            | Action::DomFill { region_id, .. }
            | Action::KeyPress { region_id, .. } => region_id.as_deref(),
            _ => None,
        }
    }

    /// Shape validation beyond what the tagged deserializer enforces.
    ///
    /// Fill actions need exactly one target and a non-empty value; DOM
    /// clicks need at least one target. A `role`/`name` pair counts as a
    /// single target specification.
    pub fn validate(&self) -> Result<()> {
        match self {
            Action::VisionFill { value, .. } if value.is_empty() => {
                Err(AgentError::Schema("VISION_FILL requires a non-empty value".into()))
            }
            Action::DomClick {
                region_id,
                selector,
                role,
                name,
                ..
            } => {
                if Self::target_count(region_id, selector, role, name) == 0 {
                    Err(AgentError::Schema(
                        "DOM_CLICK requires a regionId, selector, or role+name target".into(),
                    ))
                } else {
                    Ok(())
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
                if value.is_empty() {
                    return Err(AgentError::Schema("DOM_FILL requires a non-empty value".into()));
                }
                match Self::target_count(region_id, selector, role, name) {
                    1 => Ok(()),
                    0 => Err(AgentError::Schema(
                        "DOM_FILL requires a regionId, selector, or role+name target".into(),
                    )),
                    _ => Err(AgentError::Schema(
                        "DOM_FILL requires exactly one target specification".into(),
                    )),
                }
            }
            Action::KeyPress { key, .. } if key.is_empty() => {
                Err(AgentError::Schema("KEY_PRESS requires a key".into()))
            }
            _ => Ok(()),
        }
    }

    fn target_count(
        region_id: &Option<String>,
        selector: &Option<String>,
        role: &Option<String>,
        name: &Option<String>,
    ) -> usize {
        let mut count = 0;
        if region_id.is_some() {
            count += 1;
        }
        if selector.is_some() {
            count += 1;
        }
        if role.is_some() && name.is_some() {
            count += 1;
        }
        count
    }
}

fn default_confidence() -> f64 {
    0.5
}

fn default_reasoning() -> String {
    "(no reasoning provided)".to_string()
}

/// The decision layer's output: an action plus why and how sure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    #[serde(default = "default_reasoning")]
    pub reasoning: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

impl Decision {
    pub fn new(action: Action, reasoning: impl Into<String>, confidence: f64) -> Self {
        Self {
            action,
            reasoning: reasoning.into(),
            confidence,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(AgentError::Schema(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        self.action.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(action: Action) {
        let json = serde_json::to_string(&action).unwrap();
        let back: Action = serde_json::from_str(&json).unwrap();
        assert_eq!(action, back, "round trip failed for {}", json);
    }

    #[test]
    fn all_variants_round_trip() {
        round_trip(Action::VisionClick {
            region_id: "element-1a2b3c4d".into(),
            description: Some("the login button".into()),
        });
        round_trip(Action::VisionFill {
            region_id: "element-deadbeef".into(),
            value: "rust crates".into(),
            description: None,
        });
        round_trip(Action::DomClick {
            region_id: None,
            selector: Some("#submit".into()),
            role: None,
            name: None,
            description: None,
        });
        round_trip(Action::DomFill {
            region_id: None,
            selector: None,
            role: Some("textbox".into()),
            name: Some("Search".into()),
            value: "hello".into(),
            description: None,
        });
        round_trip(Action::KeyPress {
            key: "Enter".into(),
            region_id: None,
            description: None,
        });
        round_trip(Action::Scroll {
            direction: ScrollDirection::Down,
            amount: Some(600.0),
            description: None,
        });
        round_trip(Action::Wait {
            duration: Some(2000),
            until: None,
            description: None,
        });
        round_trip(Action::Wait {
            duration: None,
            until: Some(WaitUntil::Networkidle),
            description: None,
        });
        round_trip(Action::AskUser {
            message: "Which account should I use?".into(),
            action_id: None,
        });
        round_trip(Action::Confirm {
            message: "About to submit the order".into(),
            action_id: Some("act-7".into()),
        });
        round_trip(Action::Done {
            reason: Some("search results visible".into()),
        });
    }

    #[test]
    fn tag_is_wire_format() {
        let json = serde_json::to_value(Action::Done { reason: None }).unwrap();
        assert_eq!(json["type"], "DONE");
        let json = serde_json::to_value(Action::VisionClick {
            region_id: "element-0".into(),
            description: None,
        })
        .unwrap();
        assert_eq!(json["type"], "VISION_CLICK");
        assert_eq!(json["regionId"], "element-0");
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = serde_json::from_str::<Action>(r#"{"type":"TELEPORT"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn fill_requires_exactly_one_target() {
        let none = Action::DomFill {
            region_id: None,
            selector: None,
            role: None,
            name: None,
            value: "x".into(),
            description: None,
        };
        assert!(none.validate().is_err());

        let two = Action::DomFill {
            region_id: Some("element-1".into()),
            selector: Some("#a".into()),
            role: None,
            name: None,
            value: "x".into(),
            description: None,
        };
        assert!(two.validate().is_err());

        let role_only = Action::DomFill {
            region_id: None,
            selector: None,
            role: Some("textbox".into()),
            name: None,
            value: "x".into(),
            description: None,
        };
        assert!(role_only.validate().is_err(), "role without name is not a target");
    }

    #[test]
    fn fill_requires_value() {
        let empty = Action::DomFill {
            region_id: Some("element-1".into()),
            selector: None,
            role: None,
            name: None,
            value: "".into(),
            description: None,
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn decision_defaults_patch_missing_fields() {
        let decision: Decision =
            serde_json::from_str(r#"{"action":{"type":"DONE"}}"#).unwrap();
        assert_eq!(decision.confidence, 0.5);
        assert_eq!(decision.reasoning, "(no reasoning provided)");
        assert!(decision.validate().is_ok());
    }

    #[test]
    fn confidence_out_of_range_is_schema_error() {
        let decision = Decision::new(Action::Done { reason: None }, "sure", 1.5);
        assert!(decision.validate().is_err());
    }
}
