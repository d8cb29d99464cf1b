// Perception layer: one scan distills the live page into an addressable
// catalogue of interactive regions with opaque, single-scan ids

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::browser::{BoundingBox, BrowserGateway, ElementHandle, INTERACTIVE_SELECTOR};
use crate::error::{AgentError, Result};

const MIN_DIMENSION: f64 = 5.0;
const MAX_LABEL_LEN: usize = 100;

/// Interactive-element categories the decision layer reasons about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionRole {
    Button,
    Link,
    Textbox,
    Checkbox,
    Radio,
    Textarea,
    Select,
    Other,
}

impl RegionRole {
    /// Roles that accept typed input.
    pub fn is_input(&self) -> bool {
        matches!(self, RegionRole::Textbox | RegionRole::Textarea | RegionRole::Select)
    }

    pub fn is_clickable(&self) -> bool {
        matches!(self, RegionRole::Button | RegionRole::Link)
    }
}

/// Snapshot of one interactive element.
///
/// Valid only within the scan that produced it; the next scan invalidates
/// every previous id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    pub label: String,
    pub role: RegionRole,
    pub bbox: BoundingBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    pub confidence: f64,
}

/// Region.id → live handle mapping, replaced atomically per scan.
#[derive(Default)]
pub struct ElementStore {
    handles: HashMap<String, Arc<dyn ElementHandle>>,
}

impl ElementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in the handles from a fresh scan, dropping every stale one.
    pub fn replace(&mut self, handles: HashMap<String, Arc<dyn ElementHandle>>) {
        self.handles = handles;
    }

    /// Look up a live handle; ids from earlier scans fail loudly.
    pub fn get(&self, id: &str) -> Result<Arc<dyn ElementHandle>> {
        self.handles
            .get(id)
            .cloned()
            .ok_or_else(|| AgentError::StaleElement(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// Collapse whitespace and trim to the label cap.
pub fn normalize_label(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(MAX_LABEL_LEN).collect()
}

/// Infer the region role from tag name, explicit role attribute, and
/// input type.
pub fn infer_role(tag: &str, role_attr: Option<&str>, input_type: Option<&str>) -> RegionRole {
    match role_attr {
        Some("button") => return RegionRole::Button,
        Some("link") => return RegionRole::Link,
        Some("checkbox") => return RegionRole::Checkbox,
        Some("radio") => return RegionRole::Radio,
        _ => {}
    }
    match tag {
        "button" => RegionRole::Button,
        "a" => RegionRole::Link,
        "textarea" => RegionRole::Textarea,
        "select" => RegionRole::Select,
        "input" => match input_type.unwrap_or("text") {
            "checkbox" => RegionRole::Checkbox,
            "radio" => RegionRole::Radio,
            "button" | "submit" | "reset" => RegionRole::Button,
            _ => RegionRole::Textbox,
        },
        _ => RegionRole::Other,
    }
}

fn fresh_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("element-{}", &hex[..8])
}

/// Scans the page and rebuilds the element store.
///
/// The scan is a pure function of the current DOM; nothing is cached
/// across scans.
pub struct Regionizer;

impl Regionizer {
    /// One pass over the interactive selector, in document order.
    pub async fn detect_regions(
        gateway: &dyn BrowserGateway,
        store: &mut ElementStore,
    ) -> Result<Vec<Region>> {
        store.replace(HashMap::new());

        let handles = gateway.scan(INTERACTIVE_SELECTOR).await?;
        let mut regions = Vec::new();
        let mut fresh: HashMap<String, Arc<dyn ElementHandle>> = HashMap::new();

        for handle in handles {
            if !handle.is_visible().await.unwrap_or(false) {
                continue;
            }
            let bbox = match handle.bounding_box().await {
                Ok(Some(bbox)) => bbox,
                _ => continue,
            };
            if bbox.width < MIN_DIMENSION || bbox.height < MIN_DIMENSION {
                continue;
            }

            let (label, confidence) = match Self::derive_label(handle.as_ref()).await {
                Some(found) => found,
                None => continue,
            };

            let tag = handle.tag_name().await.unwrap_or_default();
            let role_attr = handle.attribute("role").await.unwrap_or(None);
            let input_type = handle.attribute("type").await.unwrap_or(None);
            let role = infer_role(&tag, role_attr.as_deref(), input_type.as_deref());

            let href = if tag == "a" {
                handle.attribute("href").await.unwrap_or(None)
            } else {
                None
            };

            let id = fresh_id();
            fresh.insert(id.clone(), handle);
            regions.push(Region {
                id,
                label,
                role,
                bbox,
                href,
                confidence,
            });
        }

        debug!("scan produced {} regions", regions.len());
        store.replace(fresh);
        Ok(regions)
    }

    /// First non-empty of aria-label, name, placeholder, text content;
    /// falls back to a descendant image's alt text. Empty labels drop the
    /// region entirely.
    async fn derive_label(handle: &dyn ElementHandle) -> Option<(String, f64)> {
        for (attr, confidence) in [("aria-label", 0.95), ("name", 0.9), ("placeholder", 0.9)] {
            if let Ok(Some(value)) = handle.attribute(attr).await {
                let label = normalize_label(&value);
                if !label.is_empty() {
                    return Some((label, confidence));
                }
            }
        }
        if let Ok(text) = handle.text_content().await {
            let label = normalize_label(&text);
            if !label.is_empty() {
                return Some((label, 0.8));
            }
        }
        if let Ok(Some(alt)) = handle.image_alt().await {
            let alt = normalize_label(&alt);
            let label = if alt.is_empty() {
                "Unlabeled Image".to_string()
            } else {
                normalize_label(&format!("Image: {}", alt))
            };
            return Some((label, 0.6));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_normalization_collapses_and_caps() {
        assert_eq!(normalize_label("  Sign \n\t in  "), "Sign in");
        let long = "x".repeat(300);
        assert_eq!(normalize_label(&long).len(), 100);
        assert_eq!(normalize_label("   "), "");
    }

    #[test]
    fn role_inference_prefers_explicit_role() {
        assert_eq!(infer_role("div", Some("button"), None), RegionRole::Button);
        assert_eq!(infer_role("span", Some("link"), None), RegionRole::Link);
        assert_eq!(infer_role("a", None, None), RegionRole::Link);
        assert_eq!(infer_role("input", None, Some("checkbox")), RegionRole::Checkbox);
        assert_eq!(infer_role("input", None, Some("submit")), RegionRole::Button);
        assert_eq!(infer_role("input", None, None), RegionRole::Textbox);
        assert_eq!(infer_role("textarea", None, None), RegionRole::Textarea);
        assert_eq!(infer_role("div", None, None), RegionRole::Other);
    }

    #[test]
    fn fresh_ids_are_prefixed_and_unique() {
        let a = fresh_id();
        let b = fresh_id();
        assert!(a.starts_with("element-"));
        assert_eq!(a.len(), "element-".len() + 8);
        assert_ne!(a, b);
    }

    #[test]
    fn stale_lookup_fails() {
        let store = ElementStore::new();
        let err = store.get("element-gone").unwrap_err();
        assert!(matches!(err, AgentError::StaleElement(_)));
    }
}
