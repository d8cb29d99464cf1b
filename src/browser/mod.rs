// Engine-agnostic browser surface
// The control loop only ever talks to these traits; the chromiumoxide
// adapter in `cdp` is the default implementation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

pub mod cdp;
pub mod humanize;
pub mod keys;

pub use cdp::CdpGateway;

/// Broad selector matching everything the agent can interact with.
pub const INTERACTIVE_SELECTOR: &str = "button, [role='button'], [role='link'], \
     [role='checkbox'], [role='radio'], a[href], input:not([type='hidden']), \
     textarea, select";

/// Viewport-relative element bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Page scroll geometry, read in one round trip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollGeometry {
    pub scroll_y: f64,
    pub scroll_height: f64,
    pub viewport_height: f64,
}

impl ScrollGeometry {
    /// Within 5px of the document end.
    pub fn at_document_bottom(&self) -> bool {
        self.scroll_y + self.viewport_height >= self.scroll_height - 5.0
    }

    /// A page that never scrolled and whose content fits the viewport.
    pub fn unscrollable(&self) -> bool {
        self.scroll_y == 0.0 && (self.scroll_height - self.viewport_height).abs() < 10.0
    }
}

/// Load states a `WAIT` action can block on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Load,
    DomContentLoaded,
    NetworkIdle,
}

/// A live handle onto one DOM element.
///
/// Handles are only valid between the scan that produced them and the
/// next scan; the element store enforces that window.
#[async_trait]
pub trait ElementHandle: Send + Sync + std::fmt::Debug {
    async fn is_visible(&self) -> Result<bool>;
    /// `None` when the element has no layout box.
    async fn bounding_box(&self) -> Result<Option<BoundingBox>>;
    async fn text_content(&self) -> Result<String>;
    async fn attribute(&self, name: &str) -> Result<Option<String>>;
    async fn tag_name(&self) -> Result<String>;
    async fn scroll_into_view(&self) -> Result<()>;
    async fn click(&self) -> Result<()>;
    /// Replace the element's current value with `value`.
    async fn fill(&self, value: &str) -> Result<()>;
    async fn press(&self, key: &str) -> Result<()>;
    /// Alt text of a descendant image, if the element wraps one.
    async fn image_alt(&self) -> Result<Option<String>>;
}

/// Low-level browser operations the controller composes.
#[async_trait]
pub trait BrowserGateway: Send + Sync {
    /// Live handles for every element matching `selector`, in document order.
    async fn scan(&self, selector: &str) -> Result<Vec<Arc<dyn ElementHandle>>>;

    async fn url(&self) -> Result<String>;
    async fn title(&self) -> Result<String>;
    /// Full visible text of the document body.
    async fn page_text(&self) -> Result<String>;
    async fn navigate(&self, url: &str) -> Result<()>;
    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> Result<()>;

    /// Wait up to `timeout` for the page to settle after an action.
    /// Never fails: on timeout the page is taken as-is.
    async fn wait_for_stability(&self, timeout: Duration);

    async fn scroll_geometry(&self) -> Result<ScrollGeometry>;

    async fn mouse_move(&self, x: f64, y: f64) -> Result<()>;
    async fn mouse_down(&self, x: f64, y: f64) -> Result<()>;
    async fn mouse_up(&self, x: f64, y: f64) -> Result<()>;
    /// Positive `delta_y` scrolls towards the end of the document.
    async fn wheel(&self, delta_x: f64, delta_y: f64) -> Result<()>;

    /// Page-level key press. `key` may carry modifiers ("Control+a").
    async fn press_key(&self, key: &str) -> Result<()>;
    /// Type text into the focused element, one character per `per_char_delay`.
    async fn type_text(&self, text: &str, per_char_delay: Duration) -> Result<()>;

    async fn click_selector(&self, selector: &str) -> Result<()>;
    async fn fill_selector(&self, selector: &str, value: &str) -> Result<()>;
    /// Click the first element with `role` whose accessible name contains `name`.
    async fn click_role(&self, role: &str, name: &str) -> Result<()>;
    async fn fill_role(&self, role: &str, name: &str, value: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_bottom_detection() {
        let geo = ScrollGeometry {
            scroll_y: 1200.0,
            scroll_height: 2000.0,
            viewport_height: 800.0,
        };
        assert!(geo.at_document_bottom());

        let mid = ScrollGeometry {
            scroll_y: 100.0,
            scroll_height: 2000.0,
            viewport_height: 800.0,
        };
        assert!(!mid.at_document_bottom());
    }

    #[test]
    fn geometry_unscrollable_detection() {
        let flat = ScrollGeometry {
            scroll_y: 0.0,
            scroll_height: 805.0,
            viewport_height: 800.0,
        };
        assert!(flat.unscrollable());

        let tall = ScrollGeometry {
            scroll_y: 0.0,
            scroll_height: 2000.0,
            viewport_height: 800.0,
        };
        assert!(!tall.unscrollable());
    }
}
