// Cursor physics: clicks and fills that look like a person did them

use rand::Rng;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::browser::{BoundingBox, BrowserGateway, ElementHandle};
use crate::error::{AgentError, Result};

const MOUSE_STEPS: u32 = 10;
const HOVER_DELAY: Duration = Duration::from_millis(100);
const PRESS_DELAY: Duration = Duration::from_millis(70);
const CLEAR_DELAY: Duration = Duration::from_millis(50);
const TYPE_DELAY: Duration = Duration::from_millis(50);

/// Click point: element centre nudged by up to a pixel in each axis.
fn click_point(bbox: &BoundingBox) -> (f64, f64) {
    let (cx, cy) = bbox.center();
    let mut rng = rand::rng();
    (
        cx + rng.random_range(-1.0..=1.0),
        cy + rng.random_range(-1.0..=1.0),
    )
}

/// Platform-correct select-all chord.
fn select_all_combo() -> &'static str {
    if cfg!(target_os = "macos") {
        "Meta+a"
    } else {
        "Control+a"
    }
}

/// Interpolated waypoints from `from` to `to`, excluding the start and
/// ending exactly on `to`.
fn path_points(from: (f64, f64), to: (f64, f64), steps: u32) -> Vec<(f64, f64)> {
    (1..=steps)
        .map(|step| {
            let t = step as f64 / steps as f64;
            (
                from.0 + (to.0 - from.0) * t,
                from.1 + (to.1 - from.1) * t,
            )
        })
        .collect()
}

/// Session-lived cursor that remembers where it last was, so every glide
/// continues from the previous click instead of snapping back to the
/// viewport origin.
pub struct Cursor {
    position: Mutex<(f64, f64)>,
}

impl Default for Cursor {
    fn default() -> Self {
        Self::new()
    }
}

impl Cursor {
    pub fn new() -> Self {
        Self {
            position: Mutex::new((0.0, 0.0)),
        }
    }

    pub fn position(&self) -> (f64, f64) {
        *self.position.lock().unwrap()
    }

    async fn glide_to(&self, gateway: &dyn BrowserGateway, x: f64, y: f64) -> Result<()> {
        let start = self.position();
        for (px, py) in path_points(start, (x, y), MOUSE_STEPS) {
            gateway.mouse_move(px, py).await?;
        }
        *self.position.lock().unwrap() = (x, y);
        Ok(())
    }

    /// Scroll the target into view and click its jittered centre with an
    /// interpolated mouse path and human-scale delays.
    pub async fn vision_click(
        &self,
        gateway: &dyn BrowserGateway,
        handle: &dyn ElementHandle,
        label: &str,
    ) -> Result<()> {
        handle.scroll_into_view().await?;
        let bbox = handle
            .bounding_box()
            .await?
            .ok_or_else(|| AgentError::NotVisible(label.to_string()))?;

        let (x, y) = click_point(&bbox);
        debug!("cursor click at ({:.1}, {:.1}) on '{}'", x, y, label);

        self.glide_to(gateway, x, y).await?;
        tokio::time::sleep(HOVER_DELAY).await;

        gateway.mouse_down(x, y).await?;
        tokio::time::sleep(PRESS_DELAY).await;
        gateway.mouse_up(x, y).await?;
        Ok(())
    }

    /// Cursor-physics fill: click to focus, select-all + backspace to
    /// clear, then type with a per-character delay.
    pub async fn vision_fill(
        &self,
        gateway: &dyn BrowserGateway,
        handle: &dyn ElementHandle,
        label: &str,
        value: &str,
    ) -> Result<()> {
        self.vision_click(gateway, handle, label).await?;

        gateway.press_key(select_all_combo()).await?;
        gateway.press_key("Backspace").await?;
        tokio::time::sleep(CLEAR_DELAY).await;

        gateway.type_text(value, TYPE_DELAY).await?;
        Ok(())
    }
}
