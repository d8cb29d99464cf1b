// chromiumoxide-backed gateway
// DOM reads go through page-side JavaScript; input goes through CDP
// Input.* dispatch so pages see trusted-looking events

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::input;
use chromiumoxide::{Browser as ChromeBrowser, BrowserConfig, Element, Page};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::browser::{keys, BoundingBox, BrowserGateway, ElementHandle, LoadState, ScrollGeometry};
use crate::config::BrowserSettings;
use crate::error::{AgentError, Result};

/// Map a CDP failure onto the agent's error kinds.
///
/// Context-destroyed errors are expected mid-navigation and get their own
/// variant so the loop can treat them as non-fatal.
fn classify(err: impl std::fmt::Display) -> AgentError {
    let text = err.to_string();
    if text.contains("context was destroyed")
        || text.contains("Cannot find context")
        || text.contains("Execution context")
    {
        AgentError::NavigationContextDestroyed
    } else if text.contains("Could not find node")
        || text.contains("No node with given id")
        || text.contains("node does not belong")
    {
        AgentError::StaleElement(text)
    } else {
        AgentError::Browser(text)
    }
}

/// Default browser gateway over a single Chrome page.
pub struct CdpGateway {
    #[allow(dead_code)] // keeps the browser process alive for the session
    browser: Arc<ChromeBrowser>,
    page: Arc<RwLock<Page>>,
}

impl CdpGateway {
    /// Launch Chrome and open the start page.
    pub async fn launch(settings: &BrowserSettings) -> anyhow::Result<Self> {
        info!("Launching Chrome (headless: {})", settings.headless);

        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(settings.window_width, settings.window_height)
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-blink-features=AutomationControlled");
        if !settings.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(|e| anyhow::anyhow!(e))?;

        let (browser, mut handler) = ChromeBrowser::launch(config)
            .await
            .map_err(|e| anyhow::anyhow!("failed to launch Chrome: {}", e))?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    let text = e.to_string();
                    if text.contains("Connection reset")
                        || text.contains("ResetWithoutClosingHandshake")
                    {
                        warn!("WebSocket hiccup (non-fatal): {}", text);
                    } else {
                        error!("browser handler error: {}", text);
                        if text.contains("Browser closed") || text.contains("Process exited") {
                            break;
                        }
                    }
                }
            }
            warn!("browser handler task terminated");
        });

        let start = if settings.start_url.is_empty() {
            "about:blank"
        } else {
            settings.start_url.as_str()
        };
        let page = browser
            .new_page(start)
            .await
            .map_err(|e| anyhow::anyhow!("failed to open page: {}", e))?;

        Ok(Self {
            browser: Arc::new(browser),
            page: Arc::new(RwLock::new(page)),
        })
    }

    async fn page(&self) -> Page {
        self.page.read().await.clone()
    }

    async fn eval<T: DeserializeOwned>(&self, script: &str) -> Result<T> {
        let page = self.page().await;
        let result = page.evaluate(script).await.map_err(classify)?;
        result.into_value().map_err(|e| AgentError::Browser(e.to_string()))
    }

    async fn find_with_retry(&self, selector: &str, attempts: u32) -> Result<Element> {
        let page = self.page().await;
        let mut tries = 0;
        loop {
            match page.find_element(selector).await {
                Ok(element) => return Ok(element),
                Err(_) if tries + 1 < attempts => {
                    tries += 1;
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                Err(e) => {
                    return Err(AgentError::Browser(format!(
                        "element not found after {} attempts: {} ({})",
                        attempts, selector, e
                    )))
                }
            }
        }
    }

    async fn dispatch_key_event(
        &self,
        event_type: input::DispatchKeyEventType,
        key: &str,
        code: &str,
        key_code: i64,
        text: Option<&str>,
        modifiers: i64,
    ) -> Result<()> {
        let mut builder = input::DispatchKeyEventParams::builder()
            .r#type(event_type)
            .key(key)
            .code(code)
            .windows_virtual_key_code(key_code)
            .native_virtual_key_code(key_code)
            .modifiers(modifiers);
        if let Some(text) = text {
            builder = builder.text(text).unmodified_text(text);
        }
        let params = builder.build().map_err(AgentError::Browser)?;
        let page = self.page().await;
        page.execute(params).await.map_err(classify)?;
        Ok(())
    }

    /// Full down/char/up sequence for one key, with modifiers applied.
    async fn press_key_spec(
        &self,
        key: &str,
        code: &str,
        key_code: i64,
        text: Option<&str>,
        modifiers: i64,
    ) -> Result<()> {
        self.dispatch_key_event(
            input::DispatchKeyEventType::RawKeyDown,
            key,
            code,
            key_code,
            text,
            modifiers,
        )
        .await?;
        if text.is_some() && modifiers & (keys::MOD_CTRL | keys::MOD_META) == 0 {
            self.dispatch_key_event(
                input::DispatchKeyEventType::Char,
                key,
                code,
                key_code,
                text,
                modifiers,
            )
            .await?;
        }
        self.dispatch_key_event(
            input::DispatchKeyEventType::KeyUp,
            key,
            code,
            key_code,
            text,
            modifiers,
        )
        .await
    }

    async fn mouse_event(
        &self,
        event_type: input::DispatchMouseEventType,
        x: f64,
        y: f64,
        with_button: bool,
    ) -> Result<()> {
        let mut builder = input::DispatchMouseEventParams::builder()
            .r#type(event_type)
            .x(x)
            .y(y);
        if with_button {
            builder = builder.button(input::MouseButton::Left).click_count(1);
        }
        let params = builder.build().map_err(AgentError::Browser)?;
        let page = self.page().await;
        page.execute(params).await.map_err(classify)?;
        Ok(())
    }

    /// Locate an element by ARIA role (explicit attribute or implicit tag)
    /// and accessible-name substring, entirely page-side.
    fn role_query(role: &str, name: &str, body: &str) -> Result<String> {
        let role_json = serde_json::to_string(role)?;
        let name_json = serde_json::to_string(&name.to_lowercase())?;
        Ok(format!(
            r#"(function() {{
                const role = {role_json};
                const name = {name_json};
                const implicit = {{
                    'button': "button, input[type='button'], input[type='submit']",
                    'link': "a[href]",
                    'textbox': "input:not([type='hidden']), textarea",
                    'checkbox': "input[type='checkbox']",
                    'radio': "input[type='radio']"
                }};
                let candidates = Array.from(document.querySelectorAll("[role='" + role + "']"));
                if (implicit[role]) {{
                    candidates = candidates.concat(Array.from(document.querySelectorAll(implicit[role])));
                }}
                const accessibleName = (el) =>
                    (el.getAttribute('aria-label') || el.getAttribute('name') ||
                     el.getAttribute('placeholder') || el.textContent || '').trim().toLowerCase();
                const target = candidates.find((el) => accessibleName(el).includes(name));
                if (!target) return false;
                {body}
                return true;
            }})()"#,
        ))
    }
}

#[async_trait]
impl BrowserGateway for CdpGateway {
    async fn scan(&self, selector: &str) -> Result<Vec<Arc<dyn ElementHandle>>> {
        let page = self.page().await;
        let elements = page.find_elements(selector).await.unwrap_or_default();
        Ok(elements
            .into_iter()
            .map(|inner| Arc::new(CdpElement { inner }) as Arc<dyn ElementHandle>)
            .collect())
    }

    async fn url(&self) -> Result<String> {
        let page = self.page().await;
        let url = page.url().await.map_err(classify)?;
        Ok(url.unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn title(&self) -> Result<String> {
        self.eval("document.title || ''").await
    }

    async fn page_text(&self) -> Result<String> {
        self.eval("document.body ? document.body.innerText : ''").await
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        let url = if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("https://{}", url)
        };
        let page = self.page().await;
        let mut retries = 3u32;
        loop {
            let attempt = tokio::time::timeout(Duration::from_secs(30), page.goto(&url)).await;
            match attempt {
                Ok(Ok(_)) => {
                    let _ = tokio::time::timeout(
                        Duration::from_secs(15),
                        page.wait_for_navigation(),
                    )
                    .await;
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    return Ok(());
                }
                Ok(Err(e)) if retries > 1 => {
                    warn!("navigation failed, retrying: {}", e);
                }
                Err(_) if retries > 1 => {
                    warn!("navigation timed out, retrying");
                }
                Ok(Err(e)) => return Err(classify(e)),
                Err(_) => return Err(AgentError::Browser(format!("navigation timeout: {}", url))),
            }
            retries -= 1;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> Result<()> {
        let page = self.page().await;
        match state {
            LoadState::Load | LoadState::DomContentLoaded => {
                let _ = tokio::time::timeout(timeout, page.wait_for_navigation()).await;
            }
            LoadState::NetworkIdle => {
                let _ = tokio::time::timeout(timeout, page.wait_for_navigation()).await;
                tokio::time::sleep(Duration::from_millis(500).min(timeout)).await;
            }
        }
        Ok(())
    }

    async fn wait_for_stability(&self, timeout: Duration) {
        let page = self.page().await;
        let settle = tokio::time::timeout(timeout, async {
            let _ = page.wait_for_navigation().await;
            // best-effort idle settle, capped well under the outer budget
            tokio::time::sleep(Duration::from_millis(500)).await;
        })
        .await;
        if settle.is_err() {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
    }

    async fn scroll_geometry(&self) -> Result<ScrollGeometry> {
        self.eval(
            r#"(function() {
                return {
                    scrollY: window.scrollY,
                    scrollHeight: document.documentElement.scrollHeight,
                    viewportHeight: window.innerHeight
                };
            })()"#,
        )
        .await
    }

    async fn mouse_move(&self, x: f64, y: f64) -> Result<()> {
        self.mouse_event(input::DispatchMouseEventType::MouseMoved, x, y, false)
            .await
    }

    async fn mouse_down(&self, x: f64, y: f64) -> Result<()> {
        self.mouse_event(input::DispatchMouseEventType::MousePressed, x, y, true)
            .await
    }

    async fn mouse_up(&self, x: f64, y: f64) -> Result<()> {
        self.mouse_event(input::DispatchMouseEventType::MouseReleased, x, y, true)
            .await
    }

    async fn wheel(&self, delta_x: f64, delta_y: f64) -> Result<()> {
        #[derive(serde::Deserialize)]
        struct Viewport {
            width: f64,
            height: f64,
        }
        let viewport: Viewport = self
            .eval("(function() { return { width: window.innerWidth, height: window.innerHeight }; })()")
            .await?;
        let params = input::SynthesizeScrollGestureParams::builder()
            .x(viewport.width / 2.0)
            .y(viewport.height / 2.0)
            .x_distance(-delta_x)
            .y_distance(-delta_y)
            .speed((delta_y.abs().max(delta_x.abs()) * 10.0) as i64)
            .build()
            .map_err(AgentError::Browser)?;
        let page = self.page().await;
        page.execute(params).await.map_err(classify)?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        let (modifiers, bare) = keys::parse_combo(key);
        if let Some(spec) = keys::lookup(bare) {
            return self
                .press_key_spec(spec.key, spec.code, spec.key_code, spec.text, modifiers)
                .await;
        }
        let mut chars = bare.chars();
        match (chars.next(), chars.next()) {
            (Some(ch), None) if ch.is_ascii() => {
                let upper = ch.to_ascii_uppercase();
                let code = if ch.is_ascii_alphabetic() {
                    format!("Key{}", upper)
                } else if ch.is_ascii_digit() {
                    format!("Digit{}", ch)
                } else {
                    String::new()
                };
                let text = ch.to_string();
                self.press_key_spec(&text, &code, upper as i64, Some(&text), modifiers)
                    .await
            }
            _ => Err(AgentError::Browser(format!("unknown key: {}", key))),
        }
    }

    async fn type_text(&self, text: &str, per_char_delay: Duration) -> Result<()> {
        let page = self.page().await;
        for ch in text.chars() {
            tokio::time::sleep(per_char_delay).await;
            page.execute(input::InsertTextParams::new(ch))
                .await
                .map_err(classify)?;
        }
        Ok(())
    }

    async fn click_selector(&self, selector: &str) -> Result<()> {
        let element = self.find_with_retry(selector, 3).await?;
        element.click().await.map_err(classify)?;
        Ok(())
    }

    async fn fill_selector(&self, selector: &str, value: &str) -> Result<()> {
        let element = self.find_with_retry(selector, 3).await?;
        element.click().await.map_err(classify)?;
        element
            .call_js_fn(
                "function() { this.value = ''; this.dispatchEvent(new Event('input', { bubbles: true })); }",
                false,
            )
            .await
            .map_err(classify)?;
        element.type_str(value).await.map_err(classify)?;
        Ok(())
    }

    async fn click_role(&self, role: &str, name: &str) -> Result<()> {
        let script = Self::role_query(role, name, "target.click();")?;
        let clicked: bool = self.eval(&script).await?;
        if clicked {
            Ok(())
        } else {
            Err(AgentError::Browser(format!(
                "no element with role '{}' named '{}'",
                role, name
            )))
        }
    }

    async fn fill_role(&self, role: &str, name: &str, value: &str) -> Result<()> {
        let value_json = serde_json::to_string(value)?;
        let body = format!(
            "target.focus(); target.value = {value_json}; \
             target.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             target.dispatchEvent(new Event('change', {{ bubbles: true }}));",
        );
        let script = Self::role_query(role, name, &body)?;
        let filled: bool = self.eval(&script).await?;
        if filled {
            Ok(())
        } else {
            Err(AgentError::Browser(format!(
                "no fillable element with role '{}' named '{}'",
                role, name
            )))
        }
    }
}

/// Live handle backed by a chromiumoxide element.
#[derive(Debug)]
pub struct CdpElement {
    inner: Element,
}

impl CdpElement {
    async fn probe<T: DeserializeOwned>(&self, decl: &str) -> Result<T> {
        let returns = self.inner.call_js_fn(decl, false).await.map_err(classify)?;
        let value = returns.result.value.unwrap_or(serde_json::Value::Null);
        serde_json::from_value(value).map_err(|e| AgentError::Browser(e.to_string()))
    }

    async fn run(&self, decl: &str) -> Result<()> {
        self.inner.call_js_fn(decl, false).await.map_err(classify)?;
        Ok(())
    }
}

#[async_trait]
impl ElementHandle for CdpElement {
    async fn is_visible(&self) -> Result<bool> {
        self.probe(
            r#"function() {
                const rect = this.getBoundingClientRect();
                const style = window.getComputedStyle(this);
                return rect.width > 0 && rect.height > 0 &&
                       style.visibility !== 'hidden' &&
                       style.display !== 'none' &&
                       style.opacity !== '0';
            }"#,
        )
        .await
    }

    async fn bounding_box(&self) -> Result<Option<BoundingBox>> {
        self.probe(
            r#"function() {
                const rect = this.getBoundingClientRect();
                if (rect.width === 0 && rect.height === 0) return null;
                return { x: rect.x, y: rect.y, width: rect.width, height: rect.height };
            }"#,
        )
        .await
    }

    async fn text_content(&self) -> Result<String> {
        let text = self.inner.inner_text().await.map_err(classify)?;
        Ok(text.unwrap_or_default())
    }

    async fn attribute(&self, name: &str) -> Result<Option<String>> {
        self.inner.attribute(name).await.map_err(classify)
    }

    async fn tag_name(&self) -> Result<String> {
        self.probe("function() { return this.tagName.toLowerCase(); }").await
    }

    async fn scroll_into_view(&self) -> Result<()> {
        self.run("function() { this.scrollIntoView({ block: 'center', inline: 'center' }); }")
            .await
    }

    async fn click(&self) -> Result<()> {
        self.inner.click().await.map_err(classify)?;
        Ok(())
    }

    async fn fill(&self, value: &str) -> Result<()> {
        self.inner.click().await.map_err(classify)?;
        self.run("function() { this.value = ''; this.dispatchEvent(new Event('input', { bubbles: true })); }")
            .await?;
        self.inner.type_str(value).await.map_err(classify)?;
        Ok(())
    }

    async fn press(&self, key: &str) -> Result<()> {
        self.inner.press_key(key).await.map_err(classify)?;
        Ok(())
    }

    async fn image_alt(&self) -> Result<Option<String>> {
        self.probe(
            r#"function() {
                const img = this.querySelector('img');
                return img ? (img.getAttribute('alt') || '') : null;
            }"#,
        )
        .await
    }
}
