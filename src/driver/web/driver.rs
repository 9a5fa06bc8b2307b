//! Web Driver implementation using Playwright
//!
//! One `WebDriver` owns one browser context and one page, so each flow gets
//! an isolated cookie jar.

use anyhow::{Context, Result};
use async_trait::async_trait;
use playwright::api::{Browser, BrowserContext, Cookie, Page, Viewport};
use playwright::Playwright;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::driver::traits::{BrowserPage, ElementInfo, NativeSelection, StoredCookie};

/// Web browser type
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum BrowserType {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

/// Web Driver configuration
#[derive(Debug, Clone)]
pub struct WebDriverConfig {
    pub browser_type: BrowserType,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Bound for `goto`
    pub navigation_timeout_ms: u64,
    /// Bound for clicks, fills and element queries
    pub action_timeout_ms: u64,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        let headless = std::env::var("HARNESS_HEADLESS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true);

        Self {
            browser_type: BrowserType::Chromium,
            headless,
            viewport_width: 1280,
            viewport_height: 720,
            navigation_timeout_ms: 30_000,
            action_timeout_ms: 8_000,
        }
    }
}

/// Web Driver using Playwright
pub struct WebDriver {
    #[allow(dead_code)]
    playwright: Arc<Playwright>,
    #[allow(dead_code)]
    browser: Arc<Browser>,
    context: Arc<BrowserContext>,
    page: Arc<Mutex<Page>>,
    config: WebDriverConfig,
}

impl WebDriver {
    /// Launch a browser and open a fresh context with one page
    pub async fn new(config: WebDriverConfig) -> Result<Self> {
        let playwright = Playwright::initialize()
            .await
            .context("Failed to initialize Playwright")?;

        let browser = match config.browser_type {
            BrowserType::Chromium => launch_chromium_browser(&playwright.chromium(), &config).await?,
            BrowserType::Firefox => {
                playwright
                    .firefox()
                    .launcher()
                    .headless(config.headless)
                    .launch()
                    .await?
            }
            BrowserType::Webkit => {
                playwright
                    .webkit()
                    .launcher()
                    .headless(config.headless)
                    .launch()
                    .await?
            }
        };

        let context = browser.context_builder().build().await?;
        let page = context.new_page().await?;

        page.set_viewport_size(Viewport {
            width: config.viewport_width as i32,
            height: config.viewport_height as i32,
        })
        .await?;

        log::debug!(
            "opened {:?} context (headless: {})",
            config.browser_type,
            config.headless
        );

        Ok(Self {
            playwright: Arc::new(playwright),
            browser: Arc::new(browser),
            context: Arc::new(context),
            page: Arc::new(Mutex::new(page)),
            config,
        })
    }

    fn action_timeout(&self) -> f64 {
        self.config.action_timeout_ms as f64
    }
}

/// Client-side redirects (Livewire, SPA routers) abort the pending
/// navigation; the page still ends up somewhere observable.
/// Runs against the element Playwright resolved, so selectors may use
/// engine-only syntax such as `:has-text()` and `>>`.
const SELECT_NATIVE_JS: &str = r#"
    (select, query) => {
        if (!select || !select.options) return null;
        const needle = query.toLowerCase();
        const options = Array.from(select.options).filter(o => !o.disabled && o.value !== '');
        const option = options.find(o => o.text.toLowerCase().includes(needle));
        if (!option) return null;
        select.value = option.value;
        select.dispatchEvent(new Event('input', { bubbles: true }));
        select.dispatchEvent(new Event('change', { bubbles: true }));
        return { value: option.value, label: option.text.trim() };
    }
"#;

fn native_selection(result: &serde_json::Value) -> Option<NativeSelection> {
    match (
        result.get("value").and_then(|v| v.as_str()),
        result.get("label").and_then(|v| v.as_str()),
    ) {
        (Some(value), Some(label)) => Some(NativeSelection {
            value: value.to_string(),
            label: label.to_string(),
        }),
        _ => None,
    }
}

fn is_navigation_race(message: &str) -> bool {
    message.contains("ERR_ABORTED") || message.contains("interrupted by another navigation")
}

#[async_trait]
impl BrowserPage for WebDriver {
    async fn goto(&self, url: &str) -> Result<()> {
        let page = self.page.lock().await;
        match page
            .goto_builder(url)
            .timeout(self.config.navigation_timeout_ms as f64)
            .goto()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_navigation_race(&e.to_string()) => {
                log::debug!("navigation to {} raced a redirect: {}", url, e);
                Ok(())
            }
            Err(e) => Err(anyhow::anyhow!("Failed to navigate to {}: {}", url, e)),
        }
    }

    async fn current_url(&self) -> Result<String> {
        let page = self.page.lock().await;
        Ok(page.url()?)
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        let page = self.page.lock().await;
        page.fill_builder(selector, value)
            .timeout(self.action_timeout())
            .fill()
            .await
            .with_context(|| format!("Failed to fill: {}", selector))?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let page = self.page.lock().await;
        page.click_builder(selector)
            .timeout(self.action_timeout())
            .click()
            .await
            .with_context(|| format!("Failed to click: {}", selector))?;
        Ok(())
    }

    async fn click_nth(&self, selector: &str, index: usize) -> Result<()> {
        let page = self.page.lock().await;
        let elements = page.query_selector_all(selector).await?;
        match elements.get(index) {
            Some(el) => {
                el.scroll_into_view_if_needed(None).await.ok();
                el.click_builder()
                    .timeout(self.action_timeout())
                    .click()
                    .await?;
                Ok(())
            }
            None => anyhow::bail!("Element not found: {} at index {}", selector, index),
        }
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        let page = self.page.lock().await;
        page.keyboard.down(key).await?;
        page.keyboard.up(key).await?;
        Ok(())
    }

    async fn is_visible(&self, selector: &str) -> Result<bool> {
        let page = self.page.lock().await;
        match page.query_selector(selector).await? {
            Some(el) => Ok(el.is_visible().await?),
            None => Ok(false),
        }
    }

    async fn elements(&self, selector: &str) -> Result<Vec<ElementInfo>> {
        let page = self.page.lock().await;
        let handles = page.query_selector_all(selector).await?;
        let mut out = Vec::with_capacity(handles.len());
        for el in handles {
            let visible = el.is_visible().await.unwrap_or(false);
            let text = el.inner_text().await.unwrap_or_default();
            out.push(ElementInfo {
                text: text.split_whitespace().collect::<Vec<_>>().join(" "),
                visible,
            });
        }
        Ok(out)
    }

    async fn attribute(&self, selector: &str, name: &str) -> Result<Option<String>> {
        let page = self.page.lock().await;
        match page.query_selector(selector).await? {
            Some(el) => Ok(el.get_attribute(name).await?),
            None => Ok(None),
        }
    }

    async fn input_value(&self, selector: &str) -> Result<String> {
        let page = self.page.lock().await;
        let js = "el => el.value || ''";
        match page
            .evaluate_on_selector::<String, _>(selector, js, None::<String>)
            .await
        {
            Ok(value) => Ok(value),
            Err(_) => Ok(String::new()),
        }
    }

    async fn select_native(&self, selector: &str, query: &str) -> Result<Option<NativeSelection>> {
        let page = self.page.lock().await;
        match page
            .evaluate_on_selector::<String, serde_json::Value>(
                selector,
                SELECT_NATIVE_JS,
                Some(query.to_string()),
            )
            .await
        {
            Ok(result) => Ok(native_selection(&result)),
            Err(e) => {
                log::debug!("select_native '{}': {}", selector, e);
                Ok(None)
            }
        }
    }

    async fn selected_label(&self, selector: &str) -> Result<Option<String>> {
        let page = self.page.lock().await;
        let js = "el => (el.selectedOptions && el.selectedOptions[0]) ? el.selectedOptions[0].text.trim() : ''";
        match page
            .evaluate_on_selector::<String, String>(selector, js, None::<String>)
            .await
        {
            Ok(label) if !label.is_empty() => Ok(Some(label)),
            _ => Ok(None),
        }
    }

    async fn content(&self) -> Result<String> {
        let page = self.page.lock().await;
        Ok(page.content().await?)
    }

    async fn take_screenshot(&self, path: &Path) -> Result<()> {
        let page = self.page.lock().await;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        page.screenshot_builder()
            .path(path.to_path_buf())
            .screenshot()
            .await?;
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<StoredCookie>> {
        let cookies = self.context.cookies(&[]).await?;
        Ok(cookies
            .into_iter()
            .map(|c| StoredCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                expires: c.expires,
                http_only: c.http_only,
                secure: c.secure,
            })
            .collect())
    }

    async fn add_cookies(&self, cookies: &[StoredCookie]) -> Result<()> {
        let converted: Vec<Cookie> = cookies
            .iter()
            .map(|c| Cookie {
                name: c.name.clone(),
                value: c.value.clone(),
                url: None,
                domain: c.domain.clone(),
                path: c.path.clone(),
                expires: c.expires,
                http_only: c.http_only,
                secure: c.secure,
                same_site: None,
            })
            .collect();
        self.context.add_cookies(&converted).await?;
        Ok(())
    }

    async fn clear_cookies(&self) -> Result<()> {
        self.context.clear_cookies().await?;
        Ok(())
    }

    async fn local_storage(&self) -> Result<BTreeMap<String, String>> {
        let page = self.page.lock().await;
        let entries: BTreeMap<String, String> = page
            .evaluate(
                "() => { try { return Object.assign({}, window.localStorage); } catch (e) { return {}; } }",
                (),
            )
            .await?;
        Ok(entries)
    }

    async fn set_local_storage(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let page = self.page.lock().await;
        page.evaluate::<_, ()>(
            "entries => { for (const [k, v] of Object.entries(entries)) { localStorage.setItem(k, v); } }",
            entries.clone(),
        )
        .await?;
        Ok(())
    }
}

/// Launch a new Chromium browser, preferring an installed Chrome
async fn launch_chromium_browser(
    chromium: &playwright::api::BrowserType,
    config: &WebDriverConfig,
) -> Result<playwright::api::Browser> {
    let mut launcher = chromium.launcher();
    launcher = launcher.headless(config.headless);

    let env_path = std::env::var("PLAYWRIGHT_CHROMIUM_EXECUTABLE_PATH")
        .ok()
        .map(std::path::PathBuf::from);
    let system_path = if env_path.is_none() {
        find_system_browser()
    } else {
        None
    };

    if let Some(ref path) = env_path {
        log::info!("Using browser from env: {}", path.display());
        launcher = launcher.executable(path);
    } else if let Some(ref path) = system_path {
        log::info!("Using discovered browser: {}", path.display());
        launcher = launcher.executable(path);
    } else {
        log::info!("No browser executable found, using Playwright's bundled Chromium");
    }

    let args: Vec<String> = [
        "--no-sandbox",
        "--disable-setuid-sandbox",
        "--disable-dev-shm-usage",
        "--disable-gpu",
        "--ignore-certificate-errors",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    launcher = launcher.args(&args);

    Ok(launcher.launch().await?)
}

fn find_system_browser() -> Option<std::path::PathBuf> {
    let common_paths = [
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
    ];

    common_paths
        .iter()
        .map(std::path::Path::new)
        .find(|p| p.exists())
        .map(|p| p.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigation_race_classification() {
        assert!(is_navigation_race(
            "net::ERR_ABORTED at http://localhost:8009/admin"
        ));
        assert!(is_navigation_race(
            "Navigation to \"/admin\" is interrupted by another navigation to \"/admin/login\""
        ));
        assert!(!is_navigation_race("net::ERR_CONNECTION_REFUSED"));
        assert!(!is_navigation_race("Timeout 30000ms exceeded"));
    }

    #[test]
    fn test_native_select_script_takes_resolved_element() {
        // Playwright passes the matched element first, so no DOM lookup by selector
        assert!(SELECT_NATIVE_JS.trim_start().starts_with("(select, query)"));
        assert!(!SELECT_NATIVE_JS.contains("querySelector"));
    }

    #[test]
    fn test_native_selection_from_script_result() {
        let picked = native_selection(&serde_json::json!({ "value": "2", "label": "Aminah Corp" }));
        assert_eq!(
            picked,
            Some(NativeSelection {
                value: "2".to_string(),
                label: "Aminah Corp".to_string(),
            })
        );
        assert_eq!(native_selection(&serde_json::Value::Null), None);
    }
}
