use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Browser cookie as persisted in a session artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Unix seconds; `None` or negative for session cookies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
}

/// One element matched by a selector
#[derive(Debug, Clone, PartialEq)]
pub struct ElementInfo {
    /// Trimmed inner text
    pub text: String,
    pub visible: bool,
}

/// Option chosen on a plain `<select>`
#[derive(Debug, Clone, PartialEq)]
pub struct NativeSelection {
    pub value: String,
    pub label: String,
}

/// Page-level browser interface
///
/// Selectors are Playwright selector strings. Every method either completes
/// or fails within the driver's configured action timeout; callers build
/// longer condition waits on top with [`crate::wait`].
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Navigate to an absolute URL
    ///
    /// Navigation races caused by client-side redirects are not errors.
    async fn goto(&self, url: &str) -> Result<()>;

    /// Current page URL
    async fn current_url(&self) -> Result<String>;

    /// Replace the value of an input
    async fn fill(&self, selector: &str, value: &str) -> Result<()>;

    /// Click the first element matching the selector
    async fn click(&self, selector: &str) -> Result<()>;

    /// Click the element at `index` among all matches
    async fn click_nth(&self, selector: &str, index: usize) -> Result<()>;

    /// Press and release a key on the focused element
    async fn press_key(&self, key: &str) -> Result<()>;

    /// Whether the first match exists and is visible
    async fn is_visible(&self, selector: &str) -> Result<bool>;

    /// All matches in document order
    async fn elements(&self, selector: &str) -> Result<Vec<ElementInfo>>;

    /// Attribute of the first match, `None` if no match or attribute absent
    async fn attribute(&self, selector: &str, name: &str) -> Result<Option<String>>;

    /// Current value of an input or select, empty if not found
    async fn input_value(&self, selector: &str) -> Result<String>;

    /// Assign a plain `<select>` directly: pick the first option whose label
    /// contains `query` (case-insensitive), set it, and dispatch `input` and
    /// `change` events. `None` if the select or a matching option is missing.
    async fn select_native(&self, selector: &str, query: &str) -> Result<Option<NativeSelection>>;

    /// Text of the selected option of a plain `<select>`, `None` if nothing is selected
    async fn selected_label(&self, selector: &str) -> Result<Option<String>>;

    /// Full page HTML
    async fn content(&self) -> Result<String>;

    async fn take_screenshot(&self, path: &Path) -> Result<()>;

    async fn cookies(&self) -> Result<Vec<StoredCookie>>;

    async fn add_cookies(&self, cookies: &[StoredCookie]) -> Result<()>;

    async fn clear_cookies(&self) -> Result<()>;

    /// `localStorage` of the current origin
    async fn local_storage(&self) -> Result<BTreeMap<String, String>>;

    /// Write entries into `localStorage` of the current origin
    async fn set_local_storage(&self, entries: &BTreeMap<String, String>) -> Result<()>;
}

/// Text of the first visible match; a missing element is not an error
pub async fn first_visible_text(page: &dyn BrowserPage, selector: &str) -> Result<Option<String>> {
    Ok(page
        .elements(selector)
        .await?
        .into_iter()
        .find(|e| e.visible)
        .map(|e| e.text))
}
