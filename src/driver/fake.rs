//! Scripted in-memory page used by unit tests.
//!
//! Selectors are opaque keys: an element exists when the exact selector
//! string was registered. Clicks, fills and navigations can trigger hooks
//! that mutate the page state, which is enough to model redirects,
//! dropdowns and login forms.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::traits::{BrowserPage, ElementInfo, NativeSelection, StoredCookie};

type Hook = Arc<dyn Fn(&mut FakeState) + Send + Sync>;
type FillHook = Arc<dyn Fn(&mut FakeState, &str) + Send + Sync>;
type Router = Arc<dyn Fn(&mut FakeState, &str) -> String + Send + Sync>;

#[derive(Default)]
pub struct FakeState {
    pub url: String,
    pub elements: HashMap<String, Vec<ElementInfo>>,
    pub attributes: HashMap<(String, String), String>,
    pub values: HashMap<String, String>,
    /// selector -> (value, label) options of a plain select
    pub native_options: HashMap<String, Vec<(String, String)>>,
    pub cookies: Vec<StoredCookie>,
    pub local_storage: BTreeMap<String, String>,
    pub html: String,
    /// Every interaction, e.g. `click:#save`, `goto:http://...`
    pub calls: Vec<String>,
}

impl FakeState {
    pub fn show(&mut self, selector: &str, text: &str) {
        self.elements.insert(
            selector.to_string(),
            vec![ElementInfo {
                text: text.to_string(),
                visible: true,
            }],
        );
    }

    pub fn show_many(&mut self, selector: &str, texts: &[&str]) {
        self.elements.insert(
            selector.to_string(),
            texts
                .iter()
                .map(|t| ElementInfo {
                    text: t.to_string(),
                    visible: true,
                })
                .collect(),
        );
    }

    pub fn hide(&mut self, selector: &str) {
        self.elements.remove(selector);
    }

    pub fn set_value(&mut self, selector: &str, value: &str) {
        self.values.insert(selector.to_string(), value.to_string());
    }
}

#[derive(Default)]
struct Hooks {
    on_click: HashMap<String, Hook>,
    on_fill: HashMap<String, FillHook>,
    router: Option<Router>,
}

pub struct FakePage {
    state: Mutex<FakeState>,
    hooks: Mutex<Hooks>,
}

impl FakePage {
    pub fn new(url: &str) -> Self {
        Self {
            state: Mutex::new(FakeState {
                url: url.to_string(),
                ..FakeState::default()
            }),
            hooks: Mutex::new(Hooks::default()),
        }
    }

    /// Mutate the page state directly
    pub fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn show(&self, selector: &str, text: &str) -> &Self {
        self.with(|s| s.show(selector, text));
        self
    }

    pub fn on_click(&self, selector: &str, hook: impl Fn(&mut FakeState) + Send + Sync + 'static) -> &Self {
        self.hooks
            .lock()
            .unwrap()
            .on_click
            .insert(selector.to_string(), Arc::new(hook));
        self
    }

    pub fn on_fill(
        &self,
        selector: &str,
        hook: impl Fn(&mut FakeState, &str) + Send + Sync + 'static,
    ) -> &Self {
        self.hooks
            .lock()
            .unwrap()
            .on_fill
            .insert(selector.to_string(), Arc::new(hook));
        self
    }

    /// Decide where a `goto` lands; defaults to the requested URL
    pub fn router(&self, router: impl Fn(&mut FakeState, &str) -> String + Send + Sync + 'static) -> &Self {
        self.hooks.lock().unwrap().router = Some(Arc::new(router));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.with(|s| s.calls.iter().filter(|c| c.starts_with(prefix)).count())
    }

    pub fn url(&self) -> String {
        self.with(|s| s.url.clone())
    }

    fn run_click(&self, key: &str) {
        let hook = self.hooks.lock().unwrap().on_click.get(key).cloned();
        if let Some(hook) = hook {
            self.with(|s| hook(s));
        }
    }
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn goto(&self, url: &str) -> Result<()> {
        let router = self.hooks.lock().unwrap().router.clone();
        self.with(|s| {
            s.calls.push(format!("goto:{}", url));
            let landed = match &router {
                Some(r) => r(s, url),
                None => url.to_string(),
            };
            s.url = landed;
        });
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.url())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        let exists = self.with(|s| {
            s.calls.push(format!("fill:{}={}", selector, value));
            s.elements.contains_key(selector)
        });
        if !exists {
            anyhow::bail!("Failed to fill: {}", selector);
        }
        self.with(|s| s.set_value(selector, value));
        let hook = self.hooks.lock().unwrap().on_fill.get(selector).cloned();
        if let Some(hook) = hook {
            self.with(|s| hook(s, value));
        }
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let visible = self.with(|s| {
            s.calls.push(format!("click:{}", selector));
            s.elements
                .get(selector)
                .map_or(false, |els| els.iter().any(|e| e.visible))
        });
        if !visible {
            anyhow::bail!("Failed to click: {}", selector);
        }
        self.run_click(selector);
        Ok(())
    }

    async fn click_nth(&self, selector: &str, index: usize) -> Result<()> {
        let exists = self.with(|s| {
            s.calls.push(format!("click:{}#{}", selector, index));
            s.elements
                .get(selector)
                .map_or(false, |els| index < els.len())
        });
        if !exists {
            anyhow::bail!("Element not found: {} at index {}", selector, index);
        }
        self.run_click(&format!("{}#{}", selector, index));
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.with(|s| s.calls.push(format!("press:{}", key)));
        Ok(())
    }

    async fn is_visible(&self, selector: &str) -> Result<bool> {
        Ok(self.with(|s| {
            s.elements
                .get(selector)
                .and_then(|els| els.first())
                .map_or(false, |e| e.visible)
        }))
    }

    async fn elements(&self, selector: &str) -> Result<Vec<ElementInfo>> {
        Ok(self.with(|s| s.elements.get(selector).cloned().unwrap_or_default()))
    }

    async fn attribute(&self, selector: &str, name: &str) -> Result<Option<String>> {
        Ok(self.with(|s| {
            s.attributes
                .get(&(selector.to_string(), name.to_string()))
                .cloned()
        }))
    }

    async fn input_value(&self, selector: &str) -> Result<String> {
        Ok(self.with(|s| s.values.get(selector).cloned().unwrap_or_default()))
    }

    async fn select_native(&self, selector: &str, query: &str) -> Result<Option<NativeSelection>> {
        Ok(self.with(|s| {
            s.calls.push(format!("select_native:{}={}", selector, query));
            let needle = query.to_lowercase();
            let found = s.native_options.get(selector).and_then(|opts| {
                opts.iter()
                    .find(|(_, label)| label.to_lowercase().contains(&needle))
                    .cloned()
            });
            found.map(|(value, label)| {
                s.set_value(selector, &value);
                NativeSelection { value, label }
            })
        }))
    }

    async fn selected_label(&self, selector: &str) -> Result<Option<String>> {
        Ok(self.with(|s| {
            let value = s.values.get(selector)?;
            s.native_options
                .get(selector)?
                .iter()
                .find(|(v, _)| v == value)
                .map(|(_, label)| label.clone())
        }))
    }

    async fn content(&self) -> Result<String> {
        Ok(self.with(|s| s.html.clone()))
    }

    async fn take_screenshot(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, b"\x89PNG fake")?;
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<StoredCookie>> {
        Ok(self.with(|s| s.cookies.clone()))
    }

    async fn add_cookies(&self, cookies: &[StoredCookie]) -> Result<()> {
        self.with(|s| s.cookies.extend_from_slice(cookies));
        Ok(())
    }

    async fn clear_cookies(&self) -> Result<()> {
        self.with(|s| s.cookies.clear());
        Ok(())
    }

    async fn local_storage(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.with(|s| s.local_storage.clone()))
    }

    async fn set_local_storage(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        self.with(|s| s.local_storage.extend(entries.clone()));
        Ok(())
    }
}

/// Cookie helper for tests
pub fn cookie(name: &str, value: &str) -> StoredCookie {
    StoredCookie {
        name: name.to_string(),
        value: value.to_string(),
        domain: Some("localhost".to_string()),
        path: Some("/".to_string()),
        expires: None,
        http_only: Some(true),
        secure: Some(false),
    }
}
