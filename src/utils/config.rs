use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::driver::web::{BrowserType, WebDriverConfig};
use crate::error::{HarnessError, Result};
use crate::session::LoginSurface;

/// Bounded waits, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Timeouts {
    /// Element attachment / visibility
    pub dom_ms: u64,
    /// Full page navigation and post-login redirects
    pub navigation_ms: u64,
    /// Dropdown options rendering after a search
    pub option_ms: u64,
    /// URL change or success banner after a form submit
    pub submit_ms: u64,
    /// Waiting on another worker's session lock
    pub lock_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            dom_ms: 8_000,
            navigation_ms: 30_000,
            option_ms: 5_000,
            submit_ms: 15_000,
            lock_ms: 90_000,
        }
    }
}

impl Timeouts {
    pub fn dom(&self) -> Duration {
        Duration::from_millis(self.dom_ms)
    }

    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }

    pub fn option(&self) -> Duration {
        Duration::from_millis(self.option_ms)
    }

    pub fn submit(&self) -> Duration {
        Duration::from_millis(self.submit_ms)
    }

    pub fn lock(&self) -> Duration {
        Duration::from_millis(self.lock_ms)
    }
}

/// Login retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoginPolicy {
    pub attempts: u32,
    pub backoff_ms: u64,
    /// A lock file older than this is considered abandoned
    pub lock_stale_after_ms: u64,
}

impl Default for LoginPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 2_000,
            lock_stale_after_ms: 120_000,
        }
    }
}

/// Harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HarnessConfig {
    pub base_url: String,
    pub browser: String,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,

    /// Upper bound on concurrently running browser contexts
    pub max_parallel_contexts: usize,

    pub output_dir: PathBuf,
    pub session_dir: PathBuf,

    /// Bytes of page HTML kept in a failure artifact
    pub dom_excerpt_bytes: usize,

    pub timeouts: Timeouts,
    pub login: LoginPolicy,
    pub login_surface: LoginSurface,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let session_dir = dirs::cache_dir()
            .map(|d| d.join("flow-harness"))
            .unwrap_or_else(|| PathBuf::from(".flow-harness"));

        Self {
            base_url: "http://localhost:8009".to_string(),
            browser: "chromium".to_string(),
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            max_parallel_contexts: 1,
            output_dir: PathBuf::from("./output"),
            session_dir,
            dom_excerpt_bytes: 16 * 1024,
            timeouts: Timeouts::default(),
            login: LoginPolicy::default(),
            login_surface: LoginSurface::default(),
        }
    }
}

impl HarnessConfig {
    /// Load from a YAML file (if given), then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                serde_yaml::from_str::<HarnessConfig>(&content)?
            }
            None => HarnessConfig::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `HARNESS_*` overrides from a variable lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("HARNESS_BASE_URL") {
            self.base_url = url;
        }
        if let Some(headless) = lookup("HARNESS_HEADLESS") {
            self.headless = headless == "true" || headless == "1";
        }
        if let Some(workers) = lookup("HARNESS_WORKERS") {
            self.max_parallel_contexts = workers.parse().map_err(|_| {
                HarnessError::Config(format!("HARNESS_WORKERS is not a number: {}", workers))
            })?;
        }
        if let Some(dir) = lookup("HARNESS_SESSION_DIR") {
            self.session_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(HarnessError::Config(format!(
                "baseUrl must be an http(s) URL: {}",
                self.base_url
            )));
        }
        if self.max_parallel_contexts == 0 {
            return Err(HarnessError::Config(
                "maxParallelContexts must be at least 1".to_string(),
            ));
        }
        if self.login.attempts == 0 {
            return Err(HarnessError::Config(
                "login.attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Join a path onto the base URL; absolute URLs pass through
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!(
                "{}/{}",
                self.base_url.trim_end_matches('/'),
                path.trim_start_matches('/')
            )
        }
    }

    pub fn login_backoff(&self) -> Duration {
        Duration::from_millis(self.login.backoff_ms)
    }

    pub fn web_driver_config(&self) -> WebDriverConfig {
        WebDriverConfig {
            browser_type: match self.browser.to_lowercase().as_str() {
                "firefox" => BrowserType::Firefox,
                "webkit" => BrowserType::Webkit,
                _ => BrowserType::Chromium,
            },
            headless: self.headless,
            viewport_width: self.viewport_width,
            viewport_height: self.viewport_height,
            navigation_timeout_ms: self.timeouts.navigation_ms,
            action_timeout_ms: self.timeouts.dom_ms,
        }
    }
}
