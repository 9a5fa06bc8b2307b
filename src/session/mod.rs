//! Authenticated browser state, captured once and reused across flows.

pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::driver::traits::{first_visible_text, BrowserPage, StoredCookie};
use crate::error::{HarnessError, Result};
use crate::utils::HarnessConfig;
use crate::wait::wait_until;

pub use store::{session_path_for, SessionLock};

/// Login form of the application under test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoginSurface {
    pub login_path: String,
    /// Any URL containing this path and not the login path counts as logged in
    pub authenticated_path: String,
    pub email_selector: String,
    pub password_selector: String,
    pub submit_selector: String,
    /// Inline validation message shown on rejected credentials
    pub error_selector: String,
}

impl Default for LoginSurface {
    fn default() -> Self {
        Self {
            login_path: "/admin/login".to_string(),
            authenticated_path: "/admin".to_string(),
            email_selector: r#"[id="data.email"]"#.to_string(),
            password_selector: r#"[id="data.password"]"#.to_string(),
            submit_selector: r#"form button[type="submit"]"#.to_string(),
            error_selector: ".fi-fo-field-wrp-error-message".to_string(),
        }
    }
}

impl LoginSurface {
    pub fn is_login_url(&self, url: &str) -> bool {
        url_path(url).contains(self.login_path.as_str())
    }

    pub fn is_authenticated_url(&self, url: &str) -> bool {
        !self.is_login_url(url) && url_path(url).contains(self.authenticated_path.as_str())
    }
}

/// Path, query and fragment of a URL, without scheme and host
fn url_path(url: &str) -> &str {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    match rest.find('/') {
        Some(i) if rest.len() != url.len() => &rest[i..],
        Some(_) => rest,
        None if rest.len() != url.len() => "/",
        None => rest,
    }
}

/// Login identity
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    /// Read `HARNESS_EMAIL` / `HARNESS_PASSWORD`
    pub fn from_env() -> Result<Self> {
        let email = std::env::var("HARNESS_EMAIL")
            .map_err(|_| HarnessError::Config("HARNESS_EMAIL is not set".to_string()))?;
        let password = std::env::var("HARNESS_PASSWORD")
            .map_err(|_| HarnessError::Config("HARNESS_PASSWORD is not set".to_string()))?;
        Ok(Self::new(email, password))
    }

    pub fn reference(&self) -> CredentialsRef {
        let digest = Sha256::digest(self.email.trim().to_lowercase().as_bytes());
        let hex: String = digest.iter().take(6).map(|b| format!("{:02x}", b)).collect();
        CredentialsRef(hex)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ref", &self.reference().0)
            .finish_non_exhaustive()
    }
}

/// Opaque reference to the identity a session was captured for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsRef(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExpiryPolicy {
    /// Reuse until a navigation lands back on the login page
    ReuseUntilFailure,
}

/// Cookies and local storage captured after one authentication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub base_url: String,
    pub captured_at: DateTime<Utc>,
    pub expires_policy: ExpiryPolicy,
    pub credentials_ref: CredentialsRef,
    pub cookies: Vec<StoredCookie>,
    #[serde(default)]
    pub local_storage: BTreeMap<String, String>,
}

impl Session {
    pub fn belongs_to(&self, credentials: &Credentials, base_url: &str) -> bool {
        self.credentials_ref == credentials.reference()
            && self.base_url.trim_end_matches('/') == base_url.trim_end_matches('/')
    }
}

/// Obtains, persists and reuses authenticated browser state
pub struct SessionManager {
    config: Arc<HarnessConfig>,
    submissions: AtomicU32,
}

enum AttemptOutcome {
    LoggedIn,
    /// Credentials rejected by the form; retrying cannot help
    Rejected(String),
    Failed(String),
}

impl SessionManager {
    pub fn new(config: Arc<HarnessConfig>) -> Self {
        Self {
            config,
            submissions: AtomicU32::new(0),
        }
    }

    /// Login form submissions made so far
    pub fn login_submissions(&self) -> u32 {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Artifact location for the configured base URL
    pub fn default_path(&self) -> PathBuf {
        session_path_for(&self.config.session_dir, &self.config.base_url)
    }

    fn surface(&self) -> &LoginSurface {
        &self.config.login_surface
    }

    /// Log in through the form and capture the resulting state
    ///
    /// Retries the full submission up to the configured number of attempts
    /// with a fixed back-off; a validation error on the form stops retrying.
    pub async fn authenticate(&self, page: &dyn BrowserPage, credentials: &Credentials) -> Result<Session> {
        let attempts = self.config.login.attempts.max(1);
        let mut last_reason = String::from("no attempt made");

        for attempt in 1..=attempts {
            log::info!(
                "login attempt {}/{} for {}",
                attempt,
                attempts,
                credentials.reference().0
            );
            match self.attempt_login(page, credentials).await? {
                AttemptOutcome::LoggedIn => return self.capture(page, credentials).await,
                AttemptOutcome::Rejected(reason) => {
                    return Err(HarnessError::Authentication {
                        attempts: attempt,
                        reason,
                    });
                }
                AttemptOutcome::Failed(reason) => {
                    log::warn!("login attempt {} failed: {}", attempt, reason);
                    last_reason = reason;
                    if attempt < attempts {
                        tokio::time::sleep(self.config.login_backoff()).await;
                    }
                }
            }
        }

        Err(HarnessError::Authentication {
            attempts,
            reason: last_reason,
        })
    }

    async fn attempt_login(&self, page: &dyn BrowserPage, credentials: &Credentials) -> Result<AttemptOutcome> {
        let surface = self.surface();
        let timeouts = &self.config.timeouts;

        page.goto(&self.config.url(&surface.login_path)).await?;

        // Already logged in: the login page redirected away
        if surface.is_authenticated_url(&page.current_url().await?) {
            return Ok(AttemptOutcome::LoggedIn);
        }

        let form_ready = wait_until("login form", timeouts.dom(), move || async move {
            Ok::<_, HarnessError>(page.is_visible(&surface.email_selector).await?.then_some(()))
        })
        .await;
        if let Err(e) = form_ready {
            return match e {
                HarnessError::Timeout { .. } => Ok(AttemptOutcome::Failed(format!(
                    "login form not visible at {}",
                    page.current_url().await.unwrap_or_default()
                ))),
                other => Err(other),
            };
        }

        page.fill(&surface.email_selector, &credentials.email).await?;
        page.fill(&surface.password_selector, &credentials.password).await?;
        self.submissions.fetch_add(1, Ordering::SeqCst);
        page.click(&surface.submit_selector).await?;

        let outcome = wait_until("post-login redirect", timeouts.navigation(), move || async move {
            let url = page.current_url().await?;
            if surface.is_authenticated_url(&url) {
                return Ok::<_, HarnessError>(Some(AttemptOutcome::LoggedIn));
            }
            if let Some(message) = first_visible_text(page, &surface.error_selector).await? {
                return Ok(Some(AttemptOutcome::Rejected(message)));
            }
            Ok(None)
        })
        .await;

        match outcome {
            Ok(o) => Ok(o),
            Err(HarnessError::Timeout { waited_ms, .. }) => Ok(AttemptOutcome::Failed(format!(
                "still on login page after {}ms",
                waited_ms
            ))),
            Err(e) => Err(e),
        }
    }

    async fn capture(&self, page: &dyn BrowserPage, credentials: &Credentials) -> Result<Session> {
        let cookies = page.cookies().await?;
        if cookies.is_empty() {
            return Err(HarnessError::Authentication {
                attempts: 1,
                reason: "post-login page reached but no session cookies were set".to_string(),
            });
        }
        let local_storage = page.local_storage().await?;
        log::info!("captured session with {} cookie(s)", cookies.len());

        Ok(Session {
            base_url: self.config.base_url.clone(),
            captured_at: Utc::now(),
            expires_policy: ExpiryPolicy::ReuseUntilFailure,
            credentials_ref: credentials.reference(),
            cookies,
            local_storage,
        })
    }

    /// Install a session into a page, replacing its cookies
    pub async fn apply(&self, page: &dyn BrowserPage, session: &Session) -> Result<()> {
        page.clear_cookies().await?;
        page.add_cookies(&session.cookies).await?;
        if !session.local_storage.is_empty() {
            // localStorage is per origin: load the origin first
            page.goto(&self.config.url(&self.surface().login_path)).await?;
            page.set_local_storage(&session.local_storage).await?;
        }
        Ok(())
    }

    /// Cheap navigation probe: does the page stay on an authenticated URL?
    pub async fn probe(&self, page: &dyn BrowserPage) -> Result<bool> {
        page.goto(&self.config.url(&self.surface().authenticated_path))
            .await?;
        let url = page.current_url().await?;
        Ok(self.surface().is_authenticated_url(&url))
    }

    /// Reuse the artifact at `path` when it still grants access, otherwise
    /// log in and persist a new one.
    pub async fn load_or_create(
        &self,
        page: &dyn BrowserPage,
        credentials: &Credentials,
        path: &Path,
    ) -> Result<Session> {
        if let Some(session) = self.try_reuse(page, credentials, path).await? {
            return Ok(session);
        }

        let _lock = SessionLock::acquire(
            path,
            self.config.timeouts.lock(),
            Duration::from_millis(self.config.login.lock_stale_after_ms),
        )
        .await?;

        // Another worker may have logged in while we waited for the lock
        if let Some(session) = self.try_reuse(page, credentials, path).await? {
            return Ok(session);
        }

        let session = self.authenticate(page, credentials).await?;
        store::write_session(path, &session)?;
        log::info!("session saved to {}", path.display());
        Ok(session)
    }

    async fn try_reuse(
        &self,
        page: &dyn BrowserPage,
        credentials: &Credentials,
        path: &Path,
    ) -> Result<Option<Session>> {
        let Some(session) = store::read_session(path)? else {
            return Ok(None);
        };
        if !session.belongs_to(credentials, &self.config.base_url) {
            log::info!("session artifact belongs to another identity or host, ignoring");
            return Ok(None);
        }

        self.apply(page, &session).await?;
        if self.probe(page).await? {
            log::info!(
                "reusing session captured at {}",
                session.captured_at.format("%Y-%m-%d %H:%M:%S")
            );
            Ok(Some(session))
        } else {
            log::info!("session artifact expired");
            Ok(None)
        }
    }

    /// Remove the artifact so the next consumer re-authenticates
    pub async fn invalidate(&self, path: &Path) -> Result<()> {
        let _lock = SessionLock::acquire(
            path,
            self.config.timeouts.lock(),
            Duration::from_millis(self.config.login.lock_stale_after_ms),
        )
        .await?;
        store::remove_session(path)
    }

    /// Invalidate, then make a single authentication attempt and persist it
    pub async fn reauthenticate(
        &self,
        page: &dyn BrowserPage,
        credentials: &Credentials,
        path: &Path,
    ) -> Result<Session> {
        let _lock = SessionLock::acquire(
            path,
            self.config.timeouts.lock(),
            Duration::from_millis(self.config.login.lock_stale_after_ms),
        )
        .await?;

        // A peer may already have replaced the expired artifact
        if let Some(fresh) = store::read_session(path)? {
            if fresh.belongs_to(credentials, &self.config.base_url) {
                self.apply(page, &fresh).await?;
                if self.probe(page).await? {
                    return Ok(fresh);
                }
            }
        }
        store::remove_session(path)?;

        page.clear_cookies().await?;
        let session = match self.attempt_login(page, credentials).await? {
            AttemptOutcome::LoggedIn => self.capture(page, credentials).await?,
            AttemptOutcome::Rejected(reason) | AttemptOutcome::Failed(reason) => {
                return Err(HarnessError::Authentication {
                    attempts: 1,
                    reason,
                });
            }
        };
        store::write_session(path, &session)?;
        Ok(session)
    }
}
