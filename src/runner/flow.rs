//! Ordered execution of one business flow.

use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::context::FlowContext;
use super::events::{EventEmitter, TestEvent};
use super::extract::{extract_from_listing, extract_from_url};
use super::state::FlowState;
use crate::driver::traits::BrowserPage;
use crate::error::{FailureArtifacts, HarnessError, Result};
use crate::parser::types::{
    Action, ClickParams, ExpectParams, ExpectTextParams, ExtractIdParams, ExtractSource, FillParams,
    SubmitParams,
};
use crate::parser::{Flow, Step};
use crate::session::{Credentials, Session, SessionManager};
use crate::utils::{safe_file_stem, HarnessConfig};
use crate::wait::{eventually, wait_until};
use crate::widget::{ActionScope, LocatorStrategy, WidgetAdapter, WidgetHandle, WidgetProfile};

/// Primary form button candidates, in order of preference
pub(crate) const SUBMIT_CANDIDATES: &[&str] = &[
    ".fi-form-actions .fi-btn[class*=\"fi-btn-color-primary\"]",
    "form button[type=\"submit\"]:has-text(\"Buat\")",
    "form button[type=\"submit\"]:has-text(\"Simpan\")",
    "form button[type=\"submit\"]:has-text(\"Create\")",
    "form button[type=\"submit\"]:has-text(\"Save\")",
];
pub(crate) const SUCCESS_NOTIFICATION: &str = ".fi-no-notification.fi-color-success";
pub(crate) const VALIDATION_ERRORS: &str = ".fi-fo-field-wrp-error-message";
const FIELD_INPUT: &str = "input:not([type=\"hidden\"]), textarea";

enum SubmitOutcome {
    Navigated(String),
    Confirmed,
    Rejected(Vec<String>),
}

/// Runs flows on one page with one identity
pub struct FlowRunner<'a> {
    page: &'a dyn BrowserPage,
    /// Installed before every flow; replaced after a re-authentication
    session: RwLock<Session>,
    config: Arc<HarnessConfig>,
    sessions: Arc<SessionManager>,
    credentials: Credentials,
    session_path: PathBuf,
    emitter: EventEmitter,
}

impl<'a> FlowRunner<'a> {
    pub fn new(
        page: &'a dyn BrowserPage,
        session: Session,
        config: Arc<HarnessConfig>,
        sessions: Arc<SessionManager>,
        credentials: Credentials,
        emitter: EventEmitter,
    ) -> Self {
        let session_path = sessions.default_path();
        Self {
            page,
            session: RwLock::new(session),
            config,
            sessions,
            credentials,
            session_path,
            emitter,
        }
    }

    pub fn with_session_path(mut self, path: PathBuf) -> Self {
        self.session_path = path;
        self
    }

    /// Session the next flow starts with
    pub async fn session(&self) -> Session {
        self.session.read().await.clone()
    }

    /// Execute every step in order and return the final state
    ///
    /// A failing step raises [`HarnessError::FlowStepFailed`] carrying the
    /// partial state; [`HarnessError::Authentication`] and
    /// [`HarnessError::FlowBroken`] surface unwrapped.
    pub async fn run_flow(&self, flow: &Flow) -> Result<FlowState> {
        let mut state = FlowState::new(&flow.name).with_path(&flow.path);
        self.execute(flow, &mut state).await?;
        Ok(state)
    }

    /// Same as [`FlowRunner::run_flow`], but the state stays with the caller
    /// whatever the outcome
    pub async fn execute(&self, flow: &Flow, state: &mut FlowState) -> Result<()> {
        state.start();
        self.emitter.emit(TestEvent::FlowStarted {
            flow_name: flow.name.clone(),
            flow_path: flow.path.clone(),
            step_count: flow.steps.len(),
        });

        let result = self.execute_steps(flow, state).await;

        if let Err(e) = &result {
            if state.error.is_none() {
                state.error = Some(e.to_string());
            }
        }
        state.finish();
        self.emitter.emit(TestEvent::FlowFinished {
            flow_name: flow.name.clone(),
            status: state.status.clone(),
            duration_ms: state.total_duration_ms,
            error: state.error.clone(),
        });
        result
    }

    async fn execute_steps(&self, flow: &Flow, state: &mut FlowState) -> Result<()> {
        let mut ctx = FlowContext::new(self.config.output_dir.clone())?;
        for (name, value) in &flow.vars {
            let value = ctx.substitute_vars(value, state, "vars")?;
            ctx.set_var(name, value);
        }
        log::info!("flow '{}' marker {}", flow.name, ctx.marker);

        let session = self.session().await;
        self.sessions.apply(self.page, &session).await?;

        for step in &flow.steps {
            let index = state.begin_step(&step.name).index;
            self.emitter.emit(TestEvent::StepStarted {
                flow_name: flow.name.clone(),
                index,
                step: step.name.clone(),
            });

            match self.run_step(step, &mut ctx, state).await {
                Ok(()) => {
                    let duration_ms = state.current_step().map_or(0, |s| {
                        s.pass();
                        s.duration_ms.unwrap_or(0)
                    });
                    self.emitter.emit(TestEvent::StepPassed {
                        flow_name: flow.name.clone(),
                        index,
                        duration_ms,
                    });
                }
                Err(e) => {
                    let duration_ms = state.current_step().map_or(0, |s| {
                        s.fail(e.to_string());
                        s.duration_ms.unwrap_or(0)
                    });
                    self.emitter.emit(TestEvent::StepFailed {
                        flow_name: flow.name.clone(),
                        index,
                        error: e.to_string(),
                        duration_ms,
                    });
                    return Err(self.step_failure(flow, &step.name, index, e, state).await);
                }
            }
        }
        Ok(())
    }

    async fn run_step(
        &self,
        step: &Step,
        ctx: &mut FlowContext,
        state: &mut FlowState,
    ) -> Result<()> {
        for kind in &step.requires {
            if state.entity_id(kind).is_none() {
                return Err(HarnessError::FlowBroken {
                    step_name: step.name.clone(),
                    missing: kind.clone(),
                });
            }
        }

        // Re-authentication leaves the page elsewhere, so the step restarts
        // from its first action
        let mut reauthenticated = false;
        loop {
            match self.run_actions(step, ctx, state).await {
                Err(e) if e.is_session_expired() && !reauthenticated => {
                    log::warn!("{}; re-authenticating and restarting '{}'", e, step.name);
                    self.emitter.emit(TestEvent::Log {
                        flow_name: state.flow_name.clone(),
                        message: "session expired, logging in again".to_string(),
                    });
                    let fresh = self
                        .sessions
                        .reauthenticate(self.page, &self.credentials, &self.session_path)
                        .await?;
                    *self.session.write().await = fresh;
                    reauthenticated = true;
                }
                other => return other,
            }
        }
    }

    async fn run_actions(&self, step: &Step, ctx: &mut FlowContext, state: &mut FlowState) -> Result<()> {
        for action in &step.actions {
            log::debug!("[{}] {}", step.name, action.describe());
            self.run_action(action, &step.name, ctx, state).await?;
        }
        Ok(())
    }

    /// Wrap a step error with the partial state and failure artifacts
    async fn step_failure(
        &self,
        flow: &Flow,
        step_name: &str,
        index: usize,
        cause: HarnessError,
        state: &mut FlowState,
    ) -> HarnessError {
        state.error = Some(cause.to_string());
        if matches!(
            cause,
            HarnessError::Authentication { .. } | HarnessError::FlowBroken { .. }
        ) {
            return cause;
        }

        let artifacts = self.capture_failure(&flow.name, index).await;
        state.artifacts = Some(artifacts.clone());
        state.finish();

        HarnessError::FlowStepFailed {
            step_name: step_name.to_string(),
            cause: Box::new(cause),
            state: Box::new(state.clone()),
            artifacts,
        }
    }

    /// Screenshot and DOM excerpt; capture problems are logged, never raised
    async fn capture_failure(&self, flow_name: &str, index: usize) -> FailureArtifacts {
        let dir = self.config.output_dir.join("failures");
        if let Err(e) = std::fs::create_dir_all(&dir) {
            log::warn!("cannot create {}: {}", dir.display(), e);
        }
        let uuid = Uuid::new_v4().to_string();
        let stem = format!(
            "fail_{}_{}_step{}_{}",
            safe_file_stem(flow_name),
            chrono::Local::now().format("%H%M%S"),
            index + 1,
            &uuid[..8]
        );

        let mut artifacts = FailureArtifacts {
            url: self.page.current_url().await.ok(),
            ..FailureArtifacts::default()
        };

        let png = dir.join(format!("{}.png", stem));
        match self.page.take_screenshot(&png).await {
            Ok(()) => artifacts.screenshot = Some(png),
            Err(e) => log::warn!("failed to take screenshot: {}", e),
        }

        match self.page.content().await {
            Ok(html) => {
                let html_path = dir.join(format!("{}.html", stem));
                let excerpt = truncate_at_char(&html, self.config.dom_excerpt_bytes);
                match std::fs::write(&html_path, excerpt) {
                    Ok(()) => artifacts.dom_excerpt = Some(html_path),
                    Err(e) => log::warn!("failed to write DOM excerpt: {}", e),
                }
            }
            Err(e) => log::warn!("failed to read page content: {}", e),
        }

        log::info!("failure artifacts saved under {}", dir.display());
        artifacts
    }

    async fn run_action(
        &self,
        action: &Action,
        step_name: &str,
        ctx: &mut FlowContext,
        state: &mut FlowState,
    ) -> Result<()> {
        let subst = |text: &str, ctx: &FlowContext, state: &FlowState| ctx.substitute_vars(text, state, step_name);
        let widgets = WidgetAdapter::new(self.page, self.config.timeouts.clone());

        match action {
            Action::Goto(target) => {
                let target = subst(target, ctx, state)?;
                self.navigate(&target).await
            }
            Action::Fill(p) => {
                let value = subst(&p.value, ctx, state)?;
                self.fill(p, &value).await
            }
            Action::Select(p) => {
                let profile = match &p.widget {
                    Some(name) => WidgetProfile::by_name(name)
                        .ok_or_else(|| HarnessError::Flow(format!("unknown widget '{}'", name)))?,
                    None => WidgetProfile::default(),
                };
                let handle = WidgetHandle::new(&subst(&p.field, ctx, state)?, profile);
                widgets
                    .select_option(&handle, &subst(&p.value, ctx, state)?)
                    .await
                    .map(|_| ())
            }
            Action::Click(p) => self.click(p).await,
            Action::Press(key) => Ok(self.page.press_key(key).await?),
            Action::Submit(p) => self.submit(p).await,
            Action::HeaderAction(label) => {
                widgets
                    .click_action(&subst(label, ctx, state)?, &ActionScope::Header)
                    .await
            }
            Action::RowAction(p) => {
                if let Some(url) = &p.url {
                    self.navigate(&subst(url, ctx, state)?).await?;
                }
                let scope = ActionScope::Row {
                    match_text: subst(&p.match_text, ctx, state)?,
                };
                widgets.click_action(&subst(&p.label, ctx, state)?, &scope).await
            }
            Action::ConfirmModal => {
                if !widgets.confirm_modal().await? {
                    if let Some(step) = state.current_step() {
                        step.notes.push("no confirmation dialog appeared".to_string());
                    }
                }
                Ok(())
            }
            Action::ExpectUrl(p) => {
                let pattern = subst(&p.value, ctx, state)?;
                let holds = self.expect_url(&pattern).await?;
                self.expectation(state, p, holds, format!("URL does not match '{}'", pattern))
            }
            Action::ExpectVisible(p) => {
                let selector = subst(&p.value, ctx, state)?;
                let page = self.page;
                let sel = selector.as_str();
                let holds = eventually(self.config.timeouts.dom(), move || async move {
                    Ok::<_, HarnessError>(page.is_visible(sel).await?)
                })
                .await?;
                self.expectation(state, p, holds, format!("'{}' is not visible", selector))
            }
            Action::ExpectText(p) => self.expect_text(p, ctx, state, step_name).await,
            Action::ExtractId(p) => self.extract_id(p, ctx, state, step_name).await,
            Action::SetVar(p) => {
                let value = subst(&p.value, ctx, state)?;
                ctx.set_var(&p.name, value);
                Ok(())
            }
        }
    }

    /// Go to a path or URL; landing on the login page means the session expired
    async fn navigate(&self, target: &str) -> Result<()> {
        let url = self.config.url(target);
        self.page.goto(&url).await?;
        let landed = self.page.current_url().await?;
        let surface = &self.config.login_surface;
        if surface.is_login_url(&landed) && !surface.is_login_url(&url) {
            return Err(HarnessError::SessionExpired { url: landed });
        }
        Ok(())
    }

    async fn wait_visible(&self, selector: &str, what: &str) -> Result<()> {
        let page = self.page;
        let visible = eventually(self.config.timeouts.dom(), move || async move {
            Ok::<_, HarnessError>(page.is_visible(selector).await?)
        })
        .await?;
        if visible {
            Ok(())
        } else {
            Err(HarnessError::WidgetNotInteractable {
                field: what.to_string(),
                waited_ms: self.config.timeouts.dom_ms,
            })
        }
    }

    async fn fill(&self, p: &FillParams, value: &str) -> Result<()> {
        let selector = match (&p.selector, &p.field) {
            (Some(selector), _) => selector.clone(),
            (None, Some(field)) => LocatorStrategy::Field {
                wrapper: WidgetProfile::default().field_wrapper,
                label: field.clone(),
                selector: FIELD_INPUT.to_string(),
            }
            .selector(),
            (None, None) => return Err(HarnessError::Flow("fill needs a target".to_string())),
        };
        self.wait_visible(&selector, p.target()).await?;
        Ok(self.page.fill(&selector, value).await?)
    }

    async fn click(&self, p: &ClickParams) -> Result<()> {
        let selector = match (&p.selector, &p.text) {
            (Some(selector), _) => selector.clone(),
            (None, Some(text)) => {
                let text = text.replace('"', "\\\"");
                format!("button:has-text(\"{}\"), a:has-text(\"{}\")", text, text)
            }
            (None, None) => return Err(HarnessError::Flow("click needs a target".to_string())),
        };
        self.wait_visible(&selector, &selector).await?;
        Ok(self.page.click(&selector).await?)
    }

    /// Click the form's primary button and wait for the outcome
    async fn submit(&self, p: &SubmitParams) -> Result<()> {
        let page = self.page;
        let timeouts = &self.config.timeouts;
        let custom;
        let candidates: Vec<&str> = match &p.button {
            Some(text) => {
                custom = format!("button:has-text(\"{}\")", text.replace('"', "\\\""));
                vec![custom.as_str()]
            }
            None => SUBMIT_CANDIDATES.to_vec(),
        };

        let button = wait_until("submit button", timeouts.dom(), || {
            let candidates = candidates.clone();
            async move {
                for c in candidates {
                    if page.is_visible(c).await? {
                        return Ok::<_, HarnessError>(Some(c));
                    }
                }
                Ok(None)
            }
        })
        .await
        .map_err(|e| match e {
            HarnessError::Timeout { waited_ms, .. } => HarnessError::WidgetNotInteractable {
                field: "submit button".to_string(),
                waited_ms,
            },
            other => other,
        })?;

        let before = page.current_url().await?;
        page.click(button).await?;

        let before_ref = before.as_str();
        let outcome = wait_until("submit outcome", timeouts.submit(), move || async move {
            let url = page.current_url().await?;
            if url != before_ref {
                return Ok::<_, HarnessError>(Some(SubmitOutcome::Navigated(url)));
            }
            if page.is_visible(SUCCESS_NOTIFICATION).await? {
                return Ok(Some(SubmitOutcome::Confirmed));
            }
            let errors: Vec<String> = page
                .elements(VALIDATION_ERRORS)
                .await?
                .into_iter()
                .filter(|e| e.visible && !e.text.is_empty())
                .map(|e| e.text)
                .collect();
            if !errors.is_empty() {
                return Ok(Some(SubmitOutcome::Rejected(errors)));
            }
            Ok(None)
        })
        .await?;

        match outcome {
            SubmitOutcome::Navigated(url) if self.config.login_surface.is_login_url(&url) => {
                Err(HarnessError::SessionExpired { url })
            }
            SubmitOutcome::Navigated(url) => {
                log::info!("submitted, now at {}", url);
                Ok(())
            }
            SubmitOutcome::Confirmed => {
                log::info!("submitted, success notification shown");
                Ok(())
            }
            SubmitOutcome::Rejected(errors) => Err(HarnessError::SubmitRejected { url: before, errors }),
        }
    }

    async fn expect_url(&self, pattern: &str) -> Result<bool> {
        let re = Regex::new(pattern)
            .map_err(|e| HarnessError::Flow(format!("invalid URL pattern '{}': {}", pattern, e)))?;
        let page = self.page;
        let re = &re;
        eventually(self.config.timeouts.navigation(), move || async move {
            Ok::<_, HarnessError>(re.is_match(&page.current_url().await?))
        })
        .await
    }

    async fn expect_text(
        &self,
        p: &ExpectTextParams,
        ctx: &FlowContext,
        state: &mut FlowState,
        step_name: &str,
    ) -> Result<()> {
        let text = ctx.substitute_vars(&p.text, state, step_name)?;
        let page = self.page;
        let needle = text.as_str();
        let selector = p.selector.as_deref();

        let holds = eventually(self.config.timeouts.dom(), move || async move {
            let found = match selector {
                Some(sel) => page
                    .elements(sel)
                    .await?
                    .iter()
                    .any(|e| e.visible && e.text.contains(needle)),
                None => page.content().await?.contains(needle),
            };
            Ok::<_, HarnessError>(found)
        })
        .await?;

        let params = ExpectParams {
            value: text.clone(),
            optional: p.optional.clone(),
        };
        self.expectation(state, &params, holds, format!("text '{}' not found", text))
    }

    /// Required expectations fail the step; optional ones leave a note
    fn expectation(&self, state: &mut FlowState, p: &ExpectParams, holds: bool, message: String) -> Result<()> {
        if holds {
            return Ok(());
        }
        match &p.optional {
            Some(reason) => {
                let note = format!("skipped: {} ({})", message, reason);
                log::info!("{}", note);
                self.emitter.emit(TestEvent::StepNote {
                    flow_name: state.flow_name.clone(),
                    index: state.steps.len().saturating_sub(1),
                    note: note.clone(),
                });
                if let Some(step) = state.current_step() {
                    step.notes.push(note);
                }
                Ok(())
            }
            None => Err(HarnessError::Assertion { message }),
        }
    }

    async fn extract_id(
        &self,
        p: &ExtractIdParams,
        ctx: &FlowContext,
        state: &mut FlowState,
        step_name: &str,
    ) -> Result<()> {
        let id = match &p.from {
            ExtractSource::Url { resource } => {
                extract_from_url(self.page, &p.kind, resource, self.config.timeouts.submit()).await?
            }
            ExtractSource::Listing {
                url,
                match_text,
                resource,
            } => {
                self.navigate(&ctx.substitute_vars(url, state, step_name)?).await?;
                let match_text = ctx.substitute_vars(match_text, state, step_name)?;
                extract_from_listing(
                    self.page,
                    &p.kind,
                    &match_text,
                    resource,
                    self.config.timeouts.navigation(),
                )
                .await?
            }
        };

        log::info!("{} id = {}", p.kind, id);
        self.emitter.emit(TestEvent::Log {
            flow_name: state.flow_name.clone(),
            message: format!("{} #{}", p.kind, id),
        });
        state.record_id(&p.kind, &id);
        Ok(())
    }
}

fn truncate_at_char(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
