pub mod context;
pub mod events;
pub mod extract;
pub mod flow;
pub mod state;

use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::driver::traits::BrowserPage;
use crate::driver::web::WebDriver;
use crate::error::{HarnessError, Result};
use crate::parser::{discover_flow_files, parse_flow_file, Flow};
use crate::session::{Credentials, SessionManager};
use crate::utils::HarnessConfig;

pub use events::*;
pub use flow::FlowRunner;
pub use state::*;

/// Options of one `run` invocation
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Only flows carrying one of these tags; all flows when empty
    pub tags: Vec<String>,
    /// Also write the JUnit report
    pub report: bool,
}

/// Run every flow found at `path`, each in its own browser context
///
/// At most `max_parallel_contexts` flows run at once. All flows share one
/// [`SessionManager`], so the login form is submitted once per run unless a
/// session expires. `emitter` is dropped on return, so a listener on its
/// channel sees the end of the stream once the run is over. Results are
/// written by the caller with [`write_results`].
pub async fn run_flows(
    path: &Path,
    config: Arc<HarnessConfig>,
    credentials: Credentials,
    options: &RunOptions,
    emitter: EventEmitter,
) -> Result<TestSessionState> {
    let files = discover_flow_files(path);
    if files.is_empty() {
        println!("{} No flow files found.", "ℹ".blue());
    }

    let mut session = TestSessionState::new(&uuid::Uuid::new_v4().to_string());
    session.start();
    emitter.emit(TestEvent::SessionStarted {
        session_id: session.session_id.clone(),
    });

    let mut flows = Vec::new();
    for file in &files {
        match parse_flow_file(file) {
            Ok(flow) if flow.has_any_tag(&options.tags) => flows.push(flow),
            Ok(flow) => log::debug!("skipping '{}': no matching tag", flow.name),
            Err(e) => {
                log::error!("{}: {}", file.display(), e);
                session.add_flow(unparsable_flow(file, &e));
            }
        }
    }

    let sessions = Arc::new(SessionManager::new(config.clone()));
    let workers = config.max_parallel_contexts.max(1);
    let permits = Arc::new(Semaphore::new(workers));
    log::info!("running {} flow(s) with {} context(s)", flows.len(), workers);

    let mut handles = Vec::new();
    for flow in flows {
        let permits = permits.clone();
        let config = config.clone();
        let sessions = sessions.clone();
        let credentials = credentials.clone();
        let emitter = emitter.clone();

        handles.push(tokio::spawn(async move {
            let _permit = permits.acquire_owned().await;
            run_in_new_context(&flow, config, sessions, credentials, emitter).await
        }));
    }

    for handle in handles {
        match handle.await {
            Ok(state) => session.add_flow(state),
            Err(e) => log::error!("flow task panicked: {}", e),
        }
    }

    session.finish();
    emitter.emit(TestEvent::SessionFinished {
        summary: session.summary(),
    });
    Ok(session)
}

/// Launch a browser context for one flow and run it there
async fn run_in_new_context(
    flow: &Flow,
    config: Arc<HarnessConfig>,
    sessions: Arc<SessionManager>,
    credentials: Credentials,
    emitter: EventEmitter,
) -> FlowState {
    match WebDriver::new(config.web_driver_config()).await {
        Ok(driver) => run_in_page(&driver, flow, config, sessions, credentials, emitter).await,
        Err(e) => {
            let mut state = FlowState::new(&flow.name).with_path(&flow.path);
            state.fail(format!("failed to open browser context: {:#}", e));
            state
        }
    }
}

/// Install the shared session into `page` and run `flow`
///
/// Never fails: every error ends up in the returned state.
pub async fn run_in_page(
    page: &dyn BrowserPage,
    flow: &Flow,
    config: Arc<HarnessConfig>,
    sessions: Arc<SessionManager>,
    credentials: Credentials,
    emitter: EventEmitter,
) -> FlowState {
    let mut state = FlowState::new(&flow.name).with_path(&flow.path);

    let session_path = sessions.default_path();
    let session = match sessions.load_or_create(page, &credentials, &session_path).await {
        Ok(session) => session,
        Err(e) => {
            log::error!("flow '{}' cannot start: {}", flow.name, e);
            state.fail(e.to_string());
            emitter.emit(TestEvent::FlowFinished {
                flow_name: flow.name.clone(),
                status: state.status.clone(),
                duration_ms: state.total_duration_ms,
                error: state.error.clone(),
            });
            return state;
        }
    };

    let runner = FlowRunner::new(page, session, config, sessions, credentials, emitter)
        .with_session_path(session_path);
    if let Err(e) = runner.execute(flow, &mut state).await {
        log_failure(&e);
    }
    state
}

fn log_failure(error: &HarnessError) {
    match error {
        HarnessError::FlowStepFailed {
            step_name,
            cause,
            artifacts,
            ..
        } => {
            log::error!("step '{}' failed: {}", step_name, cause);
            if let Some(screenshot) = &artifacts.screenshot {
                log::error!("  screenshot: {}", screenshot.display());
            }
            if let Some(dom) = &artifacts.dom_excerpt {
                log::error!("  DOM excerpt: {}", dom.display());
            }
        }
        other => log::error!("{}", other),
    }
}

fn unparsable_flow(file: &Path, error: &HarnessError) -> FlowState {
    let name = file
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file.display().to_string());
    let mut state = FlowState::new(&name).with_path(&file.display().to_string());
    state.fail(error.to_string());
    state
}

/// Write `test-results.json`, plus `junit.xml` when `junit` is set
pub fn write_results(session: &TestSessionState, output_dir: &Path, junit: bool) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)?;

    let results = crate::report::types::TestResults::from_session(session);
    let report_path = output_dir.join("test-results.json");
    std::fs::write(&report_path, serde_json::to_string_pretty(&results)?)?;
    println!(
        "\n{} JSON report saved to: {}",
        "📄".to_string().blue(),
        report_path.display().to_string().cyan()
    );

    if junit {
        crate::report::junit::write_report(&results, output_dir)?;
    }
    Ok(report_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_yaml_content;
    use crate::session::tests::{login_app, test_config};

    fn flow(name: &str) -> Flow {
        let yaml = format!(
            "name: {}\nsteps:\n  - name: open list\n    actions:\n      - goto: /admin/quotations\n",
            name
        );
        parse_yaml_content(&yaml, Path::new("flows/list.yaml")).unwrap()
    }

    #[tokio::test]
    async fn test_flows_share_one_login() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let sessions = Arc::new(SessionManager::new(config.clone()));
        let credentials = Credentials::new("ops@example.com", "secret");

        let first_page = login_app();
        let first = run_in_page(
            &first_page,
            &flow("first"),
            config.clone(),
            sessions.clone(),
            credentials.clone(),
            EventEmitter::default(),
        )
        .await;
        // A second context starts without cookies and reuses the artifact
        let second_page = login_app();
        let second = run_in_page(
            &second_page,
            &flow("second"),
            config,
            sessions.clone(),
            credentials,
            EventEmitter::default(),
        )
        .await;

        assert_eq!(first.status, FlowStatus::Passed);
        assert_eq!(second.status, FlowStatus::Passed);
        assert_eq!(sessions.login_submissions(), 1);
        assert_eq!(second_page.count_calls("click:"), 0);
    }

    #[tokio::test]
    async fn test_failed_login_marks_flow_failed() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let sessions = Arc::new(SessionManager::new(config.clone()));
        let page = login_app();

        let state = run_in_page(
            &page,
            &flow("first"),
            config,
            sessions,
            Credentials::new("ops@example.com", "wrong"),
            EventEmitter::default(),
        )
        .await;

        assert_eq!(state.status, FlowStatus::Failed);
        assert!(state.steps.is_empty());
        assert!(state.error.unwrap().contains("authentication failed"));
    }

    #[tokio::test]
    async fn test_failed_step_is_kept_in_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let sessions = Arc::new(SessionManager::new(config.clone()));
        let page = login_app();
        let yaml = "name: broken\nsteps:\n  - name: open\n    actions:\n      - click: '#missing'\n";
        let flow = parse_yaml_content(yaml, Path::new("broken.yaml")).unwrap();

        let state = run_in_page(
            &page,
            &flow,
            config,
            sessions,
            Credentials::new("ops@example.com", "secret"),
            EventEmitter::default(),
        )
        .await;

        assert_eq!(state.status, FlowStatus::Failed);
        assert_eq!(state.failed_steps(), 1);
        assert!(state.artifacts.is_some());
    }

    #[tokio::test]
    async fn test_event_stream_closes_when_run_ends() {
        let dir = tempfile::tempdir().unwrap();
        let flows = dir.path().join("flows");
        std::fs::create_dir_all(&flows).unwrap();
        let (emitter, mut receiver) = EventEmitter::new();
        let listener = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Ok(event) = receiver.recv().await {
                seen.push(event);
            }
            seen
        });

        let session = run_flows(
            &flows,
            test_config(dir.path()),
            Credentials::new("ops@example.com", "secret"),
            &RunOptions::default(),
            emitter,
        )
        .await
        .unwrap();

        let events = tokio::time::timeout(std::time::Duration::from_secs(1), listener)
            .await
            .expect("listener still waiting for events")
            .unwrap();
        assert_eq!(session.summary().total_flows, 0);
        assert!(matches!(events.first(), Some(TestEvent::SessionStarted { .. })));
        assert!(matches!(events.last(), Some(TestEvent::SessionFinished { .. })));
    }

    #[test]
    fn test_write_results_creates_json_and_junit() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = TestSessionState::new("run-1");
        session.start();
        let mut flow = FlowState::new("sales");
        flow.start();
        flow.begin_step("create quotation").pass();
        flow.finish();
        session.add_flow(flow);
        session.finish();

        let path = write_results(&session, dir.path(), true).unwrap();

        let json = std::fs::read_to_string(path).unwrap();
        assert!(json.contains("\"sessionId\": \"run-1\""));
        assert!(dir.path().join("junit.xml").exists());
    }

    #[test]
    fn test_unparsable_flow_is_reported_failed() {
        let state = unparsable_flow(
            Path::new("flows/bad.yaml"),
            &HarnessError::Flow("steps missing".to_string()),
        );
        assert_eq!(state.flow_name, "bad");
        assert_eq!(state.status, FlowStatus::Failed);
    }
}
