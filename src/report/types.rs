use crate::runner::state::{FlowStateReport, TestSessionState, TestSummary};
use serde::{Deserialize, Serialize};

/// Results of one run, as written to `test-results.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResults {
    pub session_id: String,
    pub flows: Vec<FlowStateReport>,
    pub summary: TestSummary,
    pub generated_at: String,
}

impl TestResults {
    pub fn from_session(session: &TestSessionState) -> Self {
        let report = session.to_report();
        Self {
            session_id: report.session_id,
            flows: report.flows,
            summary: report.summary,
            generated_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}
