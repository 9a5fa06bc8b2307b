use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

use crate::error::FailureArtifacts;

/// Step execution status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepStatus {
    Running,
    Passed,
    Failed { error: String },
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Passed | StepStatus::Failed { .. })
    }
}

/// State for a single executed step
#[derive(Debug, Clone)]
pub struct StepState {
    pub index: usize,
    pub name: String,
    pub status: StepStatus,
    /// Identifiers extracted by this step, kind -> id
    pub extracted_ids: BTreeMap<String, String>,
    /// Optional expectations that did not hold, with their reasons
    pub notes: Vec<String>,
    pub started_at: Option<Instant>,
    pub duration_ms: Option<u64>,
}

impl StepState {
    pub fn new(index: usize, name: &str) -> Self {
        Self {
            index,
            name: name.to_string(),
            status: StepStatus::Running,
            extracted_ids: BTreeMap::new(),
            notes: Vec::new(),
            started_at: Some(Instant::now()),
            duration_ms: None,
        }
    }

    pub fn pass(&mut self) {
        self.finish(StepStatus::Passed);
    }

    pub fn fail(&mut self, error: String) {
        self.finish(StepStatus::Failed { error });
    }

    fn finish(&mut self, status: StepStatus) {
        self.status = status;
        if let Some(start) = self.started_at {
            self.duration_ms = Some(start.elapsed().as_millis() as u64);
        }
    }

    pub fn to_report(&self) -> StepStateReport {
        StepStateReport {
            index: self.index,
            name: self.name.clone(),
            status: self.status.clone(),
            extracted_ids: self.extracted_ids.clone(),
            notes: self.notes.clone(),
            duration_ms: self.duration_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepStateReport {
    pub index: usize,
    pub name: String,
    pub status: StepStatus,
    #[serde(default)]
    pub extracted_ids: BTreeMap<String, String>,
    #[serde(default)]
    pub notes: Vec<String>,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FlowStatus {
    Pending,
    Running,
    Passed,
    Failed,
}

/// State for one flow execution
///
/// Steps are appended as they start, so a flow aborted at step k holds
/// exactly k entries.
#[derive(Debug, Clone)]
pub struct FlowState {
    pub flow_name: String,
    pub flow_path: String,
    pub status: FlowStatus,
    pub steps: Vec<StepState>,
    /// Entities created so far, kind -> id
    pub created_entity_ids: BTreeMap<String, String>,
    pub started_at: Option<Instant>,
    pub total_duration_ms: Option<u64>,
    pub error: Option<String>,
    pub artifacts: Option<FailureArtifacts>,
}

impl FlowState {
    pub fn new(name: &str) -> Self {
        Self {
            flow_name: name.to_string(),
            flow_path: String::new(),
            status: FlowStatus::Pending,
            steps: Vec::new(),
            created_entity_ids: BTreeMap::new(),
            started_at: None,
            total_duration_ms: None,
            error: None,
            artifacts: None,
        }
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.flow_path = path.to_string();
        self
    }

    pub fn start(&mut self) {
        self.status = FlowStatus::Running;
        self.started_at = Some(Instant::now());
    }

    /// Append a running step and return it
    pub fn begin_step(&mut self, name: &str) -> &mut StepState {
        let index = self.steps.len();
        self.steps.push(StepState::new(index, name));
        let last = self.steps.len() - 1;
        &mut self.steps[last]
    }

    pub fn current_step(&mut self) -> Option<&mut StepState> {
        self.steps.last_mut()
    }

    /// Record an identifier on the current step and the flow
    pub fn record_id(&mut self, kind: &str, id: &str) {
        if let Some(step) = self.steps.last_mut() {
            step.extracted_ids.insert(kind.to_string(), id.to_string());
        }
        self.created_entity_ids
            .insert(kind.to_string(), id.to_string());
    }

    /// Identifier of `kind`, only if present and non-empty
    pub fn entity_id(&self, kind: &str) -> Option<&str> {
        self.created_entity_ids
            .get(kind)
            .map(String::as_str)
            .filter(|id| !id.trim().is_empty())
    }

    pub fn passed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Passed)
            .count()
    }

    pub fn failed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Failed { .. }))
            .count()
    }

    pub fn finish(&mut self) {
        if let Some(start) = self.started_at {
            self.total_duration_ms = Some(start.elapsed().as_millis() as u64);
        }
        self.status = if self.failed_steps() == 0 && self.error.is_none() {
            FlowStatus::Passed
        } else {
            FlowStatus::Failed
        };
    }

    /// Mark the flow failed without a step, e.g. login never succeeded
    pub fn fail(&mut self, error: String) {
        self.error = Some(error);
        self.finish();
    }

    pub fn to_report(&self) -> FlowStateReport {
        FlowStateReport {
            flow_name: self.flow_name.clone(),
            flow_path: self.flow_path.clone(),
            status: self.status.clone(),
            steps: self.steps.iter().map(|s| s.to_report()).collect(),
            created_entity_ids: self.created_entity_ids.clone(),
            total_duration_ms: self.total_duration_ms,
            error: self.error.clone(),
            artifacts: self.artifacts.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStateReport {
    pub flow_name: String,
    pub flow_path: String,
    pub status: FlowStatus,
    pub steps: Vec<StepStateReport>,
    #[serde(default)]
    pub created_entity_ids: BTreeMap<String, String>,
    pub total_duration_ms: Option<u64>,
    pub error: Option<String>,
    #[serde(default)]
    pub artifacts: Option<FailureArtifacts>,
}

/// State of one `run` invocation across all flows
#[derive(Debug, Clone)]
pub struct TestSessionState {
    pub session_id: String,
    pub flows: Vec<FlowState>,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
}

impl TestSessionState {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            flows: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    pub fn add_flow(&mut self, flow: FlowState) {
        self.flows.push(flow);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Instant::now());
    }

    pub fn has_failures(&self) -> bool {
        self.flows.iter().any(|f| f.status == FlowStatus::Failed)
    }

    pub fn summary(&self) -> TestSummary {
        let mut summary = TestSummary {
            session_id: self.session_id.clone(),
            total_flows: self.flows.len() as u32,
            ..TestSummary::default()
        };

        for flow in &self.flows {
            match flow.status {
                FlowStatus::Passed => summary.passed_flows += 1,
                FlowStatus::Failed => summary.failed_flows += 1,
                _ => {}
            }
            summary.total_steps += flow.steps.len() as u32;
            summary.passed_steps += flow.passed_steps() as u32;
            summary.failed_steps += flow.failed_steps() as u32;
        }

        summary.total_duration_ms = self.started_at.map(|start| {
            self.finished_at
                .unwrap_or_else(Instant::now)
                .duration_since(start)
                .as_millis() as u64
        });
        summary
    }

    pub fn to_report(&self) -> TestSessionReport {
        TestSessionReport {
            session_id: self.session_id.clone(),
            flows: self.flows.iter().map(|f| f.to_report()).collect(),
            summary: self.summary(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSummary {
    pub session_id: String,
    pub total_flows: u32,
    pub passed_flows: u32,
    pub failed_flows: u32,
    pub total_steps: u32,
    pub passed_steps: u32,
    pub failed_steps: u32,
    pub total_duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSessionReport {
    pub session_id: String,
    pub flows: Vec<FlowStateReport>,
    pub summary: TestSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_recorded_on_step_and_flow() {
        let mut flow = FlowState::new("sales");
        flow.start();
        flow.begin_step("create quotation");
        flow.record_id("quotation", "42");
        flow.current_step().unwrap().pass();

        assert_eq!(flow.entity_id("quotation"), Some("42"));
        assert_eq!(flow.steps[0].extracted_ids["quotation"], "42");
        assert_eq!(flow.entity_id("sale_order"), None);
    }

    #[test]
    fn test_empty_id_counts_as_missing() {
        let mut flow = FlowState::new("sales");
        flow.record_id("quotation", "  ");
        assert_eq!(flow.entity_id("quotation"), None);
    }

    #[test]
    fn test_flow_status_follows_steps() {
        let mut flow = FlowState::new("sales");
        flow.start();
        flow.begin_step("a").pass();
        flow.finish();
        assert_eq!(flow.status, FlowStatus::Passed);

        flow.begin_step("b").fail("boom".to_string());
        flow.finish();
        assert_eq!(flow.status, FlowStatus::Failed);
        assert_eq!((flow.passed_steps(), flow.failed_steps()), (1, 1));
    }

    #[test]
    fn test_flow_failure_without_steps() {
        let mut flow = FlowState::new("sales");
        flow.start();
        flow.fail("authentication failed".to_string());
        assert_eq!(flow.status, FlowStatus::Failed);
        assert!(flow.steps.is_empty());
    }

    #[test]
    fn test_summary_counts() {
        let mut session = TestSessionState::new("run-1");
        session.start();

        let mut ok = FlowState::new("ok");
        ok.start();
        ok.begin_step("a").pass();
        ok.finish();

        let mut bad = FlowState::new("bad");
        bad.start();
        bad.begin_step("a").pass();
        bad.begin_step("b").fail("x".to_string());
        bad.finish();

        session.add_flow(ok);
        session.add_flow(bad);
        session.finish();

        let summary = session.summary();
        assert_eq!(summary.total_flows, 2);
        assert_eq!(summary.passed_flows, 1);
        assert_eq!(summary.failed_flows, 1);
        assert_eq!(summary.total_steps, 3);
        assert_eq!(summary.passed_steps, 2);
        assert!(session.has_failures());

        let json = serde_json::to_value(session.to_report()).unwrap();
        assert_eq!(json["flows"][1]["steps"][1]["status"]["type"], "failed");
        assert_eq!(json["summary"]["failedFlows"], 1);
    }
}
