//! Error taxonomy for the harness.
//!
//! Layer-local failures are typed here and propagate upward unchanged in kind:
//! widget and submit failures become the `cause` of [`HarnessError::FlowStepFailed`],
//! browser-level failures stay wrapped in [`HarnessError::Driver`].

use std::path::PathBuf;

use thiserror::Error;

use crate::runner::state::FlowState;

pub type Result<T> = std::result::Result<T, HarnessError>;

/// Files written when a flow step fails
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureArtifacts {
    pub screenshot: Option<PathBuf>,
    pub dom_excerpt: Option<PathBuf>,
    pub url: Option<String>,
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("authentication failed after {attempts} attempt(s): {reason}")]
    Authentication { attempts: u32, reason: String },

    #[error("session expired: navigation landed on login page ({url})")]
    SessionExpired { url: String },

    #[error("step '{step_name}' failed: {cause}")]
    FlowStepFailed {
        step_name: String,
        #[source]
        cause: Box<HarnessError>,
        state: Box<FlowState>,
        artifacts: FailureArtifacts,
    },

    #[error("flow broken at step '{step_name}': identifier '{missing}' is missing or empty")]
    FlowBroken { step_name: String, missing: String },

    #[error("widget '{field}' not interactable: no visible trigger within {waited_ms}ms")]
    WidgetNotInteractable { field: String, waited_ms: u64 },

    #[error("no option matching '{query}' for '{field}' within {waited_ms}ms")]
    NoMatchingOption {
        field: String,
        query: String,
        waited_ms: u64,
    },

    #[error("selection '{label}' for '{field}' did not reach the form state")]
    SelectionNotApplied { field: String, label: String },

    #[error("submission rejected, still on {url}: {}", errors.join("; "))]
    SubmitRejected { url: String, errors: Vec<String> },

    #[error("could not extract '{kind}' identifier: {detail}")]
    IdentifierNotFound { kind: String, detail: String },

    #[error("assertion failed: {message}")]
    Assertion { message: String },

    #[error("timed out after {waited_ms}ms waiting for {operation}")]
    Timeout { operation: String, waited_ms: u64 },

    #[error("could not acquire lock {path} within {waited_ms}ms")]
    Lock { path: PathBuf, waited_ms: u64 },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid flow file: {0}")]
    Flow(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Driver(#[from] anyhow::Error),
}

impl HarnessError {
    /// Name of the failing step for flow-level errors
    pub fn step_name(&self) -> Option<&str> {
        match self {
            HarnessError::FlowStepFailed { step_name, .. }
            | HarnessError::FlowBroken { step_name, .. } => Some(step_name),
            _ => None,
        }
    }

    /// Partial flow state preserved by a step failure
    pub fn flow_state(&self) -> Option<&FlowState> {
        match self {
            HarnessError::FlowStepFailed { state, .. } => Some(state),
            _ => None,
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, HarnessError::SessionExpired { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_failure_keeps_cause_as_source() {
        let err = HarnessError::FlowStepFailed {
            step_name: "select customer".to_string(),
            cause: Box::new(HarnessError::NoMatchingOption {
                field: "Customer".to_string(),
                query: "Ami".to_string(),
                waited_ms: 500,
            }),
            state: Box::new(FlowState::new("sales")),
            artifacts: FailureArtifacts::default(),
        };

        assert_eq!(err.step_name(), Some("select customer"));
        let source = std::error::Error::source(&err).expect("cause is the source");
        assert!(source.to_string().contains("no option matching 'Ami'"));
        assert!(err.to_string().starts_with("step 'select customer' failed"));
    }

    #[test]
    fn test_submit_rejected_lists_errors() {
        let err = HarnessError::SubmitRejected {
            url: "http://localhost/admin/quotations/create".to_string(),
            errors: vec!["Customer is required".to_string(), "Date is required".to_string()],
        };
        assert!(err
            .to_string()
            .ends_with("Customer is required; Date is required"));
    }
}
