use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;

use super::state::FlowState;
use crate::error::{HarnessError, Result};

/// Per-flow runtime values
pub struct FlowContext {
    /// Run-unique suffix for codes the flow creates
    pub marker: String,

    /// Output directory for failure artifacts
    pub output_dir: PathBuf,

    /// User-defined variables (set via setVar)
    pub vars: HashMap<String, String>,

    var_pattern: Regex,
}

impl FlowContext {
    pub fn new(output_dir: PathBuf) -> Result<Self> {
        let var_pattern = Regex::new(r"\$\{([a-zA-Z0-9_.]+)\}")
            .map_err(|e| HarnessError::Config(e.to_string()))?;
        let suffix = uuid::Uuid::new_v4().simple().to_string();

        Ok(Self {
            marker: format!("{}{}", chrono::Utc::now().timestamp_millis(), &suffix[..4]),
            output_dir,
            vars: HashMap::new(),
            var_pattern,
        })
    }

    pub fn with_marker(mut self, marker: &str) -> Self {
        self.marker = marker.to_string();
        self
    }

    /// Get a variable from vars or the process environment
    pub fn get_var(&self, name: &str) -> Option<String> {
        self.vars
            .get(name)
            .cloned()
            .or_else(|| std::env::var(name).ok())
    }

    pub fn set_var(&mut self, name: &str, value: String) {
        self.vars.insert(name.to_string(), value);
    }

    /// Substitute `${...}` patterns in a string
    ///
    /// `${id.<kind>}` must resolve to a non-empty extracted identifier;
    /// otherwise the flow is broken at `step_name`. Unknown plain variables
    /// are left as written.
    pub fn substitute_vars(&self, text: &str, state: &FlowState, step_name: &str) -> Result<String> {
        let mut missing: Option<String> = None;

        let result = self.var_pattern.replace_all(text, |caps: &regex::Captures| {
            let key = &caps[1];

            if let Some(kind) = key.strip_prefix("id.") {
                return match state.entity_id(kind) {
                    Some(id) => id.to_string(),
                    None => {
                        missing.get_or_insert_with(|| kind.to_string());
                        String::new()
                    }
                };
            }

            match key {
                "marker" => return self.marker.clone(),
                "time" => return chrono::Local::now().format("%H:%M:%S").to_string(),
                "date" => return chrono::Local::now().format("%Y-%m-%d").to_string(),
                "timestamp" => return chrono::Utc::now().timestamp().to_string(),
                _ => {}
            }

            self.get_var(key)
                .unwrap_or_else(|| format!("${{{}}}", key))
        });

        match missing {
            Some(kind) => Err(HarnessError::FlowBroken {
                step_name: step_name.to_string(),
                missing: kind,
            }),
            None => Ok(result.into_owned()),
        }
    }
}
