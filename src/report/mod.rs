pub mod json;
pub mod junit;
pub mod types;

use anyhow::{Context, Result};
use std::path::Path;

/// Render a saved `test-results.json` in another format
pub fn generate_report(results_path: &Path, format: &str, output: Option<&Path>) -> Result<()> {
    let results = std::fs::read_to_string(results_path)
        .with_context(|| format!("cannot read {}", results_path.display()))?;
    let test_results: types::TestResults = serde_json::from_str(&results)?;

    match format {
        "json" => json::generate(&test_results, output),
        "junit" => {
            let xml = junit::generate_junit_xml(&test_results)?;
            match output {
                Some(path) => {
                    std::fs::write(path, xml)?;
                    println!("JUnit report saved to: {}", path.display());
                }
                None => println!("{}", xml),
            }
            Ok(())
        }
        _ => anyhow::bail!("Unknown format: {} (expected json or junit)", format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::state::{FlowState, TestSessionState};

    #[test]
    fn test_report_from_saved_results() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = TestSessionState::new("run-7");
        let mut flow = FlowState::new("sales");
        flow.start();
        flow.begin_step("create quotation").pass();
        flow.finish();
        session.add_flow(flow);
        let results = types::TestResults::from_session(&session);
        let saved = dir.path().join("test-results.json");
        std::fs::write(&saved, serde_json::to_string(&results).unwrap()).unwrap();

        let out = dir.path().join("junit.xml");
        generate_report(&saved, "junit", Some(&out)).unwrap();
        assert!(std::fs::read_to_string(&out).unwrap().contains("create quotation"));

        assert!(generate_report(&saved, "html", None).is_err());
    }
}
