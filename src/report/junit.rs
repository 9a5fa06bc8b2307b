use super::types::TestResults;
use crate::runner::state::{FlowStateReport, FlowStatus, StepStatus};
use anyhow::Result;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;
use std::path::Path;

fn seconds(ms: Option<u64>) -> String {
    (ms.unwrap_or(0) as f64 / 1000.0).to_string()
}

/// Generate JUnit XML: one `<testsuite>` per flow, one `<testcase>` per step
pub fn generate_junit_xml(results: &TestResults) -> Result<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let total_tests: usize = results.flows.iter().map(case_count).sum();
    let failures: usize = results.flows.iter().map(failure_count).sum();

    let mut suites_start = BytesStart::new("testsuites");
    suites_start.push_attribute(("name", "flow-harness-run"));
    suites_start.push_attribute(("tests", total_tests.to_string().as_str()));
    suites_start.push_attribute(("failures", failures.to_string().as_str()));
    suites_start.push_attribute(("time", seconds(results.summary.total_duration_ms).as_str()));
    writer.write_event(Event::Start(suites_start))?;

    for flow in &results.flows {
        write_test_suite(&mut writer, flow, &results.generated_at)?;
    }

    writer.write_event(Event::End(BytesEnd::new("testsuites")))?;

    let xml = String::from_utf8(writer.into_inner().into_inner())?;
    Ok(xml)
}

/// A flow that failed before its first step still counts as one case
fn case_count(flow: &FlowStateReport) -> usize {
    flow.steps.len().max(1)
}

fn failure_count(flow: &FlowStateReport) -> usize {
    if flow.steps.is_empty() {
        return usize::from(flow.status == FlowStatus::Failed);
    }
    flow.steps
        .iter()
        .filter(|s| matches!(s.status, StepStatus::Failed { .. }))
        .count()
}

fn write_test_suite<W: std::io::Write>(
    writer: &mut Writer<W>,
    flow: &FlowStateReport,
    timestamp: &str,
) -> Result<()> {
    let mut suite_start = BytesStart::new("testsuite");
    suite_start.push_attribute(("name", flow.flow_name.as_str()));
    suite_start.push_attribute(("tests", case_count(flow).to_string().as_str()));
    suite_start.push_attribute(("failures", failure_count(flow).to_string().as_str()));
    suite_start.push_attribute(("time", seconds(flow.total_duration_ms).as_str()));
    suite_start.push_attribute(("timestamp", timestamp));
    writer.write_event(Event::Start(suite_start))?;

    // Classname is the flow file with dots, as CI tools group by it
    let classname = flow.flow_path.replace(['/', '\\'], ".");

    if flow.steps.is_empty() {
        let mut case_start = BytesStart::new("testcase");
        case_start.push_attribute(("name", "session"));
        case_start.push_attribute(("classname", classname.as_str()));
        writer.write_event(Event::Start(case_start))?;
        if let Some(error) = &flow.error {
            write_failure(writer, error)?;
        }
        writer.write_event(Event::End(BytesEnd::new("testcase")))?;
    }

    for step in &flow.steps {
        let mut case_start = BytesStart::new("testcase");
        case_start.push_attribute(("name", step.name.as_str()));
        case_start.push_attribute(("classname", classname.as_str()));
        case_start.push_attribute(("time", seconds(step.duration_ms).as_str()));
        writer.write_event(Event::Start(case_start))?;

        if let StepStatus::Failed { error } = &step.status {
            write_failure(writer, error)?;
        }

        let mut out: Vec<String> = step
            .extracted_ids
            .iter()
            .map(|(kind, id)| format!("{} = {}", kind, id))
            .collect();
        out.extend(step.notes.iter().cloned());
        if !out.is_empty() {
            writer.write_event(Event::Start(BytesStart::new("system-out")))?;
            writer.write_event(Event::Text(BytesText::new(&out.join("\n"))))?;
            writer.write_event(Event::End(BytesEnd::new("system-out")))?;
        }

        writer.write_event(Event::End(BytesEnd::new("testcase")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
    Ok(())
}

fn write_failure<W: std::io::Write>(writer: &mut Writer<W>, error: &str) -> Result<()> {
    let mut fail_start = BytesStart::new("failure");
    fail_start.push_attribute(("message", error));
    fail_start.push_attribute(("type", "FlowStepFailed"));
    writer.write_event(Event::Start(fail_start))?;
    writer.write_event(Event::Text(BytesText::new(error)))?;
    writer.write_event(Event::End(BytesEnd::new("failure")))?;
    Ok(())
}

/// Write `junit.xml` into `output_dir`
pub fn write_report(results: &TestResults, output_dir: &Path) -> Result<()> {
    let xml = generate_junit_xml(results)?;
    let path = output_dir.join("junit.xml");
    std::fs::write(&path, xml)?;
    println!("    Generated JUnit report: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::state::{FlowState, TestSessionState};

    fn results() -> TestResults {
        let mut session = TestSessionState::new("test-session");
        session.start();

        let mut sales = FlowState::new("Quotation to invoice").with_path("flows/sales/quotation.yaml");
        sales.start();
        sales.begin_step("create quotation").pass();
        sales.record_id("quotation", "42");
        sales.begin_step("convert to sales order").fail("no option matching Ami".to_string());
        sales.finish();
        session.add_flow(sales);

        let mut locked_out = FlowState::new("Purchase");
        locked_out.fail("authentication failed after 3 attempt(s): still on login page".to_string());
        session.add_flow(locked_out);

        session.finish();
        TestResults::from_session(&session)
    }

    #[test]
    fn test_generate_junit_xml() {
        let xml = generate_junit_xml(&results()).expect("Failed to generate XML");

        assert!(xml.contains(r#"<testsuites name="flow-harness-run" tests="3" failures="2""#));
        assert!(xml.contains(r#"<testsuite name="Quotation to invoice" tests="2" failures="1""#));
        assert!(xml.contains(r#"<testcase name="create quotation" classname="flows.sales.quotation.yaml""#));
        assert!(xml.contains("quotation = 42"));
        assert!(xml.contains(r#"message="no option matching Ami""#));
        assert!(xml.contains(r#"<testcase name="session""#));
    }
}
