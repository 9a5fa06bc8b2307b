use super::state::{FlowStatus, TestSummary};
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Run events for real-time updates
#[derive(Debug, Clone)]
pub enum TestEvent {
    // Session events
    SessionStarted {
        session_id: String,
    },
    SessionFinished {
        summary: TestSummary,
    },

    // Flow events
    FlowStarted {
        flow_name: String,
        flow_path: String,
        step_count: usize,
    },
    FlowFinished {
        flow_name: String,
        status: FlowStatus,
        duration_ms: Option<u64>,
        error: Option<String>,
    },

    // Step events
    StepStarted {
        flow_name: String,
        index: usize,
        step: String,
    },
    StepPassed {
        flow_name: String,
        index: usize,
        duration_ms: u64,
    },
    StepFailed {
        flow_name: String,
        index: usize,
        error: String,
        duration_ms: u64,
    },
    /// An optional expectation did not hold
    StepNote {
        flow_name: String,
        index: usize,
        note: String,
    },

    Log {
        flow_name: String,
        message: String,
    },
}

/// Event emitter for broadcasting run events
#[derive(Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<TestEvent>,
}

impl EventEmitter {
    pub fn new() -> (Self, broadcast::Receiver<TestEvent>) {
        let (sender, receiver) = broadcast::channel(100);
        (Self { sender }, receiver)
    }

    pub fn emit(&self, event: TestEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TestEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }
}

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration as StdDuration;

/// Console event listener for printing real-time updates
///
/// Flows run concurrently, so each running step owns a spinner keyed by its
/// flow name.
pub struct ConsoleEventListener;

impl ConsoleEventListener {
    pub async fn listen(mut receiver: broadcast::Receiver<TestEvent>) {
        use colored::Colorize;
        use std::io::IsTerminal;

        let multi = if std::io::stdout().is_terminal() {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };

        let mut spinners: HashMap<String, (ProgressBar, String)> = HashMap::new();

        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!("console listener skipped {} events", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match event {
                TestEvent::SessionStarted { session_id } => {
                    multi
                        .println(format!(
                            "\n{} Run started: {}",
                            "▶".green().bold(),
                            session_id.cyan()
                        ))
                        .ok();
                }

                TestEvent::SessionFinished { summary } => {
                    for (_, (pb, _)) in spinners.drain() {
                        pb.finish();
                    }

                    println!("\n{} Run finished", "■".blue().bold());
                    println!(
                        "  Flows: {} passed, {} failed ({} total)",
                        summary.passed_flows.to_string().green(),
                        summary.failed_flows.to_string().red(),
                        summary.total_flows
                    );
                    println!(
                        "  Steps: {} passed, {} failed ({} run)",
                        summary.passed_steps.to_string().green(),
                        summary.failed_steps.to_string().red(),
                        summary.total_steps
                    );
                    if let Some(duration) = summary.total_duration_ms {
                        println!("  Duration: {}ms", duration);
                    }
                }

                TestEvent::FlowStarted {
                    flow_name,
                    step_count,
                    ..
                } => {
                    multi
                        .println(format!(
                            "\n  {} Flow: {} ({} steps)",
                            "→".blue(),
                            flow_name.white().bold(),
                            step_count
                        ))
                        .ok();
                }

                TestEvent::FlowFinished {
                    flow_name,
                    status,
                    duration_ms,
                    error,
                } => {
                    if let Some((pb, _)) = spinners.remove(&flow_name) {
                        pb.finish_and_clear();
                    }

                    let status_str = match status {
                        FlowStatus::Passed => "PASSED".green().bold(),
                        FlowStatus::Failed => "FAILED".red().bold(),
                        _ => "UNKNOWN".white().bold(),
                    };
                    let mut line = format!("  {} Flow {} [{}]", "←".blue(), flow_name, status_str);
                    if let Some(duration) = duration_ms {
                        line.push_str(&format!(" {}ms", duration));
                    }
                    multi.println(line).ok();
                    if let Some(error) = error {
                        multi.println(format!("      {}", error.red())).ok();
                    }
                }

                TestEvent::StepStarted {
                    flow_name,
                    index,
                    step,
                } => {
                    let pb = multi.add(ProgressBar::new_spinner());
                    if let Ok(style) = ProgressStyle::default_spinner()
                        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                        .template("    {spinner} {msg}")
                    {
                        pb.set_style(style);
                    }

                    let body = format!("{} [{}] {}", flow_name.dimmed(), index + 1, step);
                    pb.set_message(format!("{}... ", body));
                    pb.enable_steady_tick(StdDuration::from_millis(100));

                    if let Some((old, _)) = spinners.insert(flow_name, (pb, body)) {
                        old.finish_and_clear();
                    }
                }

                TestEvent::StepPassed {
                    flow_name,
                    duration_ms,
                    ..
                } => {
                    if let Some((pb, body)) = spinners.remove(&flow_name) {
                        pb.finish_and_clear();
                        multi
                            .println(format!("    {} {} ({}ms)", "✓".green(), body, duration_ms))
                            .ok();
                    }
                }

                TestEvent::StepFailed {
                    flow_name,
                    duration_ms,
                    ..
                } => {
                    if let Some((pb, body)) = spinners.remove(&flow_name) {
                        pb.finish_and_clear();
                        multi
                            .println(format!("    {} {} ({}ms)", "✗".red(), body, duration_ms))
                            .ok();
                    }
                }

                TestEvent::StepNote {
                    flow_name, note, ..
                } => {
                    multi
                        .println(format!(
                            "      {} {} {}",
                            "○".yellow(),
                            flow_name.dimmed(),
                            note.dimmed()
                        ))
                        .ok();
                }

                TestEvent::Log { flow_name, message } => {
                    multi
                        .println(format!("      {} {}", flow_name.dimmed(), message))
                        .ok();
                }
            }
        }
    }
}
