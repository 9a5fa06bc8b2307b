use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flow_harness::driver::web::WebDriver;
use flow_harness::runner::{self, ConsoleEventListener, EventEmitter, RunOptions};
use flow_harness::{report, Credentials, HarnessConfig, SessionManager};

#[derive(Parser)]
#[command(name = "flow-harness")]
#[command(version)]
#[command(about = "Business-flow UI test harness for admin panels", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a flow file or every flow in a directory
    Run {
        /// Path to flow file or directory
        path: PathBuf,

        /// Harness configuration file (YAML)
        #[arg(short, long, env = "HARNESS_CONFIG")]
        config: Option<PathBuf>,

        /// Browser contexts running at once
        #[arg(short, long)]
        workers: Option<usize>,

        /// Output directory for reports and failure artifacts
        #[arg(short, long, env = "HARNESS_OUTPUT_DIR")]
        output: Option<PathBuf>,

        /// Also write a JUnit report
        #[arg(long, default_value = "false")]
        report: bool,

        /// Filter flows by tags (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        tags: Option<Vec<String>>,

        /// Run the browser headless (overrides the config file)
        #[arg(long)]
        headless: Option<bool>,
    },

    /// Create the session artifact, or recreate it with --force
    Login {
        /// Harness configuration file (YAML)
        #[arg(short, long, env = "HARNESS_CONFIG")]
        config: Option<PathBuf>,

        /// Discard the existing artifact first
        #[arg(long, default_value = "false")]
        force: bool,
    },

    /// Render a saved test-results.json
    Report {
        /// Path to test results JSON
        results: PathBuf,

        /// Output format (json, junit)
        #[arg(short, long, default_value = "junit")]
        format: String,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<HarnessConfig> {
    Ok(HarnessConfig::load(path)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            path,
            config,
            workers,
            output,
            report,
            tags,
            headless,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(workers) = workers {
                config.max_parallel_contexts = workers.max(1);
            }
            if let Some(output) = output {
                config.output_dir = output;
            }
            if let Some(headless) = headless {
                config.headless = headless;
            }
            let credentials = Credentials::from_env()?;

            println!(
                "{} Running flows from: {}",
                "▶".green().bold(),
                path.display()
            );
            println!("  Base URL: {}", config.base_url.cyan());
            println!("  Contexts: {}", config.max_parallel_contexts.to_string().yellow());
            if let Some(ref tags_list) = tags {
                println!("  Tags: {}", tags_list.join(", ").yellow());
            }
            println!("  Output: {}", config.output_dir.display().to_string().cyan());
            if report {
                println!("  JUnit: {}", "Enabled".green());
            }

            let options = RunOptions {
                tags: tags.unwrap_or_default(),
                report,
            };
            let config = Arc::new(config);
            let (emitter, receiver) = EventEmitter::new();
            let listener = tokio::spawn(ConsoleEventListener::listen(receiver));

            let session =
                runner::run_flows(&path, config.clone(), credentials, &options, emitter).await?;
            // The run dropped its emitter; the summary is printed once the listener drains
            if let Err(e) = listener.await {
                log::warn!("console listener stopped: {}", e);
            }
            runner::write_results(&session, &config.output_dir, options.report)?;
            if session.has_failures() {
                let summary = session.summary();
                anyhow::bail!(
                    "{} of {} flow(s) failed",
                    summary.failed_flows,
                    summary.total_flows
                );
            }
        }

        Commands::Login { config, force } => {
            let config = Arc::new(load_config(config.as_deref())?);
            let credentials = Credentials::from_env()?;
            let manager = SessionManager::new(config.clone());
            let path = manager.default_path();

            if force {
                manager.invalidate(&path).await?;
            }
            let driver = WebDriver::new(config.web_driver_config()).await?;
            let session = manager.load_or_create(&driver, &credentials, &path).await?;

            println!(
                "{} Session for {} ({} cookie(s), captured {})",
                "✓".green().bold(),
                session.base_url.cyan(),
                session.cookies.len(),
                session.captured_at.format("%Y-%m-%d %H:%M:%S")
            );
            println!("  Saved to: {}", path.display().to_string().cyan());
        }

        Commands::Report {
            results,
            format,
            output,
        } => {
            println!(
                "{} Generating {} report from: {}",
                "📊".to_string().blue(),
                format.cyan(),
                results.display()
            );
            report::generate_report(&results, &format, output.as_deref())?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_config_path_falls_back_to_environment() {
        std::env::set_var("HARNESS_CONFIG", "ci/harness.yaml");
        let cli = Cli::try_parse_from(["flow-harness", "login"]).unwrap();
        std::env::remove_var("HARNESS_CONFIG");

        let Commands::Login { config, force } = cli.command else {
            panic!("expected login");
        };
        assert_eq!(config, Some(PathBuf::from("ci/harness.yaml")));
        assert!(!force);

        let cli = Cli::try_parse_from(["flow-harness", "run", "flows", "-o", "out"]).unwrap();
        let Commands::Run { output, .. } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(output, Some(PathBuf::from("out")));
    }
}
