//! Output formatting utilities

use std::time::Duration;

use console::{style, Style};
use trellis_tasks::signals::describe_exit;
use trellis_tasks::{TestEvent, TestReporter};

/// Print a success message
pub fn success(message: &str) {
    println!("{} {}", style("✓").green().bold(), message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), message);
}

/// Print a warning message
pub fn warning(message: &str) {
    eprintln!("{} {}", style("!").yellow().bold(), message);
}

/// Print an info message
pub fn info(message: &str) {
    println!("{} {}", style("→").blue(), message);
}

/// Create a styled header
pub fn header(text: &str) -> String {
    style(text).bold().to_string()
}

/// Create a styled key-value line
pub fn key_value(key: &str, value: &str) -> String {
    format!("  {}: {}", style(key).dim(), value)
}

/// Style for target keys
pub fn target_style() -> Style {
    Style::new().cyan()
}

/// Style for paths
pub fn path_style() -> Style {
    Style::new().cyan()
}

fn seconds(duration: &Duration) -> String {
    format!("{:.1}s", duration.as_secs_f64())
}

/// Prints test progress to the terminal
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    /// Only print failures
    pub quiet: bool,
}

impl ConsoleReporter {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl TestReporter for ConsoleReporter {
    fn report(&self, event: &TestEvent) {
        match event {
            TestEvent::Scheduled {
                total,
                workers,
                exclusive,
            } => {
                if !self.quiet {
                    let mut line = format!("Running {} test(s) on {} worker(s)", total, workers);
                    if *exclusive > 0 {
                        line.push_str(&format!(", {} exclusive", exclusive));
                    }
                    info(&line);
                }
            }
            TestEvent::Started { key, command } => {
                if !self.quiet {
                    println!(
                        "  {} {} {}",
                        style("▸").dim(),
                        target_style().apply_to(key),
                        style(command).dim()
                    );
                }
            }
            TestEvent::Finished {
                key,
                exit_code,
                duration,
                output,
            } => {
                if *exit_code == 0 {
                    if !self.quiet {
                        println!(
                            "  {} {} ({})",
                            style("✓").green(),
                            key,
                            style(seconds(duration)).dim()
                        );
                    }
                } else {
                    println!(
                        "  {} {} {} ({})",
                        style("✗").red(),
                        style(key).red(),
                        describe_exit(*exit_code),
                        style(seconds(duration)).dim()
                    );
                }
                if let Some(output) = output {
                    if *exit_code != 0 || !self.quiet {
                        for line in output.lines() {
                            println!("      {}", style(line).dim());
                        }
                    }
                }
            }
            TestEvent::TimedOut { key, timeout } => {
                warning(&format!("{} timed out after {}", key, seconds(timeout)));
            }
            TestEvent::SpawnFailed { key, error: err } => {
                error(&format!("{}: failed to start: {}", key, err));
            }
            TestEvent::Cancelled { key } => {
                warning(&format!("{} cancelled", key));
            }
            TestEvent::ExclusivePhase { count } => {
                if !self.quiet {
                    info(&format!("Running {} exclusive test(s)", count));
                }
            }
            TestEvent::AllCompleted { .. } => {}
        }
    }
}
