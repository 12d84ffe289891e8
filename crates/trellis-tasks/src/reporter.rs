//! Test execution reporting

use std::sync::Mutex;
use std::time::Duration;

use trellis_core::TargetKey;

use crate::signals::describe_exit;

/// Events emitted while tests run
#[derive(Debug, Clone)]
pub enum TestEvent {
    /// The concurrent phase is starting
    Scheduled {
        total: usize,
        workers: usize,
        exclusive: usize,
    },
    /// A test process is starting
    Started { key: TargetKey, command: String },
    /// A test process exited
    Finished {
        key: TargetKey,
        exit_code: i32,
        duration: Duration,
        /// Merged stdout/stderr when output was captured
        output: Option<String>,
    },
    /// The monitor killed a test that ran past its timeout
    TimedOut { key: TargetKey, timeout: Duration },
    /// A test process could not be started
    SpawnFailed { key: TargetKey, error: String },
    /// A running test was killed because the run was cancelled
    Cancelled { key: TargetKey },
    /// The exclusive phase is starting
    ExclusivePhase { count: usize },
    /// Every scheduled test has been processed
    AllCompleted {
        passed: usize,
        failed: usize,
        duration: Duration,
    },
}

/// Trait for reporting test progress
pub trait TestReporter: Send + Sync {
    /// Handle a test event
    fn report(&self, event: &TestEvent);
}

/// Reporter that logs to tracing
#[derive(Debug, Default)]
pub struct TracingReporter;

impl TestReporter for TracingReporter {
    fn report(&self, event: &TestEvent) {
        match event {
            TestEvent::Scheduled {
                total,
                workers,
                exclusive,
            } => {
                tracing::info!(total, workers, exclusive, "scheduling tests");
            }
            TestEvent::Started { key, command } => {
                tracing::info!("Running {}: {}", key, command);
            }
            TestEvent::Finished {
                key,
                exit_code,
                duration,
                output,
            } => {
                if let Some(output) = output {
                    tracing::debug!("Output of {}:\n{}", key, output);
                }
                if *exit_code == 0 {
                    tracing::info!("{} passed in {:.1}s", key, duration.as_secs_f64());
                } else {
                    tracing::warn!(
                        "{} failed after {:.1}s: {}",
                        key,
                        duration.as_secs_f64(),
                        describe_exit(*exit_code)
                    );
                }
            }
            TestEvent::TimedOut { key, timeout } => {
                tracing::warn!("{} timed out after {}s", key, timeout.as_secs());
            }
            TestEvent::SpawnFailed { key, error } => {
                tracing::error!("{}: failed to start test process: {}", key, error);
            }
            TestEvent::Cancelled { key } => {
                tracing::warn!("{} cancelled", key);
            }
            TestEvent::ExclusivePhase { count } => {
                tracing::info!("Running {} exclusive test(s)", count);
            }
            TestEvent::AllCompleted {
                passed,
                failed,
                duration,
            } => {
                tracing::info!(
                    "Tests complete: {} passed, {} failed ({:.1}s)",
                    passed,
                    failed,
                    duration.as_secs_f64()
                );
            }
        }
    }
}

/// Reporter that collects events for later inspection
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<TestEvent>>,
}

impl CollectingReporter {
    /// Get all collected events
    pub fn events(&self) -> Vec<TestEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl TestReporter for CollectingReporter {
    fn report(&self, event: &TestEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_reporter() {
        let reporter = CollectingReporter::default();
        let key = TargetKey::new("app", "server_test");

        reporter.report(&TestEvent::Started {
            key: key.clone(),
            command: "build/app/server_test".to_string(),
        });
        reporter.report(&TestEvent::Finished {
            key,
            exit_code: 0,
            duration: Duration::from_secs(2),
            output: None,
        });

        let events = reporter.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], TestEvent::Finished { exit_code: 0, .. }));
    }

    #[test]
    fn test_tracing_reporter() {
        let reporter = TracingReporter;
        let key = TargetKey::new("app", "server_test");

        // Just verify it doesn't panic
        reporter.report(&TestEvent::Finished {
            key: key.clone(),
            exit_code: -9,
            duration: Duration::from_secs(1),
            output: Some("boom".to_string()),
        });
        reporter.report(&TestEvent::TimedOut {
            key,
            timeout: Duration::from_secs(1),
        });
    }
}
