//! Local tool execution and result submission
//!
//! Runs the benchmark tool as a child process, parses its per-test
//! outcomes, and pushes them to the results backend with bounded
//! exponential backoff. The outcome protocol is line-oriented: the tool
//! prints `PASS <name>` or `FAIL <name> [detail]` per test; tests the tool
//! never mentions are recorded as failed.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use gantry_client::ControlPlane;
use gantry_core::domain::agent::AgentState;
use gantry_core::domain::test::TestCase;
use gantry_core::dto::result::{TestOutcome, TestResultReport, ToolLogUpload};

use crate::config::Config;
use crate::worker::Shared;

/// Why result submission gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubmitFailure {
    /// The backend answered, but not with an OK-class status
    Rejected,
    /// The backend never answered (transport failure or timeout)
    Unreachable,
}

struct ToolRun {
    stdout: String,
    stderr: String,
    exit_code: i32,
}

/// Execute one assigned batch end to end
pub(crate) async fn run_batch<C: ControlPlane>(
    config: &Config,
    client: &C,
    shared: &Shared,
    batch_id: Uuid,
    tests: Vec<TestCase>,
) {
    let run = match invoke_tool(config, &tests).await {
        Ok(run) => run,
        Err(e) => {
            error!("Tool invocation for batch {} failed: {:#}", batch_id, e);
            shared.set_state(AgentState::CliFailed);
            return;
        }
    };

    let produced_output = !run.stdout.trim().is_empty() || !run.stderr.trim().is_empty();

    if run.exit_code != 0 && !produced_output {
        error!(
            "Tool exited with code {} and produced no output for batch {}",
            run.exit_code, batch_id
        );
        shared.set_state(AgentState::CliFailed);
        return;
    }

    let outcomes = parse_outcomes(&run.stdout, &tests);
    let passed = outcomes.iter().filter(|o| o.passed).count();
    info!(
        "Batch {} done: {}/{} test(s) passed (exit code {})",
        batch_id,
        passed,
        outcomes.len(),
        run.exit_code
    );

    let report = TestResultReport {
        agent_id: config.agent_id.clone(),
        execution_id: config.execution_id,
        batch_id,
        outcomes,
    };

    match submit_with_retry(
        client,
        &report,
        config.submit_attempts,
        config.submit_backoff,
    )
    .await
    {
        Ok(()) => debug!("Results for batch {} submitted", batch_id),
        Err(SubmitFailure::Rejected) => {
            warn!(
                "Results backend rejected batch {} after {} attempt(s)",
                batch_id, config.submit_attempts
            );
            shared.set_state(AgentState::BackendFailure);
        }
        Err(SubmitFailure::Unreachable) => {
            warn!(
                "Results backend unreachable for batch {} after {} attempt(s)",
                batch_id, config.submit_attempts
            );
            shared.set_state(AgentState::BackendUnreachable);
        }
    }

    // Logs go out regardless of how result submission went
    let mut content = run.stdout;
    if !run.stderr.is_empty() {
        content.push('\n');
        content.push_str(&run.stderr);
    }
    let upload = ToolLogUpload {
        agent_id: config.agent_id.clone(),
        execution_id: config.execution_id,
        content,
    };
    if let Err(e) = client.submit_logs(&upload).await {
        warn!("Failed to upload tool logs for batch {}: {}", batch_id, e);
    }

    shared.add_completed(tests.len() as u32);
    shared.set_state(AgentState::Finished);
}

/// Run the tool once for the whole batch
async fn invoke_tool(config: &Config, tests: &[TestCase]) -> anyhow::Result<ToolRun> {
    let mut parts = config.tool_command.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| anyhow::anyhow!("tool command is empty"))?;

    let mut command = Command::new(program);
    command.args(parts);
    for test in tests {
        command.arg(&test.name);
        command.args(&test.arguments);
    }
    command.stdin(Stdio::null()).kill_on_drop(true);

    debug!("Invoking tool: {} ({} test(s))", config.tool_command, tests.len());

    let output = time::timeout(config.tool_timeout, command.output())
        .await
        .map_err(|_| anyhow::anyhow!("tool timed out after {:?}", config.tool_timeout))??;

    Ok(ToolRun {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

/// Parse per-test outcomes from the tool's line protocol
///
/// Every test of the batch gets exactly one outcome; a test the tool never
/// reported is failed with a marker detail.
fn parse_outcomes(stdout: &str, tests: &[TestCase]) -> Vec<TestOutcome> {
    let mut reported: std::collections::HashMap<&str, (bool, Option<String>)> =
        std::collections::HashMap::new();

    for line in stdout.lines() {
        let mut fields = line.trim().splitn(3, ' ');
        let verdict = fields.next().unwrap_or_default();
        let name = fields.next().unwrap_or_default();
        let detail = fields.next().map(|d| d.to_string());

        match verdict {
            "PASS" => {
                reported.insert(name, (true, detail));
            }
            "FAIL" => {
                reported.insert(name, (false, detail));
            }
            _ => {}
        }
    }

    tests
        .iter()
        .map(|test| match reported.get(test.name.as_str()) {
            Some((passed, detail)) => TestOutcome {
                test_id: test.id,
                name: test.name.clone(),
                passed: *passed,
                detail: detail.clone(),
            },
            None => TestOutcome {
                test_id: test.id,
                name: test.name.clone(),
                passed: false,
                detail: Some("no outcome reported by tool".to_string()),
            },
        })
        .collect()
}

/// Submit results with bounded exponential backoff
///
/// Makes exactly `attempts` tries, doubling the wait after each failed
/// attempt. The returned failure classifies the last error so the caller
/// can pick the matching soft-failure state.
pub(crate) async fn submit_with_retry<C: ControlPlane>(
    client: &C,
    report: &TestResultReport,
    attempts: u32,
    base_backoff: Duration,
) -> Result<(), SubmitFailure> {
    let mut delay = base_backoff;
    let mut last_failure = SubmitFailure::Unreachable;

    for attempt in 1..=attempts {
        match client.submit_results(report).await {
            Ok(()) => {
                if attempt > 1 {
                    info!("Result submission succeeded on attempt {}", attempt);
                }
                return Ok(());
            }
            Err(e) => {
                last_failure = if e.is_rejection() {
                    SubmitFailure::Rejected
                } else {
                    SubmitFailure::Unreachable
                };

                warn!(
                    "Result submission failed (attempt {}/{}): {}",
                    attempt, attempts, e
                );

                if attempt < attempts {
                    time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    Err(last_failure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gantry_client::{ClientError, Result as ClientResult};
    use gantry_core::dto::agent::AgentData;
    use gantry_core::dto::heartbeat::{Heartbeat, HeartbeatResponse};
    use std::sync::Mutex;
    use std::time::Instant;

    fn test_case(name: &str) -> TestCase {
        TestCase {
            id: Uuid::new_v4(),
            name: name.to_string(),
            arguments: vec![],
        }
    }

    #[test]
    fn test_parse_outcomes_line_protocol() {
        let tests = vec![test_case("t1"), test_case("t2"), test_case("t3")];
        let stdout = "PASS t1\nFAIL t2 assertion blew up\nnoise line\n";

        let outcomes = parse_outcomes(stdout, &tests);

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].passed);
        assert!(!outcomes[1].passed);
        assert_eq!(outcomes[1].detail.as_deref(), Some("assertion blew up"));
        // t3 was never mentioned by the tool
        assert!(!outcomes[2].passed);
        assert_eq!(
            outcomes[2].detail.as_deref(),
            Some("no outcome reported by tool")
        );
    }

    #[tokio::test]
    async fn test_invoke_tool_captures_output() {
        let config = Config::new(
            "agent-1".to_string(),
            Uuid::new_v4(),
            "http://localhost:8080".to_string(),
            "echo PASS".to_string(),
        );
        let tests = vec![test_case("t1")];

        let run = invoke_tool(&config, &tests).await.unwrap();

        assert_eq!(run.exit_code, 0);
        assert_eq!(run.stdout.trim(), "PASS t1");
    }

    /// Backend that fails every submission a fixed way and records when
    /// each attempt arrived
    struct FailingBackend {
        reject: bool,
        attempts: Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl ControlPlane for FailingBackend {
        async fn send_heartbeat(&self, _heartbeat: &Heartbeat) -> ClientResult<HeartbeatResponse> {
            Ok(HeartbeatResponse::Continue)
        }

        async fn report_agent_data(&self, _agent_id: &str, _data: &AgentData) -> ClientResult<()> {
            Ok(())
        }

        async fn submit_results(&self, _report: &TestResultReport) -> ClientResult<()> {
            self.attempts.lock().unwrap().push(Instant::now());
            if self.reject {
                Err(ClientError::api_error(500, "nope"))
            } else {
                Err(ClientError::ParseError("connection refused".to_string()))
            }
        }

        async fn submit_logs(&self, _upload: &ToolLogUpload) -> ClientResult<()> {
            Ok(())
        }
    }

    fn empty_report() -> TestResultReport {
        TestResultReport {
            agent_id: "agent-1".to_string(),
            execution_id: Uuid::new_v4(),
            batch_id: Uuid::new_v4(),
            outcomes: vec![],
        }
    }

    #[tokio::test]
    async fn test_retry_makes_exact_attempts_with_doubling_backoff() {
        let backend = FailingBackend {
            reject: true,
            attempts: Mutex::new(Vec::new()),
        };
        let base = Duration::from_millis(30);

        let result = submit_with_retry(&backend, &empty_report(), 4, base).await;
        assert_eq!(result, Err(SubmitFailure::Rejected));

        let attempts = backend.attempts.lock().unwrap();
        assert_eq!(attempts.len(), 4);

        // Gaps double: at least 30ms, 60ms, 120ms (sleeps never fire early)
        let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps[0] >= base);
        assert!(gaps[1] >= base * 2);
        assert!(gaps[2] >= base * 4);
    }

    #[tokio::test]
    async fn test_retry_classifies_transport_failure() {
        let backend = FailingBackend {
            reject: false,
            attempts: Mutex::new(Vec::new()),
        };

        let result =
            submit_with_retry(&backend, &empty_report(), 2, Duration::from_millis(5)).await;
        assert_eq!(result, Err(SubmitFailure::Unreachable));
        assert_eq!(backend.attempts.lock().unwrap().len(), 2);
    }

    /// Backend that succeeds on the given attempt
    struct EventuallyOkBackend {
        succeed_on: usize,
        attempts: Mutex<usize>,
    }

    #[async_trait]
    impl ControlPlane for EventuallyOkBackend {
        async fn send_heartbeat(&self, _heartbeat: &Heartbeat) -> ClientResult<HeartbeatResponse> {
            Ok(HeartbeatResponse::Continue)
        }

        async fn report_agent_data(&self, _agent_id: &str, _data: &AgentData) -> ClientResult<()> {
            Ok(())
        }

        async fn submit_results(&self, _report: &TestResultReport) -> ClientResult<()> {
            let mut attempts = self.attempts.lock().unwrap();
            *attempts += 1;
            if *attempts >= self.succeed_on {
                Ok(())
            } else {
                Err(ClientError::api_error(503, "busy"))
            }
        }

        async fn submit_logs(&self, _upload: &ToolLogUpload) -> ClientResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_retry_stops_after_success() {
        let backend = EventuallyOkBackend {
            succeed_on: 2,
            attempts: Mutex::new(0),
        };

        let result =
            submit_with_retry(&backend, &empty_report(), 5, Duration::from_millis(5)).await;
        assert!(result.is_ok());
        assert_eq!(*backend.attempts.lock().unwrap(), 2);
    }
}
