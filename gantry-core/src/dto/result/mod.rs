//! Result submission DTOs
//!
//! Shapes the agent POSTs to the results backend after a local tool run.
//! The contract is deliberately thin: an OK-class status means accepted.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of one test as parsed from the tool output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    /// The test this outcome belongs to
    pub test_id: Uuid,

    /// Name the tool reported the outcome under
    pub name: String,

    /// Whether the tool reported the test as passing
    pub passed: bool,

    /// Failure detail or tool output excerpt
    pub detail: Option<String>,
}

/// Batch of test outcomes submitted by an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResultReport {
    /// The submitting agent
    pub agent_id: String,

    /// Execution the outcomes belong to
    pub execution_id: Uuid,

    /// The batch the outcomes were produced for
    pub batch_id: Uuid,

    /// Per-test outcomes
    pub outcomes: Vec<TestOutcome>,
}

/// Raw tool log upload, sent best-effort after result submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolLogUpload {
    /// The submitting agent
    pub agent_id: String,

    /// Execution the logs belong to
    pub execution_id: Uuid,

    /// Combined stdout/stderr of the tool invocation
    pub content: String,
}
