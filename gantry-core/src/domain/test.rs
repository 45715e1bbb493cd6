//! Test work-item domain types
//!
//! Tests are the unit of benchmark work. At execution start the requested
//! tests are chunked into batches; a batch is the assignment handed to one
//! agent for one heartbeat cycle. An empty batch list is valid and simply
//! means the execution converges without any agent going busy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single test item to run through the benchmark tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Unique identifier for the test
    pub id: Uuid,

    /// Name the tool reports outcomes under
    pub name: String,

    /// Extra arguments appended to the tool invocation for this test
    pub arguments: Vec<String>,
}

/// An ordered set of tests assigned to one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestBatch {
    /// Unique identifier for the batch
    pub id: Uuid,

    /// Execution this batch belongs to
    pub execution_id: Uuid,

    /// Tests in assignment order
    pub tests: Vec<TestCase>,
}

/// Recorded outcome of one test within an execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    /// The test this result belongs to
    pub test_id: Uuid,

    /// Execution the test ran under
    pub execution_id: Uuid,

    /// Agent that produced the result, if any did
    pub agent_id: Option<String>,

    /// Current verdict
    pub verdict: TestVerdict,

    /// Tool output or failure detail for this test
    pub detail: Option<String>,

    /// Last time the record changed
    pub updated_at: DateTime<Utc>,
}

/// Verdict of a single test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestVerdict {
    /// No outcome recorded yet
    Pending,

    /// The tool reported the test as passing
    Passed,

    /// The tool reported a failure, or the coordinator abandoned the test
    Failed,
}

impl std::fmt::Display for TestVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestVerdict::Pending => write!(f, "Pending"),
            TestVerdict::Passed => write!(f, "Passed"),
            TestVerdict::Failed => write!(f, "Failed"),
        }
    }
}
