//! Storage layer
//!
//! Narrow persistence seams for the control plane. The protocol services
//! only ever talk to these traits; which backend sits behind them is a
//! configuration choice (postgres for deployments, memory for development
//! and tests).
//!
//! Ordering contract: status samples for a single agent are observable in
//! append order. Reported samples carry the agent's own sequence number and
//! a stale sample (sequence not newer than the last reported one) is
//! ignored, so a late-arriving older heartbeat can never overwrite a newer
//! state. Once an agent is halted (`Crashed`/`Terminated`) no further
//! sample of any kind is accepted.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use gantry_core::domain::agent::{Agent, AgentState, AgentStatusSample};
use gantry_core::domain::execution::{Execution, ExecutionStatus};
use gantry_core::domain::test::{TestBatch, TestCase};
use gantry_core::dto::result::{TestResultReport, ToolLogUpload};

/// Errors surfaced by a storage backend
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Persistence for execution records
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert a new execution
    async fn create(&self, execution: Execution) -> Result<()>;

    /// Fetch one execution
    async fn get(&self, id: Uuid) -> Result<Option<Execution>>;

    /// List all executions, newest first
    async fn list(&self) -> Result<Vec<Execution>>;

    /// Move a pending execution to Running
    async fn set_running(&self, id: Uuid) -> Result<()>;

    /// Atomically move a non-terminal execution to the given terminal
    /// status. Returns false when the execution was already terminal, which
    /// makes finalization (and its cleanup) exactly-once.
    async fn try_complete(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        reason: Option<String>,
    ) -> Result<bool>;
}

/// Persistence for agent identities and their append-only status log
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Register newly provisioned agents
    async fn register(&self, agents: Vec<Agent>) -> Result<()>;

    /// Fetch one agent record
    async fn get(&self, agent_id: &str) -> Result<Option<Agent>>;

    /// Record the agent software version from the additional-data report
    async fn update_version(&self, agent_id: &str, version: &str) -> Result<bool>;

    /// Most recent recorded state for one agent
    async fn current_state(&self, agent_id: &str) -> Result<Option<AgentState>>;

    /// All agents of an execution with their most recent state
    async fn current_states(&self, execution_id: Uuid) -> Result<Vec<(Agent, Option<AgentState>)>>;

    /// Append a sample reported over a heartbeat. Returns false (and stores
    /// nothing) when the reported sequence is not newer than the last one,
    /// or when the agent is already halted.
    async fn append_reported(
        &self,
        agent_id: &str,
        state: AgentState,
        reported_sequence: u64,
    ) -> Result<bool>;

    /// Append a coordinator-forced sample (Busy on assignment, Terminated,
    /// Crashed). Returns false when the agent is already halted, which makes
    /// crash-marking idempotent.
    async fn append_forced(&self, agent_id: &str, state: AgentState) -> Result<bool>;

    /// Full status history for one agent, in append order
    async fn history(&self, agent_id: &str) -> Result<Vec<AgentStatusSample>>;
}

/// Persistence for test batches and their assignment to agents
///
/// A batch stays bound to the agent that claimed it until completed, so a
/// repeated heartbeat re-receives the outstanding batch instead of claiming
/// a second one, and an abandoned batch can be re-dispatched.
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Queue the batches of a new execution
    async fn enqueue(&self, batches: Vec<TestBatch>) -> Result<()>;

    /// The batch currently assigned to this agent, if any
    async fn assigned_to(&self, agent_id: &str) -> Result<Option<TestBatch>>;

    /// Atomically claim the next unassigned batch of the execution for this
    /// agent. Side-effect-free when no work remains.
    async fn claim_next(&self, execution_id: Uuid, agent_id: &str) -> Result<Option<TestBatch>>;

    /// Mark the batch assigned to this agent complete. Returns the batch,
    /// or None when the agent had no outstanding assignment.
    async fn complete_assigned(&self, agent_id: &str) -> Result<Option<TestBatch>>;

    /// Number of batches not yet completed for the execution
    async fn remaining(&self, execution_id: Uuid) -> Result<u64>;
}

/// Persistence for test results and tool logs
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Create a Pending record for every test of a new execution
    async fn init_pending(&self, execution_id: Uuid, tests: &[TestCase]) -> Result<()>;

    /// Upsert outcomes submitted by an agent
    async fn record(&self, report: &TestResultReport) -> Result<()>;

    /// Whether every test of the batch has a durably recorded, non-pending
    /// outcome. This is the injected capability behind the coordinator's
    /// "results durably saved" check on Finished heartbeats.
    async fn results_saved(&self, execution_id: Uuid, batch: &TestBatch) -> Result<bool>;

    /// Force the given tests to Failed with the given detail
    async fn mark_failed(&self, execution_id: Uuid, test_ids: &[Uuid], detail: &str)
    -> Result<u64>;

    /// Force every still-pending test of the execution to Failed
    async fn mark_pending_failed(&self, execution_id: Uuid, detail: &str) -> Result<u64>;

    /// Number of tests of the execution still without an outcome
    async fn count_pending(&self, execution_id: Uuid) -> Result<u64>;

    /// Store a raw tool-log upload
    async fn append_log(&self, upload: &ToolLogUpload) -> Result<()>;
}
