//! In-memory storage backend
//!
//! Single-process implementation of all storage traits behind one mutex.
//! Used by tests and by process-provisioner development runs where standing
//! up postgres is not worth it. Implements the same ordering and latching
//! contract as the postgres backend.

use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use async_trait::async_trait;
use chrono::Utc;

use gantry_core::domain::agent::{Agent, AgentState, AgentStatusSample};
use gantry_core::domain::execution::{Execution, ExecutionStatus};
use gantry_core::domain::test::{TestBatch, TestCase, TestResult, TestVerdict};
use gantry_core::dto::result::{TestResultReport, ToolLogUpload};

use super::{AgentStore, BatchStore, ExecutionStore, Result, ResultStore};

struct BatchSlot {
    batch: TestBatch,
    assigned_to: Option<String>,
    completed: bool,
}

#[derive(Default)]
struct Inner {
    executions: HashMap<Uuid, Execution>,
    agents: HashMap<String, Agent>,
    samples: Vec<AgentStatusSample>,
    last_reported: HashMap<String, u64>,
    batches: Vec<BatchSlot>,
    results: HashMap<(Uuid, Uuid), TestResult>,
    logs: Vec<ToolLogUpload>,
    next_sequence: u64,
}

impl Inner {
    fn current_state(&self, agent_id: &str) -> Option<AgentState> {
        self.samples
            .iter()
            .rev()
            .find(|s| s.agent_id == agent_id)
            .map(|s| s.state)
    }

    fn push_sample(&mut self, agent_id: &str, state: AgentState) {
        self.next_sequence += 1;
        self.samples.push(AgentStatusSample {
            agent_id: agent_id.to_string(),
            state,
            sequence: self.next_sequence,
            recorded_at: Utc::now(),
        });
    }
}

/// In-memory implementation of every storage trait
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn create(&self, execution: Execution) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.executions.insert(execution.id, execution);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Execution>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.executions.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Execution>> {
        let inner = self.inner.lock().unwrap();
        let mut executions: Vec<Execution> = inner.executions.values().cloned().collect();
        executions.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(executions)
    }

    async fn set_running(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(execution) = inner.executions.get_mut(&id) {
            if execution.status == ExecutionStatus::Pending {
                execution.status = ExecutionStatus::Running;
            }
        }
        Ok(())
    }

    async fn try_complete(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        reason: Option<String>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.executions.get_mut(&id) {
            Some(execution) if !execution.status.is_terminal() => {
                execution.status = status;
                execution.failure_reason = reason;
                execution.completed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl AgentStore for MemoryStore {
    async fn register(&self, agents: Vec<Agent>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for agent in agents {
            inner.agents.insert(agent.id.clone(), agent);
        }
        Ok(())
    }

    async fn get(&self, agent_id: &str) -> Result<Option<Agent>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.agents.get(agent_id).cloned())
    }

    async fn update_version(&self, agent_id: &str, version: &str) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.agents.get_mut(agent_id) {
            Some(agent) => {
                agent.version = Some(version.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn current_state(&self, agent_id: &str) -> Result<Option<AgentState>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.current_state(agent_id))
    }

    async fn current_states(&self, execution_id: Uuid) -> Result<Vec<(Agent, Option<AgentState>)>> {
        let inner = self.inner.lock().unwrap();
        let mut agents: Vec<&Agent> = inner
            .agents
            .values()
            .filter(|a| a.execution_id == execution_id)
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(agents
            .into_iter()
            .map(|a| (a.clone(), inner.current_state(&a.id)))
            .collect())
    }

    async fn append_reported(
        &self,
        agent_id: &str,
        state: AgentState,
        reported_sequence: u64,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();

        if inner.current_state(agent_id).is_some_and(|s| s.is_halted()) {
            return Ok(false);
        }
        if inner
            .last_reported
            .get(agent_id)
            .is_some_and(|last| *last >= reported_sequence)
        {
            return Ok(false);
        }

        inner
            .last_reported
            .insert(agent_id.to_string(), reported_sequence);
        inner.push_sample(agent_id, state);
        Ok(true)
    }

    async fn append_forced(&self, agent_id: &str, state: AgentState) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();

        if inner.current_state(agent_id).is_some_and(|s| s.is_halted()) {
            return Ok(false);
        }

        inner.push_sample(agent_id, state);
        Ok(true)
    }

    async fn history(&self, agent_id: &str) -> Result<Vec<AgentStatusSample>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .samples
            .iter()
            .filter(|s| s.agent_id == agent_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl BatchStore for MemoryStore {
    async fn enqueue(&self, batches: Vec<TestBatch>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for batch in batches {
            inner.batches.push(BatchSlot {
                batch,
                assigned_to: None,
                completed: false,
            });
        }
        Ok(())
    }

    async fn assigned_to(&self, agent_id: &str) -> Result<Option<TestBatch>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .batches
            .iter()
            .find(|s| !s.completed && s.assigned_to.as_deref() == Some(agent_id))
            .map(|s| s.batch.clone()))
    }

    async fn claim_next(&self, execution_id: Uuid, agent_id: &str) -> Result<Option<TestBatch>> {
        let mut inner = self.inner.lock().unwrap();
        let slot = inner.batches.iter_mut().find(|s| {
            !s.completed && s.assigned_to.is_none() && s.batch.execution_id == execution_id
        });

        match slot {
            Some(slot) => {
                slot.assigned_to = Some(agent_id.to_string());
                Ok(Some(slot.batch.clone()))
            }
            None => Ok(None),
        }
    }

    async fn complete_assigned(&self, agent_id: &str) -> Result<Option<TestBatch>> {
        let mut inner = self.inner.lock().unwrap();
        let slot = inner
            .batches
            .iter_mut()
            .find(|s| !s.completed && s.assigned_to.as_deref() == Some(agent_id));

        match slot {
            Some(slot) => {
                slot.completed = true;
                Ok(Some(slot.batch.clone()))
            }
            None => Ok(None),
        }
    }

    async fn remaining(&self, execution_id: Uuid) -> Result<u64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .batches
            .iter()
            .filter(|s| !s.completed && s.batch.execution_id == execution_id)
            .count() as u64)
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn init_pending(&self, execution_id: Uuid, tests: &[TestCase]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for test in tests {
            inner.results.insert(
                (execution_id, test.id),
                TestResult {
                    test_id: test.id,
                    execution_id,
                    agent_id: None,
                    verdict: TestVerdict::Pending,
                    detail: None,
                    updated_at: Utc::now(),
                },
            );
        }
        Ok(())
    }

    async fn record(&self, report: &TestResultReport) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        for outcome in &report.outcomes {
            inner.results.insert(
                (report.execution_id, outcome.test_id),
                TestResult {
                    test_id: outcome.test_id,
                    execution_id: report.execution_id,
                    agent_id: Some(report.agent_id.clone()),
                    verdict: if outcome.passed {
                        TestVerdict::Passed
                    } else {
                        TestVerdict::Failed
                    },
                    detail: outcome.detail.clone(),
                    updated_at: Utc::now(),
                },
            );
        }
        Ok(())
    }

    async fn results_saved(&self, execution_id: Uuid, batch: &TestBatch) -> Result<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(batch.tests.iter().all(|test| {
            inner
                .results
                .get(&(execution_id, test.id))
                .is_some_and(|r| r.verdict != TestVerdict::Pending)
        }))
    }

    async fn mark_failed(
        &self,
        execution_id: Uuid,
        test_ids: &[Uuid],
        detail: &str,
    ) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let mut updated = 0;
        for test_id in test_ids {
            if let Some(result) = inner.results.get_mut(&(execution_id, *test_id)) {
                result.verdict = TestVerdict::Failed;
                result.detail = Some(detail.to_string());
                result.updated_at = Utc::now();
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn mark_pending_failed(&self, execution_id: Uuid, detail: &str) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let mut updated = 0;
        for result in inner.results.values_mut() {
            if result.execution_id == execution_id && result.verdict == TestVerdict::Pending {
                result.verdict = TestVerdict::Failed;
                result.detail = Some(detail.to_string());
                result.updated_at = Utc::now();
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn count_pending(&self, execution_id: Uuid) -> Result<u64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .results
            .values()
            .filter(|r| r.execution_id == execution_id && r.verdict == TestVerdict::Pending)
            .count() as u64)
    }

    async fn append_log(&self, upload: &ToolLogUpload) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.logs.push(upload.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(id: &str, execution_id: Uuid) -> Agent {
        Agent {
            id: id.to_string(),
            container_name: id.to_string(),
            version: None,
            execution_id,
            registered_at: Utc::now(),
        }
    }

    fn batch(execution_id: Uuid, names: &[&str]) -> TestBatch {
        TestBatch {
            id: Uuid::new_v4(),
            execution_id,
            tests: names
                .iter()
                .map(|name| TestCase {
                    id: Uuid::new_v4(),
                    name: name.to_string(),
                    arguments: vec![],
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_out_of_order_reported_sample_is_ignored() {
        let store = MemoryStore::new();
        let execution_id = Uuid::new_v4();
        store.register(vec![agent("a1", execution_id)]).await.unwrap();

        assert!(store
            .append_reported("a1", AgentState::Busy, 5)
            .await
            .unwrap());
        // A late heartbeat with an older sequence must not win
        assert!(!store
            .append_reported("a1", AgentState::Starting, 3)
            .await
            .unwrap());

        assert_eq!(
            store.current_state("a1").await.unwrap(),
            Some(AgentState::Busy)
        );
    }

    #[tokio::test]
    async fn test_halted_agent_accepts_no_further_samples() {
        let store = MemoryStore::new();
        let execution_id = Uuid::new_v4();
        store.register(vec![agent("a1", execution_id)]).await.unwrap();

        assert!(store.append_forced("a1", AgentState::Crashed).await.unwrap());
        // Idempotent: a second crash marking is a no-op
        assert!(!store.append_forced("a1", AgentState::Crashed).await.unwrap());
        // A zombie heartbeat cannot resurrect the agent
        assert!(!store
            .append_reported("a1", AgentState::Busy, 100)
            .await
            .unwrap());

        assert_eq!(
            store.current_state("a1").await.unwrap(),
            Some(AgentState::Crashed)
        );
    }

    #[tokio::test]
    async fn test_claim_and_complete_batch_flow() {
        let store = MemoryStore::new();
        let execution_id = Uuid::new_v4();
        store
            .enqueue(vec![batch(execution_id, &["t1"]), batch(execution_id, &["t2"])])
            .await
            .unwrap();

        assert_eq!(store.remaining(execution_id).await.unwrap(), 2);

        let first = store.claim_next(execution_id, "a1").await.unwrap().unwrap();
        // The claimed batch stays bound to the agent
        let outstanding = store.assigned_to("a1").await.unwrap().unwrap();
        assert_eq!(outstanding.id, first.id);

        // A second agent gets the other batch, not the claimed one
        let second = store.claim_next(execution_id, "a2").await.unwrap().unwrap();
        assert_ne!(second.id, first.id);
        assert!(store.claim_next(execution_id, "a3").await.unwrap().is_none());

        store.complete_assigned("a1").await.unwrap().unwrap();
        assert!(store.assigned_to("a1").await.unwrap().is_none());
        assert_eq!(store.remaining(execution_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_results_saved_requires_all_batch_outcomes() {
        let store = MemoryStore::new();
        let execution_id = Uuid::new_v4();
        let batch = batch(execution_id, &["t1", "t2"]);
        store
            .init_pending(execution_id, &batch.tests)
            .await
            .unwrap();

        assert!(!store.results_saved(execution_id, &batch).await.unwrap());

        store
            .record(&TestResultReport {
                agent_id: "a1".to_string(),
                execution_id,
                batch_id: batch.id,
                outcomes: vec![gantry_core::dto::result::TestOutcome {
                    test_id: batch.tests[0].id,
                    name: "t1".to_string(),
                    passed: true,
                    detail: None,
                }],
            })
            .await
            .unwrap();
        assert!(!store.results_saved(execution_id, &batch).await.unwrap());

        store
            .mark_pending_failed(execution_id, "abandoned")
            .await
            .unwrap();
        assert!(store.results_saved(execution_id, &batch).await.unwrap());
    }
}
