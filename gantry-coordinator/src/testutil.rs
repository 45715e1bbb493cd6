//! Shared test fixtures
//!
//! Builds an AppState over the in-memory store and a scripted fake
//! provisioner, with millisecond-scale timings so watch and finalization
//! behavior can be exercised end to end.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use gantry_core::domain::agent::AgentState;
use gantry_core::domain::execution::ExecutionStatus;
use gantry_core::domain::test::TestCase;
use gantry_core::dto::execution::{RunConfiguration, StartExecution};
use gantry_core::dto::heartbeat::{ExecutionProgress, Heartbeat};
use gantry_core::error::ProvisionError;

use crate::config::Config;
use crate::provisioner::RuntimeProvisioner;
use crate::service::execution as execution_service;
use crate::service::liveness::LivenessInspector;
use crate::state::AppState;
use crate::storage::{MemoryStore, ResultStore};

/// Scripted provisioner standing in for podman
#[derive(Default)]
pub struct FakeProvisioner {
    runtimes: Mutex<HashMap<Uuid, Vec<String>>>,
    stopped: Mutex<HashMap<String, bool>>,
    cleanup_calls: AtomicUsize,
    fail_create: AtomicBool,
}

#[async_trait]
impl RuntimeProvisioner for FakeProvisioner {
    async fn create_and_start(
        &self,
        execution_id: Uuid,
        _configuration: &RunConfiguration,
        replicas: u32,
    ) -> Result<Vec<String>, ProvisionError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ProvisionError::StartFailed(
                "fake backend refused to start runtimes".to_string(),
            ));
        }

        let ids: Vec<String> = (0..replicas)
            .map(|index| format!("fake-{}-{}", execution_id.simple(), index))
            .collect();

        self.runtimes
            .lock()
            .unwrap()
            .insert(execution_id, ids.clone());

        Ok(ids)
    }

    async fn is_stopped(&self, runtime_id: &str) -> bool {
        // Runtimes stop immediately unless a test scripts otherwise
        self.stopped
            .lock()
            .unwrap()
            .get(runtime_id)
            .copied()
            .unwrap_or(true)
    }

    async fn cleanup_all_by_execution(&self, execution_id: Uuid) -> Result<(), ProvisionError> {
        self.cleanup_calls.fetch_add(1, Ordering::SeqCst);
        self.runtimes.lock().unwrap().remove(&execution_id);
        Ok(())
    }

    async fn list_container_ids(&self, execution_id: Uuid) -> Result<Vec<String>, ProvisionError> {
        Ok(self
            .runtimes
            .lock()
            .unwrap()
            .get(&execution_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Handle on the fakes backing a test AppState
pub struct TestHarness {
    pub provisioner: Arc<FakeProvisioner>,
    pub store: Arc<MemoryStore>,
}

impl TestHarness {
    pub fn cleanup_calls(&self) -> usize {
        self.provisioner.cleanup_calls.load(Ordering::SeqCst)
    }

    pub fn set_stopped(&self, runtime_id: &str, stopped: bool) {
        self.provisioner
            .stopped
            .lock()
            .unwrap()
            .insert(runtime_id.to_string(), stopped);
    }

    pub fn fail_provisioning(&self, fail: bool) {
        self.provisioner.fail_create.store(fail, Ordering::SeqCst);
    }

    pub async fn agent_ids(&self, state: &AppState, execution_id: Uuid) -> Vec<String> {
        state
            .agents
            .current_states(execution_id)
            .await
            .unwrap()
            .into_iter()
            .map(|(agent, _)| agent.id)
            .collect()
    }

    pub async fn pending_count(&self, execution_id: Uuid) -> u64 {
        self.store.count_pending(execution_id).await.unwrap()
    }
}

/// AppState wired to the in-memory store, a fake provisioner, and
/// millisecond timings
pub async fn test_state() -> (AppState, TestHarness) {
    let config = Config {
        batch_size: 3,
        liveness_timeout: Duration::from_millis(50),
        liveness_scan_interval: Duration::from_millis(20),
        shutdown_poll_interval: Duration::from_millis(10),
        shutdown_max_checks: 3,
        finalize_settle_delay: Duration::from_millis(10),
        ..Config::default()
    };

    let store = Arc::new(MemoryStore::new());
    let provisioner = Arc::new(FakeProvisioner::default());

    let state = AppState {
        config: Arc::new(config),
        executions: store.clone(),
        agents: store.clone(),
        batches: store.clone(),
        results: store.clone(),
        provisioner: provisioner.clone(),
        liveness: Arc::new(LivenessInspector::new()),
    };

    (state, TestHarness { provisioner, store })
}

/// Start an execution with the given replica count and test names
pub async fn start_execution(state: &AppState, replicas: u32, test_names: &[&str]) -> Uuid {
    let req = StartExecution {
        configuration: RunConfiguration {
            image: "quay.io/gantry/agent:test".to_string(),
            tool_command: "benchtool".to_string(),
            env: HashMap::new(),
        },
        tests: test_names
            .iter()
            .map(|name| TestCase {
                id: Uuid::new_v4(),
                name: name.to_string(),
                arguments: vec![],
            })
            .collect(),
        replicas,
    };

    execution_service::start_execution(state, req)
        .await
        .unwrap()
        .execution
        .id
}

/// A heartbeat with the given state and sequence
pub fn heartbeat(agent_id: &str, state: AgentState, sequence: u64) -> Heartbeat {
    Heartbeat {
        agent_id: agent_id.to_string(),
        state,
        sequence,
        progress: ExecutionProgress::default(),
    }
}

/// Poll until the execution reaches the wanted status
pub async fn wait_for_status(state: &AppState, execution_id: Uuid, wanted: ExecutionStatus) {
    for _ in 0..300 {
        let execution = state.executions.get(execution_id).await.unwrap().unwrap();
        if execution.status == wanted {
            // Give post-transition work (cleanup, result marking) a moment
            tokio::time::sleep(Duration::from_millis(50)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!(
        "execution {} never reached status {}",
        execution_id, wanted
    );
}
