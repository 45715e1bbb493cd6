//! Child-process provisioning
//!
//! Runs each agent as a plain child process of the coordinator instead of a
//! container. Meant for development and single-host runs where container
//! isolation is not needed; the control plane cannot tell the difference.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use uuid::Uuid;

use gantry_core::dto::execution::RunConfiguration;
use gantry_core::error::ProvisionError;

use super::RuntimeProvisioner;

struct ProcessEntry {
    execution_id: Uuid,
    child: Child,
}

/// Provisioner that spawns the agent binary as local child processes
pub struct ProcessProvisioner {
    /// Path of the agent binary to spawn
    agent_binary: String,

    /// URL agents use to reach the coordinator
    coordinator_url: String,

    /// Live children keyed by runtime id
    processes: Mutex<HashMap<String, ProcessEntry>>,
}

impl ProcessProvisioner {
    /// Creates a new process provisioner
    ///
    /// # Arguments
    /// * `agent_binary` - Path of the agent executable
    /// * `coordinator_url` - Coordinator URL passed to agents
    pub fn new(agent_binary: String, coordinator_url: String) -> Self {
        Self {
            agent_binary,
            coordinator_url,
            processes: Mutex::new(HashMap::new()),
        }
    }

    fn spawn_agent(
        &self,
        runtime_id: &str,
        execution_id: Uuid,
        configuration: &RunConfiguration,
    ) -> Result<Child, String> {
        let mut command = Command::new(&self.agent_binary);
        command
            .env("AGENT_ID", runtime_id)
            .env("EXECUTION_ID", execution_id.to_string())
            .env("COORDINATOR_URL", &self.coordinator_url)
            .env("TOOL_COMMAND", &configuration.tool_command)
            .kill_on_drop(true);

        for (key, value) in &configuration.env {
            command.env(key, value);
        }

        command
            .spawn()
            .map_err(|e| format!("failed to spawn {}: {}", self.agent_binary, e))
    }
}

#[async_trait]
impl RuntimeProvisioner for ProcessProvisioner {
    async fn create_and_start(
        &self,
        execution_id: Uuid,
        configuration: &RunConfiguration,
        replicas: u32,
    ) -> Result<Vec<String>, ProvisionError> {
        info!(
            "Spawning {} agent process(es) for execution {}",
            replicas, execution_id
        );

        let mut started = Vec::new();

        for index in 0..replicas {
            let runtime_id = format!("proc-{}-{}", execution_id.simple(), index);

            match self.spawn_agent(&runtime_id, execution_id, configuration) {
                Ok(child) => {
                    debug!("Agent process {} spawned", runtime_id);
                    let mut processes = self.processes.lock().unwrap();
                    processes.insert(
                        runtime_id.clone(),
                        ProcessEntry {
                            execution_id,
                            child,
                        },
                    );
                    started.push(runtime_id);
                }
                Err(reason) => {
                    warn!(
                        "Provisioning failed at replica {}/{} for execution {}: {}",
                        index + 1,
                        replicas,
                        execution_id,
                        reason
                    );

                    // Never report a short list; kill what already started
                    let mut processes = self.processes.lock().unwrap();
                    for runtime_id in &started {
                        if let Some(mut entry) = processes.remove(runtime_id) {
                            let _ = entry.child.start_kill();
                        }
                    }

                    return Err(ProvisionError::Partial {
                        execution_id,
                        requested: replicas,
                        started: started.len() as u32,
                    });
                }
            }
        }

        Ok(started)
    }

    async fn is_stopped(&self, runtime_id: &str) -> bool {
        let mut processes = self.processes.lock().unwrap();
        match processes.get_mut(runtime_id) {
            // Unknown runtime counts as stopped
            None => true,
            Some(entry) => match entry.child.try_wait() {
                Ok(Some(_)) => true,
                Ok(None) => false,
                Err(e) => {
                    warn!("try_wait failed for {}: {}", runtime_id, e);
                    true
                }
            },
        }
    }

    async fn cleanup_all_by_execution(&self, execution_id: Uuid) -> Result<(), ProvisionError> {
        let mut processes = self.processes.lock().unwrap();
        let runtime_ids: Vec<String> = processes
            .iter()
            .filter(|(_, entry)| entry.execution_id == execution_id)
            .map(|(id, _)| id.clone())
            .collect();

        info!(
            "Cleaning up {} agent process(es) for execution {}",
            runtime_ids.len(),
            execution_id
        );

        for runtime_id in runtime_ids {
            if let Some(mut entry) = processes.remove(&runtime_id) {
                if let Err(e) = entry.child.start_kill() {
                    debug!("Agent process {} already gone: {}", runtime_id, e);
                }
            }
        }

        Ok(())
    }

    async fn list_container_ids(&self, execution_id: Uuid) -> Result<Vec<String>, ProvisionError> {
        let processes = self.processes.lock().unwrap();
        let mut runtime_ids: Vec<String> = processes
            .iter()
            .filter(|(_, entry)| entry.execution_id == execution_id)
            .map(|(id, _)| id.clone())
            .collect();
        runtime_ids.sort();

        Ok(runtime_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_runtime_reports_stopped() {
        let provisioner =
            ProcessProvisioner::new("gantry-agent".to_string(), "http://localhost:8080".to_string());
        assert!(provisioner.is_stopped("proc-missing-0").await);
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent_on_empty_execution() {
        let provisioner =
            ProcessProvisioner::new("gantry-agent".to_string(), "http://localhost:8080".to_string());
        let execution_id = Uuid::new_v4();

        provisioner
            .cleanup_all_by_execution(execution_id)
            .await
            .unwrap();
        provisioner
            .cleanup_all_by_execution(execution_id)
            .await
            .unwrap();

        assert!(
            provisioner
                .list_container_ids(execution_id)
                .await
                .unwrap()
                .is_empty()
        );
    }
}
