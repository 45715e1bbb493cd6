//! Podman container provisioning
//!
//! Handles container lifecycle for agent runtimes:
//! - Checking podman availability
//! - Starting one labeled container per agent replica
//! - Probing whether a container is still running
//! - Removing all containers of an execution after finalization
//!
//! Containers are labeled with the owning execution id so that listing and
//! cleanup are label-scoped and never touch foreign containers. The
//! container name doubles as the runtime identifier handed back to the
//! control plane.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use gantry_core::dto::execution::RunConfiguration;
use gantry_core::error::ProvisionError;

use super::RuntimeProvisioner;

const EXECUTION_LABEL: &str = "gantry.execution";

/// Provisioner backed by the local podman CLI
pub struct PodmanProvisioner {
    /// URL agents use to reach the coordinator, injected into containers
    coordinator_url: String,
}

impl PodmanProvisioner {
    /// Creates a new podman provisioner
    ///
    /// # Arguments
    /// * `coordinator_url` - Coordinator URL as reachable from containers
    pub fn new(coordinator_url: String) -> Self {
        Self { coordinator_url }
    }

    /// Checks that podman is installed and responding
    pub async fn check_available() -> Result<(), ProvisionError> {
        let output = Command::new("podman")
            .arg("--version")
            .output()
            .await
            .map_err(|e| {
                ProvisionError::Backend(format!(
                    "failed to execute 'podman --version', is podman installed? {}",
                    e
                ))
            })?;

        if !output.status.success() {
            return Err(ProvisionError::Backend(
                "podman is not working correctly".to_string(),
            ));
        }

        let version = String::from_utf8_lossy(&output.stdout);
        info!("Podman is available: {}", version.trim());

        Ok(())
    }

    /// Starts one container and returns an error message on failure
    async fn start_container(
        &self,
        name: &str,
        execution_id: Uuid,
        configuration: &RunConfiguration,
    ) -> Result<(), String> {
        let mut command = Command::new("podman");
        command
            .arg("run")
            .arg("-d")
            .arg("--name")
            .arg(name)
            .arg("--label")
            .arg(format!("{}={}", EXECUTION_LABEL, execution_id))
            .arg("-e")
            .arg(format!("AGENT_ID={}", name))
            .arg("-e")
            .arg(format!("EXECUTION_ID={}", execution_id))
            .arg("-e")
            .arg(format!("COORDINATOR_URL={}", self.coordinator_url))
            .arg("-e")
            .arg(format!("TOOL_COMMAND={}", configuration.tool_command));

        for (key, value) in &configuration.env {
            command.arg("-e").arg(format!("{}={}", key, value));
        }

        let output = command
            .arg(&configuration.image)
            .output()
            .await
            .map_err(|e| format!("failed to execute podman run: {}", e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !stdout.trim().is_empty() {
            debug!("podman run stdout: {}", stdout.trim());
        }
        if !stderr.trim().is_empty() {
            debug!("podman run stderr: {}", stderr.trim());
        }

        if !output.status.success() {
            return Err(format!(
                "podman run failed for image {}: exit_code={}, stderr='{}'",
                configuration.image,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            ));
        }

        info!("Container {} started for execution {}", name, execution_id);
        Ok(())
    }

    /// Force-removes one container, logging failures
    async fn remove_container(&self, name: &str) {
        debug!("Removing container {}", name);

        let result = Command::new("podman")
            .arg("rm")
            .arg("-f")
            .arg("-v")
            .arg(name)
            .output()
            .await;

        match result {
            Ok(output) if output.status.success() => {
                debug!("Container {} removed", name);
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!("Failed to remove container {}: {}", name, stderr.trim());
            }
            Err(e) => {
                warn!("Failed to remove container {}: {}", name, e);
            }
        }
    }

    /// Lists container names carrying this execution's label
    async fn list_by_label(&self, execution_id: Uuid) -> Result<Vec<String>, ProvisionError> {
        let output = Command::new("podman")
            .arg("ps")
            .arg("-a")
            .arg("--filter")
            .arg(format!("label={}={}", EXECUTION_LABEL, execution_id))
            .arg("--format")
            .arg("{{.Names}}")
            .output()
            .await
            .map_err(|e| ProvisionError::Backend(format!("failed to execute podman ps: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProvisionError::Backend(format!(
                "podman ps failed: {}",
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }
}

#[async_trait]
impl RuntimeProvisioner for PodmanProvisioner {
    async fn create_and_start(
        &self,
        execution_id: Uuid,
        configuration: &RunConfiguration,
        replicas: u32,
    ) -> Result<Vec<String>, ProvisionError> {
        Self::check_available().await?;

        info!(
            "Starting {} container(s) with image {} for execution {}",
            replicas, configuration.image, execution_id
        );

        let mut started: Vec<String> = Vec::new();

        for index in 0..replicas {
            let name = container_name(execution_id, index);

            if let Err(reason) = self
                .start_container(&name, execution_id, configuration)
                .await
            {
                warn!(
                    "Provisioning failed at replica {}/{} for execution {}: {}",
                    index + 1,
                    replicas,
                    execution_id,
                    reason
                );

                // Never report a short list; tear down what already started
                for name in &started {
                    self.remove_container(name).await;
                }

                return Err(ProvisionError::Partial {
                    execution_id,
                    requested: replicas,
                    started: started.len() as u32,
                });
            }

            started.push(name);
        }

        Ok(started)
    }

    async fn is_stopped(&self, runtime_id: &str) -> bool {
        let output = Command::new("podman")
            .arg("inspect")
            .arg("--format")
            .arg("{{.State.Running}}")
            .arg(runtime_id)
            .output()
            .await;

        match output {
            // Missing container counts as stopped
            Ok(output) if !output.status.success() => true,
            Ok(output) => String::from_utf8_lossy(&output.stdout).trim() != "true",
            Err(e) => {
                warn!("podman inspect failed for {}: {}", runtime_id, e);
                true
            }
        }
    }

    async fn cleanup_all_by_execution(&self, execution_id: Uuid) -> Result<(), ProvisionError> {
        let names = self.list_by_label(execution_id).await?;

        info!(
            "Cleaning up {} container(s) for execution {}",
            names.len(),
            execution_id
        );

        for name in &names {
            self.remove_container(name).await;
        }

        Ok(())
    }

    async fn list_container_ids(&self, execution_id: Uuid) -> Result<Vec<String>, ProvisionError> {
        self.list_by_label(execution_id).await
    }
}

/// Deterministic container name for one replica of an execution
fn container_name(execution_id: Uuid, index: u32) -> String {
    format!("gantry-{}-{}", execution_id.simple(), index)
}
