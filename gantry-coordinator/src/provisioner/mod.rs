//! Runtime provisioning
//!
//! A provisioner creates, probes, and destroys the compute units hosting
//! agents. The rest of the coordinator only ever sees this trait; whether a
//! runtime is a podman container or a local child process is decided once,
//! by configuration, and never branched on elsewhere.

pub mod podman;
pub mod process;

pub use podman::PodmanProvisioner;
pub use process::ProcessProvisioner;

use async_trait::async_trait;
use uuid::Uuid;

use gantry_core::dto::execution::RunConfiguration;
use gantry_core::error::ProvisionError;

/// Backend that creates and destroys agent runtimes
#[async_trait]
pub trait RuntimeProvisioner: Send + Sync {
    /// Provision `replicas` isolated runtimes from the shared configuration
    /// and return their identifiers.
    ///
    /// All-or-nothing: when some runtimes start and a later one fails, the
    /// started ones are torn down again and a typed error is returned. A
    /// short success list is never returned.
    async fn create_and_start(
        &self,
        execution_id: Uuid,
        configuration: &RunConfiguration,
        replicas: u32,
    ) -> Result<Vec<String>, ProvisionError>;

    /// Non-blocking liveness probe. A runtime that no longer exists reports
    /// `true` (not running) rather than an error.
    async fn is_stopped(&self, runtime_id: &str) -> bool;

    /// Best-effort, idempotent destruction of every runtime and transient
    /// artifact tied to the execution. Safe to call repeatedly and on
    /// already-cleaned executions.
    async fn cleanup_all_by_execution(&self, execution_id: Uuid) -> Result<(), ProvisionError>;

    /// Identifiers of all runtimes currently known for the execution
    async fn list_container_ids(&self, execution_id: Uuid) -> Result<Vec<String>, ProvisionError>;
}
