//! Shared application state
//!
//! Everything a request handler or background watch needs, behind Arcs so
//! the state can be cloned into spawned tasks. The liveness map lives here,
//! scoped to the coordinator process, with entries inserted at execution
//! start and dropped at cleanup.

use std::sync::Arc;

use crate::config::Config;
use crate::provisioner::RuntimeProvisioner;
use crate::service::liveness::LivenessInspector;
use crate::storage::{AgentStore, BatchStore, ExecutionStore, ResultStore};

/// Shared state for API handlers and background tasks
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub executions: Arc<dyn ExecutionStore>,
    pub agents: Arc<dyn AgentStore>,
    pub batches: Arc<dyn BatchStore>,
    pub results: Arc<dyn ResultStore>,
    pub provisioner: Arc<dyn RuntimeProvisioner>,
    pub liveness: Arc<LivenessInspector>,
}
