//! Gantry Coordinator
//!
//! The control-plane service for benchmark executions. It provisions agent
//! runtimes, answers agent heartbeats with work assignments, watches for
//! silent or misbehaving agents, and converges every execution to a
//! terminal status before tearing its runtimes down.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod db;
pub mod provisioner;
pub mod service;
pub mod state;
pub mod storage;

#[cfg(test)]
mod testutil;

use crate::config::{Config, ProvisionerBackend, StorageBackend};
use crate::provisioner::{PodmanProvisioner, ProcessProvisioner, RuntimeProvisioner};
use crate::service::liveness::{self, LivenessInspector};
use crate::state::AppState;
use crate::storage::{AgentStore, BatchStore, ExecutionStore, MemoryStore, PostgresStore, ResultStore};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gantry_coordinator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Gantry Coordinator...");

    let config = Config::from_env().expect("Invalid configuration");

    let (executions, agents, batches, results) = build_storage(&config).await;
    let runtime_provisioner = build_provisioner(&config).await;

    let app_state = AppState {
        config: Arc::new(config.clone()),
        executions,
        agents,
        batches,
        results,
        provisioner: runtime_provisioner,
        liveness: Arc::new(LivenessInspector::new()),
    };

    // Background staleness watch over the whole fleet
    liveness::spawn_staleness_scan(app_state.clone());

    // Build router with all API endpoints
    let app = api::create_router(app_state);

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}

type Stores = (
    Arc<dyn ExecutionStore>,
    Arc<dyn AgentStore>,
    Arc<dyn BatchStore>,
    Arc<dyn ResultStore>,
);

async fn build_storage(config: &Config) -> Stores {
    match config.storage_backend {
        StorageBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .expect("DATABASE_URL is validated for the postgres backend");

            tracing::info!("Connecting to database...");

            let pool = db::create_pool(database_url)
                .await
                .expect("Failed to create database pool");

            db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");

            let store = Arc::new(PostgresStore::new(pool));
            (store.clone(), store.clone(), store.clone(), store)
        }
        StorageBackend::Memory => {
            tracing::info!("Using in-memory storage");
            let store = Arc::new(MemoryStore::new());
            (store.clone(), store.clone(), store.clone(), store)
        }
    }
}

async fn build_provisioner(config: &Config) -> Arc<dyn RuntimeProvisioner> {
    match config.provisioner_backend {
        ProvisionerBackend::Podman => {
            PodmanProvisioner::check_available()
                .await
                .expect("Podman is not available");
            Arc::new(PodmanProvisioner::new(config.advertise_url.clone()))
        }
        ProvisionerBackend::Process => {
            tracing::info!("Using process provisioner ({})", config.agent_binary);
            Arc::new(ProcessProvisioner::new(
                config.agent_binary.clone(),
                config.advertise_url.clone(),
            ))
        }
    }
}
