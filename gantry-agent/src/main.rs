//! Gantry Agent
//!
//! The ephemeral worker hosted by one provisioned runtime. It polls the
//! coordinator via heartbeats, runs the benchmark tool against assigned
//! test batches, submits results with bounded backoff, and shuts down when
//! told to terminate.

mod config;
mod runner;
mod worker;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gantry_client::CoordinatorClient;

use crate::config::Config;
use crate::worker::Worker;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gantry_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Gantry Agent");

    let config = Config::from_env().context("Failed to load agent configuration")?;
    info!(
        "Loaded configuration: agent_id={}, coordinator_url={}",
        config.agent_id, config.coordinator_url
    );

    let client = Arc::new(CoordinatorClient::with_timeout(
        config.coordinator_url.clone(),
        config.request_timeout,
    ));

    let worker = Worker::new(config, client);
    worker.run().await?;

    info!("Agent stopped");
    Ok(())
}
