//! Heartbeat worker loop
//!
//! The agent is a single logical control loop: build a heartbeat from the
//! current in-memory state, send it, dispatch on the returned directive,
//! sleep, repeat. At most one local tool run is ever in flight; the
//! completion flag is checked before a new run starts.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

use gantry_client::ControlPlane;
use gantry_core::domain::agent::AgentState;
use gantry_core::domain::test::TestCase;
use gantry_core::dto::agent::AgentData;
use gantry_core::dto::heartbeat::{ExecutionProgress, Heartbeat, HeartbeatResponse};

use crate::config::Config;
use crate::runner;

/// State shared between the heartbeat loop and the running tool task
pub(crate) struct Shared {
    state: Mutex<AgentState>,
    run_in_flight: AtomicBool,
    completed: AtomicU32,
    total: AtomicU32,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(AgentState::Idle),
            run_in_flight: AtomicBool::new(false),
            completed: AtomicU32::new(0),
            total: AtomicU32::new(0),
        }
    }

    pub(crate) fn state(&self) -> AgentState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn set_state(&self, next: AgentState) {
        let mut state = self.state.lock().unwrap();
        debug!("Agent state {} -> {}", *state, next);
        *state = next;
    }

    pub(crate) fn add_completed(&self, count: u32) {
        self.completed.fetch_add(count, Ordering::SeqCst);
    }

    fn progress(&self) -> ExecutionProgress {
        ExecutionProgress {
            completed: self.completed.load(Ordering::SeqCst),
            total: self.total.load(Ordering::SeqCst),
        }
    }
}

/// What the loop does after handling one directive
pub(crate) enum LoopAction {
    KeepRunning,
    Shutdown,
}

/// The agent worker
pub struct Worker<C: ControlPlane> {
    config: Config,
    client: Arc<C>,
    shared: Arc<Shared>,
    sequence: AtomicU64,
}

impl<C: ControlPlane + 'static> Worker<C> {
    /// Creates a new worker, initially idle
    pub fn new(config: Config, client: Arc<C>) -> Self {
        Self {
            config,
            client,
            shared: Arc::new(Shared::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Runs the heartbeat loop until a terminate directive arrives
    pub async fn run(&self) -> anyhow::Result<()> {
        info!(
            "Agent {} starting (execution {}, heartbeat every {:?})",
            self.config.agent_id, self.config.execution_id, self.config.heartbeat_interval
        );

        // Best-effort additional data report; a failure here is retried
        // implicitly by the protocol, not by us
        let data = AgentData {
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        if let Err(e) = self
            .client
            .report_agent_data(&self.config.agent_id, &data)
            .await
        {
            warn!("Failed to send additional data report: {}", e);
        }

        let mut ticker = time::interval(self.config.heartbeat_interval);

        loop {
            ticker.tick().await;

            let heartbeat = self.build_heartbeat();
            debug!(
                "Sending heartbeat {} (state {})",
                heartbeat.sequence, heartbeat.state
            );

            match self.client.send_heartbeat(&heartbeat).await {
                Ok(response) => {
                    if let LoopAction::Shutdown = self.handle_directive(response) {
                        break;
                    }
                }
                Err(e) => {
                    // The next scheduled heartbeat is the retry
                    warn!("Heartbeat failed: {}", e);
                }
            }
        }

        info!("Terminate directive received, shutting down");
        Ok(())
    }

    fn build_heartbeat(&self) -> Heartbeat {
        Heartbeat {
            agent_id: self.config.agent_id.clone(),
            state: self.shared.state(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            progress: self.shared.progress(),
        }
    }

    /// Dispatch one directive; exhaustive so a new directive cannot be
    /// silently ignored
    pub(crate) fn handle_directive(&self, response: HeartbeatResponse) -> LoopAction {
        match response {
            HeartbeatResponse::NewBatch { batch_id, tests } => {
                self.start_batch(batch_id, tests);
                LoopAction::KeepRunning
            }
            HeartbeatResponse::Wait => {
                self.shared.set_state(AgentState::Idle);
                LoopAction::KeepRunning
            }
            HeartbeatResponse::Continue => LoopAction::KeepRunning,
            HeartbeatResponse::Terminate => LoopAction::Shutdown,
        }
    }

    /// Start the assigned batch unless a run is already in flight
    fn start_batch(&self, batch_id: Uuid, tests: Vec<TestCase>) {
        if self.shared.run_in_flight.swap(true, Ordering::SeqCst) {
            warn!(
                "Batch {} assigned while a run is already in flight, ignoring",
                batch_id
            );
            return;
        }

        info!("Starting batch {} with {} test(s)", batch_id, tests.len());
        self.shared.set_state(AgentState::Busy);
        self.shared
            .total
            .fetch_add(tests.len() as u32, Ordering::SeqCst);

        let config = self.config.clone();
        let client = Arc::clone(&self.client);
        let shared = Arc::clone(&self.shared);

        tokio::spawn(async move {
            runner::run_batch(&config, client.as_ref(), &shared, batch_id, tests).await;
            shared.run_in_flight.store(false, Ordering::SeqCst);
        });
    }
}
