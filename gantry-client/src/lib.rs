//! Gantry HTTP Client
//!
//! A typed HTTP client for the coordinator's agent-facing API: heartbeats,
//! the additional-data report, and result/log submission.
//!
//! The [`ControlPlane`] trait is the seam the agent worker is written
//! against, so the heartbeat loop can be exercised in tests with a scripted
//! fake instead of a live coordinator.
//!
//! # Example
//!
//! ```no_run
//! use gantry_client::CoordinatorClient;
//! use gantry_core::domain::agent::AgentState;
//! use gantry_core::dto::heartbeat::{ExecutionProgress, Heartbeat};
//!
//! #[tokio::main]
//! async fn main() -> gantry_client::Result<()> {
//!     let client = CoordinatorClient::new("http://localhost:8080");
//!
//!     let response = client
//!         .send_heartbeat(&Heartbeat {
//!             agent_id: "agent-1".to_string(),
//!             state: AgentState::Idle,
//!             sequence: 1,
//!             progress: ExecutionProgress::default(),
//!         })
//!         .await?;
//!
//!     println!("directive: {}", response.kind());
//!     Ok(())
//! }
//! ```

pub mod error;
mod heartbeat;
mod results;

// Re-export commonly used types
pub use error::{ClientError, Result};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;

use gantry_core::dto::agent::AgentData;
use gantry_core::dto::heartbeat::{Heartbeat, HeartbeatResponse};
use gantry_core::dto::result::{TestResultReport, ToolLogUpload};

/// Default timeout applied to every outbound request
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// The coordinator as seen from an agent
///
/// Every call carries the client's request timeout; expiry surfaces as
/// `ClientError::RequestFailed`, i.e. a transport failure, never as progress.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Send one heartbeat and receive the directive for this cycle
    async fn send_heartbeat(&self, heartbeat: &Heartbeat) -> Result<HeartbeatResponse>;

    /// Report agent metadata (version info), sent once at startup
    async fn report_agent_data(&self, agent_id: &str, data: &AgentData) -> Result<()>;

    /// Submit per-test outcomes to the results backend
    async fn submit_results(&self, report: &TestResultReport) -> Result<()>;

    /// Upload raw tool logs, best-effort
    async fn submit_logs(&self, upload: &ToolLogUpload) -> Result<()>;
}

/// HTTP client for the coordinator API
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    /// Base URL of the coordinator (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl CoordinatorClient {
    /// Create a new coordinator client with the default request timeout
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Create a new coordinator client with an explicit request timeout
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the coordinator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle an API response that returns no content
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}

#[async_trait]
impl ControlPlane for CoordinatorClient {
    async fn send_heartbeat(&self, heartbeat: &Heartbeat) -> Result<HeartbeatResponse> {
        CoordinatorClient::send_heartbeat(self, heartbeat).await
    }

    async fn report_agent_data(&self, agent_id: &str, data: &AgentData) -> Result<()> {
        CoordinatorClient::report_agent_data(self, agent_id, data).await
    }

    async fn submit_results(&self, report: &TestResultReport) -> Result<()> {
        CoordinatorClient::submit_results(self, report).await
    }

    async fn submit_logs(&self, upload: &ToolLogUpload) -> Result<()> {
        CoordinatorClient::submit_logs(self, upload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = CoordinatorClient::new("http://localhost:8080");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = CoordinatorClient::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_with_timeout() {
        let client =
            CoordinatorClient::with_timeout("http://localhost:8080", Duration::from_secs(5));
        assert_eq!(client.base_url(), "http://localhost:8080");
    }
}
