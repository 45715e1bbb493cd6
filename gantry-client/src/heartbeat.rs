//! Heartbeat and agent-metadata endpoints

use crate::CoordinatorClient;
use crate::error::Result;
use gantry_core::dto::agent::AgentData;
use gantry_core::dto::heartbeat::{Heartbeat, HeartbeatResponse};

impl CoordinatorClient {
    /// Send a heartbeat and receive the directive for this cycle
    ///
    /// The heartbeat carries the agent's current state, progress, and a
    /// monotonic sequence number. The coordinator answers every heartbeat
    /// with exactly one directive.
    ///
    /// # Arguments
    /// * `heartbeat` - The status report to send
    pub async fn send_heartbeat(&self, heartbeat: &Heartbeat) -> Result<HeartbeatResponse> {
        let url = format!("{}/api/heartbeat", self.base_url);
        let response = self.client.post(&url).json(heartbeat).send().await?;

        self.handle_response(response).await
    }

    /// Report agent metadata to the coordinator
    ///
    /// Sent once when the agent process starts. Failures are expected to be
    /// swallowed by the caller; the report is best-effort.
    ///
    /// # Arguments
    /// * `agent_id` - The reporting agent
    /// * `data` - Version info
    pub async fn report_agent_data(&self, agent_id: &str, data: &AgentData) -> Result<()> {
        let url = format!("{}/api/agents/{}/data", self.base_url, agent_id);
        let response = self.client.post(&url).json(data).send().await?;

        self.handle_empty_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::domain::agent::AgentState;
    use gantry_core::dto::heartbeat::ExecutionProgress;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_heartbeat_round_trip() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/heartbeat"))
            .and(body_partial_json(serde_json::json!({
                "agent_id": "agent-1",
                "state": "Idle",
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "directive": "wait"
                })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = CoordinatorClient::new(server.uri());
        let response = client
            .send_heartbeat(&Heartbeat {
                agent_id: "agent-1".to_string(),
                state: AgentState::Idle,
                sequence: 1,
                progress: ExecutionProgress::default(),
            })
            .await
            .unwrap();

        assert!(matches!(response, HeartbeatResponse::Wait));
    }

    #[tokio::test]
    async fn test_heartbeat_error_status_is_rejection() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/heartbeat"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = CoordinatorClient::new(server.uri());
        let err = client
            .send_heartbeat(&Heartbeat {
                agent_id: "agent-1".to_string(),
                state: AgentState::Busy,
                sequence: 2,
                progress: ExecutionProgress::default(),
            })
            .await
            .unwrap_err();

        assert!(err.is_rejection());
    }
}
