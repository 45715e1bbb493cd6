//! Agent configuration
//!
//! Defines all configurable parameters for the agent worker including the
//! heartbeat cadence, the benchmark tool invocation, and the result
//! submission retry policy.

use std::time::Duration;
use uuid::Uuid;

/// Agent configuration
///
/// All timeouts and intervals are configurable to allow tuning for
/// different deployment scenarios (dev vs prod, fast vs slow networks).
#[derive(Debug, Clone)]
pub struct Config {
    /// Identifier of this agent; matches the provisioned runtime id
    pub agent_id: String,

    /// Execution this agent belongs to
    pub execution_id: Uuid,

    /// Coordinator base URL (e.g., "http://localhost:8080")
    pub coordinator_url: String,

    /// How often to send a heartbeat
    pub heartbeat_interval: Duration,

    /// Benchmark tool command line; test names and arguments are appended
    pub tool_command: String,

    /// Maximum time one tool run may take
    pub tool_timeout: Duration,

    /// Number of result-submission attempts before giving up
    pub submit_attempts: u32,

    /// Initial wait between submission attempts, doubled after each failure
    pub submit_backoff: Duration,

    /// Timeout applied to every outbound HTTP request
    pub request_timeout: Duration,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(
        agent_id: String,
        execution_id: Uuid,
        coordinator_url: String,
        tool_command: String,
    ) -> Self {
        Self {
            agent_id,
            execution_id,
            coordinator_url,
            heartbeat_interval: Duration::from_secs(5),
            tool_command,
            tool_timeout: Duration::from_secs(300),
            submit_attempts: 5,
            submit_backoff: Duration::from_millis(500),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - AGENT_ID (required)
    /// - EXECUTION_ID (required)
    /// - COORDINATOR_URL (required)
    /// - TOOL_COMMAND (required)
    /// - HEARTBEAT_INTERVAL_MS (optional, default: 5000)
    /// - TOOL_TIMEOUT_SECS (optional, default: 300)
    /// - SUBMIT_ATTEMPTS (optional, default: 5)
    /// - SUBMIT_BACKOFF_MS (optional, default: 500)
    /// - REQUEST_TIMEOUT_SECS (optional, default: 30)
    pub fn from_env() -> anyhow::Result<Self> {
        let agent_id = std::env::var("AGENT_ID")
            .map_err(|_| anyhow::anyhow!("AGENT_ID environment variable not set"))?;

        let execution_id = std::env::var("EXECUTION_ID")
            .map_err(|_| anyhow::anyhow!("EXECUTION_ID environment variable not set"))?
            .parse::<Uuid>()
            .map_err(|e| anyhow::anyhow!("EXECUTION_ID is not a valid UUID: {}", e))?;

        let coordinator_url = std::env::var("COORDINATOR_URL")
            .map_err(|_| anyhow::anyhow!("COORDINATOR_URL environment variable not set"))?;

        let tool_command = std::env::var("TOOL_COMMAND")
            .map_err(|_| anyhow::anyhow!("TOOL_COMMAND environment variable not set"))?;

        let mut config = Self::new(agent_id, execution_id, coordinator_url, tool_command);

        if let Some(millis) = env_parse("HEARTBEAT_INTERVAL_MS") {
            config.heartbeat_interval = Duration::from_millis(millis);
        }
        if let Some(secs) = env_parse("TOOL_TIMEOUT_SECS") {
            config.tool_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = env_parse("SUBMIT_ATTEMPTS") {
            config.submit_attempts = attempts as u32;
        }
        if let Some(millis) = env_parse("SUBMIT_BACKOFF_MS") {
            config.submit_backoff = Duration::from_millis(millis);
        }
        if let Some(secs) = env_parse("REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.agent_id.is_empty() {
            anyhow::bail!("agent_id cannot be empty");
        }

        if !self.coordinator_url.starts_with("http://")
            && !self.coordinator_url.starts_with("https://")
        {
            anyhow::bail!("coordinator_url must start with http:// or https://");
        }

        if self.tool_command.trim().is_empty() {
            anyhow::bail!("tool_command cannot be empty");
        }

        if self.heartbeat_interval.is_zero() {
            anyhow::bail!("heartbeat_interval must be greater than 0");
        }

        if self.submit_attempts == 0 {
            anyhow::bail!("submit_attempts must be greater than 0");
        }

        Ok(())
    }
}

fn env_parse(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config::new(
            "agent-1".to_string(),
            Uuid::new_v4(),
            "http://localhost:8080".to_string(),
            "benchtool --json".to_string(),
        )
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = test_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.submit_attempts, 5);
    }

    #[test]
    fn test_config_validation() {
        let mut config = test_config();
        config.agent_id = String::new();
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.coordinator_url = "not-a-url".to_string();
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.tool_command = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.submit_attempts = 0;
        assert!(config.validate().is_err());
    }
}
