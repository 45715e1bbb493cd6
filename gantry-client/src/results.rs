//! Result and log submission endpoints

use crate::CoordinatorClient;
use crate::error::Result;
use gantry_core::dto::result::{TestResultReport, ToolLogUpload};

impl CoordinatorClient {
    /// Submit per-test outcomes to the results backend
    ///
    /// The contract is "OK-class status means accepted". Callers own the
    /// retry policy; this method makes exactly one attempt.
    ///
    /// # Arguments
    /// * `report` - Outcomes for one batch
    pub async fn submit_results(&self, report: &TestResultReport) -> Result<()> {
        let url = format!("{}/api/results", self.base_url);
        let response = self.client.post(&url).json(report).send().await?;

        self.handle_empty_response(response).await
    }

    /// Upload raw tool logs
    ///
    /// Sent after result submission regardless of its outcome. Failures are
    /// logged by the caller, never escalated.
    ///
    /// # Arguments
    /// * `upload` - Combined tool output for one run
    pub async fn submit_logs(&self, upload: &ToolLogUpload) -> Result<()> {
        let url = format!("{}/api/results/logs", self.base_url);
        let response = self.client.post(&url).json(upload).send().await?;

        self.handle_empty_response(response).await
    }
}
