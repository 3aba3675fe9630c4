use crate::{
    models::TaskOutcome,
    orchestrator::rpc::{SubmitResultRequest, SubmitResultResponse, TaskPayload, TaskResultResponse},
    Result,
};
use reqwest::StatusCode;

/// RPC client for the orchestrator's `/internal` routes.
///
/// One instance is shared by every worker fiber; `reqwest::Client` is
/// internally reference-counted and safe for concurrent use.
#[derive(Clone)]
pub struct OrchestratorClient {
    http: reqwest::Client,
    base_url: String,
}

impl OrchestratorClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Lease the next ready task; `None` when the queue is empty.
    pub async fn get_task(&self) -> Result<Option<TaskPayload>> {
        let response = self
            .http
            .get(format!("{}/internal/task", self.base_url))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let payload = response.error_for_status()?.json().await?;
        Ok(Some(payload))
    }

    /// Report a task outcome; returns the orchestrator's success flag.
    pub async fn submit_result(&self, task_id: &str, outcome: TaskOutcome) -> Result<bool> {
        let request = SubmitResultRequest {
            task_id: task_id.to_string(),
            outcome,
        };
        let response: SubmitResultResponse = self
            .http
            .post(format!("{}/internal/task/result", self.base_url))
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.success)
    }

    /// A completed dependency's result; `None` while it is still pending
    /// or in flight.
    pub async fn get_task_result(&self, task_id: &str) -> Result<Option<f64>> {
        let response: TaskResultResponse = self
            .http
            .get(format!("{}/internal/task/{}/result", self.base_url, task_id))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(if response.task_exists {
            response.result
        } else {
            None
        })
    }
}
