use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::jobs::{AcceptTaskRequest, JobKind};

/// Timeout for a task submission to the inner gateway.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TaskSendError {
    #[error("failed to serialize job payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to send task to the inner gateway: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("the inner gateway rejected the task with status {0}")]
    Rejected(reqwest::StatusCode),
}

/// Client side of the inner/outer split.
///
/// The outer gateway holds no cluster credentials; every mutating job it
/// wants executed is posted to the inner gateway's accept endpoint. The
/// handlers treat a failed send as recoverable: the persistence write
/// already happened and the audit/reconcile loops converge the rest.
#[derive(Clone)]
pub struct TaskSender {
    endpoint: String,
    client: reqwest::Client,
}

impl TaskSender {
    /// Creates a sender targeting the inner gateway base URL, e.g.
    /// `http://control-plane-inner.console.svc.cluster.local:9901`.
    pub fn new(inner_base_url: &str) -> Self {
        Self {
            endpoint: format!("{}/api/acceptTask", inner_base_url.trim_end_matches('/')),
            client: reqwest::Client::builder()
                .timeout(SEND_TIMEOUT)
                .build()
                .expect("reqwest client construction cannot fail with static options"),
        }
    }

    /// Serializes the payload and posts it to the inner gateway.
    pub async fn send<P: Serialize>(&self, kind: JobKind, payload: &P) -> Result<(), TaskSendError> {
        let request = AcceptTaskRequest {
            task_type: kind,
            timestamp: chrono::Utc::now().timestamp(),
            data: serde_json::to_value(payload)?,
        };

        let response = self.client.post(&self.endpoint).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(TaskSendError::Rejected(response.status()));
        }

        Ok(())
    }

    /// [`TaskSender::send`] for call sites that must not fail the request:
    /// logs and swallows the error.
    pub async fn send_or_log<P: Serialize>(&self, kind: JobKind, payload: &P) {
        if let Err(e) = self.send(kind, payload).await {
            warn!(task_type = %kind, "failed to submit task, waiting for audit to converge: {e}");
        }
    }
}
