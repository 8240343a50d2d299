//! Outbound webhook invocation of a worker.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};

/// Payload POSTed to a worker's trigger URL. The worker reports completion
/// back through `queue_url`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerInvocation {
    pub queue_item_id: i64,
    pub queue_url: String,
    pub worker_name: String,
}

#[async_trait]
pub trait WorkerInvoker: Send + Sync {
    async fn invoke(&self, trigger_url: &str, payload: &WorkerInvocation) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct HttpWorkerInvoker {
    http: Client,
}

impl HttpWorkerInvoker {
    /// The timeout bounds how long a dispatch tick can stall on one worker;
    /// the original had none and a hung call stalled dispatch indefinitely.
    pub fn new(timeout: Duration) -> Self {
        let http = Client::builder()
            .user_agent("muse-queue/0.1")
            .timeout(timeout)
            .build()
            .expect("reqwest client");
        Self { http }
    }
}

#[async_trait]
impl WorkerInvoker for HttpWorkerInvoker {
    async fn invoke(&self, trigger_url: &str, payload: &WorkerInvocation) -> Result<()> {
        let res = self
            .http
            .post(trigger_url)
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::Invocation(e.to_string()))?;

        let status = res.status();
        if status.as_u16() >= 400 {
            let body = res.text().await.unwrap_or_default();
            warn!(%status, worker = %payload.worker_name, "worker rejected invocation");
            return Err(Error::Invocation(format!("worker returned {status}: {body}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_uses_wire_field_names() {
        let payload = WorkerInvocation {
            queue_item_id: 7,
            queue_url: "http://localhost:4000/api/queue".into(),
            worker_name: "W1".into(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["queueItemId"], 7);
        assert_eq!(json["queueUrl"], "http://localhost:4000/api/queue");
        assert_eq!(json["workerName"], "W1");
    }
}
