//! Minimal client for the hosting environment's invocation API: long-poll
//! for the next event, run the handler, post the result back.
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{error, info};

use crate::handler::Handler;

const API_VERSION: &str = "2018-06-01";

pub struct RuntimeClient {
    http: Client,
    base_url: String,
}

#[derive(Debug)]
pub struct Invocation {
    pub request_id: String,
    pub deadline: Option<Instant>,
    pub payload: Value,
}

impl RuntimeClient {
    /// The hosting environment advertises its API endpoint through
    /// `AWS_LAMBDA_RUNTIME_API`.
    pub fn from_env() -> Result<Self> {
        let host = std::env::var("AWS_LAMBDA_RUNTIME_API")
            .context("AWS_LAMBDA_RUNTIME_API is not set; use --event for a local run")?;
        Ok(Self::new(&host))
    }

    pub fn new(host: &str) -> Self {
        let http = Client::builder()
            .user_agent("bucket-replicator/0.1")
            .no_proxy()
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url: format!("http://{host}/{API_VERSION}/runtime"),
        }
    }

    /// Long-poll for the next invocation. No client-side timeout here: the
    /// API holds the connection open until an event arrives.
    pub async fn next_invocation(&self) -> Result<Invocation> {
        let res = self
            .http
            .get(format!("{}/invocation/next", self.base_url))
            .send()
            .await
            .context("failed to poll for next invocation")?;

        let request_id = res
            .headers()
            .get("Lambda-Runtime-Aws-Request-Id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| anyhow!("invocation response missing request id header"))?;
        let deadline = res
            .headers()
            .get("Lambda-Runtime-Deadline-Ms")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(deadline_from_epoch_ms);
        let payload = res
            .json::<Value>()
            .await
            .context("invocation payload is not JSON")?;

        Ok(Invocation { request_id, deadline, payload })
    }

    pub async fn post_response(&self, request_id: &str, body: &Value) -> Result<()> {
        let res = self
            .http
            .post(format!("{}/invocation/{}/response", self.base_url, request_id))
            .json(body)
            .send()
            .await
            .context("failed to post invocation response")?;
        if !res.status().is_success() {
            return Err(anyhow!("invocation API rejected response: {}", res.status()));
        }
        Ok(())
    }

    pub async fn post_error(&self, request_id: &str, error_type: &str, message: &str) -> Result<()> {
        let body = json!({ "errorType": error_type, "errorMessage": message });
        let res = self
            .http
            .post(format!("{}/invocation/{}/error", self.base_url, request_id))
            .header("Lambda-Runtime-Function-Error-Type", error_type)
            .json(&body)
            .send()
            .await
            .context("failed to post invocation error")?;
        if !res.status().is_success() {
            return Err(anyhow!("invocation API rejected error report: {}", res.status()));
        }
        Ok(())
    }
}

/// The deadline header is wall-clock epoch milliseconds; convert it to a
/// monotonic instant for budget math.
fn deadline_from_epoch_ms(deadline_ms: i64) -> Option<Instant> {
    let now_ms = Utc::now().timestamp_millis();
    let remaining = deadline_ms.saturating_sub(now_ms);
    if remaining <= 0 {
        return Some(Instant::now());
    }
    Instant::now().checked_add(Duration::from_millis(remaining as u64))
}

/// Poll-handle-respond loop. A malformed payload is reported as an
/// invocation error so the hosting environment can apply its own retry
/// policy on the whole event; everything else completes normally.
pub async fn run(handler: &Handler, client: &RuntimeClient) -> Result<()> {
    info!("starting invocation poll loop");
    loop {
        let invocation = match client.next_invocation().await {
            Ok(invocation) => invocation,
            Err(err) => {
                error!(?err, "invocation poll failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        match handler
            .handle(&invocation.request_id, &invocation.payload, invocation.deadline)
            .await
        {
            Ok(summary) => {
                if let Err(err) = client
                    .post_response(&invocation.request_id, &summary.response_body())
                    .await
                {
                    error!(?err, request_id = %invocation.request_id, "failed to report response");
                }
            }
            Err(err) => {
                if let Err(post_err) = client
                    .post_error(&invocation.request_id, "MalformedEventError", &err.to_string())
                    .await
                {
                    error!(?post_err, request_id = %invocation.request_id, "failed to report error");
                }
            }
        }
    }
}
