//! Per-invocation orchestration: decode, replicate each record
//! independently, then always notify.
use futures::{stream, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::event::{self, DecodedRecord, MalformedEventError, MalformedRecord};
use crate::model::{ErrorKind, OutcomeStatus, ReplicationOutcome, ReplicationRequest};
use crate::notify::{build_notification, NotificationChannel};
use crate::replicate::{ObjectStore, Replicator};

#[derive(Debug, Error)]
pub enum HandlerError {
    /// The entire payload was unparseable; no requests were extracted. The
    /// hosting environment may retry the whole event.
    #[error(transparent)]
    MalformedEvent(#[from] MalformedEventError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InvocationState {
    Received,
    Decoding,
    Replicating,
    Notifying,
    Completed,
    Failed,
}

impl InvocationState {
    fn as_str(&self) -> &'static str {
        match self {
            InvocationState::Received => "received",
            InvocationState::Decoding => "decoding",
            InvocationState::Replicating => "replicating",
            InvocationState::Notifying => "notifying",
            InvocationState::Completed => "completed",
            InvocationState::Failed => "failed",
        }
    }
}

/// What one invocation produced. Owned exclusively by the caller; no
/// component keeps a reference to the outcomes after notification.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationSummary {
    pub outcomes: Vec<ReplicationOutcome>,
    /// False when the report could not be delivered; replication outcomes
    /// stand regardless.
    pub notify_delivered: bool,
}

impl InvocationSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn response_body(&self) -> Value {
        json!({
            "statusCode": 200,
            "body": {
                "message": "replication completed",
                "succeeded": self.succeeded(),
                "failed": self.failed(),
                "notifyDelivered": self.notify_delivered,
            }
        })
    }
}

pub struct Handler {
    replicator: Replicator,
    channel: Arc<dyn NotificationChannel>,
    max_parallel: usize,
    notify_reserve: Duration,
    publish_timeout: Duration,
}

impl Handler {
    pub fn new(replicator: Replicator, channel: Arc<dyn NotificationChannel>) -> Self {
        Self {
            replicator,
            channel,
            max_parallel: 2,
            notify_reserve: Duration::from_secs(2),
            publish_timeout: Duration::from_secs(5),
        }
    }

    pub fn from_config(
        cfg: &Config,
        store: Arc<dyn ObjectStore>,
        channel: Arc<dyn NotificationChannel>,
    ) -> Self {
        let replicator = Replicator::from_config(&cfg.replication, store);
        Self {
            replicator,
            channel,
            max_parallel: cfg.replication.max_parallel_copies,
            notify_reserve: cfg.notify.notify_reserve(),
            publish_timeout: cfg.notify.publish_timeout(),
        }
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.clamp(1, 4);
        self
    }

    /// Run one invocation. Returns `Err` only when the whole payload is
    /// unparseable; partial or even total replication failure is still a
    /// completed invocation with every failure classified and reported.
    #[instrument(skip_all, fields(invocation_id = %invocation_id))]
    pub async fn handle(
        &self,
        invocation_id: &str,
        payload: &Value,
        deadline: Option<Instant>,
    ) -> Result<InvocationSummary, HandlerError> {
        let mut state = InvocationState::Received;
        info!(state = state.as_str(), "invocation received");

        state = InvocationState::Decoding;
        debug!(state = state.as_str(), "decoding event payload");
        let records = match event::decode(payload) {
            Ok(records) => records,
            Err(err) => {
                state = InvocationState::Failed;
                error!(state = state.as_str(), %err, "no requests extracted; failing invocation");
                return Err(HandlerError::MalformedEvent(err));
            }
        };

        state = InvocationState::Replicating;
        debug!(state = state.as_str(), records = records.len(), "replicating records");

        // Leave a fixed slice of the deadline for the notify step so the
        // report goes out even when copies run long.
        let copy_deadline =
            deadline.map(|d| d.checked_sub(self.notify_reserve).unwrap_or_else(Instant::now));
        let destination = self.replicator.destination_bucket().to_string();
        let replicator = &self.replicator;

        // buffered() keeps completion results in record order.
        let outcomes: Vec<ReplicationOutcome> = stream::iter(records)
            .map(|record| {
                let destination = destination.clone();
                async move {
                    match record {
                        DecodedRecord::Request(request) => {
                            replicator.replicate(&request, copy_deadline).await
                        }
                        DecodedRecord::Malformed(bad) => malformed_outcome(bad, &destination),
                    }
                }
            })
            .buffered(self.max_parallel.max(1))
            .collect()
            .await;

        for outcome in &outcomes {
            match &outcome.status {
                OutcomeStatus::Success => info!(
                    key = %outcome.request.object_key,
                    source = %outcome.request.source_bucket,
                    destination = %outcome.destination_bucket,
                    elapsed_ms = outcome.elapsed_ms,
                    attempts = outcome.attempts,
                    "replication succeeded"
                ),
                OutcomeStatus::Failure(kind) => warn!(
                    key = %outcome.request.object_key,
                    source = %outcome.request.source_bucket,
                    kind = kind.as_str(),
                    detail = ?outcome.error_detail,
                    attempts = outcome.attempts,
                    "replication failed"
                ),
            }
        }

        // Notifying is entered unconditionally: operators hear about total
        // failure too.
        state = InvocationState::Notifying;
        debug!(state = state.as_str(), "sending outcome notification");
        let (subject, body) = build_notification(&outcomes, &destination);
        info!(%subject, outcomes = outcomes.len(), "publishing replication report");
        let notify_delivered =
            match tokio::time::timeout(self.publish_timeout, self.channel.publish(&subject, &body))
                .await
            {
                Ok(Ok(message_id)) => {
                    info!(%message_id, "notification published");
                    true
                }
                Ok(Err(err)) => {
                    warn!(?err, "failed to publish notification; replication outcomes stand");
                    false
                }
                Err(_) => {
                    warn!("notification publish timed out; replication outcomes stand");
                    false
                }
            };

        state = InvocationState::Completed;
        info!(
            state = state.as_str(),
            succeeded = outcomes.iter().filter(|o| o.is_success()).count(),
            failed = outcomes.iter().filter(|o| !o.is_success()).count(),
            notify_delivered,
            "invocation completed"
        );

        Ok(InvocationSummary { outcomes, notify_delivered })
    }
}

fn malformed_outcome(bad: MalformedRecord, destination_bucket: &str) -> ReplicationOutcome {
    ReplicationOutcome {
        request: ReplicationRequest {
            source_bucket: String::new(),
            object_key: format!("<record {}>", bad.index),
            size_bytes: None,
            event_time: None,
        },
        status: OutcomeStatus::Failure(ErrorKind::MalformedRecord),
        error_detail: Some(bad.reason),
        destination_bucket: destination_bucket.to_string(),
        elapsed_ms: 0,
        attempts: 0,
    }
}
