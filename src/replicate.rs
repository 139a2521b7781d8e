//! Cross-region copy of a single object, with bounded retry and
//! classification. Failures never escape this boundary; every request comes
//! back as a `ReplicationOutcome`.
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config;
use crate::model::{ErrorKind, OutcomeStatus, ReplicationOutcome, ReplicationRequest};

#[derive(Debug, Clone, Error)]
pub enum CopyError {
    #[error("source object not found: {0}")]
    NotFound(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("throttled by storage backend: {0}")]
    Throttled(String),
    #[error("copy timed out: {0}")]
    Timeout(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("copy failed: {0}")]
    Other(String),
}

impl CopyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CopyError::NotFound(_) => ErrorKind::NotFound,
            CopyError::AccessDenied(_) => ErrorKind::AccessDenied,
            CopyError::Throttled(_) => ErrorKind::Throttled,
            CopyError::Timeout(_) => ErrorKind::Timeout,
            CopyError::Transport(_) | CopyError::Other(_) => ErrorKind::Unknown,
        }
    }

    /// Transient failures are retried; non-transient ones are classified
    /// immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CopyError::Throttled(_) | CopyError::Timeout(_) | CopyError::Transport(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyResult {
    pub etag: Option<String>,
}

/// Storage seam. The real implementation does a server-side copy; tests
/// inject recording fakes.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn copy_object(
        &self,
        source_bucket: &str,
        object_key: &str,
        destination_bucket: &str,
    ) -> Result<CopyResult, CopyError>;
}

/// Sleep seam so retry tests run without real delay.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

pub struct Replicator {
    store: Arc<dyn ObjectStore>,
    sleeper: Arc<dyn Sleeper>,
    destination_bucket: String,
    max_retries: u32,
    retry_backoff: Duration,
    copy_timeout: Duration,
}

impl Replicator {
    pub fn new(store: Arc<dyn ObjectStore>, destination_bucket: String) -> Self {
        Self {
            store,
            sleeper: Arc::new(TokioSleeper),
            destination_bucket,
            max_retries: 2,
            retry_backoff: Duration::from_millis(200),
            copy_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(cfg: &config::Replication, store: Arc<dyn ObjectStore>) -> Self {
        Self::new(store, cfg.destination_bucket.clone())
            .with_retry(cfg.max_retries, cfg.retry_backoff())
            .with_copy_timeout(cfg.copy_timeout())
    }

    pub fn with_retry(mut self, max_retries: u32, retry_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff = retry_backoff;
        self
    }

    pub fn with_copy_timeout(mut self, copy_timeout: Duration) -> Self {
        self.copy_timeout = copy_timeout;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn destination_bucket(&self) -> &str {
        &self.destination_bucket
    }

    /// Copy one object, retrying transient failures up to the configured
    /// bound. `deadline`, when given, caps every attempt so one slow object
    /// cannot starve the rest of the invocation. Duplicate requests are safe:
    /// the destination is overwritten with the same bytes.
    pub async fn replicate(
        &self,
        request: &ReplicationRequest,
        deadline: Option<Instant>,
    ) -> ReplicationOutcome {
        let started = Instant::now();
        let mut attempts: u32 = 0;

        let (status, error_detail) = loop {
            attempts += 1;
            let budget = match self.attempt_budget(deadline) {
                Some(budget) => budget,
                None => {
                    break (
                        OutcomeStatus::Failure(ErrorKind::Timeout),
                        Some("invocation time budget exhausted before copy".to_string()),
                    )
                }
            };

            let copy = self.store.copy_object(
                &request.source_bucket,
                &request.object_key,
                &self.destination_bucket,
            );
            let err = match timeout(budget, copy).await {
                Ok(Ok(copied)) => {
                    info!(
                        key = %request.object_key,
                        source = %request.source_bucket,
                        etag = ?copied.etag,
                        attempt = attempts,
                        "copy succeeded"
                    );
                    break (OutcomeStatus::Success, None);
                }
                Ok(Err(err)) => err,
                Err(_) => CopyError::Timeout(format!("attempt exceeded {}ms", budget.as_millis())),
            };

            if err.is_transient() && attempts <= self.max_retries {
                warn!(
                    key = %request.object_key,
                    attempt = attempts,
                    %err,
                    "transient copy failure; retrying"
                );
                self.sleeper.sleep(self.retry_backoff * attempts).await;
                continue;
            }

            warn!(
                key = %request.object_key,
                attempt = attempts,
                kind = err.kind().as_str(),
                %err,
                "copy failed"
            );
            break (OutcomeStatus::Failure(err.kind()), Some(err.to_string()));
        };

        ReplicationOutcome {
            request: request.clone(),
            status,
            error_detail,
            destination_bucket: self.destination_bucket.clone(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            attempts,
        }
    }

    fn attempt_budget(&self, deadline: Option<Instant>) -> Option<Duration> {
        match deadline {
            None => Some(self.copy_timeout),
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    None
                } else {
                    Some(remaining.min(self.copy_timeout))
                }
            }
        }
    }
}
