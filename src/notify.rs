//! Outcome notification: one message per invocation summarizing every
//! object's fate.
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_sns::Client;
use std::fmt::Write as _;

use crate::model::{OutcomeStatus, ReplicationOutcome};

// SNS rejects subjects over 100 characters.
const MAX_SUBJECT_CHARS: usize = 100;

/// Fan-out channel seam. The real implementation publishes to an SNS topic;
/// tests inject recording fakes.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Returns the channel's message id for the audit log.
    async fn publish(&self, subject: &str, body: &str) -> Result<String>;
}

pub struct SnsChannel {
    client: Client,
    topic_arn: String,
}

impl SnsChannel {
    pub fn new(client: Client, topic_arn: String) -> Self {
        Self { client, topic_arn }
    }
}

#[async_trait]
impl NotificationChannel for SnsChannel {
    async fn publish(&self, subject: &str, body: &str) -> Result<String> {
        let response = self
            .client
            .publish()
            .topic_arn(&self.topic_arn)
            .subject(subject)
            .message(body)
            .send()
            .await
            .context("failed to publish to notification topic")?;
        Ok(response.message_id().unwrap_or_default().to_string())
    }
}

/// Build the (subject, body) pair for one invocation's ordered outcomes.
/// Pure so the informational contract is testable without a channel.
pub fn build_notification(
    outcomes: &[ReplicationOutcome],
    destination_bucket: &str,
) -> (String, String) {
    let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
    let failed = outcomes.len() - succeeded;

    let subject = if failed == 0 {
        format!("Backup Success - {} object(s) replicated", succeeded)
    } else {
        format!(
            "Backup FAILURE - Action Required: {} of {} object(s) failed",
            failed,
            outcomes.len()
        )
    };
    let subject: String = subject.chars().take(MAX_SUBJECT_CHARS).collect();

    let mut body = String::new();
    let _ = writeln!(body, "Replication report for destination bucket '{destination_bucket}'");
    let _ = writeln!(body, "Succeeded: {succeeded}  Failed: {failed}  Total: {}", outcomes.len());
    let _ = writeln!(body);

    if outcomes.is_empty() {
        let _ = writeln!(body, "No records in this event; nothing to replicate.");
    }

    for outcome in outcomes {
        match &outcome.status {
            OutcomeStatus::Success => {
                let _ = writeln!(
                    body,
                    "- {}: Success ({}, {} ms, {} attempt(s)) from '{}'",
                    outcome.request.object_key,
                    size_label(outcome.request.size_bytes),
                    outcome.elapsed_ms,
                    outcome.attempts,
                    outcome.request.source_bucket,
                );
            }
            OutcomeStatus::Failure(kind) => {
                let _ = writeln!(
                    body,
                    "- {}: Failure [{}] after {} attempt(s) from '{}'",
                    outcome.request.object_key,
                    kind.as_str(),
                    outcome.attempts,
                    outcome.request.source_bucket,
                );
                if let Some(detail) = &outcome.error_detail {
                    let _ = writeln!(body, "    detail: {detail}");
                }
                let _ = writeln!(body, "    hint: {}", kind.hint());
            }
        }
    }

    (subject, body)
}

fn size_label(size_bytes: Option<u64>) -> String {
    match size_bytes {
        Some(size) => format!("{size} bytes"),
        None => "size unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ErrorKind, ReplicationRequest};

    fn success(key: &str, size: Option<u64>) -> ReplicationOutcome {
        ReplicationOutcome {
            request: ReplicationRequest {
                source_bucket: "src".into(),
                object_key: key.into(),
                size_bytes: size,
                event_time: None,
            },
            status: OutcomeStatus::Success,
            error_detail: None,
            destination_bucket: "backup".into(),
            elapsed_ms: 13,
            attempts: 1,
        }
    }

    fn failure(key: &str, kind: ErrorKind, detail: &str) -> ReplicationOutcome {
        ReplicationOutcome {
            status: OutcomeStatus::Failure(kind),
            error_detail: Some(detail.into()),
            ..success(key, None)
        }
    }

    #[test]
    fn all_success_subject_and_counts() {
        let outcomes = vec![success("reports/q1.csv", Some(2048)), success("b.txt", None)];
        let (subject, body) = build_notification(&outcomes, "backup");
        assert_eq!(subject, "Backup Success - 2 object(s) replicated");
        assert!(body.contains("Succeeded: 2  Failed: 0  Total: 2"));
        assert!(body.contains("reports/q1.csv"));
        assert!(body.contains("Success"));
        assert!(body.contains("2048 bytes"));
    }

    #[test]
    fn failures_get_detail_and_hint_lines() {
        let outcomes = vec![
            success("ok.txt", Some(1)),
            failure("secret.txt", ErrorKind::AccessDenied, "access denied: forbidden"),
        ];
        let (subject, body) = build_notification(&outcomes, "backup");
        assert!(subject.starts_with("Backup FAILURE - Action Required"));
        assert!(body.contains("Succeeded: 1  Failed: 1  Total: 2"));
        assert!(body.contains("secret.txt: Failure [AccessDenied]"));
        assert!(body.contains("detail: access denied: forbidden"));
        assert!(body.contains("hint: check the replication role's permissions"));
    }

    #[test]
    fn empty_outcomes_still_report() {
        let (subject, body) = build_notification(&[], "backup");
        assert_eq!(subject, "Backup Success - 0 object(s) replicated");
        assert!(body.contains("nothing to replicate"));
    }

    #[test]
    fn outcomes_keep_record_order_in_body() {
        let outcomes = vec![success("first.txt", None), success("second.txt", None)];
        let (_, body) = build_notification(&outcomes, "backup");
        let first = body.find("first.txt").unwrap();
        let second = body.find("second.txt").unwrap();
        assert!(first < second);
    }

    #[test]
    fn subject_is_clamped() {
        let outcomes: Vec<ReplicationOutcome> =
            (0..1).map(|_| failure("x", ErrorKind::Unknown, "d")).collect();
        let (subject, _) = build_notification(&outcomes, "backup");
        assert!(subject.chars().count() <= MAX_SUBJECT_CHARS);
    }
}
