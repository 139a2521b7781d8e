//! Configuration loader and validator for the replication handler.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub replication: Replication,
    pub notify: Notify,
}

/// Settings for the cross-region copy step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Replication {
    pub destination_bucket: String,
    /// Extra attempts after the first, for transient failures only.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Per-attempt timeout for one copy call.
    #[serde(default = "default_copy_timeout_seconds")]
    pub copy_timeout_seconds: u64,
    /// In-flight copies per invocation; must stay within 1..=4.
    #[serde(default = "default_max_parallel_copies")]
    pub max_parallel_copies: usize,
}

/// Settings for the outcome notification step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notify {
    pub topic_arn: String,
    #[serde(default = "default_publish_timeout_seconds")]
    pub publish_timeout_seconds: u64,
    /// Slice of the invocation deadline reserved for the publish call.
    #[serde(default = "default_notify_reserve_seconds")]
    pub notify_reserve_seconds: u64,
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_copy_timeout_seconds() -> u64 {
    30
}

fn default_max_parallel_copies() -> usize {
    2
}

fn default_publish_timeout_seconds() -> u64 {
    5
}

fn default_notify_reserve_seconds() -> u64 {
    2
}

impl Default for Config {
    fn default() -> Self {
        Self {
            replication: Replication {
                destination_bucket: String::new(),
                max_retries: default_max_retries(),
                retry_backoff_ms: default_retry_backoff_ms(),
                copy_timeout_seconds: default_copy_timeout_seconds(),
                max_parallel_copies: default_max_parallel_copies(),
            },
            notify: Notify {
                topic_arn: String::new(),
                publish_timeout_seconds: default_publish_timeout_seconds(),
                notify_reserve_seconds: default_notify_reserve_seconds(),
            },
        }
    }
}

impl Replication {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn copy_timeout(&self) -> Duration {
        Duration::from_secs(self.copy_timeout_seconds)
    }
}

impl Notify {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_seconds)
    }

    pub fn notify_reserve(&self) -> Duration {
        Duration::from_secs(self.notify_reserve_seconds)
    }
}

impl Config {
    /// Fill required fields from the deployment environment. The hosting
    /// environment passes `BACKUP_BUCKET` and `SNS_TOPIC_ARN`; a config file
    /// is optional there.
    pub fn apply_env_overrides(&mut self) {
        let bucket = std::env::var("BACKUP_BUCKET").ok();
        let topic = std::env::var("SNS_TOPIC_ARN").ok();
        self.apply_overrides(bucket, topic);
    }

    fn apply_overrides(&mut self, bucket: Option<String>, topic: Option<String>) {
        if let Some(bucket) = bucket.filter(|b| !b.trim().is_empty()) {
            self.replication.destination_bucket = bucket;
        }
        if let Some(topic) = topic.filter(|t| !t.trim().is_empty()) {
            self.notify.topic_arn = topic;
        }
    }
}

/// Load configuration and validate it.
/// - An explicitly supplied path must exist; a typo should fail loudly, not
///   fall back to defaults.
/// - If `path` is None, `config.yaml` in the current working directory is
///   used when present, and its absence is fine as long as the environment
///   supplies the required values. Absence of either required value is
///   fatal here, once, never per invocation.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut cfg: Config = match path {
        Some(path) => serde_yaml::from_str(&fs::read_to_string(path)?)?,
        None => {
            let default = Path::new("config.yaml");
            if default.exists() {
                serde_yaml::from_str(&fs::read_to_string(default)?)?
            } else {
                Config::default()
            }
        }
    };
    cfg.apply_env_overrides();
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.replication.destination_bucket.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "replication.destination_bucket must be non-empty (or set BACKUP_BUCKET)",
        ));
    }
    if cfg.replication.copy_timeout_seconds == 0 {
        return Err(ConfigError::Invalid("replication.copy_timeout_seconds must be > 0"));
    }
    if !(1..=4).contains(&cfg.replication.max_parallel_copies) {
        return Err(ConfigError::Invalid("replication.max_parallel_copies must be between 1 and 4"));
    }

    if cfg.notify.topic_arn.trim().is_empty() {
        return Err(ConfigError::Invalid("notify.topic_arn must be non-empty (or set SNS_TOPIC_ARN)"));
    }
    if cfg.notify.publish_timeout_seconds == 0 {
        return Err(ConfigError::Invalid("notify.publish_timeout_seconds must be > 0"));
    }

    Ok(())
}

/// Example YAML configuration.
pub fn example() -> &'static str {
    r#"replication:
  destination_bucket: "my-backup-bucket"
  max_retries: 2
  retry_backoff_ms: 200
  copy_timeout_seconds: 30
  max_parallel_copies: 2

notify:
  topic_arn: "arn:aws:sns:us-west-2:123456789012:backup-status"
  publish_timeout_seconds: 5
  notify_reserve_seconds: 2
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.replication.destination_bucket, "my-backup-bucket");
        assert_eq!(cfg.replication.max_retries, 2);
    }

    #[test]
    fn defaults_fill_optional_fields() {
        let cfg: Config = serde_yaml::from_str(
            r#"replication:
  destination_bucket: "backup"
notify:
  topic_arn: "arn:aws:sns:eu-west-1:1:t"
"#,
        )
        .unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.replication.max_retries, 2);
        assert_eq!(cfg.replication.retry_backoff_ms, 200);
        assert_eq!(cfg.replication.max_parallel_copies, 2);
        assert_eq!(cfg.notify.notify_reserve_seconds, 2);
    }

    #[test]
    fn invalid_destination_bucket() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.replication.destination_bucket = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("destination_bucket")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_topic_arn() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.notify.topic_arn = "  ".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("topic_arn")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_parallelism_bound() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.replication.max_parallel_copies = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.replication.max_parallel_copies = 9;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn overrides_replace_required_fields() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.apply_overrides(Some("env-backup".into()), Some("arn:env".into()));
        assert_eq!(cfg.replication.destination_bucket, "env-backup");
        assert_eq!(cfg.notify.topic_arn, "arn:env");

        // blank values do not clobber the file-provided ones
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.apply_overrides(Some("  ".into()), None);
        assert_eq!(cfg.replication.destination_bucket, "my-backup-bucket");
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.notify.publish_timeout_seconds, 5);
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let td = tempdir().unwrap();
        let p = td.path().join("no-such-config.yaml");
        let err = load(Some(&p)).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
