use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use bucket_replicator::config;
use bucket_replicator::handler::Handler;
use bucket_replicator::notify::SnsChannel;
use bucket_replicator::runtime;
use bucket_replicator::s3::S3ObjectStore;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file (default: ./config.yaml when present)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Process a single event from a JSON file and exit
    #[arg(long)]
    event: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(args.config.as_deref())?;

    let aws = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let store = Arc::new(S3ObjectStore::new(aws_sdk_s3::Client::new(&aws)));
    let channel = Arc::new(SnsChannel::new(
        aws_sdk_sns::Client::new(&aws),
        cfg.notify.topic_arn.clone(),
    ));
    let handler = Handler::from_config(&cfg, store, channel);

    if let Some(path) = args.event {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read event file {}", path.display()))?;
        let payload: serde_json::Value =
            serde_json::from_str(&raw).context("event file is not JSON")?;
        let invocation_id = uuid::Uuid::new_v4().to_string();
        let summary = handler.handle(&invocation_id, &payload, None).await?;
        println!("{}", serde_json::to_string_pretty(&summary.response_body())?);
        return Ok(());
    }

    info!(destination = %cfg.replication.destination_bucket, "starting replication handler");
    let client = runtime::RuntimeClient::from_env()?;
    runtime::run(&handler, &client).await
}
