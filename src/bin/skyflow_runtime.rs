//! Skyflow Runtime
//!
//! Runs the firehose consumer and the scheduled jobs against one SQLite
//! store until CTRL+C:
//! - firehose → decode → classify → store, with cursor resume
//! - social cycle: reconcile graph, refresh engagement, repost
//! - rollups and histograms
//! - follower sync (optional)
//!
//! Usage:
//!   cargo run --release --bin skyflow_runtime
//!
//! Environment variables:
//!   SKYFLOW_IDENTIFIER / SKYFLOW_PASSWORD - bot account (required)
//!   SKYFLOW_DB_PATH - SQLite database path (default: /var/lib/skyflow/skyflow.db)
//!   SKYFLOW_FIREHOSE_ENDPOINT - relay url (default: wss://bsky.network)
//!   See `PipelineConfig` and `RuntimeConfig` for the rest.

use dotenv::dotenv;
use log::{error, info, warn};
use skyflow::pipeline::{
    bsky_api::BskyClient, config::PipelineConfig, db::Store, scheduler::spawn_pipeline_jobs,
    social::SocialActions,
};
use skyflow::streamer_core::{
    config::RuntimeConfig, consumer::FirehoseIngestor, firehose_client::run_with_reconnect,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        warn!("⚠️  rustls crypto provider was already installed");
    }

    let config = PipelineConfig::from_env()?;
    let runtime = RuntimeConfig::from_env()?;

    info!("🚀 Skyflow Runtime");
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Firehose: {}", runtime.firehose_endpoint);
    info!("   ├─ PDS: {}", config.pds_url);
    info!("   ├─ Account: {}", config.identifier);
    info!("   ├─ Target language: {}", config.target_language);
    info!(
        "   ├─ Repost window: {}..{} min, score {}..={}",
        config.repost_min_age_minutes,
        config.repost_max_age_minutes,
        config.score_min,
        config.score_max
    );
    info!("   ├─ Social interval: {}ms", config.social_interval_ms);
    info!("   ├─ Rollup interval: {}ms", config.rollup_interval_ms);
    info!("   └─ Histogram interval: {}ms", config.histogram_interval_ms);

    info!("🔧 Initializing database...");
    let store = Store::open(&config.db_path)?;
    info!("✅ Database initialized");

    let client = BskyClient::new(&config.pds_url, &config.identifier, &config.password)?;
    let session_did = client.session_did().await?;
    if session_did != config.identifier {
        error!(
            "❌ Logged in as {} but SKYFLOW_IDENTIFIER is {}",
            session_did, config.identifier
        );
        return Err("session account does not match SKYFLOW_IDENTIFIER".into());
    }
    info!("✅ Logged in as {}", session_did);
    let social: Arc<dyn SocialActions> = Arc::new(client);

    let token = CancellationToken::new();

    info!("🚀 Spawning background tasks...");
    let mut handles = spawn_pipeline_jobs(&config, store.clone(), social, token.clone());

    let mut ingestor = FirehoseIngestor::new(
        store,
        &runtime.service_name,
        runtime.cursor_persist_every,
    )?;
    let firehose_token = token.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = run_with_reconnect(&runtime, &mut ingestor, firehose_token).await {
            error!("❌ Firehose consumer failed: {}", e);
        }
    }));
    info!("✅ All tasks running ({})", handles.len());
    info!("🔄 Press CTRL+C to shutdown gracefully");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("");
            info!("⚠️  Received CTRL+C, shutting down...");
        }
        Err(err) => {
            error!("❌ Failed to listen for CTRL+C: {}", err);
        }
    }
    token.cancel();

    for handle in handles {
        if let Err(e) = handle.await {
            error!("❌ Task ended abnormally: {}", e);
        }
    }

    info!("✅ Skyflow runtime stopped");
    Ok(())
}
