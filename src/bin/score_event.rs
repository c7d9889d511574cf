//! Runs one direct invocation from an event file and prints the envelope.
//!
//! Usage: `score_event <event.json>`

use credit_score_api::config::Config;
use credit_score_api::handlers::{handle, AppState};
use credit_score_api::models::InvocationContext;
use credit_score_api::prediction::PredictionService;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "credit_score_api=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let path = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: score_event <event.json>"))?;
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("reading {}: {}", path, e))?;
    let event: serde_json::Value = serde_json::from_str(&raw)?;

    let config = Config::from_env()?;
    let prediction = Arc::new(PredictionService::load(
        &config.model_path,
        &config.model_metadata_path,
    )?);
    let state = AppState::from_config(config, prediction)?;

    let context = InvocationContext::new();
    let envelope = handle(&state, event, Some(&context))
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}
