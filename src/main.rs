//! Workshop - session server entry point.

use std::path::PathBuf;

use workshop::{api, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "workshop=info,tower_http=info".into()),
        )
        .init();

    // Overlay files listed in WORKSHOP_CONFIG (comma-separated) apply in
    // order; the environment wins over all of them.
    let overlay_paths: Vec<PathBuf> = std::env::var("WORKSHOP_CONFIG")
        .map(|raw| raw.split(',').map(PathBuf::from).collect())
        .unwrap_or_default();

    let config = Config::load(&overlay_paths)?;
    tracing::info!(
        model = %config.llm.model,
        base_dir = %config.base_dir.display(),
        max_steps = config.agent.max_steps,
        auto_approve = config.agent.auto_approve,
        "configuration loaded"
    );

    api::serve(config).await
}
