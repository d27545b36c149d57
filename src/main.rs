mod bot;
mod config;
mod notifier;
mod platform;
mod scheduler;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::{AppState, Dispatcher, TriggerPolicy};
use crate::config::Config;
use crate::notifier::LarkNotifier;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fikabot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Service: {}", config.server.service_name);
    info!("  Lark API: {}", config.lark.base_url);
    info!("  Mention required: {}", config.trigger.mention_required);
    info!("  Verbose payload logging: {}", config.general.debug_verbose);

    if !config.has_credentials() {
        warn!("LARK_APP_ID / LARK_APP_SECRET are not set; replies will fail until they are");
    }

    let notifier = LarkNotifier::new(config.lark.clone())?;
    let dispatcher = Dispatcher::new(
        Arc::new(notifier),
        TriggerPolicy::from_config(&config.trigger),
        config.general.debug_verbose,
    );
    let state = Arc::new(
        AppState::new(config.server.service_name.clone(), dispatcher)
            .with_max_body_bytes(config.server.max_body_bytes),
    );

    info!("Fika bot is starting...");
    bot::run(state, &config.server).await?;

    Ok(())
}
