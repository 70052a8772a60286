//! Configuration loading and collaborator wiring

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use finsync_core::{
    AIClient, BrasilApiClient, Collaborators, Config, FanOut, FileSettingsProvider, NotionClient,
    PluggyClient, SyncOptions, SyncOrchestrator,
};
use tracing::debug;

/// Load the layered configuration (embedded defaults, override file, env)
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    Config::load(path).context("Failed to load configuration")
}

/// Users file provider for the configured path
pub fn settings_provider(config: &Config) -> FileSettingsProvider {
    FileSettingsProvider::new(config.users_file.clone())
}

/// Wire the production adapters into an orchestrator
pub fn build_orchestrator(config: &Config) -> Result<SyncOrchestrator> {
    let options = SyncOptions::from_config(config).context("Invalid sync settings")?;
    let timeout = config.sync.request_timeout();
    let providers = &config.providers;

    let source = PluggyClient::new(
        &providers.pluggy_base_url,
        FanOut::new(timeout, config.sync.max_concurrency),
    )
    .context("Failed to create aggregator client")?;
    let companies = BrasilApiClient::new(&providers.brasilapi_base_url, timeout)
        .context("Failed to create company registry client")?;
    let categorizer =
        AIClient::from_config(&config.ai, timeout).context("Failed to create chat client")?;
    let sheet = NotionClient::new(&providers.notion_base_url, timeout)
        .context("Failed to create workspace client")?;

    debug!(
        users_file = %config.users_file.display(),
        model = %config.ai.model,
        "Wired collaborators"
    );

    Ok(SyncOrchestrator::new(
        Collaborators {
            settings: Arc::new(settings_provider(config)),
            source: Arc::new(source),
            companies: Arc::new(companies),
            categorizer: Arc::new(categorizer),
            sheet: Arc::new(sheet),
        },
        options,
    ))
}
