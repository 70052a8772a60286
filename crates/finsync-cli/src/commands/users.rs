//! Users command

use anyhow::{Context, Result};
use finsync_core::{Config, SettingsProvider, UserSettings};
use serde_json::json;

use super::setup::settings_provider;

pub async fn cmd_users(config: &Config) -> Result<()> {
    let users = list_users(config).await?;
    let summary: Vec<serde_json::Value> = users.iter().map(user_summary).collect();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

pub async fn list_users(config: &Config) -> Result<Vec<UserSettings>> {
    settings_provider(config)
        .list_settings()
        .await
        .context("Failed to list users")
}

/// Non-secret view of a user
pub fn user_summary(user: &UserSettings) -> serde_json::Value {
    json!({
        "user_id": user.user_id,
        "email": user.email,
        "accounts": user.source.account_ids.len(),
        "page_id": user.sheet.page_id,
    })
}
