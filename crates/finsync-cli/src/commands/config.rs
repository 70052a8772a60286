//! Config command

use anyhow::Result;
use finsync_core::Config;

pub fn cmd_config(config: &Config) -> Result<()> {
    println!("{}", render_config(config)?);
    Ok(())
}

/// Pretty JSON of the resolved configuration with the API key masked
pub fn render_config(config: &Config) -> Result<String> {
    Ok(serde_json::to_string_pretty(&config.redacted())?)
}
