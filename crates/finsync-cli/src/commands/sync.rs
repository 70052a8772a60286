//! Sync commands: one user or every configured user

use anyhow::{Context, Result};
use finsync_core::{Config, SyncAllOutcome};
use serde_json::json;
use tracing::info;

use super::setup::build_orchestrator;

pub async fn cmd_sync(
    config: &Config,
    user_id: &str,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let report = orchestrator
        .execute(user_id, start, end)
        .await
        .with_context(|| format!("Sync failed for user {}", user_id))?;

    info!(
        user_id = %report.user_id,
        inserted = report.inserted(),
        months = report.months.len(),
        "Sync complete"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub async fn cmd_sync_all(config: &Config, start: Option<&str>, end: Option<&str>) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let outcome = orchestrator
        .execute_all(start, end)
        .await
        .context("Sync of all users failed")?;

    println!("{}", serde_json::to_string_pretty(&outcome_summary(&outcome))?);

    let total = outcome.reports.len() + outcome.failures.len();
    let failed = outcome.failures.len();
    outcome
        .into_result()
        .with_context(|| format!("{} of {} users failed", failed, total))?;
    Ok(())
}

/// JSON view of an all-users run: successful reports plus failed user ids
pub fn outcome_summary(outcome: &SyncAllOutcome) -> serde_json::Value {
    let failures: Vec<serde_json::Value> = outcome
        .failures
        .iter()
        .map(|f| {
            json!({
                "user_id": f.user_id,
                "kind": format!("{:?}", f.error.kind()),
                "error": f.error.to_string(),
            })
        })
        .collect();

    json!({
        "reports": outcome.reports,
        "failures": failures,
    })
}
