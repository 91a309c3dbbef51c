//! Read-only queries: list, status, dependencies

use super::CommandContext;
use anyhow::Result;
use bosun_core::app::AppStatus;
use bosun_core::commands::EngineCommand;

pub async fn list(ctx: &CommandContext, status: Option<&str>) -> Result<()> {
    let status = match status {
        Some(raw) => Some(
            raw.parse::<AppStatus>()
                .map_err(|e| anyhow::anyhow!(e))?,
        ),
        None => None,
    };
    ctx.run_command(EngineCommand::ListApplications { status }).await
}

pub async fn status(ctx: &CommandContext, app_id: &str) -> Result<()> {
    ctx.run_command(EngineCommand::GetStatus {
        app_id: app_id.to_string(),
    })
    .await
}

pub async fn deps(ctx: &CommandContext, app_id: &str) -> Result<()> {
    ctx.run_command(EngineCommand::ListDependencies {
        app_id: app_id.to_string(),
    })
    .await
}
