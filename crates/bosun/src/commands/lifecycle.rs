//! Lifecycle transition commands: start, stop, pause, resume, restart,
//! uninstall

use super::CommandContext;
use anyhow::{bail, Result};
use bosun_core::commands::EngineCommand;

pub async fn run(ctx: &CommandContext, operation: &str, app_id: &str) -> Result<()> {
    let app_id = app_id.to_string();
    let command = match operation {
        "start" => EngineCommand::Start { app_id },
        "stop" => EngineCommand::Stop { app_id },
        "pause" => EngineCommand::Pause { app_id },
        "resume" => EngineCommand::Resume { app_id },
        "restart" => EngineCommand::Restart { app_id },
        "uninstall" => EngineCommand::Uninstall { app_id },
        other => bail!("unknown lifecycle operation '{}'", other),
    };
    ctx.run_command(command).await
}
