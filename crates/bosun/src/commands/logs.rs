//! `bosun logs` and `bosun input` — console streaming and stdin forwarding

use super::CommandContext;
use anyhow::Result;
use bosun_core::commands::EngineCommand;
use bosun_core::console::LogEntry;
use clap::Args;

#[derive(Debug, Args)]
pub struct LogsArgs {
    /// Execution id, or an application id with --app
    pub id: String,

    /// Treat `id` as an application id and use its latest execution
    #[arg(long)]
    pub app: bool,

    /// Keep following live output until interrupted
    #[arg(long, short = 'f')]
    pub follow: bool,

    /// Skip the catch-up replay of buffered output
    #[arg(long)]
    pub no_catch_up: bool,

    /// Only show this many trailing entries (non-follow mode)
    #[arg(long, short = 'n')]
    pub tail: Option<i64>,
}

fn format_entry(entry: &LogEntry) -> String {
    format!(
        "{} [{:6}] {}",
        entry.timestamp.format("%H:%M:%S%.3f"),
        entry.stream.as_str(),
        entry.content
    )
}

pub async fn run(ctx: &CommandContext, args: LogsArgs) -> Result<()> {
    let execution_id = if args.app {
        let app_id = bosun_core::app::canonical_app_id(&args.id);
        match ctx.controller.registry().latest_execution(app_id).await? {
            Some(execution) => execution.id,
            None => anyhow::bail!("application '{}' has no executions", args.id),
        }
    } else {
        args.id.clone()
    };

    if !args.follow {
        // Historical view straight from the durable log table.
        let entries = ctx
            .controller
            .registry()
            .logs_for_execution(&execution_id, args.tail)
            .await?;
        if ctx.json {
            for entry in &entries {
                println!("{}", serde_json::to_string(entry)?);
            }
        } else {
            for entry in &entries {
                println!("{}", format_entry(entry));
            }
        }
        return Ok(());
    }

    let (_subscription, mut receiver) = ctx
        .controller
        .subscribe_output(&execution_id, !args.no_catch_up)?;

    loop {
        tokio::select! {
            entry = receiver.recv() => match entry {
                Some(entry) => {
                    if ctx.json {
                        println!("{}", serde_json::to_string(entry.as_ref())?);
                    } else {
                        println!("{}", format_entry(&entry));
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    Ok(())
}

pub async fn input(ctx: &CommandContext, execution_id: &str, text: &str) -> Result<()> {
    ctx.run_command(EngineCommand::SendInput {
        execution_id: execution_id.to_string(),
        data: format!("{}\n", text),
    })
    .await
}
