//! Command-line interface definition and dispatch

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Log format options
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON structured format
    Json,
}

impl LogFormat {
    fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        }
    }
}

/// bosun — deploy and supervise containerized edge applications
#[derive(Debug, Parser)]
#[command(name = "bosun", version, about)]
pub struct Cli {
    /// Path to the engine configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the engine data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Print command replies as JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Deploy an application (persist it and resolve its dependencies)
    Deploy(commands::deploy::DeployArgs),
    /// Start an installed or stopped application
    Start {
        /// Application id (bare or app:-prefixed)
        app_id: String,
    },
    /// Stop a running or paused application
    Stop {
        app_id: String,
    },
    /// Pause a running application
    Pause {
        app_id: String,
    },
    /// Resume a paused application
    Resume {
        app_id: String,
    },
    /// Restart an application with a fresh execution
    Restart {
        app_id: String,
    },
    /// Stop (if needed) and remove an application
    Uninstall {
        app_id: String,
    },
    /// List deployed applications
    List {
        /// Only show applications in this status
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one application's status
    Status {
        app_id: String,
    },
    /// Show an application's declared dependencies
    Deps {
        app_id: String,
    },
    /// Show or follow an execution's console output
    Logs(commands::logs::LogsArgs),
    /// Forward a line of input to an execution's stdin
    Input {
        /// Execution id
        execution_id: String,
        /// Input text (a newline is appended)
        text: String,
    },
    /// Run the long-lived agent: recover state, reconcile, and serve
    /// line-delimited JSON commands on stdin
    Agent,
}

use crate::commands;

impl Cli {
    pub async fn dispatch(self) -> Result<()> {
        bosun_core::logging::init(Some(self.log_format.as_str()))
            .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

        let ctx = commands::CommandContext::init(self.config.as_deref(), self.data_dir, self.json)
            .await?;

        match self.command {
            Commands::Deploy(args) => commands::deploy::run(&ctx, args).await,
            Commands::Start { app_id } => commands::lifecycle::run(&ctx, "start", &app_id).await,
            Commands::Stop { app_id } => commands::lifecycle::run(&ctx, "stop", &app_id).await,
            Commands::Pause { app_id } => commands::lifecycle::run(&ctx, "pause", &app_id).await,
            Commands::Resume { app_id } => commands::lifecycle::run(&ctx, "resume", &app_id).await,
            Commands::Restart { app_id } => {
                commands::lifecycle::run(&ctx, "restart", &app_id).await
            }
            Commands::Uninstall { app_id } => {
                commands::lifecycle::run(&ctx, "uninstall", &app_id).await
            }
            Commands::List { status } => commands::query::list(&ctx, status.as_deref()).await,
            Commands::Status { app_id } => commands::query::status(&ctx, &app_id).await,
            Commands::Deps { app_id } => commands::query::deps(&ctx, &app_id).await,
            Commands::Logs(args) => commands::logs::run(&ctx, args).await,
            Commands::Input { execution_id, text } => {
                commands::logs::input(&ctx, &execution_id, &text).await
            }
            Commands::Agent => commands::agent::run(&ctx).await,
        }
    }
}
