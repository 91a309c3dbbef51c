//! Command implementations

pub mod agent;
pub mod deploy;
pub mod lifecycle;
pub mod logs;
pub mod query;

use anyhow::{Context, Result};
use bosun_core::commands::{DispatchResult, EngineCommand, EngineReply};
use bosun_core::config::EngineConfig;
use bosun_core::controller::LifecycleController;
use bosun_core::docker::DockerOrchestrator;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Shared state for one CLI invocation
pub struct CommandContext {
    pub controller: Arc<LifecycleController>,
    pub json: bool,
}

impl CommandContext {
    /// Load configuration, open the registry, and build the controller
    /// around the Docker orchestrator.
    pub async fn init(
        config_path: Option<&Path>,
        data_dir: Option<PathBuf>,
        json: bool,
    ) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => EngineConfig::from_toml_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => EngineConfig::default(),
        };
        if let Some(data_dir) = data_dir {
            config.data_dir = data_dir;
        }

        let orchestrator = Arc::new(DockerOrchestrator::new(config.apps_dir()));
        let controller = LifecycleController::new(config, orchestrator)
            .await
            .context("initializing lifecycle engine")?;

        Ok(Self { controller, json })
    }

    /// Dispatch one engine command and print its reply.
    pub async fn run_command(&self, command: EngineCommand) -> Result<()> {
        let result = bosun_core::commands::dispatch(&self.controller, command).await;
        self.print_reply(result.reply())?;
        if let DispatchResult::Subscription { .. } = result {
            // Subscriptions are handled by the logs command and agent loop,
            // never through this path.
            anyhow::bail!("subscription commands must be run through `bosun logs`");
        }
        Ok(())
    }

    /// Print a reply as JSON or a terse text line. Error replies set a
    /// non-zero exit code via the returned error.
    pub fn print_reply(&self, reply: &EngineReply) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(reply)?);
        } else {
            match reply {
                EngineReply::Error(err) => {
                    println!("error: {} ({})", err.reason, err.operation);
                }
                other => println!("{}", serde_json::to_string_pretty(other)?),
            }
        }

        if let EngineReply::Error(err) = reply {
            anyhow::bail!("{} failed: {}", err.operation, err.reason);
        }
        Ok(())
    }
}
