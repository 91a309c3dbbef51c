//! `bosun deploy` — persist an application and resolve its dependencies

use super::CommandContext;
use anyhow::{bail, Context, Result};
use bosun_core::app::{AppKind, Dependency, DependencyStatus};
use bosun_core::commands::EngineCommand;
use bosun_core::controller::DeployRequest;
use clap::Args;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct DeployArgs {
    /// Stable application id
    #[arg(long)]
    pub id: String,

    /// Human-readable name (defaults to the id)
    #[arg(long)]
    pub name: Option<String>,

    /// Semantic version
    #[arg(long)]
    pub app_version: Option<String>,

    /// Free-text description
    #[arg(long)]
    pub description: Option<String>,

    /// Execution kind (interpreted-script, native-binary, container-image)
    #[arg(long, default_value = "interpreted-script")]
    pub kind: String,

    /// Script language (interpreted scripts)
    #[arg(long)]
    pub language: Option<String>,

    /// Script source file to deploy
    #[arg(long)]
    pub code_file: Option<PathBuf>,

    /// Inline script source
    #[arg(long, conflicts_with = "code_file")]
    pub code: Option<String>,

    /// Binary path (native-binary) or image reference (container-image)
    #[arg(long)]
    pub artifact: Option<String>,

    /// Entry point (script file name, binary name, or image command)
    #[arg(long)]
    pub entry: Option<String>,

    /// Argument for the entry point (repeatable)
    #[arg(long = "arg")]
    pub args: Vec<String>,

    /// Environment variable NAME=value (repeatable)
    #[arg(long = "env")]
    pub env: Vec<String>,

    /// Working directory inside the container
    #[arg(long)]
    pub working_dir: Option<String>,

    /// Dependency as ecosystem:requirement, e.g. pip:numpy>=1.26 (repeatable)
    #[arg(long = "dep")]
    pub dependencies: Vec<String>,

    /// Declared signal path the app reads or writes (repeatable)
    #[arg(long = "signal")]
    pub signals: Vec<String>,
}

/// Parse `NAME=value` pairs.
fn parse_env(pairs: &[String]) -> Result<HashMap<String, String>> {
    let mut env = HashMap::new();
    for pair in pairs {
        match pair.split_once('=') {
            Some((key, value)) => {
                env.insert(key.to_string(), value.to_string());
            }
            None => bail!("invalid environment variable '{}', expected NAME=value", pair),
        }
    }
    Ok(env)
}

/// Parse `ecosystem:requirement` into a dependency record, splitting the
/// requirement into name and version constraint.
fn parse_dependency(raw: &str) -> Result<Dependency> {
    let (ecosystem, requirement) = raw
        .split_once(':')
        .with_context(|| format!("invalid dependency '{}', expected ecosystem:requirement", raw))?;

    let split = requirement
        .find(|c: char| ['<', '>', '=', '~', '!', '^'].contains(&c))
        .unwrap_or(requirement.len());
    let (name, constraint) = requirement.split_at(split);
    if name.is_empty() {
        bail!("invalid dependency '{}': missing package name", raw);
    }

    Ok(Dependency {
        ecosystem: ecosystem.to_string(),
        name: name.to_string(),
        constraint: constraint.to_string(),
        status: DependencyStatus::Pending,
    })
}

pub async fn run(ctx: &CommandContext, args: DeployArgs) -> Result<()> {
    let kind: AppKind = args
        .kind
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let code = match (&args.code, &args.code_file) {
        (Some(code), _) => Some(code.clone()),
        (None, Some(path)) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?,
        ),
        (None, None) => None,
    };

    let dependencies = args
        .dependencies
        .iter()
        .map(|raw| parse_dependency(raw))
        .collect::<Result<Vec<_>>>()?;

    let request = DeployRequest {
        app_id: args.id,
        name: args.name,
        version: args.app_version,
        description: args.description,
        kind: Some(kind),
        language: args.language,
        code,
        binary_ref: args.artifact,
        entry_point: args.entry,
        args: args.args,
        env: parse_env(&args.env)?,
        working_dir: args.working_dir,
        dependencies,
        signals: args.signals,
    };

    ctx.run_command(EngineCommand::Deploy { request }).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dependency() {
        let dep = parse_dependency("pip:numpy>=1.26").unwrap();
        assert_eq!(dep.ecosystem, "pip");
        assert_eq!(dep.name, "numpy");
        assert_eq!(dep.constraint, ">=1.26");

        let dep = parse_dependency("npm:left-pad").unwrap();
        assert_eq!(dep.name, "left-pad");
        assert!(dep.constraint.is_empty());

        assert!(parse_dependency("numpy").is_err());
        assert!(parse_dependency("pip:>=1.0").is_err());
    }

    #[test]
    fn test_parse_env() {
        let env = parse_env(&["MODE=demo".to_string(), "EMPTY=".to_string()]).unwrap();
        assert_eq!(env["MODE"], "demo");
        assert_eq!(env["EMPTY"], "");
        assert!(parse_env(&["NOVALUE".to_string()]).is_err());
    }
}
