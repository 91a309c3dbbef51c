//! `bosun agent` — the long-lived engine process
//!
//! Recovers persisted state against the container runtime, runs the
//! reconciler on its configured cadence, and serves line-delimited JSON
//! engine commands on stdin (one command per line, one reply per line on
//! stdout). Subscription commands stream subsequent output entries as
//! `{"event":"output", ...}` lines.

use super::CommandContext;
use anyhow::Result;
use bosun_core::commands::{dispatch, DispatchResult, EngineCommand};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

pub async fn run(ctx: &CommandContext) -> Result<()> {
    let report = ctx.controller.recover().await?;
    info!(
        adopted = report.adopted,
        finalized = report.finalized,
        "state recovered"
    );

    let reconciler = ctx.controller.run_reconciler();

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line? {
                    Some(line) => line,
                    None => break,
                };
                if line.trim().is_empty() {
                    continue;
                }

                let command: EngineCommand = match serde_json::from_str(&line) {
                    Ok(command) => command,
                    Err(e) => {
                        println!(
                            "{}",
                            json!({
                                "error": true,
                                "id": "",
                                "operation": "parse",
                                "reason": format!("invalid command: {}", e),
                            })
                        );
                        continue;
                    }
                };

                match dispatch(&ctx.controller, command).await {
                    DispatchResult::Reply(reply) => {
                        println!("{}", serde_json::to_string(&reply)?);
                    }
                    DispatchResult::Subscription { reply, subscription_id, mut receiver } => {
                        println!("{}", serde_json::to_string(&reply)?);
                        tokio::spawn(async move {
                            while let Some(entry) = receiver.recv().await {
                                let line = json!({
                                    "event": "output",
                                    "subscriptionId": subscription_id,
                                    "entry": entry.as_ref(),
                                });
                                println!("{}", line);
                            }
                        });
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    reconciler.abort();
    if let Err(e) = ctx.controller.reconcile_once().await {
        warn!(error = %e, "final reconciliation pass failed");
    }
    Ok(())
}
