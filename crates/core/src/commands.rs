//! Transport-facing command and reply shapes
//!
//! The message-transport layer (out of scope here) frames these shapes; the
//! engine only defines them and routes them to the controller. Success and
//! error replies are distinct shapes: errors carry a dedicated `error`
//! indicator plus the offending id, the attempted operation, and a
//! human-readable reason, so callers never have to probe a success shape
//! for failure fields.

use crate::app::{AppStatus, Dependency};
use crate::console::LogEntry;
use crate::controller::{
    AppSummary, DeployRequest, LifecycleController, RuntimeInfo, StatusReport,
};
use crate::errors::EngineError;
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Commands accepted by the engine, tagged by `cmd`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum EngineCommand {
    Deploy {
        #[serde(flatten)]
        request: DeployRequest,
    },
    Start {
        #[serde(rename = "appId")]
        app_id: String,
    },
    Stop {
        #[serde(rename = "appId")]
        app_id: String,
    },
    Pause {
        #[serde(rename = "appId")]
        app_id: String,
    },
    Resume {
        #[serde(rename = "appId")]
        app_id: String,
    },
    Restart {
        #[serde(rename = "appId")]
        app_id: String,
    },
    Uninstall {
        #[serde(rename = "appId")]
        app_id: String,
    },
    ListApplications {
        #[serde(default)]
        status: Option<AppStatus>,
    },
    GetStatus {
        #[serde(rename = "appId")]
        app_id: String,
    },
    ListDependencies {
        #[serde(rename = "appId")]
        app_id: String,
    },
    RuntimeInfo,
    SubscribeOutput {
        #[serde(rename = "executionId")]
        execution_id: String,
        #[serde(default, rename = "catchUp")]
        catch_up: bool,
    },
    UnsubscribeOutput {
        #[serde(rename = "executionId")]
        execution_id: String,
        #[serde(rename = "subscriptionId")]
        subscription_id: u64,
    },
    SendInput {
        #[serde(rename = "executionId")]
        execution_id: String,
        /// UTF-8 input payload
        data: String,
    },
}

/// Error reply: a shape of its own, never a success shape with an error
/// field bolted on.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReply {
    /// Dedicated error discriminator, always `true`
    pub error: bool,
    /// Offending application or execution id
    pub id: String,
    /// Operation that was attempted
    pub operation: String,
    /// Human-readable reason
    pub reason: String,
}

impl ErrorReply {
    pub fn new(id: &str, operation: &str, error: &EngineError) -> Self {
        Self {
            error: true,
            id: id.to_string(),
            operation: operation.to_string(),
            reason: error.to_string(),
        }
    }
}

/// Success replies, one shape per command family
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EngineReply {
    Deploy {
        #[serde(rename = "appId")]
        app_id: String,
        #[serde(rename = "executionId")]
        execution_id: String,
        status: AppStatus,
        result: String,
    },
    Transition {
        status: String,
        result: String,
        state: AppStatus,
        #[serde(rename = "executionId", skip_serializing_if = "Option::is_none")]
        execution_id: Option<String>,
    },
    Uninstalled {
        status: String,
        state: String,
    },
    Applications(Vec<AppSummary>),
    Status(StatusReport),
    Dependencies(Vec<Dependency>),
    RuntimeInfo(RuntimeInfo),
    Subscribed {
        #[serde(rename = "executionId")]
        execution_id: String,
        #[serde(rename = "subscriptionId")]
        subscription_id: u64,
        #[serde(rename = "catchUp")]
        catch_up: bool,
    },
    Unsubscribed {
        #[serde(rename = "executionId")]
        execution_id: String,
        removed: bool,
    },
    InputSent {
        #[serde(rename = "executionId")]
        execution_id: String,
        bytes: usize,
    },
    Error(ErrorReply),
}

impl EngineReply {
    fn transition(state: AppStatus, execution_id: Option<String>) -> Self {
        EngineReply::Transition {
            status: "success".to_string(),
            result: "Successful".to_string(),
            state,
            execution_id,
        }
    }

    fn error(id: &str, operation: &str, error: &EngineError) -> Self {
        EngineReply::Error(ErrorReply::new(id, operation, error))
    }
}

/// Result of dispatching one command. Subscriptions additionally hand back
/// the live entry receiver for the transport layer to pump.
pub enum DispatchResult {
    Reply(EngineReply),
    Subscription {
        reply: EngineReply,
        subscription_id: u64,
        receiver: mpsc::Receiver<Arc<LogEntry>>,
    },
}

impl DispatchResult {
    pub fn reply(&self) -> &EngineReply {
        match self {
            DispatchResult::Reply(reply) => reply,
            DispatchResult::Subscription { reply, .. } => reply,
        }
    }
}

/// Route one command to the controller and shape the outcome.
pub async fn dispatch(
    controller: &Arc<LifecycleController>,
    command: EngineCommand,
) -> DispatchResult {
    match command {
        EngineCommand::Deploy { request } => {
            let id = request.app_id.clone();
            match controller.deploy(request).await {
                Ok(outcome) => DispatchResult::Reply(EngineReply::Deploy {
                    app_id: outcome.app_id,
                    execution_id: outcome.execution_id,
                    status: outcome.status,
                    result: "Successful".to_string(),
                }),
                Err(e) => DispatchResult::Reply(EngineReply::error(&id, "deploy", &e)),
            }
        }
        EngineCommand::Start { app_id } => match controller.start(&app_id).await {
            Ok(outcome) => {
                DispatchResult::Reply(EngineReply::transition(outcome.state, outcome.execution_id))
            }
            Err(e) => DispatchResult::Reply(EngineReply::error(&app_id, "start", &e)),
        },
        EngineCommand::Stop { app_id } => match controller.stop(&app_id).await {
            Ok(outcome) => {
                DispatchResult::Reply(EngineReply::transition(outcome.state, outcome.execution_id))
            }
            Err(e) => DispatchResult::Reply(EngineReply::error(&app_id, "stop", &e)),
        },
        EngineCommand::Pause { app_id } => match controller.pause(&app_id).await {
            Ok(outcome) => {
                DispatchResult::Reply(EngineReply::transition(outcome.state, outcome.execution_id))
            }
            Err(e) => DispatchResult::Reply(EngineReply::error(&app_id, "pause", &e)),
        },
        EngineCommand::Resume { app_id } => match controller.resume(&app_id).await {
            Ok(outcome) => {
                DispatchResult::Reply(EngineReply::transition(outcome.state, outcome.execution_id))
            }
            Err(e) => DispatchResult::Reply(EngineReply::error(&app_id, "resume", &e)),
        },
        EngineCommand::Restart { app_id } => match controller.restart(&app_id).await {
            Ok(outcome) => {
                DispatchResult::Reply(EngineReply::transition(outcome.state, outcome.execution_id))
            }
            Err(e) => DispatchResult::Reply(EngineReply::error(&app_id, "restart", &e)),
        },
        EngineCommand::Uninstall { app_id } => match controller.uninstall(&app_id).await {
            Ok(()) => DispatchResult::Reply(EngineReply::Uninstalled {
                status: "success".to_string(),
                state: "removed".to_string(),
            }),
            Err(e) => DispatchResult::Reply(EngineReply::error(&app_id, "uninstall", &e)),
        },
        EngineCommand::ListApplications { status } => {
            match controller.list_applications(status).await {
                Ok(apps) => DispatchResult::Reply(EngineReply::Applications(apps)),
                Err(e) => DispatchResult::Reply(EngineReply::error("", "listApplications", &e)),
            }
        }
        EngineCommand::GetStatus { app_id } => match controller.get_status(&app_id).await {
            Ok(report) => DispatchResult::Reply(EngineReply::Status(report)),
            Err(e) => DispatchResult::Reply(EngineReply::error(&app_id, "getStatus", &e)),
        },
        EngineCommand::ListDependencies { app_id } => {
            match controller.list_dependencies(&app_id).await {
                Ok(deps) => DispatchResult::Reply(EngineReply::Dependencies(deps)),
                Err(e) => DispatchResult::Reply(EngineReply::error(&app_id, "listDependencies", &e)),
            }
        }
        EngineCommand::RuntimeInfo => {
            DispatchResult::Reply(EngineReply::RuntimeInfo(controller.runtime_info()))
        }
        EngineCommand::SubscribeOutput {
            execution_id,
            catch_up,
        } => match controller.subscribe_output(&execution_id, catch_up) {
            Ok((subscription_id, receiver)) => DispatchResult::Subscription {
                reply: EngineReply::Subscribed {
                    execution_id,
                    subscription_id,
                    catch_up,
                },
                subscription_id,
                receiver,
            },
            Err(e) => {
                DispatchResult::Reply(EngineReply::error(&execution_id, "subscribeOutput", &e))
            }
        },
        EngineCommand::UnsubscribeOutput {
            execution_id,
            subscription_id,
        } => match controller.unsubscribe_output(&execution_id, subscription_id) {
            Ok(removed) => DispatchResult::Reply(EngineReply::Unsubscribed {
                execution_id,
                removed,
            }),
            Err(e) => {
                DispatchResult::Reply(EngineReply::error(&execution_id, "unsubscribeOutput", &e))
            }
        },
        EngineCommand::SendInput { execution_id, data } => {
            let bytes = data.into_bytes();
            let count = bytes.len();
            match controller.send_input(&execution_id, bytes).await {
                Ok(()) => DispatchResult::Reply(EngineReply::InputSent {
                    execution_id,
                    bytes: count,
                }),
                Err(e) => DispatchResult::Reply(EngineReply::error(&execution_id, "sendInput", &e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::LifecycleError;

    #[test]
    fn test_command_deserialization() {
        let cmd: EngineCommand = serde_json::from_str(
            r#"{"cmd": "start", "appId": "speed-display"}"#,
        )
        .unwrap();
        assert!(matches!(cmd, EngineCommand::Start { app_id } if app_id == "speed-display"));

        let cmd: EngineCommand = serde_json::from_str(
            r#"{
                "cmd": "deploy",
                "appId": "speed-display",
                "language": "python",
                "code": "print('hi')",
                "dependencies": [{"ecosystem": "pip", "name": "numpy", "constraint": ">=1.26"}]
            }"#,
        )
        .unwrap();
        match cmd {
            EngineCommand::Deploy { request } => {
                assert_eq!(request.app_id, "speed-display");
                assert_eq!(request.dependencies.len(), 1);
                assert_eq!(request.dependencies[0].name, "numpy");
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let cmd: EngineCommand = serde_json::from_str(
            r#"{"cmd": "subscribeOutput", "executionId": "e1", "catchUp": true}"#,
        )
        .unwrap();
        assert!(matches!(
            cmd,
            EngineCommand::SubscribeOutput { catch_up: true, .. }
        ));
    }

    #[test]
    fn test_error_reply_is_a_distinct_shape() {
        let error: EngineError = LifecycleError::UnknownApplication {
            app_id: "ghost".to_string(),
        }
        .into();
        let reply = EngineReply::error("ghost", "start", &error);

        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["error"], true);
        assert_eq!(json["id"], "ghost");
        assert_eq!(json["operation"], "start");
        assert!(json["reason"].as_str().unwrap().contains("unknown application"));

        // Success replies never carry the error discriminator.
        let success = EngineReply::transition(AppStatus::Running, Some("e1".to_string()));
        let json = serde_json::to_value(&success).unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["state"], "running");
        assert_eq!(json["status"], "success");
        assert_eq!(json["executionId"], "e1");
    }

    #[test]
    fn test_uninstall_reply_shape() {
        let reply = EngineReply::Uninstalled {
            status: "success".to_string(),
            state: "removed".to_string(),
        };
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["state"], "removed");
    }
}
