use crate::session::{CollectionSession, SessionError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Control operations an external transport can forward to a running session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "args", rename_all = "snake_case")]
pub enum ControlCommand {
    Configure(Value),
    ResetStats,
    GetStats,
    Stop,
}

/// Success flag plus a human-readable status, the shape every control call returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlReply {
    pub success: bool,
    pub status: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl ControlReply {
    pub fn ok(status: impl Into<String>, payload: Value) -> Self {
        Self {
            success: true,
            status: status.into(),
            payload,
        }
    }

    pub fn failed(status: impl Into<String>) -> Self {
        Self {
            success: false,
            status: status.into(),
            payload: Value::Null,
        }
    }

    pub fn from_result<T: Serialize>(status: &str, result: Result<T, SessionError>) -> Self {
        match result {
            Ok(value) => match serde_json::to_value(value) {
                Ok(payload) => Self::ok(status, payload),
                Err(err) => Self::failed(format!("failed to encode reply: {err}")),
            },
            Err(err) => Self::failed(err.to_string()),
        }
    }
}

impl<P: Send + 'static> CollectionSession<P> {
    /// Dispatches one control command.
    pub fn handle(&self, command: ControlCommand) -> ControlReply {
        match command {
            ControlCommand::Configure(patch) => {
                ControlReply::from_result("configured", self.configure(&patch))
            }
            ControlCommand::ResetStats => {
                self.reset_stats();
                ControlReply::ok("statistics reset", Value::Null)
            }
            ControlCommand::GetStats => ControlReply::from_result("ok", Ok(self.get_stats())),
            ControlCommand::Stop => ControlReply::from_result("stopped", self.stop()),
        }
    }
}
