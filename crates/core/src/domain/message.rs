// Message Domain Model

use super::simulation::SimulationId;
use serde::{Deserialize, Serialize};

/// Message streamed to the subscribers of a simulation's messaging group
///
/// Wire form: `{"action": "INFO_LOG", "data": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// One line (or block) of log output
    InfoLog(String),
    /// The current log stream is finished
    CloseInfoLog,
    /// The simulation was reloaded under a new id
    ReloadDone(SimulationId),
}

impl ClientMessage {
    pub fn info_log(text: impl Into<String>) -> Self {
        ClientMessage::InfoLog(text.into())
    }

    pub fn action(&self) -> &'static str {
        match self {
            ClientMessage::InfoLog(_) => "INFO_LOG",
            ClientMessage::CloseInfoLog => "CLOSE_INFO_LOG",
            ClientMessage::ReloadDone(_) => "RELOAD_DONE",
        }
    }
}

/// Message delivered to a worker (JSON serializable)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerMessage(serde_json::Value);

impl WorkerMessage {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

impl From<serde_json::Value> for WorkerMessage {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_wire_format() {
        let log = serde_json::to_value(ClientMessage::info_log("Cloning")).unwrap();
        assert_eq!(log, json!({"action": "INFO_LOG", "data": "Cloning"}));

        let close = serde_json::to_value(ClientMessage::CloseInfoLog).unwrap();
        assert_eq!(close, json!({"action": "CLOSE_INFO_LOG"}));

        let reload =
            serde_json::to_value(ClientMessage::ReloadDone(SimulationId::new("sim-9").unwrap()))
                .unwrap();
        assert_eq!(reload, json!({"action": "RELOAD_DONE", "data": "sim-9"}));
    }

    #[test]
    fn test_client_message_parse() {
        let msg: ClientMessage =
            serde_json::from_value(json!({"action": "CLOSE_INFO_LOG"})).unwrap();
        assert_eq!(msg, ClientMessage::CloseInfoLog);
        assert_eq!(msg.action(), "CLOSE_INFO_LOG");
    }

    #[test]
    fn test_worker_message_is_transparent() {
        let msg = WorkerMessage::new(json!({"tag": "PING"}));
        assert_eq!(serde_json::to_string(&msg).unwrap(), r#"{"tag":"PING"}"#);
    }
}
