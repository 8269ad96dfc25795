//! The framed message envelope
//!
//! ```text
//! {"seq": 3, "type": "output", "data": "{\"kind\":\"text\",\"body\":\"hi\"}"}
//! ```
//!
//! `data` is itself a JSON document carried as a string, so the envelope
//! can be parsed without knowing the payload type.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::message::IpcMessage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Monotonic per sender, starting at 1. Diagnostics only.
    pub seq: u64,
    #[serde(rename = "type")]
    pub message_type: String,
    pub data: String,
}

impl Envelope {
    pub fn new<M: IpcMessage>(seq: u64, message: &M) -> serde_json::Result<Self> {
        Ok(Self {
            seq,
            message_type: M::TYPE.to_string(),
            data: serde_json::to_string(message)?,
        })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.data)
    }

    pub fn is<M: IpcMessage>(&self) -> bool {
        self.message_type == M::TYPE
    }

    /// One wire line, without the trailing newline
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{OutputMessage, RunComplete, ScriptOutputKind};

    #[test]
    fn test_wire_shape() {
        let envelope = Envelope::new(
            7,
            &OutputMessage {
                kind: ScriptOutputKind::Text,
                title: None,
                body: "hi".into(),
            },
        )
        .unwrap();
        let line = envelope.to_line().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();

        assert_eq!(value["seq"], 7);
        assert_eq!(value["type"], "output");
        let data: serde_json::Value = serde_json::from_str(value["data"].as_str().unwrap()).unwrap();
        assert_eq!(data["kind"], "text");
        assert_eq!(data["body"], "hi");
    }

    #[test]
    fn test_decode_payload() {
        let envelope: Envelope =
            serde_json::from_str(r#"{"seq":1,"type":"runComplete","data":"{\"error\":\"boom\"}"}"#)
                .unwrap();
        assert!(envelope.is::<RunComplete>());
        let message: RunComplete = envelope.decode().unwrap();
        assert_eq!(message.error.as_deref(), Some("boom"));
    }
}
