//! Message payloads exchanged with the script process
//!
//! Child to host: `output`, `requestInput`, `runComplete`.
//! Host to child: `userInput`.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// A payload type with its wire tag
pub trait IpcMessage: Serialize + DeserializeOwned + Send + 'static {
    const TYPE: &'static str;
}

/// What an output entry represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ScriptOutputKind {
    /// A dumped value
    #[default]
    Result,
    /// Console text
    Text,
    Error,
    /// A stdout line that was not a framed message
    Raw,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputMessage {
    #[serde(default)]
    pub kind: ScriptOutputKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub body: String,
}

impl IpcMessage for OutputMessage {
    const TYPE: &'static str = "output";
}

/// The script is blocked reading a line
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInput {}

impl IpcMessage for RequestInput {
    const TYPE: &'static str = "requestInput";
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunComplete {
    #[serde(default)]
    pub error: Option<String>,
}

impl IpcMessage for RunComplete {
    const TYPE: &'static str = "runComplete";
}

/// Reply to `requestInput`. `None` reads as end of input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInput {
    pub input: Option<String>,
}

impl IpcMessage for UserInput {
    const TYPE: &'static str = "userInput";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_defaults() {
        let message: OutputMessage = serde_json::from_str(r#"{"body":"4"}"#).unwrap();
        assert_eq!(message.kind, ScriptOutputKind::Result);
        assert_eq!(message.title, None);
    }

    #[test]
    fn test_output_from_runtime_shape() {
        // Shape produced by the bootstrap's anonymous object
        let message: OutputMessage =
            serde_json::from_str(r#"{"kind":"error","title":null,"body":"Boom"}"#).unwrap();
        assert_eq!(message.kind, ScriptOutputKind::Error);
    }

    #[test]
    fn test_user_input_serializes_null() {
        assert_eq!(
            serde_json::to_string(&UserInput { input: None }).unwrap(),
            r#"{"input":null}"#
        );
    }
}
