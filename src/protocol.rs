//! JSON-lines message contract between the host shell and the engine
//!
//! Each inbound line is one command object tagged by `command`; each outbound
//! line is one notification tagged by `type`, carrying a `status` of
//! `success` or `error`:
//!
//! ```text
//! -> {"command":"update-edge-settings","enabled":true,"sensitivity":40}
//! -> {"command":"process-image","path":"in.png","colors":[{"rgb":[0,255,0],"tolerance":30}],"id":"7"}
//! <- {"status":"success","type":"image-processed","path":"/work/temp/processed_image.png","id":"7"}
//! ```

use crate::{
    error::{ChromaKeyError, ErrorCategory, Result},
    types::{ColorTarget, EdgeSettings, Rgb, Tolerance},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Commands accepted from the host shell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Command {
    /// Run a removal pass, optionally replacing the color targets first
    ProcessImage {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        colors: Option<Vec<ColorTarget>>,
    },
    /// Empty the color target set
    ClearColors,
    /// Change the tolerance of one target, or of every target when `index` is absent
    UpdateTolerance {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<i64>,
        tolerance: Tolerance,
    },
    /// Replace the edge settings
    UpdateEdgeSettings { enabled: bool, sensitivity: i64 },
    /// Append a color target
    AddColor {
        color: Rgb,
        #[serde(default)]
        tolerance: Tolerance,
    },
    /// Delete the color target at `index`
    RemoveColor { index: i64 },
}

impl Command {
    /// Wire name of the command
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProcessImage { .. } => "process-image",
            Self::ClearColors => "clear-colors",
            Self::UpdateTolerance { .. } => "update-tolerance",
            Self::UpdateEdgeSettings { .. } => "update-edge-settings",
            Self::AddColor { .. } => "add-color",
            Self::RemoveColor { .. } => "remove-color",
        }
    }

    #[must_use]
    pub fn is_process_image(&self) -> bool {
        matches!(self, Self::ProcessImage { .. })
    }

    /// Edge settings carried by an `update-edge-settings` command, clamped
    #[must_use]
    pub fn edge_settings(&self) -> Option<EdgeSettings> {
        match self {
            Self::UpdateEdgeSettings {
                enabled,
                sensitivity,
            } => Some(EdgeSettings::new(*enabled, *sensitivity)),
            _ => None,
        }
    }
}

/// A command together with its optional correlation id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub command: Command,
}

impl CommandMessage {
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self { id: None, command }
    }

    #[must_use]
    pub fn with_id<S: Into<String>>(mut self, id: S) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Notifications sent back to the host shell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Notification {
    /// The output image is ready at `path`
    ImageProcessed { path: String },
    /// A run or a command failed
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<ErrorCategory>,
    },
    /// A command was handled
    Ack { command: String },
}

impl Notification {
    #[must_use]
    pub fn image_processed(path: &std::path::Path) -> Self {
        Self::ImageProcessed {
            path: path.display().to_string(),
        }
    }

    #[must_use]
    pub fn error(error: &ChromaKeyError) -> Self {
        Self::Error {
            message: error.to_string(),
            category: Some(error.category()),
        }
    }

    #[must_use]
    pub fn ack(command: &Command) -> Self {
        Self::Ack {
            command: command.name().to_string(),
        }
    }

    #[must_use]
    pub fn status(&self) -> Status {
        match self {
            Self::Error { .. } => Status::Error,
            Self::ImageProcessed { .. } | Self::Ack { .. } => Status::Success,
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status() == Status::Error
    }
}

/// Outcome marker present on every outbound line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// A notification as written to the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub status: Status,
    #[serde(flatten)]
    pub notification: Notification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl NotificationMessage {
    #[must_use]
    pub fn new(notification: Notification, id: Option<String>) -> Self {
        Self {
            status: notification.status(),
            notification,
            id,
        }
    }
}

/// Parse one inbound line
///
/// Returns `Ok(None)` for blank lines.
pub fn parse_line(line: &str) -> Result<Option<CommandMessage>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .map_err(|e| ChromaKeyError::protocol(format!("Malformed command: {}", e)))
}

/// Best-effort extraction of the `id` of a line that failed to parse
#[must_use]
pub fn correlation_id(line: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
    value.get("id")?.as_str().map(str::to_string)
}

/// Serialize a notification as one newline-terminated JSON line
pub fn to_json_line(message: &NotificationMessage) -> Result<String> {
    let mut line = serde_json::to_string(message).map_err(|e| {
        ChromaKeyError::internal(format!("Failed to serialize notification: {}", e))
    })?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> CommandMessage {
        parse_line(&value.to_string()).unwrap().unwrap()
    }

    #[test]
    fn test_parse_process_image() {
        let message = parse(json!({
            "command": "process-image",
            "path": "/tmp/in.png",
            "colors": [{"rgb": [255, 0, 0], "tolerance": 300}, {"rgb": [0, 0, 255]}],
            "id": "req-1"
        }));

        assert_eq!(message.id.as_deref(), Some("req-1"));
        let Command::ProcessImage { path, colors } = message.command else {
            panic!("expected process-image");
        };
        assert_eq!(path, PathBuf::from("/tmp/in.png"));
        let colors = colors.unwrap();
        assert_eq!(colors[0].tolerance, Tolerance::MAX);
        assert_eq!(colors[1], ColorTarget::exact(Rgb::new(0, 0, 255)));
    }

    #[test]
    fn test_parse_without_colors() {
        let message = parse(json!({"command": "process-image", "path": "a.png"}));
        assert_eq!(
            message.command,
            Command::ProcessImage {
                path: PathBuf::from("a.png"),
                colors: None
            }
        );
        assert!(message.id.is_none());
    }

    #[test]
    fn test_parse_state_commands() {
        assert_eq!(
            parse(json!({"command": "clear-colors"})).command,
            Command::ClearColors
        );
        assert_eq!(
            parse(json!({"command": "update-tolerance", "index": 2, "tolerance": -5})).command,
            Command::UpdateTolerance {
                index: Some(2),
                tolerance: Tolerance::EXACT
            }
        );
        assert_eq!(
            parse(json!({"command": "update-tolerance", "tolerance": 40})).command,
            Command::UpdateTolerance {
                index: None,
                tolerance: Tolerance::from(40u8)
            }
        );

        let edges = parse(json!({
            "command": "update-edge-settings",
            "enabled": true,
            "sensitivity": 140
        }));
        assert_eq!(edges.command.edge_settings(), Some(EdgeSettings::new(true, 100)));

        assert_eq!(
            parse(json!({"command": "add-color", "color": [1, 2, 3]})).command,
            Command::AddColor {
                color: Rgb::new(1, 2, 3),
                tolerance: Tolerance::EXACT
            }
        );
        assert_eq!(
            parse(json!({"command": "remove-color", "index": 0})).command,
            Command::RemoveColor { index: 0 }
        );
    }

    #[test]
    fn test_parse_failures() {
        assert!(parse_line("").unwrap().is_none());
        assert!(parse_line("   \r").unwrap().is_none());

        for bad in [
            "not json",
            r#"{"command":"explode"}"#,
            r#"{"path":"a.png"}"#,
            r#"{"command":"update-tolerance","index":1}"#,
            r#"{"command":"add-color","color":[256,0,0]}"#,
        ] {
            let err = parse_line(bad).unwrap_err();
            assert_eq!(err.category(), ErrorCategory::Protocol, "{}", bad);
        }
    }

    #[test]
    fn test_correlation_id() {
        assert_eq!(
            correlation_id(r#"{"command":"explode","id":"abc"}"#).as_deref(),
            Some("abc")
        );
        assert!(correlation_id(r#"{"command":"explode","id":5}"#).is_none());
        assert!(correlation_id("garbage").is_none());
    }

    #[test]
    fn test_notification_wire_format() {
        let line = to_json_line(&NotificationMessage::new(
            Notification::ImageProcessed {
                path: "/work/temp/processed_image.png".to_string(),
            },
            None,
        ))
        .unwrap();
        assert!(line.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(
            value,
            json!({
                "status": "success",
                "type": "image-processed",
                "path": "/work/temp/processed_image.png"
            })
        );

        let err = ChromaKeyError::invalid_input("missing file");
        let line = to_json_line(&NotificationMessage::new(
            Notification::error(&err),
            Some("9".to_string()),
        ))
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["type"], "error");
        assert_eq!(value["category"], "input");
        assert_eq!(value["id"], "9");
        assert!(value["message"].as_str().unwrap().contains("missing file"));
    }

    #[test]
    fn test_notification_message_parses_back() {
        let message = NotificationMessage::new(
            Notification::ack(&Command::ClearColors),
            Some("x".to_string()),
        );
        let line = to_json_line(&message).unwrap();
        let parsed: NotificationMessage = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, message);
        assert_eq!(parsed.status, Status::Success);
    }
}
