//! DAP message envelopes.
//!
//! Bodies and arguments stay as raw `serde_json::Value` so that relayed
//! traffic is re-serialized exactly as it arrived; typed structs exist only
//! for the handful of messages the relay synthesizes itself.

use serde::Serialize;
use serde_json::{json, Value};

/// Error id used in locally synthesized error responses.
pub const RELAY_ERROR_ID: i64 = 3000;

/// DAP response envelope, for locally synthesized responses only. Backend
/// responses are relayed as raw values.
///
/// Note: the DAP specification allows responses with no `body` field at all.
/// Using a `serde_json::Value` keeps the envelope stable and avoids type
/// inference issues around `None` bodies.
#[derive(Debug, Serialize)]
pub struct DapResponse {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: &'static str,
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl DapResponse {
    pub fn success(seq: i64, request_seq: i64, command: &str, body: Option<Value>) -> Self {
        Self {
            seq,
            r#type: "response",
            request_seq,
            success: true,
            command: command.to_string(),
            message: None,
            body,
        }
    }

    pub fn error(seq: i64, request_seq: i64, command: &str, message: &str) -> Self {
        Self {
            seq,
            r#type: "response",
            request_seq,
            success: false,
            command: command.to_string(),
            message: Some(message.to_string()),
            body: Some(json!({
                "error": {
                    "id": RELAY_ERROR_ID,
                    "format": message,
                    "showUser": true,
                }
            })),
        }
    }
}

/// DAP event envelope, for locally synthesized events only.
#[derive(Debug, Serialize)]
pub struct DapEvent {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: &'static str,
    pub event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl DapEvent {
    pub fn terminated(seq: i64) -> Self {
        Self {
            seq,
            r#type: "event",
            event: "terminated",
            body: None,
        }
    }

    pub fn output(seq: i64, category: &str, output: &str) -> Self {
        Self {
            seq,
            r#type: "event",
            event: "output",
            body: Some(json!({ "category": category, "output": output })),
        }
    }
}

/// Message kind of a raw DAP value (`request`, `response` or `event`).
pub fn message_type(message: &Value) -> Option<&str> {
    message.get("type").and_then(Value::as_str)
}

/// Request sequence number of a raw request value.
pub fn request_seq(message: &Value) -> Option<i64> {
    message.get("seq").and_then(Value::as_i64)
}

/// Command of a raw request value.
pub fn command(message: &Value) -> Option<&str> {
    message.get("command").and_then(Value::as_str)
}

/// `request_seq` of a raw response value, used to correlate relayed
/// responses with the pending-request table.
pub fn response_request_seq(message: &Value) -> Option<i64> {
    message.get("request_seq").and_then(Value::as_i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesized_error_response_carries_the_original_error_shape() {
        let rsp = DapResponse::error(9, 4, "variables", "backend exited unexpectedly");
        let v = serde_json::to_value(&rsp).unwrap();
        assert_eq!(v["type"], "response");
        assert_eq!(v["request_seq"], 4);
        assert_eq!(v["success"], false);
        assert_eq!(v["command"], "variables");
        assert_eq!(v["body"]["error"]["id"], RELAY_ERROR_ID);
        assert_eq!(v["body"]["error"]["showUser"], true);
    }

    #[test]
    fn success_response_without_body_omits_the_field() {
        let rsp = DapResponse::success(2, 1, "disconnect", None);
        let v = serde_json::to_value(&rsp).unwrap();
        assert!(v.get("body").is_none());
        assert!(v.get("message").is_none());
        assert_eq!(v["success"], true);
    }

    #[test]
    fn output_event_is_tagged_by_category() {
        let ev = DapEvent::output(5, "stdout", "Hello, World!\n");
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["event"], "output");
        assert_eq!(v["body"]["category"], "stdout");
        assert_eq!(v["body"]["output"], "Hello, World!\n");
    }
}
