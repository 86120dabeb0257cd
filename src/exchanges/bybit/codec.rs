use crate::core::errors::ExchangeError;
use crate::core::kernel::{VenueFrame, WsCodec};
use serde::Serialize;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

/// Bybit V5 command frame (`subscribe`, `unsubscribe`, `ping`, `auth`)
#[derive(Debug, Serialize)]
struct BybitCommand {
    op: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    args: Vec<Value>,
}

impl BybitCommand {
    fn into_message(self) -> Result<Message, ExchangeError> {
        let json_str = serde_json::to_string(&self).map_err(|e| {
            ExchangeError::SerializationError(format!("Failed to encode {} frame: {}", self.op, e))
        })?;
        Ok(Message::Text(json_str))
    }
}

fn topic_args(topics: &[impl AsRef<str> + Send + Sync]) -> Vec<Value> {
    topics
        .iter()
        .map(|t| Value::String(t.as_ref().to_string()))
        .collect()
}

/// Bybit V5 WebSocket codec implementation
#[derive(Debug, Clone, Copy, Default)]
pub struct BybitCodec;

impl WsCodec for BybitCodec {
    fn encode_subscription(
        &self,
        topics: &[impl AsRef<str> + Send + Sync],
    ) -> Result<Message, ExchangeError> {
        BybitCommand {
            op: "subscribe",
            args: topic_args(topics),
        }
        .into_message()
    }

    fn encode_unsubscription(
        &self,
        topics: &[impl AsRef<str> + Send + Sync],
    ) -> Result<Message, ExchangeError> {
        BybitCommand {
            op: "unsubscribe",
            args: topic_args(topics),
        }
        .into_message()
    }

    fn encode_ping(&self) -> Result<Message, ExchangeError> {
        BybitCommand {
            op: "ping",
            args: Vec::new(),
        }
        .into_message()
    }

    fn encode_pong(&self) -> Result<Message, ExchangeError> {
        BybitCommand {
            op: "pong",
            args: Vec::new(),
        }
        .into_message()
    }

    fn encode_auth(
        &self,
        api_key: &str,
        expires: u64,
        signature: &str,
    ) -> Result<Message, ExchangeError> {
        BybitCommand {
            op: "auth",
            args: vec![json!(api_key), json!(expires), json!(signature)],
        }
        .into_message()
    }

    fn decode_frame(&self, frame: Value) -> Result<VenueFrame, ExchangeError> {
        let op = frame.get("op").and_then(Value::as_str).map(str::to_string);
        let success = frame.get("success").and_then(Value::as_bool);
        let message = frame
            .get("ret_msg")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match op.as_deref() {
            // Private channel answers ping with op=pong; public echoes op=ping with ret_msg=pong
            Some("pong") => return Ok(VenueFrame::Pong),
            Some("ping") if success.is_some() || message == "pong" => return Ok(VenueFrame::Pong),
            Some("ping") => return Ok(VenueFrame::Ping),
            Some("auth") => {
                return Ok(VenueFrame::AuthAck {
                    success: success.unwrap_or(false),
                    message,
                })
            }
            _ => {}
        }

        if let Some(topic) = frame.get("topic").and_then(Value::as_str) {
            return Ok(VenueFrame::Data {
                topic: Some(topic.to_string()),
                payload: frame,
            });
        }

        match (op, success) {
            (Some(op), success) => Ok(VenueFrame::CommandAck {
                op,
                success: success.unwrap_or(true),
                message,
            }),
            (None, Some(success)) => Ok(VenueFrame::CommandAck {
                op: String::new(),
                success,
                message,
            }),
            (None, None) => Err(ExchangeError::ProtocolViolation(format!(
                "Unrecognized Bybit frame: {}",
                frame
            ))),
        }
    }
}
