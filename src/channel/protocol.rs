//! Wire frames exchanged over the realtime WebSocket.
//!
//! Every frame is one JSON text message. Clients send commands tagged by
//! `command`; the server answers with frames tagged by `type`.

use serde::{Deserialize, Serialize};

/// Client → server command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Start receiving `event` messages on `channel`.
    Subscribe {
        /// Channel name.
        channel: String,
        /// Event name filter.
        event: String,
    },
    /// Stop receiving messages on `channel`.
    Unsubscribe {
        /// Channel name.
        channel: String,
    },
}

/// Server → client frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Sent once after the handshake.
    Welcome {
        /// Server-assigned connection id.
        #[serde(rename = "connectionId")]
        connection_id: String,
    },
    /// Subscription accepted.
    ConfirmSubscription {
        /// Channel name.
        channel: String,
        /// Event name filter.
        event: String,
    },
    /// Subscription refused (capability mismatch).
    RejectSubscription {
        /// Channel name.
        channel: String,
        /// Why it was refused.
        reason: String,
    },
    /// A published event.
    Message {
        /// Channel name.
        channel: String,
        /// Event name.
        name: String,
        /// Event payload.
        data: serde_json::Value,
    },
    /// Subscription removed.
    Unsubscribed {
        /// Channel name.
        channel: String,
    },
    /// Liveness ping.
    Ping {
        /// Server time, epoch milliseconds.
        timestamp: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_wire_format() {
        let frame = ClientFrame::Subscribe {
            channel: "notifications".into(),
            event: "form-submission".into(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"command": "subscribe", "channel": "notifications", "event": "form-submission"})
        );
    }

    #[test]
    fn test_parse_server_frames() {
        let welcome: ServerFrame =
            serde_json::from_str(r#"{"type":"welcome","connectionId":"c1"}"#).unwrap();
        assert_eq!(welcome, ServerFrame::Welcome { connection_id: "c1".into() });

        let msg: ServerFrame = serde_json::from_str(
            r#"{"type":"message","channel":"notifications","name":"form-submission","data":{"message":"m"}}"#,
        )
        .unwrap();
        assert!(matches!(msg, ServerFrame::Message { ref name, .. } if name == "form-submission"));
    }

    #[test]
    fn test_unknown_frame_type_is_error() {
        assert!(serde_json::from_str::<ServerFrame>(r#"{"type":"bogus"}"#).is_err());
    }
}
