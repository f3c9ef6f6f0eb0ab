//! The fan-in channel: the single path carrying every listener payload from
//! the native side to the consumer.
//!
//! Messages are demultiplexed on the consumer side by `uniqueID`. Delivery is
//! best-effort: if the consumer end is gone, messages are dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::payload::TaggedPayload;

/// Name of the fan-in channel as seen by the consumer.
pub const FAN_IN_CHANNEL: &str = "onEventListener";

/// One listener delivery crossing the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryMessage {
    /// Identifier of the binding that fired.
    #[serde(rename = "uniqueID")]
    pub unique_id: String,
    /// Event the binding was registered for.
    #[serde(rename = "eventName")]
    pub event_name: String,
    /// Tagged payload of the first event argument.
    pub data: TaggedPayload,
}

/// Native-side end of the fan-in channel.
pub type FanInSender = mpsc::UnboundedSender<BoundaryMessage>;

/// Consumer-side end of the fan-in channel.
pub type FanInReceiver = mpsc::UnboundedReceiver<BoundaryMessage>;

/// Create a new fan-in channel.
#[must_use]
pub fn fan_in_channel() -> (FanInSender, FanInReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_field_names() {
        let msg = BoundaryMessage {
            unique_id: "abc".to_string(),
            event_name: "welcome".to_string(),
            data: TaggedPayload::Boolean(true),
        };

        let encoded = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            encoded,
            json!({
                "uniqueID": "abc",
                "eventName": "welcome",
                "data": { "type": "boolean", "value": true }
            })
        );
    }

    #[test]
    fn test_channel_preserves_order() {
        let (tx, mut rx) = fan_in_channel();
        for i in 0..3 {
            tx.send(BoundaryMessage {
                unique_id: "id".to_string(),
                event_name: "tick".to_string(),
                data: TaggedPayload::Integer(i),
            })
            .unwrap();
        }

        let received: Vec<TaggedPayload> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|m| m.data)
            .collect();
        assert_eq!(
            received,
            vec![
                TaggedPayload::Integer(0),
                TaggedPayload::Integer(1),
                TaggedPayload::Integer(2)
            ]
        );
    }
}
