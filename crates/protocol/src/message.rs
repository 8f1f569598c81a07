//! NIP-01 relay protocol frames.
//!
//! Client to relay: EVENT, REQ, CLOSE. Relay to client: EVENT, OK, EOSE,
//! CLOSED, NOTICE.

use crate::error::{ProtocolError, Result};
use crate::event::Event;
use crate::filter::Filter;
use serde_json::Value;

/// Messages sent from client to relay.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    /// Publish an event: ["EVENT", <event JSON>]
    Event(Event),

    /// Subscribe to events: ["REQ", <subscription_id>, <filter>, ...]
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },

    /// Close a subscription: ["CLOSE", <subscription_id>]
    Close { subscription_id: String },
}

impl ClientMessage {
    /// Serialize to the JSON array frame sent to the relay.
    pub fn to_json(&self) -> Result<String> {
        let value = match self {
            ClientMessage::Event(event) => serde_json::json!(["EVENT", event]),
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                let mut arr: Vec<Value> = vec![
                    Value::String("REQ".to_string()),
                    Value::String(subscription_id.clone()),
                ];
                for filter in filters {
                    arr.push(serde_json::to_value(filter)?);
                }
                Value::Array(arr)
            }
            ClientMessage::Close { subscription_id } => {
                serde_json::json!(["CLOSE", subscription_id])
            }
        };
        Ok(value.to_string())
    }
}

/// Messages sent from relay to client.
#[derive(Debug, Clone)]
pub enum RelayMessage {
    /// Event matching a subscription: ["EVENT", <subscription_id>, <event>]
    Event {
        subscription_id: String,
        event: Event,
    },

    /// Command result: ["OK", <event_id>, <true|false>, <message>]
    Ok {
        event_id: String,
        success: bool,
        message: String,
    },

    /// End of stored events: ["EOSE", <subscription_id>]
    Eose { subscription_id: String },

    /// Subscription closed by relay: ["CLOSED", <subscription_id>, <message>]
    Closed {
        subscription_id: String,
        message: String,
    },

    /// Human-readable notice: ["NOTICE", <message>]
    Notice { message: String },
}

impl RelayMessage {
    /// Parse a JSON frame received from the relay.
    ///
    /// Unknown frame types parse to `None` so a relay speaking a newer
    /// protocol revision does not break the connection.
    pub fn from_json(json: &str) -> Result<Option<Self>> {
        let value: Value = serde_json::from_str(json)?;
        let arr = value
            .as_array()
            .ok_or_else(|| ProtocolError::InvalidFormat("not an array".to_string()))?;

        let msg_type = arr
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::InvalidFormat("missing frame type".to_string()))?;

        match msg_type {
            "EVENT" => {
                let subscription_id = str_at(arr, 1, "EVENT subscription id")?;
                let event_value = arr
                    .get(2)
                    .ok_or_else(|| ProtocolError::InvalidFormat("EVENT missing event".to_string()))?;
                let event: Event = serde_json::from_value(event_value.clone())?;
                Ok(Some(RelayMessage::Event {
                    subscription_id,
                    event,
                }))
            }
            "OK" => {
                let event_id = str_at(arr, 1, "OK event id")?;
                let success = arr
                    .get(2)
                    .and_then(Value::as_bool)
                    .ok_or_else(|| ProtocolError::InvalidFormat("OK accepted flag".to_string()))?;
                let message = str_at(arr, 3, "OK message")?;
                Ok(Some(RelayMessage::Ok {
                    event_id,
                    success,
                    message,
                }))
            }
            "EOSE" => Ok(Some(RelayMessage::Eose {
                subscription_id: str_at(arr, 1, "EOSE subscription id")?,
            })),
            "CLOSED" => Ok(Some(RelayMessage::Closed {
                subscription_id: str_at(arr, 1, "CLOSED subscription id")?,
                message: str_at(arr, 2, "CLOSED message")?,
            })),
            "NOTICE" => Ok(Some(RelayMessage::Notice {
                message: str_at(arr, 1, "NOTICE message")?,
            })),
            _ => Ok(None),
        }
    }
}

fn str_at(arr: &[Value], idx: usize, what: &str) -> Result<String> {
    arr.get(idx)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProtocolError::InvalidFormat(format!("{what} must be a string")))
}
