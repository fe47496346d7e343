//! Event bodies carried in `general` envelopes

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::wire::CodecError;

/// A named event with an arbitrary JSON value
///
/// Encoded as the UTF-8 JSON object `{"event": <name>, "data": <value>}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name handlers are registered under
    pub event: String,
    /// Event data; `null` when absent
    #[serde(default)]
    pub data: Value,
}

impl Event {
    /// Create an event from an already built value
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Event {
            event: event.into(),
            data,
        }
    }

    /// Create an event from any serializable data
    pub fn from_data<T: Serialize + ?Sized>(
        event: impl Into<String>,
        data: &T,
    ) -> Result<Self, CodecError> {
        let data =
            serde_json::to_value(data).map_err(|e| CodecError::InvalidEvent(e.to_string()))?;
        Ok(Self::new(event, data))
    }

    /// Encode as a `general` payload
    pub fn to_payload(&self) -> Result<Vec<u8>, CodecError> {
        if self.event.is_empty() {
            return Err(CodecError::InvalidEvent("empty event name".to_string()));
        }
        serde_json::to_vec(self).map_err(|e| CodecError::InvalidEvent(e.to_string()))
    }

    /// Decode a `general` payload
    pub fn from_payload(payload: &[u8]) -> Result<Self, CodecError> {
        let event: Event = serde_json::from_slice(payload)
            .map_err(|e| CodecError::InvalidEvent(e.to_string()))?;
        if event.event.is_empty() {
            return Err(CodecError::InvalidEvent("empty event name".to_string()));
        }
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_shape() {
        let event = Event::from_data("test-event", "hello world").unwrap();
        let payload = event.to_payload().unwrap();

        let value: Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value, json!({"event": "test-event", "data": "hello world"}));
        assert_eq!(Event::from_payload(&payload).unwrap(), event);
    }

    #[test]
    fn test_missing_data_is_null() {
        let event = Event::from_payload(br#"{"event":"ping"}"#).unwrap();
        assert_eq!(event.data, Value::Null);
    }

    #[test]
    fn test_rejects_bad_payloads() {
        assert!(Event::from_payload(b"\xff\xfe").is_err());
        assert!(Event::from_payload(br#"{"data":1}"#).is_err());
        assert!(Event::from_payload(br#"{"event":"","data":1}"#).is_err());
        assert!(Event::new("", json!(1)).to_payload().is_err());
    }
}
