//! Response envelope normalization
//!
//! The portal API wraps most payloads as `{"success": {"data": ...}}`, some
//! endpoints answer `{"data": ...}`, and a few return the payload bare. All of
//! them pass through [`Envelope::normalize`] exactly once before a caller sees
//! them.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// A response body after envelope detection
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Payload found under `success.data` or `data`
    Success(Value),
    /// No recognised envelope; the body is the payload
    Raw(Value),
}

impl Envelope {
    /// Classify a decoded response body
    pub fn normalize(body: Value) -> Self {
        match body {
            Value::Object(mut map) => {
                let nested = map
                    .get_mut("success")
                    .and_then(Value::as_object_mut)
                    .and_then(|success| success.remove("data"));
                if let Some(data) = nested {
                    return Self::Success(data);
                }
                if let Some(data) = map.remove("data") {
                    return Self::Success(data);
                }
                Self::Raw(Value::Object(map))
            }
            other => Self::Raw(other),
        }
    }

    /// Whether a recognised envelope was stripped
    pub fn is_enveloped(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The inner payload, whichever variant carried it
    pub fn into_payload(self) -> Value {
        match self {
            Self::Success(value) | Self::Raw(value) => value,
        }
    }

    /// Deserialize the inner payload
    pub fn decode<T: DeserializeOwned>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.into_payload())
    }
}
