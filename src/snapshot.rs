use crate::prelude::*;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Placeholder strings meaning "no real data yet". Never forwarded as
/// settings or metrics.
pub const SENTINELS: [&str; 2] = ["unknown", "unavailable"];

pub fn is_sentinel(value: &str) -> bool {
    let value = value.trim();
    SENTINELS.iter().any(|s| value.eq_ignore_ascii_case(s))
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn is_sentinel(&self) -> bool {
        match self {
            FieldValue::Text(s) => is_sentinel(s),
            FieldValue::Number(_) => false,
        }
    }

    /// Numeric view of the value. Text that parses as a finite number counts.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) if n.is_finite() => Some(*n),
            FieldValue::Number(_) => None,
            FieldValue::Text(s) if is_sentinel(s) => None,
            FieldValue::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        }
    }

    /// Text view of the value, `None` for sentinels.
    pub fn as_text(&self) -> Option<String> {
        match self {
            FieldValue::Text(s) if is_sentinel(s) => None,
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Number(n) => Some(n.to_string()),
        }
    }

    fn from_json(value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;

        match value {
            Value::Number(n) => n.as_f64().map(FieldValue::Number),
            Value::String(s) => Some(FieldValue::Text(s.clone())),
            Value::Bool(b) => Some(FieldValue::Number(if *b { 1.0 } else { 0.0 })),
            // the bridge only ever sends flat documents
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// One fetch of the inverter's status document.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusSnapshot {
    fields: HashMap<String, FieldValue>,
    time: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn new(fields: HashMap<String, FieldValue>, time: DateTime<Utc>) -> Self {
        Self { fields, time }
    }

    /// Parses a flat JSON object. Anything that is not an object is a
    /// `BridgeError::Parse`.
    pub fn from_json(body: &str, time: DateTime<Utc>) -> Result<Self, BridgeError> {
        let value: serde_json::Value = serde_json::from_str(body)?;

        let object = value
            .as_object()
            .ok_or_else(|| BridgeError::Parse(format!("expected a JSON object, got {}", value)))?;

        let mut fields = HashMap::with_capacity(object.len());
        for (key, value) in object {
            match FieldValue::from_json(value) {
                Some(v) => {
                    fields.insert(key.clone(), v);
                }
                None => trace!("dropping non-scalar field {}", key),
            }
        }

        Ok(Self { fields, time })
    }

    /// Adds fields from `other` that are not already present.
    pub fn merge(mut self, other: StatusSnapshot) -> Self {
        for (key, value) in other.fields {
            self.fields.entry(key).or_insert(value);
        }
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Numeric field, `None` if absent, a sentinel, or not a number.
    pub fn number(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(FieldValue::as_f64)
    }

    /// Text field, `None` if absent or a sentinel.
    pub fn text(&self, field: &str) -> Option<String> {
        self.get(field).and_then(FieldValue::as_text)
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
