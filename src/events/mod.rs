//! # Events Module
//!
//! Audit events and the process-wide event bus.
//!
//! Every mutating success emits exactly one [`Event`] through [`EventBus::publish`]
//! before the response is written. The bus keeps a bounded history; when full the
//! oldest event is evicted and counted as dropped. Registered [`EventSink`]s run
//! synchronously after the event is appended.

mod bus;

pub use bus::{EventBus, EventSink};

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// Ordered key/value payload of an event; serializes as a JSON object in
/// insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(Vec<(String, Value)>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite `key`, keeping its original position on overwrite.
    pub fn insert(&mut self, key: &str, value: impl Serialize) {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        match self.0.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Fields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Fields {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldsVisitor;

        impl<'de> Visitor<'de> for FieldsVisitor {
            type Value = Fields;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of event fields")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Fields, A::Error> {
                let mut fields = Fields::new();
                while let Some((k, v)) = access.next_entry::<String, Value>()? {
                    fields.0.push((k, v));
                }
                Ok(fields)
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Fields, E> {
                Ok(Fields::new())
            }
        }

        deserializer.deserialize_any(FieldsVisitor)
    }
}

/// Audit record `{type, message, fields, timestamp}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub fields: Fields,
    /// Overwritten by the bus at publish time
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: &str, message: &str) -> Self {
        Self {
            kind: kind.to_string(),
            message: message.to_string(),
            fields: Fields::new(),
            timestamp: Utc::now(),
        }
    }

    /// Builder-style field insertion.
    #[must_use]
    pub fn field(mut self, key: &str, value: impl Serialize) -> Self {
        self.fields.insert(key, value);
        self
    }

    /// True when the event type equals `prefix` or lies under it
    /// (`queue` matches `queue.job.enqueued`; empty matches everything).
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        let prefix = prefix.trim();
        if prefix.is_empty() || prefix == "*" {
            return true;
        }
        self.kind == prefix
            || (self.kind.starts_with(prefix)
                && (prefix.ends_with('.') || self.kind[prefix.len()..].starts_with('.')))
    }
}
