// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event is a single schema-less structured record moving through the pipeline.
///
/// Field values are `serde_json::Value`, a tagged variant over text, number,
/// boolean, null, sequence and mapping, so any JSON object read from a source
/// leaves a sink with the same shape. Field order follows insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event {
    fields: Map<String, Value>,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Set a field, replacing and returning any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(name.into(), value.into())
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.shift_remove(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Serialize to a single JSON line, without the trailing newline.
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.fields)
    }
}

impl From<Map<String, Value>> for Event {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

impl TryFrom<Value> for Event {
    type Error = Value;

    /// Only JSON objects convert into events; the value is handed back otherwise.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_and_remove() {
        let mut event = Event::new();
        assert!(event.is_empty());

        assert_eq!(None, event.insert("msg", "hello"));
        assert_eq!(Some(Value::from("hello")), event.insert("msg", "bye"));
        assert_eq!(1, event.len());

        assert_eq!(Some(Value::from("bye")), event.remove("msg"));
        assert_eq!(None, event.remove("msg"));
        assert!(!event.contains("msg"));
    }

    #[test]
    fn test_nested_values_survive_serialization() {
        let value = json!({
            "msg": "hello",
            "count": 3,
            "ok": true,
            "nothing": null,
            "tags": ["a", "b"],
            "ctx": {"pod": "web-1"}
        });
        let event = Event::try_from(value.clone()).unwrap();

        let line = event.to_json_line().unwrap();
        assert!(!line.contains('\n'));
        let back: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value, back);
    }

    #[test]
    fn test_field_order_is_insertion_order() {
        let mut event = Event::new();
        event.insert("z", 1);
        event.insert("a", 2);
        event.insert("m", 3);

        assert_eq!(r#"{"z":1,"a":2,"m":3}"#, event.to_json_line().unwrap());
    }

    #[test]
    fn test_non_object_is_rejected() {
        assert!(Event::try_from(json!([1, 2])).is_err());
        assert!(Event::try_from(json!("text")).is_err());
    }
}
