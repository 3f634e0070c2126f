//! Correlation keys: locating an instance by extracted message properties
//! instead of its id.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use baton_types::{EngineError, EngineResult};

/// One named property extraction: `expression` is a dotted path evaluated
/// against an inbound payload, e.g. `"customer.id"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationProperty {
    pub name: String,
    pub expression: String,
}

impl CorrelationProperty {
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
        }
    }
}

/// A message definition under a correlation key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMessage {
    pub message_ref: String,
    pub properties: Vec<CorrelationProperty>,
}

impl CorrelationMessage {
    pub fn new(message_ref: impl Into<String>) -> Self {
        Self {
            message_ref: message_ref.into(),
            properties: Vec::new(),
        }
    }

    pub fn with_property(
        mut self,
        name: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        self.properties.push(CorrelationProperty::new(name, expression));
        self
    }
}

/// A logical correlation key with its message definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationKey {
    pub name: String,
    pub messages: Vec<CorrelationMessage>,
}

impl CorrelationKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: CorrelationMessage) -> Self {
        self.messages.push(message);
        self
    }
}

/// The composite value produced by evaluating a key's properties against a
/// payload. Stable across property ordering: parts are keyed by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationValue {
    pub parts: BTreeMap<String, Value>,
}

impl CorrelationValue {
    /// Canonical string form, usable as an index key.
    pub fn as_key(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.parts {
            if !out.is_empty() {
                out.push('|');
            }
            out.push_str(name);
            out.push('=');
            out.push_str(&value.to_string());
        }
        out
    }
}

/// Correlation keys of one process definition.
///
/// A key name is unique within the definition; registering it twice is a
/// build-time error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationManager {
    keys: BTreeMap<String, CorrelationKey>,
}

impl CorrelationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_key(&mut self, key: CorrelationKey) -> EngineResult<()> {
        if self.keys.contains_key(&key.name) {
            return Err(EngineError::DuplicateCorrelationKey(key.name));
        }
        self.keys.insert(key.name.clone(), key);
        Ok(())
    }

    pub fn key(&self, name: &str) -> Option<&CorrelationKey> {
        self.keys.get(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &CorrelationKey> {
        self.keys.values()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Evaluate a key against an inbound payload.
    ///
    /// The first message definition whose properties all resolve produces the
    /// composite value; a payload resolving no message yields `None`.
    pub fn evaluate(&self, key_name: &str, payload: &Value) -> Option<CorrelationValue> {
        let key = self.keys.get(key_name)?;
        for message in &key.messages {
            if message.properties.is_empty() {
                continue;
            }
            let mut parts = BTreeMap::new();
            let mut complete = true;
            for property in &message.properties {
                match resolve_path(payload, &property.expression) {
                    Some(value) => {
                        parts.insert(property.name.clone(), value.clone());
                    }
                    None => {
                        complete = false;
                        break;
                    }
                }
            }
            if complete {
                return Some(CorrelationValue { parts });
            }
        }
        None
    }
}

/// Walk a dotted path through nested JSON objects.
fn resolve_path<'a>(payload: &'a Value, expression: &str) -> Option<&'a Value> {
    let mut current = payload;
    for segment in expression.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn order_key() -> CorrelationKey {
        CorrelationKey::new("order").with_message(
            CorrelationMessage::new("order-message")
                .with_property("orderId", "order.id")
                .with_property("customer", "order.customer.name"),
        )
    }

    #[test]
    fn test_duplicate_key_registration_is_an_error() {
        let mut manager = CorrelationManager::new();
        manager.register_key(order_key()).unwrap();
        let result = manager.register_key(order_key());
        assert!(matches!(
            result,
            Err(EngineError::DuplicateCorrelationKey(name)) if name == "order"
        ));
    }

    #[test]
    fn test_evaluate_extracts_composite_value() {
        let mut manager = CorrelationManager::new();
        manager.register_key(order_key()).unwrap();

        let payload = json!({
            "order": { "id": 42, "customer": { "name": "acme" } }
        });
        let value = manager.evaluate("order", &payload).unwrap();
        assert_eq!(value.parts["orderId"], json!(42));
        assert_eq!(value.parts["customer"], json!("acme"));
    }

    #[test]
    fn test_evaluate_requires_every_property() {
        let mut manager = CorrelationManager::new();
        manager.register_key(order_key()).unwrap();

        let payload = json!({ "order": { "id": 42 } });
        assert!(manager.evaluate("order", &payload).is_none());
        assert!(manager.evaluate("missing-key", &payload).is_none());
    }

    #[test]
    fn test_falls_through_to_next_message_definition() {
        let key = CorrelationKey::new("order")
            .with_message(
                CorrelationMessage::new("rich").with_property("orderId", "order.id"),
            )
            .with_message(
                CorrelationMessage::new("flat").with_property("orderId", "orderId"),
            );
        let mut manager = CorrelationManager::new();
        manager.register_key(key).unwrap();

        let value = manager.evaluate("order", &json!({ "orderId": 7 })).unwrap();
        assert_eq!(value.parts["orderId"], json!(7));
    }

    #[test]
    fn test_composite_key_form_is_stable() {
        let a = CorrelationValue {
            parts: [
                ("b".to_string(), json!(2)),
                ("a".to_string(), json!("x")),
            ]
            .into_iter()
            .collect(),
        };
        assert_eq!(a.as_key(), "a=\"x\"|b=2");
    }
}
