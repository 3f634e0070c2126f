//! Signals: addressed event payloads delivered to running instances.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An addressed event payload.
///
/// Immutable value object: build one with [`Signal::new`], optionally attach a
/// reference id, and hand it to the dispatch path. The channel is the address
/// matched against waiting node instances and event filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub channel: String,
    pub payload: Value,
    pub reference_id: Option<String>,
}

impl Signal {
    pub fn new(channel: impl Into<String>, payload: Value) -> Self {
        Self {
            channel: channel.into(),
            payload,
            reference_id: None,
        }
    }

    /// A signal with no payload.
    pub fn bare(channel: impl Into<String>) -> Self {
        Self::new(channel, Value::Null)
    }

    pub fn with_reference_id(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_signal_construction() {
        let signal = Signal::new("order-placed", json!({"order": 42}))
            .with_reference_id("ref-1");
        assert_eq!(signal.channel, "order-placed");
        assert_eq!(signal.payload["order"], 42);
        assert_eq!(signal.reference_id.as_deref(), Some("ref-1"));
    }

    #[test]
    fn test_bare_signal_has_null_payload() {
        let signal = Signal::bare("timer");
        assert_eq!(signal.payload, Value::Null);
        assert!(signal.reference_id.is_none());
    }
}
