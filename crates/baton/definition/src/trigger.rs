//! Start conditions a node can carry: event filters, timers, conditionals.

use serde::{Deserialize, Serialize};

/// Reserved marker separating a cycle expression from its repeat-limit suffix.
///
/// `"PT5M###3"` means: cycle every five minutes, at most three firings. The
/// linker splits the suffix off before the timer is registered.
pub const CYCLE_REPEAT_SEPARATOR: &str = "###";

/// A start condition attached to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Trigger {
    /// Start when an external event matching one of the filters arrives.
    Event { filters: Vec<EventFilter> },
    /// Start when the external scheduler fires the timer.
    Timer { spec: TimerSpec },
    /// Start when explicitly asked for a conditional start; `condition` names
    /// a predicate registered with the runtime.
    Conditional { condition: String },
}

impl Trigger {
    pub fn event(filters: Vec<EventFilter>) -> Self {
        Trigger::Event { filters }
    }

    pub fn timer(spec: TimerSpec) -> Self {
        Trigger::Timer { spec }
    }

    pub fn conditional(condition: impl Into<String>) -> Self {
        Trigger::Conditional {
            condition: condition.into(),
        }
    }
}

/// Matches an inbound signal channel against an expected event type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    pub event_type: String,
}

impl EventFilter {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
        }
    }

    pub fn accepts(&self, channel: &str) -> bool {
        self.event_type == channel
    }
}

/// Timer specification. Expressions are opaque to the engine; the external
/// scheduler interprets them and injects a synthetic signal when firing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerSpec {
    /// Fire once after a delay, e.g. `"PT30S"`.
    Duration(String),
    /// Fire repeatedly; `repeat_limit` caps the number of firings.
    Cycle {
        expression: String,
        repeat_limit: Option<u32>,
    },
    /// Fire once at a fixed point in time.
    Date(String),
}

impl TimerSpec {
    pub fn duration(expression: impl Into<String>) -> Self {
        TimerSpec::Duration(expression.into())
    }

    /// A cycle spec as authored; any repeat-limit suffix stays embedded until
    /// the linker splits it.
    pub fn cycle(expression: impl Into<String>) -> Self {
        TimerSpec::Cycle {
            expression: expression.into(),
            repeat_limit: None,
        }
    }

    pub fn date(expression: impl Into<String>) -> Self {
        TimerSpec::Date(expression.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_accepts_exact_channel_only() {
        let filter = EventFilter::new("order-placed");
        assert!(filter.accepts("order-placed"));
        assert!(!filter.accepts("order-cancelled"));
        assert!(!filter.accepts("order-placed-v2"));
    }

    #[test]
    fn test_cycle_keeps_raw_expression() {
        let spec = TimerSpec::cycle("PT5M###3");
        assert_eq!(
            spec,
            TimerSpec::Cycle {
                expression: "PT5M###3".to_string(),
                repeat_limit: None,
            }
        );
    }

    #[test]
    fn test_trigger_constructors() {
        let t = Trigger::event(vec![EventFilter::new("go")]);
        assert!(matches!(t, Trigger::Event { ref filters } if filters.len() == 1));
        assert!(matches!(
            Trigger::conditional("ready"),
            Trigger::Conditional { ref condition } if condition == "ready"
        ));
    }
}
