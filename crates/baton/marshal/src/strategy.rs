//! Object-marshalling strategies and the registry that selects them.
//!
//! A strategy turns one variable value into bytes and back. The registry is
//! an explicit, constructed object passed into every marshal/unmarshal call;
//! there is no process-wide strategy state, so tests can substitute strategy
//! sets freely. Selection is first-accepting-wins in registration order.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::{MarshalError, MarshalResult};
use crate::wire::{StrategyEntry, VariableRecord};

/// Encodes and decodes the variable values it accepts.
///
/// Implementations are pluggable; failures are reported as plain reasons and
/// wrapped into [`MarshalError::Strategy`] by the caller.
pub trait ObjectStrategy: Send + Sync {
    /// Stable name written into the snapshot's strategy table. Readers
    /// resolve table entries by this name, so it must not change between
    /// releases that share persisted snapshots.
    fn name(&self) -> &str;

    /// Whether this strategy can encode the value.
    fn accepts(&self, value: &Value) -> bool;

    /// Strategy-specific context written next to the table entry.
    fn context(&self) -> Option<Vec<u8>> {
        None
    }

    /// Logical type tag recorded per variable.
    fn data_type_of(&self, value: &Value) -> String;

    fn encode(&self, value: &Value) -> Result<Vec<u8>, String>;

    fn decode(&self, data_type: &str, bytes: &[u8]) -> Result<Value, String>;
}

/// Default strategy: any value as canonical JSON text.
pub struct JsonStrategy;

impl ObjectStrategy for JsonStrategy {
    fn name(&self) -> &str {
        "json"
    }

    fn accepts(&self, _value: &Value) -> bool {
        true
    }

    fn data_type_of(&self, value: &Value) -> String {
        let tag = match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        };
        tag.to_string()
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, String> {
        serde_json::to_vec(value).map_err(|err| err.to_string())
    }

    fn decode(&self, _data_type: &str, bytes: &[u8]) -> Result<Value, String> {
        serde_json::from_slice(bytes).map_err(|err| err.to_string())
    }
}

/// Ordered set of registered strategies.
pub struct StrategyRegistry {
    strategies: Vec<Arc<dyn ObjectStrategy>>,
}

impl StrategyRegistry {
    /// Empty registry; [`StrategyRegistry::with_defaults`] is the usual
    /// starting point.
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// Registry holding the [`JsonStrategy`] fallback.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(JsonStrategy));
        registry
    }

    /// Append a strategy. Earlier registrations win selection ties.
    pub fn register(&mut self, strategy: Arc<dyn ObjectStrategy>) {
        self.strategies.push(strategy);
    }

    /// First registered strategy accepting the value.
    pub fn select(&self, value: &Value) -> Option<&Arc<dyn ObjectStrategy>> {
        self.strategies.iter().find(|s| s.accepts(value))
    }

    pub fn by_name(&self, name: &str) -> Option<&Arc<dyn ObjectStrategy>> {
        self.strategies.iter().find(|s| s.name() == name)
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ── Write-session table ──────────────────────────────────────────────────

/// Strategy table assembled during one write session.
///
/// Ids are assigned by first use, starting at 0, and recorded in the
/// envelope so readers can rebuild the same mapping by name.
pub(crate) struct WriteTable<'r> {
    registry: &'r StrategyRegistry,
    used: Vec<Arc<dyn ObjectStrategy>>,
}

impl<'r> WriteTable<'r> {
    pub(crate) fn new(registry: &'r StrategyRegistry) -> Self {
        Self {
            registry,
            used: Vec::new(),
        }
    }

    /// Encode one variable, assigning its strategy an id on first use.
    ///
    /// A `null` value is written with an absent `value` field; the selected
    /// strategy still claims the record so the table stays uniform.
    pub(crate) fn encode_variable(
        &mut self,
        name: &str,
        value: &Value,
    ) -> MarshalResult<VariableRecord> {
        let strategy = self
            .registry
            .select(value)
            .ok_or_else(|| MarshalError::UnsupportedVariable(name.to_string()))?;
        let strategy = Arc::clone(strategy);
        let index = self.index_of(&strategy);

        let value_bytes = if value.is_null() {
            None
        } else {
            Some(
                strategy
                    .encode(value)
                    .map_err(|reason| MarshalError::Strategy {
                        strategy: strategy.name().to_string(),
                        name: name.to_string(),
                        reason,
                    })?,
            )
        };

        Ok(VariableRecord {
            name: name.to_string(),
            strategy_index: index,
            data_type: strategy.data_type_of(value),
            value: value_bytes,
        })
    }

    fn index_of(&mut self, strategy: &Arc<dyn ObjectStrategy>) -> u32 {
        if let Some(position) = self.used.iter().position(|s| s.name() == strategy.name()) {
            return position as u32;
        }
        let id = self.used.len() as u32;
        debug!(strategy = strategy.name(), id, "assigned snapshot strategy id");
        self.used.push(Arc::clone(strategy));
        id
    }

    pub(crate) fn entries(&self) -> Vec<StrategyEntry> {
        self.used
            .iter()
            .enumerate()
            .map(|(id, strategy)| StrategyEntry {
                id: id as u32,
                name: strategy.name().to_string(),
                data: strategy.context(),
            })
            .collect()
    }
}

// ── Read-side table ──────────────────────────────────────────────────────

/// Strategy table rebuilt from an envelope by name lookup.
pub(crate) struct ReadTable {
    by_id: HashMap<u32, Arc<dyn ObjectStrategy>>,
}

impl ReadTable {
    /// Resolve every table entry against the registry, failing on the first
    /// unknown name before any payload field is decoded.
    pub(crate) fn rebuild(
        registry: &StrategyRegistry,
        entries: &[StrategyEntry],
    ) -> MarshalResult<Self> {
        let mut by_id = HashMap::with_capacity(entries.len());
        for entry in entries {
            let strategy = registry
                .by_name(&entry.name)
                .ok_or_else(|| MarshalError::UnknownStrategy(entry.name.clone()))?;
            by_id.insert(entry.id, Arc::clone(strategy));
        }
        Ok(Self { by_id })
    }

    /// Decode one variable record into its name and value.
    pub(crate) fn decode_variable(&self, record: &VariableRecord) -> MarshalResult<(String, Value)> {
        let Some(bytes) = &record.value else {
            return Ok((record.name.clone(), Value::Null));
        };
        let strategy = self
            .by_id
            .get(&record.strategy_index)
            .ok_or(MarshalError::BadStrategyIndex(record.strategy_index))?;
        let value = strategy
            .decode(&record.data_type, bytes)
            .map_err(|reason| MarshalError::Strategy {
                strategy: strategy.name().to_string(),
                name: record.name.clone(),
                reason,
            })?;
        Ok((record.name.clone(), value))
    }
}

impl fmt::Debug for ReadTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut strategies: Vec<(u32, &str)> = self
            .by_id
            .iter()
            .map(|(id, strategy)| (*id, strategy.name()))
            .collect();
        strategies.sort_unstable();
        f.debug_struct("ReadTable")
            .field("strategies", &strategies)
            .finish()
    }
}
