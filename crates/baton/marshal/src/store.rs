//! Snapshot-backed instance store.
//!
//! Holds nothing but marshalled bytes per instance id, one envelope for the
//! instance and one for its work items. Every write runs the full marshal
//! path and every read runs the full unmarshal path, so an engine wired to
//! this store exercises the snapshot protocol on each mutation. It doubles
//! as the reference for durable byte stores: persist the two `Bytes` values
//! wherever you like.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::RwLock;

use baton_runtime::{ProcessInstance, ProcessInstances};
use baton_types::{EngineResult, ProcessInstanceId, ReadMode};

use crate::snapshot::{
    marshal_instance, marshal_work_items, unmarshal_instance, unmarshal_work_items, MarshalConfig,
};
use crate::strategy::StrategyRegistry;

/// Marshalled state of one instance.
#[derive(Clone)]
struct StoredSnapshot {
    instance: Bytes,
    work_items: Bytes,
}

/// `ProcessInstances` implementation over snapshot bytes.
pub struct SnapshotProcessInstances {
    registry: Arc<StrategyRegistry>,
    config: MarshalConfig,
    snapshots: Arc<RwLock<HashMap<ProcessInstanceId, StoredSnapshot>>>,
}

impl SnapshotProcessInstances {
    pub fn new(registry: Arc<StrategyRegistry>, config: MarshalConfig) -> Self {
        Self {
            registry,
            config,
            snapshots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.snapshots.read().await.is_empty()
    }

    /// Raw envelope bytes for one id, instance envelope first.
    pub async fn export(&self, id: &ProcessInstanceId) -> Option<(Bytes, Bytes)> {
        let snapshots = self.snapshots.read().await;
        snapshots
            .get(id)
            .map(|s| (s.instance.clone(), s.work_items.clone()))
    }

    /// Seed the store with previously exported envelopes, replacing any
    /// stored state for the id. The bytes are not validated here; a bad
    /// envelope surfaces on the next read.
    pub async fn import(&self, id: ProcessInstanceId, instance: Bytes, work_items: Bytes) {
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(
            id,
            StoredSnapshot {
                instance,
                work_items,
            },
        );
    }

    fn revive(&self, stored: &StoredSnapshot, mode: ReadMode) -> EngineResult<ProcessInstance> {
        let mut instance = unmarshal_instance(&self.registry, &self.config, &stored.instance)?;
        for item in unmarshal_work_items(&self.registry, &self.config, &stored.work_items)? {
            instance.work_items.insert(item.id.clone(), item);
        }
        instance.read_mode = mode;
        Ok(instance)
    }
}

#[async_trait]
impl ProcessInstances for SnapshotProcessInstances {
    async fn find_by_id(
        &self,
        id: &ProcessInstanceId,
        mode: ReadMode,
    ) -> EngineResult<Option<ProcessInstance>> {
        let snapshots = self.snapshots.read().await;
        snapshots.get(id).map(|s| self.revive(s, mode)).transpose()
    }

    async fn find_by_business_key(
        &self,
        key: &str,
        mode: ReadMode,
    ) -> EngineResult<Option<ProcessInstance>> {
        let snapshots = self.snapshots.read().await;
        for stored in snapshots.values() {
            let instance = self.revive(stored, mode)?;
            if instance.business_key.as_deref() == Some(key) {
                return Ok(Some(instance));
            }
        }
        Ok(None)
    }

    async fn stream(
        &self,
        mode: ReadMode,
    ) -> EngineResult<BoxStream<'static, EngineResult<ProcessInstance>>> {
        // Bytes clones under the lock, unmarshalling without it.
        let stored: Vec<StoredSnapshot> = {
            let snapshots = self.snapshots.read().await;
            snapshots.values().cloned().collect()
        };
        let copies: Vec<EngineResult<ProcessInstance>> =
            stored.iter().map(|s| self.revive(s, mode)).collect();
        Ok(stream::iter(copies).boxed())
    }

    async fn update(
        &self,
        id: &ProcessInstanceId,
        instance: &ProcessInstance,
    ) -> EngineResult<()> {
        let instance_bytes = Bytes::from(marshal_instance(&self.registry, &self.config, instance)?);
        let work_item_bytes =
            Bytes::from(marshal_work_items(&self.registry, &self.config, instance)?);
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(
            id.clone(),
            StoredSnapshot {
                instance: instance_bytes,
                work_items: work_item_bytes,
            },
        );
        Ok(())
    }

    async fn remove(&self, id: &ProcessInstanceId) -> EngineResult<()> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.remove(id);
        Ok(())
    }
}
