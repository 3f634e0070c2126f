//! Instance store contract and the in-memory reference implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::RwLock;

use baton_types::{EngineResult, ProcessInstanceId, ReadMode};

use crate::instance::ProcessInstance;

/// Store of process instances, keyed by instance id.
///
/// `mode` controls the returned copies: a `ReadOnly` copy rejects every
/// mutating call, so callers cannot accidentally mutate state they never
/// intend to persist.
#[async_trait]
pub trait ProcessInstances: Send + Sync {
    /// Find an instance by id.
    async fn find_by_id(
        &self,
        id: &ProcessInstanceId,
        mode: ReadMode,
    ) -> EngineResult<Option<ProcessInstance>>;

    /// Find an instance by its business key.
    async fn find_by_business_key(
        &self,
        key: &str,
        mode: ReadMode,
    ) -> EngineResult<Option<ProcessInstance>>;

    /// Whether an instance with the id exists.
    async fn exists(&self, id: &ProcessInstanceId) -> EngineResult<bool> {
        Ok(self.find_by_id(id, ReadMode::ReadOnly).await?.is_some())
    }

    /// Stream every stored instance as a copy in the given mode.
    async fn stream(
        &self,
        mode: ReadMode,
    ) -> EngineResult<BoxStream<'static, EngineResult<ProcessInstance>>>;

    /// Create or replace the stored state for an id.
    async fn update(&self, id: &ProcessInstanceId, instance: &ProcessInstance)
        -> EngineResult<()>;

    /// Remove an instance; removing an unknown id is a no-op.
    async fn remove(&self, id: &ProcessInstanceId) -> EngineResult<()>;
}

/// In-memory store for development and testing.
#[derive(Debug, Default)]
pub struct InMemoryProcessInstances {
    instances: Arc<RwLock<HashMap<ProcessInstanceId, ProcessInstance>>>,
}

impl InMemoryProcessInstances {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.instances.read().await.is_empty()
    }
}

fn copy_with_mode(instance: &ProcessInstance, mode: ReadMode) -> ProcessInstance {
    let mut copy = instance.clone();
    copy.read_mode = mode;
    copy
}

#[async_trait]
impl ProcessInstances for InMemoryProcessInstances {
    async fn find_by_id(
        &self,
        id: &ProcessInstanceId,
        mode: ReadMode,
    ) -> EngineResult<Option<ProcessInstance>> {
        let instances = self.instances.read().await;
        Ok(instances.get(id).map(|i| copy_with_mode(i, mode)))
    }

    async fn find_by_business_key(
        &self,
        key: &str,
        mode: ReadMode,
    ) -> EngineResult<Option<ProcessInstance>> {
        let instances = self.instances.read().await;
        Ok(instances
            .values()
            .find(|i| i.business_key.as_deref() == Some(key))
            .map(|i| copy_with_mode(i, mode)))
    }

    async fn stream(
        &self,
        mode: ReadMode,
    ) -> EngineResult<BoxStream<'static, EngineResult<ProcessInstance>>> {
        // Snapshot under the lock, stream without it.
        let copies: Vec<EngineResult<ProcessInstance>> = {
            let instances = self.instances.read().await;
            instances
                .values()
                .map(|i| Ok(copy_with_mode(i, mode)))
                .collect()
        };
        Ok(stream::iter(copies).boxed())
    }

    async fn update(
        &self,
        id: &ProcessInstanceId,
        instance: &ProcessInstance,
    ) -> EngineResult<()> {
        let mut stored = instance.clone();
        stored.read_mode = ReadMode::Mutable;
        let mut instances = self.instances.write().await;
        instances.insert(id.clone(), stored);
        Ok(())
    }

    async fn remove(&self, id: &ProcessInstanceId) -> EngineResult<()> {
        let mut instances = self.instances.write().await;
        instances.remove(id);
        Ok(())
    }
}
