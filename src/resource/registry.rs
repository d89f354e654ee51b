//! Keyed collection of lazy resources with bulk warm-up.

use crate::error::ResourceError;
use crate::resource::{LazyResource, ResourceKey, ResourceLoader, ResourceStatus};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// Lazy resources keyed by (system, id)
pub struct ResourceRegistry<T> {
    resources: RwLock<HashMap<ResourceKey, LazyResource<T>>>,
}

impl<T> Default for ResourceRegistry<T> {
    fn default() -> Self {
        Self {
            resources: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> ResourceRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a loader. Re-registering a key replaces it with a fresh, unloaded entry.
    pub fn register<L>(&self, system: &str, id: &str, loader: L) -> LazyResource<T>
    where
        L: ResourceLoader<T> + 'static,
    {
        let key = ResourceKey::new(system, id);
        let resource = LazyResource::new(key.clone(), loader);
        if self
            .resources
            .write()
            .insert(key.clone(), resource.clone())
            .is_some()
        {
            debug!(resource = %key, "Replaced registered resource");
        }
        resource
    }

    /// Handle to a registered resource
    pub fn resource(&self, system: &str, id: &str) -> Result<LazyResource<T>, ResourceError> {
        self.resources
            .read()
            .get(&ResourceKey::new(system, id))
            .cloned()
            .ok_or_else(|| ResourceError::NotFound {
                system: system.to_string(),
                id: id.to_string(),
            })
    }

    /// Load (once) and return a registered resource.
    pub async fn get(&self, system: &str, id: &str) -> Result<T, ResourceError> {
        let resource = self.resource(system, id)?;
        resource.get().await
    }

    /// Cached value of a registered resource, without loading
    pub fn get_sync(&self, system: &str, id: &str) -> Result<Option<T>, ResourceError> {
        Ok(self.resource(system, id)?.get_sync())
    }

    pub fn status(&self, system: &str, id: &str) -> Result<ResourceStatus, ResourceError> {
        Ok(self.resource(system, id)?.status())
    }

    /// Preload the listed resources without waiting. Unknown keys are skipped.
    /// Returns how many loads were started.
    pub fn preload(&self, keys: &[ResourceKey]) -> usize {
        let selected: Vec<LazyResource<T>> = {
            let resources = self.resources.read();
            keys.iter()
                .filter_map(|key| resources.get(key).cloned())
                .collect()
        };
        selected.iter().filter(|resource| resource.preload()).count()
    }

    /// Preload every registered resource without waiting.
    pub fn preload_all(&self) -> usize {
        let all: Vec<LazyResource<T>> = self.resources.read().values().cloned().collect();
        let started = all.iter().filter(|resource| resource.preload()).count();
        debug!(registered = all.len(), started, "Preloading all resources");
        started
    }

    /// Registered keys, sorted
    pub fn keys(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<ResourceKey> = self.resources.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.resources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.read().is_empty()
    }
}
