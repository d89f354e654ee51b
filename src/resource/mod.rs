//! Lazy Resources
//!
//! Memoized, load-once values such as verification keys or circuit artifacts. The first
//! `get` runs the loader; concurrent callers share that load. A failed load is not
//! retried automatically, the next explicit `get` runs the loader again.

pub mod registry;

pub use registry::ResourceRegistry;

use crate::error::{share_cause, ResourceError};
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Produces the value of a lazy resource.
#[async_trait]
pub trait ResourceLoader<T>: Send + Sync {
    async fn load(&self) -> anyhow::Result<T>;
}

#[async_trait]
impl<T, F, Fut> ResourceLoader<T> for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    async fn load(&self) -> anyhow::Result<T> {
        (self)().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Pending,
    Loading,
    Loaded,
    Failed,
}

/// Composite key: proof system plus resource identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub system: String,
    pub id: String,
}

impl ResourceKey {
    pub fn new(system: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.system, self.id)
    }
}

type LoadOutcome<T> = Result<T, ResourceError>;

struct LoadState<T> {
    status: ResourceStatus,
    value: Option<T>,
    waiters: Vec<oneshot::Sender<LoadOutcome<T>>>,
}

struct ResourceInner<T> {
    key: ResourceKey,
    loader: Arc<dyn ResourceLoader<T>>,
    state: Mutex<LoadState<T>>,
}

/// Cheap-clone handle to a load-once value
pub struct LazyResource<T> {
    inner: Arc<ResourceInner<T>>,
}

impl<T> Clone for LazyResource<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for LazyResource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyResource")
            .field("key", &self.inner.key)
            .field("status", &self.inner.state.lock().status)
            .finish()
    }
}

impl<T> LazyResource<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new<L>(key: ResourceKey, loader: L) -> Self
    where
        L: ResourceLoader<T> + 'static,
    {
        Self {
            inner: Arc::new(ResourceInner {
                key,
                loader: Arc::new(loader),
                state: Mutex::new(LoadState {
                    status: ResourceStatus::Pending,
                    value: None,
                    waiters: Vec::new(),
                }),
            }),
        }
    }

    pub fn key(&self) -> &ResourceKey {
        &self.inner.key
    }

    pub fn status(&self) -> ResourceStatus {
        self.inner.state.lock().status
    }

    /// Cached value without triggering a load
    pub fn get_sync(&self) -> Option<T> {
        self.inner.state.lock().value.clone()
    }

    /// Load on first use, then serve the cached value.
    pub async fn get(&self) -> Result<T, ResourceError> {
        let receiver = {
            let mut state = self.inner.state.lock();
            if let Some(value) = &state.value {
                return Ok(value.clone());
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push(tx);
            if state.status != ResourceStatus::Loading {
                self.start_locked(&mut state);
            }
            rx
        };

        receiver.await.unwrap_or_else(|_| {
            Err(ResourceError::LoadFailed {
                key: self.inner.key.to_string(),
                cause: share_cause(anyhow::anyhow!("load task ended without a result")),
            })
        })
    }

    /// Fire a best-effort background load if nothing was loaded yet.
    pub fn preload(&self) -> bool {
        if tokio::runtime::Handle::try_current().is_err() {
            warn!(resource = %self.inner.key, "No async runtime available, preload skipped");
            return false;
        }
        let mut state = self.inner.state.lock();
        if state.status != ResourceStatus::Pending {
            return false;
        }
        debug!(resource = %self.inner.key, "Preloading resource");
        self.start_locked(&mut state);
        true
    }

    fn start_locked(&self, state: &mut LoadState<T>) {
        state.status = ResourceStatus::Loading;
        let this = self.clone();
        tokio::spawn(async move { this.load().await });
    }

    async fn load(self) {
        let key = self.inner.key.to_string();
        let loader = Arc::clone(&self.inner.loader);

        let outcome = match AssertUnwindSafe(loader.load()).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(ResourceError::LoadFailed {
                key: key.clone(),
                cause: share_cause(err),
            }),
            Err(_) => Err(ResourceError::LoadFailed {
                key: key.clone(),
                cause: share_cause(anyhow::anyhow!("loader panicked")),
            }),
        };

        let waiters = {
            let mut state = self.inner.state.lock();
            match &outcome {
                Ok(value) => {
                    state.status = ResourceStatus::Loaded;
                    state.value = Some(value.clone());
                }
                Err(_) => state.status = ResourceStatus::Failed,
            }
            std::mem::take(&mut state.waiters)
        };

        match &outcome {
            Ok(_) => info!(resource = %key, "Resource loaded"),
            Err(err) => warn!(resource = %key, error = %err, "Resource failed to load"),
        }
        for tx in waiters {
            let _ = tx.send(outcome.clone());
        }
    }
}
