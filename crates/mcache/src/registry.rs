//! # Resource Registry
//!
//! Maps resource identities to live [`Resource`]s so every reader of the
//! same remote resource shares one index and one store.
//!
//! Resources are handed out as [`ResourceHandle`]s, each holding one
//! reference. When the last handle is released the resource leaves the
//! active set and is parked in a bounded idle cache; reopening it shortly
//! after reuses the in-memory index instead of reloading the descriptor.

use std::collections::HashMap;
use std::sync::Arc;

use moka::sync::Cache;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{CacheError, Result};
use crate::identity::{DefaultUrlConvertor, ResourceIdentity, UrlConvertor};
use crate::index::ContentIndex;
use crate::loader::{HttpLoader, Loader};
use crate::range::ByteSpan;
use crate::reader::Reader;
use crate::resource::Resource;
use crate::CacheConfig;

type ResourceCell = Arc<OnceCell<Arc<Resource>>>;

struct RegistryInner {
    config: CacheConfig,
    loader: Arc<dyn Loader>,
    convertor: Arc<dyn UrlConvertor>,
    /// Resources with at least one handle, or being opened
    active: Mutex<HashMap<ResourceIdentity, ResourceCell>>,
    /// Released resources kept around for a quick reopen
    idle: Cache<ResourceIdentity, Arc<Resource>>,
}

impl RegistryInner {
    /// Drop one reference. Returns true when the resource became idle.
    fn release(&self, resource: &Arc<Resource>) -> bool {
        let mut active = self.active.lock();
        if resource.release() > 0 {
            return false;
        }

        let identity = resource.identity();
        let current = active
            .get(identity)
            .and_then(|cell| cell.get())
            .is_some_and(|r| Arc::ptr_eq(r, resource));
        if current {
            active.remove(identity);
            self.idle.insert(identity.clone(), Arc::clone(resource));
        }
        debug!(identity = %identity, "Resource released");
        current
    }
}

/// Shared registry of cached resources.
///
/// Cloning is cheap; clones share the same resources.
#[derive(Clone)]
pub struct ResourceRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("root_dir", &self.inner.config.root_dir)
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

impl ResourceRegistry {
    /// Registry fetching over HTTP with the default URL convertor.
    pub fn new(config: CacheConfig) -> Result<Self> {
        let loader = Arc::new(HttpLoader::new(&config)?);
        Ok(Self::with_parts(
            config,
            loader,
            Arc::new(DefaultUrlConvertor::new()),
        ))
    }

    pub fn with_parts(
        config: CacheConfig,
        loader: Arc<dyn Loader>,
        convertor: Arc<dyn UrlConvertor>,
    ) -> Self {
        let idle = Cache::builder()
            .max_capacity(config.idle_resource_capacity)
            .time_to_idle(config.idle_resource_ttl)
            .build();

        info!(
            root_dir = %config.root_dir.display(),
            idle_capacity = config.idle_resource_capacity,
            "Resource registry created"
        );

        Self {
            inner: Arc::new(RegistryInner {
                config,
                loader,
                convertor,
                active: Mutex::new(HashMap::new()),
                idle,
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn convertor(&self) -> &Arc<dyn UrlConvertor> {
        &self.inner.convertor
    }

    /// Identity of `origin` under this registry's convertor.
    pub fn identity_of(&self, origin: &Url) -> Result<ResourceIdentity> {
        self.inner
            .convertor
            .resource_name(origin)
            .ok_or_else(|| CacheError::InvalidUrl(origin.to_string()))
    }

    /// The resource for `origin`, opening it if nobody holds it.
    ///
    /// Concurrent calls for the same origin share one open and get the same
    /// resource instance.
    pub async fn get_or_create(&self, origin: &Url) -> Result<ResourceHandle> {
        let identity = self.identity_of(origin)?;

        loop {
            let cell = {
                let mut active = self.inner.active.lock();
                Arc::clone(active.entry(identity.clone()).or_default())
            };

            let opened = cell
                .get_or_try_init(|| async {
                    if let Some(resource) = self.inner.idle.remove(&identity) {
                        debug!(identity = %identity, "Reviving idle resource");
                        return Ok(resource);
                    }
                    Resource::open(
                        identity.clone(),
                        origin.clone(),
                        Arc::clone(&self.inner.loader),
                        &self.inner.config,
                    )
                    .await
                    .map(Arc::new)
                })
                .await;

            let resource = match opened {
                Ok(resource) => Arc::clone(resource),
                Err(e) => {
                    let mut active = self.inner.active.lock();
                    if active
                        .get(&identity)
                        .is_some_and(|current| Arc::ptr_eq(current, &cell) && !current.initialized())
                    {
                        active.remove(&identity);
                    }
                    return Err(e);
                }
            };

            // The resource may have gone idle between the open and now; only
            // take a reference while its cell is still the active one.
            {
                let active = self.inner.active.lock();
                if active
                    .get(&identity)
                    .is_some_and(|current| Arc::ptr_eq(current, &cell))
                {
                    resource.acquire();
                    return Ok(ResourceHandle {
                        resource,
                        registry: Arc::clone(&self.inner),
                        released: false,
                    });
                }
            }
            debug!(identity = %identity, "Resource went idle while opening, retrying");
        }
    }

    /// Open a reader for `span` of `origin`.
    pub async fn open_reader(&self, origin: &Url, span: ByteSpan) -> Result<Reader> {
        let handle = self.get_or_create(origin).await?;
        Ok(Reader::new(handle, span))
    }

    /// Current index of `origin`.
    pub async fn inspect(&self, origin: &Url) -> Result<ContentIndex> {
        let handle = self.get_or_create(origin).await?;
        let index = handle.resource().snapshot();
        handle.release().await;
        Ok(index)
    }

    /// Number of resources with live handles.
    pub fn active_count(&self) -> usize {
        self.inner
            .active
            .lock()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    /// Number of released resources still held in memory.
    pub fn idle_count(&self) -> u64 {
        self.inner.idle.run_pending_tasks();
        self.inner.idle.entry_count()
    }

    /// Persist every resource's index and drop the idle ones.
    pub async fn shutdown(&self) {
        let resources: Vec<Arc<Resource>> = {
            let active = self.inner.active.lock();
            active
                .values()
                .filter_map(|cell| cell.get().cloned())
                .chain(self.inner.idle.iter().map(|(_, resource)| resource))
                .collect()
        };

        for resource in &resources {
            if let Err(e) = resource.flush().await {
                warn!(identity = %resource.identity(), error = %e, "Failed to persist index on shutdown");
            }
        }
        self.inner.idle.invalidate_all();
        self.inner.idle.run_pending_tasks();
        info!(resources = resources.len(), "Resource registry shut down");
    }
}

/// One counted reference to a live resource.
///
/// Prefer [`ResourceHandle::release`], which persists the index when the
/// last reference goes away. Dropping a handle releases it as well.
pub struct ResourceHandle {
    resource: Arc<Resource>,
    registry: Arc<RegistryInner>,
    released: bool,
}

impl std::fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("resource", &self.resource)
            .finish()
    }
}

impl ResourceHandle {
    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }

    /// Open a reader for `span`; it holds its own reference.
    pub fn read(&self, span: ByteSpan) -> Reader {
        Reader::new(self.clone(), span)
    }

    pub async fn release(mut self) {
        self.released = true;
        if self.registry.release(&self.resource) {
            if let Err(e) = self.resource.flush().await {
                warn!(identity = %self.resource.identity(), error = %e, "Failed to persist index");
            }
        }
    }
}

impl Clone for ResourceHandle {
    fn clone(&self) -> Self {
        let _active = self.registry.active.lock();
        self.resource.acquire();
        Self {
            resource: Arc::clone(&self.resource),
            registry: Arc::clone(&self.registry),
            released: false,
        }
    }
}

impl Drop for ResourceHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if self.registry.release(&self.resource) {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let resource = Arc::clone(&self.resource);
                runtime.spawn(async move {
                    if let Err(e) = resource.flush().await {
                        warn!(identity = %resource.identity(), error = %e, "Failed to persist index");
                    }
                });
            }
        }
    }
}
