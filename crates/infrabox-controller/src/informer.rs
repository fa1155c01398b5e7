use crate::error::Result;
use crate::traits::ObjectStore;
use infrabox_core::{ObjectKey, Resource, ResourceEvent};
use infrabox_workqueue::WorkQueue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Configuration for an informer
#[derive(Debug, Clone)]
pub struct InformerConfig {
    /// Delay between two listings
    pub poll_interval: Duration,
    /// Every object is re-enqueued at least this often
    pub resync_interval: Duration,
}

impl Default for InformerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            resync_interval: Duration::from_secs(30),
        }
    }
}

/// Feeds a work queue from periodic listings of one resource kind
///
/// Changes are detected by comparing resourceVersions with the previous
/// listing.
pub struct Informer<T> {
    store: Arc<dyn ObjectStore<T>>,
    queue: WorkQueue<String>,
    config: InformerConfig,
    known: HashMap<ObjectKey, String>,
    last_resync: Option<Instant>,
}

impl<T: Resource> Informer<T> {
    pub fn new(store: Arc<dyn ObjectStore<T>>, queue: WorkQueue<String>, config: InformerConfig) -> Self {
        Self {
            store,
            queue,
            config,
            known: HashMap::new(),
            last_resync: None,
        }
    }

    /// Compare a listing with the previous one
    ///
    /// With `resync` set, unchanged objects are reported as modified too.
    pub fn diff(&mut self, objects: &[T], resync: bool) -> Vec<ResourceEvent> {
        let mut events = Vec::new();
        let mut seen = HashMap::with_capacity(objects.len());

        for object in objects {
            let key = object.object_key();
            let version = object.resource_version().unwrap_or_default().to_string();

            match self.known.get(&key) {
                None => events.push(ResourceEvent::added(key.clone(), &version)),
                Some(previous) if previous != &version || resync => {
                    events.push(ResourceEvent::modified(key.clone(), &version))
                }
                Some(_) => {}
            }
            seen.insert(key, version);
        }

        for key in self.known.keys() {
            if !seen.contains_key(key) {
                events.push(ResourceEvent::deleted(key.clone()));
            }
        }

        self.known = seen;
        events
    }

    /// List once and enqueue every changed key; returns the number enqueued
    pub async fn poll(&mut self) -> Result<usize> {
        let objects = self.store.list().await?;

        let now = Instant::now();
        let resync = self
            .last_resync
            .is_some_and(|at| now.duration_since(at) >= self.config.resync_interval);
        if resync || self.last_resync.is_none() {
            self.last_resync = Some(now);
        }

        let mut enqueued = 0;
        for event in self.diff(&objects, resync) {
            if !event.triggers_sync() {
                debug!("{} {}: deleted", T::KIND, event.key);
                continue;
            }
            self.queue.add(event.key.to_string());
            enqueued += 1;
        }

        Ok(enqueued)
    }

    /// Poll until cancelled; listing failures are logged and retried
    pub async fn run(mut self, token: CancellationToken) {
        info!("Starting {} informer", T::KIND);

        loop {
            if let Err(e) = self.poll().await {
                error!("Failed to list {}: {}", T::KIND, e);
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!("{} informer stopped", T::KIND);
    }
}
