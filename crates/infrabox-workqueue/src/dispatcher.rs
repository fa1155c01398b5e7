use crate::error::{Result, WorkQueueError};
use crate::queue::WorkQueue;
use async_trait::async_trait;
use infrabox_core::ObjectKey;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a successful sync asks the dispatcher to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing left to do until the object changes again
    Done,
    /// Look again after the given delay even if nothing changes
    RequeueAfter(Duration),
}

/// Brings one object from observed state toward desired state
///
/// Errors returned from `sync` are retried with per-key backoff.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    type Error: Display + Send;

    /// Controller name, used in log lines
    fn name(&self) -> &str;

    async fn sync(&self, key: &ObjectKey) -> std::result::Result<SyncOutcome, Self::Error>;
}

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of concurrent workers
    pub workers: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { workers: 2 }
    }
}

/// Runs a pool of workers pulling keys from a queue into a reconciler
pub struct Dispatcher<R> {
    queue: WorkQueue<String>,
    reconciler: Arc<R>,
    config: DispatcherConfig,
}

impl<R: Reconciler> Dispatcher<R> {
    pub fn new(queue: WorkQueue<String>, reconciler: Arc<R>, config: DispatcherConfig) -> Self {
        Self {
            queue,
            reconciler,
            config,
        }
    }

    pub fn queue(&self) -> &WorkQueue<String> {
        &self.queue
    }

    /// Run the workers until the token is cancelled or the queue shuts down
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        if self.config.workers == 0 {
            return Err(WorkQueueError::invalid_config(
                "worker count must be at least 1",
                "Pass --workers with a positive value",
            ));
        }

        info!(
            "Starting {} with {} worker(s)",
            self.reconciler.name(),
            self.config.workers
        );

        let mut workers = JoinSet::new();
        for id in 0..self.config.workers {
            let worker = Worker {
                id,
                queue: self.queue.clone(),
                reconciler: Arc::clone(&self.reconciler),
            };
            workers.spawn(async move { worker.run().await });
        }

        tokio::select! {
            _ = token.cancelled() => {
                info!("{}: shutting down", self.reconciler.name());
            }
            Some(_) = workers.join_next() => {
                warn!("{}: a worker exited before shutdown", self.reconciler.name());
            }
        }

        self.queue.shutdown();

        let mut panicked = 0;
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!("{}: worker failed: {}", self.reconciler.name(), e);
                panicked += 1;
            }
        }

        info!("{}: all workers stopped", self.reconciler.name());

        if panicked > 0 {
            return Err(WorkQueueError::WorkerPanicked {
                queue: self.queue.name().to_string(),
                count: panicked,
            });
        }
        Ok(())
    }
}

struct Worker<R> {
    id: usize,
    queue: WorkQueue<String>,
    reconciler: Arc<R>,
}

impl<R: Reconciler> Worker<R> {
    async fn run(self) {
        debug!("{}: worker {} started", self.reconciler.name(), self.id);
        while self.process_next_item().await {}
        debug!("{}: worker {} stopped", self.reconciler.name(), self.id);
    }

    /// Handle one key; returns false once the queue has shut down
    async fn process_next_item(&self) -> bool {
        let Some(raw) = self.queue.get().await else {
            return false;
        };

        let key = match ObjectKey::parse(&raw) {
            Ok(key) => key,
            Err(e) => {
                error!("{}: dropping malformed key: {}", self.reconciler.name(), e);
                self.queue.forget(&raw);
                self.queue.done(&raw);
                return true;
            }
        };

        match self.reconciler.sync(&key).await {
            Ok(SyncOutcome::Done) => {
                self.queue.forget(&raw);
            }
            Ok(SyncOutcome::RequeueAfter(delay)) => {
                debug!(
                    "{}: revisiting '{}' in {:?}",
                    self.reconciler.name(),
                    key,
                    delay
                );
                self.queue.forget(&raw);
                self.queue.add_after(raw.clone(), delay);
            }
            Err(e) => {
                error!(
                    "{}: error syncing '{}': {}",
                    self.reconciler.name(),
                    key,
                    e
                );
                self.queue.add_rate_limited(raw.clone());
            }
        }

        self.queue.done(&raw);
        true
    }
}
