use crate::error::{ControllerError, Result};
use crate::state::{self, Action, Observed, OnPresent, ResourceState, Triage};
use crate::traits::ObjectStore;
use async_trait::async_trait;
use infrabox_core::{CustomResource, ObjectKey, Resource, SyncStatus};
use infrabox_workqueue::{Reconciler, SyncOutcome};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Result of one teardown attempt
#[derive(Debug)]
pub enum Teardown<T> {
    /// All dependents are gone; carries the latest copy of the object
    Complete(T),
    /// Dependents are still going away; look again after the delay
    Waiting(Duration),
}

/// Kind-specific half of a controller
///
/// `LifecycleController` owns the sync policy (triage, finalizers, error
/// handling); implementations only observe, create and tear down dependents.
#[async_trait]
pub trait Lifecycle: Send + Sync + 'static {
    type Object: CustomResource;
    /// The dependent whose existence decides between create and refresh
    type Primary: Send + 'static;

    const FINALIZER: &'static str;
    const ON_PRESENT: OnPresent;

    fn name(&self) -> &str;

    fn store(&self) -> &dyn ObjectStore<Self::Object>;

    async fn observe(&self, object: &Self::Object) -> Result<Option<Self::Primary>>;

    /// Called with the finalizer already persisted
    async fn create(&self, object: Self::Object) -> Result<SyncOutcome>;

    async fn refresh(&self, object: Self::Object, primary: Self::Primary) -> Result<SyncOutcome> {
        let _ = (object, primary);
        Ok(SyncOutcome::Done)
    }

    async fn cleanup(&self, object: Self::Object) -> Result<Teardown<Self::Object>>;
}

/// Generic reconciler driving a `Lifecycle` through the resource state machine
pub struct LifecycleController<L> {
    lifecycle: L,
}

impl<L: Lifecycle> LifecycleController<L> {
    pub fn new(lifecycle: L) -> Self {
        Self { lifecycle }
    }

    pub fn lifecycle(&self) -> &L {
        &self.lifecycle
    }

    async fn converge(&self, object: L::Object) -> Result<SyncOutcome> {
        let key = object.object_key();
        let primary = self.lifecycle.observe(&object).await?;
        let (state, action) = state::converge(primary.is_some(), L::ON_PRESENT);
        debug!("{}: {}", key, state);

        match (action, primary) {
            (Action::Create, _) => {
                let object = self.ensure_finalizer(object).await?;
                self.lifecycle.create(object).await
            }
            (Action::Refresh, Some(primary)) => self.lifecycle.refresh(object, primary).await,
            _ => Ok(SyncOutcome::Done),
        }
    }

    async fn finalize(&self, object: L::Object) -> Result<SyncOutcome> {
        let key = object.object_key();

        if !object.has_finalizer(L::FINALIZER) {
            debug!("{}: deletion requested, nothing to clean up", key);
            return Ok(SyncOutcome::Done);
        }

        info!("{}: {}", key, ResourceState::Deleting);
        match self.lifecycle.cleanup(object).await? {
            Teardown::Waiting(delay) => Ok(SyncOutcome::RequeueAfter(delay)),
            Teardown::Complete(mut object) => {
                info!("{}: removing finalizers", key);
                object.clear_finalizers();
                self.lifecycle.store().update(&object).await?;
                info!("{}: {}", key, ResourceState::Gone);
                Ok(SyncOutcome::Done)
            }
        }
    }

    /// Persist the finalizer before any dependent exists
    async fn ensure_finalizer(&self, mut object: L::Object) -> Result<L::Object> {
        if !object.add_finalizer(L::FINALIZER) {
            return Ok(object);
        }
        debug!("{}: adding finalizer {}", object.object_key(), L::FINALIZER);
        self.lifecycle.store().update(&object).await
    }

    /// Write a permanent failure into the resource status
    async fn record_error(&self, key: &ObjectKey, err: &ControllerError) -> Result<()> {
        let Some(mut object) = self.lifecycle.store().get(key).await? else {
            return Ok(());
        };

        let message = err.to_string();
        let status = object.status();
        if status.status == SyncStatus::Error
            && status.message.as_deref() == Some(message.as_str())
        {
            return Ok(());
        }

        object.mark_error(message);
        self.lifecycle.store().update(&object).await?;
        Ok(())
    }
}

#[async_trait]
impl<L: Lifecycle> Reconciler for LifecycleController<L> {
    type Error = ControllerError;

    fn name(&self) -> &str {
        self.lifecycle.name()
    }

    async fn sync(&self, key: &ObjectKey) -> Result<SyncOutcome> {
        let object = self.lifecycle.store().get(key).await?;

        let observed = object.as_ref().map(|o| Observed {
            status: o.status().status,
            deletion_requested: o.deletion_requested(),
        });

        let result = match (state::triage(observed), object) {
            (Triage::Delete, Some(object)) => self.finalize(object).await,
            (Triage::Live, Some(object)) => {
                debug!("{}: start sync", key);
                self.converge(object).await
            }
            (Triage::Hold, _) => {
                info!("{}: in error state, skipping", key);
                return Ok(SyncOutcome::Done);
            }
            _ => {
                debug!("{}: no longer exists", key);
                return Ok(SyncOutcome::Done);
            }
        };

        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_transient() => {
                warn!("{}: sync failed, will retry: {}", key, e);
                Err(e)
            }
            Err(e) => {
                error!("{}: sync failed: {}", key, e);
                self.record_error(key, &e).await?;
                Ok(SyncOutcome::Done)
            }
        }
    }
}
