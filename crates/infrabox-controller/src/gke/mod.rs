//! GKE cluster service: provisions a remote cluster per `GKECluster` resource
//! and publishes its credentials as a secret.

pub mod gcloud;
pub mod operation;
pub mod secret;

pub use gcloud::GcloudProvider;
pub use operation::{ClusterOperation, OperationKind, OperationSnapshot};
pub use secret::cluster_secret;

use crate::config::GkeControllerConfig;
use crate::error::Result;
use crate::reconciler::{Lifecycle, LifecycleController, Teardown};
use crate::state::OnPresent;
use crate::traits::{ClusterProvider, ObjectStore, RemoteCluster};
use async_trait::async_trait;
use infrabox_core::crd::GKE_FINALIZER;
use infrabox_core::{CustomResource, GkeCluster, ObjectKey, Resource, Secret, SyncStatus};
use infrabox_workqueue::SyncOutcome;
use std::sync::Arc;
use tracing::{debug, info};

pub type GkeController = LifecycleController<GkeLifecycle>;

/// Local status for a remote cluster; a cluster not listed yet counts as provisioning
pub fn remote_status(remote: Option<&RemoteCluster>) -> SyncStatus {
    match remote {
        None => SyncStatus::Pending,
        Some(c) if c.is_running() => SyncStatus::Ready,
        Some(c) if c.is_provisioning() => SyncStatus::Pending,
        Some(_) => SyncStatus::Error,
    }
}

pub struct GkeLifecycle {
    clusters: Arc<dyn ObjectStore<GkeCluster>>,
    secrets: Arc<dyn ObjectStore<Secret>>,
    provider: Arc<dyn ClusterProvider>,
    config: GkeControllerConfig,
}

impl GkeLifecycle {
    pub fn new(
        clusters: Arc<dyn ObjectStore<GkeCluster>>,
        secrets: Arc<dyn ObjectStore<Secret>>,
        provider: Arc<dyn ClusterProvider>,
        config: GkeControllerConfig,
    ) -> Self {
        Self {
            clusters,
            secrets,
            provider,
            config,
        }
    }

    async fn ensure_secret(&self, cluster: &GkeCluster, remote: &RemoteCluster) -> Result<()> {
        let key = ObjectKey::new(cluster.namespace(), cluster.secret_name()?);
        if self.secrets.get(&key).await?.is_some() {
            return Ok(());
        }

        info!(
            "{}: creating secret for cluster credentials",
            cluster.object_key()
        );
        self.secrets.create(&cluster_secret(cluster, remote)?).await?;
        Ok(())
    }

    async fn delete_secret(&self, cluster: &GkeCluster) -> Result<()> {
        // Without the label no secret was ever created
        let Ok(name) = cluster.secret_name() else {
            return Ok(());
        };

        if self
            .secrets
            .delete(&ObjectKey::new(cluster.namespace(), name))
            .await?
        {
            info!(
                "{}: deleted secret for cluster credentials",
                cluster.object_key()
            );
        }
        Ok(())
    }

    /// Mirror the remote snapshot into the local status
    async fn apply_remote(
        &self,
        mut cluster: GkeCluster,
        remote: Option<&RemoteCluster>,
    ) -> Result<SyncOutcome> {
        let key = cluster.object_key();
        let status = remote_status(remote);

        if let (SyncStatus::Ready, Some(remote)) = (status, remote) {
            self.ensure_secret(&cluster, remote).await?;
        }

        if cluster.set_status(status) {
            cluster.status_mut().message = match (status, remote) {
                (SyncStatus::Error, Some(remote)) => {
                    Some(format!("GKE cluster is in state {}", remote.status))
                }
                _ => None,
            };
            info!("{}: status changed to {}", key, status);
            self.clusters.update(&cluster).await?;
        }

        Ok(match status {
            SyncStatus::Pending => SyncOutcome::RequeueAfter(self.config.poll_interval),
            _ => SyncOutcome::Done,
        })
    }
}

#[async_trait]
impl Lifecycle for GkeLifecycle {
    type Object = GkeCluster;
    type Primary = RemoteCluster;

    const FINALIZER: &'static str = GKE_FINALIZER;
    const ON_PRESENT: OnPresent = OnPresent::Refresh;

    fn name(&self) -> &str {
        "gcp-controller"
    }

    fn store(&self) -> &dyn ObjectStore<GkeCluster> {
        self.clusters.as_ref()
    }

    async fn observe(&self, cluster: &GkeCluster) -> Result<Option<RemoteCluster>> {
        self.provider.find(cluster.name()).await
    }

    async fn create(&self, cluster: GkeCluster) -> Result<SyncOutcome> {
        let key = cluster.object_key();

        // The secret name is needed once the cluster runs; reject before provisioning
        cluster.secret_name()?;

        info!("{}: cluster does not exist yet, creating one", key);
        let operation = self.provider.create(cluster.name(), &cluster.spec).await?;
        info!("{}: {} started", key, operation);

        let snapshot = operation.poll(self.provider.as_ref()).await?;
        self.apply_remote(cluster, snapshot.cluster.as_ref()).await
    }

    async fn refresh(&self, cluster: GkeCluster, remote: RemoteCluster) -> Result<SyncOutcome> {
        self.apply_remote(cluster, Some(&remote)).await
    }

    async fn cleanup(&self, mut cluster: GkeCluster) -> Result<Teardown<GkeCluster>> {
        let key = cluster.object_key();

        if cluster.set_status(SyncStatus::Pending) {
            cluster.status_mut().message = None;
            cluster = self.clusters.update(&cluster).await?;
        }

        let snapshot = ClusterOperation::delete(cluster.name())
            .poll(self.provider.as_ref())
            .await?;

        if !snapshot.done {
            match snapshot.cluster {
                Some(remote) if !remote.is_stopping() => {
                    let operation = self.provider.delete(cluster.name()).await?;
                    info!("{}: {} started", key, operation);
                }
                _ => debug!("{}: waiting for gke cluster to be deleted", key),
            }
            return Ok(Teardown::Waiting(self.config.poll_interval));
        }

        self.delete_secret(&cluster).await?;
        Ok(Teardown::Complete(cluster))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ControllerError;
    use crate::mock::{MockClusterProvider, MockStore};
    use infrabox_core::crd::SERVICE_SECRET_NAME_LABEL;
    use infrabox_workqueue::Reconciler;
    use std::collections::BTreeMap;
    use std::time::Duration;

    struct Fixture {
        clusters: Arc<MockStore<GkeCluster>>,
        secrets: Arc<MockStore<Secret>>,
        provider: Arc<MockClusterProvider>,
        controller: GkeController,
    }

    fn fixture() -> Fixture {
        let clusters = Arc::new(MockStore::new());
        let secrets = Arc::new(MockStore::new());
        let provider = Arc::new(MockClusterProvider::new());
        let controller = LifecycleController::new(GkeLifecycle::new(
            clusters.clone(),
            secrets.clone(),
            provider.clone(),
            GkeControllerConfig::default(),
        ));
        Fixture {
            clusters,
            secrets,
            provider,
            controller,
        }
    }

    fn cluster(name: &str) -> GkeCluster {
        let mut cluster = GkeCluster::default();
        cluster.metadata.name = Some(name.to_string());
        cluster.metadata.namespace = Some("infrabox-worker".to_string());
        cluster.metadata.labels = Some(BTreeMap::from([(
            SERVICE_SECRET_NAME_LABEL.to_string(),
            format!("{}-credentials", name),
        )]));
        cluster
    }

    fn secret_key(name: &str) -> ObjectKey {
        ObjectKey::new("infrabox-worker", format!("{}-credentials", name))
    }

    /// A cluster this controller already provisioned
    async fn seeded(f: &Fixture, name: &str, status: SyncStatus, remote: &str) -> ObjectKey {
        let mut object = cluster(name);
        object.add_finalizer(GKE_FINALIZER);
        object.status.status = status;
        let mut remote_cluster = MockClusterProvider::running(name);
        remote_cluster.status = remote.to_string();
        f.provider.insert(remote_cluster);
        f.clusters.insert(object).await.object_key()
    }

    #[test]
    fn test_remote_status_mapping() {
        let mut remote = MockClusterProvider::running("c1");
        assert_eq!(remote_status(Some(&remote)), SyncStatus::Ready);

        remote.status = "PROVISIONING".to_string();
        assert_eq!(remote_status(Some(&remote)), SyncStatus::Pending);

        remote.status = "RECONCILING".to_string();
        assert_eq!(remote_status(Some(&remote)), SyncStatus::Error);

        assert_eq!(remote_status(None), SyncStatus::Pending);
    }

    #[tokio::test]
    async fn test_create_starts_provisioning() {
        let f = fixture();
        let key = f.clusters.insert(cluster("c1")).await.object_key();

        let outcome = f.controller.sync(&key).await.unwrap();
        assert_eq!(outcome, SyncOutcome::RequeueAfter(Duration::from_secs(30)));

        assert_eq!(f.provider.created(), ["c1"]);
        let stored = f.clusters.snapshot(&key).await.unwrap();
        assert!(stored.has_finalizer(GKE_FINALIZER));
        assert_eq!(stored.status.status, SyncStatus::Pending);
        assert!(f.secrets.snapshot(&secret_key("c1")).await.is_none());
    }

    #[tokio::test]
    async fn test_create_passes_spec_to_provider() {
        let f = fixture();
        let mut object = cluster("c1");
        object.spec.num_nodes = Some("3".to_string());
        let key = f.clusters.insert(object).await.object_key();

        f.controller.sync(&key).await.unwrap();

        let spec = f.provider.created_spec("c1").unwrap();
        assert_eq!(spec.num_nodes(), Some("3"));
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let f = fixture();
        let key = f.clusters.insert(cluster("c1")).await.object_key();

        f.controller.sync(&key).await.unwrap();
        f.controller.sync(&key).await.unwrap();

        assert_eq!(f.provider.created().len(), 1);
    }

    #[tokio::test]
    async fn test_status_written_once_on_ready_transition() {
        let f = fixture();
        let key = seeded(&f, "c1", SyncStatus::Pending, "PROVISIONING").await;
        f.provider
            .script_status("c1", &["PROVISIONING", "PROVISIONING", "RUNNING"]);

        let first = f.controller.sync(&key).await.unwrap();
        let second = f.controller.sync(&key).await.unwrap();
        assert!(matches!(first, SyncOutcome::RequeueAfter(_)));
        assert!(matches!(second, SyncOutcome::RequeueAfter(_)));
        assert_eq!(f.clusters.writes(), 0);

        let third = f.controller.sync(&key).await.unwrap();
        assert_eq!(third, SyncOutcome::Done);
        assert_eq!(f.clusters.writes(), 1);

        let stored = f.clusters.snapshot(&key).await.unwrap();
        assert_eq!(stored.status.status, SyncStatus::Ready);

        let secret = f.secrets.snapshot(&secret_key("c1")).await.unwrap();
        let data = secret.data.unwrap();
        assert_eq!(data["endpoint"].0, b"https://35.196.0.10");
        assert_eq!(data["ca.crt"].0, b"ca-cert");
    }

    #[tokio::test]
    async fn test_ready_cluster_is_left_alone() {
        let f = fixture();
        let key = seeded(&f, "c1", SyncStatus::Ready, "RUNNING").await;
        f.controller.sync(&key).await.unwrap();
        let writes = f.secrets.writes();

        f.controller.sync(&key).await.unwrap();

        assert_eq!(f.clusters.writes(), 0);
        assert_eq!(f.secrets.writes(), writes);
    }

    #[tokio::test]
    async fn test_unexpected_remote_status_is_error_and_sticks() {
        let f = fixture();
        let key = seeded(&f, "c1", SyncStatus::Pending, "ERROR").await;

        f.controller.sync(&key).await.unwrap();
        let stored = f.clusters.snapshot(&key).await.unwrap();
        assert_eq!(stored.status.status, SyncStatus::Error);
        assert_eq!(
            stored.status.message.as_deref(),
            Some("GKE cluster is in state ERROR")
        );

        f.provider.script_status("c1", &["RUNNING"]);
        f.controller.sync(&key).await.unwrap();

        assert_eq!(f.clusters.writes(), 1);
        assert!(f.secrets.is_empty().await);
    }

    #[tokio::test]
    async fn test_missing_secret_label_fails_before_provisioning() {
        let f = fixture();
        let mut object = cluster("c1");
        object.metadata.labels = None;
        let key = f.clusters.insert(object).await.object_key();

        f.controller.sync(&key).await.unwrap();

        assert!(f.provider.created().is_empty());
        let stored = f.clusters.snapshot(&key).await.unwrap();
        assert_eq!(stored.status.status, SyncStatus::Error);
    }

    #[tokio::test]
    async fn test_cli_failure_is_retried_without_status_change() {
        let f = fixture();
        let key = f.clusters.insert(cluster("c1")).await.object_key();
        f.provider.fail_next(ControllerError::command_failed(
            "gcloud container clusters list",
            1,
            "network unreachable",
        ));

        let err = f.controller.sync(&key).await.unwrap_err();
        assert!(err.is_transient());

        let stored = f.clusters.snapshot(&key).await.unwrap();
        assert_eq!(stored.status.status, SyncStatus::Unset);
    }

    #[tokio::test]
    async fn test_deletion_waits_for_remote_cluster() {
        let f = fixture();
        let key = seeded(&f, "c1", SyncStatus::Ready, "RUNNING").await;
        f.controller.sync(&key).await.unwrap();
        assert!(f.secrets.snapshot(&secret_key("c1")).await.is_some());

        f.clusters.request_deletion(&key).await.unwrap();

        let outcome = f.controller.sync(&key).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::RequeueAfter(_)));
        assert_eq!(f.provider.deleted(), ["c1"]);
        let stored = f.clusters.snapshot(&key).await.unwrap();
        assert_eq!(stored.status.status, SyncStatus::Pending);
        assert!(stored.has_finalizer(GKE_FINALIZER));
        assert!(f.secrets.snapshot(&secret_key("c1")).await.is_some());

        // Still stopping: no second delete is issued
        f.controller.sync(&key).await.unwrap();
        assert_eq!(f.provider.deleted().len(), 1);

        f.provider.remove("c1");
        let outcome = f.controller.sync(&key).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Done);
        assert!(f.secrets.snapshot(&secret_key("c1")).await.is_none());
        assert!(f.clusters.snapshot(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_errored_cluster_can_still_be_deleted() {
        let f = fixture();
        let key = seeded(&f, "c1", SyncStatus::Error, "ERROR").await;
        f.clusters.request_deletion(&key).await.unwrap();

        f.controller.sync(&key).await.unwrap();
        assert_eq!(f.provider.deleted(), ["c1"]);

        f.provider.remove("c1");
        f.controller.sync(&key).await.unwrap();
        assert!(f.clusters.snapshot(&key).await.is_none());
    }
}
