//! Job controller: runs each `Job` as a batch job once its services are ready

pub mod batch;
pub mod services;
pub mod token;

pub use batch::batch_job;
pub use services::{delete_service, ensure_service, service_document, ServiceReadiness};
pub use token::{mint_job_token, sign_job_token, JobClaims};

use crate::config::JobControllerConfig;
use crate::error::Result;
use crate::reconciler::{Lifecycle, LifecycleController, Teardown};
use crate::state::OnPresent;
use crate::traits::{DynamicApi, ObjectStore};
use async_trait::async_trait;
use infrabox_core::crd::JOB_FINALIZER;
use infrabox_core::{BatchJob, Job, Resource};
use infrabox_workqueue::SyncOutcome;
use std::sync::Arc;
use tracing::info;

pub type JobController = LifecycleController<JobLifecycle>;

pub struct JobLifecycle {
    jobs: Arc<dyn ObjectStore<Job>>,
    batch_jobs: Arc<dyn ObjectStore<BatchJob>>,
    services: Arc<dyn DynamicApi>,
    config: JobControllerConfig,
}

impl JobLifecycle {
    pub fn new(
        jobs: Arc<dyn ObjectStore<Job>>,
        batch_jobs: Arc<dyn ObjectStore<BatchJob>>,
        services: Arc<dyn DynamicApi>,
        config: JobControllerConfig,
    ) -> Self {
        Self {
            jobs,
            batch_jobs,
            services,
            config,
        }
    }

    /// True once every declared service reports ready
    async fn services_ready(&self, job: &Job) -> Result<bool> {
        let key = job.object_key();
        let mut ready = true;

        for service in &job.spec.services {
            match ensure_service(self.services.as_ref(), job, service).await? {
                ServiceReadiness::Ready => {
                    info!("{}: service {} ready", key, service.type_name())
                }
                ServiceReadiness::NotReady => {
                    info!("{}: service {} not yet ready", key, service.type_name());
                    ready = false;
                }
            }
        }

        Ok(ready)
    }

    /// True once no declared service exists anymore
    async fn services_deleted(&self, job: &Job) -> Result<bool> {
        let key = job.object_key();
        let mut deleted = true;

        for service in &job.spec.services {
            if delete_service(self.services.as_ref(), job, service).await? {
                info!("{}: service {} deleted", key, service.type_name());
            } else {
                info!("{}: service {} not yet deleted", key, service.type_name());
                deleted = false;
            }
        }

        Ok(deleted)
    }
}

#[async_trait]
impl Lifecycle for JobLifecycle {
    type Object = Job;
    type Primary = BatchJob;

    const FINALIZER: &'static str = JOB_FINALIZER;
    const ON_PRESENT: OnPresent = OnPresent::Terminal;

    fn name(&self) -> &str {
        "job-controller"
    }

    fn store(&self) -> &dyn ObjectStore<Job> {
        self.jobs.as_ref()
    }

    async fn observe(&self, job: &Job) -> Result<Option<BatchJob>> {
        self.batch_jobs.get(&job.object_key()).await
    }

    async fn create(&self, job: Job) -> Result<SyncOutcome> {
        let key = job.object_key();

        if !self.services_ready(&job).await? {
            return Ok(SyncOutcome::RequeueAfter(self.config.poll_interval));
        }

        let token = mint_job_token(job.name(), &self.config.rsa_private_key_path).await?;

        info!("{}: creating batch job", key);
        self.batch_jobs
            .create(&batch_job(&job, &token, &self.config)?)
            .await?;

        Ok(SyncOutcome::Done)
    }

    async fn cleanup(&self, job: Job) -> Result<Teardown<Job>> {
        let key = job.object_key();

        if !self.services_deleted(&job).await? {
            info!("{}: not all services deleted yet", key);
            return Ok(Teardown::Waiting(self.config.poll_interval));
        }

        if self.batch_jobs.delete(&key).await? {
            info!("{}: deleted batch job", key);
        }

        Ok(Teardown::Complete(job))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ControllerError;
    use crate::mock::{MockDynamicApi, MockStore};
    use crate::traits::ApiResource;
    use infrabox_core::crd::{JobService, SERVICE_ID_LABEL};
    use infrabox_core::k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use infrabox_core::{GroupVersionKind, ObjectKey, SyncStatus};
    use infrabox_workqueue::Reconciler;
    use std::collections::BTreeMap;
    use std::time::Duration;

    struct Fixture {
        jobs: Arc<MockStore<Job>>,
        batch_jobs: Arc<MockStore<BatchJob>>,
        api: Arc<MockDynamicApi>,
        gke: ApiResource,
        controller: JobController,
        keys: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let keys = tempfile::tempdir().unwrap();
        let key_path = keys.path().join("id_rsa");
        std::fs::write(&key_path, token::tests::PRIVATE_KEY).unwrap();

        let jobs = Arc::new(MockStore::new());
        let batch_jobs = Arc::new(MockStore::new());
        let api = Arc::new(MockDynamicApi::new());
        let gke = api.register(
            GroupVersionKind::new("gcp.service.infrabox.net", "v1alpha1", "GKECluster"),
            "gkeclusters",
        );

        let config = JobControllerConfig {
            rsa_private_key_path: key_path,
            root_url: "https://infrabox.example.com".to_string(),
            docker_registry: "registry.example.com".to_string(),
            ..Default::default()
        };

        let controller = LifecycleController::new(JobLifecycle::new(
            jobs.clone(),
            batch_jobs.clone(),
            api.clone(),
            config,
        ));

        Fixture {
            jobs,
            batch_jobs,
            api,
            gke,
            controller,
            keys,
        }
    }

    fn job(name: &str, services: &[&str]) -> Job {
        let mut job = Job::default();
        job.metadata.name = Some(name.to_string());
        job.metadata.namespace = Some("infrabox-worker".to_string());
        job.spec.resources.limits = Some(BTreeMap::from([
            ("cpu".to_string(), Quantity("1".to_string())),
            ("memory".to_string(), Quantity("1Gi".to_string())),
        ]));

        for id in services {
            let mut service = JobService {
                api_version: "gcp.service.infrabox.net/v1alpha1".to_string(),
                kind: "GKECluster".to_string(),
                ..Default::default()
            };
            service.metadata.labels =
                Some(BTreeMap::from([(SERVICE_ID_LABEL.to_string(), id.to_string())]));
            // The service controller holds its own finalizer
            service.metadata.finalizers = Some(vec!["gcp.service.infrabox.net".to_string()]);
            job.spec.services.push(service);
        }

        job
    }

    fn service_key(id: &str) -> ObjectKey {
        ObjectKey::new("infrabox-worker", id)
    }

    fn token_of(batch: &BatchJob) -> String {
        let pod = batch.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        pod.containers
            .iter()
            .find(|c| c.name == "run-job")
            .and_then(|c| c.env.as_ref())
            .and_then(|env| env.iter().find(|e| e.name == "INFRABOX_JOB_TOKEN"))
            .and_then(|e| e.value.clone())
            .unwrap()
    }

    #[tokio::test]
    async fn test_job_without_services_starts_immediately() {
        let f = fixture();
        let key = f.jobs.insert(job("build-1", &[])).await.object_key();

        let outcome = f.controller.sync(&key).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Done);

        let stored = f.jobs.snapshot(&key).await.unwrap();
        assert!(stored.has_finalizer(JOB_FINALIZER));

        let batch = f.batch_jobs.snapshot(&key).await.unwrap();
        let claims = token::tests::decode(&token_of(&batch));
        assert_eq!(claims.job.id, "build-1");
        assert_eq!(
            batch.metadata.owner_references.unwrap()[0].uid,
            stored.metadata.uid.unwrap()
        );
    }

    #[tokio::test]
    async fn test_batch_job_created_once() {
        let f = fixture();
        let key = f.jobs.insert(job("build-1", &[])).await.object_key();

        f.controller.sync(&key).await.unwrap();
        f.controller.sync(&key).await.unwrap();
        f.controller.sync(&key).await.unwrap();

        assert_eq!(f.batch_jobs.writes(), 1);
        // Only the finalizer write; status stays untouched on success
        assert_eq!(f.jobs.writes(), 1);
    }

    #[tokio::test]
    async fn test_batch_job_waits_for_services() {
        let f = fixture();
        let key = f
            .jobs
            .insert(job("build-1", &["svc-1", "svc-2"]))
            .await
            .object_key();

        let outcome = f.controller.sync(&key).await.unwrap();
        assert_eq!(outcome, SyncOutcome::RequeueAfter(Duration::from_secs(5)));
        assert_eq!(f.api.creates(), 2);
        assert!(f.batch_jobs.is_empty().await);

        f.api.set_status(&f.gke, &service_key("svc-1"), "ready", None).await;
        f.controller.sync(&key).await.unwrap();
        assert!(f.batch_jobs.is_empty().await);
        assert_eq!(f.api.creates(), 2);

        f.api.set_status(&f.gke, &service_key("svc-2"), "ready", None).await;
        let outcome = f.controller.sync(&key).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Done);
        assert!(f.batch_jobs.snapshot(&key).await.is_some());
    }

    #[tokio::test]
    async fn test_service_failure_fails_job() {
        let f = fixture();
        let key = f.jobs.insert(job("build-1", &["svc-1"])).await.object_key();

        f.controller.sync(&key).await.unwrap();
        f.api
            .set_status(&f.gke, &service_key("svc-1"), "error", Some("quota exceeded"))
            .await;

        let outcome = f.controller.sync(&key).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Done);

        let stored = f.jobs.snapshot(&key).await.unwrap();
        assert_eq!(stored.status.status, SyncStatus::Error);
        assert!(stored.status.message.unwrap().contains("quota exceeded"));

        // Held in error: even a recovered service does not start the job
        let writes = f.jobs.writes();
        f.api.set_status(&f.gke, &service_key("svc-1"), "ready", None).await;
        f.controller.sync(&key).await.unwrap();
        assert_eq!(f.jobs.writes(), writes);
        assert!(f.batch_jobs.is_empty().await);
    }

    #[tokio::test]
    async fn test_unreadable_signing_key_fails_job() {
        let f = fixture();
        let key = f.jobs.insert(job("build-1", &[])).await.object_key();
        std::fs::remove_file(f.keys.path().join("id_rsa")).unwrap();

        f.controller.sync(&key).await.unwrap();

        let stored = f.jobs.snapshot(&key).await.unwrap();
        assert_eq!(stored.status.status, SyncStatus::Error);
        assert!(f.batch_jobs.is_empty().await);
    }

    #[tokio::test]
    async fn test_exponent_memory_limit_starts_job() {
        let f = fixture();
        let mut build = job("build-1", &[]);
        build.spec.resources.limits = Some(BTreeMap::from([
            ("cpu".to_string(), Quantity("1500m".to_string())),
            ("memory".to_string(), Quantity("129e6".to_string())),
        ]));
        let key = f.jobs.insert(build).await.object_key();

        f.controller.sync(&key).await.unwrap();

        let stored = f.jobs.snapshot(&key).await.unwrap();
        assert_ne!(stored.status.status, SyncStatus::Error);
        assert!(f.batch_jobs.snapshot(&key).await.is_some());
    }

    #[tokio::test]
    async fn test_deletion_removes_services_before_batch_job() {
        let f = fixture();
        let key = f.jobs.insert(job("build-1", &["svc-1"])).await.object_key();
        f.controller.sync(&key).await.unwrap();
        f.api.set_status(&f.gke, &service_key("svc-1"), "ready", None).await;
        f.controller.sync(&key).await.unwrap();
        assert!(f.batch_jobs.snapshot(&key).await.is_some());

        f.jobs.request_deletion(&key).await.unwrap();

        let outcome = f.controller.sync(&key).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::RequeueAfter(_)));
        assert!(f.batch_jobs.snapshot(&key).await.is_some());
        assert!(f.jobs.snapshot(&key).await.is_some());

        // A rerun while the service is terminating issues no second delete
        f.controller.sync(&key).await.unwrap();
        assert_eq!(f.api.deletes(), 1);
        assert!(f.batch_jobs.snapshot(&key).await.is_some());

        f.api.finish_deletion(&f.gke, &service_key("svc-1")).await;
        f.batch_jobs
            .fail_next_write(ControllerError::api_error("connection reset"));
        let err = f.controller.sync(&key).await.unwrap_err();
        assert!(err.is_transient());
        let stored = f.jobs.snapshot(&key).await.unwrap();
        assert!(stored.has_finalizer(JOB_FINALIZER));

        let outcome = f.controller.sync(&key).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Done);
        assert!(f.batch_jobs.snapshot(&key).await.is_none());
        assert!(f.jobs.snapshot(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_deleting_failed_job_still_cleans_up() {
        let f = fixture();
        let key = f.jobs.insert(job("build-1", &["svc-1"])).await.object_key();
        f.controller.sync(&key).await.unwrap();
        f.api
            .set_status(&f.gke, &service_key("svc-1"), "error", Some("boom"))
            .await;
        f.controller.sync(&key).await.unwrap();

        f.jobs.request_deletion(&key).await.unwrap();
        f.controller.sync(&key).await.unwrap();
        assert_eq!(f.api.deletes(), 1);

        f.api.finish_deletion(&f.gke, &service_key("svc-1")).await;
        f.controller.sync(&key).await.unwrap();
        assert!(f.jobs.snapshot(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_jobs_reconcile_independently() {
        let f = fixture();
        let failing = f.jobs.insert(job("build-1", &["svc-1"])).await.object_key();
        let plain = f.jobs.insert(job("build-2", &[])).await.object_key();

        f.controller.sync(&failing).await.unwrap();
        f.api
            .set_status(&f.gke, &service_key("svc-1"), "error", Some("boom"))
            .await;

        let (a, b) = tokio::join!(f.controller.sync(&failing), f.controller.sync(&plain));
        assert!(a.is_ok());
        assert!(b.is_ok());

        let failed = f.jobs.snapshot(&failing).await.unwrap();
        assert_eq!(failed.status.status, SyncStatus::Error);

        let started = f.jobs.snapshot(&plain).await.unwrap();
        assert_eq!(started.status.status, SyncStatus::Unset);
        assert!(f.batch_jobs.snapshot(&plain).await.is_some());
        assert!(f.batch_jobs.snapshot(&failing).await.is_none());
    }
}
