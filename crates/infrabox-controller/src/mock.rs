use crate::error::{ControllerError, Result};
use crate::gke::ClusterOperation;
use crate::traits::{ApiResource, ClusterProvider, DynamicApi, MasterAuth, ObjectStore, RemoteCluster};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use infrabox_core::crd::GkeClusterSpec;
use infrabox_core::k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use infrabox_core::{GroupVersionKind, ObjectKey, Resource};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

fn take_failure(slot: &Mutex<Option<ControllerError>>) -> Result<()> {
    match slot.lock().take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// In-memory object store with API-server write semantics
///
/// Writes bump the resourceVersion and reject stale versions. Deleting an
/// object that still has finalizers only stamps its deletionTimestamp; it
/// is removed once an update leaves the finalizer list empty.
pub struct MockStore<T> {
    objects: RwLock<HashMap<ObjectKey, T>>,
    next_version: AtomicU64,
    writes: AtomicUsize,
    deletes: AtomicUsize,
    fail_next: Mutex<Option<ControllerError>>,
}

impl<T: Resource> MockStore<T> {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            next_version: AtomicU64::new(1),
            writes: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            fail_next: Mutex::new(None),
        }
    }

    fn stamp(&self, object: &mut T) {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        object.metadata_mut().resource_version = Some(version.to_string());
    }

    /// Seed an object as if created by someone else; not counted as a write
    pub async fn insert(&self, mut object: T) -> T {
        self.stamp(&mut object);
        if object.uid().is_none() {
            object.metadata_mut().uid = Some(uuid::Uuid::new_v4().to_string());
        }
        self.objects
            .write()
            .await
            .insert(object.object_key(), object.clone());
        object
    }

    /// Current copy of an object, bypassing failure injection
    pub async fn snapshot(&self, key: &ObjectKey) -> Option<T> {
        self.objects.read().await.get(key).cloned()
    }

    /// Request deletion on behalf of an external actor
    pub async fn request_deletion(&self, key: &ObjectKey) -> Result<bool> {
        let mut objects = self.objects.write().await;
        let Some(object) = objects.get_mut(key) else {
            return Ok(false);
        };

        if object.finalizers().is_empty() {
            objects.remove(key);
            debug!("Mock: {} {} removed", T::KIND, key);
        } else if !object.deletion_requested() {
            object.metadata_mut().deletion_timestamp = Some(Time(chrono::Utc::now()));
            self.stamp(object);
            debug!("Mock: {} {} marked for deletion", T::KIND, key);
        }
        Ok(true)
    }

    /// Make the next create, update or delete fail with `err`
    pub fn fail_next_write(&self, err: ControllerError) {
        *self.fail_next.lock() = Some(err);
    }

    /// Number of successful creates and updates
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of delete calls that found an object
    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<T: Resource> Default for MockStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Resource> ObjectStore<T> for MockStore<T> {
    async fn get(&self, key: &ObjectKey) -> Result<Option<T>> {
        Ok(self.snapshot(key).await)
    }

    async fn list(&self) -> Result<Vec<T>> {
        Ok(self.objects.read().await.values().cloned().collect())
    }

    async fn create(&self, object: &T) -> Result<T> {
        take_failure(&self.fail_next)?;
        object.validate()?;

        let key = object.object_key();
        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(ControllerError::conflict(T::KIND, key.to_string(), "already exists"));
        }

        let mut created = object.clone();
        self.stamp(&mut created);
        created.metadata_mut().uid = Some(uuid::Uuid::new_v4().to_string());
        objects.insert(key.clone(), created.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);

        debug!("Mock: {} {} created", T::KIND, key);
        Ok(created)
    }

    async fn update(&self, object: &T) -> Result<T> {
        take_failure(&self.fail_next)?;

        let key = object.object_key();
        let mut objects = self.objects.write().await;
        let existing = objects
            .get(&key)
            .ok_or_else(|| ControllerError::api_error(format!("{} {} not found", T::KIND, key)))?;

        if existing.resource_version() != object.resource_version() {
            return Err(ControllerError::conflict(
                T::KIND,
                key.to_string(),
                "the object has been modified",
            ));
        }

        let mut updated = object.clone();
        updated.metadata_mut().deletion_timestamp = existing.metadata().deletion_timestamp.clone();
        self.stamp(&mut updated);
        self.writes.fetch_add(1, Ordering::SeqCst);

        if updated.deletion_requested() && updated.finalizers().is_empty() {
            objects.remove(&key);
            debug!("Mock: {} {} finalized and removed", T::KIND, key);
        } else {
            objects.insert(key, updated.clone());
        }

        Ok(updated)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<bool> {
        take_failure(&self.fail_next)?;

        let found = self.request_deletion(key).await?;
        if found {
            self.deletes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(found)
    }
}

/// In-memory dynamic API over registered kinds
///
/// Objects with finalizers in their metadata linger after delete until
/// `finish_deletion` is called, like a service whose own controller is
/// still tearing it down.
#[derive(Default)]
pub struct MockDynamicApi {
    kinds: Mutex<HashMap<GroupVersionKind, ApiResource>>,
    objects: RwLock<HashMap<(String, ObjectKey), Value>>,
    creates: AtomicUsize,
    deletes: AtomicUsize,
    fail_next: Mutex<Option<ControllerError>>,
}

impl MockDynamicApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `gvk` resolvable under the given plural name
    pub fn register(&self, gvk: GroupVersionKind, plural: &str) -> ApiResource {
        let resource = ApiResource {
            gvk: gvk.clone(),
            plural: plural.to_string(),
            namespaced: true,
        };
        self.kinds.lock().insert(gvk, resource.clone());
        resource
    }

    fn slot(resource: &ApiResource, key: &ObjectKey) -> (String, ObjectKey) {
        (
            format!("{}/{}", resource.gvk.group, resource.plural),
            key.clone(),
        )
    }

    pub async fn object(&self, resource: &ApiResource, key: &ObjectKey) -> Option<Value> {
        self.objects
            .read()
            .await
            .get(&Self::slot(resource, key))
            .cloned()
    }

    /// Set the status the service's own controller would report
    pub async fn set_status(
        &self,
        resource: &ApiResource,
        key: &ObjectKey,
        status: &str,
        message: Option<&str>,
    ) {
        if let Some(object) = self.objects.write().await.get_mut(&Self::slot(resource, key)) {
            object["status"] = serde_json::json!({
                "status": status,
                "message": message,
            });
        }
    }

    /// Complete a pending deletion
    pub async fn finish_deletion(&self, resource: &ApiResource, key: &ObjectKey) {
        self.objects
            .write()
            .await
            .remove(&Self::slot(resource, key));
    }

    pub fn fail_next(&self, err: ControllerError) {
        *self.fail_next.lock() = Some(err);
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DynamicApi for MockDynamicApi {
    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<ApiResource> {
        self.kinds
            .lock()
            .get(gvk)
            .cloned()
            .ok_or_else(|| ControllerError::unknown_kind(gvk.api_version(), &gvk.kind))
    }

    async fn get(&self, resource: &ApiResource, key: &ObjectKey) -> Result<Option<Value>> {
        Ok(self.object(resource, key).await)
    }

    async fn create(
        &self,
        resource: &ApiResource,
        namespace: &str,
        object: &Value,
    ) -> Result<Value> {
        take_failure(&self.fail_next)?;

        let name = object["metadata"]["name"]
            .as_str()
            .ok_or_else(|| ControllerError::api_error("metadata.name is required"))?;
        let key = ObjectKey::new(namespace, name);

        let mut objects = self.objects.write().await;
        let slot = Self::slot(resource, &key);
        if objects.contains_key(&slot) {
            return Err(ControllerError::conflict(
                &resource.gvk.kind,
                key.to_string(),
                "already exists",
            ));
        }

        objects.insert(slot, object.clone());
        self.creates.fetch_add(1, Ordering::SeqCst);
        debug!("Mock: {} {} created", resource.gvk, key);
        Ok(object.clone())
    }

    async fn delete(&self, resource: &ApiResource, key: &ObjectKey) -> Result<bool> {
        take_failure(&self.fail_next)?;

        let mut objects = self.objects.write().await;
        let slot = Self::slot(resource, key);
        let Some(object) = objects.get_mut(&slot) else {
            return Ok(false);
        };

        let has_finalizers = object["metadata"]["finalizers"]
            .as_array()
            .is_some_and(|f| !f.is_empty());

        if has_finalizers {
            object["metadata"]["deletionTimestamp"] = chrono::Utc::now().to_rfc3339().into();
        } else {
            objects.remove(&slot);
        }

        self.deletes.fetch_add(1, Ordering::SeqCst);
        debug!("Mock: {} {} deleted", resource.gvk, key);
        Ok(true)
    }
}

/// Scripted stand-in for the external cluster provider
#[derive(Default)]
pub struct MockClusterProvider {
    clusters: Mutex<HashMap<String, RemoteCluster>>,
    scripts: Mutex<HashMap<String, VecDeque<String>>>,
    created: Mutex<Vec<(String, GkeClusterSpec)>>,
    deleted: Mutex<Vec<String>>,
    fail_next: Mutex<Option<ControllerError>>,
}

impl MockClusterProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A running cluster with base64 encoded credentials
    pub fn running(name: &str) -> RemoteCluster {
        RemoteCluster {
            name: name.to_string(),
            status: "RUNNING".to_string(),
            endpoint: "35.196.0.10".to_string(),
            master_auth: MasterAuth {
                client_certificate: STANDARD.encode("client-cert"),
                client_key: STANDARD.encode("client-key"),
                cluster_ca_certificate: STANDARD.encode("ca-cert"),
                username: "admin".to_string(),
                password: "secret".to_string(),
            },
        }
    }

    pub fn insert(&self, cluster: RemoteCluster) {
        self.clusters.lock().insert(cluster.name.clone(), cluster);
    }

    /// Report these statuses on successive lookups; the last one sticks
    pub fn script_status(&self, name: &str, statuses: &[&str]) {
        self.scripts.lock().insert(
            name.to_string(),
            statuses.iter().map(|s| s.to_string()).collect(),
        );
    }

    /// Complete a pending deletion
    pub fn remove(&self, name: &str) {
        self.clusters.lock().remove(name);
    }

    pub fn fail_next(&self, err: ControllerError) {
        *self.fail_next.lock() = Some(err);
    }

    pub fn created(&self) -> Vec<String> {
        self.created.lock().iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn created_spec(&self, name: &str) -> Option<GkeClusterSpec> {
        self.created
            .lock()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, spec)| spec.clone())
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }
}

#[async_trait]
impl ClusterProvider for MockClusterProvider {
    async fn find(&self, name: &str) -> Result<Option<RemoteCluster>> {
        take_failure(&self.fail_next)?;

        let mut clusters = self.clusters.lock();
        let Some(cluster) = clusters.get_mut(name) else {
            return Ok(None);
        };

        if let Some(script) = self.scripts.lock().get_mut(name) {
            let next = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            };
            if let Some(status) = next {
                cluster.status = status;
            }
        }

        Ok(Some(cluster.clone()))
    }

    async fn create(&self, name: &str, spec: &GkeClusterSpec) -> Result<ClusterOperation> {
        take_failure(&self.fail_next)?;

        let mut clusters = self.clusters.lock();
        if clusters.contains_key(name) {
            return Err(ControllerError::command_failed(
                format!("create {}", name),
                1,
                "Already exists",
            ));
        }

        let mut cluster = Self::running(name);
        cluster.status = "PROVISIONING".to_string();
        clusters.insert(name.to_string(), cluster);
        self.created.lock().push((name.to_string(), spec.clone()));

        Ok(ClusterOperation::create(name))
    }

    async fn delete(&self, name: &str) -> Result<ClusterOperation> {
        take_failure(&self.fail_next)?;

        let mut clusters = self.clusters.lock();
        let cluster = clusters.get_mut(name).ok_or_else(|| {
            ControllerError::command_failed(format!("delete {}", name), 1, "Not found")
        })?;

        cluster.status = "STOPPING".to_string();
        self.scripts.lock().remove(name);
        self.deleted.lock().push(name.to_string());

        Ok(ClusterOperation::delete(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infrabox_core::Secret;

    fn secret(name: &str) -> Secret {
        let mut secret = Secret::default();
        secret.metadata.name = Some(name.to_string());
        secret.metadata.namespace = Some("default".to_string());
        secret
    }

    #[tokio::test]
    async fn test_stale_update_is_rejected() {
        let store = MockStore::new();
        let created = store.create(&secret("creds")).await.unwrap();

        let mut first = created.clone();
        first.type_ = Some("Opaque".to_string());
        store.update(&first).await.unwrap();

        let err = store.update(&created).await.unwrap_err();
        assert!(matches!(err, ControllerError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_finalizers_gate_physical_deletion() {
        let store = MockStore::new();
        let mut object = secret("creds");
        object.add_finalizer("job.infrabox.net");
        let key = store.insert(object).await.object_key();

        assert!(store.delete(&key).await.unwrap());
        let pending = store.snapshot(&key).await.unwrap();
        assert!(pending.deletion_requested());

        let mut other = pending.clone();
        other.type_ = Some("Opaque".to_string());
        let updated = store.update(&other).await.unwrap();
        assert!(store.snapshot(&key).await.is_some());

        let mut cleared = updated;
        cleared.clear_finalizers();
        store.update(&cleared).await.unwrap();
        assert!(store.snapshot(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_reports_false() {
        let store: MockStore<Secret> = MockStore::new();
        assert!(!store
            .delete(&ObjectKey::new("default", "nope"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_injected_failure_applies_once() {
        let store = MockStore::new();
        store.fail_next_write(ControllerError::api_error("unavailable"));

        assert!(store.create(&secret("a")).await.is_err());
        assert!(store.create(&secret("a")).await.is_ok());
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_dynamic_api_requires_registration() {
        let api = MockDynamicApi::new();
        let gvk = GroupVersionKind::new("gcp.service.infrabox.net", "v1alpha1", "GKECluster");

        let err = api.resolve(&gvk).await.unwrap_err();
        assert!(matches!(err, ControllerError::UnknownKind { .. }));

        api.register(gvk.clone(), "gkeclusters");
        assert_eq!(api.resolve(&gvk).await.unwrap().plural, "gkeclusters");
    }

    #[tokio::test]
    async fn test_cluster_script_last_status_sticks() {
        let provider = MockClusterProvider::new();
        provider.insert(MockClusterProvider::running("c1"));
        provider.script_status("c1", &["PROVISIONING", "RUNNING"]);

        let status = |c: Option<RemoteCluster>| c.unwrap().status;
        assert_eq!(status(provider.find("c1").await.unwrap()), "PROVISIONING");
        assert_eq!(status(provider.find("c1").await.unwrap()), "RUNNING");
        assert_eq!(status(provider.find("c1").await.unwrap()), "RUNNING");
    }
}
