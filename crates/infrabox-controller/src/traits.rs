use crate::error::Result;
use crate::gke::ClusterOperation;
use async_trait::async_trait;
use infrabox_core::crd::GkeClusterSpec;
use infrabox_core::{GroupVersionKind, ObjectKey, Resource};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Typed read/write access to one kind of API object
///
/// Not-found is reported through `Option`/`bool`, never as an error.
#[async_trait]
pub trait ObjectStore<T: Resource>: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<Option<T>>;

    /// List objects of this kind across all namespaces
    async fn list(&self) -> Result<Vec<T>>;

    async fn create(&self, object: &T) -> Result<T>;

    /// Replace the object; fails with `Conflict` when its resourceVersion is stale
    async fn update(&self, object: &T) -> Result<T>;

    /// Request deletion; returns false if the object did not exist
    async fn delete(&self, key: &ObjectKey) -> Result<bool>;
}

/// A kind resolved through discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResource {
    pub gvk: GroupVersionKind,
    /// Plural resource name used in request paths
    pub plural: String,
    pub namespaced: bool,
}

/// Untyped access to objects of arbitrary kinds
///
/// Objects are exchanged as JSON documents; only the caller knows their shape.
#[async_trait]
pub trait DynamicApi: Send + Sync {
    /// Resolve a kind to its API resource; unknown kinds are an error
    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<ApiResource>;

    async fn get(&self, resource: &ApiResource, key: &ObjectKey) -> Result<Option<Value>>;

    async fn create(&self, resource: &ApiResource, namespace: &str, object: &Value)
        -> Result<Value>;

    /// Request deletion; returns false if the object did not exist
    async fn delete(&self, resource: &ApiResource, key: &ObjectKey) -> Result<bool>;
}

/// Credentials of a remote cluster as reported by the provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterAuth {
    /// Base64 encoded PEM
    #[serde(default)]
    pub client_certificate: String,
    /// Base64 encoded PEM
    #[serde(default)]
    pub client_key: String,
    /// Base64 encoded PEM
    #[serde(default)]
    pub cluster_ca_certificate: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// A cluster as listed by the external provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCluster {
    pub name: String,
    /// Coarse provider status: RUNNING, PROVISIONING, STOPPING, ERROR, ...
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub master_auth: MasterAuth,
}

impl RemoteCluster {
    pub fn is_running(&self) -> bool {
        self.status == "RUNNING"
    }

    pub fn is_provisioning(&self) -> bool {
        self.status == "PROVISIONING"
    }

    pub fn is_stopping(&self) -> bool {
        self.status == "STOPPING"
    }
}

/// External provisioning API for compute clusters
///
/// Clusters are addressed by the name of the local resource; the provider
/// owns the mapping to remote names. Create and delete only start the work
/// and return a handle to poll.
#[async_trait]
pub trait ClusterProvider: Send + Sync {
    async fn find(&self, name: &str) -> Result<Option<RemoteCluster>>;

    async fn create(&self, name: &str, spec: &GkeClusterSpec) -> Result<ClusterOperation>;

    async fn delete(&self, name: &str) -> Result<ClusterOperation>;
}
