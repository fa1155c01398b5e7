use crate::error::{ControllerError, Result};
use crate::traits::{ApiResource, DynamicApi, ObjectStore};
use async_trait::async_trait;
use infrabox_core::k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResourceList;
use infrabox_core::{from_document, to_document, GroupVersionKind, ObjectKey, Resource};
use parking_lot::Mutex;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Lightweight HTTP client for the Kubernetes API server
pub struct ApiClient {
    base_url: String,
    client: Client,
    token: Option<String>,
    discovered: Mutex<HashMap<GroupVersionKind, ApiResource>>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            token: None,
            discovered: Mutex::new(HashMap::new()),
        }
    }

    /// Client presenting a bearer token, optionally skipping certificate checks
    pub fn with_options(
        base_url: &str,
        token: Option<String>,
        accept_invalid_certs: bool,
    ) -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| {
                ControllerError::invalid_config(
                    format!("cannot build HTTP client: {}", e),
                    "Check the TLS settings of the API server connection",
                )
            })?;

        Ok(Self {
            client,
            token,
            ..Self::new(base_url)
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of a collection (`name` unset) or a single object
    ///
    /// An empty namespace addresses the cluster-wide collection.
    pub fn resource_url(
        &self,
        api_path: &str,
        plural: &str,
        namespace: &str,
        name: Option<&str>,
    ) -> String {
        let mut url = format!("{}/{}", self.base_url, api_path);
        if !namespace.is_empty() {
            url.push_str("/namespaces/");
            url.push_str(namespace);
        }
        url.push('/');
        url.push_str(plural);
        if let Some(name) = name {
            url.push('/');
            url.push_str(name);
        }
        url
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send a request; not-found is `None`, a conflict is `Conflict`
    async fn execute(&self, builder: RequestBuilder, kind: &str, key: &str) -> Result<Option<Value>> {
        let resp = self
            .authorized(builder)
            .send()
            .await
            .map_err(|e| ControllerError::api_error(format!("HTTP request failed: {}", e)))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if status == StatusCode::CONFLICT {
                return Err(ControllerError::conflict(kind, key, body));
            }
            return Err(ControllerError::api_error(format!(
                "{} {} failed with status {}: {}",
                kind, key, status, body
            )));
        }

        resp.json::<Value>().await.map(Some).map_err(|e| {
            ControllerError::api_error(format!("Failed to parse {} {}: {}", kind, key, e))
        })
    }

    async fn get_value(&self, url: &str, kind: &str, key: &str) -> Result<Option<Value>> {
        debug!("GET {}", url);
        self.execute(self.client.get(url), kind, key).await
    }

    async fn post_value(&self, url: &str, kind: &str, key: &str, object: &Value) -> Result<Value> {
        debug!("POST {}", url);
        self.execute(self.client.post(url).json(object), kind, key)
            .await?
            .ok_or_else(|| ControllerError::api_error(format!("{} {}: collection not found", kind, key)))
    }

    async fn put_value(&self, url: &str, kind: &str, key: &str, object: &Value) -> Result<Value> {
        debug!("PUT {}", url);
        self.execute(self.client.put(url).json(object), kind, key)
            .await?
            .ok_or_else(|| ControllerError::api_error(format!("{} {} not found", kind, key)))
    }

    /// Dependents are removed in the background
    async fn delete_value(&self, url: &str, kind: &str, key: &str) -> Result<bool> {
        debug!("DELETE {}", url);
        let request = self
            .client
            .delete(url)
            .query(&[("propagationPolicy", "Background")]);
        Ok(self.execute(request, kind, key).await?.is_some())
    }
}

/// Pick `gvk` out of a discovery document; subresources are never matches
pub fn find_resource(gvk: &GroupVersionKind, list: &APIResourceList) -> Option<ApiResource> {
    list.resources
        .iter()
        .find(|r| r.kind == gvk.kind && !r.name.contains('/'))
        .map(|r| ApiResource {
            gvk: gvk.clone(),
            plural: r.name.clone(),
            namespaced: r.namespaced,
        })
}

#[async_trait]
impl DynamicApi for ApiClient {
    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<ApiResource> {
        if let Some(resource) = self.discovered.lock().get(gvk) {
            return Ok(resource.clone());
        }

        let url = format!("{}/{}", self.base_url, gvk.api_path());
        let list = self
            .get_value(&url, "APIResourceList", &gvk.api_version())
            .await?
            .map(serde_json::from_value::<APIResourceList>)
            .transpose()
            .map_err(|e| ControllerError::api_error(format!("Failed to parse discovery document: {}", e)))?;

        let resource = list
            .as_ref()
            .and_then(|list| find_resource(gvk, list))
            .ok_or_else(|| ControllerError::unknown_kind(gvk.api_version(), &gvk.kind))?;

        debug!("Discovered {} as {}", gvk, resource.plural);
        self.discovered.lock().insert(gvk.clone(), resource.clone());
        Ok(resource)
    }

    async fn get(&self, resource: &ApiResource, key: &ObjectKey) -> Result<Option<Value>> {
        let url = self.resource_url(
            &resource.gvk.api_path(),
            &resource.plural,
            &key.namespace,
            Some(&key.name),
        );
        self.get_value(&url, &resource.gvk.kind, &key.to_string()).await
    }

    async fn create(
        &self,
        resource: &ApiResource,
        namespace: &str,
        object: &Value,
    ) -> Result<Value> {
        let namespace = if resource.namespaced { namespace } else { "" };
        let url = self.resource_url(&resource.gvk.api_path(), &resource.plural, namespace, None);
        let name = object["metadata"]["name"].as_str().unwrap_or_default();
        self.post_value(&url, &resource.gvk.kind, name, object).await
    }

    async fn delete(&self, resource: &ApiResource, key: &ObjectKey) -> Result<bool> {
        let url = self.resource_url(
            &resource.gvk.api_path(),
            &resource.plural,
            &key.namespace,
            Some(&key.name),
        );
        self.delete_value(&url, &resource.gvk.kind, &key.to_string())
            .await
    }
}

/// Typed object store backed by the API server
pub struct HttpStore<T> {
    client: Arc<ApiClient>,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Resource> HttpStore<T> {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }

    fn url(&self, namespace: &str, name: Option<&str>) -> String {
        let gvk = T::gvk();
        self.client
            .resource_url(&gvk.api_path(), &gvk.resource_name(), namespace, name)
    }
}

#[async_trait]
impl<T: Resource> ObjectStore<T> for HttpStore<T> {
    async fn get(&self, key: &ObjectKey) -> Result<Option<T>> {
        let url = self.url(&key.namespace, Some(&key.name));
        match self.client.get_value(&url, T::KIND, &key.to_string()).await? {
            Some(value) => Ok(Some(from_document(value)?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<T>> {
        let url = self.url("", None);
        let Some(mut list) = self.client.get_value(&url, T::KIND, "list").await? else {
            return Err(ControllerError::api_error(format!(
                "{} is not served by the API server",
                T::gvk()
            )));
        };

        match list.get_mut("items").map(Value::take) {
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| from_document(item).map_err(ControllerError::from))
                .collect(),
            _ => Ok(Vec::new()),
        }
    }

    async fn create(&self, object: &T) -> Result<T> {
        let url = self.url(object.namespace(), None);
        let created = self
            .client
            .post_value(&url, T::KIND, &object.object_key().to_string(), &to_document(object)?)
            .await?;
        Ok(from_document(created)?)
    }

    async fn update(&self, object: &T) -> Result<T> {
        let key = object.object_key();
        let url = self.url(&key.namespace, Some(&key.name));
        let updated = self
            .client
            .put_value(&url, T::KIND, &key.to_string(), &to_document(object)?)
            .await?;
        Ok(from_document(updated)?)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<bool> {
        let url = self.url(&key.namespace, Some(&key.name));
        self.client
            .delete_value(&url, T::KIND, &key.to_string())
            .await
    }
}
