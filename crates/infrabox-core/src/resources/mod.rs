pub mod quantities;

pub use quantities::ResourceQuantities;

use crate::crd::{ResourceStatus, SyncStatus};
use crate::error::{InfraboxError, Result};
use crate::{GroupVersionKind, ObjectKey};
use k8s_openapi::api::batch::v1::Job as BatchJob;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Base validation for all resources
pub fn validate_base(metadata: &ObjectMeta) -> Result<()> {
    let name = metadata
        .name
        .as_deref()
        .ok_or_else(|| InfraboxError::missing_field("metadata.name"))?;

    if !is_valid_name(name) {
        return Err(InfraboxError::invalid_resource(
            format!("invalid name '{}'", name),
            "Names must be lowercase alphanumeric, '-' or '.', and start and end with an alphanumeric character",
        ));
    }

    Ok(())
}

/// Trait for API objects the controllers read and write
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// apiVersion on the wire ("v1", "batch/v1", ...)
    const API_VERSION: &'static str;

    /// kind on the wire
    const KIND: &'static str;

    fn metadata(&self) -> &ObjectMeta;

    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// Get the GroupVersionKind
    fn gvk() -> GroupVersionKind {
        let (group, version) = Self::API_VERSION
            .split_once('/')
            .unwrap_or(("", Self::API_VERSION));
        GroupVersionKind::new(group, version, Self::KIND)
    }

    fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or_default()
    }

    fn object_key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace(), self.name())
    }

    fn resource_version(&self) -> Option<&str> {
        self.metadata().resource_version.as_deref()
    }

    fn uid(&self) -> Option<&str> {
        self.metadata().uid.as_deref()
    }

    fn label(&self, key: &str) -> Option<&str> {
        self.metadata()
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }

    /// True once the store has stamped a deletionTimestamp
    fn deletion_requested(&self) -> bool {
        self.metadata().deletion_timestamp.is_some()
    }

    fn finalizers(&self) -> &[String] {
        self.metadata().finalizers.as_deref().unwrap_or_default()
    }

    fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers().iter().any(|f| f == finalizer)
    }

    /// Add a finalizer; returns false if it was already present
    fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.metadata_mut()
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(finalizer.to_string());
        true
    }

    fn clear_finalizers(&mut self) {
        self.metadata_mut().finalizers = Some(Vec::new());
    }

    /// Controller owner reference pointing at this object
    fn controller_ref(&self) -> OwnerReference {
        OwnerReference {
            api_version: Self::API_VERSION.to_string(),
            kind: Self::KIND.to_string(),
            name: self.name().to_string(),
            uid: self.uid().unwrap_or_default().to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// Validate the resource
    fn validate(&self) -> Result<()> {
        validate_base(self.metadata())
    }
}

/// A custom resource carrying the shared status surface
pub trait CustomResource: Resource {
    fn status(&self) -> &ResourceStatus;

    fn status_mut(&mut self) -> &mut ResourceStatus;

    /// Set the status value; returns false when nothing changed
    fn set_status(&mut self, status: SyncStatus) -> bool {
        if self.status().status == status {
            return false;
        }
        self.status_mut().status = status;
        true
    }

    fn mark_error(&mut self, message: impl Into<String>) {
        let status = self.status_mut();
        status.status = SyncStatus::Error;
        status.message = Some(message.into());
    }
}

/// Validate a Kubernetes resource name (DNS-1123 subdomain)
pub fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    let bytes = name.as_bytes();
    let edge_ok = |c: u8| c.is_ascii_lowercase() || c.is_ascii_digit();

    if !edge_ok(bytes[0]) || !edge_ok(bytes[bytes.len() - 1]) {
        return false;
    }

    bytes
        .iter()
        .all(|&c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == b'-' || c == b'.')
}

impl Resource for BatchJob {
    const API_VERSION: &'static str = "batch/v1";
    const KIND: &'static str = "Job";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Resource for Secret {
    const API_VERSION: &'static str = "v1";
    const KIND: &'static str = "Secret";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_name() {
        assert!(is_valid_name("build-42"));
        assert!(is_valid_name("ib-cluster.a"));

        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Build"));
        assert!(!is_valid_name("-build"));
        assert!(!is_valid_name("build-"));
        assert!(!is_valid_name("my_build"));
    }

    #[test]
    fn test_finalizer_helpers() {
        let mut secret = Secret::default();
        assert!(secret.finalizers().is_empty());

        assert!(secret.add_finalizer("job.infrabox.net"));
        assert!(!secret.add_finalizer("job.infrabox.net"));
        assert_eq!(secret.finalizers(), ["job.infrabox.net".to_string()]);

        secret.clear_finalizers();
        assert!(!secret.has_finalizer("job.infrabox.net"));
    }

    #[test]
    fn test_gvk_for_builtin_kinds() {
        assert_eq!(BatchJob::gvk().api_path(), "apis/batch/v1");
        assert_eq!(Secret::gvk().api_path(), "api/v1");
        assert_eq!(Secret::gvk().resource_name(), "secrets");
    }

    #[test]
    fn test_controller_ref() {
        let mut job = BatchJob::default();
        job.metadata.name = Some("build-1".to_string());
        job.metadata.uid = Some("uid-1".to_string());

        let owner = job.controller_ref();
        assert_eq!(owner.kind, "Job");
        assert_eq!(owner.api_version, "batch/v1");
        assert_eq!(owner.uid, "uid-1");
        assert_eq!(owner.controller, Some(true));
    }
}
