//! InfraBox Core - Resource types shared by the InfraBox controllers
//!
//! This crate provides:
//! - The `Job` and `GKECluster` custom resources and their status model
//! - Namespace/name object keys and GroupVersionKind handling
//! - Finalizer and owner-reference helpers
//! - Error types with miette diagnostics

pub mod crd;
pub mod error;
pub mod events;
pub mod resources;
pub mod types;

// Re-export commonly used types
pub use crd::{GkeCluster, Job, ResourceStatus, SyncStatus};
pub use error::{InfraboxError, Result};
pub use events::{ResourceEvent, WatchEventType};
pub use resources::{is_valid_name, CustomResource, Resource, ResourceQuantities};
pub use types::{GroupVersionKind, ObjectKey};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::batch::v1::Job as BatchJob;
pub use k8s_openapi::api::core::v1::Secret;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Serialize a resource to its wire document, stamping apiVersion and kind
pub fn to_document<T: Resource>(resource: &T) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(resource).map_err(|e| {
        InfraboxError::serialization_error(
            format!("Failed to serialize {}: {}", T::KIND, e),
            Some(Box::new(e)),
        )
    })?;

    if let Some(object) = value.as_object_mut() {
        object.insert("apiVersion".to_string(), T::API_VERSION.into());
        object.insert("kind".to_string(), T::KIND.into());
    }

    Ok(value)
}

/// Deserialize a resource from its wire document
pub fn from_document<T: Resource>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        InfraboxError::serialization_error(
            format!("Failed to deserialize {}: {}", T::KIND, e),
            Some(Box::new(e)),
        )
    })
}
