//! Auxiliary services declared by a job, handled as untyped documents

use crate::error::{ControllerError, Result};
use crate::traits::{ApiResource, DynamicApi};
use infrabox_core::crd::{JobService, SERVICE_SECRET_NAME_LABEL};
use infrabox_core::{InfraboxError, Job, ObjectKey, Resource};
use serde_json::Value;
use tracing::{debug, info};

/// Where one service stands after an ensure pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceReadiness {
    Ready,
    NotReady,
}

async fn locate(
    api: &dyn DynamicApi,
    job: &Job,
    service: &JobService,
) -> Result<(ApiResource, ObjectKey)> {
    let resource = api.resolve(&service.gvk()?).await?;
    let key = ObjectKey::new(job.namespace(), service.id()?);
    Ok((resource, key))
}

/// The object to create for a declared service
///
/// Named after the service id in the job's namespace, told to publish its
/// credentials under the same name and owned by the job.
pub fn service_document(job: &Job, service: &JobService) -> Result<Value> {
    let id = service.id()?.to_string();

    let mut metadata = service.metadata.clone();
    metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(SERVICE_SECRET_NAME_LABEL.to_string(), id.clone());
    metadata.name = Some(id);
    metadata.namespace = Some(job.namespace().to_string());
    metadata.owner_references = Some(vec![job.controller_ref()]);

    let metadata = serde_json::to_value(&metadata).map_err(|e| {
        InfraboxError::serialization_error(
            format!("Failed to serialize service metadata: {}", e),
            Some(Box::new(e)),
        )
    })?;

    let mut document = serde_json::json!({
        "apiVersion": service.api_version,
        "kind": service.kind,
        "metadata": metadata,
    });
    if !service.spec.is_null() {
        document["spec"] = service.spec.clone();
    }

    Ok(document)
}

/// Make sure the service exists and report whether it is ready
///
/// A service reporting "error" fails the job.
pub async fn ensure_service(
    api: &dyn DynamicApi,
    job: &Job,
    service: &JobService,
) -> Result<ServiceReadiness> {
    let (resource, key) = locate(api, job, service).await?;

    let Some(existing) = api.get(&resource, &key).await? else {
        info!("{}: creating service {} {}", job.object_key(), service.type_name(), key);
        api.create(&resource, job.namespace(), &service_document(job, service)?)
            .await?;
        return Ok(ServiceReadiness::NotReady);
    };

    let status = &existing["status"];
    match status["status"].as_str() {
        Some("ready") => Ok(ServiceReadiness::Ready),
        Some("error") => Err(ControllerError::service_failed(
            service.type_name(),
            status["message"].as_str().unwrap_or_default(),
        )),
        _ => Ok(ServiceReadiness::NotReady),
    }
}

/// Request deletion of the service; true once it no longer exists
pub async fn delete_service(api: &dyn DynamicApi, job: &Job, service: &JobService) -> Result<bool> {
    let (resource, key) = locate(api, job, service).await?;

    let Some(existing) = api.get(&resource, &key).await? else {
        return Ok(true);
    };

    if existing["metadata"]["deletionTimestamp"].is_null() {
        info!("{}: deleting service {} {}", job.object_key(), service.type_name(), key);
        if !api.delete(&resource, &key).await? {
            return Ok(true);
        }
    } else {
        debug!("{}: service {} still terminating", job.object_key(), key);
    }

    Ok(false)
}
