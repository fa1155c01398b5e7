use super::status::ResourceStatus;
use crate::error::{InfraboxError, Result};
use crate::resources::{CustomResource, Resource};
use crate::GroupVersionKind;
use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// Finalizer the job controller places on every Job it manages
pub const JOB_FINALIZER: &str = "job.infrabox.net";

/// Label carrying the deterministic identifier of an auxiliary service
pub const SERVICE_ID_LABEL: &str = "service.infrabox.net/id";

/// Label telling a service which secret to publish its credentials under
pub const SERVICE_SECRET_NAME_LABEL: &str = "service.infrabox.net/secret-name";

/// An InfraBox CI job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: JobSpec,
    #[serde(default)]
    pub status: ResourceStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Only `limits` is consulted; requests are derived from it
    #[serde(default)]
    pub resources: ResourceRequirements,
    /// Extra variables appended to the run-job container environment
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    /// Auxiliary services that must be ready before the job starts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<JobService>,
}

/// A declared auxiliary service of arbitrary API kind
///
/// Only the type information and metadata are interpreted; `spec` is passed
/// through to the created object untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobService {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub spec: serde_json::Value,
}

impl JobService {
    /// The `service.infrabox.net/id` label, used as the object name
    pub fn id(&self) -> Result<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(SERVICE_ID_LABEL))
            .map(String::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                InfraboxError::invalid_resource(
                    format!("service {} has no id", self.type_name()),
                    format!("Set the '{}' label on every declared service", SERVICE_ID_LABEL),
                )
            })
    }

    pub fn gvk(&self) -> Result<GroupVersionKind> {
        GroupVersionKind::from_api_version_kind(&self.api_version, &self.kind)
    }

    /// "apiVersion/kind", for log lines
    pub fn type_name(&self) -> String {
        format!("{}/{}", self.api_version, self.kind)
    }
}

impl Resource for Job {
    const API_VERSION: &'static str = "core.infrabox.net/v1alpha1";
    const KIND: &'static str = "Job";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn validate(&self) -> Result<()> {
        crate::resources::validate_base(&self.metadata)?;

        for service in &self.spec.services {
            service.id()?;
            service.gvk()?;
        }

        Ok(())
    }
}

impl CustomResource for Job {
    fn status(&self) -> &ResourceStatus {
        &self.status
    }

    fn status_mut(&mut self) -> &mut ResourceStatus {
        &mut self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::SyncStatus;

    #[test]
    fn test_job_deserializes_from_manifest() {
        let job: Job = serde_json::from_value(serde_json::json!({
            "apiVersion": "core.infrabox.net/v1alpha1",
            "kind": "Job",
            "metadata": {"name": "build-1", "namespace": "infrabox-worker"},
            "spec": {
                "resources": {"limits": {"cpu": "1", "memory": "1Gi"}},
                "env": [{"name": "FOO", "value": "bar"}],
                "services": [{
                    "apiVersion": "gcp.service.infrabox.net/v1alpha1",
                    "kind": "GKECluster",
                    "metadata": {"name": "my-cluster", "labels": {"service.infrabox.net/id": "svc-1"}},
                    "spec": {"numNodes": "3"}
                }]
            },
            "status": {"status": "pending"}
        }))
        .unwrap();

        assert_eq!(job.name(), "build-1");
        assert_eq!(job.status.status, SyncStatus::Pending);
        assert_eq!(job.spec.env[0].name, "FOO");
        assert_eq!(job.spec.services[0].id().unwrap(), "svc-1");
        assert_eq!(job.spec.services[0].spec["numNodes"], "3");
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_service_without_id_is_invalid() {
        let service = JobService {
            api_version: "gcp.service.infrabox.net/v1alpha1".to_string(),
            kind: "GKECluster".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            service.id().unwrap_err(),
            InfraboxError::InvalidResource { .. }
        ));
    }
}
